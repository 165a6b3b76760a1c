//! Artifact caches keyed by asset GUID and dependency fingerprint.
//!
//! Every backend implements [`PipelineCache`]. Reads are fail-safe: a missing,
//! corrupt or unreachable entry is a miss. Writes go through a
//! [`CacheWriter`] and only become visible on [`CacheWriter::commit`].
//!
//! Backends:
//! - [`LocalPipelineCache`]: content-addressed files with a validated header.
//! - [`RemotePipelineCache`]: a TCP client for the cache wire protocol.
//! - [`MemoryPipelineCache`]: an in-process LRU store with a byte budget.
//! - [`LayeredPipelineCache`]: an ordered stack of the above.
//!
//! [`CacheServer`] serves the wire protocol from a memory store.

#![warn(missing_docs)]

pub mod artifact;
pub mod error;
pub mod key;
pub mod layered;
pub mod local;
pub mod memory;
pub mod protocol;
pub mod remote;
pub mod server;
pub mod traits;

pub use error::CacheError;
pub use key::CacheKey;
pub use layered::LayeredPipelineCache;
pub use local::LocalPipelineCache;
pub use memory::MemoryPipelineCache;
pub use remote::{RemoteCacheOptions, RemotePipelineCache};
pub use server::{CacheServer, CacheServerHandle};
pub use traits::{BufferedCacheWriter, CacheAccess, CacheWriter, PipelineCache};
