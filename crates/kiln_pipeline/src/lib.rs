//! Dependency-tracked asset builds.
//!
//! A build starts from root asset GUIDs. [`DependencyGraph::walk`] discovers
//! every reachable asset through the per-type [`DependencyScanner`]s, then
//! [`PipelineBuilder`] computes a fingerprint for each node bottom-up,
//! consults the [`PipelineDb`](kiln_db::PipelineDb) and the
//! [`PipelineCache`](kiln_cache::PipelineCache), and rebuilds only what is
//! stale. Independent nodes build in parallel on a rayon pool.

#![warn(missing_docs)]

pub mod asset;
pub mod builder;
pub mod context;
pub mod depends;
pub mod error;
pub mod files;
pub mod graph;
pub mod hash;
pub mod manifest;
pub mod pipeline;

pub use asset::{DependencyKind, MemorySourceDatabase, SourceAsset, SourceDatabase};
pub use builder::{BuildOptions, CancellationToken, PipelineBuilder};
pub use context::BuildContext;
pub use depends::{Dependency, EmbeddedAsset, PipelineDepends, MAX_EMBEDDING_DEPTH};
pub use error::{NodeFailure, PipelineError};
pub use files::FileHasher;
pub use graph::{AssetNode, DependencyGraph};
pub use hash::{compute_asset_hash, PIPELINE_FORMAT_VERSION};
pub use manifest::{BuildManifest, BuildStatus, NodeOutcome};
pub use pipeline::{AssetBuilder, DependencyScanner, Pipeline, PipelineRegistry};
