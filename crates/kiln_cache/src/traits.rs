//! The cache abstraction shared by every backend.

use std::io::{self, Read, Write};

use kiln_common::{ContentHash, Guid};

use crate::error::CacheError;

/// A store of built artifacts keyed by `(guid, fingerprint)`.
///
/// Implementations must be usable from many build workers at once.
pub trait PipelineCache: Send + Sync {
    /// Opens the artifact for reading. A miss, a corrupt entry or an
    /// unreachable backend all return `None`.
    fn get(&self, guid: Guid, hash: ContentHash) -> Option<Box<dyn Read + Send>>;

    /// Opens a writer for a new artifact. Nothing is visible to readers until
    /// the writer is committed.
    fn put(&self, guid: Guid, hash: ContentHash)
        -> Result<Box<dyn CacheWriter + '_>, CacheError>;

    /// Removes an artifact. Returns whether an entry was removed.
    fn remove(&self, guid: Guid, hash: ContentHash) -> Result<bool, CacheError>;

    /// Returns whether a readable artifact exists.
    fn contains(&self, guid: Guid, hash: ContentHash) -> bool {
        self.get(guid, hash).is_some()
    }
}

/// Write side of a cache entry.
///
/// Committing is the only way to publish the entry; a writer dropped without
/// a commit leaves the cache untouched.
pub trait CacheWriter: Write + Send {
    /// Publishes everything written so far.
    fn commit(self: Box<Self>) -> Result<(), CacheError>;
}

/// Read and write permissions of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheAccess {
    /// Whether `get` consults this backend.
    pub read: bool,
    /// Whether `put` and `remove` are accepted.
    pub write: bool,
}

impl CacheAccess {
    /// Full access.
    pub const READ_WRITE: CacheAccess = CacheAccess {
        read: true,
        write: true,
    };

    /// Reads only; writes are refused.
    pub const READ_ONLY: CacheAccess = CacheAccess {
        read: true,
        write: false,
    };

    pub(crate) fn check_write(&self) -> Result<(), CacheError> {
        if self.write {
            Ok(())
        } else {
            Err(CacheError::AccessDenied { operation: "write" })
        }
    }
}

impl Default for CacheAccess {
    fn default() -> Self {
        Self::READ_WRITE
    }
}

type CommitFn<'a> = Box<dyn FnOnce(Vec<u8>) -> Result<(), CacheError> + Send + 'a>;

/// A [`CacheWriter`] that buffers the artifact in memory and hands the whole
/// payload to a callback on commit.
pub struct BufferedCacheWriter<'a> {
    buffer: Vec<u8>,
    on_commit: CommitFn<'a>,
}

impl<'a> BufferedCacheWriter<'a> {
    /// Creates a writer that calls `on_commit` with the buffered payload.
    pub fn new(
        on_commit: impl FnOnce(Vec<u8>) -> Result<(), CacheError> + Send + 'a,
    ) -> Self {
        Self {
            buffer: Vec::new(),
            on_commit: Box::new(on_commit),
        }
    }
}

impl Write for BufferedCacheWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl CacheWriter for BufferedCacheWriter<'_> {
    fn commit(self: Box<Self>) -> Result<(), CacheError> {
        let this = *self;
        (this.on_commit)(this.buffer)
    }
}
