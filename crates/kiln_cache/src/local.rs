//! Content-addressed artifact files on the local filesystem.

use std::collections::HashSet;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use kiln_common::{ContentHash, Guid};
use tracing::{debug, warn};

use crate::artifact::{decode_artifact, encode_artifact};
use crate::error::CacheError;
use crate::key::CacheKey;
use crate::traits::{BufferedCacheWriter, CacheAccess, CacheWriter, PipelineCache};

const ARTIFACT_EXT: &str = "artifact";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// File-backed cache.
///
/// Each artifact is stored at `<root>/<shard>/<key>.artifact`, where `key` is
/// the hex-encoded [`CacheKey`] and `shard` its first two characters. A commit
/// writes a temporary file next to the target and renames it into place, so
/// concurrent readers see either no entry or the complete one.
pub struct LocalPipelineCache {
    root: PathBuf,
    access: CacheAccess,
}

impl LocalPipelineCache {
    /// Creates a read/write cache rooted at `root`. Directories are created
    /// lazily on the first write.
    pub fn new(root: &Path) -> Self {
        Self::with_access(root, CacheAccess::READ_WRITE)
    }

    /// Creates a cache with explicit access permissions.
    pub fn with_access(root: &Path, access: CacheAccess) -> Self {
        Self {
            root: root.to_path_buf(),
            access,
        }
    }

    /// Returns the cache root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the file path for an artifact.
    pub fn artifact_path(&self, key: &CacheKey) -> PathBuf {
        let hex = key.to_hex();
        self.root
            .join(&hex[..2])
            .join(format!("{hex}.{ARTIFACT_EXT}"))
    }

    /// Reads and validates an artifact. Corruption is a miss.
    pub fn read_artifact(&self, key: &CacheKey) -> Option<Vec<u8>> {
        let path = self.artifact_path(key);
        let raw = std::fs::read(&path).ok()?;
        match decode_artifact(&raw) {
            Some(payload) => Some(payload.to_vec()),
            None => {
                warn!(path = %path.display(), "ignoring corrupt cache artifact");
                None
            }
        }
    }

    /// Writes an artifact atomically.
    pub fn write_artifact(&self, key: &CacheKey, payload: &[u8]) -> Result<(), CacheError> {
        let path = self.artifact_path(key);
        let dir = path.parent().unwrap_or(&self.root).to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| CacheError::Io {
            path: dir.clone(),
            source: e,
        })?;

        let encoded = encode_artifact(payload)?;
        let tmp = dir.join(format!(
            "{}.{}.{}.tmp",
            key.to_hex(),
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        let result = (|| {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(&encoded)?;
            file.sync_all()?;
            drop(file);
            std::fs::rename(&tmp, &path)
        })();

        if let Err(e) = result {
            let _ = std::fs::remove_file(&tmp);
            return Err(CacheError::Io { path, source: e });
        }

        debug!(key = %key, bytes = payload.len(), "stored artifact");
        Ok(())
    }

    /// Removes artifacts that are not in the set of live keys.
    ///
    /// Stray temporary files and files that do not parse as artifact names
    /// are removed as well. Returns the number of files removed.
    pub fn gc(&self, live: &HashSet<CacheKey>) -> Result<usize, CacheError> {
        if !self.root.exists() {
            return Ok(0);
        }
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| CacheError::Io { path, source }
        };

        let mut removed = 0;
        for shard in std::fs::read_dir(&self.root).map_err(io_err(&self.root))? {
            let shard = shard.map_err(io_err(&self.root))?.path();
            if !shard.is_dir() {
                continue;
            }
            for entry in std::fs::read_dir(&shard).map_err(io_err(&shard))? {
                let path = entry.map_err(io_err(&shard))?.path();
                let live_artifact = path.extension().and_then(|e| e.to_str())
                    == Some(ARTIFACT_EXT)
                    && path
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .and_then(CacheKey::from_hex)
                        .is_some_and(|key| live.contains(&key));
                if !live_artifact {
                    std::fs::remove_file(&path).map_err(io_err(&path))?;
                    removed += 1;
                }
            }
        }

        debug!(removed, "cache gc finished");
        Ok(removed)
    }
}

impl PipelineCache for LocalPipelineCache {
    fn get(&self, guid: Guid, hash: ContentHash) -> Option<Box<dyn Read + Send>> {
        if !self.access.read {
            return None;
        }
        let payload = self.read_artifact(&CacheKey::new(guid, hash))?;
        Some(Box::new(Cursor::new(payload)))
    }

    fn put(
        &self,
        guid: Guid,
        hash: ContentHash,
    ) -> Result<Box<dyn CacheWriter + '_>, CacheError> {
        self.access.check_write()?;
        let key = CacheKey::new(guid, hash);
        Ok(Box::new(BufferedCacheWriter::new(move |payload| {
            self.write_artifact(&key, &payload)
        })))
    }

    fn remove(&self, guid: Guid, hash: ContentHash) -> Result<bool, CacheError> {
        self.access.check_write()?;
        let path = self.artifact_path(&CacheKey::new(guid, hash));
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::Io { path, source: e }),
        }
    }

    fn contains(&self, guid: Guid, hash: ContentHash) -> bool {
        self.access.read && self.read_artifact(&CacheKey::new(guid, hash)).is_some()
    }
}
