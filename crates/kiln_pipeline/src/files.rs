//! Content hashing of external files with metadata short-circuiting.

use std::path::{Path, PathBuf};

use kiln_common::ContentHash;
use kiln_db::{FileHash, PipelineDb};
use tracing::{trace, warn};

use crate::error::PipelineError;

/// Joins a declared file path onto `root`. Absolute paths and a missing root
/// leave the path as declared.
pub(crate) fn resolve(root: Option<&Path>, path: &Path) -> PathBuf {
    match root {
        Some(root) => root.join(path),
        None => path.to_path_buf(),
    }
}

/// Hashes files referenced by assets, reusing the recorded content hash when
/// the file's size and last write time are unchanged.
///
/// Declared paths are resolved against an optional root, so fingerprints can
/// stay independent of where the project lives. Records are keyed by the
/// resolved path.
pub struct FileHasher<'a> {
    db: &'a PipelineDb,
    root: Option<&'a Path>,
}

impl<'a> FileHasher<'a> {
    /// Creates a hasher consulting `db` for earlier observations.
    pub fn new(db: &'a PipelineDb) -> Self {
        Self { db, root: None }
    }

    /// Resolves relative declared paths against `root`.
    pub fn with_root(mut self, root: &'a Path) -> Self {
        self.root = Some(root);
        self
    }

    /// The on-disk location of a declared path.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        resolve(self.root, path)
    }

    /// Returns the current state of the declared file `path`.
    ///
    /// The file is only read when no matching record exists. A database
    /// failure is logged and treated as "no record".
    pub fn hash(&self, path: &Path) -> Result<FileHash, PipelineError> {
        let resolved = self.resolve(path);
        let path = resolved.as_path();
        let io_err = |source| PipelineError::Io {
            path: path.to_path_buf(),
            source,
        };

        let metadata = std::fs::metadata(path).map_err(io_err)?;
        let size = metadata.len();
        let last_write_time = FileHash::timestamp(metadata.modified().map_err(io_err)?);

        let recorded = self.db.get_file(path).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "file record lookup failed; rehashing");
            None
        });
        if let Some(record) = recorded.filter(|r| r.matches_metadata(size, last_write_time)) {
            trace!(path = %path.display(), "file unchanged; reusing content hash");
            return Ok(record);
        }

        let content = std::fs::read(path).map_err(io_err)?;
        Ok(FileHash {
            size: content.len() as u64,
            last_write_time,
            content_hash: ContentHash::from_bytes(&content),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_file_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hello").unwrap();

        let db = PipelineDb::open_with("memory:").unwrap();
        let fh = FileHasher::new(&db).hash(&path).unwrap();
        assert_eq!(fh.size, 5);
        assert_eq!(fh.content_hash, ContentHash::from_bytes(b"hello"));
    }

    #[test]
    fn reuses_record_when_metadata_matches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hello").unwrap();

        let db = PipelineDb::open_with("memory:").unwrap();
        let hasher = FileHasher::new(&db);
        let mut fh = hasher.hash(&path).unwrap();

        // A record with matching metadata but a different hash proves the
        // file was not read again.
        fh.content_hash = ContentHash::from_bytes(b"recorded");
        db.set_file(&path, fh).unwrap();
        assert_eq!(
            hasher.hash(&path).unwrap().content_hash,
            ContentHash::from_bytes(b"recorded")
        );
    }

    #[test]
    fn rehashes_when_size_differs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hello").unwrap();

        let db = PipelineDb::open_with("memory:").unwrap();
        let hasher = FileHasher::new(&db);
        let mut stale = hasher.hash(&path).unwrap();
        stale.size = 999;
        stale.content_hash = ContentHash::from_bytes(b"stale");
        db.set_file(&path, stale).unwrap();

        assert_eq!(
            hasher.hash(&path).unwrap().content_hash,
            ContentHash::from_bytes(b"hello")
        );
    }

    #[test]
    fn relative_paths_resolve_against_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("textures")).unwrap();
        std::fs::write(dir.path().join("textures/a.png"), b"pixels").unwrap();

        let db = PipelineDb::open_with("memory:").unwrap();
        let hasher = FileHasher::new(&db).with_root(dir.path());
        let declared = Path::new("textures/a.png");
        assert_eq!(hasher.resolve(declared), dir.path().join("textures/a.png"));
        assert_eq!(
            hasher.hash(declared).unwrap().content_hash,
            ContentHash::from_bytes(b"pixels")
        );
    }

    #[test]
    fn missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let db = PipelineDb::open_with("memory:").unwrap();
        let err = FileHasher::new(&db)
            .hash(&dir.path().join("missing.png"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Io { .. }));
    }

    #[test]
    fn closed_db_still_hashes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"data").unwrap();
        let db = PipelineDb::new();
        let fh = FileHasher::new(&db).hash(&path).unwrap();
        assert_eq!(fh.content_hash, ContentHash::from_bytes(b"data"));
    }
}
