//! The transactional pipeline record store.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use kiln_common::{ContentHash, Guid};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::connection::DbLocation;
use crate::error::DbError;
use crate::record::{FileHash, ReportRow};
use crate::report::ReportSink;

/// Snapshot format version. Snapshots written by another version are
/// discarded on open.
const DB_FORMAT_VERSION: u32 = 1;

/// Rows kept per report name; older rows are dropped first.
const MAX_REPORT_ROWS: usize = 4096;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Tables {
    dependencies: BTreeMap<Guid, ContentHash>,
    files: BTreeMap<PathBuf, FileHash>,
    reports: BTreeMap<String, Vec<ReportRow>>,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    format_version: u32,
    tables: Tables,
}

#[derive(Deserialize)]
struct SnapshotHeader {
    format_version: u32,
}

/// Writes staged by an open transaction, applied on commit.
#[derive(Debug, Default)]
struct Pending {
    dependencies: BTreeMap<Guid, ContentHash>,
    files: BTreeMap<PathBuf, FileHash>,
    reports: Vec<(String, ReportRow)>,
}

#[derive(Debug)]
struct Transaction {
    depth: u32,
    pending: Pending,
}

#[derive(Debug, Default)]
struct State {
    location: Option<DbLocation>,
    committed: Tables,
    transaction: Option<Transaction>,
}

impl State {
    fn location(&self) -> Result<&DbLocation, DbError> {
        self.location.as_ref().ok_or(DbError::NotOpen)
    }

    /// Applies `pending` on top of the committed tables, persists the result
    /// and only then makes it the committed state.
    fn commit(&mut self, pending: Pending) -> Result<(), DbError> {
        let mut next = self.committed.clone();
        next.dependencies.extend(pending.dependencies);
        next.files.extend(pending.files);
        for (name, row) in pending.reports {
            let rows = next.reports.entry(name).or_default();
            rows.push(row);
            if rows.len() > MAX_REPORT_ROWS {
                let excess = rows.len() - MAX_REPORT_ROWS;
                rows.drain(..excess);
            }
        }

        if let DbLocation::File(path) = self.location()? {
            write_snapshot(path, &next)?;
        }
        self.committed = next;
        Ok(())
    }

    /// Routes a write into the open transaction, or commits it immediately.
    fn stage(&mut self, apply: impl FnOnce(&mut Pending)) -> Result<(), DbError> {
        self.location()?;
        match self.transaction.as_mut() {
            Some(tx) => {
                apply(&mut tx.pending);
                Ok(())
            }
            None => {
                let mut pending = Pending::default();
                apply(&mut pending);
                self.commit(pending)
            }
        }
    }
}

/// Persistent GUID → fingerprint and path → [`FileHash`] mapping.
///
/// A single reader/writer lock guards all state: lookups during a dependency
/// walk proceed concurrently, updates at build completion are exclusive.
/// Mutations between [`begin_transaction`](Self::begin_transaction) and
/// [`end_transaction`](Self::end_transaction) are staged and committed as one
/// unit; reads inside the transaction observe the staged values. A file
/// snapshot is written to a temporary file and renamed into place, so a crash
/// leaves either the previous or the fully committed state.
#[derive(Debug, Default)]
pub struct PipelineDb {
    state: RwLock<State>,
}

impl PipelineDb {
    /// Creates a closed database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates and opens a database in one step.
    pub fn open_with(connection: &str) -> Result<Self, DbError> {
        let db = Self::new();
        db.open(connection)?;
        Ok(db)
    }

    /// Opens the store named by `connection`.
    ///
    /// A missing snapshot file yields an empty store; the file is created on
    /// the first commit. A snapshot written by a different format version is
    /// discarded.
    pub fn open(&self, connection: &str) -> Result<(), DbError> {
        let location: DbLocation = connection.parse()?;
        let mut state = self.state.write();
        if state.location.is_some() {
            return Err(DbError::AlreadyOpen);
        }

        let committed = match &location {
            DbLocation::Memory => Tables::default(),
            DbLocation::File(path) => read_snapshot(path)?,
        };
        debug!(
            connection,
            dependencies = committed.dependencies.len(),
            files = committed.files.len(),
            "opened pipeline database"
        );

        *state = State {
            location: Some(location),
            committed,
            transaction: None,
        };
        Ok(())
    }

    /// Closes the store. An open transaction is rolled back.
    pub fn close(&self) {
        let mut state = self.state.write();
        if state.transaction.is_some() {
            warn!("closing pipeline database with an open transaction; rolling back");
        }
        *state = State::default();
    }

    /// Returns `true` while the store is open.
    pub fn is_open(&self) -> bool {
        self.state.read().location.is_some()
    }

    /// Starts a transaction. Nested calls are counted; only the outermost
    /// [`end_transaction`](Self::end_transaction) commits.
    pub fn begin_transaction(&self) -> Result<(), DbError> {
        let mut state = self.state.write();
        state.location()?;
        match state.transaction.as_mut() {
            Some(tx) => tx.depth += 1,
            None => {
                state.transaction = Some(Transaction {
                    depth: 1,
                    pending: Pending::default(),
                })
            }
        }
        Ok(())
    }

    /// Ends a transaction, committing all staged writes when it is the
    /// outermost one. On a failed commit nothing is applied.
    pub fn end_transaction(&self) -> Result<(), DbError> {
        let mut state = self.state.write();
        let tx = state.transaction.as_mut().ok_or(DbError::NoTransaction)?;
        if tx.depth > 1 {
            tx.depth -= 1;
            return Ok(());
        }
        let Some(tx) = state.transaction.take() else {
            return Err(DbError::NoTransaction);
        };
        state.commit(tx.pending)
    }

    /// Discards every write staged since the outermost begin.
    pub fn rollback_transaction(&self) -> Result<(), DbError> {
        let mut state = self.state.write();
        state
            .transaction
            .take()
            .map(|_| ())
            .ok_or(DbError::NoTransaction)
    }

    /// Records the fingerprint of the last successful build of `guid`.
    pub fn set_dependency(&self, guid: Guid, hash: ContentHash) -> Result<(), DbError> {
        self.state.write().stage(|p| {
            p.dependencies.insert(guid, hash);
        })
    }

    /// Returns the fingerprint recorded for `guid`, if any.
    pub fn get_dependency(&self, guid: Guid) -> Result<Option<ContentHash>, DbError> {
        let state = self.state.read();
        state.location()?;
        let staged = state
            .transaction
            .as_ref()
            .and_then(|tx| tx.pending.dependencies.get(&guid));
        Ok(staged
            .or_else(|| state.committed.dependencies.get(&guid))
            .copied())
    }

    /// Records the last observed state of an external file.
    pub fn set_file(&self, path: &Path, file_hash: FileHash) -> Result<(), DbError> {
        let path = path.to_path_buf();
        self.state.write().stage(|p| {
            p.files.insert(path, file_hash);
        })
    }

    /// Returns the last observed state of `path`, if any.
    pub fn get_file(&self, path: &Path) -> Result<Option<FileHash>, DbError> {
        let state = self.state.read();
        state.location()?;
        let staged = state
            .transaction
            .as_ref()
            .and_then(|tx| tx.pending.files.get(path));
        Ok(staged.or_else(|| state.committed.files.get(path)).copied())
    }

    /// Opens a write-only report sink for one asset. The row is stored when
    /// the sink is dropped.
    pub fn create_report(&self, name: &str, guid: Guid) -> ReportSink<'_> {
        ReportSink::new(self, name, guid)
    }

    /// Returns the committed rows of a report, oldest first.
    ///
    /// Reports are consumed by external tooling; the build never reads them.
    pub fn reports(&self, name: &str) -> Result<Vec<ReportRow>, DbError> {
        let state = self.state.read();
        state.location()?;
        Ok(state.committed.reports.get(name).cloned().unwrap_or_default())
    }

    pub(crate) fn append_report(&self, name: String, row: ReportRow) -> Result<(), DbError> {
        self.state.write().stage(|p| p.reports.push((name, row)))
    }
}

fn read_snapshot(path: &Path) -> Result<Tables, DbError> {
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Tables::default()),
        Err(e) => {
            return Err(DbError::Io {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };
    let corrupt = |e: serde_json::Error| DbError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };
    let header: SnapshotHeader = serde_json::from_slice(&raw).map_err(corrupt)?;
    if header.format_version != DB_FORMAT_VERSION {
        warn!(
            path = %path.display(),
            found = header.format_version,
            expected = DB_FORMAT_VERSION,
            "discarding pipeline database written by another format version"
        );
        return Ok(Tables::default());
    }
    let snapshot: Snapshot = serde_json::from_slice(&raw).map_err(corrupt)?;
    Ok(snapshot.tables)
}

fn write_snapshot(path: &Path, tables: &Tables) -> Result<(), DbError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| DbError::Io { path, source }
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err(parent))?;
    }

    let snapshot = Snapshot {
        format_version: DB_FORMAT_VERSION,
        tables: tables.clone(),
    };
    let bytes = serde_json::to_vec(&snapshot).map_err(|e| DbError::Serialization {
        reason: e.to_string(),
    })?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    {
        let mut file = std::fs::File::create(&tmp).map_err(io_err(&tmp))?;
        file.write_all(&bytes).map_err(io_err(&tmp))?;
        file.sync_all().map_err(io_err(&tmp))?;
    }
    std::fs::rename(&tmp, path).map_err(io_err(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_db() -> PipelineDb {
        PipelineDb::open_with("memory:").unwrap()
    }

    fn file_hash(content: &[u8]) -> FileHash {
        FileHash {
            size: content.len() as u64,
            last_write_time: 1,
            content_hash: ContentHash::from_bytes(content),
        }
    }

    #[test]
    fn closed_db_rejects_access() {
        let db = PipelineDb::new();
        assert!(!db.is_open());
        assert!(matches!(
            db.get_dependency(Guid::from_u128(1)),
            Err(DbError::NotOpen)
        ));
        assert!(matches!(db.begin_transaction(), Err(DbError::NotOpen)));
    }

    #[test]
    fn open_twice_fails() {
        let db = memory_db();
        assert!(matches!(db.open("memory:"), Err(DbError::AlreadyOpen)));
    }

    #[test]
    fn set_and_get_dependency() {
        let db = memory_db();
        let guid = Guid::from_u128(1);
        assert_eq!(db.get_dependency(guid).unwrap(), None);
        let hash = ContentHash::from_bytes(b"h1");
        db.set_dependency(guid, hash).unwrap();
        assert_eq!(db.get_dependency(guid).unwrap(), Some(hash));
    }

    #[test]
    fn set_and_get_file() {
        let db = memory_db();
        let path = Path::new("textures/stone.png");
        let fh = file_hash(b"pixels");
        db.set_file(path, fh).unwrap();
        assert_eq!(db.get_file(path).unwrap(), Some(fh));
        assert_eq!(db.get_file(Path::new("other.png")).unwrap(), None);
    }

    #[test]
    fn transaction_reads_see_staged_writes() {
        let db = memory_db();
        let guid = Guid::from_u128(1);
        let hash = ContentHash::from_bytes(b"staged");
        db.begin_transaction().unwrap();
        db.set_dependency(guid, hash).unwrap();
        assert_eq!(db.get_dependency(guid).unwrap(), Some(hash));
        db.end_transaction().unwrap();
        assert_eq!(db.get_dependency(guid).unwrap(), Some(hash));
    }

    #[test]
    fn rollback_discards_staged_writes() {
        let db = memory_db();
        let guid = Guid::from_u128(1);
        db.begin_transaction().unwrap();
        db.set_dependency(guid, ContentHash::from_bytes(b"x")).unwrap();
        db.rollback_transaction().unwrap();
        assert_eq!(db.get_dependency(guid).unwrap(), None);
    }

    #[test]
    fn end_without_begin_fails() {
        let db = memory_db();
        assert!(matches!(db.end_transaction(), Err(DbError::NoTransaction)));
        assert!(matches!(
            db.rollback_transaction(),
            Err(DbError::NoTransaction)
        ));
    }

    #[test]
    fn nested_transactions_commit_at_outermost_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.db");
        let connection = format!("file:{}", path.display());
        let db = PipelineDb::open_with(&connection).unwrap();
        let guid = Guid::from_u128(9);

        db.begin_transaction().unwrap();
        db.begin_transaction().unwrap();
        db.set_dependency(guid, ContentHash::from_bytes(b"n")).unwrap();
        db.end_transaction().unwrap();
        assert!(!path.exists(), "inner end must not commit");
        db.end_transaction().unwrap();
        assert!(path.exists());
    }

    #[test]
    fn committed_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let connection = format!("file:{}", dir.path().join("db/pipeline.db").display());
        let guid = Guid::from_u128(1);
        let hash = ContentHash::from_bytes(b"persisted");
        let fh = file_hash(b"file");

        {
            let db = PipelineDb::open_with(&connection).unwrap();
            db.begin_transaction().unwrap();
            db.set_dependency(guid, hash).unwrap();
            db.set_file(Path::new("a.png"), fh).unwrap();
            db.end_transaction().unwrap();
            db.close();
        }

        let db = PipelineDb::open_with(&connection).unwrap();
        assert_eq!(db.get_dependency(guid).unwrap(), Some(hash));
        assert_eq!(db.get_file(Path::new("a.png")).unwrap(), Some(fh));
    }

    #[test]
    fn uncommitted_transaction_is_lost_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let connection = format!("file:{}", dir.path().join("pipeline.db").display());
        let guid = Guid::from_u128(1);

        {
            let db = PipelineDb::open_with(&connection).unwrap();
            db.set_dependency(guid, ContentHash::from_bytes(b"first")).unwrap();
            db.begin_transaction().unwrap();
            db.set_dependency(guid, ContentHash::from_bytes(b"second")).unwrap();
            db.close();
        }

        let db = PipelineDb::open_with(&connection).unwrap();
        assert_eq!(
            db.get_dependency(guid).unwrap(),
            Some(ContentHash::from_bytes(b"first"))
        );
    }

    #[test]
    fn corrupt_snapshot_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.db");
        std::fs::write(&path, b"{ not json").unwrap();
        let err = PipelineDb::open_with(&format!("file:{}", path.display())).unwrap_err();
        assert!(matches!(err, DbError::Corrupt { .. }));
    }

    #[test]
    fn other_format_version_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.db");
        std::fs::write(
            &path,
            br#"{"format_version":999,"tables":{"layout":"unknown"}}"#,
        )
        .unwrap();
        let db = PipelineDb::open_with(&format!("file:{}", path.display())).unwrap();
        assert_eq!(db.get_dependency(Guid::from_u128(1)).unwrap(), None);
    }

    #[test]
    fn no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.db");
        let db = PipelineDb::open_with(&format!("file:{}", path.display())).unwrap();
        db.set_dependency(Guid::from_u128(1), ContentHash::from_bytes(b"x"))
            .unwrap();
        assert!(path.exists());
        assert!(!dir.path().join("pipeline.db.tmp").exists());
    }

    #[test]
    fn concurrent_readers_and_writers() {
        use std::sync::Arc;
        use std::thread;

        let db = Arc::new(memory_db());
        db.begin_transaction().unwrap();
        let mut handles = Vec::new();
        for t in 0..8u128 {
            let db = Arc::clone(&db);
            handles.push(thread::spawn(move || {
                for i in 0..50u128 {
                    let guid = Guid::from_u128(t * 1000 + i);
                    db.set_dependency(guid, ContentHash::from_bytes(&guid.as_bytes()[..]))
                        .unwrap();
                    assert!(db.get_dependency(guid).unwrap().is_some());
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        db.end_transaction().unwrap();
        assert!(db.get_dependency(Guid::from_u128(7049)).unwrap().is_some());
    }
}
