//! Write-only diagnostic sinks for per-asset build statistics.

use std::collections::BTreeMap;
use std::fmt::Display;

use kiln_common::Guid;
use tracing::debug;

use crate::db::PipelineDb;
use crate::record::ReportRow;

/// Collects statistics for one asset and stores them as a report row when
/// dropped. Storage failures are logged and otherwise ignored: reports never
/// affect a build.
pub struct ReportSink<'a> {
    db: &'a PipelineDb,
    name: String,
    row: ReportRow,
}

impl<'a> ReportSink<'a> {
    pub(crate) fn new(db: &'a PipelineDb, name: &str, guid: Guid) -> Self {
        Self {
            db,
            name: name.to_string(),
            row: ReportRow {
                guid,
                values: BTreeMap::new(),
            },
        }
    }

    /// Sets a statistic, replacing an earlier value for the same key.
    pub fn set(&mut self, key: &str, value: impl Display) -> &mut Self {
        self.row.values.insert(key.to_string(), value.to_string());
        self
    }
}

impl Drop for ReportSink<'_> {
    fn drop(&mut self) {
        let row = std::mem::replace(
            &mut self.row,
            ReportRow {
                guid: Guid::NULL,
                values: BTreeMap::new(),
            },
        );
        let name = std::mem::take(&mut self.name);
        if let Err(e) = self.db.append_report(name, row) {
            debug!(error = %e, "dropping report row");
        }
    }
}
