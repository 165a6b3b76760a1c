//! Record types stored in the pipeline database.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use kiln_common::{ContentHash, Guid};
use serde::{Deserialize, Serialize};

/// Last observed state of an external source file.
///
/// Size and modification time only short-circuit rehashing; the content hash
/// is what feeds fingerprints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHash {
    /// File size in bytes.
    pub size: u64,
    /// Last write time, nanoseconds since the Unix epoch.
    pub last_write_time: u64,
    /// XXH3-128 of the file content.
    pub content_hash: ContentHash,
}

impl FileHash {
    /// Returns `true` if size and write time match, meaning the content hash
    /// can be reused without reading the file.
    pub fn matches_metadata(&self, size: u64, last_write_time: u64) -> bool {
        self.size == size && self.last_write_time == last_write_time
    }

    /// Converts a filesystem timestamp to the stored representation.
    ///
    /// Times before the epoch clamp to zero.
    pub fn timestamp(time: SystemTime) -> u64 {
        time.duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
    }
}

/// One row of a build report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRow {
    /// The asset the row describes.
    pub guid: Guid,
    /// Free-form statistics.
    pub values: BTreeMap<String, String>,
}
