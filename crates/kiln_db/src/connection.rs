//! Database connection descriptors.

use std::path::PathBuf;
use std::str::FromStr;

use crate::error::DbError;

/// Where a [`PipelineDb`](crate::PipelineDb) keeps its tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbLocation {
    /// Process memory only; nothing survives `close`.
    Memory,
    /// A snapshot file replaced atomically on every commit.
    File(PathBuf),
}

impl FromStr for DbLocation {
    type Err = DbError;

    /// Accepts `memory:`, `file:<path>` or a bare path.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "" | "file:" => Err(DbError::InvalidConnection {
                connection: s.to_string(),
            }),
            "memory:" | ":memory:" => Ok(Self::Memory),
            _ => {
                let path = s.strip_prefix("file:").unwrap_or(s);
                Ok(Self::File(PathBuf::from(path)))
            }
        }
    }
}
