//! Error types for pipeline database operations.

use std::path::PathBuf;

/// Storage-layer errors raised by [`PipelineDb`](crate::PipelineDb).
///
/// Callers in the build path treat any of these on a lookup as "unknown" and
/// force a rebuild; they are never fatal to a build.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// The database has not been opened, or was closed.
    #[error("pipeline database is not open")]
    NotOpen,

    /// `open` was called on a database that is already open.
    #[error("pipeline database is already open")]
    AlreadyOpen,

    /// The connection descriptor could not be understood.
    #[error("invalid database connection '{connection}'")]
    InvalidConnection {
        /// The rejected descriptor.
        connection: String,
    },

    /// An I/O error occurred while reading or writing the snapshot.
    #[error("database I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The snapshot exists but could not be decoded.
    #[error("corrupt pipeline database {path}: {reason}")]
    Corrupt {
        /// The snapshot path.
        path: PathBuf,
        /// Description of the decode failure.
        reason: String,
    },

    /// The tables could not be serialized.
    #[error("serialization error: {reason}")]
    Serialization {
        /// Description of the serialization failure.
        reason: String,
    },

    /// `end_transaction` or `rollback_transaction` without a matching begin.
    #[error("no transaction in progress")]
    NoTransaction,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_display() {
        let err = DbError::Io {
            path: PathBuf::from("/tmp/kiln/pipeline.db"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let msg = err.to_string();
        assert!(msg.contains("database I/O error"));
        assert!(msg.contains("pipeline.db"));
    }

    #[test]
    fn corrupt_display() {
        let err = DbError::Corrupt {
            path: PathBuf::from("pipeline.db"),
            reason: "expected value at line 1".to_string(),
        };
        assert!(err.to_string().contains("expected value at line 1"));
    }

    #[test]
    fn invalid_connection_display() {
        let err = DbError::InvalidConnection {
            connection: String::new(),
        };
        assert_eq!(err.to_string(), "invalid database connection ''");
    }
}
