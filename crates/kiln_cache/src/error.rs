//! Error types for cache operations.

use std::path::PathBuf;

/// Errors that can occur during cache operations.
///
/// Reads never surface these: a failed read is a miss. They are returned
/// from writes and removals, where the build reports them as warnings.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// An I/O error occurred while reading or writing cache files.
    #[error("cache I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {reason}")]
    Serialization {
        /// Description of the serialization failure.
        reason: String,
    },

    /// The remote cache could not be reached, even after reconnecting.
    #[error("cache server {addr} unavailable: {reason}")]
    Unavailable {
        /// The server address.
        addr: String,
        /// Description of the last failure.
        reason: String,
    },

    /// The cache server answered a request with an error.
    #[error("cache server {addr} rejected request: {message}")]
    Remote {
        /// The server address.
        addr: String,
        /// The message sent by the server.
        message: String,
    },

    /// The backend was configured without the requested access mode.
    #[error("cache does not allow {operation}")]
    AccessDenied {
        /// The refused operation, `read` or `write`.
        operation: &'static str,
    },

    /// An artifact exceeds the size accepted by the backend.
    #[error("artifact of {size} bytes exceeds the limit of {limit} bytes")]
    TooLarge {
        /// Size of the rejected artifact.
        size: u64,
        /// Largest accepted size.
        limit: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_display() {
        let err = CacheError::Io {
            path: PathBuf::from("/tmp/cache/ab/abcd.artifact"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
        };
        let msg = err.to_string();
        assert!(msg.contains("cache I/O error"));
        assert!(msg.contains("abcd.artifact"));
    }

    #[test]
    fn unavailable_display() {
        let err = CacheError::Unavailable {
            addr: "127.0.0.1:21813".to_string(),
            reason: "connection refused".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("127.0.0.1:21813"));
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn access_denied_display() {
        let err = CacheError::AccessDenied { operation: "write" };
        assert_eq!(err.to_string(), "cache does not allow write");
    }

    #[test]
    fn too_large_display() {
        let err = CacheError::TooLarge { size: 10, limit: 4 };
        let msg = err.to_string();
        assert!(msg.contains("10 bytes"));
        assert!(msg.contains("4 bytes"));
    }
}
