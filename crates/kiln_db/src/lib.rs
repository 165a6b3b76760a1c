//! Persistent pipeline records.
//!
//! [`PipelineDb`] remembers, per asset GUID, the dependency fingerprint of the
//! last successful build and, per external file, the size/mtime/content hash
//! observed last time. The graph builder compares against these records to
//! decide whether a node needs rebuilding. Writes are transactional: a commit
//! replaces the on-disk snapshot atomically.

#![warn(missing_docs)]

pub mod connection;
pub mod db;
pub mod error;
pub mod record;
pub mod report;

pub use connection::DbLocation;
pub use db::PipelineDb;
pub use error::DbError;
pub use record::{FileHash, ReportRow};
pub use report::ReportSink;
