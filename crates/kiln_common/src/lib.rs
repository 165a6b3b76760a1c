//! Shared foundational types used across the Kiln asset pipeline.
//!
//! This crate provides the two identities everything else is keyed by: the
//! stable asset [`Guid`] and the [`ContentHash`] fingerprint.

#![warn(missing_docs)]

pub mod guid;
pub mod hash;

pub use guid::{Guid, GuidParseError};
pub use hash::{ContentHash, ContentHasher};
