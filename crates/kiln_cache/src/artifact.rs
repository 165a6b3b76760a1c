//! The on-disk artifact envelope.
//!
//! Every locally cached artifact is stored as a 4-byte little-endian header
//! length, a bincode-encoded [`ArtifactHeader`], and the payload. The header
//! carries magic bytes, the format version and a checksum of the payload, so
//! truncated or foreign files are detected on read and treated as a miss.

use kiln_common::ContentHash;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Magic bytes identifying a Kiln cache artifact.
const ARTIFACT_MAGIC: [u8; 4] = *b"KILN";

/// Current artifact format version. Increment on breaking changes to
/// the header or payload format.
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// Header prepended to every cached artifact for validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactHeader {
    /// Magic bytes: must be `b"KILN"`.
    pub magic: [u8; 4],

    /// Artifact format version.
    pub format_version: u32,

    /// Payload length in bytes.
    pub payload_len: u64,

    /// Content hash of the payload data (for integrity checks).
    pub checksum: ContentHash,
}

impl ArtifactHeader {
    /// Builds the header describing `payload`.
    pub fn for_payload(payload: &[u8]) -> Self {
        Self {
            magic: ARTIFACT_MAGIC,
            format_version: ARTIFACT_FORMAT_VERSION,
            payload_len: payload.len() as u64,
            checksum: ContentHash::from_bytes(payload),
        }
    }
}

/// Wraps `payload` in the artifact envelope.
pub fn encode_artifact(payload: &[u8]) -> Result<Vec<u8>, CacheError> {
    encode_with_header(&ArtifactHeader::for_payload(payload), payload)
}

fn encode_with_header(header: &ArtifactHeader, payload: &[u8]) -> Result<Vec<u8>, CacheError> {
    let header_bytes = bincode::serde::encode_to_vec(header, bincode::config::standard())
        .map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;

    let header_len = header_bytes.len() as u32;
    let mut output = Vec::with_capacity(4 + header_bytes.len() + payload.len());
    output.extend_from_slice(&header_len.to_le_bytes());
    output.extend_from_slice(&header_bytes);
    output.extend_from_slice(payload);
    Ok(output)
}

/// Validates the envelope and returns the payload.
///
/// Returns `None` if the data is truncated, the magic or format version
/// doesn't match, or the checksum doesn't verify.
pub fn decode_artifact(raw: &[u8]) -> Option<&[u8]> {
    if raw.len() < 4 {
        return None;
    }

    let header_len = u32::from_le_bytes(raw[..4].try_into().ok()?) as usize;
    let body = raw.get(4..)?;
    if body.len() < header_len {
        return None;
    }

    let (header, _): (ArtifactHeader, usize) =
        bincode::serde::decode_from_slice(&body[..header_len], bincode::config::standard()).ok()?;

    if header.magic != ARTIFACT_MAGIC || header.format_version != ARTIFACT_FORMAT_VERSION {
        return None;
    }

    let payload = &body[header_len..];
    if payload.len() as u64 != header.payload_len {
        return None;
    }
    if ContentHash::from_bytes(payload) != header.checksum {
        return None;
    }

    Some(payload)
}
