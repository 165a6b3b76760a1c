//! Cache keys.

use std::fmt;

use kiln_common::{ContentHash, Guid};

/// Identifies one artifact: the asset GUID plus the dependency fingerprint it
/// was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    /// The asset the artifact belongs to.
    pub guid: Guid,
    /// The fingerprint the artifact was built from.
    pub hash: ContentHash,
}

impl CacheKey {
    /// Size of the encoded key on disk and on the wire.
    pub const ENCODED_LEN: usize = 32;

    /// Creates a key.
    pub fn new(guid: Guid, hash: ContentHash) -> Self {
        Self { guid, hash }
    }

    /// Encodes the key as GUID bytes followed by hash bytes.
    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[..16].copy_from_slice(self.guid.as_bytes());
        out[16..].copy_from_slice(self.hash.as_bytes());
        out
    }

    /// Decodes a key produced by [`encode`](Self::encode).
    pub fn decode(bytes: &[u8; Self::ENCODED_LEN]) -> Self {
        let mut guid = [0u8; 16];
        let mut hash = [0u8; 16];
        guid.copy_from_slice(&bytes[..16]);
        hash.copy_from_slice(&bytes[16..]);
        Self {
            guid: Guid::from_bytes(guid),
            hash: ContentHash::from_raw(hash),
        }
    }

    /// Lowercase hex of the encoded key, used as a file stem.
    pub fn to_hex(&self) -> String {
        self.encode().iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Parses a file stem produced by [`to_hex`](Self::to_hex).
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != Self::ENCODED_LEN * 2 || !hex.is_ascii() {
            return None;
        }
        let mut bytes = [0u8; Self::ENCODED_LEN];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(Self::decode(&bytes))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.guid, self.hash)
    }
}
