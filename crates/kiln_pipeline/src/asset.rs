//! Source assets and where they come from.

use std::collections::HashMap;

use kiln_common::Guid;
use parking_lot::RwLock;

/// One authored asset as stored in the source database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceAsset {
    /// Stable identity.
    pub guid: Guid,
    /// Type id selecting the pipeline.
    pub asset_type: String,
    /// The asset's own serialization. Opaque to the build system.
    pub payload: Vec<u8>,
    /// The document this asset was instantiated from, if any.
    pub source_instance: Option<Guid>,
}

impl SourceAsset {
    /// Creates an asset with no originating document.
    pub fn new(guid: Guid, asset_type: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            guid,
            asset_type: asset_type.into(),
            payload: payload.into(),
            source_instance: None,
        }
    }
}

/// How a node depends on another asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyKind {
    /// Must be built, or confirmed up to date, before the dependent. Its
    /// fingerprint feeds the dependent's fingerprint.
    Hard,
    /// Referential only. Built as part of the walk but without ordering
    /// constraints; only its GUID feeds the dependent's fingerprint.
    Soft,
}

/// Supplies source assets by GUID.
pub trait SourceDatabase: Send + Sync {
    /// Returns the asset, or `None` if no asset has this GUID.
    fn source(&self, guid: Guid) -> Option<SourceAsset>;
}

/// An in-process [`SourceDatabase`].
#[derive(Default)]
pub struct MemorySourceDatabase {
    assets: RwLock<HashMap<Guid, SourceAsset>>,
}

impl MemorySourceDatabase {
    /// Creates an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an asset.
    pub fn insert(&self, asset: SourceAsset) {
        self.assets.write().insert(asset.guid, asset);
    }

    /// Removes an asset, returning it if present.
    pub fn remove(&self, guid: Guid) -> Option<SourceAsset> {
        self.assets.write().remove(&guid)
    }

    /// Returns the number of assets.
    pub fn len(&self) -> usize {
        self.assets.read().len()
    }

    /// Returns `true` if the database holds no assets.
    pub fn is_empty(&self) -> bool {
        self.assets.read().is_empty()
    }

    /// Returns all GUIDs in ascending order.
    pub fn guids(&self) -> Vec<Guid> {
        let mut guids: Vec<Guid> = self.assets.read().keys().copied().collect();
        guids.sort();
        guids
    }
}

impl SourceDatabase for MemorySourceDatabase {
    fn source(&self, guid: Guid) -> Option<SourceAsset> {
        self.assets.read().get(&guid).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_replace_remove() {
        let db = MemorySourceDatabase::new();
        let guid = Guid::from_u128(1);
        db.insert(SourceAsset::new(guid, "mesh", b"v1".to_vec()));
        db.insert(SourceAsset::new(guid, "mesh", b"v2".to_vec()));
        assert_eq!(db.len(), 1);
        assert_eq!(db.source(guid).unwrap().payload, b"v2");
        assert!(db.remove(guid).is_some());
        assert!(db.source(guid).is_none());
        assert!(db.is_empty());
    }

    #[test]
    fn guids_are_sorted() {
        let db = MemorySourceDatabase::new();
        for n in [3u128, 1, 2] {
            db.insert(SourceAsset::new(Guid::from_u128(n), "t", Vec::new()));
        }
        assert_eq!(
            db.guids(),
            vec![Guid::from_u128(1), Guid::from_u128(2), Guid::from_u128(3)]
        );
    }
}
