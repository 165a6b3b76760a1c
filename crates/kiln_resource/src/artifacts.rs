//! Reading built artifacts back at runtime.

use std::io::Read;
use std::sync::Arc;

use kiln_cache::PipelineCache;
use kiln_common::{ContentHash, Guid};
use kiln_db::PipelineDb;
use tracing::debug;

use crate::error::ResourceError;

/// Locates the latest artifact of an asset through the pipeline database
/// and reads it from a cache.
///
/// Factories typically hold one of these and decode the bytes into their
/// resource type.
#[derive(Clone)]
pub struct BuiltArtifacts {
    db: Arc<PipelineDb>,
    cache: Arc<dyn PipelineCache>,
}

impl BuiltArtifacts {
    /// Creates a reader over `db` and `cache`.
    pub fn new(db: Arc<PipelineDb>, cache: Arc<dyn PipelineCache>) -> Self {
        Self { db, cache }
    }

    /// Returns the fingerprint of the last successful build of `guid`.
    pub fn hash(&self, guid: Guid) -> Result<ContentHash, ResourceError> {
        self.db
            .get_dependency(guid)
            .map_err(|e| ResourceError::Storage {
                guid,
                reason: e.to_string(),
            })?
            .ok_or(ResourceError::NotBuilt { guid })
    }

    /// Reads the artifact of the last successful build of `guid`.
    pub fn read(&self, guid: Guid) -> Result<Vec<u8>, ResourceError> {
        let hash = self.hash(guid)?;
        let mut reader = self
            .cache
            .get(guid, hash)
            .ok_or(ResourceError::ArtifactMissing { guid, hash })?;
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .map_err(|e| ResourceError::Storage {
                guid,
                reason: e.to_string(),
            })?;
        debug!(guid = %guid, hash = %hash, bytes = bytes.len(), "read artifact");
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::ResourceFactory;
    use crate::manager::ResourceManager;
    use crate::resource::{Resource, ResourceObject, ResourceType};
    use kiln_cache::{LocalPipelineCache, MemoryPipelineCache};
    use std::io::Write;

    fn store(cache: &dyn PipelineCache, db: &PipelineDb, guid: Guid, bytes: &[u8]) {
        let hash = ContentHash::from_bytes(bytes);
        let mut writer = cache.put(guid, hash).unwrap();
        writer.write_all(bytes).unwrap();
        writer.commit().unwrap();
        db.set_dependency(guid, hash).unwrap();
    }

    #[test]
    fn reads_latest_artifact() {
        let db = Arc::new(PipelineDb::open_with("memory:").unwrap());
        let cache = Arc::new(MemoryPipelineCache::new(1 << 16));
        let artifacts = BuiltArtifacts::new(db.clone(), cache.clone());
        let guid = Guid::from_u128(1);

        assert_eq!(
            artifacts.read(guid).unwrap_err(),
            ResourceError::NotBuilt { guid }
        );

        store(cache.as_ref(), &db, guid, b"v1");
        store(cache.as_ref(), &db, guid, b"v2");
        assert_eq!(artifacts.read(guid).unwrap(), b"v2");
        assert_eq!(artifacts.hash(guid).unwrap(), ContentHash::from_bytes(b"v2"));
    }

    #[test]
    fn evicted_artifact_is_reported() {
        let db = Arc::new(PipelineDb::open_with("memory:").unwrap());
        let cache = Arc::new(MemoryPipelineCache::new(1 << 16));
        let guid = Guid::from_u128(2);
        store(cache.as_ref(), &db, guid, b"payload");
        let hash = ContentHash::from_bytes(b"payload");
        cache.remove(guid, hash).unwrap();

        let artifacts = BuiltArtifacts::new(db, cache);
        assert_eq!(
            artifacts.read(guid).unwrap_err(),
            ResourceError::ArtifactMissing { guid, hash }
        );
    }

    #[test]
    fn closed_database_is_a_storage_error() {
        let db = Arc::new(PipelineDb::new());
        let cache = Arc::new(MemoryPipelineCache::new(1 << 16));
        let artifacts = BuiltArtifacts::new(db, cache);
        assert!(matches!(
            artifacts.read(Guid::from_u128(3)),
            Err(ResourceError::Storage { .. })
        ));
    }

    #[derive(Debug)]
    struct Utf8Text(String);
    impl Resource for Utf8Text {
        const TYPE_NAME: &'static str = "utf8";
    }

    struct Utf8Factory(BuiltArtifacts);

    impl ResourceFactory for Utf8Factory {
        fn resource_types(&self) -> Vec<ResourceType> {
            vec![ResourceType::of::<Utf8Text>()]
        }

        fn create(
            &self,
            _manager: &Arc<ResourceManager>,
            _resource_type: ResourceType,
            guid: Guid,
            _current: Option<&ResourceObject>,
        ) -> Result<ResourceObject, ResourceError> {
            let bytes = self.0.read(guid)?;
            let text =
                String::from_utf8(bytes).map_err(|e| ResourceError::factory(guid, e.to_string()))?;
            Ok(Arc::new(Utf8Text(text)))
        }
    }

    #[test]
    fn factory_loads_rebuilt_artifact_after_event() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(PipelineDb::open_with("memory:").unwrap());
        let cache = Arc::new(LocalPipelineCache::new(dir.path()));
        let guid = Guid::from_u128(4);
        store(cache.as_ref(), &db, guid, b"hello");

        let manager = ResourceManager::new();
        manager.register_factory(Arc::new(Utf8Factory(BuiltArtifacts::new(
            db.clone(),
            cache.clone(),
        ))));
        let proxy = manager.bind::<Utf8Text>(guid);
        let first = proxy.get().unwrap();
        assert_eq!(first.0, "hello");

        store(cache.as_ref(), &db, guid, b"hello again");
        manager
            .event_sender()
            .send(crate::manager::DatabaseEvent { guid })
            .unwrap();
        manager.process_events();

        assert_eq!(proxy.get().unwrap().0, "hello again");
        assert_eq!(first.0, "hello");
    }
}
