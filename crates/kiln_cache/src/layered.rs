//! An ordered stack of caches.

use std::io::Read;
use std::sync::Arc;

use kiln_common::{ContentHash, Guid};
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::traits::{BufferedCacheWriter, CacheWriter, PipelineCache};

/// Combines several caches, typically local in front of remote.
///
/// `get` returns the first hit in layer order. A committed write is stored in
/// every layer that accepts writes; it fails only when no layer stored it.
#[derive(Default)]
pub struct LayeredPipelineCache {
    layers: Vec<Arc<dyn PipelineCache>>,
}

impl LayeredPipelineCache {
    /// Creates an empty stack. An empty stack misses every read and discards
    /// every write.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a layer behind the existing ones.
    pub fn push(&mut self, layer: Arc<dyn PipelineCache>) {
        self.layers.push(layer);
    }

    /// Returns the number of layers.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Returns `true` when no layer is configured.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    fn store_all(&self, guid: Guid, hash: ContentHash, payload: &[u8]) -> Result<(), CacheError> {
        use std::io::Write;

        let mut stored = 0;
        let mut first_err = None;
        for (index, layer) in self.layers.iter().enumerate() {
            let result = layer.put(guid, hash).and_then(|mut writer| {
                writer.write_all(payload).map_err(|e| CacheError::Serialization {
                    reason: e.to_string(),
                })?;
                writer.commit()
            });
            match result {
                Ok(()) => stored += 1,
                Err(CacheError::AccessDenied { .. }) => {
                    debug!(layer = index, "skipping read-only cache layer");
                }
                Err(e) => {
                    warn!(layer = index, guid = %guid, error = %e, "cache layer write failed");
                    first_err.get_or_insert(e);
                }
            }
        }

        match first_err {
            Some(e) if stored == 0 => Err(e),
            _ => Ok(()),
        }
    }
}

impl PipelineCache for LayeredPipelineCache {
    fn get(&self, guid: Guid, hash: ContentHash) -> Option<Box<dyn Read + Send>> {
        self.layers.iter().find_map(|layer| layer.get(guid, hash))
    }

    fn put(
        &self,
        guid: Guid,
        hash: ContentHash,
    ) -> Result<Box<dyn CacheWriter + '_>, CacheError> {
        Ok(Box::new(BufferedCacheWriter::new(move |payload| {
            self.store_all(guid, hash, &payload)
        })))
    }

    fn remove(&self, guid: Guid, hash: ContentHash) -> Result<bool, CacheError> {
        let mut removed = false;
        for layer in &self.layers {
            match layer.remove(guid, hash) {
                Ok(r) => removed |= r,
                Err(CacheError::AccessDenied { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(removed)
    }

    fn contains(&self, guid: Guid, hash: ContentHash) -> bool {
        self.layers.iter().any(|layer| layer.contains(guid, hash))
    }
}
