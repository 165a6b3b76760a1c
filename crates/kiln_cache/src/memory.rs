//! In-process artifact store with a byte budget.

use std::io::{Cursor, Read};
use std::sync::Arc;

use kiln_common::{ContentHash, Guid};
use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::CacheError;
use crate::key::CacheKey;
use crate::traits::{BufferedCacheWriter, CacheWriter, PipelineCache};

struct Entries {
    lru: LruCache<CacheKey, Arc<[u8]>>,
    bytes: usize,
}

/// Keeps artifacts in memory, evicting the least recently used entries once
/// the total payload size exceeds the configured capacity.
///
/// This is also the storage engine behind [`CacheServer`](crate::CacheServer).
pub struct MemoryPipelineCache {
    entries: Mutex<Entries>,
    capacity: usize,
}

impl MemoryPipelineCache {
    /// Creates a store holding at most `capacity` payload bytes.
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "creating memory pipeline cache");
        Self {
            entries: Mutex::new(Entries {
                lru: LruCache::unbounded(),
                bytes: 0,
            }),
            capacity,
        }
    }

    /// Returns the byte budget.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.lock().lru.len()
    }

    /// Returns `true` when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the total payload size currently stored.
    pub fn total_bytes(&self) -> usize {
        self.entries.lock().bytes
    }

    /// Looks up an entry and marks it as recently used.
    pub fn get_entry(&self, key: &CacheKey) -> Option<Arc<[u8]>> {
        self.entries.lock().lru.get(key).cloned()
    }

    /// Stores an entry, evicting older ones to stay within the budget.
    pub fn insert_entry(&self, key: CacheKey, payload: Vec<u8>) -> Result<(), CacheError> {
        if payload.len() > self.capacity {
            return Err(CacheError::TooLarge {
                size: payload.len() as u64,
                limit: self.capacity as u64,
            });
        }

        let mut entries = self.entries.lock();
        let size = payload.len();
        if let Some(old) = entries.lru.put(key, Arc::from(payload)) {
            entries.bytes -= old.len();
        }
        entries.bytes += size;

        while entries.bytes > self.capacity {
            match entries.lru.pop_lru() {
                Some((evicted, data)) => {
                    entries.bytes -= data.len();
                    debug!(key = %evicted, bytes = data.len(), "evicted artifact");
                }
                None => break,
            }
        }
        Ok(())
    }

    /// Removes an entry. Returns whether it existed.
    pub fn remove_entry(&self, key: &CacheKey) -> bool {
        let mut entries = self.entries.lock();
        match entries.lru.pop(key) {
            Some(data) => {
                entries.bytes -= data.len();
                true
            }
            None => false,
        }
    }
}

impl PipelineCache for MemoryPipelineCache {
    fn get(&self, guid: Guid, hash: ContentHash) -> Option<Box<dyn Read + Send>> {
        let data = self.get_entry(&CacheKey::new(guid, hash))?;
        Some(Box::new(Cursor::new(data)))
    }

    fn put(
        &self,
        guid: Guid,
        hash: ContentHash,
    ) -> Result<Box<dyn CacheWriter + '_>, CacheError> {
        let key = CacheKey::new(guid, hash);
        Ok(Box::new(BufferedCacheWriter::new(move |payload| {
            self.insert_entry(key, payload)
        })))
    }

    fn remove(&self, guid: Guid, hash: ContentHash) -> Result<bool, CacheError> {
        Ok(self.remove_entry(&CacheKey::new(guid, hash)))
    }

    fn contains(&self, guid: Guid, hash: ContentHash) -> bool {
        self.entries
            .lock()
            .lru
            .contains(&CacheKey::new(guid, hash))
    }
}
