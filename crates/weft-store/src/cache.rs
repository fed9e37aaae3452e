use std::num::NonZeroUsize;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use tracing::trace;
use weft_types::ContentId;

use crate::error::StoreResult;
use crate::traits::Storage;

/// Bounded in-memory block cache.
///
/// Holds at most `capacity` blocks; inserting past capacity evicts the least
/// recently used block. Reads refresh recency.
pub struct LruStorage {
    cache: Mutex<LruCache<ContentId, Bytes>>,
}

impl LruStorage {
    /// Create a cache holding at most `capacity` blocks (minimum one).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Maximum number of blocks held.
    pub fn capacity(&self) -> usize {
        self.cache.lock().expect("lock poisoned").cap().get()
    }

    /// Number of blocks currently cached.
    pub fn len(&self) -> usize {
        self.cache.lock().expect("lock poisoned").len()
    }

    /// Returns `true` if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Storage for LruStorage {
    async fn put(&self, id: &ContentId, data: Bytes) -> StoreResult<()> {
        let mut cache = self.cache.lock().expect("lock poisoned");
        if let Some((evicted, _)) = cache.push(*id, data) {
            if evicted != *id {
                trace!(evicted = %evicted.short_hex(), "lru evicted block");
            }
        }
        Ok(())
    }

    async fn get(&self, id: &ContentId) -> StoreResult<Option<Bytes>> {
        Ok(self.cache.lock().expect("lock poisoned").get(id).cloned())
    }

    async fn contains(&self, id: &ContentId) -> StoreResult<bool> {
        Ok(self.cache.lock().expect("lock poisoned").contains(id))
    }

    async fn delete(&self, id: &ContentId) -> StoreResult<()> {
        self.cache.lock().expect("lock poisoned").pop(id);
        Ok(())
    }

    async fn clear(&self) -> StoreResult<()> {
        self.cache.lock().expect("lock poisoned").clear();
        Ok(())
    }
}

impl std::fmt::Debug for LruStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cache = self.cache.lock().expect("lock poisoned");
        f.debug_struct("LruStorage")
            .field("len", &cache.len())
            .field("capacity", &cache.cap())
            .finish()
    }
}
