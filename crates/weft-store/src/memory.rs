use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;
use weft_types::ContentId;

use crate::error::StoreResult;
use crate::traits::Storage;

/// In-memory, HashMap-based block store.
///
/// Intended for tests and embedding. Blocks are held behind a `RwLock`;
/// [`Bytes`] clones are reference-counted so reads never copy block data.
pub struct MemoryStorage {
    blocks: RwLock<HashMap<ContentId, Bytes>>,
}

impl MemoryStorage {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            blocks: RwLock::new(HashMap::new()),
        }
    }

    /// Number of blocks currently stored.
    pub fn len(&self) -> usize {
        self.blocks.read().expect("lock poisoned").len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.blocks.read().expect("lock poisoned").is_empty()
    }

    /// Return a sorted list of all block IDs in the store.
    pub fn all_ids(&self) -> Vec<ContentId> {
        let map = self.blocks.read().expect("lock poisoned");
        let mut ids: Vec<ContentId> = map.keys().copied().collect();
        ids.sort();
        ids
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn put(&self, id: &ContentId, data: Bytes) -> StoreResult<()> {
        let mut map = self.blocks.write().expect("lock poisoned");
        map.entry(*id).or_insert(data);
        Ok(())
    }

    async fn get(&self, id: &ContentId) -> StoreResult<Option<Bytes>> {
        Ok(self.blocks.read().expect("lock poisoned").get(id).cloned())
    }

    async fn contains(&self, id: &ContentId) -> StoreResult<bool> {
        Ok(self.blocks.read().expect("lock poisoned").contains_key(id))
    }

    async fn delete(&self, id: &ContentId) -> StoreResult<()> {
        self.blocks.write().expect("lock poisoned").remove(id);
        Ok(())
    }

    async fn clear(&self) -> StoreResult<()> {
        self.blocks.write().expect("lock poisoned").clear();
        Ok(())
    }
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("block_count", &self.len())
            .finish()
    }
}
