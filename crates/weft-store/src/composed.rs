//! Read-through layering of storages.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use weft_types::ContentId;

use crate::error::StoreResult;
use crate::traits::Storage;

/// Layered storage: reads fall through the layers in order, writes go to all.
///
/// A block found in a later layer is copied into every earlier layer in the
/// background, so the next read of it is served from the fastest layer. The
/// read itself never waits for that copy.
pub struct ComposedStorage {
    layers: Vec<Arc<dyn Storage>>,
    backfills: Mutex<Vec<JoinHandle<()>>>,
}

impl ComposedStorage {
    /// Compose `layers`, fastest first.
    pub fn new(layers: Vec<Arc<dyn Storage>>) -> Self {
        Self {
            layers,
            backfills: Mutex::new(Vec::new()),
        }
    }

    /// Number of layers.
    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    /// Wait for every outstanding background backfill to finish.
    pub async fn settle(&self) {
        let handles: Vec<_> = std::mem::take(&mut *self.backfills.lock().expect("lock poisoned"));
        for handle in handles {
            let _ = handle.await;
        }
    }

    fn backfill(&self, id: ContentId, data: Bytes, upto: usize) {
        if upto == 0 {
            return;
        }
        let targets: Vec<Arc<dyn Storage>> = self.layers[..upto].to_vec();
        let handle = tokio::spawn(async move {
            for layer in targets {
                if let Err(e) = layer.put(&id, data.clone()).await {
                    warn!(id = %id.short_hex(), error = %e, "backfill failed");
                }
            }
        });

        let mut backfills = self.backfills.lock().expect("lock poisoned");
        backfills.retain(|h| !h.is_finished());
        backfills.push(handle);
    }
}

#[async_trait]
impl Storage for ComposedStorage {
    async fn put(&self, id: &ContentId, data: Bytes) -> StoreResult<()> {
        for layer in &self.layers {
            layer.put(id, data.clone()).await?;
        }
        Ok(())
    }

    async fn get(&self, id: &ContentId) -> StoreResult<Option<Bytes>> {
        for (depth, layer) in self.layers.iter().enumerate() {
            if let Some(data) = layer.get(id).await? {
                if depth > 0 {
                    debug!(id = %id.short_hex(), depth, "block served by lower layer");
                    self.backfill(*id, data.clone(), depth);
                }
                return Ok(Some(data));
            }
        }
        Ok(None)
    }

    async fn contains(&self, id: &ContentId) -> StoreResult<bool> {
        for layer in &self.layers {
            if layer.contains(id).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn delete(&self, id: &ContentId) -> StoreResult<()> {
        for layer in &self.layers {
            layer.delete(id).await?;
        }
        Ok(())
    }

    async fn clear(&self) -> StoreResult<()> {
        for layer in &self.layers {
            layer.clear().await?;
        }
        Ok(())
    }
}

impl Drop for ComposedStorage {
    fn drop(&mut self) {
        if let Ok(backfills) = self.backfills.get_mut() {
            for handle in backfills.drain(..) {
                handle.abort();
            }
        }
    }
}

impl std::fmt::Debug for ComposedStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComposedStorage")
            .field("depth", &self.layers.len())
            .finish()
    }
}
