use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::watch;
use tracing::{debug, warn};
use weft_types::ContentId;

use crate::error::{StoreError, StoreResult};
use crate::traits::{BlockService, Storage};

/// Default deadline for a single remote fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Storage layer backed by a content-addressed network.
///
/// Reads suspend on the [`BlockService`] until the block arrives or the
/// timeout elapses, in which case the read fails with
/// [`StoreError::FetchTimeout`]. Dropping the returned future cancels the
/// fetch.
pub struct RemoteStorage {
    service: Arc<dyn BlockService>,
    timeout: Duration,
    pin: bool,
}

impl RemoteStorage {
    /// Wrap a block service with the default timeout and pinning enabled.
    pub fn new(service: Arc<dyn BlockService>) -> Self {
        Self {
            service,
            timeout: DEFAULT_FETCH_TIMEOUT,
            pin: true,
        }
    }

    /// Set the per-fetch deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set whether written blocks are pinned.
    pub fn with_pin(mut self, pin: bool) -> Self {
        self.pin = pin;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl Storage for RemoteStorage {
    async fn put(&self, id: &ContentId, data: Bytes) -> StoreResult<()> {
        self.service.put_block(id, data, self.pin).await
    }

    async fn get(&self, id: &ContentId) -> StoreResult<Option<Bytes>> {
        match tokio::time::timeout(self.timeout, self.service.get_block(id)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(id = %id.short_hex(), timeout_ms = self.timeout.as_millis() as u64, "remote fetch timed out");
                Err(StoreError::FetchTimeout {
                    id: *id,
                    timeout: self.timeout,
                })
            }
        }
    }

    async fn contains(&self, id: &ContentId) -> StoreResult<bool> {
        self.service.has_block(id).await
    }

    async fn delete(&self, id: &ContentId) -> StoreResult<()> {
        self.service.remove_block(id).await
    }

    async fn clear(&self) -> StoreResult<()> {
        // Blocks already provided to the network cannot be recalled.
        debug!("clear is a no-op for remote storage");
        Ok(())
    }
}

impl std::fmt::Debug for RemoteStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStorage")
            .field("timeout", &self.timeout)
            .field("pin", &self.pin)
            .finish()
    }
}

/// In-process content-addressed block network.
///
/// Shared by several replicas (via `Arc`) it behaves like a block exchange:
/// `get_block` waits until some participant provides the block. It can be
/// switched offline to simulate a partitioned network.
pub struct MemoryBlockService {
    blocks: RwLock<HashMap<ContentId, Bytes>>,
    pinned: RwLock<HashSet<ContentId>>,
    version: watch::Sender<u64>,
    wait_for_providers: bool,
    offline: AtomicBool,
    fetches: AtomicU64,
}

impl MemoryBlockService {
    /// A network where fetches wait for a provider.
    pub fn new() -> Self {
        Self::build(true)
    }

    /// A network where fetching a missing block returns `None` immediately.
    pub fn non_blocking() -> Self {
        Self::build(false)
    }

    fn build(wait_for_providers: bool) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            blocks: RwLock::new(HashMap::new()),
            pinned: RwLock::new(HashSet::new()),
            version,
            wait_for_providers,
            offline: AtomicBool::new(false),
            fetches: AtomicU64::new(0),
        }
    }

    /// Simulate a network partition: fetches fail with
    /// [`StoreError::Unavailable`] while offline.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of `get_block` calls served so far.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Whether a block is pinned.
    pub fn is_pinned(&self, id: &ContentId) -> bool {
        self.pinned.read().expect("lock poisoned").contains(id)
    }

    /// Number of blocks held by the network.
    pub fn len(&self) -> usize {
        self.blocks.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, id: &ContentId) -> Option<Bytes> {
        self.blocks.read().expect("lock poisoned").get(id).cloned()
    }
}

impl Default for MemoryBlockService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlockService for MemoryBlockService {
    async fn get_block(&self, id: &ContentId) -> StoreResult<Option<Bytes>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("block network offline".into()));
        }

        // Subscribe before the first lookup so a concurrent put cannot be missed.
        let mut changes = self.version.subscribe();
        loop {
            if let Some(data) = self.lookup(id) {
                return Ok(Some(data));
            }
            if !self.wait_for_providers {
                return Ok(None);
            }
            if changes.changed().await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn put_block(&self, id: &ContentId, data: Bytes, pin: bool) -> StoreResult<()> {
        {
            let mut blocks = self.blocks.write().expect("lock poisoned");
            blocks.entry(*id).or_insert(data);
        }
        if pin {
            self.pinned.write().expect("lock poisoned").insert(*id);
        }
        self.version.send_modify(|v| *v += 1);
        Ok(())
    }

    async fn has_block(&self, id: &ContentId) -> StoreResult<bool> {
        Ok(self.blocks.read().expect("lock poisoned").contains_key(id))
    }

    async fn remove_block(&self, id: &ContentId) -> StoreResult<()> {
        self.blocks.write().expect("lock poisoned").remove(id);
        self.pinned.write().expect("lock poisoned").remove(id);
        Ok(())
    }
}

impl std::fmt::Debug for MemoryBlockService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBlockService")
            .field("block_count", &self.len())
            .field("offline", &self.offline.load(Ordering::SeqCst))
            .finish()
    }
}
