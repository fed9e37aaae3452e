use async_trait::async_trait;
use bytes::Bytes;
use weft_types::ContentId;

use crate::error::StoreResult;

/// Content-addressed block store.
///
/// All implementations must satisfy these invariants:
/// - A key, once written, always maps to the same bytes. Writing an existing
///   key is a no-op.
/// - Concurrent reads are always safe.
/// - The store never interprets block contents.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Write a block under `id`.
    async fn put(&self, id: &ContentId, data: Bytes) -> StoreResult<()>;

    /// Read a block. Returns `Ok(None)` if the block does not exist.
    async fn get(&self, id: &ContentId) -> StoreResult<Option<Bytes>>;

    /// Check whether a block exists without fetching it from elsewhere.
    async fn contains(&self, id: &ContentId) -> StoreResult<bool> {
        Ok(self.get(id).await?.is_some())
    }

    /// Remove a block. Removing a missing block is not an error.
    async fn delete(&self, id: &ContentId) -> StoreResult<()>;

    /// Remove every block.
    async fn clear(&self) -> StoreResult<()>;
}

/// Content-addressed network block exchange backing [`RemoteStorage`].
///
/// `get_block` may suspend until some peer provides the block; callers bound
/// it with a timeout.
///
/// [`RemoteStorage`]: crate::RemoteStorage
#[async_trait]
pub trait BlockService: Send + Sync {
    /// Fetch a block from the network, waiting for it to become available.
    /// `Ok(None)` means the network definitively has no provider.
    async fn get_block(&self, id: &ContentId) -> StoreResult<Option<Bytes>>;

    /// Provide a block to the network, optionally pinning it against
    /// garbage collection.
    async fn put_block(&self, id: &ContentId, data: Bytes, pin: bool) -> StoreResult<()>;

    /// Whether the block is already held locally by this service.
    async fn has_block(&self, id: &ContentId) -> StoreResult<bool>;

    /// Drop the local copy (and pin) of a block.
    async fn remove_block(&self, id: &ContentId) -> StoreResult<()>;
}
