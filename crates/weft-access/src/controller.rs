use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use weft_crypto::ContentHasher;
use weft_entry::Entry;
use weft_identity::IdentityResolver;
use weft_store::Storage;
use weft_types::ContentId;

use crate::error::{AccessError, AccessResult};

/// Write-list entry admitting every identity.
pub const WILDCARD: &str = "*";

/// Policy gate deciding whether an entry may join a log.
///
/// The trait is object-safe and `Send + Sync` so a log can hold an
/// `Arc<dyn AccessController>`. `can_append` may suspend, e.g. to fetch the
/// writer's identity record.
#[async_trait]
pub trait AccessController: Send + Sync {
    /// Type tag (e.g. `"open"`, `"allowlist"`).
    fn kind(&self) -> &str;

    /// Content address of the controller's manifest.
    fn address(&self) -> ContentId;

    /// Decide whether `entry` may be appended.
    ///
    /// `Ok(false)` is a policy rejection. `Err` means the decision could not
    /// be made yet (e.g. the identity fetch timed out).
    async fn can_append(&self, entry: &Entry) -> AccessResult<bool>;
}

/// Collaborators a controller needs to store its manifest and resolve
/// writer identities.
#[derive(Clone)]
pub struct AccessContext {
    pub storage: Arc<dyn Storage>,
    pub resolver: Arc<dyn IdentityResolver>,
}

impl AccessContext {
    pub fn new(storage: Arc<dyn Storage>, resolver: Arc<dyn IdentityResolver>) -> Self {
        Self { storage, resolver }
    }
}

impl std::fmt::Debug for AccessContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessContext").finish_non_exhaustive()
    }
}

/// Persistent description of a controller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessManifest {
    pub kind: String,
    /// Identity ids allowed to write.
    pub write: Vec<String>,
}

impl AccessManifest {
    pub fn new(kind: impl Into<String>, write: Vec<String>) -> Self {
        Self {
            kind: kind.into(),
            write,
        }
    }

    pub fn encode(&self) -> AccessResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| AccessError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> AccessResult<Self> {
        bincode::deserialize(bytes).map_err(|e| AccessError::Decode(e.to_string()))
    }

    /// The manifest's content address.
    pub fn address(&self) -> AccessResult<ContentId> {
        Ok(ContentHasher::ACCESS.hash(&self.encode()?))
    }

    /// Write the manifest to storage, returning its address.
    pub async fn store(&self, storage: &dyn Storage) -> AccessResult<ContentId> {
        let bytes = self.encode()?;
        let address = ContentHasher::ACCESS.hash(&bytes);
        storage.put(&address, Bytes::from(bytes)).await?;
        Ok(address)
    }

    /// Load a manifest from storage by address.
    pub async fn load(storage: &dyn Storage, address: &ContentId) -> AccessResult<Self> {
        let bytes = storage
            .get(address)
            .await?
            .ok_or(AccessError::ManifestNotFound(*address))?;
        if !ContentHasher::ACCESS.verify(&bytes, address) {
            return Err(AccessError::Decode(format!(
                "manifest bytes do not hash to {}",
                address.short_hex()
            )));
        }
        Self::decode(&bytes)
    }

    /// Whether the write list admits everyone.
    pub fn is_open(&self) -> bool {
        self.write.iter().any(|w| w == WILDCARD)
    }
}
