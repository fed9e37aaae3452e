use async_trait::async_trait;
use weft_entry::Entry;
use weft_types::ContentId;

use crate::controller::{AccessContext, AccessController, AccessManifest, WILDCARD};
use crate::error::{AccessError, AccessResult};

/// Controller that admits every entry.
#[derive(Debug, Clone)]
pub struct OpenAccess {
    address: ContentId,
}

impl OpenAccess {
    pub const KIND: &'static str = "open";

    /// An open controller whose manifest is not persisted.
    pub fn new() -> AccessResult<Self> {
        Ok(Self {
            address: Self::manifest().address()?,
        })
    }

    /// An open controller with its manifest written to storage.
    pub async fn create(ctx: &AccessContext) -> AccessResult<Self> {
        let address = Self::manifest().store(ctx.storage.as_ref()).await?;
        Ok(Self { address })
    }

    /// Reload from a stored manifest.
    pub async fn open(ctx: &AccessContext, address: &ContentId) -> AccessResult<Self> {
        let manifest = AccessManifest::load(ctx.storage.as_ref(), address).await?;
        if manifest.kind != Self::KIND {
            return Err(AccessError::KindMismatch {
                expected: Self::KIND.into(),
                actual: manifest.kind,
            });
        }
        Ok(Self { address: *address })
    }

    fn manifest() -> AccessManifest {
        AccessManifest::new(Self::KIND, vec![WILDCARD.to_string()])
    }
}

#[async_trait]
impl AccessController for OpenAccess {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn address(&self) -> ContentId {
        self.address
    }

    async fn can_append(&self, _entry: &Entry) -> AccessResult<bool> {
        Ok(true)
    }
}
