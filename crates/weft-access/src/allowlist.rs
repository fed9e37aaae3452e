use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use weft_entry::Entry;
use weft_identity::IdentityResolver;
use weft_types::ContentId;

use crate::controller::{AccessContext, AccessController, AccessManifest, WILDCARD};
use crate::error::{AccessError, AccessResult};

/// Controller admitting only writers whose identity id is on the write
/// list. A `"*"` entry admits everyone.
///
/// The writer identity is resolved from the entry's identity hash and must
/// pass verification; an unresolvable identity is a rejection.
pub struct AllowListAccess {
    address: ContentId,
    write: BTreeSet<String>,
    resolver: Arc<dyn IdentityResolver>,
}

impl AllowListAccess {
    pub const KIND: &'static str = "allowlist";

    /// Create a controller and persist its manifest.
    pub async fn create(ctx: &AccessContext, write: Vec<String>) -> AccessResult<Self> {
        let write: BTreeSet<String> = write.into_iter().collect();
        let manifest = AccessManifest::new(Self::KIND, write.iter().cloned().collect());
        let address = manifest.store(ctx.storage.as_ref()).await?;
        debug!(address = %address.short_hex(), writers = write.len(), "created allow-list controller");
        Ok(Self {
            address,
            write,
            resolver: ctx.resolver.clone(),
        })
    }

    /// Reload a controller from its manifest address.
    pub async fn open(ctx: &AccessContext, address: &ContentId) -> AccessResult<Self> {
        let manifest = AccessManifest::load(ctx.storage.as_ref(), address).await?;
        if manifest.kind != Self::KIND {
            return Err(AccessError::KindMismatch {
                expected: Self::KIND.into(),
                actual: manifest.kind,
            });
        }
        Ok(Self {
            address: *address,
            write: manifest.write.into_iter().collect(),
            resolver: ctx.resolver.clone(),
        })
    }

    /// Identity ids allowed to write.
    pub fn write(&self) -> impl Iterator<Item = &str> {
        self.write.iter().map(String::as_str)
    }

    fn is_open(&self) -> bool {
        self.write.contains(WILDCARD)
    }
}

#[async_trait]
impl AccessController for AllowListAccess {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn address(&self) -> ContentId {
        self.address
    }

    async fn can_append(&self, entry: &Entry) -> AccessResult<bool> {
        if self.is_open() {
            return Ok(true);
        }

        let Some(identity) = self.resolver.resolve(&entry.identity).await? else {
            debug!(entry = %entry.hash().short_hex(), "writer identity not resolvable");
            return Ok(false);
        };
        if !self.write.contains(&identity.id) {
            return Ok(false);
        }
        Ok(identity.public_key == entry.key && self.resolver.verify_identity(&identity).await)
    }
}

impl std::fmt::Debug for AllowListAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllowListAccess")
            .field("address", &self.address)
            .field("write", &self.write)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use weft_crypto::InMemoryKeyStore;
    use weft_identity::{Identities, Identity};
    use weft_store::MemoryStorage;
    use weft_types::Payload;

    use super::*;

    async fn setup() -> (AccessContext, Arc<Identities>, Identity, Identity) {
        let storage = Arc::new(MemoryStorage::new());
        let identities = Arc::new(Identities::new(
            Arc::new(InMemoryKeyStore::new()),
            storage.clone(),
        ));
        let alice = identities.create_identity("alice").await.unwrap();
        let bob = identities.create_identity("bob").await.unwrap();
        let ctx = AccessContext::new(storage, identities.clone());
        (ctx, identities, alice, bob)
    }

    fn entry_by(identities: &Identities, identity: &Identity) -> Entry {
        Entry::create(identities, identity, "log", Payload::add(b"x".to_vec()), None, vec![], vec![])
            .unwrap()
    }

    #[tokio::test]
    async fn listed_writer_is_admitted() {
        let (ctx, ids, alice, bob) = setup().await;
        let acl = AllowListAccess::create(&ctx, vec![alice.id.clone()]).await.unwrap();
        assert!(acl.can_append(&entry_by(&ids, &alice)).await.unwrap());
        assert!(!acl.can_append(&entry_by(&ids, &bob)).await.unwrap());
    }

    #[tokio::test]
    async fn wildcard_admits_everyone() {
        let (ctx, ids, alice, bob) = setup().await;
        let acl = AllowListAccess::create(&ctx, vec![WILDCARD.into()]).await.unwrap();
        assert!(acl.can_append(&entry_by(&ids, &alice)).await.unwrap());
        assert!(acl.can_append(&entry_by(&ids, &bob)).await.unwrap());
    }

    #[tokio::test]
    async fn empty_list_admits_nobody() {
        let (ctx, ids, alice, _) = setup().await;
        let acl = AllowListAccess::create(&ctx, vec![]).await.unwrap();
        assert!(!acl.can_append(&entry_by(&ids, &alice)).await.unwrap());
    }

    #[tokio::test]
    async fn reopen_from_address() {
        let (ctx, ids, alice, bob) = setup().await;
        let created = AllowListAccess::create(&ctx, vec![bob.id.clone()]).await.unwrap();
        let reopened = AllowListAccess::open(&ctx, &created.address()).await.unwrap();
        assert_eq!(reopened.address(), created.address());
        assert_eq!(reopened.write().collect::<Vec<_>>(), vec![bob.id.as_str()]);
        assert!(reopened.can_append(&entry_by(&ids, &bob)).await.unwrap());
        assert!(!reopened.can_append(&entry_by(&ids, &alice)).await.unwrap());
    }

    #[tokio::test]
    async fn same_write_list_same_address() {
        let (ctx, _, alice, bob) = setup().await;
        let a = AllowListAccess::create(&ctx, vec![alice.id.clone(), bob.id.clone()])
            .await
            .unwrap();
        let b = AllowListAccess::create(&ctx, vec![bob.id.clone(), alice.id.clone()])
            .await
            .unwrap();
        assert_eq!(a.address(), b.address());
    }

    #[tokio::test]
    async fn unresolvable_writer_is_rejected() {
        let (ctx, _, alice, _) = setup().await;
        let acl = AllowListAccess::create(&ctx, vec![alice.id.clone()]).await.unwrap();

        // Entry signed in a separate identity universe whose record was never shared.
        let other = Identities::new(Arc::new(InMemoryKeyStore::new()), Arc::new(MemoryStorage::new()));
        let stranger = other.create_identity("alice").await.unwrap();
        assert!(!acl.can_append(&entry_by(&other, &stranger)).await.unwrap());
    }

    #[tokio::test]
    async fn open_rejects_other_kind() {
        let (ctx, _, _, _) = setup().await;
        let open = crate::OpenAccess::create(&ctx).await.unwrap();
        assert!(matches!(
            AllowListAccess::open(&ctx, &open.address()).await,
            Err(AccessError::KindMismatch { .. })
        ));
    }
}
