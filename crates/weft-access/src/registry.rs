use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use weft_types::ContentId;

use crate::allowlist::AllowListAccess;
use crate::controller::{AccessContext, AccessController, AccessManifest};
use crate::error::{AccessError, AccessResult};
use crate::open::OpenAccess;

/// Builds controllers of one type.
#[async_trait]
pub trait AccessFactory: Send + Sync {
    /// Type tag this factory handles.
    fn kind(&self) -> &str;

    /// Create a new controller with the given write list.
    async fn create(
        &self,
        ctx: &AccessContext,
        write: Vec<String>,
    ) -> AccessResult<Arc<dyn AccessController>>;

    /// Rebuild a controller from its manifest address.
    async fn open(
        &self,
        ctx: &AccessContext,
        address: &ContentId,
    ) -> AccessResult<Arc<dyn AccessController>>;
}

struct OpenFactory;

#[async_trait]
impl AccessFactory for OpenFactory {
    fn kind(&self) -> &str {
        OpenAccess::KIND
    }

    async fn create(
        &self,
        ctx: &AccessContext,
        _write: Vec<String>,
    ) -> AccessResult<Arc<dyn AccessController>> {
        Ok(Arc::new(OpenAccess::create(ctx).await?))
    }

    async fn open(
        &self,
        ctx: &AccessContext,
        address: &ContentId,
    ) -> AccessResult<Arc<dyn AccessController>> {
        Ok(Arc::new(OpenAccess::open(ctx, address).await?))
    }
}

struct AllowListFactory;

#[async_trait]
impl AccessFactory for AllowListFactory {
    fn kind(&self) -> &str {
        AllowListAccess::KIND
    }

    async fn create(
        &self,
        ctx: &AccessContext,
        write: Vec<String>,
    ) -> AccessResult<Arc<dyn AccessController>> {
        Ok(Arc::new(AllowListAccess::create(ctx, write).await?))
    }

    async fn open(
        &self,
        ctx: &AccessContext,
        address: &ContentId,
    ) -> AccessResult<Arc<dyn AccessController>> {
        Ok(Arc::new(AllowListAccess::open(ctx, address).await?))
    }
}

/// Controller factories keyed by type tag.
///
/// Starts with `"open"` and `"allowlist"`; custom policies are added with
/// [`AccessRegistry::register`].
pub struct AccessRegistry {
    factories: RwLock<HashMap<String, Arc<dyn AccessFactory>>>,
}

impl AccessRegistry {
    pub fn new() -> Self {
        let registry = Self::empty();
        registry.register(Arc::new(OpenFactory));
        registry.register(Arc::new(AllowListFactory));
        registry
    }

    /// A registry with no factories.
    pub fn empty() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Add or replace the factory for its type tag.
    pub fn register(&self, factory: Arc<dyn AccessFactory>) {
        self.factories
            .write()
            .expect("lock poisoned")
            .insert(factory.kind().to_string(), factory);
    }

    /// Registered type tags, sorted.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self
            .factories
            .read()
            .expect("lock poisoned")
            .keys()
            .cloned()
            .collect();
        kinds.sort();
        kinds
    }

    /// Create a controller of type `kind`.
    pub async fn create(
        &self,
        kind: &str,
        ctx: &AccessContext,
        write: Vec<String>,
    ) -> AccessResult<Arc<dyn AccessController>> {
        self.factory(kind)?.create(ctx, write).await
    }

    /// Rebuild a controller from its address, dispatching on the manifest's
    /// type tag.
    pub async fn open(
        &self,
        ctx: &AccessContext,
        address: &ContentId,
    ) -> AccessResult<Arc<dyn AccessController>> {
        let manifest = AccessManifest::load(ctx.storage.as_ref(), address).await?;
        self.factory(&manifest.kind)?.open(ctx, address).await
    }

    fn factory(&self, kind: &str) -> AccessResult<Arc<dyn AccessFactory>> {
        self.factories
            .read()
            .expect("lock poisoned")
            .get(kind)
            .cloned()
            .ok_or_else(|| AccessError::UnknownKind(kind.to_string()))
    }
}

impl Default for AccessRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AccessRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use weft_crypto::InMemoryKeyStore;
    use weft_entry::Entry;
    use weft_identity::Identities;
    use weft_store::MemoryStorage;
    use weft_types::Payload;

    use super::*;

    async fn context() -> (AccessContext, Arc<Identities>) {
        let storage = Arc::new(MemoryStorage::new());
        let identities = Arc::new(Identities::new(
            Arc::new(InMemoryKeyStore::new()),
            storage.clone(),
        ));
        (AccessContext::new(storage, identities.clone()), identities)
    }

    // -----------------------------------------------------------------------
    // 1. Built-in types
    // -----------------------------------------------------------------------
    #[test]
    fn default_registry_has_builtin_kinds() {
        assert_eq!(AccessRegistry::new().kinds(), vec!["allowlist", "open"]);
        assert!(AccessRegistry::empty().kinds().is_empty());
    }

    #[tokio::test]
    async fn create_and_reopen_by_address() {
        let (ctx, ids) = context().await;
        let alice = ids.create_identity("alice").await.unwrap();
        let registry = AccessRegistry::new();

        let acl = registry
            .create("allowlist", &ctx, vec![alice.id.clone()])
            .await
            .unwrap();
        let reopened = registry.open(&ctx, &acl.address()).await.unwrap();
        assert_eq!(reopened.kind(), "allowlist");

        let entry = Entry::create(&ids, &alice, "log", Payload::add(vec![1]), None, vec![], vec![])
            .unwrap();
        assert!(reopened.can_append(&entry).await.unwrap());

        let open = registry.create("open", &ctx, vec![]).await.unwrap();
        assert_eq!(registry.open(&ctx, &open.address()).await.unwrap().kind(), "open");
    }

    // -----------------------------------------------------------------------
    // 2. Unknown types
    // -----------------------------------------------------------------------
    #[tokio::test]
    async fn unknown_kind_is_an_error() {
        let (ctx, _) = context().await;
        let result = AccessRegistry::new().create("ipfs", &ctx, vec![]).await;
        assert!(matches!(result, Err(AccessError::UnknownKind(k)) if k == "ipfs"));
    }

    #[tokio::test]
    async fn empty_registry_cannot_open() {
        let (ctx, _) = context().await;
        let open = OpenAccess::create(&ctx).await.unwrap();
        let result = AccessRegistry::empty().open(&ctx, &open.address()).await;
        assert!(matches!(result, Err(AccessError::UnknownKind(_))));
    }

    // -----------------------------------------------------------------------
    // 3. Custom policies
    // -----------------------------------------------------------------------
    #[tokio::test]
    async fn custom_factory_integration() {
        struct DenyAll(ContentId);

        #[async_trait]
        impl AccessController for DenyAll {
            fn kind(&self) -> &str {
                "deny"
            }
            fn address(&self) -> ContentId {
                self.0
            }
            async fn can_append(&self, _entry: &Entry) -> AccessResult<bool> {
                Ok(false)
            }
        }

        struct DenyFactory;

        #[async_trait]
        impl AccessFactory for DenyFactory {
            fn kind(&self) -> &str {
                "deny"
            }
            async fn create(
                &self,
                ctx: &AccessContext,
                write: Vec<String>,
            ) -> AccessResult<Arc<dyn AccessController>> {
                let address = AccessManifest::new("deny", write).store(ctx.storage.as_ref()).await?;
                Ok(Arc::new(DenyAll(address)))
            }
            async fn open(
                &self,
                _ctx: &AccessContext,
                address: &ContentId,
            ) -> AccessResult<Arc<dyn AccessController>> {
                Ok(Arc::new(DenyAll(*address)))
            }
        }

        let (ctx, ids) = context().await;
        let alice = ids.create_identity("alice").await.unwrap();
        let registry = AccessRegistry::new();
        registry.register(Arc::new(DenyFactory));

        let acl = registry.create("deny", &ctx, vec!["*".into()]).await.unwrap();
        let reopened = registry.open(&ctx, &acl.address()).await.unwrap();
        let entry = Entry::create(&ids, &alice, "log", Payload::add(vec![]), None, vec![], vec![])
            .unwrap();
        assert!(!reopened.can_append(&entry).await.unwrap());
    }
}
