//! A replica node and how it opens databases by name or address.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;
use weft_access::{AccessContext, AccessController, AccessRegistry, AllowListAccess};
use weft_crypto::KeyStore;
use weft_identity::{Identities, Identity};
use weft_store::{ComposedStorage, FileStorage, MemoryStorage, RemoteStorage, Storage};
use weft_sync::{PeerBlockService, Transport, BLOCK_TOPIC};
use weft_types::PeerId;

use crate::config::DatabaseConfig;
use crate::database::{Database, DatabaseOptions};
use crate::error::DbResult;
use crate::manifest::{Address, Manifest, EVENTLOG};

const BLOCKS_DIR: &str = "blocks";

/// How to create a database that does not exist yet.
///
/// Ignored when opening an existing address: the manifest fixes the access
/// controller and metadata.
#[derive(Clone, Debug)]
pub struct OpenOptions {
    /// Access controller type tag.
    pub access: String,
    /// Identity ids allowed to write. Empty means only the opening identity.
    pub write: Vec<String>,
    pub meta: BTreeMap<String, String>,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            access: AllowListAccess::KIND.to_string(),
            write: Vec::new(),
            meta: BTreeMap::new(),
        }
    }
}

impl OpenOptions {
    pub fn with_access(mut self, kind: impl Into<String>) -> Self {
        self.access = kind.into();
        self
    }

    pub fn with_write(mut self, write: Vec<String>) -> Self {
        self.write = write;
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }
}

/// One replica: an identity, a block store shared with peers, and the
/// databases opened through it.
///
/// Blocks (identity records, manifests, entries) live in a local store
/// that also answers peers' block requests; blocks missing locally are
/// fetched from peers.
pub struct Node {
    config: DatabaseConfig,
    transport: Arc<dyn Transport>,
    identities: Arc<Identities>,
    identity: Identity,
    local: Arc<dyn Storage>,
    blocks: Arc<PeerBlockService>,
    storage: Arc<dyn Storage>,
    registry: Arc<AccessRegistry>,
}

impl Node {
    /// Join the block topic and create (or reload) the identity `id`.
    pub async fn start(
        transport: Arc<dyn Transport>,
        keystore: Arc<dyn KeyStore>,
        id: &str,
        config: DatabaseConfig,
    ) -> DbResult<Self> {
        let local: Arc<dyn Storage> = match &config.directory {
            Some(root) => Arc::new(FileStorage::open(root.join(BLOCKS_DIR))?),
            None => Arc::new(MemoryStorage::new()),
        };
        let blocks = Arc::new(
            PeerBlockService::start(
                transport.clone(),
                BLOCK_TOPIC,
                local.clone(),
                config.fetch_timeout(),
            )
            .await?,
        );
        let storage: Arc<dyn Storage> =
            Arc::new(ComposedStorage::new(vec![local.clone(), remote(&blocks, &config)]));
        let identities = Arc::new(Identities::new(keystore, storage.clone()));
        let identity = identities.create_identity(id).await?;
        info!(
            peer = %transport.local_peer(),
            identity = %identity.hash().short_hex(),
            "node started"
        );
        Ok(Self {
            config,
            transport,
            identities,
            identity,
            local,
            blocks,
            storage,
            registry: Arc::new(AccessRegistry::new()),
        })
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn identities(&self) -> &Arc<Identities> {
        &self.identities
    }

    pub fn peer_id(&self) -> PeerId {
        self.transport.local_peer().clone()
    }

    /// Blocks held by this node.
    pub fn local_storage(&self) -> &Arc<dyn Storage> {
        &self.local
    }

    /// Local blocks with fall-through to peers.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn block_service(&self) -> &Arc<PeerBlockService> {
        &self.blocks
    }

    /// Access controller types; register custom policies here.
    pub fn access_registry(&self) -> &Arc<AccessRegistry> {
        &self.registry
    }

    /// Open the database at `address`, or create one named `address` if it
    /// is not a valid address.
    pub async fn open(&self, address: &str, options: OpenOptions) -> DbResult<Database> {
        let ctx = AccessContext::new(self.storage.clone(), self.identities.clone());
        let (address, manifest, access) = match Address::parse(address) {
            Ok(address) => {
                let manifest = Manifest::load(self.storage.as_ref(), &address).await?;
                let access = self.registry.open(&ctx, &manifest.access_controller).await?;
                (address, manifest, access)
            }
            Err(_) => {
                let write = if options.write.is_empty() {
                    vec![self.identity.id.clone()]
                } else {
                    options.write
                };
                let access = self.registry.create(&options.access, &ctx, write).await?;
                let manifest =
                    Manifest::new(address, EVENTLOG, access.address()).with_meta(options.meta);
                let address = manifest.store(self.storage.as_ref()).await?;
                (address, manifest, access)
            }
        };

        Database::open(DatabaseOptions {
            address,
            manifest,
            identities: self.identities.clone(),
            identity: self.identity.clone(),
            access,
            transport: self.transport.clone(),
            remote: Some(remote(&self.blocks, &self.config)),
            config: self.config.clone(),
        })
        .await
    }

    /// Stop answering block requests.
    pub async fn stop(&self) -> DbResult<()> {
        self.blocks.stop().await?;
        info!(peer = %self.transport.local_peer(), "node stopped");
        Ok(())
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("peer", &self.transport.local_peer())
            .field("identity", &self.identity.id)
            .field("directory", &self.config.directory)
            .finish()
    }
}

fn remote(blocks: &Arc<PeerBlockService>, config: &DatabaseConfig) -> Arc<dyn Storage> {
    Arc::new(RemoteStorage::new(blocks.clone()).with_timeout(config.fetch_timeout()))
}
