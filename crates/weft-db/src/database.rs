//! An open database: its log, its sync engine, and the events and
//! persisted heads layered over them.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use weft_access::AccessController;
use weft_entry::Entry;
use weft_identity::{Identities, Identity};
use weft_log::{Log, LogEvent};
use weft_store::{ComposedStorage, FileStorage, LruStorage, MemoryStorage, Storage};
use weft_sync::{SyncEngine, SyncError, SyncEvent, Transport};
use weft_types::{ContentId, Payload, PeerId};

use crate::config::DatabaseConfig;
use crate::error::{DbError, DbResult};
use crate::manifest::{Address, Manifest};

const HEADS_FILE: &str = "heads.json";
const ENTRIES_DIR: &str = "entries";

/// Something that happened to a [`Database`].
#[derive(Clone, Debug)]
pub enum DatabaseEvent {
    /// An entry was added locally or joined from a peer.
    Update(Entry),
    /// A peer joined and announced its heads.
    Join { peer: PeerId, heads: Vec<Entry> },
    Leave { peer: PeerId },
    /// Replication hit a fault. The database keeps running.
    Error {
        peer: Option<PeerId>,
        error: Arc<SyncError>,
    },
    Close,
    Drop,
}

/// Everything a database is built from.
///
/// [`Node::open`](crate::Node::open) fills this in from a name or address;
/// embedders with their own collaborators can build it directly.
pub struct DatabaseOptions {
    pub address: Address,
    pub manifest: Manifest,
    pub identities: Arc<Identities>,
    pub identity: Identity,
    pub access: Arc<dyn AccessController>,
    pub transport: Arc<dyn Transport>,
    /// Network layer consulted after the local entry store.
    pub remote: Option<Arc<dyn Storage>>,
    pub config: DatabaseConfig,
}

/// An append-only event log replicated under one address.
pub struct Database {
    address: Address,
    manifest: Manifest,
    log: Arc<Log>,
    sync: SyncEngine,
    events: broadcast::Sender<DatabaseEvent>,
    forwarders: Mutex<Vec<JoinHandle<()>>>,
    heads_path: Option<PathBuf>,
    closed: AtomicBool,
}

impl Database {
    /// Build the log and its sync engine, restore persisted heads, and
    /// start replicating when the config says so.
    pub async fn open(options: DatabaseOptions) -> DbResult<Self> {
        let DatabaseOptions {
            address,
            manifest,
            identities,
            identity,
            access,
            transport,
            remote,
            config,
        } = options;

        let dir = config
            .directory
            .as_ref()
            .map(|root| root.join(address.hash().to_hex()));
        let local: Arc<dyn Storage> = match &dir {
            Some(dir) => Arc::new(FileStorage::open(dir.join(ENTRIES_DIR))?),
            None => Arc::new(MemoryStorage::new()),
        };
        let mut layers: Vec<Arc<dyn Storage>> =
            vec![Arc::new(LruStorage::new(config.entry_cache_size)), local];
        layers.extend(remote);
        let storage: Arc<dyn Storage> = Arc::new(ComposedStorage::new(layers));

        let log = Arc::new(Log::new(
            identities,
            identity,
            access,
            storage,
            config.log_options(address.to_string()),
        ));
        let heads_path = dir.map(|dir| dir.join(HEADS_FILE));
        if let Some(path) = &heads_path {
            let heads = read_heads(path).await?;
            if !heads.is_empty() {
                log.restore(&heads).await?;
            }
        }

        let sync = SyncEngine::new(log.clone(), transport, config.sync_config());
        let (events, _) = broadcast::channel(config.channel_capacity.max(1));
        let forwarders = vec![
            tokio::spawn(forward_log(
                log.clone(),
                log.subscribe(),
                events.clone(),
                heads_path.clone(),
            )),
            tokio::spawn(forward_sync(sync.subscribe(), events.clone())),
        ];

        let db = Self {
            address,
            manifest,
            log,
            sync,
            events,
            forwarders: Mutex::new(forwarders),
            heads_path,
            closed: AtomicBool::new(false),
        };
        if config.sync_automatically {
            db.sync.start().await?;
        }
        info!(
            address = %db.address,
            name = %db.manifest.name,
            entries = db.log.len(),
            "opened database"
        );
        Ok(db)
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn log(&self) -> &Arc<Log> {
        &self.log
    }

    pub fn sync(&self) -> &SyncEngine {
        &self.sync
    }

    pub fn identity(&self) -> &Identity {
        self.log.identity()
    }

    pub fn access(&self) -> &Arc<dyn AccessController> {
        self.log.access()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Append an operation and announce it to peers. Returns the entry hash.
    pub async fn add_operation(&self, payload: Payload) -> DbResult<ContentId> {
        self.ensure_open()?;
        let entry = self.log.append(payload).await?;
        if self.sync.is_running().await {
            self.sync.add(&entry).await?;
        }
        Ok(entry.hash())
    }

    /// Append an `ADD` operation carrying `value`.
    pub async fn add(&self, value: impl Into<Vec<u8>>) -> DbResult<ContentId> {
        self.add_operation(Payload::add(value)).await
    }

    /// Every entry, oldest first.
    pub async fn all(&self) -> DbResult<Vec<Entry>> {
        Ok(self.log.values().await?)
    }

    /// Peers currently replicating this database.
    pub fn peers(&self) -> Vec<PeerId> {
        self.sync.peers()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DatabaseEvent> {
        self.events.subscribe()
    }

    /// Stop replicating and persist the heads. Closing twice is a no-op.
    pub async fn close(&self) -> DbResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.sync.stop().await?;
        let forwarders: Vec<_> = self.forwarders.lock().expect("lock poisoned").drain(..).collect();
        for forwarder in forwarders {
            forwarder.abort();
            let _ = forwarder.await;
        }
        if let Some(path) = &self.heads_path {
            write_heads(path, &self.log.head_hashes()).await?;
        }
        let _ = self.events.send(DatabaseEvent::Close);
        info!(address = %self.address, "closed database");
        Ok(())
    }

    /// Clear the log and its entry storage, forget the heads, and close.
    pub async fn drop_database(&self) -> DbResult<()> {
        self.ensure_open()?;
        self.log.clear().await?;
        let _ = self.events.send(DatabaseEvent::Drop);
        self.close().await?;
        if let Some(path) = &self.heads_path {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        info!(address = %self.address, "dropped database");
        Ok(())
    }

    fn ensure_open(&self) -> DbResult<()> {
        if self.is_closed() {
            return Err(DbError::Closed(self.address.to_string()));
        }
        Ok(())
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        for forwarder in self.forwarders.get_mut().expect("lock poisoned").drain(..) {
            forwarder.abort();
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("address", &self.address.to_string())
            .field("name", &self.manifest.name)
            .field("entries", &self.log.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn forward_log(
    log: Arc<Log>,
    mut rx: broadcast::Receiver<LogEvent>,
    events: broadcast::Sender<DatabaseEvent>,
    heads_path: Option<PathBuf>,
) {
    loop {
        let entries = match rx.recv().await {
            Ok(LogEvent::Appended(entry)) => vec![entry],
            Ok(LogEvent::Joined(entries)) => entries,
            Ok(LogEvent::Cleared) => continue,
            Err(RecvError::Lagged(skipped)) => {
                warn!(log = %log.id(), skipped, "database fell behind log events");
                Vec::new()
            }
            Err(RecvError::Closed) => break,
        };
        if let Some(path) = &heads_path {
            if let Err(e) = write_heads(path, &log.head_hashes()).await {
                warn!(log = %log.id(), error = %e, "failed to persist heads");
            }
        }
        for entry in entries {
            let _ = events.send(DatabaseEvent::Update(entry));
        }
    }
}

async fn forward_sync(
    mut rx: broadcast::Receiver<SyncEvent>,
    events: broadcast::Sender<DatabaseEvent>,
) {
    loop {
        let event = match rx.recv().await {
            Ok(SyncEvent::Join { peer, heads }) => DatabaseEvent::Join { peer, heads },
            Ok(SyncEvent::Leave { peer }) => DatabaseEvent::Leave { peer },
            Ok(SyncEvent::Error { peer, error }) => DatabaseEvent::Error { peer, error },
            Ok(SyncEvent::Synced { .. }) => continue,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "database fell behind sync events");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        let _ = events.send(event);
    }
}

async fn read_heads(path: &Path) -> DbResult<Vec<ContentId>> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let hexes: Vec<String> =
        serde_json::from_str(&text).map_err(|e| DbError::Heads(e.to_string()))?;
    hexes
        .iter()
        .map(|h| ContentId::from_hex(h).map_err(|e| DbError::Heads(e.to_string())))
        .collect()
}

async fn write_heads(path: &Path, heads: &[ContentId]) -> DbResult<()> {
    let hexes: Vec<String> = heads.iter().map(ContentId::to_hex).collect();
    let json = serde_json::to_vec(&hexes).map_err(|e| DbError::Heads(e.to_string()))?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    debug!(path = %path.display(), heads = heads.len(), "persisted heads");
    Ok(())
}
