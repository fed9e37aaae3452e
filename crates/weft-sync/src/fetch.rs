//! Block exchange between peers over a shared topic.
//!
//! Each node answers `FetchRequest`s from its local store and routes
//! `FetchResponse`s back to the request waiting on them.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, warn};
use uuid::Uuid;
use weft_protocol::{SyncCodec, SyncMessage};
use weft_store::{BlockService, Storage, StoreError, StoreResult};
use weft_types::{ContentId, PeerId};

use crate::error::SyncResult;
use crate::transport::{Transport, TransportEvent};

/// Default topic for block requests.
pub const BLOCK_TOPIC: &str = "weft/blocks";

type Blocks = Vec<(ContentId, Option<Vec<u8>>)>;

/// A [`BlockService`] that fetches blocks from connected peers.
///
/// Requests go to each known peer in turn as a `FetchRequest` and are
/// matched to their `FetchResponse` by request id. Peers answer only from
/// their local store, so a request never fans out across the network.
///
/// Dropping the future of a pending `get_block` withdraws the request.
pub struct PeerBlockService {
    inner: Arc<Inner>,
    task: JoinHandle<()>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    topic: String,
    local: Arc<dyn Storage>,
    timeout: Duration,
    peers: RwLock<BTreeSet<PeerId>>,
    pinned: RwLock<HashSet<ContentId>>,
    inflight: Mutex<HashMap<Uuid, oneshot::Sender<Blocks>>>,
}

/// Removes an in-flight request when its waiter goes away.
struct InflightGuard<'a> {
    inner: &'a Inner,
    id: Uuid,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.inner
            .inflight
            .lock()
            .expect("lock poisoned")
            .remove(&self.id);
    }
}

impl PeerBlockService {
    /// Join `topic` and start answering peers' requests from `local`.
    pub async fn start(
        transport: Arc<dyn Transport>,
        topic: impl Into<String>,
        local: Arc<dyn Storage>,
        timeout: Duration,
    ) -> SyncResult<Self> {
        let topic = topic.into();
        let events = transport.subscribe(&topic).await?;
        let inner = Arc::new(Inner {
            transport,
            topic,
            local,
            timeout,
            peers: RwLock::new(BTreeSet::new()),
            pinned: RwLock::new(HashSet::new()),
            inflight: Mutex::new(HashMap::new()),
        });
        let task = tokio::spawn(inner.clone().run(events));
        Ok(Self { inner, task })
    }

    /// Peers currently asked for blocks.
    pub fn peers(&self) -> Vec<PeerId> {
        self.inner
            .peers
            .read()
            .expect("lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    pub fn is_pinned(&self, id: &ContentId) -> bool {
        self.inner.pinned.read().expect("lock poisoned").contains(id)
    }

    /// Number of requests waiting for a response.
    pub fn inflight(&self) -> usize {
        self.inner.inflight.lock().expect("lock poisoned").len()
    }

    /// Leave the block topic and stop answering requests.
    pub async fn stop(&self) -> SyncResult<()> {
        self.task.abort();
        self.inner.transport.unsubscribe(&self.inner.topic).await
    }
}

impl Drop for PeerBlockService {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl Inner {
    /// Route responses inline and answer requests in their own tasks, so a
    /// slow local read never holds up responses to our own requests.
    async fn run(self: Arc<Self>, mut events: mpsc::Receiver<TransportEvent>) {
        let mut serving = JoinSet::new();
        while let Some(event) = events.recv().await {
            while serving.try_join_next().is_some() {}
            match event {
                TransportEvent::PeerJoined(peer) => {
                    debug!(%peer, topic = %self.topic, "block peer joined");
                    self.peers.write().expect("lock poisoned").insert(peer);
                }
                TransportEvent::PeerLeft(peer) => {
                    debug!(%peer, topic = %self.topic, "block peer left");
                    self.peers.write().expect("lock poisoned").remove(&peer);
                }
                TransportEvent::Message { from, data } => self.handle(from, data, &mut serving),
            }
        }
        debug!(topic = %self.topic, "block topic closed");
    }

    fn handle(self: &Arc<Self>, from: PeerId, data: Bytes, serving: &mut JoinSet<()>) {
        let msg = match SyncCodec::decode(&data) {
            Ok((msg, _)) => msg,
            Err(e) => {
                warn!(peer = %from, error = %e, "undecodable block message");
                return;
            }
        };
        match msg {
            SyncMessage::FetchRequest { request_id, hashes } => {
                let inner = self.clone();
                serving.spawn(async move {
                    if let Err(e) = inner.serve(&from, request_id, hashes).await {
                        warn!(peer = %from, error = %e, "failed to answer block request");
                    }
                });
            }
            SyncMessage::FetchResponse { request_id, blocks } => {
                let waiter = self
                    .inflight
                    .lock()
                    .expect("lock poisoned")
                    .remove(&request_id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(blocks);
                    }
                    None => debug!(peer = %from, %request_id, "late block response"),
                }
            }
            other => debug!(peer = %from, kind = other.type_name(), "ignored message on block topic"),
        }
    }

    async fn serve(&self, to: &PeerId, request_id: Uuid, hashes: Vec<ContentId>) -> SyncResult<()> {
        let mut blocks = Vec::with_capacity(hashes.len());
        for hash in hashes {
            let data = self.local.get(&hash).await?.map(|b| b.to_vec());
            blocks.push((hash, data));
        }
        let served = blocks.iter().filter(|(_, d)| d.is_some()).count();
        let response = SyncCodec::encode(&SyncMessage::FetchResponse { request_id, blocks })?;
        self.transport
            .send(to, &self.topic, Bytes::from(response))
            .await?;
        debug!(peer = %to, served, "answered block request");
        Ok(())
    }

    /// Ask one peer for `id`. `Ok(None)` if it does not have it or does not
    /// answer in time.
    async fn request(&self, peer: &PeerId, id: &ContentId) -> StoreResult<Option<Bytes>> {
        let request_id = Uuid::now_v7();
        let (tx, rx) = oneshot::channel();
        self.inflight
            .lock()
            .expect("lock poisoned")
            .insert(request_id, tx);
        let _guard = InflightGuard {
            inner: self,
            id: request_id,
        };

        let request = SyncCodec::encode(&SyncMessage::FetchRequest {
            request_id,
            hashes: vec![*id],
        })
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        if let Err(e) = self
            .transport
            .send(peer, &self.topic, Bytes::from(request))
            .await
        {
            debug!(%peer, error = %e, "block request not delivered");
            return Ok(None);
        }

        let blocks = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(blocks)) => blocks,
            Ok(Err(_)) => return Ok(None),
            Err(_) => {
                debug!(%peer, id = %id.short_hex(), "peer did not answer block request");
                return Ok(None);
            }
        };
        for (hash, data) in blocks {
            let Some(data) = data else { continue };
            if hash != *id {
                continue;
            }
            let data = Bytes::from(data);
            self.local.put(id, data.clone()).await?;
            return Ok(Some(data));
        }
        Ok(None)
    }
}

#[async_trait]
impl BlockService for PeerBlockService {
    async fn get_block(&self, id: &ContentId) -> StoreResult<Option<Bytes>> {
        if let Some(data) = self.inner.local.get(id).await? {
            return Ok(Some(data));
        }
        let peers = self.peers();
        if peers.is_empty() {
            return Err(StoreError::Unavailable("no peers to fetch from".into()));
        }
        for peer in peers {
            if let Some(data) = self.inner.request(&peer, id).await? {
                debug!(%peer, id = %id.short_hex(), "fetched block from peer");
                return Ok(Some(data));
            }
        }
        Ok(None)
    }

    async fn put_block(&self, id: &ContentId, data: Bytes, pin: bool) -> StoreResult<()> {
        self.inner.local.put(id, data).await?;
        if pin {
            self.inner.pinned.write().expect("lock poisoned").insert(*id);
        }
        Ok(())
    }

    async fn has_block(&self, id: &ContentId) -> StoreResult<bool> {
        self.inner.local.contains(id).await
    }

    async fn remove_block(&self, id: &ContentId) -> StoreResult<()> {
        self.inner.pinned.write().expect("lock poisoned").remove(id);
        self.inner.local.delete(id).await
    }
}

impl std::fmt::Debug for PeerBlockService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerBlockService")
            .field("topic", &self.inner.topic)
            .field("peers", &self.peers().len())
            .field("inflight", &self.inflight())
            .finish()
    }
}
