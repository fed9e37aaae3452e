//! Replication of one log with every peer on its topic.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use weft_entry::Entry;
use weft_log::{JoinReport, Log};
use weft_protocol::{SyncCodec, SyncMessage};
use weft_types::{ContentId, PeerId};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::session::{PeerSession, PeerState};
use crate::transport::{Transport, TransportEvent};

/// Replication notifications.
#[derive(Clone, Debug)]
pub enum SyncEvent {
    /// A peer announced its heads.
    Join { peer: PeerId, heads: Vec<Entry> },
    Leave { peer: PeerId },
    /// Entries were joined into the log. `peer` is `None` for retries.
    Synced {
        peer: Option<PeerId>,
        accepted: Vec<ContentId>,
    },
    /// A recoverable fault with foreign data or the network.
    Error {
        peer: Option<PeerId>,
        error: Arc<SyncError>,
    },
}

struct Runner {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// A deferred entry and how many joins have deferred it.
struct PendingEntry {
    entry: Entry,
    attempts: u32,
}

struct Inner {
    log: Arc<Log>,
    transport: Arc<dyn Transport>,
    topic: String,
    config: SyncConfig,
    sessions: Mutex<BTreeMap<PeerId, PeerSession>>,
    /// Announced entries that could not be joined yet, retried on a timer.
    pending: Mutex<BTreeMap<ContentId, PendingEntry>>,
    retrying: AtomicBool,
    events: broadcast::Sender<SyncEvent>,
}

/// Keeps one [`Log`] converged with every peer on its topic.
///
/// On start the engine joins the topic named by the log id. Each new peer
/// is sent our heads; heads or updates received from a peer are joined in
/// a per-peer task, which fetches missing ancestors through the log's
/// storage. Entries that cannot be joined yet are kept and retried every
/// `retry_interval`, up to `max_pending` entries for at most
/// `max_retry_rounds` deferrals each. A peer leaving aborts its tasks, cancelling any fetch
/// in flight; already joined entries stay.
pub struct SyncEngine {
    inner: Arc<Inner>,
    runner: tokio::sync::Mutex<Option<Runner>>,
}

impl SyncEngine {
    pub fn new(log: Arc<Log>, transport: Arc<dyn Transport>, config: SyncConfig) -> Self {
        let (events, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                topic: log.id().to_string(),
                log,
                transport,
                config,
                sessions: Mutex::new(BTreeMap::new()),
                pending: Mutex::new(BTreeMap::new()),
                retrying: AtomicBool::new(false),
                events,
            }),
            runner: tokio::sync::Mutex::new(None),
        }
    }

    pub fn log(&self) -> &Arc<Log> {
        &self.inner.log
    }

    /// The transport topic, equal to the log id.
    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    /// Join the topic and start replicating. Starting twice is a no-op.
    pub async fn start(&self) -> SyncResult<()> {
        let mut runner = self.runner.lock().await;
        if runner.is_some() {
            return Ok(());
        }
        let events = self.inner.transport.subscribe(&self.inner.topic).await?;
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.inner.clone().run(events, shutdown_rx));
        *runner = Some(Runner { shutdown, task });
        info!(topic = %self.inner.topic, peer = %self.inner.transport.local_peer(), "sync started");
        Ok(())
    }

    /// Leave the topic and drop every peer session.
    pub async fn stop(&self) -> SyncResult<()> {
        let Some(runner) = self.runner.lock().await.take() else {
            return Ok(());
        };
        let _ = runner.shutdown.send(true);
        let _ = runner.task.await;
        self.inner.sessions.lock().expect("lock poisoned").clear();
        self.inner.transport.unsubscribe(&self.inner.topic).await?;
        info!(topic = %self.inner.topic, "sync stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.runner.lock().await.is_some()
    }

    /// Persist a locally produced entry and announce it to every peer.
    pub async fn add(&self, entry: &Entry) -> SyncResult<()> {
        let bytes = entry.encode().map_err(weft_log::LogError::from)?;
        self.inner.log.storage().put(&entry.hash(), bytes.clone()).await?;
        let msg = SyncMessage::Update {
            log_id: self.inner.topic.clone(),
            entry: bytes.to_vec(),
        };
        let frame = SyncCodec::encode(&msg)?;
        self.inner
            .transport
            .publish(&self.inner.topic, Bytes::from(frame))
            .await?;
        debug!(hash = %entry.hash().short_hex(), "published entry");
        Ok(())
    }

    /// Peers with a live session, sorted.
    pub fn peers(&self) -> Vec<PeerId> {
        self.inner
            .sessions
            .lock()
            .expect("lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    pub fn peer_state(&self, peer: &PeerId) -> PeerState {
        self.inner
            .sessions
            .lock()
            .expect("lock poisoned")
            .get(peer)
            .map(|s| s.state)
            .unwrap_or(PeerState::Disconnected)
    }

    /// Heads the peer last announced.
    pub fn peer_heads(&self, peer: &PeerId) -> Vec<ContentId> {
        self.inner
            .sessions
            .lock()
            .expect("lock poisoned")
            .get(peer)
            .map(|s| s.heads.clone())
            .unwrap_or_default()
    }

    /// Entries waiting for missing ancestors.
    pub fn pending(&self) -> Vec<ContentId> {
        self.inner
            .pending
            .lock()
            .expect("lock poisoned")
            .keys()
            .copied()
            .collect()
    }

    /// Retry pending entries now instead of waiting for the timer.
    pub async fn retry_pending(&self) -> SyncResult<JoinReport> {
        self.inner.retry_pending().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        if let Some(runner) = self.runner.get_mut().take() {
            runner.task.abort();
        }
        if let Ok(mut sessions) = self.inner.sessions.lock() {
            sessions.clear();
        }
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("topic", &self.inner.topic)
            .field("peers", &self.peers())
            .field("pending", &self.pending().len())
            .finish()
    }
}

impl Inner {
    async fn run(
        self: Arc<Self>,
        mut events: mpsc::Receiver<TransportEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut retry = tokio::time::interval(self.config.retry_interval);
        retry.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        warn!(topic = %self.topic, "transport closed the topic");
                        break;
                    }
                },
                _ = retry.tick() => self.spawn_retry(),
                _ = shutdown.changed() => break,
            }
        }
        debug!(topic = %self.topic, "sync loop exited");
    }

    fn emit(&self, event: SyncEvent) {
        let _ = self.events.send(event);
    }

    fn emit_error(&self, peer: Option<PeerId>, error: SyncError) {
        warn!(
            topic = %self.topic,
            peer = peer.as_ref().map(PeerId::as_str).unwrap_or("-"),
            %error,
            "sync error"
        );
        self.emit(SyncEvent::Error {
            peer,
            error: Arc::new(error),
        });
    }

    async fn handle_event(self: &Arc<Self>, event: TransportEvent) {
        match event {
            TransportEvent::PeerJoined(peer) => {
                self.sessions
                    .lock()
                    .expect("lock poisoned")
                    .entry(peer.clone())
                    .or_insert_with(|| PeerSession::new(PeerState::Announcing));
                debug!(%peer, topic = %self.topic, "peer joined");
                if let Err(e) = self.announce(&peer).await {
                    self.emit_error(Some(peer), e);
                }
            }
            TransportEvent::PeerLeft(peer) => {
                let removed = self.sessions.lock().expect("lock poisoned").remove(&peer);
                if removed.is_some() {
                    info!(%peer, topic = %self.topic, "peer left");
                    self.emit(SyncEvent::Leave { peer });
                }
            }
            TransportEvent::Message { from, data } => self.handle_message(from, data),
        }
    }

    async fn announce(&self, peer: &PeerId) -> SyncResult<()> {
        let mut heads = Vec::new();
        for head in self.log.heads().await? {
            heads.push(head.encode().map_err(weft_log::LogError::from)?.to_vec());
        }
        let count = heads.len();
        let frame = SyncCodec::encode(&SyncMessage::Heads {
            log_id: self.topic.clone(),
            heads,
        })?;
        self.transport
            .send(peer, &self.topic, Bytes::from(frame))
            .await?;
        debug!(%peer, heads = count, "sent heads");
        Ok(())
    }

    fn handle_message(self: &Arc<Self>, from: PeerId, data: Bytes) {
        let msg = match SyncCodec::decode(&data) {
            Ok((msg, _)) => msg,
            Err(e) => return self.emit_error(Some(from), e.into()),
        };
        match msg {
            SyncMessage::Heads { log_id, heads } => {
                if let Err(e) = self.check_log(&log_id) {
                    return self.emit_error(Some(from), e);
                }
                let entries = self.decode_entries(&from, heads);
                {
                    let mut sessions = self.sessions.lock().expect("lock poisoned");
                    let session = sessions
                        .entry(from.clone())
                        .or_insert_with(|| PeerSession::new(PeerState::HeadsExchanged));
                    session.state = PeerState::HeadsExchanged;
                    session.heads = entries.iter().map(Entry::hash).collect();
                }
                debug!(peer = %from, heads = entries.len(), "received heads");
                self.emit(SyncEvent::Join {
                    peer: from.clone(),
                    heads: entries.clone(),
                });
                self.spawn_join(from, entries);
            }
            SyncMessage::Update { log_id, entry } => {
                if let Err(e) = self.check_log(&log_id) {
                    return self.emit_error(Some(from), e);
                }
                let entries = self.decode_entries(&from, vec![entry]);
                self.spawn_join(from, entries);
            }
            other => debug!(peer = %from, kind = other.type_name(), "ignored message on log topic"),
        }
    }

    fn check_log(&self, log_id: &str) -> SyncResult<()> {
        if log_id == self.topic {
            Ok(())
        } else {
            Err(SyncError::WrongLog {
                expected: self.topic.clone(),
                actual: log_id.to_string(),
            })
        }
    }

    fn decode_entries(&self, from: &PeerId, encoded: Vec<Vec<u8>>) -> Vec<Entry> {
        let mut entries = Vec::with_capacity(encoded.len());
        for bytes in encoded {
            match Entry::decode(&bytes) {
                Ok(entry) => entries.push(entry),
                Err(e) => self.emit_error(Some(from.clone()), SyncError::Decode(e.to_string())),
            }
        }
        entries
    }

    /// Join entries announced by `peer` in a task owned by its session.
    fn spawn_join(self: &Arc<Self>, peer: PeerId, entries: Vec<Entry>) {
        if entries.is_empty() {
            return;
        }
        let mut sessions = self.sessions.lock().expect("lock poisoned");
        let session = sessions
            .entry(peer.clone())
            .or_insert_with(|| PeerSession::new(PeerState::HeadsExchanged));
        while session.tasks.try_join_next().is_some() {}
        session.active += 1;
        session.state = PeerState::Syncing;
        session.tasks.spawn(self.clone().join_from(peer, entries));
    }

    async fn join_from(self: Arc<Self>, peer: PeerId, entries: Vec<Entry>) {
        let candidates: BTreeMap<ContentId, Entry> =
            entries.into_iter().map(|e| (e.hash(), e)).collect();
        match self.log.join(candidates.values().cloned()).await {
            Ok(report) => self.absorb_report(Some(peer.clone()), &candidates, report),
            Err(e) => self.emit_error(Some(peer.clone()), e.into()),
        }

        let mut sessions = self.sessions.lock().expect("lock poisoned");
        if let Some(session) = sessions.get_mut(&peer) {
            session.active = session.active.saturating_sub(1);
            if session.active == 0 {
                session.state = PeerState::Idle;
            }
        }
    }

    /// Record a join's outcome: deferred candidates become pending, joined
    /// or rejected ones stop being pending. Entries deferred too often, or
    /// arriving while the pending set is full, are dropped.
    fn absorb_report(
        &self,
        peer: Option<PeerId>,
        candidates: &BTreeMap<ContentId, Entry>,
        report: JoinReport,
    ) {
        let mut dropped = Vec::new();
        {
            let mut pending = self.pending.lock().expect("lock poisoned");
            for hash in &report.accepted {
                pending.remove(hash);
            }
            for rejected in &report.rejected {
                pending.remove(&rejected.hash);
            }
            for deferred in &report.deferred {
                let hash = deferred.hash;
                if let Some(waiting) = pending.get_mut(&hash) {
                    waiting.attempts += 1;
                    if waiting.attempts > self.config.max_retry_rounds {
                        let attempts = waiting.attempts;
                        pending.remove(&hash);
                        dropped.push(SyncError::RetriesExhausted { hash, attempts });
                    }
                } else if let Some(entry) = candidates.get(&hash) {
                    if pending.len() >= self.config.max_pending {
                        dropped.push(SyncError::PendingFull(hash));
                    } else {
                        pending.insert(
                            hash,
                            PendingEntry {
                                entry: entry.clone(),
                                attempts: 1,
                            },
                        );
                    }
                }
            }
        }
        for error in dropped {
            warn!(topic = %self.topic, %error, "dropped pending entry");
            self.emit_error(peer.clone(), error);
        }

        if !report.accepted.is_empty() {
            debug!(
                peer = peer.as_ref().map(PeerId::as_str).unwrap_or("-"),
                accepted = report.accepted.len(),
                "synced entries"
            );
            self.emit(SyncEvent::Synced {
                peer: peer.clone(),
                accepted: report.accepted,
            });
        }
        for deferred in report.deferred {
            self.emit_error(peer.clone(), SyncError::Deferred(deferred));
        }
        for rejected in report.rejected {
            self.emit_error(peer.clone(), SyncError::Rejected(rejected));
        }
    }

    fn spawn_retry(self: &Arc<Self>) {
        if self.pending.lock().expect("lock poisoned").is_empty() {
            return;
        }
        if self.retrying.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = self.clone();
        tokio::spawn(async move {
            if let Err(e) = inner.retry_pending().await {
                inner.emit_error(None, e);
            }
            inner.retrying.store(false, Ordering::SeqCst);
        });
    }

    async fn retry_pending(&self) -> SyncResult<JoinReport> {
        let candidates: BTreeMap<ContentId, Entry> = self
            .pending
            .lock()
            .expect("lock poisoned")
            .iter()
            .map(|(hash, waiting)| (*hash, waiting.entry.clone()))
            .collect();
        if candidates.is_empty() {
            return Ok(JoinReport::default());
        }
        let known: HashSet<ContentId> = candidates
            .keys()
            .filter(|h| self.log.has(h))
            .copied()
            .collect();
        self.pending
            .lock()
            .expect("lock poisoned")
            .retain(|h, _| !known.contains(h));

        debug!(topic = %self.topic, pending = candidates.len(), "retrying pending entries");
        let report = self.log.join(candidates.values().cloned()).await?;
        self.absorb_report(None, &candidates, report.clone());
        Ok(report)
    }
}
