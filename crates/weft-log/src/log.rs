//! The replicated operation log.
//!
//! [`Log`] indexes accepted entry hashes and derives its heads and clock
//! from them; entry bytes stay in storage. Local writes go through
//! [`Log::append`], foreign entries through [`Log::join`].
//!
//! # Join pipeline
//!
//! 1. Resolve the closure: the entry plus every ancestor not yet accepted,
//!    looked up in the batch first and then in storage.
//! 2. Check clock causality across the closure: no entry is older than an
//!    entry it links to.
//! 3. Check each closure entry concurrently: log id, clock bound, writer
//!    identity and signature, then access.
//! 4. Accept the closure atomically under the writer lock.
//!
//! Foreign faults never surface as errors. They end up in a
//! [`JoinReport`] as deferred (retryable) or rejected (permanent).

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, RwLock};

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;
use weft_access::AccessController;
use weft_entry::Entry;
use weft_identity::{Identities, Identity, IdentityError};
use weft_store::Storage;
use weft_types::{Clock, ContentId, Payload};

use crate::error::{LogError, LogResult};
use crate::options::{IteratorOptions, LogOptions};
use crate::report::{DeferReason, Deferred, JoinOutcome, JoinRejection, JoinReport, Rejected};
use crate::traverse::{compare_entries, load_entry, Traversal};

/// Notification published after every state change.
#[derive(Clone, Debug)]
pub enum LogEvent {
    /// A local append.
    Appended(Entry),
    /// Foreign entries accepted by a join, oldest first.
    Joined(Vec<Entry>),
    Cleared,
}

/// Index of accepted hashes. Entry bytes live only in storage.
struct LogState {
    accepted: HashSet<ContentId>,
    /// Every hash named in an accepted entry's `next` or `refs`.
    referenced: HashSet<ContentId>,
    /// `accepted - referenced`, maintained incrementally.
    heads: BTreeSet<ContentId>,
    clock: Clock,
}

impl LogState {
    fn new(clock: Clock) -> Self {
        Self {
            accepted: HashSet::new(),
            referenced: HashSet::new(),
            heads: BTreeSet::new(),
            clock,
        }
    }

    /// Admit entries whose links are all accepted or among `entries`.
    /// Returns the entries that were not already present.
    fn accept<'a>(&mut self, entries: &'a [Entry]) -> Vec<&'a Entry> {
        let fresh: Vec<&Entry> = entries
            .iter()
            .filter(|e| !self.accepted.contains(&e.hash()))
            .collect();
        for entry in &fresh {
            self.accepted.insert(entry.hash());
            for link in entry.links() {
                self.referenced.insert(*link);
                self.heads.remove(link);
            }
            self.clock = self.clock.merge(&entry.clock);
        }
        for entry in &fresh {
            if !self.referenced.contains(&entry.hash()) {
                self.heads.insert(entry.hash());
            }
        }
        fresh
    }
}

/// Result of resolving an entry's unknown ancestors.
enum Closure {
    /// The entry plus every ancestor not yet in the log.
    Complete(Vec<Entry>),
    Missing {
        missing: Vec<ContentId>,
        error: Option<String>,
    },
    Invalid(JoinRejection),
}

enum Check {
    Pass,
    Reject(JoinRejection),
    Unavailable(String),
}

/// Replicated, causally ordered operation log.
///
/// The log is a DAG of signed entries. It keeps only an index of accepted
/// hashes, its heads, and its clock; entry bytes are resolved from storage
/// on demand. Local appends and foreign joins serialize on a single writer
/// lock, while fetching and verifying foreign entries runs outside it.
pub struct Log {
    id: String,
    identity: Identity,
    identities: Arc<Identities>,
    access: Arc<dyn AccessController>,
    storage: Arc<dyn Storage>,
    references_count: usize,
    state: RwLock<LogState>,
    writer: Mutex<()>,
    events: broadcast::Sender<LogEvent>,
}

impl Log {
    pub fn new(
        identities: Arc<Identities>,
        identity: Identity,
        access: Arc<dyn AccessController>,
        storage: Arc<dyn Storage>,
        options: LogOptions,
    ) -> Self {
        let id = options.id.unwrap_or_else(|| Uuid::now_v7().to_string());
        let (events, _) = broadcast::channel(options.channel_capacity.max(1));
        Self {
            state: RwLock::new(LogState::new(Clock::genesis(identity.id.clone()))),
            id,
            identity,
            identities,
            access,
            storage,
            references_count: options.references_count,
            writer: Mutex::new(()),
            events,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn access(&self) -> &Arc<dyn AccessController> {
        &self.access
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// The log's running clock: the writer's id at the maximum time seen.
    pub fn clock(&self) -> Clock {
        self.state.read().expect("lock poisoned").clock.clone()
    }

    /// Number of accepted entries.
    pub fn len(&self) -> usize {
        self.state.read().expect("lock poisoned").accepted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `hash` is an accepted entry.
    pub fn has(&self, hash: &ContentId) -> bool {
        self.state
            .read()
            .expect("lock poisoned")
            .accepted
            .contains(hash)
    }

    /// Head hashes in hash order.
    pub fn head_hashes(&self) -> Vec<ContentId> {
        self.state
            .read()
            .expect("lock poisoned")
            .heads
            .iter()
            .copied()
            .collect()
    }

    /// Subscribe to state change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.events.subscribe()
    }

    /// Head entries, newest first.
    pub async fn heads(&self) -> LogResult<Vec<Entry>> {
        let mut heads = Vec::new();
        for hash in self.head_hashes() {
            heads.push(load_entry(self.storage.as_ref(), &hash).await?);
        }
        heads.sort_by(|a, b| compare_entries(b, a));
        Ok(heads)
    }

    /// An accepted entry by hash.
    pub async fn get(&self, hash: &ContentId) -> LogResult<Option<Entry>> {
        if !self.has(hash) {
            return Ok(None);
        }
        load_entry(self.storage.as_ref(), hash).await.map(Some)
    }

    /// Walk the whole log from the current heads, newest first.
    pub fn traverse(&self) -> Traversal {
        Traversal::new(self.storage.clone(), self.head_hashes())
    }

    /// Walk from the given entries, newest first.
    pub fn traverse_from(&self, start: Vec<ContentId>) -> Traversal {
        Traversal::new(self.storage.clone(), start)
    }

    /// Every entry, oldest first.
    pub async fn values(&self) -> LogResult<Vec<Entry>> {
        let mut entries = self.traverse().collect().await?;
        entries.reverse();
        Ok(entries)
    }

    /// Entries between bounds, newest first.
    pub async fn iterator(&self, options: IteratorOptions) -> LogResult<Vec<Entry>> {
        let amount = options.amount.unwrap_or(usize::MAX);
        if amount == 0 {
            return Ok(Vec::new());
        }
        let excluded: HashSet<ContentId> = options.lt.iter().flatten().copied().collect();
        let start = options
            .lte
            .or(options.lt)
            .unwrap_or_else(|| self.head_hashes());

        let mut traversal = self.traverse_from(start);
        let mut entries = Vec::new();
        while let Some(entry) = traversal.next().await? {
            let hash = entry.hash();
            if options.gt == Some(hash) {
                break;
            }
            if excluded.contains(&hash) {
                continue;
            }
            entries.push(entry);
            if options.gte == Some(hash) || entries.len() >= amount {
                break;
            }
        }
        Ok(entries)
    }

    /// Skip-list references for a new entry on top of `heads`: the entries
    /// at traversal distances 2, 4, 8, ... up to `amount`, excluding the
    /// heads themselves.
    pub async fn references(&self, heads: &[ContentId], amount: usize) -> LogResult<Vec<ContentId>> {
        let mut traversal = self.traverse_from(heads.to_vec());
        let mut refs = Vec::new();
        let mut distance = 0usize;
        let mut target = 2usize;
        while target <= amount {
            let Some(entry) = traversal.next().await? else {
                break;
            };
            distance += 1;
            if distance == target {
                if !heads.contains(&entry.hash()) {
                    refs.push(entry.hash());
                }
                target = target.saturating_mul(2);
            }
        }
        Ok(refs)
    }

    /// Append a local operation.
    ///
    /// The new entry links to every current head and ticks the clock. If
    /// the access controller refuses it, nothing is stored and the log is
    /// unchanged. Fails with [`LogError::ClockExhausted`] once the clock
    /// has reached its maximum time.
    pub async fn append(&self, payload: Payload) -> LogResult<Entry> {
        let _writer = self.writer.lock().await;

        let next: Vec<ContentId> = self.heads().await?.iter().map(Entry::hash).collect();
        let refs = self.references(&next, self.references_count).await?;
        let clock = self
            .clock()
            .tick()
            .ok_or_else(|| LogError::ClockExhausted(self.id.clone()))?;
        let entry = Entry::create(
            &self.identities,
            &self.identity,
            self.id.clone(),
            payload,
            Some(clock),
            next,
            refs,
        )?;

        if !self.access.can_append(&entry).await? {
            warn!(log = %self.id, identity = %self.identity.id, "append denied");
            return Err(LogError::AccessDenied {
                identity: self.identity.id.clone(),
            });
        }

        self.storage.put(&entry.hash(), entry.encode()?).await?;
        self.state
            .write()
            .expect("lock poisoned")
            .accept(std::slice::from_ref(&entry));

        debug!(
            log = %self.id,
            hash = %entry.hash().short_hex(),
            clock = %entry.clock,
            next = entry.next.len(),
            refs = entry.refs.len(),
            "appended entry"
        );
        let _ = self.events.send(LogEvent::Appended(entry.clone()));
        Ok(entry)
    }

    /// Join foreign entries.
    ///
    /// Entries may arrive in any order: each is joined together with its
    /// unknown ancestors, which are looked up first among `entries` and
    /// then in storage. Joining repeats until no further entry can be
    /// accepted. Only local storage failures are errors; every foreign
    /// fault lands in the report.
    pub async fn join(&self, entries: impl IntoIterator<Item = Entry>) -> LogResult<JoinReport> {
        let mut pending: BTreeMap<ContentId, Entry> = entries
            .into_iter()
            .filter(|e| !self.has(&e.hash()))
            .map(|e| (e.hash(), e))
            .collect();
        let batch: HashMap<ContentId, Entry> =
            pending.iter().map(|(h, e)| (*h, e.clone())).collect();

        let mut report = JoinReport::default();
        loop {
            let mut progressed = false;
            let mut retry = BTreeMap::new();
            let mut deferred = Vec::new();
            for (hash, entry) in std::mem::take(&mut pending) {
                match self.join_with(entry.clone(), &batch).await? {
                    JoinOutcome::Deferred(d) => {
                        retry.insert(hash, entry);
                        deferred.push(d);
                    }
                    JoinOutcome::Accepted(hashes) => {
                        progressed = true;
                        report.accepted.extend(hashes);
                    }
                    outcome => report.absorb(outcome),
                }
            }
            if retry.is_empty() || !progressed {
                report.deferred = deferred;
                break;
            }
            pending = retry;
        }

        if !report.accepted.is_empty() || !report.rejected.is_empty() {
            info!(
                log = %self.id,
                accepted = report.accepted.len(),
                deferred = report.deferred.len(),
                rejected = report.rejected.len(),
                "joined entries"
            );
        }
        Ok(report)
    }

    /// Join a single foreign entry, fetching its unknown ancestors through
    /// storage.
    pub async fn join_entry(&self, entry: Entry) -> LogResult<JoinOutcome> {
        self.join_with(entry, &HashMap::new()).await
    }

    async fn join_with(
        &self,
        entry: Entry,
        batch: &HashMap<ContentId, Entry>,
    ) -> LogResult<JoinOutcome> {
        let hash = entry.hash();
        if self.has(&hash) {
            return Ok(JoinOutcome::Known);
        }

        let mut closure = match self.resolve_closure(entry, batch).await {
            Closure::Complete(closure) => closure,
            Closure::Missing { missing, error } => {
                debug!(
                    log = %self.id,
                    hash = %hash.short_hex(),
                    missing = missing.len(),
                    error = error.as_deref().unwrap_or(""),
                    "deferred entry with missing ancestors"
                );
                return Ok(JoinOutcome::Deferred(Deferred {
                    hash,
                    reason: DeferReason::MissingAncestors(missing),
                }));
            }
            Closure::Invalid(reason) => {
                warn!(log = %self.id, hash = %hash.short_hex(), %reason, "rejected entry");
                return Ok(JoinOutcome::Rejected(Rejected { hash, reason }));
            }
        };

        let check = match self.check_causality(&closure).await {
            Check::Pass => self.check_closure(&closure).await,
            failed => failed,
        };
        match check {
            Check::Pass => {}
            Check::Reject(reason) => {
                warn!(log = %self.id, hash = %hash.short_hex(), %reason, "rejected entry");
                return Ok(JoinOutcome::Rejected(Rejected { hash, reason }));
            }
            Check::Unavailable(reason) => {
                debug!(log = %self.id, hash = %hash.short_hex(), %reason, "deferred entry");
                return Ok(JoinOutcome::Deferred(Deferred {
                    hash,
                    reason: DeferReason::Unavailable(reason),
                }));
            }
        }

        closure.sort_by(compare_entries);
        for entry in &closure {
            self.storage.put(&entry.hash(), entry.encode()?).await?;
        }

        let _writer = self.writer.lock().await;
        let accepted: Vec<Entry> = {
            let mut state = self.state.write().expect("lock poisoned");
            let in_closure: HashSet<ContentId> = closure.iter().map(Entry::hash).collect();
            let dangling: Vec<ContentId> = closure
                .iter()
                .flat_map(Entry::links)
                .filter(|l| !in_closure.contains(*l) && !state.accepted.contains(*l))
                .copied()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            if !dangling.is_empty() {
                return Ok(JoinOutcome::Deferred(Deferred {
                    hash,
                    reason: DeferReason::MissingAncestors(dangling),
                }));
            }
            state.accept(&closure).into_iter().cloned().collect()
        };

        if accepted.is_empty() {
            return Ok(JoinOutcome::Known);
        }
        debug!(
            log = %self.id,
            hash = %hash.short_hex(),
            accepted = accepted.len(),
            "joined entry"
        );
        let hashes = accepted.iter().map(Entry::hash).collect();
        let _ = self.events.send(LogEvent::Joined(accepted));
        Ok(JoinOutcome::Accepted(hashes))
    }

    /// Collect `entry` and every transitive ancestor not yet accepted,
    /// fetching each level of the frontier concurrently.
    async fn resolve_closure(&self, entry: Entry, batch: &HashMap<ContentId, Entry>) -> Closure {
        let mut closure: HashMap<ContentId, Entry> = HashMap::new();
        let mut missing = BTreeSet::new();
        let mut last_error = None;
        let mut frontier = vec![entry.clone()];
        closure.insert(entry.hash(), entry);

        while !frontier.is_empty() {
            let mut wanted = BTreeSet::new();
            let mut next_frontier = Vec::new();
            for current in frontier.drain(..) {
                for link in current.links() {
                    if closure.contains_key(link) || wanted.contains(link) || self.has(link) {
                        continue;
                    }
                    if let Some(known) = batch.get(link) {
                        closure.insert(*link, known.clone());
                        next_frontier.push(known.clone());
                    } else {
                        wanted.insert(*link);
                    }
                }
            }

            let mut fetches = JoinSet::new();
            for hash in wanted {
                let storage = self.storage.clone();
                fetches.spawn(async move { (hash, storage.get(&hash).await) });
            }
            while let Some(joined) = fetches.join_next().await {
                let (hash, fetched) = match joined {
                    Ok(result) => result,
                    Err(e) => {
                        last_error = Some(e.to_string());
                        continue;
                    }
                };
                match fetched {
                    Ok(Some(bytes)) => {
                        let ancestor = match Entry::decode(&bytes) {
                            Ok(ancestor) => ancestor,
                            Err(e) => {
                                return Closure::Invalid(JoinRejection::Decode {
                                    hash,
                                    reason: e.to_string(),
                                })
                            }
                        };
                        if ancestor.hash() != hash {
                            return Closure::Invalid(JoinRejection::HashMismatch {
                                expected: hash,
                                actual: ancestor.hash(),
                            });
                        }
                        closure.insert(hash, ancestor.clone());
                        next_frontier.push(ancestor);
                    }
                    Ok(None) => {
                        missing.insert(hash);
                    }
                    Err(e) => {
                        missing.insert(hash);
                        last_error = Some(e.to_string());
                    }
                }
            }
            frontier = next_frontier;
        }

        if missing.is_empty() {
            Closure::Complete(closure.into_values().collect())
        } else {
            Closure::Missing {
                missing: missing.into_iter().collect(),
                error: last_error,
            }
        }
    }

    /// Reject a closure in which an entry's clock time is below one of the
    /// entries it links to. Equal times are allowed.
    async fn check_causality(&self, closure: &[Entry]) -> Check {
        let times: HashMap<ContentId, u64> =
            closure.iter().map(|e| (e.hash(), e.clock.time)).collect();
        for entry in closure {
            for link in entry.links() {
                let parent_time = match times.get(link) {
                    Some(time) => *time,
                    None => match load_entry(self.storage.as_ref(), link).await {
                        Ok(parent) => parent.clock.time,
                        Err(e) => return Check::Unavailable(e.to_string()),
                    },
                };
                if entry.clock.time < parent_time {
                    return Check::Reject(JoinRejection::ClockRegression {
                        hash: entry.hash(),
                        parent: *link,
                    });
                }
            }
        }
        Check::Pass
    }

    /// Verify every entry of a closure concurrently: log id, signature and
    /// identity, then access.
    async fn check_closure(&self, closure: &[Entry]) -> Check {
        let mut checks = JoinSet::new();
        for entry in closure.iter().cloned() {
            let identities = self.identities.clone();
            let access = self.access.clone();
            let log_id = self.id.clone();
            checks.spawn(async move {
                let hash = entry.hash();
                if entry.id != log_id {
                    return Check::Reject(JoinRejection::WrongLog {
                        hash,
                        log_id: entry.id.clone(),
                    });
                }
                if entry.clock.is_exhausted() {
                    return Check::Reject(JoinRejection::ClockOverflow(hash));
                }
                // A writer identity that cannot be fetched yet defers the
                // entry instead of failing its verification.
                match identities.get_identity(&entry.identity).await {
                    Err(IdentityError::Store(e)) => return Check::Unavailable(e.to_string()),
                    Ok(Some(_)) => {}
                    Ok(None) | Err(_) => return Check::Reject(JoinRejection::Verification(hash)),
                }
                if !Entry::verify(identities.as_ref(), &entry).await {
                    return Check::Reject(JoinRejection::Verification(hash));
                }
                match access.can_append(&entry).await {
                    Ok(true) => Check::Pass,
                    Ok(false) => Check::Reject(JoinRejection::AccessDenied(hash)),
                    Err(e) => Check::Unavailable(e.to_string()),
                }
            });
        }

        let mut unavailable = None;
        while let Some(joined) = checks.join_next().await {
            match joined {
                Ok(Check::Pass) => {}
                Ok(Check::Reject(reason)) => return Check::Reject(reason),
                Ok(Check::Unavailable(reason)) => unavailable = Some(reason),
                Err(e) => unavailable = Some(e.to_string()),
            }
        }
        match unavailable {
            Some(reason) => Check::Unavailable(reason),
            None => Check::Pass,
        }
    }

    /// Rebuild the index from entries already in storage, starting at
    /// `heads`. Returns the number of entries loaded.
    pub async fn restore(&self, heads: &[ContentId]) -> LogResult<usize> {
        let _writer = self.writer.lock().await;
        let entries = self.traverse_from(heads.to_vec()).collect().await?;
        let loaded = self
            .state
            .write()
            .expect("lock poisoned")
            .accept(&entries)
            .len();
        info!(log = %self.id, loaded, heads = heads.len(), "restored log");
        Ok(loaded)
    }

    /// Forget every entry and clear entry storage.
    pub async fn clear(&self) -> LogResult<()> {
        let _writer = self.writer.lock().await;
        self.storage.clear().await?;
        *self.state.write().expect("lock poisoned") =
            LogState::new(Clock::genesis(self.identity.id.clone()));
        info!(log = %self.id, "cleared log");
        let _ = self.events.send(LogEvent::Cleared);
        Ok(())
    }
}

impl std::fmt::Debug for Log {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read().expect("lock poisoned");
        f.debug_struct("Log")
            .field("id", &self.id)
            .field("len", &state.accepted.len())
            .field("heads", &state.heads.len())
            .field("clock", &state.clock)
            .finish()
    }
}
