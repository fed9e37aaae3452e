//! Reverse causal walk over the entry DAG.
//!
//! Candidates are ranked by [`compare_entries`], but an entry is only
//! yielded once every entry in the walk that links to it has been yielded.
//! Clock times never decrease from parent to child, so loading every
//! entry at or above a candidate's time is enough to find its children
//! without reading the whole log.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;

use weft_entry::Entry;
use weft_store::Storage;
use weft_types::ContentId;

use crate::error::{LogError, LogResult};

/// Walk of the log DAG in reverse causal order.
///
/// Entries come out newest first: a child always precedes its parents,
/// even when they share a clock time. Among entries whose children have
/// all been yielded, the highest clock time leads, then the highest clock
/// id, then the highest hash. Every hash is yielded at most once.
///
/// A traversal is a snapshot of its start hashes; create a new one to
/// restart.
pub struct Traversal {
    storage: Arc<dyn Storage>,
    /// Loaded entries not yet yielded.
    frontier: BinaryHeap<Queued>,
    unloaded: Vec<ContentId>,
    seen: HashSet<ContentId>,
    /// Entries whose links have been counted and queued.
    expanded: HashSet<ContentId>,
    /// Per hash, how many expanded entries still waiting to be yielded
    /// link to it.
    children: HashMap<ContentId, usize>,
}

/// Heap wrapper ordering entries by traversal priority.
struct Queued(Entry);

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_entries(&self.0, &other.0)
    }
}

/// Deterministic total order over entries: clock, then hash.
pub fn compare_entries(a: &Entry, b: &Entry) -> Ordering {
    a.clock.cmp(&b.clock).then_with(|| a.hash().cmp(&b.hash()))
}

impl Traversal {
    pub(crate) fn new(storage: Arc<dyn Storage>, start: Vec<ContentId>) -> Self {
        let mut seen = HashSet::new();
        let unloaded = start.into_iter().filter(|h| seen.insert(*h)).collect();
        Self {
            storage,
            frontier: BinaryHeap::new(),
            unloaded,
            seen,
            expanded: HashSet::new(),
            children: HashMap::new(),
        }
    }

    /// The next entry, or `None` when the walk is complete.
    pub async fn next(&mut self) -> LogResult<Option<Entry>> {
        loop {
            self.load_unloaded().await?;
            let Some(entry) = self.pop_ready() else {
                return Ok(None);
            };
            // Anything that could still link to `entry` sits at or above
            // its time. Expand those first and choose again if that
            // changed the picture.
            if self.expand_from(&entry) {
                self.frontier.push(Queued(entry));
                continue;
            }
            for link in unique_links(&entry) {
                if let Some(count) = self.children.get_mut(&link) {
                    *count = count.saturating_sub(1);
                }
            }
            return Ok(Some(entry));
        }
    }

    /// Drain the remaining walk.
    pub async fn collect(mut self) -> LogResult<Vec<Entry>> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next().await? {
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Highest ranked entry with no pending child. The links of the
    /// pending entries form a DAG, so one always exists while the
    /// frontier is not empty.
    fn pop_ready(&mut self) -> Option<Entry> {
        let mut waiting = Vec::new();
        let mut ready = None;
        while let Some(Queued(entry)) = self.frontier.pop() {
            if self.children.get(&entry.hash()).copied().unwrap_or(0) == 0 {
                ready = Some(entry);
                break;
            }
            waiting.push(Queued(entry));
        }
        self.frontier.extend(waiting);
        ready
    }

    /// Expand `candidate` and every pending entry at or above its time.
    /// Returns `true` if anything new was expanded.
    fn expand_from(&mut self, candidate: &Entry) -> bool {
        let time = candidate.clock.time;
        let mut targets = vec![candidate.clone()];
        targets.extend(
            self.frontier
                .iter()
                .filter(|q| q.0.clock.time >= time)
                .map(|q| q.0.clone()),
        );

        let mut changed = false;
        for entry in targets {
            if !self.expanded.insert(entry.hash()) {
                continue;
            }
            changed = true;
            for link in unique_links(&entry) {
                *self.children.entry(link).or_default() += 1;
                if self.seen.insert(link) {
                    self.unloaded.push(link);
                }
            }
        }
        changed
    }

    async fn load_unloaded(&mut self) -> LogResult<()> {
        for hash in std::mem::take(&mut self.unloaded) {
            let entry = load_entry(self.storage.as_ref(), &hash).await?;
            self.frontier.push(Queued(entry));
        }
        Ok(())
    }
}

fn unique_links(entry: &Entry) -> HashSet<ContentId> {
    entry.links().copied().collect()
}

/// Load and decode an entry that must be in storage.
pub(crate) async fn load_entry(storage: &dyn Storage, hash: &ContentId) -> LogResult<Entry> {
    let bytes = storage
        .get(hash)
        .await?
        .ok_or(LogError::MissingEntry(*hash))?;
    let entry = Entry::decode(&bytes)?;
    if entry.hash() != *hash {
        return Err(LogError::HashMismatch {
            expected: *hash,
            actual: entry.hash(),
        });
    }
    Ok(entry)
}
