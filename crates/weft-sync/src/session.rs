use std::fmt;

use tokio::task::JoinSet;
use weft_types::ContentId;

/// Replication progress with one peer.
///
/// `Idle` returns to `Syncing` whenever the peer announces new entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PeerState {
    Disconnected,
    /// Our heads were sent; theirs have not arrived.
    Announcing,
    /// Their heads arrived and are about to be joined.
    HeadsExchanged,
    /// Entries from the peer are being fetched and joined.
    Syncing,
    Idle,
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Announcing => "announcing",
            Self::HeadsExchanged => "heads-exchanged",
            Self::Syncing => "syncing",
            Self::Idle => "idle",
        };
        f.write_str(name)
    }
}

/// Ephemeral per-peer state. Dropping it aborts the peer's join tasks.
pub(crate) struct PeerSession {
    pub(crate) state: PeerState,
    /// Head hashes the peer last announced.
    pub(crate) heads: Vec<ContentId>,
    /// Join tasks still running for this peer.
    pub(crate) active: usize,
    pub(crate) tasks: JoinSet<()>,
}

impl PeerSession {
    pub(crate) fn new(state: PeerState) -> Self {
        Self {
            state,
            heads: Vec::new(),
            active: 0,
            tasks: JoinSet::new(),
        }
    }
}
