use thiserror::Error;
use weft_log::{Deferred, LogError, Rejected};
use weft_protocol::ProtocolError;
use weft_store::StoreError;
use weft_types::{ContentId, PeerId};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("peer {0} is not subscribed to the topic")]
    PeerNotFound(PeerId),

    #[error("message for log {actual} received on log {expected}")]
    WrongLog { expected: String, actual: String },

    #[error("undecodable entry from peer: {0}")]
    Decode(String),

    #[error("entry {} deferred: {:?}", .0.hash.short_hex(), .0.reason)]
    Deferred(Deferred),

    #[error("entry {} rejected: {}", .0.hash.short_hex(), .0.reason)]
    Rejected(Rejected),

    /// The pending set is full; the deferred entry was not kept.
    #[error("pending set full, dropped entry {}", .0.short_hex())]
    PendingFull(ContentId),

    /// The entry was deferred on every retry and is no longer retried.
    #[error("gave up on entry {} after {attempts} attempts", .hash.short_hex())]
    RetriesExhausted { hash: ContentId, attempts: u32 },

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("log error: {0}")]
    Log(#[from] LogError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

pub type SyncResult<T> = Result<T, SyncError>;
