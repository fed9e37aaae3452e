use weft_access::AccessError;
use weft_entry::EntryError;
use weft_store::StoreError;
use weft_types::ContentId;

/// Errors surfaced to the local caller of a log operation.
///
/// Faults in foreign entries are never errors; they are reported in a
/// [`JoinReport`](crate::JoinReport) instead.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// The access controller refused a local append.
    #[error("access denied for identity {identity}")]
    AccessDenied { identity: String },

    /// The log clock is at its maximum time, so no entry can follow it.
    #[error("clock of log {0} is exhausted")]
    ClockExhausted(String),

    /// An accepted entry is no longer in storage.
    #[error("entry {0} missing from storage")]
    MissingEntry(ContentId),

    /// Stored bytes do not hash to the key they were stored under.
    #[error("entry stored under {expected} hashes to {actual}")]
    HashMismatch {
        expected: ContentId,
        actual: ContentId,
    },

    #[error("entry error: {0}")]
    Entry(#[from] EntryError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("access controller error: {0}")]
    Access(#[from] AccessError),
}

/// Result alias for log operations.
pub type LogResult<T> = Result<T, LogError>;
