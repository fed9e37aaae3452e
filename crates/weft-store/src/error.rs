use std::time::Duration;

use weft_types::ContentId;

/// Errors from storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested block was not found where it was required.
    #[error("block not found: {0}")]
    NotFound(ContentId),

    /// A remote fetch did not complete within its deadline.
    #[error("fetch of {id} timed out after {timeout:?}")]
    FetchTimeout { id: ContentId, timeout: Duration },

    /// Stored bytes failed their integrity check.
    #[error("corrupt block {id}: {reason}")]
    Corrupt { id: ContentId, reason: String },

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backend (or the network behind it) cannot serve requests.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Returns `true` for faults that may succeed on a later retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::FetchTimeout { .. } | Self::Unavailable(_))
    }
}

/// Result alias for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;
