use weft_identity::IdentityError;

/// Errors from entry operations.
#[derive(Debug, thiserror::Error)]
pub enum EntryError {
    /// The writer's signing key is unavailable.
    #[error("signing error: {0}")]
    Signing(#[source] IdentityError),

    /// Bytes are not a well-formed entry.
    #[error("decode error: {0}")]
    Decode(String),

    #[error("encode error: {0}")]
    Encode(String),
}

/// Result alias for entry operations.
pub type EntryResult<T> = Result<T, EntryError>;
