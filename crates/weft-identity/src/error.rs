use weft_crypto::KeyStoreError;
use weft_store::StoreError;
use weft_types::ContentId;

/// Errors from identity operations.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// No private key is available for the identity.
    #[error("no signing key for identity {0}")]
    KeyNotFound(String),

    #[error("key store error: {0}")]
    KeyStore(#[from] KeyStoreError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Stored bytes are not a well-formed identity record.
    #[error("identity decode error: {0}")]
    Decode(String),

    #[error("identity encode error: {0}")]
    Encode(String),

    /// A record resolved under one hash hashes to another.
    #[error("identity hash mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        expected: ContentId,
        actual: ContentId,
    },

    /// The record's self-signatures do not check out.
    #[error("invalid identity: {0}")]
    Invalid(String),
}

/// Result alias for identity operations.
pub type IdentityResult<T> = Result<T, IdentityError>;
