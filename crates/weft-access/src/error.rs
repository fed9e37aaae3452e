use weft_identity::IdentityError;
use weft_store::StoreError;
use weft_types::ContentId;

/// Errors from access control operations.
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    /// No factory is registered for the controller type.
    #[error("unknown access controller type: {0}")]
    UnknownKind(String),

    #[error("access manifest not found: {0}")]
    ManifestNotFound(ContentId),

    /// The manifest names a different controller type than expected.
    #[error("manifest type mismatch: expected {expected}, found {actual}")]
    KindMismatch { expected: String, actual: String },

    #[error("manifest decode error: {0}")]
    Decode(String),

    #[error("manifest encode error: {0}")]
    Encode(String),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Resolving the writer identity failed.
    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),
}

/// Result alias for access control operations.
pub type AccessResult<T> = Result<T, AccessError>;
