use std::path::PathBuf;

use thiserror::Error;
use weft_access::AccessError;
use weft_identity::IdentityError;
use weft_log::LogError;
use weft_store::StoreError;
use weft_sync::SyncError;
use weft_types::ContentId;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("invalid database address: {0}")]
    InvalidAddress(String),

    #[error("manifest {} not found", .0.short_hex())]
    ManifestNotFound(ContentId),

    #[error("manifest error: {0}")]
    Manifest(String),

    #[error("config error in {path:?}: {reason}")]
    Config { path: Option<PathBuf>, reason: String },

    #[error("heads file error: {0}")]
    Heads(String),

    #[error("database {0} is closed")]
    Closed(String),

    #[error("access error: {0}")]
    Access(#[from] AccessError),

    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("log error: {0}")]
    Log(#[from] LogError),

    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type DbResult<T> = Result<T, DbError>;
