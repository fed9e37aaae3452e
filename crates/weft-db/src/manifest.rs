use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use weft_crypto::ContentHasher;
use weft_store::Storage;
use weft_types::ContentId;

use crate::error::{DbError, DbResult};

/// Address protocol prefix.
pub const ADDRESS_PREFIX: &str = "weft";

/// Database type written by [`Database`](crate::Database).
pub const EVENTLOG: &str = "eventlog";

/// Immutable description of a database.
///
/// The manifest is stored as a block; its hash is the database address, so
/// two replicas agree on a database exactly when they agree on its name,
/// type, access controller, and metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    pub kind: String,
    /// Address of the access controller manifest.
    pub access_controller: ContentId,
    pub meta: BTreeMap<String, String>,
}

impl Manifest {
    pub fn new(name: impl Into<String>, kind: impl Into<String>, access_controller: ContentId) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            access_controller,
            meta: BTreeMap::new(),
        }
    }

    pub fn with_meta(mut self, meta: BTreeMap<String, String>) -> Self {
        self.meta = meta;
        self
    }

    pub fn encode(&self) -> DbResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| DbError::Manifest(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> DbResult<Self> {
        bincode::deserialize(bytes).map_err(|e| DbError::Manifest(e.to_string()))
    }

    pub fn hash(&self) -> DbResult<ContentId> {
        Ok(ContentHasher::MANIFEST.hash(&self.encode()?))
    }

    /// Write the manifest, returning the database address.
    pub async fn store(&self, storage: &dyn Storage) -> DbResult<Address> {
        let bytes = self.encode()?;
        let hash = ContentHasher::MANIFEST.hash(&bytes);
        storage.put(&hash, Bytes::from(bytes)).await?;
        Ok(Address::new(hash))
    }

    /// Load the manifest behind `address`, checking its hash.
    pub async fn load(storage: &dyn Storage, address: &Address) -> DbResult<Self> {
        let hash = address.hash();
        let bytes = storage
            .get(&hash)
            .await?
            .ok_or(DbError::ManifestNotFound(hash))?;
        if !ContentHasher::MANIFEST.verify(&bytes, &hash) {
            return Err(DbError::Manifest(format!(
                "manifest bytes do not hash to {}",
                hash.short_hex()
            )));
        }
        Self::decode(&bytes)
    }
}

/// Database address: `/weft/<manifest hash>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(ContentId);

impl Address {
    pub fn new(manifest: ContentId) -> Self {
        Self(manifest)
    }

    /// Hash of the database manifest.
    pub fn hash(&self) -> ContentId {
        self.0
    }

    /// Parse `/weft/<hex>`. Backslash separators are accepted.
    pub fn parse(s: &str) -> DbResult<Self> {
        let normalized = s.trim().replace('\\', "/");
        let mut parts = normalized.split('/');
        let (Some(""), Some(ADDRESS_PREFIX), Some(hash), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(DbError::InvalidAddress(s.to_string()));
        };
        ContentId::from_hex(hash)
            .map(Self)
            .map_err(|_| DbError::InvalidAddress(s.to_string()))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{ADDRESS_PREFIX}/{}", self.0)
    }
}

impl FromStr for Address {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Whether `s` parses as a database address.
pub fn is_valid_address(s: &str) -> bool {
    Address::parse(s).is_ok()
}
