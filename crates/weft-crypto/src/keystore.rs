use std::collections::HashMap;
use std::sync::RwLock;

use tracing::debug;

use crate::signer::{SigningKey, VerifyingKey};

/// Errors from key store operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum KeyStoreError {
    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("key already exists: {0}")]
    KeyExists(String),

    #[error("key store unavailable: {0}")]
    Unavailable(String),
}

/// Source of signing key material, addressed by a caller-chosen id.
///
/// Identities allocate and load their keys through this contract; the core
/// never persists key material itself.
pub trait KeyStore: Send + Sync {
    /// Generate and store a new key under `id`, returning it.
    ///
    /// Fails with [`KeyStoreError::KeyExists`] if `id` is already taken.
    fn create_key(&self, id: &str) -> Result<SigningKey, KeyStoreError>;

    /// Load the key stored under `id`.
    fn get_key(&self, id: &str) -> Result<Option<SigningKey>, KeyStoreError>;

    /// Store externally generated key material under `id`.
    fn add_key(&self, id: &str, key: SigningKey) -> Result<(), KeyStoreError>;

    /// Check whether a key exists under `id`.
    fn has_key(&self, id: &str) -> Result<bool, KeyStoreError> {
        Ok(self.get_key(id)?.is_some())
    }

    /// The public half of a key.
    fn get_public(&self, key: &SigningKey) -> VerifyingKey {
        key.verifying_key()
    }

    /// Remove all keys.
    fn clear(&self) -> Result<(), KeyStoreError>;
}

/// In-memory key store for tests and embedding.
pub struct InMemoryKeyStore {
    keys: RwLock<HashMap<String, SigningKey>>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.keys.read().expect("lock poisoned").len()
    }

    /// Returns `true` if no keys are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyStore for InMemoryKeyStore {
    fn create_key(&self, id: &str) -> Result<SigningKey, KeyStoreError> {
        let mut keys = self.keys.write().expect("lock poisoned");
        if keys.contains_key(id) {
            return Err(KeyStoreError::KeyExists(id.to_string()));
        }
        let key = SigningKey::generate();
        keys.insert(id.to_string(), key.clone());
        debug!(id, "created key");
        Ok(key)
    }

    fn get_key(&self, id: &str) -> Result<Option<SigningKey>, KeyStoreError> {
        Ok(self.keys.read().expect("lock poisoned").get(id).cloned())
    }

    fn add_key(&self, id: &str, key: SigningKey) -> Result<(), KeyStoreError> {
        self.keys
            .write()
            .expect("lock poisoned")
            .insert(id.to_string(), key);
        Ok(())
    }

    fn clear(&self) -> Result<(), KeyStoreError> {
        self.keys.write().expect("lock poisoned").clear();
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryKeyStore")
            .field("key_count", &self.len())
            .finish()
    }
}
