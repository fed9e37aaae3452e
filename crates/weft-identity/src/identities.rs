//! Creating, signing with, and verifying identities.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use tracing::{debug, warn};
use weft_crypto::{KeyStore, Signature, SigningKey, VerifyingKey};
use weft_store::Storage;
use weft_types::ContentId;

use crate::error::{IdentityError, IdentityResult};
use crate::identity::{Identity, IdentitySignatures, IDENTITY_KIND};
use crate::resolver::IdentityResolver;

/// Number of verified identity hashes remembered.
const VERIFIED_CACHE_SIZE: usize = 1000;

/// Identity service: creates identities through a key store, stores and
/// resolves identity records, and signs on their behalf.
pub struct Identities {
    keystore: Arc<dyn KeyStore>,
    storage: Arc<dyn Storage>,
    verified: Mutex<LruCache<ContentId, ()>>,
}

impl Identities {
    pub fn new(keystore: Arc<dyn KeyStore>, storage: Arc<dyn Storage>) -> Self {
        let capacity = NonZeroUsize::new(VERIFIED_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN);
        Self {
            keystore,
            storage,
            verified: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn keystore(&self) -> &Arc<dyn KeyStore> {
        &self.keystore
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Create (or reload) the identity for `id`.
    ///
    /// The id key is stored under `id`; the entry-signing key is stored
    /// under the resulting identity id. Calling this twice with the same
    /// key store yields the same identity.
    pub async fn create_identity(&self, id: &str) -> IdentityResult<Identity> {
        let id_key = self.load_or_create(id)?;
        let identity_id = self.keystore.get_public(&id_key).to_hex();
        let signing_key = self.load_or_create(&identity_id)?;

        let id_signature = signing_key.sign(identity_id.as_bytes());
        let public_key = self.keystore.get_public(&signing_key);
        let pk_signature = id_key.sign(&Identity::binding_message(&public_key, &id_signature));

        let identity = Identity::new(
            identity_id,
            public_key,
            IdentitySignatures {
                id: id_signature,
                public_key: pk_signature,
            },
            IDENTITY_KIND,
        )?;

        self.storage
            .put(&identity.hash(), Bytes::from(identity.encode()?))
            .await?;
        self.remember_verified(identity.hash());

        debug!(
            identity = %short_id(&identity.id),
            hash = %identity.hash().short_hex(),
            "created identity"
        );
        Ok(identity)
    }

    /// Store a foreign identity record so entries referencing it resolve.
    pub async fn add_identity(&self, identity: &Identity) -> IdentityResult<()> {
        self.storage
            .put(&identity.hash(), Bytes::from(identity.encode()?))
            .await?;
        Ok(())
    }

    /// Resolve an identity record by hash through storage.
    pub async fn get_identity(&self, hash: &ContentId) -> IdentityResult<Option<Identity>> {
        let Some(bytes) = self.storage.get(hash).await? else {
            return Ok(None);
        };
        let identity = Identity::decode(&bytes)?;
        if identity.hash() != *hash {
            return Err(IdentityError::HashMismatch {
                expected: *hash,
                actual: identity.hash(),
            });
        }
        Ok(Some(identity))
    }

    /// Check an identity's cross-signatures, caching positive results.
    pub fn verify_identity(&self, identity: &Identity) -> bool {
        let hash = identity.hash();
        if self
            .verified
            .lock()
            .expect("lock poisoned")
            .get(&hash)
            .is_some()
        {
            return true;
        }
        if identity.verify_signatures() {
            self.remember_verified(hash);
            true
        } else {
            warn!(identity = %short_id(&identity.id), "identity failed verification");
            false
        }
    }

    /// Sign `data` with the identity's entry-signing key.
    pub fn sign(&self, identity: &Identity, data: &[u8]) -> IdentityResult<Signature> {
        let key = self
            .keystore
            .get_key(&identity.id)?
            .ok_or_else(|| IdentityError::KeyNotFound(identity.id.clone()))?;
        if key.verifying_key() != identity.public_key {
            return Err(IdentityError::Invalid(format!(
                "stored key for {} does not match identity public key",
                short_id(&identity.id)
            )));
        }
        Ok(key.sign(data))
    }

    /// Verify a signature. Pure; independent of any identity instance.
    pub fn verify(signature: &Signature, public_key: &VerifyingKey, data: &[u8]) -> bool {
        public_key.verify(data, signature).is_ok()
    }

    fn load_or_create(&self, id: &str) -> IdentityResult<SigningKey> {
        match self.keystore.get_key(id)? {
            Some(key) => Ok(key),
            None => Ok(self.keystore.create_key(id)?),
        }
    }

    fn remember_verified(&self, hash: ContentId) {
        self.verified.lock().expect("lock poisoned").put(hash, ());
    }
}

#[async_trait]
impl IdentityResolver for Identities {
    async fn resolve(&self, hash: &ContentId) -> IdentityResult<Option<Identity>> {
        self.get_identity(hash).await
    }

    async fn verify_identity(&self, identity: &Identity) -> bool {
        Identities::verify_identity(self, identity)
    }
}

impl std::fmt::Debug for Identities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identities")
            .field("verified_cached", &self.verified.lock().expect("lock poisoned").len())
            .finish()
    }
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}
