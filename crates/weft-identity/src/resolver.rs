use async_trait::async_trait;
use weft_crypto::{Signature, VerifyingKey};
use weft_types::ContentId;

use crate::error::IdentityResult;
use crate::identity::Identity;

/// What entry verification and access control need from an identity
/// backend: resolving a record by hash and checking it.
///
/// Resolution may suspend on a network fetch when the record is not held
/// locally.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Resolve an identity record by its content hash.
    async fn resolve(&self, hash: &ContentId) -> IdentityResult<Option<Identity>>;

    /// Whether the identity's cross-signatures are valid.
    async fn verify_identity(&self, identity: &Identity) -> bool;

    /// Check a signature against a public key.
    fn verify(&self, signature: &Signature, public_key: &VerifyingKey, data: &[u8]) -> bool {
        public_key.verify(data, signature).is_ok()
    }
}
