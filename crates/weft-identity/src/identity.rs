use serde::{Deserialize, Serialize};
use weft_crypto::{ContentHasher, Signature, VerifyingKey};
use weft_types::ContentId;

use crate::error::{IdentityError, IdentityResult};

/// Identity type tag for public-key identities.
pub const IDENTITY_KIND: &str = "publickey";

/// The two cross-signatures binding an identity id to its signing key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentitySignatures {
    /// Signature by the signing key over the identity id.
    pub id: Signature,
    /// Signature by the id key over `public_key ++ signatures.id`.
    pub public_key: Signature,
}

/// A replica participant's cryptographic identity.
///
/// `hash` is the content hash of the encoded record and is what entries
/// reference. It is recomputed on decode, never trusted from the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    /// Hex-encoded public key of the id (provider) key.
    pub id: String,
    /// Key that signs log entries.
    pub public_key: VerifyingKey,
    pub signatures: IdentitySignatures,
    pub kind: String,
    hash: ContentId,
}

#[derive(Serialize, Deserialize)]
struct IdentityRecord {
    id: String,
    public_key: VerifyingKey,
    signatures: IdentitySignatures,
    kind: String,
}

impl Identity {
    /// Assemble an identity and compute its record hash.
    pub fn new(
        id: impl Into<String>,
        public_key: VerifyingKey,
        signatures: IdentitySignatures,
        kind: impl Into<String>,
    ) -> IdentityResult<Self> {
        let mut identity = Self {
            id: id.into(),
            public_key,
            signatures,
            kind: kind.into(),
            hash: ContentId::null(),
        };
        identity.hash = ContentHasher::IDENTITY.hash(&identity.encode()?);
        Ok(identity)
    }

    /// Content hash of the encoded record.
    pub fn hash(&self) -> ContentId {
        self.hash
    }

    /// Canonical bytes of the record, as stored.
    pub fn encode(&self) -> IdentityResult<Vec<u8>> {
        let record = IdentityRecord {
            id: self.id.clone(),
            public_key: self.public_key,
            signatures: self.signatures.clone(),
            kind: self.kind.clone(),
        };
        bincode::serialize(&record).map_err(|e| IdentityError::Encode(e.to_string()))
    }

    /// Decode a stored record.
    pub fn decode(bytes: &[u8]) -> IdentityResult<Self> {
        let record: IdentityRecord =
            bincode::deserialize(bytes).map_err(|e| IdentityError::Decode(e.to_string()))?;
        Ok(Self {
            id: record.id,
            public_key: record.public_key,
            signatures: record.signatures,
            kind: record.kind,
            hash: ContentHasher::IDENTITY.hash(bytes),
        })
    }

    /// Check both cross-signatures. Pure; needs no key store.
    pub fn verify_signatures(&self) -> bool {
        if self.kind != IDENTITY_KIND {
            return false;
        }
        let Ok(id_key) = VerifyingKey::from_hex(&self.id) else {
            return false;
        };
        if self
            .public_key
            .verify(self.id.as_bytes(), &self.signatures.id)
            .is_err()
        {
            return false;
        }
        id_key
            .verify(
                &Self::binding_message(&self.public_key, &self.signatures.id),
                &self.signatures.public_key,
            )
            .is_ok()
    }

    /// Message the id key signs to vouch for a signing key.
    pub(crate) fn binding_message(public_key: &VerifyingKey, id_signature: &Signature) -> Vec<u8> {
        let mut message = Vec::with_capacity(32 + 64);
        message.extend_from_slice(&public_key.as_bytes());
        message.extend_from_slice(&id_signature.to_bytes());
        message
    }
}
