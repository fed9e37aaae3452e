//! Signed, content-addressed log entries.
//!
//! An entry's hash covers its whole record, signature included. The
//! signature covers every field but itself and the hash, so a tampered
//! entry fails [`Entry::verify`] whether or not its hash was recomputed.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::trace;
use weft_crypto::{ContentHasher, Signature, VerifyingKey};
use weft_identity::{Identities, Identity, IdentityResolver};
use weft_types::{Clock, ContentId, Payload};

use crate::error::{EntryError, EntryResult};

/// Entry format version.
pub const ENTRY_VERSION: u32 = 2;

/// Immutable, signed operation record.
///
/// Fields are public for inspection; mutating one invalidates the entry
/// and [`Entry::verify`] reports it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    /// Identifier of the log the entry belongs to.
    pub id: String,
    pub payload: Payload,
    /// Hashes of the heads the writer saw when appending.
    pub next: Vec<ContentId>,
    /// Skip-list references to older ancestors.
    pub refs: Vec<ContentId>,
    pub clock: Clock,
    pub v: u32,
    /// Content hash of the writer's identity record.
    pub identity: ContentId,
    /// The writer's entry-signing public key.
    pub key: VerifyingKey,
    pub sig: Signature,
    hash: ContentId,
}

/// Fields covered by the signature.
#[derive(Serialize)]
struct SignedFields<'a> {
    v: u32,
    id: &'a str,
    payload: &'a Payload,
    next: &'a [ContentId],
    refs: &'a [ContentId],
    clock: &'a Clock,
    identity: &'a ContentId,
    key: &'a VerifyingKey,
}

/// Stored and wire form: every field except `hash`.
#[derive(Serialize, Deserialize)]
struct EntryRecord {
    v: u32,
    id: String,
    payload: Payload,
    next: Vec<ContentId>,
    refs: Vec<ContentId>,
    clock: Clock,
    identity: ContentId,
    key: VerifyingKey,
    sig: Signature,
}

impl Entry {
    /// Build and sign a new entry.
    ///
    /// Without an explicit clock the entry starts at the writer's genesis
    /// clock. Fails with [`EntryError::Signing`] if the identity's key is
    /// not in the key store.
    pub fn create(
        identities: &Identities,
        identity: &Identity,
        log_id: impl Into<String>,
        payload: Payload,
        clock: Option<Clock>,
        next: Vec<ContentId>,
        refs: Vec<ContentId>,
    ) -> EntryResult<Self> {
        let id = log_id.into();
        let clock = clock.unwrap_or_else(|| Clock::genesis(identity.id.clone()));
        let identity_hash = identity.hash();

        let signed = signing_bytes(&SignedFields {
            v: ENTRY_VERSION,
            id: &id,
            payload: &payload,
            next: &next,
            refs: &refs,
            clock: &clock,
            identity: &identity_hash,
            key: &identity.public_key,
        })?;
        let sig = identities
            .sign(identity, &signed)
            .map_err(EntryError::Signing)?;

        let mut entry = Self {
            id,
            payload,
            next,
            refs,
            clock,
            v: ENTRY_VERSION,
            identity: identity_hash,
            key: identity.public_key,
            sig,
            hash: ContentId::null(),
        };
        entry.hash = ContentHasher::ENTRY.hash(&entry.record_bytes()?);
        trace!(hash = %entry.hash.short_hex(), clock = %entry.clock, "created entry");
        Ok(entry)
    }

    /// Content hash of the entry; also its storage key.
    pub fn hash(&self) -> ContentId {
        self.hash
    }

    /// Canonical bytes of the entry, as stored and sent.
    pub fn encode(&self) -> EntryResult<Bytes> {
        Ok(Bytes::from(self.record_bytes()?))
    }

    /// Decode an entry. The hash is computed from the canonical
    /// re-encoding, never taken from the input.
    pub fn decode(bytes: &[u8]) -> EntryResult<Self> {
        let record: EntryRecord =
            bincode::deserialize(bytes).map_err(|e| EntryError::Decode(e.to_string()))?;
        let mut entry = Self {
            id: record.id,
            payload: record.payload,
            next: record.next,
            refs: record.refs,
            clock: record.clock,
            v: record.v,
            identity: record.identity,
            key: record.key,
            sig: record.sig,
            hash: ContentId::null(),
        };
        entry.hash = ContentHasher::ENTRY.hash(&entry.record_bytes()?);
        Ok(entry)
    }

    /// Verify the entry's hash, writer identity, and signature.
    ///
    /// Returns `false` on any mismatch, including an identity that cannot
    /// be resolved or a clock stamped with another writer's id.
    pub async fn verify(resolver: &dyn IdentityResolver, entry: &Entry) -> bool {
        if entry.v != ENTRY_VERSION {
            return false;
        }
        match entry.record_bytes() {
            Ok(bytes) if ContentHasher::ENTRY.hash(&bytes) == entry.hash => {}
            _ => return false,
        }

        let identity = match resolver.resolve(&entry.identity).await {
            Ok(Some(identity)) => identity,
            _ => return false,
        };
        if identity.public_key != entry.key || identity.id != entry.clock.id {
            return false;
        }
        if !resolver.verify_identity(&identity).await {
            return false;
        }

        let Ok(signed) = signing_bytes(&entry.signed_fields()) else {
            return false;
        };
        resolver.verify(&entry.sig, &entry.key, &signed)
    }

    /// Entries are equal when their hashes are.
    pub fn is_equal(a: &Entry, b: &Entry) -> bool {
        a.hash == b.hash
    }

    /// Every hash this entry points at: `next` followed by `refs`.
    pub fn links(&self) -> impl Iterator<Item = &ContentId> {
        self.next.iter().chain(self.refs.iter())
    }

    fn signed_fields(&self) -> SignedFields<'_> {
        SignedFields {
            v: self.v,
            id: &self.id,
            payload: &self.payload,
            next: &self.next,
            refs: &self.refs,
            clock: &self.clock,
            identity: &self.identity,
            key: &self.key,
        }
    }

    fn record_bytes(&self) -> EntryResult<Vec<u8>> {
        let record = EntryRecord {
            v: self.v,
            id: self.id.clone(),
            payload: self.payload.clone(),
            next: self.next.clone(),
            refs: self.refs.clone(),
            clock: self.clock.clone(),
            identity: self.identity,
            key: self.key,
            sig: self.sig.clone(),
        };
        bincode::serialize(&record).map_err(|e| EntryError::Encode(e.to_string()))
    }
}

fn signing_bytes(fields: &SignedFields<'_>) -> EntryResult<Vec<u8>> {
    bincode::serialize(fields).map_err(|e| EntryError::Encode(e.to_string()))
}
