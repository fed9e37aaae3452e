use weft_types::ContentId;

/// Domain-separated BLAKE3 content hasher.
///
/// Each hasher carries a domain tag (e.g., `"weft-entry-v2"`) that is
/// prepended to every hash computation. An entry and an identity record
/// with identical bytes therefore never share a [`ContentId`].
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for log entries.
    pub const ENTRY: Self = Self {
        domain: "weft-entry-v2",
    };
    /// Hasher for identity records.
    pub const IDENTITY: Self = Self {
        domain: "weft-identity-v1",
    };
    /// Hasher for access controller manifests.
    pub const ACCESS: Self = Self {
        domain: "weft-access-v1",
    };
    /// Hasher for database manifests.
    pub const MANIFEST: Self = Self {
        domain: "weft-manifest-v1",
    };

    /// Create a hasher with a custom domain tag.
    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// Hash raw bytes with domain separation.
    pub fn hash(&self, data: &[u8]) -> ContentId {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher.update(data);
        ContentId::from_hash(*hasher.finalize().as_bytes())
    }

    /// Hash a serializable value as JSON with domain separation.
    pub fn hash_json<T: serde::Serialize>(&self, value: &T) -> Result<ContentId, HasherError> {
        let data =
            serde_json::to_vec(value).map_err(|e| HasherError::Serialization(e.to_string()))?;
        Ok(self.hash(&data))
    }

    /// Verify that data produces the expected content ID.
    pub fn verify(&self, data: &[u8], expected: &ContentId) -> bool {
        self.hash(data) == *expected
    }

    /// The domain tag used by this hasher.
    pub fn domain(&self) -> &str {
        self.domain
    }
}

/// Errors from hashing operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HasherError {
    #[error("serialization error: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        let id1 = ContentHasher::ENTRY.hash(b"hello world");
        let id2 = ContentHasher::ENTRY.hash(b"hello world");
        assert_eq!(id1, id2);
    }

    #[test]
    fn different_domains_produce_different_hashes() {
        let data = b"same content";
        let entry = ContentHasher::ENTRY.hash(data);
        let identity = ContentHasher::IDENTITY.hash(data);
        let access = ContentHasher::ACCESS.hash(data);
        assert_ne!(entry, identity);
        assert_ne!(entry, access);
        assert_ne!(identity, access);
    }

    #[test]
    fn verify_detects_tampering() {
        let id = ContentHasher::ENTRY.hash(b"original");
        assert!(ContentHasher::ENTRY.verify(b"original", &id));
        assert!(!ContentHasher::ENTRY.verify(b"tampered", &id));
    }

    #[test]
    fn hash_json_works() {
        let value = serde_json::json!({"write": ["*"]});
        let id = ContentHasher::ACCESS.hash_json(&value).unwrap();
        assert!(!id.is_null());
    }

    #[test]
    fn domain_hash_differs_from_raw() {
        let raw = ContentId::from_bytes(b"test");
        assert_ne!(raw, ContentHasher::ENTRY.hash(b"test"));
        assert_eq!(ContentHasher::new("custom").domain(), "custom");
    }
}
