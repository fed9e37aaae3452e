use serde::{Deserialize, Serialize};
use uuid::Uuid;
use weft_types::ContentId;

pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Messages exchanged between replicas of a log.
///
/// Entries travel as their canonical encoded bytes so the receiver can
/// decode and verify them itself.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMessage {
    /// The sender's current heads, sent directly to a peer on join.
    Heads { log_id: String, heads: Vec<Vec<u8>> },
    /// A freshly added entry, published to every peer on the log topic.
    Update { log_id: String, entry: Vec<u8> },
    /// Ask a peer for blocks by hash.
    FetchRequest { request_id: Uuid, hashes: Vec<ContentId> },
    /// Blocks the peer holds; `None` for each hash it does not.
    FetchResponse {
        request_id: Uuid,
        blocks: Vec<(ContentId, Option<Vec<u8>>)>,
    },
}

impl SyncMessage {
    pub fn type_tag(&self) -> u8 {
        match self {
            Self::Heads { .. } => 1,
            Self::Update { .. } => 2,
            Self::FetchRequest { .. } => 3,
            Self::FetchResponse { .. } => 4,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Heads { .. } => "Heads",
            Self::Update { .. } => "Update",
            Self::FetchRequest { .. } => "FetchRequest",
            Self::FetchResponse { .. } => "FetchResponse",
        }
    }

    /// Build a fetch request with a fresh time-ordered id.
    pub fn fetch_request(hashes: Vec<ContentId>) -> Self {
        Self::FetchRequest {
            request_id: Uuid::now_v7(),
            hashes,
        }
    }
}
