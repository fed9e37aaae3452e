//! Wire protocol for Weft replication.
//!
//! Defines the messages replicas exchange over a transport topic and the
//! frame format they travel in: a 4-byte big-endian length, a 1-byte type
//! tag, then the bincode-encoded [`SyncMessage`].

pub mod codec;
pub mod error;
pub mod message;

pub use codec::SyncCodec;
pub use error::{ProtocolError, ProtocolResult};
pub use message::{SyncMessage, MAX_MESSAGE_SIZE};
