//! Replication for Weft logs.
//!
//! A [`SyncEngine`] keeps one log converged with its peers over a
//! [`Transport`]:
//!
//! 1. A peer joining the log's topic is sent our heads.
//! 2. Heads or updates received from a peer are joined into the log in a
//!    per-peer task. Missing ancestors resolve through the log's storage,
//!    which in a networked setup includes a [`PeerBlockService`].
//! 3. Entries that cannot be joined yet are retried on a timer.
//! 4. A peer leaving cancels its tasks; joined entries stay.
//!
//! Faults with foreign data never stop replication; they are published as
//! [`SyncEvent::Error`].

pub mod config;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod session;
pub mod transport;

pub use config::SyncConfig;
pub use engine::{SyncEngine, SyncEvent};
pub use error::{SyncError, SyncResult};
pub use fetch::{PeerBlockService, BLOCK_TOPIC};
pub use session::PeerState;
pub use transport::{MemoryNetwork, MemoryTransport, Transport, TransportEvent};
