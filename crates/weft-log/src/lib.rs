//! The replicated operation log at the core of Weft.
//!
//! A [`Log`] is a Merkle DAG of signed [`Entry`] values. Each entry links
//! to the heads its writer saw (`next`) plus a few older skip-list
//! references (`refs`), and carries a Lamport [`Clock`]. Any two replicas
//! that have accepted the same set of entries have the same heads and
//! traverse them in the same order.
//!
//! # Operations
//!
//! - [`Log::append`] -- sign a local operation on top of the current heads
//! - [`Log::join`] -- admit foreign entries after fetching and verifying
//!   their ancestors; faults are reported in a [`JoinReport`]
//! - [`Log::traverse`] -- walk newest first with a deterministic tie-break
//! - [`Log::iterator`] -- bounded walks between hashes
//!
//! An entry is only accepted together with its complete ancestry, so the
//! log never holds a dangling link.
//!
//! [`Entry`]: weft_entry::Entry
//! [`Clock`]: weft_types::Clock

pub mod error;
pub mod log;
pub mod options;
pub mod report;
pub mod traverse;

pub use error::{LogError, LogResult};
pub use log::{Log, LogEvent};
pub use options::{IteratorOptions, LogOptions, DEFAULT_CHANNEL_CAPACITY, DEFAULT_REFERENCES_COUNT};
pub use report::{DeferReason, Deferred, JoinOutcome, JoinRejection, JoinReport, Rejected};
pub use traverse::{compare_entries, Traversal};
