//! Signed, content-addressed log entries for Weft.
//!
//! An [`Entry`] is an immutable operation record. It links to its parents
//! by hash (`next`) and to older ancestors through a skip list (`refs`),
//! carries a Lamport [`Clock`], and is signed by its writer's identity. Its
//! [`ContentId`] is the domain-separated BLAKE3 digest of its canonical
//! encoding, which is also the key it is stored under.
//!
//! Verification never fails with an error: a bad signature, hash, or
//! identity simply yields `false`.
//!
//! [`Clock`]: weft_types::Clock
//! [`ContentId`]: weft_types::ContentId

pub mod entry;
pub mod error;

pub use entry::{Entry, ENTRY_VERSION};
pub use error::{EntryError, EntryResult};
