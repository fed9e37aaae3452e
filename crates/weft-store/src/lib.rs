//! Content-addressed block storage for Weft.
//!
//! Every block the log touches (entries, identity records, access
//! manifests) is an opaque byte string keyed by its [`ContentId`]. The
//! [`Storage`] trait is the only way the rest of the system reads or writes
//! those bytes, which lets a log treat "resolve a hash" as one operation
//! whether the block is cached, on disk, or must be pulled from a peer.
//!
//! # Storage Backends
//!
//! - [`MemoryStorage`] -- unbounded `HashMap` store for tests and embedding
//! - [`LruStorage`] -- bounded in-memory cache, evicts least-recently-used
//! - [`FileStorage`] -- persistent one-file-per-block store with CRC framing
//! - [`RemoteStorage`] -- network fetch through a [`BlockService`], bounded
//!   by a timeout
//! - [`ComposedStorage`] -- ordered layers with read fall-through and
//!   write-through
//!
//! # Design Rules
//!
//! 1. Blocks are immutable once written; a key always maps to the same bytes.
//! 2. `get` returns `Ok(None)` for a missing block; errors mean I/O failure,
//!    corruption, or a network timeout.
//! 3. Stores never interpret block contents.
//!
//! [`ContentId`]: weft_types::ContentId

pub mod cache;
pub mod composed;
pub mod error;
pub mod file;
pub mod memory;
pub mod remote;
pub mod traits;

pub use cache::LruStorage;
pub use composed::ComposedStorage;
pub use error::{StoreError, StoreResult};
pub use file::FileStorage;
pub use memory::MemoryStorage;
pub use remote::{MemoryBlockService, RemoteStorage};
pub use traits::{BlockService, Storage};
