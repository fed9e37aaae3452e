//! Foundation types for Weft.
//!
//! This crate provides the identifier, clock, and payload types shared by
//! every other Weft crate.
//!
//! # Key Types
//!
//! - [`ContentId`] -- Content-addressed identifier (BLAKE3 hash)
//! - [`Clock`] -- Per-identity Lamport clock used for causal ordering
//! - [`Payload`] -- The `{op, key, value}` operation carried by a log entry
//! - [`PeerId`] -- Opaque identifier of a replica on the transport

pub mod cid;
pub mod clock;
pub mod error;
pub mod payload;
pub mod peer;

pub use cid::ContentId;
pub use clock::Clock;
pub use error::TypeError;
pub use payload::{ops, Payload};
pub use peer::PeerId;
