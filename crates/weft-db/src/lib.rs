//! Database facade for Weft.
//!
//! A [`Node`] is one replica: an identity, a block store shared with its
//! peers, and a transport. [`Node::open`] turns a name into a new
//! [`Database`] or an `/weft/<hash>` [`Address`] into an existing one.
//!
//! # Addresses
//!
//! A database is described by an immutable [`Manifest`] (name, type,
//! access controller, metadata). The manifest is stored as a block and its
//! hash is the database address, so the address alone is enough for a
//! peer to find, verify, and open the database.
//!
//! # Configuration
//!
//! [`DatabaseConfig`] holds every tunable with serde defaults and loads
//! from TOML. Setting `directory` keeps blocks and heads on disk so a
//! database survives restarts.

pub mod config;
pub mod database;
pub mod error;
pub mod manifest;
pub mod node;

pub use config::DatabaseConfig;
pub use database::{Database, DatabaseEvent, DatabaseOptions};
pub use error::{DbError, DbResult};
pub use manifest::{is_valid_address, Address, Manifest, ADDRESS_PREFIX, EVENTLOG};
pub use node::{Node, OpenOptions};
