//! Writer identities for Weft.
//!
//! An [`Identity`] binds a stable identity id (the hex public key of a
//! provider key) to the key that signs log entries. Both halves cross-sign
//! each other, so anyone holding the identity record can check the binding
//! without access to private key material.
//!
//! [`Identities`] creates identities through a [`KeyStore`], stores their
//! records in a [`Storage`] keyed by content hash, and resolves and
//! verifies records received from other replicas.
//!
//! [`KeyStore`]: weft_crypto::KeyStore
//! [`Storage`]: weft_store::Storage

pub mod error;
pub mod identities;
pub mod identity;
pub mod resolver;

pub use error::{IdentityError, IdentityResult};
pub use identities::Identities;
pub use identity::{Identity, IdentitySignatures, IDENTITY_KIND};
pub use resolver::IdentityResolver;
