//! Cryptographic primitives for Weft.
//!
//! Provides domain-separated BLAKE3 hashing, Ed25519 signing/verification,
//! and the key store contract identities allocate their keys through.
//!
//! All crypto operations wrap established libraries; there is no custom cryptography.

pub mod hasher;
pub mod keystore;
pub mod signer;

pub use hasher::{ContentHasher, HasherError};
pub use keystore::{InMemoryKeyStore, KeyStore, KeyStoreError};
pub use signer::{Signature, SignatureError, SigningKey, VerifyingKey};
