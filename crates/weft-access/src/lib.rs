//! Write access control for Weft logs.
//!
//! Every entry, local or foreign, passes an [`AccessController`] before the
//! log admits it. Controllers are capability objects: the log only ever
//! calls [`AccessController::can_append`] and never depends on a concrete
//! policy.
//!
//! # Controllers
//!
//! - [`OpenAccess`] -- anyone may write
//! - [`AllowListAccess`] -- only listed identity ids may write (`"*"`
//!   admits everyone)
//!
//! Each controller is described by an [`AccessManifest`] stored in
//! content-addressed storage; the manifest hash is the controller address.
//! [`AccessRegistry`] rebuilds a controller from its address by type tag.

pub mod allowlist;
pub mod controller;
pub mod error;
pub mod open;
pub mod registry;

pub use allowlist::AllowListAccess;
pub use controller::{AccessContext, AccessController, AccessManifest, WILDCARD};
pub use error::{AccessError, AccessResult};
pub use open::OpenAccess;
pub use registry::{AccessFactory, AccessRegistry};
