//! Foundation types for CTS, a content-addressed version-control engine.
//!
//! Every other CTS crate depends on `cts-types`.
//!
//! # Key Types
//!
//! - [`Digest`]: 256-bit content address of a stored object
//! - [`RepositoryId`]: UUID v7 identifier of a hosted repository
//! - [`RepositoryName`]: validated human-readable repository label
//! - [`Signature`]: author name, email, and commit time

pub mod digest;
pub mod error;
pub mod repository;
pub mod signature;

pub use digest::{Digest, DIGEST_HEX_LEN, DIGEST_LEN};
pub use error::TypeError;
pub use repository::{RepositoryId, RepositoryName, MAX_REPOSITORY_NAME_LEN};
pub use signature::Signature;
