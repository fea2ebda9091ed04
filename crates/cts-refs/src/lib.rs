//! Reference management for CTS.
//!
//! References are the mutable, human-readable entry points into immutable
//! history: named pointers from `refs/heads/*` (branches) and `refs/tags/*`
//! (tags) to commit digests, scoped per repository.
//!
//! # Architecture
//!
//! - **Branches** move forward as commits are added.
//! - **Tags** are fixed once created; delete and recreate to move one.
//! - Every mutation is a compare-and-set against the previously observed
//!   value. There is no unconditional write.
//!
//! # Modules
//!
//! - [`error`]: Error types for ref operations
//! - [`types`]: [`RefName`] and [`RefKind`]
//! - [`traits`]: The [`RefStore`] trait defining the storage interface
//! - [`names`]: Branch/tag name validation
//! - [`memory`]: In-memory [`InMemoryRefStore`] for tests
//! - [`fs`]: File-per-ref [`FsRefStore`]

pub mod error;
pub mod fs;
pub mod memory;
pub mod names;
pub mod traits;
pub mod types;

pub use error::{RefError, RefResult};
pub use fs::{FsRefStore, RefLayout};
pub use memory::InMemoryRefStore;
pub use names::{validate_branch_name, validate_tag_name};
pub use traits::RefStore;
pub use types::{RefKind, RefName};
