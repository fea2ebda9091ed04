//! Staging index for CTS.
//!
//! Holds pending changes between the working directory and the next commit,
//! builds trees from them on top of the previous commit's tree, and turns
//! them into commits that advance a branch by compare-and-set.
//!
//! # Key Types
//!
//! - [`Index`] -- the staging area (BTreeMap-backed, persisted as JSON)
//! - [`IndexEntry`] -- a staged blob or a staged removal
//! - [`CommitPolicy`] -- whether no-op commits are allowed
//! - [`WorkdirStatus`] -- result of status computation
//! - [`FileStatus`] -- kind of change (New, Modified, Deleted)

pub mod entry;
pub mod error;
pub mod index;
pub mod status;

pub use entry::IndexEntry;
pub use error::{IndexError, IndexResult};
pub use index::{flatten_tree, BranchRef, CommitPolicy, Index, INDEX_VERSION};
pub use status::{FileStatus, StatusEntry, WorkdirStatus};
