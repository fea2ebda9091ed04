//! Commit history for CTS.
//!
//! Commits form singly linked chains through their parent digests. This
//! crate walks those chains on top of any [`cts_store::ObjectStore`]:
//! ancestry checks for fast-forward decisions, commit ranges for
//! negotiation, and object closures in upload order.

pub mod error;
pub mod graph;

pub use error::{GraphError, GraphResult};
pub use graph::{Ancestors, CommitGraph};
