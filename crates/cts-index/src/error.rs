//! Error types for the index crate.

use cts_graph::GraphError;
use cts_refs::RefError;
use cts_store::StoreError;

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// The specified path is not in the index.
    #[error("path not found in index: {0}")]
    PathNotFound(String),

    /// The path cannot appear in a tree.
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    /// The staged changes leave the tree identical to the parent's.
    #[error("nothing to commit")]
    NothingToCommit,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Ref(#[from] RefError),

    /// The on-disk index could not be read or written.
    #[error("index file error: {0}")]
    Persistence(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias for index results.
pub type IndexResult<T> = Result<T, IndexError>;
