//! Error types for commit graph traversal.

use cts_store::StoreError;
use cts_types::Digest;

/// Errors that can occur while walking history.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// A commit, tree, or blob in the walk is absent from the store.
    #[error("object not found: {0}")]
    ObjectNotFound(Digest),

    /// An object in the walk failed to decode, or has the wrong kind.
    #[error("corrupt object {digest}: {reason}")]
    CorruptObject { digest: Digest, reason: String },

    /// Stored bytes do not hash to their digest.
    #[error("hash mismatch for {expected}: content hashes to {actual}")]
    HashMismatch { expected: Digest, actual: Digest },

    /// A range was requested down to a commit that is not in the history.
    #[error("{ancestor} is not an ancestor of {descendant}")]
    NotAnAncestor { ancestor: Digest, descendant: Digest },

    /// Any other storage failure.
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<StoreError> for GraphError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ObjectNotFound(d) => Self::ObjectNotFound(d),
            StoreError::CorruptObject { digest, reason } => Self::CorruptObject { digest, reason },
            StoreError::HashMismatch { expected, actual } => Self::HashMismatch { expected, actual },
            other => Self::Storage(other.to_string()),
        }
    }
}

/// Convenience alias for graph results.
pub type GraphResult<T> = Result<T, GraphError>;
