//! Error types for reference operations.

use cts_types::Digest;
use thiserror::Error;

/// Errors that can occur during reference operations.
#[derive(Debug, Error)]
pub enum RefError {
    /// The reference does not exist.
    #[error("reference not found: {name}")]
    ReferenceNotFound { name: String },

    /// A compare-and-set found a different current value than expected.
    ///
    /// `actual` is the value the store holds right now (`None` if the
    /// reference does not exist), so the caller can re-evaluate.
    #[error("conflict on {name}: expected {}, found {}", show(.expected), show(.actual))]
    Conflict {
        name: String,
        expected: Option<Digest>,
        actual: Option<Digest>,
    },

    /// The reference name is invalid.
    #[error("invalid reference name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    /// One name would sit where the other needs a directory, as
    /// `refs/heads/a` and `refs/heads/a/b` would.
    #[error("reference {name} collides with existing {existing}")]
    NameCollision { name: String, existing: String },

    /// Tags can be created and deleted but never moved.
    #[error("tag is immutable: {name}")]
    TagImmutable { name: String },

    /// A stored reference could not be parsed.
    #[error("corrupt reference {name}: {reason}")]
    Corrupt { name: String, reason: String },

    /// The backing store is unusable (e.g. a poisoned lock).
    #[error("storage error: {0}")]
    Storage(String),

    /// I/O error during file-based ref operations.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn show(value: &Option<Digest>) -> String {
    match value {
        Some(d) => d.short_hex(),
        None => "<none>".into(),
    }
}

/// Convenience type alias for ref operations.
pub type RefResult<T> = std::result::Result<T, RefError>;
