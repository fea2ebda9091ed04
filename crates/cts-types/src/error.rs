use thiserror::Error;

/// Rejected input when building a foundation type.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("digest is not hex: {0}")]
    InvalidHex(String),

    #[error("digest must be {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("not a repository id: {0}")]
    InvalidRepositoryId(String),

    #[error("invalid repository name {name:?}: {reason}")]
    InvalidRepositoryName { name: String, reason: String },

    #[error("bad author signature: {0}")]
    InvalidSignature(String),
}
