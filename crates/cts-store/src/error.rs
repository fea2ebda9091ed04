use cts_types::Digest;

/// Errors from object encoding and object store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested object is not in the store.
    #[error("object not found: {0}")]
    ObjectNotFound(Digest),

    /// Content disagrees with the digest it is stored or claimed under.
    #[error("hash mismatch for {expected}: content hashes to {actual}")]
    HashMismatch { expected: Digest, actual: Digest },

    /// The bytes are not a valid canonical encoding.
    #[error("corrupt object {digest}: {reason}")]
    CorruptObject { digest: Digest, reason: String },

    /// A tree was assembled from entries that cannot be encoded.
    #[error("invalid tree entry {name:?}: {reason}")]
    InvalidEntry { name: String, reason: String },

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// The digest this error is about, when there is one.
    pub fn digest(&self) -> Option<Digest> {
        match self {
            Self::ObjectNotFound(d) => Some(*d),
            Self::HashMismatch { expected, .. } => Some(*expected),
            Self::CorruptObject { digest, .. } => Some(*digest),
            Self::InvalidEntry { .. } | Self::Io(_) => None,
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
