//! Index entry types.

use serde::{Deserialize, Serialize};
use cts_store::EntryMode;
use cts_types::Digest;

/// A pending change to one path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "lowercase")]
pub enum IndexEntry {
    /// The path will hold this blob in the next commit.
    Staged {
        digest: Digest,
        mode: EntryMode,
        /// Blob length in bytes.
        size: u64,
    },
    /// The path will be absent from the next commit.
    Removed,
}

impl IndexEntry {
    pub fn staged(digest: Digest, mode: EntryMode, size: u64) -> Self {
        Self::Staged { digest, mode, size }
    }

    pub fn is_removal(&self) -> bool {
        matches!(self, Self::Removed)
    }

    /// The staged blob, if this entry adds or modifies a file.
    pub fn digest(&self) -> Option<Digest> {
        match self {
            Self::Staged { digest, .. } => Some(*digest),
            Self::Removed => None,
        }
    }
}
