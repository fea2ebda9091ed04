//! What `status` reports.
//!
//! The index fills in `staged` by comparing its entries against the head
//! tree; the client adds the working-directory side.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkdirStatus {
    /// Recorded by the next commit.
    pub staged: Vec<StatusEntry>,
    /// On disk but different from what the next commit would record.
    pub modified: Vec<StatusEntry>,
    pub untracked: Vec<String>,
}

impl WorkdirStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_clean(&self) -> bool {
        self.staged.is_empty() && self.modified.is_empty() && self.untracked.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub path: String,
    pub status: FileStatus,
}

impl StatusEntry {
    pub fn new(path: impl Into<String>, status: FileStatus) -> Self {
        Self {
            path: path.into(),
            status,
        }
    }
}

/// How a path differs from the tree it is compared against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    New,
    Modified,
    Deleted,
}

impl FileStatus {
    /// Single-letter form used by short status output.
    pub fn code(self) -> char {
        match self {
            Self::New => 'A',
            Self::Modified => 'M',
            Self::Deleted => 'D',
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::New => "new",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
        })
    }
}
