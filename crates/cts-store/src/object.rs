use serde::{Deserialize, Serialize};
use cts_types::{Digest, Signature};

use crate::error::{StoreError, StoreResult};

/// The kind of object stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    /// Raw content (file contents).
    Blob,
    /// Directory snapshot: sorted entries naming blobs and subtrees.
    Tree,
    /// Snapshot event: root tree, optional parent, author, message.
    Commit,
}

impl ObjectKind {
    /// Leading byte of the canonical encoding.
    pub fn tag(&self) -> u8 {
        match self {
            Self::Blob => 1,
            Self::Tree => 2,
            Self::Commit => 3,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Blob),
            2 => Some(Self::Tree),
            3 => Some(Self::Commit),
            _ => None,
        }
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Blob => write!(f, "blob"),
            Self::Tree => write!(f, "tree"),
            Self::Commit => write!(f, "commit"),
        }
    }
}

impl std::str::FromStr for ObjectKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blob" => Ok(Self::Blob),
            "tree" => Ok(Self::Tree),
            "commit" => Ok(Self::Commit),
            other => Err(format!("unknown object kind: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Blob
// ---------------------------------------------------------------------------

/// Raw content object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blob {
    pub data: Vec<u8>,
}

impl Blob {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tree
// ---------------------------------------------------------------------------

/// File mode for a tree entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryMode {
    /// Normal file (0o100644).
    Regular,
    /// Executable file (0o100755).
    Executable,
    /// Symbolic link (0o120000).
    Symlink,
    /// Subtree / directory (0o040000).
    Directory,
}

impl EntryMode {
    /// Byte used in the canonical encoding.
    pub fn tag(&self) -> u8 {
        match self {
            Self::Regular => 1,
            Self::Executable => 2,
            Self::Symlink => 3,
            Self::Directory => 4,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Regular),
            2 => Some(Self::Executable),
            3 => Some(Self::Symlink),
            4 => Some(Self::Directory),
            _ => None,
        }
    }

    /// Octal mode value, for display.
    pub fn mode_bits(&self) -> u32 {
        match self {
            Self::Regular => 0o100644,
            Self::Executable => 0o100755,
            Self::Symlink => 0o120000,
            Self::Directory => 0o040000,
        }
    }

    /// The kind of object an entry with this mode must point at.
    pub fn target_kind(&self) -> ObjectKind {
        match self {
            Self::Directory => ObjectKind::Tree,
            _ => ObjectKind::Blob,
        }
    }
}

impl std::fmt::Display for EntryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:06o}", self.mode_bits())
    }
}

/// Check that `name` can appear as a single tree entry name.
///
/// Names are one path segment: non-empty, not `.` or `..`, and free of
/// `/` and NUL.
pub fn validate_entry_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("name is empty".into());
    }
    if name == "." || name == ".." {
        return Err(format!("'{name}' is reserved"));
    }
    if name.contains('/') {
        return Err("name contains '/'".into());
    }
    if name.contains('\0') {
        return Err("name contains NUL".into());
    }
    Ok(())
}

/// A single entry in a tree object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub mode: EntryMode,
    pub name: String,
    /// Digest of the referenced blob or subtree.
    pub target: Digest,
}

impl TreeEntry {
    pub fn new(mode: EntryMode, name: impl Into<String>, target: Digest) -> Self {
        Self {
            mode,
            name: name.into(),
            target,
        }
    }

    pub fn is_tree(&self) -> bool {
        self.mode == EntryMode::Directory
    }
}

impl PartialOrd for TreeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TreeEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.name.as_bytes().cmp(other.name.as_bytes())
    }
}

/// Directory snapshot.
///
/// Entries are kept sorted by name (bytewise) and names are unique, so two
/// trees with the same entry set always encode, and therefore hash, the same
/// regardless of the order the entries were supplied in.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    entries: Vec<TreeEntry>,
}

impl Tree {
    /// Build a tree from entries in any order.
    ///
    /// Fails if a name is not a valid single path segment or appears twice.
    pub fn new(mut entries: Vec<TreeEntry>) -> StoreResult<Self> {
        for entry in &entries {
            validate_entry_name(&entry.name).map_err(|reason| StoreError::InvalidEntry {
                name: entry.name.clone(),
                reason,
            })?;
        }
        entries.sort();
        if let Some(pair) = entries.windows(2).find(|w| w[0].name == w[1].name) {
            return Err(StoreError::InvalidEntry {
                name: pair[0].name.clone(),
                reason: "duplicate name".into(),
            });
        }
        Ok(Self { entries })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Wrap entries already known to be sorted, unique, and valid.
    pub(crate) fn from_sorted(entries: Vec<TreeEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[TreeEntry] {
        &self.entries
    }

    /// Look up an entry by name.
    pub fn get(&self, name: &str) -> Option<&TreeEntry> {
        self.entries
            .binary_search_by(|e| e.name.as_bytes().cmp(name.as_bytes()))
            .ok()
            .map(|i| &self.entries[i])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Commit
// ---------------------------------------------------------------------------

/// A snapshot event in a linear history.
///
/// Each commit has at most one parent; the first commit of a history has
/// none.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub tree: Digest,
    pub parent: Option<Digest>,
    pub message: String,
    pub author: Signature,
}

impl Commit {
    pub fn new(
        tree: Digest,
        parent: Option<Digest>,
        message: impl Into<String>,
        author: Signature,
    ) -> Self {
        Self {
            tree,
            parent,
            message: message.into(),
            author,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// First line of the message.
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }
}

// ---------------------------------------------------------------------------
// Object
// ---------------------------------------------------------------------------

/// Any storable object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Object {
    Blob(Blob),
    Tree(Tree),
    Commit(Commit),
}

impl Object {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::Blob(_) => ObjectKind::Blob,
            Self::Tree(_) => ObjectKind::Tree,
            Self::Commit(_) => ObjectKind::Commit,
        }
    }

    /// Digests this object points at, each paired with the kind it must be.
    pub fn references(&self) -> Vec<(Digest, ObjectKind)> {
        match self {
            Self::Blob(_) => Vec::new(),
            Self::Tree(tree) => tree
                .entries()
                .iter()
                .map(|e| (e.target, e.mode.target_kind()))
                .collect(),
            Self::Commit(commit) => {
                let mut refs = vec![(commit.tree, ObjectKind::Tree)];
                if let Some(parent) = commit.parent {
                    refs.push((parent, ObjectKind::Commit));
                }
                refs
            }
        }
    }

    pub fn into_blob(self) -> Option<Blob> {
        match self {
            Self::Blob(b) => Some(b),
            _ => None,
        }
    }

    pub fn into_tree(self) -> Option<Tree> {
        match self {
            Self::Tree(t) => Some(t),
            _ => None,
        }
    }

    pub fn into_commit(self) -> Option<Commit> {
        match self {
            Self::Commit(c) => Some(c),
            _ => None,
        }
    }
}

impl From<Blob> for Object {
    fn from(blob: Blob) -> Self {
        Self::Blob(blob)
    }
}

impl From<Tree> for Object {
    fn from(tree: Tree) -> Self {
        Self::Tree(tree)
    }
}

impl From<Commit> for Object {
    fn from(commit: Commit) -> Self {
        Self::Commit(commit)
    }
}
