//! The staging area and the commit builder.
//!
//! The [`Index`] is a `BTreeMap<String, IndexEntry>` of pending changes keyed
//! by slash-separated path. It holds no handle to a store; every operation
//! that touches objects takes the [`ObjectStore`] it should use. Reading files
//! from disk is the caller's job.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use cts_graph::CommitGraph;
use cts_refs::{RefError, RefName, RefStore};
use cts_store::{
    digest_of, validate_entry_name, Blob, Commit, EntryMode, Object, ObjectKind, ObjectStore,
    Tree, TreeEntry,
};
use cts_types::{Digest, RepositoryId, Signature};

use crate::entry::IndexEntry;
use crate::error::{IndexError, IndexResult};
use crate::status::{FileStatus, StatusEntry, WorkdirStatus};

/// Current on-disk index format.
pub const INDEX_VERSION: u32 = 1;

/// Whether a commit may record a tree identical to its parent's.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitPolicy {
    pub allow_empty: bool,
}

/// The branch a commit lands on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BranchRef {
    pub repo: RepositoryId,
    pub name: RefName,
}

impl BranchRef {
    pub fn new(repo: RepositoryId, name: RefName) -> Self {
        Self { repo, name }
    }
}

/// The staging index: pending changes for the next commit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub version: u32,
    entries: BTreeMap<String, IndexEntry>,
}

impl Default for Index {
    fn default() -> Self {
        Self::new()
    }
}

impl Index {
    pub fn new() -> Self {
        Self {
            version: INDEX_VERSION,
            entries: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&IndexEntry> {
        self.entries.get(path)
    }

    /// All pending changes, ordered by path.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &IndexEntry)> {
        self.entries.iter().map(|(p, e)| (p.as_str(), e))
    }

    // ---------------------------------------------------------------
    // Stage operations
    // ---------------------------------------------------------------

    /// Store `content` as a blob and record it at `path`.
    pub fn stage<S: ObjectStore + ?Sized>(
        &mut self,
        store: &S,
        path: &str,
        content: &[u8],
        mode: EntryMode,
    ) -> IndexResult<Digest> {
        validate_path(path)?;
        if mode == EntryMode::Directory {
            return Err(IndexError::InvalidPath {
                path: path.to_string(),
                reason: "only files can be staged".into(),
            });
        }
        let digest = store.put_object(&Object::Blob(Blob::new(content)))?;
        debug!(path, digest = %digest.short_hex(), size = content.len(), "staged");
        self.entries.insert(
            path.to_string(),
            IndexEntry::staged(digest, mode, content.len() as u64),
        );
        Ok(digest)
    }

    /// Record that `path` should be absent from the next commit.
    pub fn stage_removal(&mut self, path: &str) -> IndexResult<()> {
        validate_path(path)?;
        debug!(path, "staged removal");
        self.entries.insert(path.to_string(), IndexEntry::Removed);
        Ok(())
    }

    /// Drop the pending change for `path`.
    pub fn unstage(&mut self, path: &str) -> IndexResult<IndexEntry> {
        self.entries
            .remove(path)
            .ok_or_else(|| IndexError::PathNotFound(path.to_string()))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    // ---------------------------------------------------------------
    // Persistence
    // ---------------------------------------------------------------

    /// Read an index file; a missing file is an empty index.
    pub fn load(path: &Path) -> IndexResult<Self> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => return Err(e.into()),
        };
        let index: Self = serde_json::from_slice(&data)
            .map_err(|e| IndexError::Persistence(format!("{}: {e}", path.display())))?;
        if index.version != INDEX_VERSION {
            return Err(IndexError::Persistence(format!(
                "unsupported index version {}",
                index.version
            )));
        }
        Ok(index)
    }

    /// Write the index through a temp file in the same directory.
    pub fn save(&self, path: &Path) -> IndexResult<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| IndexError::Persistence(e.to_string()))?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| IndexError::Io(e.error))?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Tree and commit building
    // ---------------------------------------------------------------

    /// Write the tree for `base_tree` with every pending change applied.
    ///
    /// Unchanged subtrees keep their digests, so only directories on the
    /// path of a change are re-encoded. Directories left empty are dropped;
    /// the root tree is always written, even when empty.
    pub fn build_tree<S: ObjectStore + ?Sized>(
        &self,
        store: &S,
        base_tree: Option<Digest>,
    ) -> IndexResult<Digest> {
        let changes: Vec<(&str, &IndexEntry)> = self.entries().collect();
        let root = write_dir(store, base_tree, &changes, "")?;
        match root {
            Some(digest) => Ok(digest),
            None => Ok(store.put_object(&Object::Tree(Tree::empty()))?),
        }
    }

    /// Turn the pending changes into a commit on `branch` and advance it.
    ///
    /// The branch head at the time of the call becomes the parent, and the
    /// branch moves only if it still points there. The index is cleared
    /// once the reference has moved.
    pub fn commit<S, R>(
        &mut self,
        store: &S,
        refs: &R,
        branch: &BranchRef,
        message: &str,
        author: Signature,
        policy: CommitPolicy,
    ) -> IndexResult<Digest>
    where
        S: ObjectStore + ?Sized,
        R: RefStore + ?Sized,
    {
        let BranchRef { repo, name: branch } = branch;
        if branch.is_tag() {
            return Err(RefError::InvalidName {
                name: branch.to_string(),
                reason: "cannot commit onto a tag".into(),
            }
            .into());
        }

        let head = refs.try_read(repo, branch)?;
        let parent_tree = match head {
            Some(h) => Some(CommitGraph::new(store).resolve_commit(&h)?.tree),
            None => None,
        };

        let tree = self.build_tree(store, parent_tree)?;
        let unchanged = match parent_tree {
            Some(parent) => parent == tree,
            None => tree == digest_of(&Object::Tree(Tree::empty())),
        };
        if unchanged && !policy.allow_empty {
            return Err(IndexError::NothingToCommit);
        }

        let commit = Commit::new(tree, head, message, author);
        let digest = store.put_object(&Object::Commit(commit))?;
        refs.compare_and_set(repo, branch, head, digest)?;
        self.clear();

        info!(
            branch = %branch,
            commit = %digest.short_hex(),
            parent = ?head.map(|h| h.short_hex()),
            "committed"
        );
        Ok(digest)
    }

    // ---------------------------------------------------------------
    // Status
    // ---------------------------------------------------------------

    /// Pending changes that actually differ from `base_tree`.
    ///
    /// Only `staged` is filled in; comparing against the working directory
    /// is left to the caller.
    pub fn status<S: ObjectStore + ?Sized>(
        &self,
        store: &S,
        base_tree: Option<Digest>,
    ) -> IndexResult<WorkdirStatus> {
        let tracked = match base_tree {
            Some(tree) => flatten_tree(store, &tree)?,
            None => BTreeMap::new(),
        };

        let mut status = WorkdirStatus::new();
        for (path, entry) in &self.entries {
            let change = match (entry, tracked.get(path)) {
                (IndexEntry::Staged { .. }, None) => Some(FileStatus::New),
                (IndexEntry::Staged { digest, mode, .. }, Some(&(old, old_mode))) => {
                    (*digest != old || *mode != old_mode).then_some(FileStatus::Modified)
                }
                (IndexEntry::Removed, Some(_)) => Some(FileStatus::Deleted),
                (IndexEntry::Removed, None) => None,
            };
            if let Some(change) = change {
                status.staged.push(StatusEntry::new(path.clone(), change));
            }
        }
        Ok(status)
    }
}

/// Every file reachable from `tree`, keyed by slash-separated path.
pub fn flatten_tree<S: ObjectStore + ?Sized>(
    store: &S,
    tree: &Digest,
) -> IndexResult<BTreeMap<String, (Digest, EntryMode)>> {
    let mut files = BTreeMap::new();
    let mut pending = vec![(String::new(), *tree)];
    while let Some((prefix, digest)) = pending.pop() {
        let tree = load_tree(store, &digest)?;
        for entry in tree.entries() {
            let path = join(&prefix, &entry.name);
            if entry.is_tree() {
                pending.push((path, entry.target));
            } else {
                files.insert(path, (entry.target, entry.mode));
            }
        }
    }
    Ok(files)
}

fn load_tree<S: ObjectStore + ?Sized>(store: &S, digest: &Digest) -> IndexResult<Tree> {
    let object = store.get_object(digest, ObjectKind::Tree)?;
    Ok(object.into_tree().unwrap_or_default())
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

fn validate_path(path: &str) -> IndexResult<()> {
    if path.is_empty() {
        return Err(IndexError::InvalidPath {
            path: path.to_string(),
            reason: "path is empty".into(),
        });
    }
    for segment in path.split('/') {
        validate_entry_name(segment).map_err(|reason| IndexError::InvalidPath {
            path: path.to_string(),
            reason,
        })?;
    }
    Ok(())
}

/// Apply `changes` (paths relative to `dir`) on top of `base` and write the
/// result. Returns `None` when the directory ends up empty.
fn write_dir<S: ObjectStore + ?Sized>(
    store: &S,
    base: Option<Digest>,
    changes: &[(&str, &IndexEntry)],
    dir: &str,
) -> IndexResult<Option<Digest>> {
    let mut entries: BTreeMap<String, TreeEntry> = match base {
        Some(digest) => load_tree(store, &digest)?
            .entries()
            .iter()
            .map(|e| (e.name.clone(), e.clone()))
            .collect(),
        None => BTreeMap::new(),
    };

    let mut direct: BTreeMap<&str, &IndexEntry> = BTreeMap::new();
    let mut nested: BTreeMap<&str, Vec<(&str, &IndexEntry)>> = BTreeMap::new();
    for &(path, entry) in changes {
        match path.split_once('/') {
            Some((head, rest)) => nested.entry(head).or_default().push((rest, entry)),
            None => {
                direct.insert(path, entry);
            }
        }
    }

    for (name, sub_changes) in &nested {
        let path = join(dir, name);
        let sub_base = match entries.get(*name) {
            Some(existing) if existing.is_tree() => Some(existing.target),
            Some(_) if direct.get(name).is_some_and(|e| e.is_removal()) => None,
            Some(_) => {
                return Err(IndexError::InvalidPath {
                    path,
                    reason: "is a file in the base tree".into(),
                })
            }
            None => None,
        };
        match write_dir(store, sub_base, sub_changes, &path)? {
            Some(digest) => {
                entries.insert(
                    name.to_string(),
                    TreeEntry::new(EntryMode::Directory, *name, digest),
                );
            }
            None => {
                entries.remove(*name);
            }
        }
    }

    for (name, entry) in &direct {
        let existing_is_tree = entries.get(*name).is_some_and(TreeEntry::is_tree);
        match entry {
            IndexEntry::Staged { digest, mode, .. } => {
                if existing_is_tree {
                    return Err(IndexError::InvalidPath {
                        path: join(dir, name),
                        reason: "is a directory".into(),
                    });
                }
                entries.insert(name.to_string(), TreeEntry::new(*mode, *name, *digest));
            }
            IndexEntry::Removed => {
                if !existing_is_tree {
                    entries.remove(*name);
                } else if !nested.contains_key(name) {
                    return Err(IndexError::InvalidPath {
                        path: join(dir, name),
                        reason: "is a directory; remove its files instead".into(),
                    });
                }
            }
        }
    }

    if entries.is_empty() && !dir.is_empty() {
        return Ok(None);
    }
    let tree = Tree::new(entries.into_values().collect())?;
    let digest = store.put_object(&Object::Tree(tree))?;
    debug!(dir, digest = %digest.short_hex(), "wrote tree");
    Ok(Some(digest))
}
