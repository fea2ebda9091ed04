//! Read-only traversal over commits stored in an [`ObjectStore`].
//!
//! History is a forest of singly linked chains: each commit names at most
//! one parent. Nothing here mutates the store. A missing link is a hard
//! error, never a silently shortened history.

use std::collections::HashSet;

use tracing::debug;

use cts_store::{Commit, ObjectKind, ObjectStore, Tree};
use cts_types::Digest;

use crate::error::{GraphError, GraphResult};

/// History queries over a single object store.
pub struct CommitGraph<'a, S: ObjectStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: ObjectStore + ?Sized> CommitGraph<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Load and decode a commit.
    pub fn resolve_commit(&self, digest: &Digest) -> GraphResult<Commit> {
        resolve_commit(self.store, digest)
    }

    /// Load and decode a tree.
    pub fn resolve_tree(&self, digest: &Digest) -> GraphResult<Tree> {
        let object = self.store.get_object(digest, ObjectKind::Tree)?;
        object.into_tree().ok_or_else(|| GraphError::CorruptObject {
            digest: *digest,
            reason: "expected tree".into(),
        })
    }

    // ---------------------------------------------------------------
    // Ancestry
    // ---------------------------------------------------------------

    /// Walk from `head` back to the root commit, `head` first.
    ///
    /// The walk is lazy and can be restarted by cloning the iterator before
    /// consuming it. It stops after yielding the first error.
    pub fn ancestors(&self, head: Digest) -> Ancestors<'a, S> {
        Ancestors {
            store: self.store,
            next: Some(head),
        }
    }

    /// True if `candidate` is `of` or appears in its history.
    pub fn is_ancestor(&self, candidate: &Digest, of: &Digest) -> GraphResult<bool> {
        for step in self.ancestors(*of) {
            let (digest, _) = step?;
            if digest == *candidate {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Commits reachable from `head` but strictly newer than `stop`, oldest
    /// first.
    ///
    /// With `stop = None` this is the whole history. If `stop` is given but
    /// never reached the walk fails with [`GraphError::NotAnAncestor`].
    pub fn range(&self, head: Digest, stop: Option<Digest>) -> GraphResult<Vec<(Digest, Commit)>> {
        let mut commits = Vec::new();
        let mut reached = stop.is_none();
        for step in self.ancestors(head) {
            let (digest, commit) = step?;
            if Some(digest) == stop {
                reached = true;
                break;
            }
            commits.push((digest, commit));
        }
        if let (false, Some(stop)) = (reached, stop) {
            return Err(GraphError::NotAnAncestor {
                ancestor: stop,
                descendant: head,
            });
        }
        commits.reverse();
        debug!(head = %head.short_hex(), count = commits.len(), "computed commit range");
        Ok(commits)
    }

    // ---------------------------------------------------------------
    // Object closure
    // ---------------------------------------------------------------

    /// Every object reachable from `commits` through their trees, in
    /// dependency order.
    ///
    /// Each blob and subtree precedes the tree that lists it, and each root
    /// tree precedes its commit. Commits appear in the order given, so pass
    /// them oldest first (as [`range`](Self::range) returns them) to get
    /// parents before children. Parents outside `commits` are not followed.
    /// Digests appear once.
    pub fn object_closure(&self, commits: &[Digest]) -> GraphResult<Vec<Digest>> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for digest in commits {
            if seen.contains(digest) {
                continue;
            }
            let commit = self.resolve_commit(digest)?;
            self.collect_tree(commit.tree, &mut seen, &mut out)?;
            seen.insert(*digest);
            out.push(*digest);
        }
        Ok(out)
    }

    /// Post-order walk of a tree with an explicit stack.
    fn collect_tree(
        &self,
        root: Digest,
        seen: &mut HashSet<Digest>,
        out: &mut Vec<Digest>,
    ) -> GraphResult<()> {
        let mut stack = vec![(root, false)];
        while let Some((digest, expanded)) = stack.pop() {
            if expanded {
                out.push(digest);
                continue;
            }
            if !seen.insert(digest) {
                continue;
            }
            let tree = self.resolve_tree(&digest)?;
            stack.push((digest, true));
            for entry in tree.entries().iter().rev() {
                if seen.contains(&entry.target) {
                    continue;
                }
                if entry.is_tree() {
                    stack.push((entry.target, false));
                } else {
                    if !self.store.contains(&entry.target)? {
                        return Err(GraphError::ObjectNotFound(entry.target));
                    }
                    seen.insert(entry.target);
                    out.push(entry.target);
                }
            }
        }
        Ok(())
    }
}

fn resolve_commit<S: ObjectStore + ?Sized>(store: &S, digest: &Digest) -> GraphResult<Commit> {
    let object = store.get_object(digest, ObjectKind::Commit)?;
    object.into_commit().ok_or_else(|| GraphError::CorruptObject {
        digest: *digest,
        reason: "expected commit".into(),
    })
}

/// Lazy walk over a commit chain. See [`CommitGraph::ancestors`].
pub struct Ancestors<'a, S: ObjectStore + ?Sized> {
    store: &'a S,
    next: Option<Digest>,
}

impl<S: ObjectStore + ?Sized> Clone for Ancestors<'_, S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store,
            next: self.next,
        }
    }
}

impl<S: ObjectStore + ?Sized> Iterator for Ancestors<'_, S> {
    type Item = GraphResult<(Digest, Commit)>;

    fn next(&mut self) -> Option<Self::Item> {
        let digest = self.next.take()?;
        match resolve_commit(self.store, &digest) {
            Ok(commit) => {
                self.next = commit.parent;
                Some(Ok((digest, commit)))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

impl<S: ObjectStore + ?Sized> std::iter::FusedIterator for Ancestors<'_, S> {}
