//! File-backed reference store.
//!
//! One file per reference, holding the target digest as hex plus a newline.
//! Writes go through a temporary file in the same directory and are moved
//! into place with an atomic rename, so readers see either the old or the
//! new value. Compare-and-set is serialized per (repository, name) with an
//! in-process mutex; the lock covers only the read-compare-rename, never
//! object I/O.
//!
//! A name is a path, so `refs/heads/a` and `refs/heads/a/b` cannot both be
//! stored. Creations take a second, store-wide lock while they check for
//! such a collision and write, and so does the directory cleanup after a
//! delete.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use cts_types::{Digest, RepositoryId};
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{RefError, RefResult};
use crate::traits::{check_update, RefStore};
use crate::types::RefName;

/// Where a repository's `refs/` directory lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefLayout {
    /// `<root>/<repository-id>/refs/...`, for stores hosting many repositories.
    Scoped,
    /// `<root>/refs/...`, for a single local repository. The repository id
    /// passed to each call is ignored.
    Single,
}

type LockKey = (RepositoryId, RefName);

/// A filesystem implementation of [`RefStore`].
#[derive(Debug)]
pub struct FsRefStore {
    root: PathBuf,
    layout: RefLayout,
    locks: Mutex<HashMap<LockKey, Arc<Mutex<()>>>>,
    creates: Mutex<()>,
}

impl FsRefStore {
    pub fn open(root: impl Into<PathBuf>, layout: RefLayout) -> RefResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            layout,
            locks: Mutex::new(HashMap::new()),
            creates: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn repo_dir(&self, repo: &RepositoryId) -> PathBuf {
        match self.layout {
            RefLayout::Scoped => self.root.join(repo.to_string()),
            RefLayout::Single => self.root.clone(),
        }
    }

    fn ref_path(&self, repo: &RepositoryId, name: &RefName) -> PathBuf {
        // RefName validation rules out `..`, leading `/`, and `.`-prefixed
        // components, so the join cannot escape the repository directory.
        self.repo_dir(repo).join(name.as_str())
    }

    fn lock_for(&self, repo: &RepositoryId, name: &RefName) -> RefResult<Arc<Mutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|e| RefError::Storage(format!("lock poisoned: {e}")))?;
        Ok(locks
            .entry((*repo, name.clone()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }

    /// Forget the lock for a deleted name unless another caller holds it.
    fn release_lock(&self, repo: &RepositoryId, name: &RefName, lock: &Arc<Mutex<()>>) {
        if let Ok(mut locks) = self.locks.lock() {
            // One count for the map, one for `lock`.
            if Arc::strong_count(lock) == 2 {
                locks.remove(&(*repo, name.clone()));
            }
        }
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or(0)
    }

    fn creation_lock(&self) -> RefResult<std::sync::MutexGuard<'_, ()>> {
        self.creates
            .lock()
            .map_err(|e| RefError::Storage(format!("lock poisoned: {e}")))
    }

    /// The stored name that shares a path with `name`, if any.
    ///
    /// Called with the creation lock held. Directories left empty by earlier
    /// deletes are cleared out of the way.
    fn collision(&self, repo: &RepositoryId, name: &RefName) -> RefResult<Option<String>> {
        let base = self.repo_dir(repo);
        let parts: Vec<&str> = name.as_str().split('/').collect();
        for end in 1..parts.len() {
            let prefix = parts[..end].join("/");
            if base.join(&prefix).is_file() {
                return Ok(Some(prefix));
            }
        }

        let path = self.ref_path(repo, name);
        if !path.is_dir() {
            return Ok(None);
        }
        for entry in WalkDir::new(&path).sort_by_file_name() {
            let entry = entry.map_err(|e| RefError::Storage(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(found) = self.name_at(&base, entry.path()) {
                return Ok(Some(found.to_string()));
            }
        }
        fs::remove_dir_all(&path)?;
        Ok(None)
    }

    /// Remove directories emptied by deleting `path`, up to `refs/<kind>`.
    fn prune_empty_parents(&self, repo: &RepositoryId, path: &Path) {
        let stop = self.repo_dir(repo).join("refs");
        let mut dir = path.parent();
        while let Some(current) = dir {
            if current.parent() == Some(stop.as_path()) || !current.starts_with(&stop) {
                break;
            }
            // Fails on a non-empty directory, which ends the walk.
            if fs::remove_dir(current).is_err() {
                break;
            }
            dir = current.parent();
        }
    }

    /// Parse the reference a file under `base` stands for.
    fn name_at(&self, base: &Path, path: &Path) -> Option<RefName> {
        let rel = path.strip_prefix(base).ok()?;
        let full = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        // Rejects in-flight temp files, which start with '.'.
        RefName::parse(&full).ok()
    }

    fn read_file(&self, path: &Path, name: &RefName) -> RefResult<Option<Digest>> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        text.parse::<Digest>()
            .map(Some)
            .map_err(|e| RefError::Corrupt {
                name: name.to_string(),
                reason: e.to_string(),
            })
    }

    fn write_file(&self, path: &Path, digest: &Digest) -> RefResult<()> {
        let dir = path
            .parent()
            .ok_or_else(|| RefError::Storage(format!("no parent for {}", path.display())))?;
        fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        writeln!(tmp, "{}", digest.to_hex())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| RefError::Io(e.error))?;
        Ok(())
    }
}

impl RefStore for FsRefStore {
    fn try_read(&self, repo: &RepositoryId, name: &RefName) -> RefResult<Option<Digest>> {
        self.read_file(&self.ref_path(repo, name), name)
    }

    fn compare_and_set(
        &self,
        repo: &RepositoryId,
        name: &RefName,
        expected: Option<Digest>,
        new: Digest,
    ) -> RefResult<()> {
        let lock = self.lock_for(repo, name)?;
        let _guard = lock
            .lock()
            .map_err(|e| RefError::Storage(format!("lock poisoned: {e}")))?;

        let path = self.ref_path(repo, name);
        let current = self.read_file(&path, name)?;
        check_update(name, current, expected)?;
        let _creating = match current {
            Some(_) => None,
            None => {
                let guard = self.creation_lock()?;
                if let Some(existing) = self.collision(repo, name)? {
                    return Err(RefError::NameCollision {
                        name: name.to_string(),
                        existing,
                    });
                }
                Some(guard)
            }
        };
        self.write_file(&path, &new)?;
        debug!(%repo, %name, target = %new.short_hex(), "reference updated");
        Ok(())
    }

    fn delete(&self, repo: &RepositoryId, name: &RefName, expected: Digest) -> RefResult<()> {
        let lock = self.lock_for(repo, name)?;
        let _guard = lock
            .lock()
            .map_err(|e| RefError::Storage(format!("lock poisoned: {e}")))?;

        let path = self.ref_path(repo, name);
        match self.read_file(&path, name)? {
            None => Err(RefError::ReferenceNotFound {
                name: name.to_string(),
            }),
            Some(actual) if actual != expected => Err(RefError::Conflict {
                name: name.to_string(),
                expected: Some(expected),
                actual: Some(actual),
            }),
            Some(_) => {
                fs::remove_file(&path)?;
                {
                    let _creating = self.creation_lock()?;
                    self.prune_empty_parents(repo, &path);
                }
                self.release_lock(repo, name, &lock);
                debug!(%repo, %name, "reference deleted");
                Ok(())
            }
        }
    }

    fn list(&self, repo: &RepositoryId) -> RefResult<Vec<(RefName, Digest)>> {
        let base = self.repo_dir(repo);
        let refs_dir = base.join("refs");
        if !refs_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in WalkDir::new(&refs_dir).sort_by_file_name() {
            let entry = entry.map_err(|e| RefError::Storage(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(name) = self.name_at(&base, entry.path()) else {
                warn!(path = %entry.path().display(), "ignoring unrecognised file under refs/");
                continue;
            };
            if let Some(digest) = self.read_file(entry.path(), &name)? {
                out.push((name, digest));
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    fn remove_repository(&self, repo: &RepositoryId) -> RefResult<()> {
        let dir = self.repo_dir(repo).join("refs");
        match fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        if let Ok(mut locks) = self.locks.lock() {
            locks.retain(|(r, _), _| r != repo);
        }
        Ok(())
    }
}
