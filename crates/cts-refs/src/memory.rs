//! In-memory reference store for testing and ephemeral use.
//!
//! [`InMemoryRefStore`] keeps every repository's refs in one map behind a
//! single `RwLock`, which makes every operation trivially linearizable.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use cts_types::{Digest, RepositoryId};
use tracing::debug;

use crate::error::{RefError, RefResult};
use crate::traits::{check_update, nested, RefStore};
use crate::types::RefName;

type Table = HashMap<RepositoryId, BTreeMap<RefName, Digest>>;

/// An in-memory implementation of [`RefStore`].
#[derive(Debug, Default)]
pub struct InMemoryRefStore {
    refs: RwLock<Table>,
}

impl InMemoryRefStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_lock(&self) -> RefResult<RwLockReadGuard<'_, Table>> {
        self.refs
            .read()
            .map_err(|e| RefError::Storage(format!("lock poisoned: {e}")))
    }

    fn write_lock(&self) -> RefResult<RwLockWriteGuard<'_, Table>> {
        self.refs
            .write()
            .map_err(|e| RefError::Storage(format!("lock poisoned: {e}")))
    }
}

impl RefStore for InMemoryRefStore {
    fn try_read(&self, repo: &RepositoryId, name: &RefName) -> RefResult<Option<Digest>> {
        let refs = self.read_lock()?;
        Ok(refs.get(repo).and_then(|r| r.get(name)).copied())
    }

    fn compare_and_set(
        &self,
        repo: &RepositoryId,
        name: &RefName,
        expected: Option<Digest>,
        new: Digest,
    ) -> RefResult<()> {
        let mut refs = self.write_lock()?;
        let table = refs.entry(*repo).or_default();
        let current = table.get(name).copied();
        check_update(name, current, expected)?;
        if current.is_none() {
            if let Some(existing) = table.keys().find(|existing| nested(existing, name)) {
                return Err(RefError::NameCollision {
                    name: name.to_string(),
                    existing: existing.to_string(),
                });
            }
        }
        table.insert(name.clone(), new);
        debug!(%repo, %name, target = %new.short_hex(), "reference updated");
        Ok(())
    }

    fn delete(&self, repo: &RepositoryId, name: &RefName, expected: Digest) -> RefResult<()> {
        let mut refs = self.write_lock()?;
        let current = refs.get(repo).and_then(|r| r.get(name)).copied();
        match current {
            None => Err(RefError::ReferenceNotFound {
                name: name.to_string(),
            }),
            Some(actual) if actual != expected => Err(RefError::Conflict {
                name: name.to_string(),
                expected: Some(expected),
                actual: Some(actual),
            }),
            Some(_) => {
                if let Some(table) = refs.get_mut(repo) {
                    table.remove(name);
                }
                debug!(%repo, %name, "reference deleted");
                Ok(())
            }
        }
    }

    fn list(&self, repo: &RepositoryId) -> RefResult<Vec<(RefName, Digest)>> {
        let refs = self.read_lock()?;
        Ok(refs
            .get(repo)
            .map(|r| r.iter().map(|(n, d)| (n.clone(), *d)).collect())
            .unwrap_or_default())
    }

    fn remove_repository(&self, repo: &RepositoryId) -> RefResult<()> {
        self.write_lock()?.remove(repo);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn main_ref() -> RefName {
        RefName::branch("main").unwrap()
    }

    fn d(seed: &[u8]) -> Digest {
        Digest::of(seed)
    }

    // -----------------------------------------------------------------------
    // Compare-and-set
    // -----------------------------------------------------------------------

    #[test]
    fn create_and_read() {
        let store = InMemoryRefStore::new();
        let repo = RepositoryId::generate();
        store.compare_and_set(&repo, &main_ref(), None, d(b"c1")).unwrap();
        assert_eq!(store.read(&repo, &main_ref()).unwrap(), d(b"c1"));
    }

    #[test]
    fn read_missing_is_not_found() {
        let store = InMemoryRefStore::new();
        let repo = RepositoryId::generate();
        assert!(store.try_read(&repo, &main_ref()).unwrap().is_none());
        assert!(matches!(
            store.read(&repo, &main_ref()),
            Err(RefError::ReferenceNotFound { name }) if name == "refs/heads/main"
        ));
    }

    #[test]
    fn create_over_existing_conflicts() {
        let store = InMemoryRefStore::new();
        let repo = RepositoryId::generate();
        store.compare_and_set(&repo, &main_ref(), None, d(b"c1")).unwrap();
        match store.compare_and_set(&repo, &main_ref(), None, d(b"c2")) {
            Err(RefError::Conflict { expected, actual, .. }) => {
                assert_eq!(expected, None);
                assert_eq!(actual, Some(d(b"c1")));
            }
            other => panic!("expected Conflict, got {other:?}"),
        }
        assert_eq!(store.read(&repo, &main_ref()).unwrap(), d(b"c1"));
    }

    #[test]
    fn update_with_matching_expected() {
        let store = InMemoryRefStore::new();
        let repo = RepositoryId::generate();
        store.compare_and_set(&repo, &main_ref(), None, d(b"c1")).unwrap();
        store
            .compare_and_set(&repo, &main_ref(), Some(d(b"c1")), d(b"c2"))
            .unwrap();
        assert_eq!(store.read(&repo, &main_ref()).unwrap(), d(b"c2"));
    }

    #[test]
    fn stale_expected_reports_actual() {
        let store = InMemoryRefStore::new();
        let repo = RepositoryId::generate();
        store.compare_and_set(&repo, &main_ref(), None, d(b"c1")).unwrap();
        store
            .compare_and_set(&repo, &main_ref(), Some(d(b"c1")), d(b"c2"))
            .unwrap();
        match store.compare_and_set(&repo, &main_ref(), Some(d(b"c1")), d(b"c3")) {
            Err(RefError::Conflict { actual, .. }) => assert_eq!(actual, Some(d(b"c2"))),
            other => panic!("expected Conflict, got {other:?}"),
        }
    }

    #[test]
    fn update_of_missing_ref_conflicts_with_none() {
        let store = InMemoryRefStore::new();
        let repo = RepositoryId::generate();
        assert!(matches!(
            store.compare_and_set(&repo, &main_ref(), Some(d(b"c1")), d(b"c2")),
            Err(RefError::Conflict { actual: None, .. })
        ));
    }

    #[test]
    fn tags_are_immutable() {
        let store = InMemoryRefStore::new();
        let repo = RepositoryId::generate();
        let tag = RefName::tag("v1.0").unwrap();
        store.compare_and_set(&repo, &tag, None, d(b"c1")).unwrap();
        assert!(matches!(
            store.compare_and_set(&repo, &tag, Some(d(b"c1")), d(b"c2")),
            Err(RefError::TagImmutable { .. })
        ));
        assert_eq!(store.read(&repo, &tag).unwrap(), d(b"c1"));
    }

    #[test]
    fn concurrent_cas_has_one_winner() {
        let store = Arc::new(InMemoryRefStore::new());
        let repo = RepositoryId::generate();
        store.compare_and_set(&repo, &main_ref(), None, d(b"base")).unwrap();

        let handles: Vec<_> = (0..16u8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    store
                        .compare_and_set(&repo, &main_ref(), Some(d(b"base")), d(&[i]))
                        .is_ok()
                })
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(winners, 1);
    }

    // -----------------------------------------------------------------------
    // Scoping, listing, deletion
    // -----------------------------------------------------------------------

    #[test]
    fn repositories_are_isolated() {
        let store = InMemoryRefStore::new();
        let a = RepositoryId::generate();
        let b = RepositoryId::generate();
        store.compare_and_set(&a, &main_ref(), None, d(b"a")).unwrap();
        store.compare_and_set(&b, &main_ref(), None, d(b"b")).unwrap();
        assert_eq!(store.read(&a, &main_ref()).unwrap(), d(b"a"));
        assert_eq!(store.read(&b, &main_ref()).unwrap(), d(b"b"));
    }

    #[test]
    fn list_is_sorted_by_name() {
        let store = InMemoryRefStore::new();
        let repo = RepositoryId::generate();
        for name in ["zeta", "alpha", "feature/x"] {
            let r = RefName::branch(name).unwrap();
            store.compare_and_set(&repo, &r, None, d(name.as_bytes())).unwrap();
        }
        store
            .compare_and_set(&repo, &RefName::tag("v1").unwrap(), None, d(b"t"))
            .unwrap();
        let names: Vec<String> = store
            .list(&repo)
            .unwrap()
            .into_iter()
            .map(|(n, _)| n.to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "refs/heads/alpha",
                "refs/heads/feature/x",
                "refs/heads/zeta",
                "refs/tags/v1"
            ]
        );
        assert!(store.list(&RepositoryId::generate()).unwrap().is_empty());
    }

    #[test]
    fn delete_requires_expected_value() {
        let store = InMemoryRefStore::new();
        let repo = RepositoryId::generate();
        store.compare_and_set(&repo, &main_ref(), None, d(b"c1")).unwrap();
        assert!(matches!(
            store.delete(&repo, &main_ref(), d(b"other")),
            Err(RefError::Conflict { .. })
        ));
        store.delete(&repo, &main_ref(), d(b"c1")).unwrap();
        assert!(store.try_read(&repo, &main_ref()).unwrap().is_none());
        assert!(matches!(
            store.delete(&repo, &main_ref(), d(b"c1")),
            Err(RefError::ReferenceNotFound { .. })
        ));
    }

    #[test]
    fn remove_repository_drops_all_refs() {
        let store = InMemoryRefStore::new();
        let repo = RepositoryId::generate();
        let keep = RepositoryId::generate();
        store.compare_and_set(&repo, &main_ref(), None, d(b"c1")).unwrap();
        store.compare_and_set(&keep, &main_ref(), None, d(b"k")).unwrap();
        store.remove_repository(&repo).unwrap();
        assert!(store.list(&repo).unwrap().is_empty());
        assert_eq!(store.read(&keep, &main_ref()).unwrap(), d(b"k"));
    }
}
