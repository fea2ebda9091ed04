//! The set of repositories a server hosts.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tempfile::NamedTempFile;
use tracing::{info, warn};

use cts_protocol::RepositoryInfo;
use cts_refs::{FsRefStore, InMemoryRefStore, RefLayout, RefStore};
use cts_store::{FsObjectStore, InMemoryObjectStore, ObjectStore};
use cts_sync::HostedRepository;
use cts_types::{RepositoryId, RepositoryName};

use crate::config::{ServerConfig, StorageBackend};
use crate::error::{ServerError, ServerResult};

const METADATA_FILE: &str = "repository.json";

type Repositories = HashMap<RepositoryId, Arc<HostedRepository>>;

/// Creates, finds, and deletes hosted repositories.
///
/// On disk each repository is a directory `<root>/<id>/` holding
/// `repository.json`, the object store (`objects/`, `tmp/`), and `refs/`.
///
/// All repositories share one reference store, which scopes names by
/// repository id. Each repository owns its object store, so deleting a
/// repository drops its objects with it.
pub struct RepositoryRegistry {
    root: Option<PathBuf>,
    refs: Arc<dyn RefStore>,
    repos: RwLock<Repositories>,
}

impl std::fmt::Debug for RepositoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryRegistry")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl RepositoryRegistry {
    pub fn in_memory() -> Self {
        Self {
            root: None,
            refs: Arc::new(InMemoryRefStore::new()),
            repos: RwLock::new(HashMap::new()),
        }
    }

    /// Open the registry a configuration describes, loading every
    /// repository already on disk.
    pub fn open(config: &ServerConfig) -> ServerResult<Self> {
        match config.storage {
            StorageBackend::Memory => Ok(Self::in_memory()),
            StorageBackend::Filesystem => Self::open_dir(&config.repos_root),
        }
    }

    pub fn open_dir(root: &Path) -> ServerResult<Self> {
        fs::create_dir_all(root)?;
        let refs: Arc<dyn RefStore> = Arc::new(FsRefStore::open(root, RefLayout::Scoped)?);
        let mut repos = HashMap::new();
        for entry in fs::read_dir(root)? {
            let dir = entry?.path();
            let metadata = dir.join(METADATA_FILE);
            if !metadata.is_file() {
                continue;
            }
            match load_info(&metadata) {
                Ok(info) => {
                    let objects = FsObjectStore::open(&dir)?;
                    let repo = HostedRepository::new(info, Arc::new(objects), refs.clone());
                    repos.insert(repo.id(), Arc::new(repo));
                }
                Err(e) => warn!(path = %metadata.display(), error = %e, "skipping unreadable repository"),
            }
        }
        info!(root = %root.display(), repositories = repos.len(), "repository registry opened");
        Ok(Self {
            root: Some(root.to_path_buf()),
            refs,
            repos: RwLock::new(repos),
        })
    }

    /// Register a new repository. A name, if given, must be a valid
    /// [`RepositoryName`].
    pub fn create(&self, name: Option<String>) -> ServerResult<Arc<HostedRepository>> {
        let name = name
            .map(|n| RepositoryName::new(n).map(RepositoryName::into_string))
            .transpose()
            .map_err(|e| ServerError::InvalidRequest(e.to_string()))?;
        let info = RepositoryInfo::new(RepositoryId::generate(), name);
        let objects: Arc<dyn ObjectStore> = match &self.root {
            None => Arc::new(InMemoryObjectStore::new()),
            Some(root) => {
                let dir = root.join(info.id.to_string());
                let objects = FsObjectStore::open(&dir)?;
                save_info(&dir, &info)?;
                Arc::new(objects)
            }
        };
        let repo = Arc::new(HostedRepository::new(info, objects, self.refs.clone()));
        self.write()?.insert(repo.id(), repo.clone());
        info!(repo = %repo.id(), name = ?repo.info().name, "repository created");
        Ok(repo)
    }

    pub fn get(&self, id: &RepositoryId) -> ServerResult<Arc<HostedRepository>> {
        self.read()?
            .get(id)
            .cloned()
            .ok_or_else(|| ServerError::repository_not_found(id))
    }

    /// Remove a repository together with its references and objects.
    pub fn delete(&self, id: &RepositoryId) -> ServerResult<()> {
        let repo = self
            .write()?
            .remove(id)
            .ok_or_else(|| ServerError::repository_not_found(id))?;
        repo.clear_refs()?;
        if let Some(root) = &self.root {
            match fs::remove_dir_all(root.join(id.to_string())) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        info!(repo = %id, "repository deleted");
        Ok(())
    }

    /// Metadata of every hosted repository, oldest first.
    pub fn list(&self) -> ServerResult<Vec<RepositoryInfo>> {
        let mut infos: Vec<RepositoryInfo> =
            self.read()?.values().map(|r| r.info().clone()).collect();
        infos.sort_by_key(|info| info.id);
        Ok(infos)
    }

    fn read(&self) -> ServerResult<RwLockReadGuard<'_, Repositories>> {
        self.repos
            .read()
            .map_err(|_| ServerError::Internal("repository registry lock poisoned".into()))
    }

    fn write(&self) -> ServerResult<RwLockWriteGuard<'_, Repositories>> {
        self.repos
            .write()
            .map_err(|_| ServerError::Internal("repository registry lock poisoned".into()))
    }
}

fn load_info(path: &Path) -> ServerResult<RepositoryInfo> {
    let text = fs::read_to_string(path)?;
    serde_json::from_str(&text)
        .map_err(|e| ServerError::Internal(format!("{}: {e}", path.display())))
}

fn save_info(dir: &Path, info: &RepositoryInfo) -> ServerResult<()> {
    let json = serde_json::to_vec_pretty(info)
        .map_err(|e| ServerError::Internal(e.to_string()))?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(&json)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dir.join(METADATA_FILE))
        .map_err(|e| ServerError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cts_protocol::ObjectTransfer;
    use cts_refs::RefName;
    use cts_store::{encode, Blob, Commit, Object, ObjectKind, Tree};
    use cts_types::{Digest, Signature};

    fn root_commit() -> (Vec<ObjectTransfer>, Digest) {
        let tree = Object::Tree(Tree::empty());
        let tree_digest = cts_store::digest_of(&tree);
        let author = Signature::new("Dev", "dev@example.com", 1_700_000_000, 0).unwrap();
        let commit = Object::Commit(Commit::new(tree_digest, None, "init", author));
        let commit_digest = cts_store::digest_of(&commit);
        let transfers = vec![
            ObjectTransfer::new(tree_digest, ObjectKind::Tree, encode(&tree)),
            ObjectTransfer::new(commit_digest, ObjectKind::Commit, encode(&commit)),
        ];
        (transfers, commit_digest)
    }

    fn main_ref() -> RefName {
        RefName::branch("main").unwrap()
    }

    // ----------------------------------------------------------------
    // In memory
    // ----------------------------------------------------------------

    #[test]
    fn create_get_delete() {
        let registry = RepositoryRegistry::in_memory();
        let repo = registry.create(Some("demo".into())).unwrap();
        let id = repo.id();

        assert_eq!(registry.get(&id).unwrap().info().name.as_deref(), Some("demo"));
        assert_eq!(registry.list().unwrap().len(), 1);

        registry.delete(&id).unwrap();
        assert!(matches!(
            registry.get(&id).unwrap_err(),
            ServerError::RepositoryNotFound(_)
        ));
        assert!(matches!(
            registry.delete(&id).unwrap_err(),
            ServerError::RepositoryNotFound(_)
        ));
    }

    #[test]
    fn repositories_do_not_share_objects_or_refs() {
        let registry = RepositoryRegistry::in_memory();
        let a = registry.create(None).unwrap();
        let b = registry.create(None).unwrap();

        let (transfers, head) = root_commit();
        for t in &transfers {
            a.receive(t).unwrap();
        }
        a.update_ref(&main_ref(), None, head).unwrap();

        assert!(!b.objects().contains(&head).unwrap());
        assert_eq!(b.head(&main_ref()).unwrap(), None);
        assert_eq!(a.head(&main_ref()).unwrap(), Some(head));
    }

    #[test]
    fn delete_drops_references() {
        let registry = RepositoryRegistry::in_memory();
        let repo = registry.create(None).unwrap();
        let (transfers, head) = root_commit();
        for t in &transfers {
            repo.receive(t).unwrap();
        }
        repo.update_ref(&main_ref(), None, head).unwrap();

        registry.delete(&repo.id()).unwrap();
        assert_eq!(repo.head(&main_ref()).unwrap(), None);
    }

    // ----------------------------------------------------------------
    // Filesystem
    // ----------------------------------------------------------------

    #[test]
    fn filesystem_repositories_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let (id, head) = {
            let registry = RepositoryRegistry::open_dir(dir.path()).unwrap();
            let repo = registry.create(Some("persisted".into())).unwrap();
            let (transfers, head) = root_commit();
            for t in &transfers {
                repo.receive(t).unwrap();
            }
            repo.update_ref(&main_ref(), None, head).unwrap();
            (repo.id(), head)
        };

        let registry = RepositoryRegistry::open_dir(dir.path()).unwrap();
        let repo = registry.get(&id).unwrap();
        assert_eq!(repo.info().name.as_deref(), Some("persisted"));
        assert_eq!(repo.head(&main_ref()).unwrap(), Some(head));
        assert!(repo.objects().contains(&head).unwrap());
    }

    #[test]
    fn filesystem_delete_removes_directory() {
        let dir = tempfile::tempdir().unwrap();
        let registry = RepositoryRegistry::open_dir(dir.path()).unwrap();
        let repo = registry.create(None).unwrap();
        let repo_dir = dir.path().join(repo.id().to_string());
        assert!(repo_dir.join(METADATA_FILE).is_file());

        registry.delete(&repo.id()).unwrap();
        assert!(!repo_dir.exists());
        assert!(RepositoryRegistry::open_dir(dir.path()).unwrap().list().unwrap().is_empty());
    }

    #[test]
    fn unreadable_metadata_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let junk = dir.path().join("junk");
        fs::create_dir_all(&junk).unwrap();
        fs::write(junk.join(METADATA_FILE), "not json").unwrap();

        let registry = RepositoryRegistry::open_dir(dir.path()).unwrap();
        assert!(registry.list().unwrap().is_empty());
    }

    #[test]
    fn blob_upload_lands_in_repository_store() {
        let dir = tempfile::tempdir().unwrap();
        let registry = RepositoryRegistry::open_dir(dir.path()).unwrap();
        let repo = registry.create(None).unwrap();
        let blob = Object::Blob(Blob::new(b"hello".to_vec()));
        let digest = cts_store::digest_of(&blob);
        repo.receive(&ObjectTransfer::new(digest, ObjectKind::Blob, encode(&blob)))
            .unwrap();
        assert!(repo.objects().contains(&digest).unwrap());
    }
}
