//! A local CTS workspace: a directory tree plus its `.cts/` metadata.
//!
//! ```text
//! .cts/config      remote, author identity, commit and sync settings
//! .cts/HEAD        current branch name
//! .cts/index       staged changes (JSON)
//! .cts/objects/    local object store
//! .cts/refs/heads/ local branches
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use tracing::{info, warn};

use cts_graph::CommitGraph;
use cts_index::{
    flatten_tree, BranchRef, CommitPolicy, FileStatus, Index, IndexEntry, IndexError, StatusEntry,
    WorkdirStatus,
};
use cts_refs::{FsRefStore, RefError, RefLayout, RefName, RefStore};
use cts_store::{Commit, EntryMode, FsObjectStore};
use cts_sync::{HttpTransport, PullOutcome, PullStatus, PushOutcome, SyncEngine, SyncError};
use cts_types::{Digest, RepositoryId, Signature};

use crate::config::{ClientConfig, RemoteConfig};
use crate::error::{ClientError, ClientResult};
use crate::worktree::{self, WorktreeUpdate};

pub const CTS_DIR: &str = ".cts";
pub const DEFAULT_BRANCH: &str = "main";

const CONFIG_FILE: &str = "config";
const HEAD_FILE: &str = "HEAD";
const INDEX_FILE: &str = "index";

/// The single-repository ref layout ignores ids; this one is used throughout.
const LOCAL_REPO: RepositoryId = RepositoryId::nil();

/// A commit as shown by `log`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    pub digest: Digest,
    pub commit: Commit,
}

/// What `switch_branch` did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BranchSwitch {
    /// The branch did not exist and now points where HEAD did.
    pub created: bool,
    /// Head of the branch now checked out; `None` while unborn.
    pub head: Option<Digest>,
    pub update: WorktreeUpdate,
}

pub struct Workspace {
    root: PathBuf,
    dir: PathBuf,
    config: ClientConfig,
    objects: Arc<FsObjectStore>,
    refs: Arc<FsRefStore>,
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace").field("root", &self.root).finish()
    }
}

impl Workspace {
    // ---------------------------------------------------------------
    // Setup
    // ---------------------------------------------------------------

    /// Create `.cts/` in `root`, on branch `main` with no commits.
    pub fn init(root: &Path) -> ClientResult<Self> {
        fs::create_dir_all(root)?;
        let root = root.canonicalize()?;
        let dir = root.join(CTS_DIR);
        if dir.exists() {
            return Err(ClientError::AlreadyInitialized(root));
        }
        fs::create_dir_all(&dir)?;
        ClientConfig::default().save(&dir.join(CONFIG_FILE))?;
        fs::write(dir.join(HEAD_FILE), format!("{DEFAULT_BRANCH}\n"))?;
        let workspace = Self::open_at(root)?;
        info!(root = %workspace.root.display(), "initialized workspace");
        Ok(workspace)
    }

    /// Open the workspace containing `start`, searching parent directories.
    pub fn open(start: &Path) -> ClientResult<Self> {
        let start = start.canonicalize()?;
        for dir in start.ancestors() {
            if dir.join(CTS_DIR).is_dir() {
                return Self::open_at(dir.to_path_buf());
            }
        }
        Err(ClientError::NotInitialized(start))
    }

    fn open_at(root: PathBuf) -> ClientResult<Self> {
        let dir = root.join(CTS_DIR);
        let config = match ClientConfig::load(&dir.join(CONFIG_FILE)) {
            Err(ClientError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                ClientConfig::default()
            }
            other => other?,
        };
        let objects = Arc::new(FsObjectStore::open(&dir)?);
        let refs = Arc::new(FsRefStore::open(&dir, RefLayout::Single)?);
        Ok(Self {
            root,
            dir,
            config,
            objects,
            refs,
        })
    }

    /// Initialize `root` as a workspace of `repository` on the server at
    /// `url`, then pull the default branch into it.
    ///
    /// `root` must be absent or empty. The pull result is `None` when the
    /// remote has no commits yet. If anything else fails the new `.cts/`
    /// directory is removed again.
    pub async fn clone_from(
        url: &str,
        repository: RepositoryId,
        root: &Path,
    ) -> ClientResult<(Self, Option<(PullOutcome, WorktreeUpdate)>)> {
        if root.exists() && fs::read_dir(root)?.next().is_some() {
            return Err(ClientError::DestinationNotEmpty(root.to_path_buf()));
        }
        let mut workspace = Self::init(root)?;
        let pulled = match workspace.set_remote(url, repository) {
            Ok(()) => workspace.pull().await,
            Err(e) => Err(e),
        };
        match pulled {
            Ok(pulled) => {
                info!(%url, repo = %repository, head = %pulled.0.head.short_hex(), "cloned");
                Ok((workspace, Some(pulled)))
            }
            Err(ClientError::Sync(SyncError::Ref(RefError::ReferenceNotFound { .. }))) => {
                info!(%url, repo = %repository, "cloned empty repository");
                Ok((workspace, None))
            }
            Err(e) => {
                if let Err(cleanup) = fs::remove_dir_all(&workspace.dir) {
                    warn!(error = %cleanup, "could not remove partial clone");
                }
                Err(e)
            }
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn objects(&self) -> &FsObjectStore {
        &self.objects
    }

    /// Replace the configuration and write it to `.cts/config`.
    pub fn set_config(&mut self, config: ClientConfig) -> ClientResult<()> {
        config.save(&self.dir.join(CONFIG_FILE))?;
        self.config = config;
        Ok(())
    }

    pub fn set_remote(&mut self, url: &str, repository: RepositoryId) -> ClientResult<()> {
        let mut config = self.config.clone();
        config.remote = Some(RemoteConfig {
            url: url.trim_end_matches('/').to_string(),
            repository,
        });
        self.set_config(config)
    }

    // ---------------------------------------------------------------
    // Branches
    // ---------------------------------------------------------------

    pub fn current_branch(&self) -> ClientResult<RefName> {
        let name = fs::read_to_string(self.dir.join(HEAD_FILE))?;
        Ok(RefName::branch(name.trim())?)
    }

    /// Make `name` the current branch.
    ///
    /// A branch that does not exist yet is created at the current head, and
    /// staged or edited files carry over to it. Checking out an existing
    /// branch with a different head rewrites the working directory, and is
    /// refused while there are staged or unstaged changes to tracked files.
    pub fn switch_branch(&self, name: &str) -> ClientResult<BranchSwitch> {
        let branch = RefName::branch(name)?;
        let current = self.current_branch()?;
        let head = self.head()?;
        if branch == current {
            return Ok(BranchSwitch {
                head,
                ..BranchSwitch::default()
            });
        }

        let mut switch = BranchSwitch::default();
        match self.refs.try_read(&LOCAL_REPO, &branch)? {
            None => {
                if let Some(head) = head {
                    self.refs.compare_and_set(&LOCAL_REPO, &branch, None, head)?;
                }
                switch.created = true;
                switch.head = head;
            }
            Some(target) if Some(target) == head => switch.head = Some(target),
            Some(target) => {
                let status = self.status()?;
                if !status.staged.is_empty() || !status.modified.is_empty() {
                    return Err(ClientError::UncommittedChanges {
                        branch: branch.short_name().to_string(),
                        reason: format!(
                            "{} staged and {} unstaged change(s) to tracked files",
                            status.staged.len(),
                            status.modified.len()
                        ),
                    });
                }
                let before = self.head_files()?;
                let tree = self.graph().resolve_commit(&target)?.tree;
                let after = flatten_tree(self.objects.as_ref(), &tree)?;
                switch.update = worktree::update(self.objects.as_ref(), &self.root, &before, &after)?;
                switch.head = Some(target);
            }
        }
        fs::write(self.dir.join(HEAD_FILE), format!("{}\n", branch.short_name()))?;
        info!(branch = %branch.short_name(), created = switch.created, "switched branch");
        Ok(switch)
    }

    /// The commit the current branch points at; `None` before the first commit.
    pub fn head(&self) -> ClientResult<Option<Digest>> {
        Ok(self.refs.try_read(&LOCAL_REPO, &self.current_branch()?)?)
    }

    pub fn branches(&self) -> ClientResult<Vec<(RefName, Digest)>> {
        Ok(self.refs.list(&LOCAL_REPO)?)
    }

    fn head_tree(&self) -> ClientResult<Option<Digest>> {
        match self.head()? {
            Some(head) => Ok(Some(self.graph().resolve_commit(&head)?.tree)),
            None => Ok(None),
        }
    }

    fn head_files(&self) -> ClientResult<BTreeMap<String, (Digest, EntryMode)>> {
        match self.head_tree()? {
            Some(tree) => Ok(flatten_tree(self.objects.as_ref(), &tree)?),
            None => Ok(BTreeMap::new()),
        }
    }

    fn graph(&self) -> CommitGraph<'_, FsObjectStore> {
        CommitGraph::new(self.objects.as_ref())
    }

    // ---------------------------------------------------------------
    // Staging
    // ---------------------------------------------------------------

    pub fn index(&self) -> ClientResult<Index> {
        Ok(Index::load(&self.dir.join(INDEX_FILE))?)
    }

    fn save_index(&self, index: &Index) -> ClientResult<()> {
        Ok(index.save(&self.dir.join(INDEX_FILE))?)
    }

    /// Stage the current content of files; directories are staged
    /// recursively. Returns each staged path with its blob digest.
    pub fn stage(&self, paths: &[PathBuf]) -> ClientResult<Vec<(String, Digest)>> {
        let mut index = self.index()?;
        let mut staged = Vec::new();
        for path in paths {
            let path = self.absolute(path)?;
            let files = if path.is_dir() {
                worktree::files_under(&self.root, &path.canonicalize()?)
            } else {
                vec![path]
            };
            for file in files {
                let rel = self.workspace_path(&file)?;
                let (content, mode) = worktree::read(&file)?;
                let digest = index.stage(self.objects.as_ref(), &rel, &content, mode)?;
                staged.push((rel, digest));
            }
        }
        self.save_index(&index)?;
        Ok(staged)
    }

    /// Record that paths will be absent from the next commit. A directory
    /// removes every tracked file beneath it. The files themselves are not
    /// touched.
    pub fn stage_removal(&self, paths: &[PathBuf]) -> ClientResult<Vec<String>> {
        let tracked = self.head_files()?;
        let mut index = self.index()?;
        let mut removed = Vec::new();
        for path in paths {
            let rel = self.workspace_path(&self.absolute(path)?)?;
            let prefix = format!("{rel}/");
            let known: BTreeSet<String> = tracked
                .keys()
                .cloned()
                .chain(index.entries().map(|(p, _)| p.to_string()))
                .collect();
            let matched: Vec<String> = known
                .into_iter()
                .filter(|p| *p == rel || p.starts_with(&prefix))
                .collect();
            if matched.is_empty() {
                return Err(IndexError::PathNotFound(rel).into());
            }
            for p in matched {
                index.stage_removal(&p)?;
                removed.push(p);
            }
        }
        self.save_index(&index)?;
        Ok(removed)
    }

    pub fn unstage(&self, paths: &[PathBuf]) -> ClientResult<Vec<String>> {
        let mut index = self.index()?;
        let mut unstaged = Vec::new();
        for path in paths {
            let rel = self.workspace_path(&self.absolute(path)?)?;
            index.unstage(&rel)?;
            unstaged.push(rel);
        }
        self.save_index(&index)?;
        Ok(unstaged)
    }

    // ---------------------------------------------------------------
    // History
    // ---------------------------------------------------------------

    /// Commit the staged changes on the current branch.
    pub fn commit(&self, message: &str) -> ClientResult<Digest> {
        self.commit_with(message, self.config.commit_policy())
    }

    pub fn commit_with(&self, message: &str, policy: CommitPolicy) -> ClientResult<Digest> {
        let author = self.author()?;
        let branch = BranchRef::new(LOCAL_REPO, self.current_branch()?);
        let mut index = self.index()?;
        let digest = index.commit(
            self.objects.as_ref(),
            self.refs.as_ref(),
            &branch,
            message,
            author,
            policy,
        )?;
        self.save_index(&index)?;
        Ok(digest)
    }

    fn author(&self) -> ClientResult<Signature> {
        let now = Local::now();
        let offset_minutes = now.offset().local_minus_utc() / 60;
        Ok(Signature::new(
            self.config.user.name.clone(),
            self.config.user.email.clone(),
            now.timestamp(),
            offset_minutes,
        )?)
    }

    /// Commits on the current branch, newest first.
    pub fn log(&self, limit: Option<usize>) -> ClientResult<Vec<LogEntry>> {
        let Some(head) = self.head()? else {
            return Ok(Vec::new());
        };
        let mut entries = Vec::new();
        for step in self.graph().ancestors(head).take(limit.unwrap_or(usize::MAX)) {
            let (digest, commit) = step?;
            entries.push(LogEntry { digest, commit });
        }
        Ok(entries)
    }

    /// Staged changes against HEAD plus working-directory changes against
    /// what is staged or committed.
    pub fn status(&self) -> ClientResult<WorkdirStatus> {
        let index = self.index()?;
        let mut status = index.status(self.objects.as_ref(), self.head_tree()?)?;

        // What the next commit would contain.
        let mut expected = self.head_files()?;
        for (path, entry) in index.entries() {
            match entry {
                IndexEntry::Staged { digest, mode, .. } => {
                    expected.insert(path.to_string(), (*digest, *mode));
                }
                IndexEntry::Removed => {
                    expected.remove(path);
                }
            }
        }

        let on_disk = worktree::scan(&self.root)?;
        for (path, file) in &on_disk {
            match expected.get(path) {
                Some(&(digest, mode)) if digest != file.digest || mode != file.mode => {
                    status.modified.push(StatusEntry::new(path.clone(), FileStatus::Modified));
                }
                Some(_) => {}
                None => status.untracked.push(path.clone()),
            }
        }
        for path in expected.keys() {
            if !on_disk.contains_key(path) {
                status.modified.push(StatusEntry::new(path.clone(), FileStatus::Deleted));
            }
        }
        status.modified.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(status)
    }

    // ---------------------------------------------------------------
    // Synchronization
    // ---------------------------------------------------------------

    fn engine(&self) -> ClientResult<SyncEngine> {
        let remote = self.config.remote.as_ref().ok_or(ClientError::NoRemote)?;
        let transport = HttpTransport::new(&remote.url, remote.repository)?;
        Ok(SyncEngine::new(
            self.objects.clone(),
            self.refs.clone(),
            LOCAL_REPO,
            Arc::new(transport),
        )
        .with_retry(self.config.retry_policy()))
    }

    /// Publish the current branch to the configured remote.
    pub async fn push(&self) -> ClientResult<PushOutcome> {
        let branch = self.current_branch()?;
        Ok(self.engine()?.push(&branch).await?)
    }

    /// Fast-forward the current branch from the remote, then bring the
    /// working directory up to date with it.
    pub async fn pull(&self) -> ClientResult<(PullOutcome, WorktreeUpdate)> {
        let branch = self.current_branch()?;
        let before = self.head_files()?;
        let outcome = self.engine()?.pull(&branch).await?;
        let update = match outcome.status {
            PullStatus::Created | PullStatus::FastForward => {
                let after = self.head_files()?;
                worktree::update(self.objects.as_ref(), &self.root, &before, &after)?
            }
            PullStatus::UpToDate | PullStatus::AlreadyAhead => WorktreeUpdate::default(),
        };
        Ok((outcome, update))
    }

    // ---------------------------------------------------------------
    // Paths
    // ---------------------------------------------------------------

    fn absolute(&self, path: &Path) -> ClientResult<PathBuf> {
        if path.is_absolute() {
            Ok(path.to_path_buf())
        } else {
            Ok(std::env::current_dir()?.join(path))
        }
    }

    /// The slash-separated path of `path` within the workspace.
    fn workspace_path(&self, path: &Path) -> ClientResult<String> {
        let outside = || ClientError::OutsideWorkspace {
            path: path.to_path_buf(),
        };
        // Resolve the parent so symlinked temp dirs and `..` compare
        // correctly; the file itself may no longer exist.
        let resolved = match (path.parent(), path.file_name()) {
            (Some(parent), Some(name)) => match parent.canonicalize() {
                Ok(parent) => parent.join(name),
                Err(_) => path.to_path_buf(),
            },
            _ => path.to_path_buf(),
        };
        let rel = resolved.strip_prefix(&self.root).map_err(|_| outside())?;
        let mut parts = Vec::new();
        for component in rel.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_str().ok_or_else(outside)?),
                _ => return Err(outside()),
            }
        }
        match parts.first() {
            None => Err(outside()),
            Some(&first) if first == CTS_DIR => Err(outside()),
            Some(_) => Ok(parts.join("/")),
        }
    }
}
