//! Push and pull of a single branch.
//!
//! Push sends the commits the remote lacks (plus every tree and blob they
//! need that the remote reports missing) in dependency order, then moves the
//! remote branch by compare-and-set. Pull is the mirror image. Neither side
//! ever moves a branch to a commit that does not descend from its current
//! value.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use cts_crypto::ContentHasher;
use cts_graph::CommitGraph;
use cts_protocol::ObjectTransfer;
use cts_refs::{RefError, RefName, RefStore};
use cts_store::{accept_object, decode, peek_kind, Commit, ObjectKind, ObjectStore, StoreError};
use cts_types::{Digest, RepositoryId};

use crate::error::{SyncError, SyncResult};
use crate::retry::RetryPolicy;
use crate::transport::RemoteTransport;

/// How a push changed the remote branch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushStatus {
    /// The remote already pointed at the local head.
    UpToDate,
    /// The branch did not exist remotely and was created.
    Created,
    FastForward,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PushOutcome {
    pub status: PushStatus,
    pub branch: RefName,
    pub head: Digest,
    /// Commits the remote did not have.
    pub commits: usize,
    pub objects_sent: usize,
    pub bytes_sent: u64,
}

/// How a pull changed the local branch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PullStatus {
    UpToDate,
    /// The local branch already contains the remote head.
    AlreadyAhead,
    Created,
    FastForward,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PullOutcome {
    pub status: PullStatus,
    pub branch: RefName,
    /// The local head after the pull.
    pub head: Digest,
    pub commits: usize,
    pub objects_received: usize,
    pub bytes_received: u64,
}

#[derive(Default)]
struct Received {
    objects: usize,
    bytes: u64,
}

/// One step of the post-order tree download.
enum Step {
    Visit(Digest, ObjectKind),
    Store(ObjectTransfer),
}

/// Synchronizes branches of a local repository with one remote.
pub struct SyncEngine {
    objects: Arc<dyn ObjectStore>,
    refs: Arc<dyn RefStore>,
    local_repo: RepositoryId,
    transport: Arc<dyn RemoteTransport>,
    retry: RetryPolicy,
}

impl SyncEngine {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        refs: Arc<dyn RefStore>,
        local_repo: RepositoryId,
        transport: Arc<dyn RemoteTransport>,
    ) -> Self {
        Self {
            objects,
            refs,
            local_repo,
            transport,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn graph(&self) -> CommitGraph<'_, dyn ObjectStore> {
        CommitGraph::new(self.objects.as_ref())
    }

    async fn remote_head(&self, branch: &RefName) -> SyncResult<Option<Digest>> {
        self.retry.run("head", || self.transport.head(branch)).await
    }

    // ---------------------------------------------------------------
    // Push
    // ---------------------------------------------------------------

    /// Publish the local `branch` to the remote.
    ///
    /// Fails with [`SyncError::NonFastForward`] if the remote head is not an
    /// ancestor of the local one, both before transfer and after a lost
    /// reference race. Objects uploaded before a failure stay on the remote
    /// unreferenced; the remote branch never points at a partial history.
    pub async fn push(&self, branch: &RefName) -> SyncResult<PushOutcome> {
        let local_head = self.refs.read(&self.local_repo, branch)?;
        let remote_head = self.remote_head(branch).await?;

        let mut outcome = PushOutcome {
            status: PushStatus::UpToDate,
            branch: branch.clone(),
            head: local_head,
            commits: 0,
            objects_sent: 0,
            bytes_sent: 0,
        };
        if remote_head == Some(local_head) {
            info!(branch = %branch, head = %local_head.short_hex(), "remote is up to date");
            return Ok(outcome);
        }
        if let Some(remote) = remote_head {
            if !self.graph().is_ancestor(&remote, &local_head)? {
                return Err(SyncError::NonFastForward {
                    name: branch.to_string(),
                    local: local_head,
                    remote: Some(remote),
                });
            }
        }

        let commits: Vec<Digest> = self
            .graph()
            .range(local_head, remote_head)?
            .into_iter()
            .map(|(digest, _)| digest)
            .collect();
        let closure = self.graph().object_closure(&commits)?;
        let candidates: BTreeSet<Digest> = closure.iter().copied().collect();
        let missing = self
            .retry
            .run("missing", || self.transport.missing(&candidates))
            .await?;
        debug!(
            branch = %branch,
            commits = commits.len(),
            candidates = candidates.len(),
            missing = missing.len(),
            "negotiated push"
        );

        for digest in closure.iter().filter(|d| missing.contains(*d)) {
            let data = self.objects.get(digest)?;
            let kind = peek_kind(&data)?;
            let transfer = ObjectTransfer::new(*digest, kind, data);
            self.retry
                .run("upload", || self.transport.upload(&transfer))
                .await?;
            outcome.objects_sent += 1;
            outcome.bytes_sent += transfer.data.len() as u64;
        }

        outcome.commits = commits.len();
        outcome.status = self.advance_remote(branch, remote_head, local_head).await?;
        info!(
            branch = %branch,
            head = %local_head.short_hex(),
            commits = outcome.commits,
            objects = outcome.objects_sent,
            status = ?outcome.status,
            "push complete"
        );
        Ok(outcome)
    }

    /// Move the remote branch from `observed` to `local_head`.
    ///
    /// A lost race is retried only against a value that is still an
    /// ancestor of `local_head`. A CAS whose response never arrived is
    /// resolved by re-reading the remote head.
    async fn advance_remote(
        &self,
        branch: &RefName,
        observed: Option<Digest>,
        local_head: Digest,
    ) -> SyncResult<PushStatus> {
        let created_or_ff = |expected: Option<Digest>| match expected {
            None => PushStatus::Created,
            Some(_) => PushStatus::FastForward,
        };

        let attempts = self.retry.max_cas_attempts.max(1);
        let mut expected = observed;
        for attempt in 1..=attempts {
            let actual = match self
                .transport
                .compare_and_set(branch, expected, local_head)
                .await
            {
                Ok(()) => return Ok(created_or_ff(expected)),
                Err(SyncError::Ref(RefError::Conflict { actual, .. })) => actual,
                Err(err) if err.is_retryable() => {
                    warn!(branch = %branch, error = %err, "reference update outcome unknown");
                    self.remote_head(branch).await?
                }
                Err(err) => return Err(err),
            };

            if actual == Some(local_head) {
                return Ok(created_or_ff(expected));
            }
            if let Some(current) = actual {
                if !self.graph().is_ancestor(&current, &local_head)? {
                    return Err(SyncError::NonFastForward {
                        name: branch.to_string(),
                        local: local_head,
                        remote: Some(current),
                    });
                }
            }
            debug!(
                branch = %branch,
                attempt,
                remote = ?actual.map(|d| d.short_hex()),
                "remote moved; retrying reference update"
            );
            expected = actual;
            if attempt < attempts {
                tokio::time::sleep(self.retry.backoff(attempt)).await;
            }
        }
        Err(SyncError::Contended {
            name: branch.to_string(),
            attempts,
        })
    }

    // ---------------------------------------------------------------
    // Pull
    // ---------------------------------------------------------------

    /// Bring the local `branch` up to the remote's.
    ///
    /// Fails with [`SyncError::NonFastForward`] without touching the local
    /// branch or storing any commit if the local head is not an ancestor of
    /// the remote head.
    pub async fn pull(&self, branch: &RefName) -> SyncResult<PullOutcome> {
        let remote_head = self
            .remote_head(branch)
            .await?
            .ok_or_else(|| RefError::ReferenceNotFound {
                name: branch.to_string(),
            })?;
        let local_head = self.refs.try_read(&self.local_repo, branch)?;

        let mut outcome = PullOutcome {
            status: PullStatus::UpToDate,
            branch: branch.clone(),
            head: remote_head,
            commits: 0,
            objects_received: 0,
            bytes_received: 0,
        };
        if local_head == Some(remote_head) {
            return Ok(outcome);
        }
        if let Some(local) = local_head {
            if self.objects.contains(&remote_head)?
                && self.graph().is_ancestor(&remote_head, &local)?
            {
                outcome.status = PullStatus::AlreadyAhead;
                outcome.head = local;
                return Ok(outcome);
            }
        }

        // Walk the remote chain back to the first commit held locally.
        let mut chain: Vec<(ObjectTransfer, Commit)> = Vec::new();
        let mut base = None;
        let mut next = Some(remote_head);
        while let Some(digest) = next {
            if self.objects.contains(&digest)? {
                base = Some(digest);
                break;
            }
            let transfer = self.fetch(&digest, ObjectKind::Commit).await?;
            let commit = decode(&transfer.data, ObjectKind::Commit)?
                .into_commit()
                .ok_or_else(|| StoreError::CorruptObject {
                    digest,
                    reason: "expected commit".into(),
                })?;
            next = commit.parent;
            chain.push((transfer, commit));
        }

        if let Some(local) = local_head {
            let fast_forward = match base {
                Some(base) => self.graph().is_ancestor(&local, &base)?,
                None => false,
            };
            if !fast_forward {
                return Err(SyncError::NonFastForward {
                    name: branch.to_string(),
                    local,
                    remote: Some(remote_head),
                });
            }
        }

        let mut received = Received::default();
        for (transfer, commit) in chain.iter().rev() {
            self.fetch_tree(commit.tree, &mut received).await?;
            self.store_received(transfer, &mut received)?;
        }

        self.refs
            .compare_and_set(&self.local_repo, branch, local_head, remote_head)?;

        outcome.status = match local_head {
            None => PullStatus::Created,
            Some(_) => PullStatus::FastForward,
        };
        outcome.commits = chain.len();
        outcome.objects_received = received.objects;
        outcome.bytes_received = received.bytes;
        info!(
            branch = %branch,
            head = %remote_head.short_hex(),
            commits = outcome.commits,
            objects = outcome.objects_received,
            status = ?outcome.status,
            "pull complete"
        );
        Ok(outcome)
    }

    /// Download `digest` and check it is what we asked for.
    async fn fetch(&self, digest: &Digest, kind: ObjectKind) -> SyncResult<ObjectTransfer> {
        let transfer = self
            .retry
            .run("download", || self.transport.download(digest))
            .await?;
        let actual = ContentHasher::OBJECT.hash(&transfer.data);
        if actual != *digest {
            return Err(StoreError::HashMismatch {
                expected: *digest,
                actual,
            }
            .into());
        }
        let encoded = peek_kind(&transfer.data)?;
        if encoded != kind || transfer.kind != kind {
            return Err(StoreError::CorruptObject {
                digest: *digest,
                reason: format!("expected {kind}, got {encoded}"),
            }
            .into());
        }
        Ok(transfer)
    }

    /// Download every object under `root` that is absent locally and store
    /// it children first.
    async fn fetch_tree(&self, root: Digest, received: &mut Received) -> SyncResult<()> {
        let mut stack = vec![Step::Visit(root, ObjectKind::Tree)];
        while let Some(step) = stack.pop() {
            let (digest, kind) = match step {
                Step::Store(transfer) => {
                    self.store_received(&transfer, received)?;
                    continue;
                }
                Step::Visit(digest, kind) => (digest, kind),
            };
            if self.objects.contains(&digest)? {
                continue;
            }
            let transfer = self.fetch(&digest, kind).await?;
            if kind == ObjectKind::Blob {
                self.store_received(&transfer, received)?;
                continue;
            }

            let tree = decode(&transfer.data, ObjectKind::Tree)?
                .into_tree()
                .ok_or_else(|| StoreError::CorruptObject {
                    digest,
                    reason: "expected tree".into(),
                })?;
            let children: BTreeSet<Digest> = tree.entries().iter().map(|e| e.target).collect();
            let absent = self.objects.missing(&children)?;
            stack.push(Step::Store(transfer));
            for entry in tree.entries() {
                if absent.contains(&entry.target) {
                    stack.push(Step::Visit(entry.target, entry.mode.target_kind()));
                }
            }
        }
        Ok(())
    }

    fn store_received(&self, transfer: &ObjectTransfer, received: &mut Received) -> SyncResult<()> {
        accept_object(self.objects.as_ref(), &transfer.digest, &transfer.data)?;
        received.objects += 1;
        received.bytes += transfer.data.len() as u64;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use cts_index::{BranchRef, CommitPolicy, Index};
    use cts_refs::InMemoryRefStore;
    use cts_store::{EntryMode, InMemoryObjectStore};
    use cts_types::Signature;

    use super::*;
    use crate::hosted::HostedRepository;
    use crate::local::LocalTransport;

    fn main_ref() -> RefName {
        RefName::branch("main").unwrap()
    }

    /// A client-side repository.
    struct Peer {
        objects: Arc<InMemoryObjectStore>,
        refs: Arc<InMemoryRefStore>,
        repo: RepositoryId,
    }

    impl Peer {
        fn new() -> Self {
            Self {
                objects: Arc::new(InMemoryObjectStore::new()),
                refs: Arc::new(InMemoryRefStore::new()),
                repo: RepositoryId::generate(),
            }
        }

        fn commit(&self, files: &[(&str, &str)], message: &str) -> Digest {
            let mut index = Index::new();
            for (path, content) in files {
                index
                    .stage(self.objects.as_ref(), path, content.as_bytes(), EntryMode::Regular)
                    .unwrap();
            }
            let author = Signature::new("Dev", "dev@example.com", 1_700_000_000, 0).unwrap();
            index
                .commit(
                    self.objects.as_ref(),
                    self.refs.as_ref(),
                    &BranchRef::new(self.repo, main_ref()),
                    message,
                    author,
                    CommitPolicy::default(),
                )
                .unwrap()
        }

        fn head(&self) -> Option<Digest> {
            self.refs.try_read(&self.repo, &main_ref()).unwrap()
        }

        fn engine(&self, transport: Arc<dyn RemoteTransport>) -> SyncEngine {
            SyncEngine::new(self.objects.clone(), self.refs.clone(), self.repo, transport)
                .with_retry(RetryPolicy::immediate(3))
        }
    }

    fn server() -> (Arc<HostedRepository>, Arc<LocalTransport>) {
        let hosted = Arc::new(HostedRepository::in_memory(Some("test".into())));
        let transport = Arc::new(LocalTransport::new(hosted.clone()));
        (hosted, transport)
    }

    /// Wraps a [`LocalTransport`] to let another writer act just before a
    /// reference update, and optionally lose the update's response.
    struct Interposer {
        inner: Arc<LocalTransport>,
        before_cas: Mutex<Option<Box<dyn FnOnce(&HostedRepository) + Send>>>,
        lose_cas_response: Mutex<bool>,
        conflicts: Mutex<Vec<Option<Digest>>>,
    }

    impl Interposer {
        fn new(inner: Arc<LocalTransport>) -> Self {
            Self {
                inner,
                before_cas: Mutex::new(None),
                lose_cas_response: Mutex::new(false),
                conflicts: Mutex::new(Vec::new()),
            }
        }

        fn before_cas(self, hook: impl FnOnce(&HostedRepository) + Send + 'static) -> Self {
            *self.before_cas.lock().unwrap() = Some(Box::new(hook));
            self
        }
    }

    #[async_trait]
    impl RemoteTransport for Interposer {
        async fn head(&self, name: &RefName) -> SyncResult<Option<Digest>> {
            self.inner.head(name).await
        }

        async fn missing(&self, candidates: &BTreeSet<Digest>) -> SyncResult<BTreeSet<Digest>> {
            self.inner.missing(candidates).await
        }

        async fn upload(&self, transfer: &ObjectTransfer) -> SyncResult<()> {
            self.inner.upload(transfer).await
        }

        async fn download(&self, digest: &Digest) -> SyncResult<ObjectTransfer> {
            self.inner.download(digest).await
        }

        async fn compare_and_set(
            &self,
            name: &RefName,
            expected: Option<Digest>,
            new: Digest,
        ) -> SyncResult<()> {
            let hook = self.before_cas.lock().unwrap().take();
            if let Some(hook) = hook {
                hook(self.inner.repository());
            }
            let result = self.inner.compare_and_set(name, expected, new).await;
            if let Err(SyncError::Ref(RefError::Conflict { actual, .. })) = &result {
                self.conflicts.lock().unwrap().push(*actual);
            }
            let lose = std::mem::take(&mut *self.lose_cas_response.lock().unwrap());
            if lose && result.is_ok() {
                return Err(SyncError::NetworkFailure("response lost".into()));
            }
            result
        }
    }

    /// Copy the objects of `peer`'s history into `hosted` without moving
    /// any reference.
    fn preload(hosted: &HostedRepository, peer: &Peer, head: Digest) {
        let graph = CommitGraph::new(peer.objects.as_ref());
        let commits: Vec<Digest> = graph
            .range(head, None)
            .unwrap()
            .into_iter()
            .map(|(d, _)| d)
            .collect();
        for digest in graph.object_closure(&commits).unwrap() {
            let data = peer.objects.get(&digest).unwrap();
            let kind = peek_kind(&data).unwrap();
            hosted
                .receive(&ObjectTransfer::new(digest, kind, data))
                .unwrap();
        }
    }

    // ---------------------------------------------------------------
    // Push
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn push_chain_to_unborn_branch() {
        let (hosted, transport) = server();
        let client = Peer::new();
        let c1 = client.commit(&[("hello.txt", "hello")], "c1");
        let c2 = client.commit(&[("docs/readme.md", "read me")], "c2");

        // Before transfer the server lacks both commits and everything
        // their trees reference.
        let graph = CommitGraph::new(client.objects.as_ref());
        let closure = graph.object_closure(&[c1, c2]).unwrap();
        let candidates: BTreeSet<Digest> = closure.iter().copied().collect();
        assert_eq!(hosted.missing(&candidates).unwrap(), candidates);
        let c1_tree = graph.resolve_commit(&c1).unwrap().tree;
        let c2_tree = graph.resolve_commit(&c2).unwrap().tree;
        assert!(candidates.contains(&c1_tree) && candidates.contains(&c2_tree));

        let outcome = client.engine(transport).push(&main_ref()).await.unwrap();
        assert_eq!(outcome.status, PushStatus::Created);
        assert_eq!(outcome.head, c2);
        assert_eq!(outcome.commits, 2);
        assert_eq!(outcome.objects_sent, candidates.len());
        assert_eq!(hosted.head(&main_ref()).unwrap(), Some(c2));
        assert!(hosted.missing(&candidates).unwrap().is_empty());
    }

    #[tokio::test]
    async fn push_sends_only_missing_objects() {
        let (hosted, transport) = server();
        let client = Peer::new();
        client.commit(&[("a.txt", "a"), ("lib/b.txt", "b")], "c1");
        let engine = client.engine(transport);
        engine.push(&main_ref()).await.unwrap();

        client.commit(&[("lib/b.txt", "b2")], "c2");
        let outcome = engine.push(&main_ref()).await.unwrap();
        assert_eq!(outcome.status, PushStatus::FastForward);
        assert_eq!(outcome.commits, 1);
        // New blob, new lib tree, new root tree, new commit.
        assert_eq!(outcome.objects_sent, 4);
        assert_eq!(hosted.head(&main_ref()).unwrap(), client.head());
    }

    #[tokio::test]
    async fn push_when_up_to_date_sends_nothing() {
        let (_, transport) = server();
        let client = Peer::new();
        client.commit(&[("a.txt", "a")], "c1");
        let engine = client.engine(transport.clone());
        engine.push(&main_ref()).await.unwrap();
        let calls = transport.calls();

        let outcome = engine.push(&main_ref()).await.unwrap();
        assert_eq!(outcome.status, PushStatus::UpToDate);
        assert_eq!(outcome.objects_sent, 0);
        assert_eq!(transport.calls(), calls + 1);
    }

    #[tokio::test]
    async fn push_without_local_branch_fails() {
        let (_, transport) = server();
        let client = Peer::new();
        let err = client.engine(transport).push(&main_ref()).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Ref(RefError::ReferenceNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn push_of_diverged_history_is_rejected_before_transfer() {
        let (hosted, transport) = server();
        let a = Peer::new();
        let b = Peer::new();
        a.commit(&[("a.txt", "a")], "a1");
        b.commit(&[("b.txt", "b")], "b1");
        a.engine(transport.clone()).push(&main_ref()).await.unwrap();
        let before = hosted.head(&main_ref()).unwrap();

        let err = b.engine(transport).push(&main_ref()).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::NonFastForward { remote, .. } if remote == before
        ));
        assert_eq!(hosted.head(&main_ref()).unwrap(), before);
        assert!(!hosted.objects().contains(&b.head().unwrap()).unwrap());
    }

    #[tokio::test]
    async fn sibling_push_loses_race_and_is_rejected() {
        let (hosted, transport) = server();
        let a = Peer::new();
        let c1 = a.commit(&[("base.txt", "base")], "c1");
        a.engine(transport.clone()).push(&main_ref()).await.unwrap();

        let b = Peer::new();
        b.engine(transport.clone()).pull(&main_ref()).await.unwrap();
        assert_eq!(b.head(), Some(c1));

        let c2 = a.commit(&[("a.txt", "from a")], "c2");
        let c3 = b.commit(&[("b.txt", "from b")], "c3");

        // A's push lands between B's negotiation and B's reference update.
        preload(&hosted, &a, c2);
        let racing = Arc::new(Interposer::new(transport).before_cas(move |repo| {
            repo.update_ref(&main_ref(), Some(c1), c2).unwrap();
        }));
        let err = b.engine(racing.clone()).push(&main_ref()).await.unwrap_err();

        assert_eq!(*racing.conflicts.lock().unwrap(), vec![Some(c2)]);
        assert!(matches!(
            err,
            SyncError::NonFastForward { local, remote, .. } if local == c3 && remote == Some(c2)
        ));
        assert_eq!(hosted.head(&main_ref()).unwrap(), Some(c2));
    }

    #[tokio::test]
    async fn lost_race_against_ancestor_is_retried() {
        let (hosted, transport) = server();
        let client = Peer::new();
        let c1 = client.commit(&[("f.txt", "1")], "c1");
        client.engine(transport.clone()).push(&main_ref()).await.unwrap();
        let c2 = client.commit(&[("f.txt", "2")], "c2");
        let c3 = client.commit(&[("f.txt", "3")], "c3");

        // Another writer publishes c2 (an ancestor of c3) mid-push.
        preload(&hosted, &client, c2);
        let racing = Arc::new(Interposer::new(transport).before_cas(move |repo| {
            repo.update_ref(&main_ref(), Some(c1), c2).unwrap();
        }));
        let outcome = client.engine(racing.clone()).push(&main_ref()).await.unwrap();

        assert_eq!(*racing.conflicts.lock().unwrap(), vec![Some(c2)]);
        assert_eq!(outcome.status, PushStatus::FastForward);
        assert_eq!(hosted.head(&main_ref()).unwrap(), Some(c3));
    }

    #[tokio::test]
    async fn contended_push_gives_up() {
        let (hosted, transport) = server();
        let client = Peer::new();
        let c1 = client.commit(&[("f.txt", "1")], "c1");
        client.engine(transport.clone()).push(&main_ref()).await.unwrap();
        let c2 = client.commit(&[("f.txt", "2")], "c2");
        client.commit(&[("f.txt", "3")], "c3");
        preload(&hosted, &client, c2);

        let racing = Arc::new(Interposer::new(transport).before_cas(move |repo| {
            repo.update_ref(&main_ref(), Some(c1), c2).unwrap();
        }));
        let engine = SyncEngine::new(
            client.objects.clone(),
            client.refs.clone(),
            client.repo,
            racing,
        )
        .with_retry(RetryPolicy::none());
        let err = engine.push(&main_ref()).await.unwrap_err();
        assert!(matches!(err, SyncError::Contended { attempts: 1, .. }));
        assert_eq!(hosted.head(&main_ref()).unwrap(), Some(c2));
    }

    #[tokio::test]
    async fn lost_cas_response_is_resolved_by_rereading_head() {
        let (hosted, transport) = server();
        let client = Peer::new();
        let c1 = client.commit(&[("f.txt", "1")], "c1");

        let lossy = Interposer::new(transport);
        *lossy.lose_cas_response.lock().unwrap() = true;
        let outcome = client.engine(Arc::new(lossy)).push(&main_ref()).await.unwrap();
        assert_eq!(outcome.status, PushStatus::Created);
        assert_eq!(hosted.head(&main_ref()).unwrap(), Some(c1));
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let (hosted, transport) = server();
        let client = Peer::new();
        let c1 = client.commit(&[("f.txt", "1")], "c1");

        transport.fail_next(2);
        let outcome = client.engine(transport).push(&main_ref()).await.unwrap();
        assert_eq!(outcome.status, PushStatus::Created);
        assert_eq!(hosted.head(&main_ref()).unwrap(), Some(c1));
    }

    #[tokio::test]
    async fn exhausted_retries_leave_remote_untouched() {
        let (hosted, transport) = server();
        let client = Peer::new();
        client.commit(&[("f.txt", "1")], "c1");

        transport.fail_next(1);
        let engine = SyncEngine::new(
            client.objects.clone(),
            client.refs.clone(),
            client.repo,
            transport,
        )
        .with_retry(RetryPolicy::none());
        let err = engine.push(&main_ref()).await.unwrap_err();
        assert!(matches!(err, SyncError::NetworkFailure(_)));
        assert_eq!(hosted.head(&main_ref()).unwrap(), None);
    }

    // ---------------------------------------------------------------
    // Pull
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn pull_into_empty_repository() {
        let (_, transport) = server();
        let a = Peer::new();
        a.commit(&[("hello.txt", "hello"), ("src/lib.rs", "lib")], "c1");
        let c2 = a.commit(&[("src/main.rs", "main")], "c2");
        a.engine(transport.clone()).push(&main_ref()).await.unwrap();

        let b = Peer::new();
        let outcome = b.engine(transport).pull(&main_ref()).await.unwrap();
        assert_eq!(outcome.status, PullStatus::Created);
        assert_eq!(outcome.head, c2);
        assert_eq!(outcome.commits, 2);
        assert_eq!(b.head(), Some(c2));

        // B now holds the complete history.
        let graph = CommitGraph::new(b.objects.as_ref());
        let commits: Vec<Digest> = graph.range(c2, None).unwrap().into_iter().map(|(d, _)| d).collect();
        assert_eq!(graph.object_closure(&commits).unwrap().len(), outcome.objects_received);
    }

    #[tokio::test]
    async fn pull_fast_forwards_and_fetches_only_new_objects() {
        let (_, transport) = server();
        let a = Peer::new();
        a.commit(&[("keep.txt", "keep"), ("dir/x.txt", "x")], "c1");
        let engine_a = a.engine(transport.clone());
        engine_a.push(&main_ref()).await.unwrap();

        let b = Peer::new();
        let engine_b = b.engine(transport);
        engine_b.pull(&main_ref()).await.unwrap();

        let c2 = a.commit(&[("new.txt", "new")], "c2");
        engine_a.push(&main_ref()).await.unwrap();

        let outcome = engine_b.pull(&main_ref()).await.unwrap();
        assert_eq!(outcome.status, PullStatus::FastForward);
        assert_eq!(outcome.commits, 1);
        // New blob, new root tree, new commit; `dir` is unchanged.
        assert_eq!(outcome.objects_received, 3);
        assert_eq!(b.head(), Some(c2));

        let again = engine_b.pull(&main_ref()).await.unwrap();
        assert_eq!(again.status, PullStatus::UpToDate);
    }

    #[tokio::test]
    async fn pull_when_local_is_ahead_changes_nothing() {
        let (_, transport) = server();
        let a = Peer::new();
        a.commit(&[("f.txt", "1")], "c1");
        let engine = a.engine(transport);
        engine.push(&main_ref()).await.unwrap();
        let c2 = a.commit(&[("f.txt", "2")], "c2");

        let outcome = engine.pull(&main_ref()).await.unwrap();
        assert_eq!(outcome.status, PullStatus::AlreadyAhead);
        assert_eq!(outcome.head, c2);
        assert_eq!(a.head(), Some(c2));
    }

    #[tokio::test]
    async fn pull_of_diverged_branch_fails_without_touching_local() {
        let (_, transport) = server();
        let a = Peer::new();
        a.commit(&[("base.txt", "base")], "c1");
        a.engine(transport.clone()).push(&main_ref()).await.unwrap();

        let b = Peer::new();
        let engine_b = b.engine(transport.clone());
        engine_b.pull(&main_ref()).await.unwrap();

        let c2 = a.commit(&[("a.txt", "a")], "c2");
        a.engine(transport).push(&main_ref()).await.unwrap();
        let c3 = b.commit(&[("b.txt", "b")], "c3");

        let err = engine_b.pull(&main_ref()).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::NonFastForward { local, remote, .. } if local == c3 && remote == Some(c2)
        ));
        assert_eq!(b.head(), Some(c3));
        assert!(!b.objects.contains(&c2).unwrap());
    }

    #[tokio::test]
    async fn pull_of_unborn_remote_branch_fails() {
        let (_, transport) = server();
        let b = Peer::new();
        let err = b.engine(transport).pull(&main_ref()).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Ref(RefError::ReferenceNotFound { name }) if name == "refs/heads/main"
        ));
    }

    #[tokio::test]
    async fn pull_rejects_tampered_download() {
        struct Tampering(Arc<LocalTransport>);

        #[async_trait]
        impl RemoteTransport for Tampering {
            async fn head(&self, name: &RefName) -> SyncResult<Option<Digest>> {
                self.0.head(name).await
            }
            async fn missing(&self, c: &BTreeSet<Digest>) -> SyncResult<BTreeSet<Digest>> {
                self.0.missing(c).await
            }
            async fn upload(&self, t: &ObjectTransfer) -> SyncResult<()> {
                self.0.upload(t).await
            }
            async fn download(&self, digest: &Digest) -> SyncResult<ObjectTransfer> {
                let mut transfer = self.0.download(digest).await?;
                if transfer.kind == ObjectKind::Blob {
                    transfer.data = cts_store::encode(&cts_store::Object::Blob(
                        cts_store::Blob::new(b"evil".to_vec()),
                    ));
                }
                Ok(transfer)
            }
            async fn compare_and_set(
                &self,
                name: &RefName,
                expected: Option<Digest>,
                new: Digest,
            ) -> SyncResult<()> {
                self.0.compare_and_set(name, expected, new).await
            }
        }

        let (_, transport) = server();
        let a = Peer::new();
        a.commit(&[("f.txt", "honest")], "c1");
        a.engine(transport.clone()).push(&main_ref()).await.unwrap();

        let b = Peer::new();
        let err = b
            .engine(Arc::new(Tampering(transport)))
            .pull(&main_ref())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Store(StoreError::HashMismatch { .. })));
        assert_eq!(b.head(), None);
    }
}
