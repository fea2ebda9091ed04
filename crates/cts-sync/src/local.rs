//! In-process transport over a [`HostedRepository`].

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use cts_protocol::ObjectTransfer;
use cts_refs::RefName;
use cts_types::Digest;

use crate::error::{SyncError, SyncResult};
use crate::hosted::HostedRepository;
use crate::transport::RemoteTransport;

/// Talks to a [`HostedRepository`] in the same process.
///
/// Used by tests and embedders. [`fail_next`](Self::fail_next) makes the
/// next calls fail with [`SyncError::NetworkFailure`] before they reach the
/// repository, which is how retry behaviour is exercised.
pub struct LocalTransport {
    repo: Arc<HostedRepository>,
    pending_failures: AtomicUsize,
    calls: AtomicUsize,
}

impl LocalTransport {
    pub fn new(repo: Arc<HostedRepository>) -> Self {
        Self {
            repo,
            pending_failures: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn repository(&self) -> &Arc<HostedRepository> {
        &self.repo
    }

    /// Fail the next `n` calls of any kind.
    pub fn fail_next(&self, n: usize) {
        self.pending_failures.store(n, Ordering::SeqCst);
    }

    /// Calls made so far, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn enter(&self, op: &str) -> SyncResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(SyncError::NetworkFailure(format!("injected failure in {op}")));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteTransport for LocalTransport {
    async fn head(&self, name: &RefName) -> SyncResult<Option<Digest>> {
        self.enter("head")?;
        self.repo.head(name)
    }

    async fn missing(&self, candidates: &BTreeSet<Digest>) -> SyncResult<BTreeSet<Digest>> {
        self.enter("missing")?;
        self.repo.missing(candidates)
    }

    async fn upload(&self, transfer: &ObjectTransfer) -> SyncResult<()> {
        self.enter("upload")?;
        self.repo.receive(transfer).map(|_| ())
    }

    async fn download(&self, digest: &Digest) -> SyncResult<ObjectTransfer> {
        self.enter("download")?;
        self.repo.send(digest)
    }

    async fn compare_and_set(
        &self,
        name: &RefName,
        expected: Option<Digest>,
        new: Digest,
    ) -> SyncResult<()> {
        self.enter("compare_and_set")?;
        self.repo.update_ref(name, expected, new)
    }
}
