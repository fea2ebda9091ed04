use std::collections::BTreeSet;

use async_trait::async_trait;

use cts_protocol::ObjectTransfer;
use cts_refs::RefName;
use cts_types::Digest;

use crate::error::SyncResult;

/// One remote repository, as seen by the synchronization engine.
///
/// Every method except [`compare_and_set`](Self::compare_and_set) is
/// idempotent and may be re-sent after a
/// [`NetworkFailure`](crate::SyncError::NetworkFailure).
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Current target of `name`, `None` if the branch is unborn.
    async fn head(&self, name: &RefName) -> SyncResult<Option<Digest>>;

    /// The subset of `candidates` the remote does not hold.
    async fn missing(&self, candidates: &BTreeSet<Digest>) -> SyncResult<BTreeSet<Digest>>;

    /// Send one object. Its dependencies must already be on the remote.
    async fn upload(&self, transfer: &ObjectTransfer) -> SyncResult<()>;

    async fn download(&self, digest: &Digest) -> SyncResult<ObjectTransfer>;

    /// Move `name` from `expected` to `new`. A lost race surfaces as
    /// [`RefError::Conflict`](cts_refs::RefError::Conflict) carrying the
    /// remote's actual value.
    async fn compare_and_set(
        &self,
        name: &RefName,
        expected: Option<Digest>,
        new: Digest,
    ) -> SyncResult<()>;
}
