//! The server side of synchronization: one hosted repository.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info};

use cts_protocol::{ObjectTransfer, RepositoryInfo};
use cts_refs::{InMemoryRefStore, RefName, RefStore};
use cts_store::{
    accept_object, peek_kind, InMemoryObjectStore, ObjectKind, ObjectStore, StoreError,
};
use cts_types::{Digest, RepositoryId};

use crate::error::SyncResult;

/// A repository as a remote holds it: its own object namespace plus its
/// references.
///
/// Objects enter only through [`receive`](Self::receive), which keeps the
/// store closed under references, and a branch can only be pointed at a
/// commit that is present. Together these mean every reference resolves to
/// a complete history.
pub struct HostedRepository {
    info: RepositoryInfo,
    objects: Arc<dyn ObjectStore>,
    refs: Arc<dyn RefStore>,
}

impl std::fmt::Debug for HostedRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostedRepository")
            .field("id", &self.info.id)
            .field("name", &self.info.name)
            .finish()
    }
}

impl HostedRepository {
    pub fn new(
        info: RepositoryInfo,
        objects: Arc<dyn ObjectStore>,
        refs: Arc<dyn RefStore>,
    ) -> Self {
        Self {
            info,
            objects,
            refs,
        }
    }

    /// A fresh repository backed entirely by memory.
    pub fn in_memory(name: Option<String>) -> Self {
        Self::new(
            RepositoryInfo::new(RepositoryId::generate(), name),
            Arc::new(InMemoryObjectStore::new()),
            Arc::new(InMemoryRefStore::new()),
        )
    }

    pub fn id(&self) -> RepositoryId {
        self.info.id
    }

    pub fn info(&self) -> &RepositoryInfo {
        &self.info
    }

    pub fn objects(&self) -> &dyn ObjectStore {
        self.objects.as_ref()
    }

    // ---------------------------------------------------------------
    // References
    // ---------------------------------------------------------------

    pub fn head(&self, name: &RefName) -> SyncResult<Option<Digest>> {
        Ok(self.refs.try_read(&self.info.id, name)?)
    }

    pub fn list_refs(&self) -> SyncResult<Vec<(RefName, Digest)>> {
        Ok(self.refs.list(&self.info.id)?)
    }

    /// Compare-and-set `name`; `new` must be a commit this repository holds.
    pub fn update_ref(
        &self,
        name: &RefName,
        expected: Option<Digest>,
        new: Digest,
    ) -> SyncResult<()> {
        self.objects.get_object(&new, ObjectKind::Commit)?;
        self.refs.compare_and_set(&self.info.id, name, expected, new)?;
        info!(
            repo = %self.info.id,
            reference = %name,
            new = %new.short_hex(),
            "reference updated"
        );
        Ok(())
    }

    /// Drop every reference. Objects are removed with their storage.
    pub fn clear_refs(&self) -> SyncResult<()> {
        Ok(self.refs.remove_repository(&self.info.id)?)
    }

    // ---------------------------------------------------------------
    // Objects
    // ---------------------------------------------------------------

    pub fn missing(&self, candidates: &BTreeSet<Digest>) -> SyncResult<BTreeSet<Digest>> {
        Ok(self.objects.missing(candidates)?)
    }

    /// Verify and store an uploaded object.
    pub fn receive(&self, transfer: &ObjectTransfer) -> SyncResult<ObjectKind> {
        let kind = peek_kind(&transfer.data)?;
        if kind != transfer.kind {
            return Err(StoreError::CorruptObject {
                digest: transfer.digest,
                reason: format!("declared {}, encoded {kind}", transfer.kind),
            }
            .into());
        }
        accept_object(self.objects.as_ref(), &transfer.digest, &transfer.data)?;
        debug!(
            repo = %self.info.id,
            digest = %transfer.digest.short_hex(),
            %kind,
            "object received"
        );
        Ok(kind)
    }

    pub fn send(&self, digest: &Digest) -> SyncResult<ObjectTransfer> {
        let data = self.objects.get(digest)?;
        let kind = peek_kind(&data)?;
        Ok(ObjectTransfer::new(*digest, kind, data))
    }
}
