use std::collections::HashMap;
use std::sync::RwLock;

use cts_crypto::ContentHasher;
use cts_types::Digest;
use tracing::trace;

use crate::codec;
use crate::error::{StoreError, StoreResult};
use crate::object::ObjectKind;
use crate::traits::ObjectStore;

/// In-memory, HashMap-based object store.
///
/// Intended for tests and embedding. All objects are held in memory behind a
/// `RwLock` for safe concurrent access.
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<Digest, Vec<u8>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
        }
    }

    /// Number of objects currently stored.
    pub fn len(&self) -> usize {
        self.objects.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().expect("lock poisoned").is_empty()
    }

    /// Total bytes across all stored objects.
    pub fn total_bytes(&self) -> u64 {
        self.objects
            .read()
            .expect("lock poisoned")
            .values()
            .map(|bytes| bytes.len() as u64)
            .sum()
    }

    /// Sorted list of every digest in the store.
    pub fn all_digests(&self) -> Vec<Digest> {
        let map = self.objects.read().expect("lock poisoned");
        let mut digests: Vec<Digest> = map.keys().copied().collect();
        digests.sort();
        digests
    }

    /// Overwrite the bytes under `digest` without hashing them.
    #[cfg(test)]
    pub(crate) fn plant(&self, digest: Digest, bytes: Vec<u8>) {
        self.objects
            .write()
            .expect("lock poisoned")
            .insert(digest, bytes);
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn put(&self, bytes: &[u8]) -> StoreResult<Digest> {
        let digest = ContentHasher::OBJECT.hash(bytes);
        let mut map = self.objects.write().expect("lock poisoned");
        match map.get(&digest) {
            Some(existing) if existing.as_slice() == bytes => {
                trace!(digest = %digest.short_hex(), "object already present");
            }
            Some(existing) => {
                return Err(StoreError::HashMismatch {
                    expected: digest,
                    actual: ContentHasher::OBJECT.hash(existing),
                });
            }
            None => {
                map.insert(digest, bytes.to_vec());
            }
        }
        Ok(digest)
    }

    fn get(&self, digest: &Digest) -> StoreResult<Vec<u8>> {
        let map = self.objects.read().expect("lock poisoned");
        map.get(digest)
            .cloned()
            .ok_or(StoreError::ObjectNotFound(*digest))
    }

    fn contains(&self, digest: &Digest) -> StoreResult<bool> {
        let map = self.objects.read().expect("lock poisoned");
        Ok(map.contains_key(digest))
    }

    fn kind_of(&self, digest: &Digest) -> StoreResult<ObjectKind> {
        let map = self.objects.read().expect("lock poisoned");
        let bytes = map.get(digest).ok_or(StoreError::ObjectNotFound(*digest))?;
        codec::peek_kind(bytes)
    }
}

impl std::fmt::Debug for InMemoryObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryObjectStore")
            .field("object_count", &self.len())
            .finish()
    }
}
