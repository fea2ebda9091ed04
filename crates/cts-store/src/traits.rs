use std::collections::BTreeSet;

use cts_crypto::ContentHasher;
use cts_types::Digest;

use crate::codec;
use crate::error::{StoreError, StoreResult};
use crate::object::{Object, ObjectKind};

/// Content-addressed object store.
///
/// All implementations must satisfy these invariants:
/// - The key of every stored payload is `ContentHasher::OBJECT` over the
///   payload. Payloads are immutable once written.
/// - `put` of bytes already present is a no-op that returns the same digest.
///   If the bytes on record under that digest differ from the incoming ones
///   the put fails with [`StoreError::HashMismatch`]; it never overwrites.
/// - A payload becomes visible under its digest only once fully written.
/// - Concurrent reads are always safe; concurrent puts commute.
/// - All I/O errors are propagated, never silently ignored.
pub trait ObjectStore: Send + Sync {
    /// Store canonical object bytes and return their digest.
    fn put(&self, bytes: &[u8]) -> StoreResult<Digest>;

    /// Read the bytes stored under `digest`.
    ///
    /// Fails with [`StoreError::ObjectNotFound`] if absent.
    fn get(&self, digest: &Digest) -> StoreResult<Vec<u8>>;

    /// Check whether an object exists in the store.
    fn contains(&self, digest: &Digest) -> StoreResult<bool>;

    /// The subset of `candidates` not present in this store.
    ///
    /// Never more and never fewer: every returned digest is absent and every
    /// absent candidate is returned.
    fn missing(&self, candidates: &BTreeSet<Digest>) -> StoreResult<BTreeSet<Digest>> {
        let mut out = BTreeSet::new();
        for digest in candidates {
            if !self.contains(digest)? {
                out.insert(*digest);
            }
        }
        Ok(out)
    }

    /// The kind of the object stored under `digest`.
    ///
    /// The default loads the whole payload; stores that can read the tag
    /// byte alone should override it.
    fn kind_of(&self, digest: &Digest) -> StoreResult<ObjectKind> {
        codec::peek_kind(&self.get(digest)?)
    }

    /// Store bytes that the caller claims hash to `claimed`.
    fn put_claimed(&self, claimed: &Digest, bytes: &[u8]) -> StoreResult<Digest> {
        let actual = ContentHasher::OBJECT.hash(bytes);
        if actual != *claimed {
            return Err(StoreError::HashMismatch {
                expected: *claimed,
                actual,
            });
        }
        self.put(bytes)
    }

    /// Encode and store an object.
    fn put_object(&self, object: &Object) -> StoreResult<Digest> {
        self.put(&codec::encode(object))
    }

    /// Load and decode an object that must be of `kind`.
    fn get_object(&self, digest: &Digest, kind: ObjectKind) -> StoreResult<Object> {
        codec::decode(&self.get(digest)?, kind)
    }

    /// Load and decode an object of any kind.
    fn get_any(&self, digest: &Digest) -> StoreResult<Object> {
        codec::decode_any(&self.get(digest)?)
    }
}

impl<S: ObjectStore + ?Sized> ObjectStore for std::sync::Arc<S> {
    fn put(&self, bytes: &[u8]) -> StoreResult<Digest> {
        (**self).put(bytes)
    }

    fn get(&self, digest: &Digest) -> StoreResult<Vec<u8>> {
        (**self).get(digest)
    }

    fn contains(&self, digest: &Digest) -> StoreResult<bool> {
        (**self).contains(digest)
    }

    fn missing(&self, candidates: &BTreeSet<Digest>) -> StoreResult<BTreeSet<Digest>> {
        (**self).missing(candidates)
    }

    fn kind_of(&self, digest: &Digest) -> StoreResult<ObjectKind> {
        (**self).kind_of(digest)
    }
}
