use cts_crypto::ContentHasher;
use cts_types::Digest;
use tracing::debug;

use crate::codec;
use crate::error::{StoreError, StoreResult};
use crate::object::ObjectKind;
use crate::traits::ObjectStore;

/// Verify an object received from a peer and store it.
///
/// The bytes must hash to `claimed`, decode canonically, and reference only
/// objects already present in `store` with the kind the reference implies
/// (trees and blobs before the trees that list them, the root tree and
/// parent before a commit). This is what keeps a store closed under
/// references: nothing can be written that points at an absent digest.
pub fn accept_object<S: ObjectStore + ?Sized>(
    store: &S,
    claimed: &Digest,
    bytes: &[u8],
) -> StoreResult<ObjectKind> {
    let actual = ContentHasher::OBJECT.hash(bytes);
    if actual != *claimed {
        return Err(StoreError::HashMismatch {
            expected: *claimed,
            actual,
        });
    }
    let object = codec::decode_any(bytes)?;
    for (reference, kind) in object.references() {
        let found = match store.kind_of(&reference) {
            Ok(found) => found,
            Err(StoreError::ObjectNotFound(_)) => {
                debug!(
                    object = %claimed.short_hex(),
                    missing = %reference.short_hex(),
                    "rejecting object with absent dependency"
                );
                return Err(StoreError::ObjectNotFound(reference));
            }
            Err(e) => return Err(e),
        };
        if found != kind {
            return Err(StoreError::CorruptObject {
                digest: *claimed,
                reason: format!("reference {reference} is a {found}, expected {kind}"),
            });
        }
    }
    store.put(bytes)?;
    Ok(object.kind())
}
