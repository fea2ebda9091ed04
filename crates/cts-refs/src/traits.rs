//! The [`RefStore`] trait defining the reference storage interface.

use cts_types::{Digest, RepositoryId};

use crate::error::{RefError, RefResult};
use crate::types::RefName;

/// Storage backend for named references.
///
/// References are scoped per repository. Compare-and-set is the only way to
/// move one, and implementations must make it linearizable per
/// (repository, name) pair: of any set of concurrent updates expecting the
/// same old value, exactly one succeeds. The store holds digests only; it
/// never checks that they name existing commits.
pub trait RefStore: Send + Sync {
    /// Read a reference, `None` if it does not exist.
    fn try_read(&self, repo: &RepositoryId, name: &RefName) -> RefResult<Option<Digest>>;

    /// Atomically set `name` to `new` if it currently equals `expected`.
    ///
    /// `expected = None` means "create; must not exist yet". On mismatch the
    /// store is left unchanged and [`RefError::Conflict`] carries the value
    /// actually found. A new name that is a path prefix of an existing one,
    /// or the reverse, fails with [`RefError::NameCollision`]. Tags can only
    /// be created: an update with `expected = Some(_)` fails with
    /// [`RefError::TagImmutable`].
    fn compare_and_set(
        &self,
        repo: &RepositoryId,
        name: &RefName,
        expected: Option<Digest>,
        new: Digest,
    ) -> RefResult<()>;

    /// Atomically remove `name` if it currently equals `expected`.
    fn delete(&self, repo: &RepositoryId, name: &RefName, expected: Digest) -> RefResult<()>;

    /// Every reference in the repository, ordered by name.
    fn list(&self, repo: &RepositoryId) -> RefResult<Vec<(RefName, Digest)>>;

    /// Drop every reference owned by `repo`.
    fn remove_repository(&self, repo: &RepositoryId) -> RefResult<()>;

    /// Read a reference that must exist.
    fn read(&self, repo: &RepositoryId, name: &RefName) -> RefResult<Digest> {
        self.try_read(repo, name)?
            .ok_or_else(|| RefError::ReferenceNotFound {
                name: name.to_string(),
            })
    }
}

/// The shared compare step of every backend, run under the backend's lock.
pub(crate) fn check_update(
    name: &RefName,
    current: Option<Digest>,
    expected: Option<Digest>,
) -> RefResult<()> {
    if name.is_tag() && expected.is_some() {
        return Err(RefError::TagImmutable {
            name: name.to_string(),
        });
    }
    if current != expected {
        return Err(RefError::Conflict {
            name: name.to_string(),
            expected,
            actual: current,
        });
    }
    Ok(())
}

/// Whether one name is a path prefix of the other.
pub(crate) fn nested(a: &RefName, b: &RefName) -> bool {
    let below = |long: &str, short: &str| {
        long.strip_prefix(short)
            .is_some_and(|rest| rest.starts_with('/'))
    };
    below(a.as_str(), b.as_str()) || below(b.as_str(), a.as_str())
}

impl<R: RefStore + ?Sized> RefStore for std::sync::Arc<R> {
    fn try_read(&self, repo: &RepositoryId, name: &RefName) -> RefResult<Option<Digest>> {
        (**self).try_read(repo, name)
    }

    fn compare_and_set(
        &self,
        repo: &RepositoryId,
        name: &RefName,
        expected: Option<Digest>,
        new: Digest,
    ) -> RefResult<()> {
        (**self).compare_and_set(repo, name, expected, new)
    }

    fn delete(&self, repo: &RepositoryId, name: &RefName, expected: Digest) -> RefResult<()> {
        (**self).delete(repo, name, expected)
    }

    fn list(&self, repo: &RepositoryId) -> RefResult<Vec<(RefName, Digest)>> {
        (**self).list(repo)
    }

    fn remove_repository(&self, repo: &RepositoryId) -> RefResult<()> {
        (**self).remove_repository(repo)
    }
}
