use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use cts_crypto::ContentHasher;
use cts_types::Digest;
use tempfile::NamedTempFile;
use tracing::{debug, trace, warn};

use crate::error::{StoreError, StoreResult};
use crate::object::ObjectKind;
use crate::traits::ObjectStore;

const ZSTD_LEVEL: i32 = 3;

/// Loose-object store on the local filesystem.
///
/// Layout under `root`:
///
/// ```text
/// objects/ab/cdef…   zstd-compressed canonical bytes, named by digest hex
/// tmp/               staging area for in-flight writes
/// ```
///
/// Every write goes to a temporary file in `tmp/`, is fsynced, and is then
/// moved into place with an atomic no-clobber rename, so a reader never
/// observes a partially written object under its final name. `tmp/` lives
/// under the same root so the rename never crosses filesystems.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("objects"))?;
        fs::create_dir_all(root.join("tmp"))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, digest: &Digest) -> PathBuf {
        let (dir, file) = digest.fan_out();
        self.root.join("objects").join(dir).join(file)
    }

    fn read_raw(&self, digest: &Digest) -> StoreResult<Option<Vec<u8>>> {
        let compressed = match fs::read(self.object_path(digest)) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let bytes = zstd::decode_all(compressed.as_slice()).map_err(|e| {
            StoreError::CorruptObject {
                digest: *digest,
                reason: format!("decompression failed: {e}"),
            }
        })?;
        Ok(Some(bytes))
    }

    /// Compare what is already on disk against an incoming write.
    fn check_existing(&self, digest: &Digest, incoming: &[u8]) -> StoreResult<()> {
        match self.read_raw(digest)? {
            Some(existing) if existing == incoming => {
                trace!(digest = %digest.short_hex(), "object already present");
                Ok(())
            }
            Some(existing) => {
                warn!(digest = %digest.short_hex(), "stored bytes differ from incoming bytes");
                Err(StoreError::HashMismatch {
                    expected: *digest,
                    actual: ContentHasher::OBJECT.hash(&existing),
                })
            }
            None => Err(StoreError::ObjectNotFound(*digest)),
        }
    }

    /// Number of objects on disk. Walks the fan-out directories.
    pub fn count(&self) -> StoreResult<usize> {
        let mut total = 0;
        for dir in fs::read_dir(self.root.join("objects"))? {
            let dir = dir?;
            if dir.file_type()?.is_dir() {
                total += fs::read_dir(dir.path())?.count();
            }
        }
        Ok(total)
    }
}

impl ObjectStore for FsObjectStore {
    fn put(&self, bytes: &[u8]) -> StoreResult<Digest> {
        let digest = ContentHasher::OBJECT.hash(bytes);
        let dest = self.object_path(&digest);
        if dest.exists() {
            self.check_existing(&digest, bytes)?;
            return Ok(digest);
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        let compressed = zstd::encode_all(bytes, ZSTD_LEVEL)?;
        let mut tmp = NamedTempFile::new_in(self.root.join("tmp"))?;
        tmp.write_all(&compressed)?;
        tmp.as_file().sync_all()?;

        match tmp.persist_noclobber(&dest) {
            Ok(_) => {
                debug!(
                    digest = %digest.short_hex(),
                    size = bytes.len(),
                    stored = compressed.len(),
                    "object written"
                );
                Ok(digest)
            }
            // Lost a race with a concurrent writer of the same digest.
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                self.check_existing(&digest, bytes)?;
                Ok(digest)
            }
            Err(e) => Err(e.error.into()),
        }
    }

    fn get(&self, digest: &Digest) -> StoreResult<Vec<u8>> {
        let bytes = self
            .read_raw(digest)?
            .ok_or(StoreError::ObjectNotFound(*digest))?;
        let actual = ContentHasher::OBJECT.hash(&bytes);
        if actual != *digest {
            return Err(StoreError::HashMismatch {
                expected: *digest,
                actual,
            });
        }
        Ok(bytes)
    }

    fn contains(&self, digest: &Digest) -> StoreResult<bool> {
        Ok(self.object_path(digest).is_file())
    }

    /// Decompresses only as far as the leading tag byte.
    fn kind_of(&self, digest: &Digest) -> StoreResult<ObjectKind> {
        let file = match fs::File::open(self.object_path(digest)) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::ObjectNotFound(*digest))
            }
            Err(e) => return Err(e.into()),
        };
        let corrupt = |reason: String| StoreError::CorruptObject {
            digest: *digest,
            reason,
        };
        let mut decoder = zstd::stream::read::Decoder::new(file)
            .map_err(|e| corrupt(format!("decompression failed: {e}")))?;
        let mut tag = [0u8; 1];
        decoder
            .read_exact(&mut tag)
            .map_err(|e| corrupt(format!("decompression failed: {e}")))?;
        ObjectKind::from_tag(tag[0]).ok_or_else(|| corrupt(format!("unknown kind tag {}", tag[0])))
    }
}
