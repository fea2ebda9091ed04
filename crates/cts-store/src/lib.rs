//! Content-addressed object storage for CTS.
//!
//! Every piece of history (file contents, directory snapshots, commits) is
//! stored as an immutable object keyed by the BLAKE3 digest of its canonical
//! encoding.
//!
//! # Object Types
//!
//! - [`Blob`] -- raw file content
//! - [`Tree`] -- sorted directory listing naming blobs and subtrees
//! - [`Commit`] -- root tree, optional parent, message, and author
//!
//! # Storage Backends
//!
//! All backends implement the [`ObjectStore`] trait:
//!
//! - [`InMemoryObjectStore`] -- `HashMap`-based store for tests and embedding
//! - [`FsObjectStore`] -- fan-out loose objects on disk, zstd-compressed
//!
//! # Design Rules
//!
//! 1. Objects are immutable once written; a put never overwrites.
//! 2. Writes are atomic: temp file, fsync, rename.
//! 3. Objects received from peers go through [`accept_object`], which keeps
//!    the store closed under references.
//! 4. All I/O errors are propagated, never silently ignored.

pub mod codec;
pub mod error;
pub mod fs;
pub mod ingest;
pub mod memory;
pub mod object;
pub mod traits;

pub use codec::{decode, decode_any, digest_of, encode, peek_kind};
pub use error::{StoreError, StoreResult};
pub use fs::FsObjectStore;
pub use ingest::accept_object;
pub use memory::InMemoryObjectStore;
pub use object::{
    validate_entry_name, Blob, Commit, EntryMode, Object, ObjectKind, Tree, TreeEntry,
};
pub use traits::ObjectStore;
