//! Content hashing for CTS.
//!
//! Object digests are BLAKE3 over the canonical encoding, prefixed with a
//! domain tag. Wraps the `blake3` crate; no custom cryptography.

pub mod hasher;

pub use hasher::ContentHasher;
