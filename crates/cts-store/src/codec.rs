//! Canonical binary encoding of objects.
//!
//! All integers are big-endian. Strings are a `u32` byte length followed by
//! UTF-8. Every logical object has exactly one encoding: decoding rejects
//! anything [`encode`] would not have produced, including unsorted tree
//! entries and trailing bytes.
//!
//! ```text
//! object := kind:u8 body
//! blob   := len:u64 bytes
//! tree   := count:u32 (mode:u8 name:str target:[32])*
//! commit := tree:[32] has_parent:u8 [parent:[32]] message:str
//!           author_name:str author_email:str timestamp:i64 tz_offset_minutes:i32
//! ```

use cts_crypto::ContentHasher;
use cts_types::{Digest, Signature, DIGEST_LEN};

use crate::error::{StoreError, StoreResult};
use crate::object::{validate_entry_name, Blob, Commit, EntryMode, Object, ObjectKind, Tree, TreeEntry};

/// Encode an object to its canonical bytes.
pub fn encode(object: &Object) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.push(object.kind().tag());
    match object {
        Object::Blob(blob) => {
            buf.reserve(8 + blob.data.len());
            buf.extend_from_slice(&(blob.data.len() as u64).to_be_bytes());
            buf.extend_from_slice(&blob.data);
        }
        Object::Tree(tree) => {
            buf.extend_from_slice(&(tree.len() as u32).to_be_bytes());
            for entry in tree.entries() {
                buf.push(entry.mode.tag());
                put_str(&mut buf, &entry.name);
                buf.extend_from_slice(entry.target.as_bytes());
            }
        }
        Object::Commit(commit) => {
            buf.extend_from_slice(commit.tree.as_bytes());
            match &commit.parent {
                Some(parent) => {
                    buf.push(1);
                    buf.extend_from_slice(parent.as_bytes());
                }
                None => buf.push(0),
            }
            put_str(&mut buf, &commit.message);
            put_str(&mut buf, &commit.author.name);
            put_str(&mut buf, &commit.author.email);
            buf.extend_from_slice(&commit.author.timestamp.to_be_bytes());
            buf.extend_from_slice(&commit.author.tz_offset_minutes.to_be_bytes());
        }
    }
    buf
}

/// Digest of an object: the content hash of its canonical encoding.
pub fn digest_of(object: &Object) -> Digest {
    ContentHasher::OBJECT.hash(&encode(object))
}

/// Decode bytes that must hold an object of `expected` kind.
pub fn decode(bytes: &[u8], expected: ObjectKind) -> StoreResult<Object> {
    let object = decode_any(bytes)?;
    if object.kind() != expected {
        return Err(corrupt(
            bytes,
            format!("expected {expected}, found {}", object.kind()),
        ));
    }
    Ok(object)
}

/// Decode bytes holding an object of any kind.
pub fn decode_any(bytes: &[u8]) -> StoreResult<Object> {
    let mut reader = Reader::new(bytes);
    let object = match peek_kind(bytes)? {
        ObjectKind::Blob => {
            reader.u8()?;
            let len = reader.u64()?;
            let len = usize::try_from(len)
                .map_err(|_| reader.error(format!("blob length {len} too large")))?;
            Object::Blob(Blob::new(reader.take(len)?.to_vec()))
        }
        ObjectKind::Tree => {
            reader.u8()?;
            Object::Tree(decode_tree(&mut reader)?)
        }
        ObjectKind::Commit => {
            reader.u8()?;
            Object::Commit(decode_commit(&mut reader)?)
        }
    };
    reader.finish()?;
    Ok(object)
}

/// Read the kind tag without decoding the body.
pub fn peek_kind(bytes: &[u8]) -> StoreResult<ObjectKind> {
    let tag = *bytes
        .first()
        .ok_or_else(|| corrupt(bytes, "empty input".into()))?;
    ObjectKind::from_tag(tag).ok_or_else(|| corrupt(bytes, format!("unknown kind tag {tag}")))
}

fn decode_tree(reader: &mut Reader<'_>) -> StoreResult<Tree> {
    let count = reader.u32()? as usize;
    // Each entry is at least mode + name length + digest.
    if count > reader.remaining() / (1 + 4 + DIGEST_LEN) {
        return Err(reader.error(format!("entry count {count} exceeds input")));
    }
    let mut entries: Vec<TreeEntry> = Vec::with_capacity(count);
    for _ in 0..count {
        let tag = reader.u8()?;
        let mode = EntryMode::from_tag(tag)
            .ok_or_else(|| reader.error(format!("unknown entry mode {tag}")))?;
        let name = reader.string()?;
        validate_entry_name(&name)
            .map_err(|reason| reader.error(format!("entry {name:?}: {reason}")))?;
        let target = reader.digest()?;
        if let Some(prev) = entries.last() {
            if prev.name.as_bytes() >= name.as_bytes() {
                return Err(reader.error(format!(
                    "entries not strictly ascending at {name:?}"
                )));
            }
        }
        entries.push(TreeEntry::new(mode, name, target));
    }
    Ok(Tree::from_sorted(entries))
}

fn decode_commit(reader: &mut Reader<'_>) -> StoreResult<Commit> {
    let tree = reader.digest()?;
    let parent = match reader.u8()? {
        0 => None,
        1 => Some(reader.digest()?),
        other => return Err(reader.error(format!("invalid parent flag {other}"))),
    };
    let message = reader.string()?;
    let name = reader.string()?;
    let email = reader.string()?;
    let timestamp = reader.i64()?;
    let tz_offset_minutes = reader.i32()?;
    let author = Signature::new(name, email, timestamp, tz_offset_minutes)
        .map_err(|e| reader.error(e.to_string()))?;
    Ok(Commit::new(tree, parent, message, author))
}

fn put_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
}

fn corrupt(bytes: &[u8], reason: String) -> StoreError {
    StoreError::CorruptObject {
        digest: ContentHasher::OBJECT.hash(bytes),
        reason,
    }
}

/// Bounds-checked cursor over the input.
struct Reader<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.input.len() - self.pos
    }

    fn error(&self, reason: String) -> StoreError {
        corrupt(self.input, format!("{reason} (offset {})", self.pos))
    }

    fn take(&mut self, n: usize) -> StoreResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(self.error(format!(
                "truncated: need {n} bytes, have {}",
                self.remaining()
            )));
        }
        let slice = &self.input[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> StoreResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> StoreResult<u8> {
        Ok(self.array::<1>()?[0])
    }

    fn u32(&mut self) -> StoreResult<u32> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    fn u64(&mut self) -> StoreResult<u64> {
        Ok(u64::from_be_bytes(self.array()?))
    }

    fn i32(&mut self) -> StoreResult<i32> {
        Ok(i32::from_be_bytes(self.array()?))
    }

    fn i64(&mut self) -> StoreResult<i64> {
        Ok(i64::from_be_bytes(self.array()?))
    }

    fn digest(&mut self) -> StoreResult<Digest> {
        Ok(Digest::from_hash(self.array()?))
    }

    fn string(&mut self) -> StoreResult<String> {
        let len = self.u32()? as usize;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec()).map_err(|e| self.error(format!("invalid UTF-8: {e}")))
    }

    fn finish(&self) -> StoreResult<()> {
        if self.remaining() != 0 {
            return Err(self.error(format!("{} trailing bytes", self.remaining())));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sig() -> Signature {
        Signature::new("Ada Lovelace", "ada@example.com", 1_700_000_000, -300).unwrap()
    }

    fn sample_tree() -> Tree {
        Tree::new(vec![
            TreeEntry::new(EntryMode::Regular, "hello.txt", Digest::of(b"hello")),
            TreeEntry::new(EntryMode::Directory, "src", Digest::of(b"src")),
        ])
        .unwrap()
    }

    fn sample_commit(parent: Option<Digest>) -> Commit {
        Commit::new(Digest::of(b"tree"), parent, "initial commit", sig())
    }

    fn assert_corrupt(bytes: &[u8]) {
        match decode_any(bytes) {
            Err(StoreError::CorruptObject { digest, .. }) => {
                assert_eq!(digest, ContentHasher::OBJECT.hash(bytes));
            }
            other => panic!("expected CorruptObject, got {other:?}"),
        }
    }

    // -----------------------------------------------------------------------
    // Layout
    // -----------------------------------------------------------------------

    #[test]
    fn blob_layout() {
        let bytes = encode(&Object::Blob(Blob::new(b"hi".to_vec())));
        assert_eq!(bytes, vec![1, 0, 0, 0, 0, 0, 0, 0, 2, b'h', b'i']);
    }

    #[test]
    fn empty_tree_layout() {
        assert_eq!(encode(&Object::Tree(Tree::empty())), vec![2, 0, 0, 0, 0]);
    }

    #[test]
    fn root_commit_has_zero_parent_flag() {
        let bytes = encode(&Object::Commit(sample_commit(None)));
        assert_eq!(bytes[0], 3);
        assert_eq!(bytes[1 + DIGEST_LEN], 0);
    }

    #[test]
    fn child_commit_carries_parent() {
        let parent = Digest::of(b"parent");
        let bytes = encode(&Object::Commit(sample_commit(Some(parent))));
        assert_eq!(bytes[1 + DIGEST_LEN], 1);
        assert_eq!(&bytes[2 + DIGEST_LEN..2 + 2 * DIGEST_LEN], parent.as_bytes());
    }

    // -----------------------------------------------------------------------
    // Round trips for each kind
    // -----------------------------------------------------------------------

    #[test]
    fn blob_roundtrip() {
        let obj = Object::Blob(Blob::new(b"hello".to_vec()));
        assert_eq!(decode(&encode(&obj), ObjectKind::Blob).unwrap(), obj);
    }

    #[test]
    fn tree_roundtrip() {
        let obj = Object::Tree(sample_tree());
        assert_eq!(decode(&encode(&obj), ObjectKind::Tree).unwrap(), obj);
    }

    #[test]
    fn commit_roundtrip_with_and_without_parent() {
        for parent in [None, Some(Digest::of(b"p"))] {
            let obj = Object::Commit(sample_commit(parent));
            assert_eq!(decode(&encode(&obj), ObjectKind::Commit).unwrap(), obj);
        }
    }

    // -----------------------------------------------------------------------
    // Determinism
    // -----------------------------------------------------------------------

    #[test]
    fn tree_digest_ignores_construction_order() {
        let a = TreeEntry::new(EntryMode::Regular, "a", Digest::of(b"1"));
        let b = TreeEntry::new(EntryMode::Executable, "b", Digest::of(b"2"));
        let c = TreeEntry::new(EntryMode::Directory, "c", Digest::of(b"3"));
        let t1 = Tree::new(vec![a.clone(), b.clone(), c.clone()]).unwrap();
        let t2 = Tree::new(vec![c, a, b]).unwrap();
        assert_eq!(digest_of(&t1.into()), digest_of(&t2.into()));
    }

    #[test]
    fn kind_is_part_of_the_digest() {
        // An empty blob and an empty tree have different encodings.
        let blob = digest_of(&Object::Blob(Blob::new(Vec::new())));
        let tree = digest_of(&Object::Tree(Tree::empty()));
        assert_ne!(blob, tree);
    }

    // -----------------------------------------------------------------------
    // Rejection of malformed input
    // -----------------------------------------------------------------------

    #[test]
    fn empty_input_is_corrupt() {
        assert_corrupt(&[]);
    }

    #[test]
    fn unknown_kind_is_corrupt() {
        assert_corrupt(&[7, 0, 0, 0, 0]);
    }

    #[test]
    fn truncated_inputs_are_corrupt() {
        let objects = [
            Object::Blob(Blob::new(b"truncate me".to_vec())),
            Object::Tree(sample_tree()),
            Object::Commit(sample_commit(Some(Digest::of(b"p")))),
        ];
        for obj in objects {
            let bytes = encode(&obj);
            for cut in 1..bytes.len() {
                assert_corrupt(&bytes[..cut]);
            }
        }
    }

    #[test]
    fn trailing_bytes_are_corrupt() {
        let mut bytes = encode(&Object::Tree(sample_tree()));
        bytes.push(0);
        assert_corrupt(&bytes);
    }

    #[test]
    fn wrong_expected_kind_is_corrupt() {
        let bytes = encode(&Object::Blob(Blob::new(b"x".to_vec())));
        assert!(matches!(
            decode(&bytes, ObjectKind::Commit),
            Err(StoreError::CorruptObject { .. })
        ));
    }

    #[test]
    fn unsorted_tree_is_corrupt() {
        let entries = vec![
            TreeEntry::new(EntryMode::Regular, "b", Digest::of(b"1")),
            TreeEntry::new(EntryMode::Regular, "a", Digest::of(b"2")),
        ];
        let bytes = encode(&Object::Tree(Tree::from_sorted(entries)));
        assert_corrupt(&bytes);
    }

    #[test]
    fn duplicate_tree_names_are_corrupt() {
        let entries = vec![
            TreeEntry::new(EntryMode::Regular, "a", Digest::of(b"1")),
            TreeEntry::new(EntryMode::Regular, "a", Digest::of(b"2")),
        ];
        let bytes = encode(&Object::Tree(Tree::from_sorted(entries)));
        assert_corrupt(&bytes);
    }

    #[test]
    fn invalid_entry_name_is_corrupt() {
        let entries = vec![TreeEntry::new(EntryMode::Regular, "a/b", Digest::of(b"1"))];
        let bytes = encode(&Object::Tree(Tree::from_sorted(entries)));
        assert_corrupt(&bytes);
    }

    #[test]
    fn unknown_entry_mode_is_corrupt() {
        let mut bytes = encode(&Object::Tree(sample_tree()));
        bytes[5] = 9;
        assert_corrupt(&bytes);
    }

    #[test]
    fn bad_parent_flag_is_corrupt() {
        let mut bytes = encode(&Object::Commit(sample_commit(None)));
        bytes[1 + DIGEST_LEN] = 2;
        assert_corrupt(&bytes);
    }

    #[test]
    fn invalid_utf8_is_corrupt() {
        // tree with one entry whose 1-byte name is 0xff
        let mut bytes = vec![2, 0, 0, 0, 1, 1, 0, 0, 0, 1, 0xff];
        bytes.extend_from_slice(&[0u8; DIGEST_LEN]);
        assert_corrupt(&bytes);
    }

    #[test]
    fn huge_entry_count_is_corrupt_not_oom() {
        assert_corrupt(&[2, 0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn huge_blob_length_is_corrupt() {
        assert_corrupt(&[1, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn peek_kind_reads_first_byte() {
        let bytes = encode(&Object::Commit(sample_commit(None)));
        assert_eq!(peek_kind(&bytes).unwrap(), ObjectKind::Commit);
    }

    // -----------------------------------------------------------------------
    // Properties
    // -----------------------------------------------------------------------

    fn arb_digest() -> impl Strategy<Value = Digest> {
        any::<[u8; 32]>().prop_map(Digest::from_hash)
    }

    fn arb_mode() -> impl Strategy<Value = EntryMode> {
        prop_oneof![
            Just(EntryMode::Regular),
            Just(EntryMode::Executable),
            Just(EntryMode::Symlink),
            Just(EntryMode::Directory),
        ]
    }

    fn arb_entries() -> impl Strategy<Value = Vec<TreeEntry>> {
        proptest::collection::btree_map("[a-zA-Z0-9._-]{1,12}", (arb_mode(), arb_digest()), 0..12)
            .prop_filter("reserved names", |m| !m.contains_key(".") && !m.contains_key(".."))
            .prop_map(|m| {
                m.into_iter()
                    .map(|(name, (mode, target))| TreeEntry::new(mode, name, target))
                    .collect()
            })
    }

    fn arb_object() -> impl Strategy<Value = Object> {
        let blob = proptest::collection::vec(any::<u8>(), 0..256)
            .prop_map(|data| Object::Blob(Blob::new(data)));
        let tree = arb_entries().prop_map(|entries| Object::Tree(Tree::new(entries).unwrap()));
        let commit = (
            arb_digest(),
            proptest::option::of(arb_digest()),
            ".{0,40}",
            "[a-zA-Z][a-zA-Z ]{0,19}",
            "[a-z@.]{0,20}",
            any::<i64>(),
            -1439i32..1440,
        )
            .prop_map(|(tree, parent, message, name, email, ts, tz)| {
                let author = Signature::new(name, email, ts, tz).unwrap();
                Object::Commit(Commit::new(tree, parent, message, author))
            });
        prop_oneof![blob, tree, commit]
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(obj in arb_object()) {
            let bytes = encode(&obj);
            prop_assert_eq!(decode(&bytes, obj.kind()).unwrap(), obj);
        }

        #[test]
        fn tree_digest_is_order_independent(
            entries in arb_entries(),
            seed in any::<u64>(),
        ) {
            let mut shuffled = entries.clone();
            // deterministic rotation + reversal as a permutation
            if !shuffled.is_empty() {
                let k = (seed as usize) % shuffled.len();
                shuffled.rotate_left(k);
                if seed % 2 == 0 {
                    shuffled.reverse();
                }
            }
            let a = digest_of(&Tree::new(entries).unwrap().into());
            let b = digest_of(&Tree::new(shuffled).unwrap().into());
            prop_assert_eq!(a, b);
        }

        #[test]
        fn decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..128)) {
            let _ = decode_any(&bytes);
        }
    }
}
