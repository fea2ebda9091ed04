//! Reading and writing the files a workspace tracks.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use cts_store::{digest_of, Blob, EntryMode, Object, ObjectKind, ObjectStore};
use cts_types::Digest;

use crate::error::ClientResult;
use crate::workspace::CTS_DIR;

/// A file in the working directory as it would be committed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkFile {
    pub digest: Digest,
    pub mode: EntryMode,
}

/// What a pull changed in the working directory.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorktreeUpdate {
    pub written: Vec<String>,
    pub removed: Vec<String>,
    /// Paths left alone because they hold uncommitted edits.
    pub skipped: Vec<String>,
}

/// File content and mode. Symlinks are stored as their target path.
pub fn read(path: &Path) -> io::Result<(Vec<u8>, EntryMode)> {
    let meta = fs::symlink_metadata(path)?;
    if meta.file_type().is_symlink() {
        let target = fs::read_link(path)?;
        return Ok((target.to_string_lossy().into_owned().into_bytes(), EntryMode::Symlink));
    }
    let content = fs::read(path)?;
    Ok((content, mode_of(&meta)))
}

#[cfg(unix)]
fn mode_of(meta: &fs::Metadata) -> EntryMode {
    use std::os::unix::fs::PermissionsExt;
    if meta.permissions().mode() & 0o111 != 0 {
        EntryMode::Executable
    } else {
        EntryMode::Regular
    }
}

#[cfg(not(unix))]
fn mode_of(_meta: &fs::Metadata) -> EntryMode {
    EntryMode::Regular
}

pub fn blob_digest(content: &[u8]) -> Digest {
    digest_of(&Object::Blob(Blob::new(content.to_vec())))
}

/// Every file under `dir` (relative to `root`), skipping `.cts`.
pub fn files_under(root: &Path, dir: &Path) -> Vec<PathBuf> {
    let metadata_dir = root.join(CTS_DIR);
    WalkDir::new(dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.path() != metadata_dir)
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "skipping unreadable path");
                None
            }
        })
        .filter(|e| !e.file_type().is_dir())
        .map(|e| e.into_path())
        .collect()
}

/// Slash-separated path of `path` relative to `root`, if it has one.
pub fn relative(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Option<Vec<&str>> = rel.iter().map(|c| c.to_str()).collect();
    let parts = parts?;
    (!parts.is_empty()).then(|| parts.join("/"))
}

/// Hash every file in the working directory.
pub fn scan(root: &Path) -> ClientResult<BTreeMap<String, WorkFile>> {
    let mut files = BTreeMap::new();
    for path in files_under(root, root) {
        let Some(rel) = relative(root, &path) else {
            warn!(path = %path.display(), "skipping non UTF-8 path");
            continue;
        };
        let (content, mode) = read(&path)?;
        files.insert(
            rel,
            WorkFile {
                digest: blob_digest(&content),
                mode,
            },
        );
    }
    Ok(files)
}

/// Move the working directory from the `old` snapshot to `new`, leaving
/// any file with local edits untouched.
pub fn update<S: ObjectStore + ?Sized>(
    store: &S,
    root: &Path,
    old: &BTreeMap<String, (Digest, EntryMode)>,
    new: &BTreeMap<String, (Digest, EntryMode)>,
) -> ClientResult<WorktreeUpdate> {
    let mut result = WorktreeUpdate::default();

    for (path, &(digest, mode)) in new {
        if old.get(path) == Some(&(digest, mode)) {
            continue;
        }
        let target = root.join(path);
        if !matches_snapshot(&target, old.get(path))? {
            result.skipped.push(path.clone());
            continue;
        }
        let blob = store
            .get_object(&digest, ObjectKind::Blob)?
            .into_blob()
            .unwrap_or_else(|| Blob::new(Vec::new()));
        write(&target, &blob.data, mode)?;
        result.written.push(path.clone());
    }

    for (path, entry) in old {
        if new.contains_key(path) {
            continue;
        }
        let target = root.join(path);
        if !matches_snapshot(&target, Some(entry))? {
            result.skipped.push(path.clone());
            continue;
        }
        remove(root, &target)?;
        result.removed.push(path.clone());
    }

    debug!(
        written = result.written.len(),
        removed = result.removed.len(),
        skipped = result.skipped.len(),
        "working directory updated"
    );
    Ok(result)
}

/// True if the file at `path` is what `expected` records, or is absent
/// and nothing was expected.
fn matches_snapshot(path: &Path, expected: Option<&(Digest, EntryMode)>) -> ClientResult<bool> {
    match (fs::symlink_metadata(path), expected) {
        (Err(e), _) if e.kind() == io::ErrorKind::NotFound => Ok(true),
        (Err(e), _) => Err(e.into()),
        (Ok(_), None) => Ok(false),
        (Ok(_), Some(&(digest, _))) => {
            let (content, _) = read(path)?;
            Ok(blob_digest(&content) == digest)
        }
    }
}

fn write(path: &Path, content: &[u8], mode: EntryMode) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    if fs::symlink_metadata(path).is_ok() {
        fs::remove_file(path)?;
    }
    match mode {
        #[cfg(unix)]
        EntryMode::Symlink => {
            let target = String::from_utf8_lossy(content).into_owned();
            std::os::unix::fs::symlink(target, path)
        }
        #[cfg(unix)]
        EntryMode::Executable => {
            use std::os::unix::fs::PermissionsExt;
            fs::write(path, content)?;
            fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        }
        _ => fs::write(path, content),
    }
}

/// Delete a file and any directories it leaves empty, up to `root`.
fn remove(root: &Path, path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    let mut dir = path.parent();
    while let Some(d) = dir {
        if d == root || fs::remove_dir(d).is_err() {
            break;
        }
        dir = d.parent();
    }
    Ok(())
}
