//! File metadata fingerprints and snapshot diffing.

use std::collections::{BTreeSet, HashMap};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// A cheap change-detector for one file.
///
/// Two equal fingerprints are taken to mean unchanged content; nothing is
/// hashed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisteredContent {
    pub last_access: Option<SystemTime>,
    pub last_modified: Option<SystemTime>,
    pub attributes: u32,
    pub length: u64,
}

impl RegisteredContent {
    pub fn from_metadata(metadata: &Metadata) -> Self {
        Self {
            last_access: metadata.accessed().ok(),
            last_modified: metadata.modified().ok(),
            attributes: attributes(metadata),
            length: metadata.len(),
        }
    }
}

#[cfg(unix)]
fn attributes(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::MetadataExt;
    metadata.mode()
}

#[cfg(windows)]
fn attributes(metadata: &Metadata) -> u32 {
    use std::os::windows::fs::MetadataExt;
    metadata.file_attributes()
}

#[cfg(not(any(unix, windows)))]
fn attributes(metadata: &Metadata) -> u32 {
    u32::from(metadata.permissions().readonly())
}

/// Absolute disk path → fingerprint, for every file under a content root.
pub type Snapshot = HashMap<PathBuf, RegisteredContent>;

/// How a path differs between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Added,
    Removed,
    Modified,
}

/// Enumerate every file below `root` into a fresh snapshot.
///
/// Symlinked files are fingerprinted by their target. Symlinked directories
/// are not descended into. Entries that vanish or cannot be stat'ed mid-walk
/// are skipped.
pub fn scan(root: &Path) -> Snapshot {
    walkdir::WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(error) => {
                tracing::debug!(error = %error, "Skipping unreadable entry");
                None
            }
        })
        .filter_map(|entry| {
            let metadata = if entry.path_is_symlink() {
                std::fs::metadata(entry.path()).ok()?
            } else {
                entry.metadata().ok()?
            };
            if !metadata.is_file() {
                return None;
            }
            Some((
                entry.into_path(),
                RegisteredContent::from_metadata(&metadata),
            ))
        })
        .collect()
}

/// Compare two snapshots over the union of their keys.
///
/// Unchanged paths are omitted. The result is sorted by path.
pub fn diff(old: &Snapshot, new: &Snapshot) -> Vec<(PathBuf, Change)> {
    let keys: BTreeSet<&PathBuf> = old.keys().chain(new.keys()).collect();
    keys.into_iter()
        .filter_map(|path| {
            let change = match (old.get(path), new.get(path)) {
                (None, Some(_)) => Change::Added,
                (Some(_), None) => Change::Removed,
                (Some(before), Some(after)) if before != after => Change::Modified,
                _ => return None,
            };
            Some((path.clone(), change))
        })
        .collect()
}
