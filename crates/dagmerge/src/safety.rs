//! Entry checks for in-process archive extraction.
//!
//! Every entry is confined to the scratch directory of its archive: absolute
//! paths, `..` traversal and link entries are refused before anything touches
//! the disk.

use crate::error::SecurityError;
use std::path::{Component, Path, PathBuf};

/// Kind of a tar entry, reduced to what extraction cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    /// Regular file
    File,
    /// Directory
    Directory,
    /// Symbolic link
    Symlink,
    /// Hard link
    Hardlink,
    /// Other special file types (device, fifo, etc.)
    Other,
}

/// Normalize an entry path so it can be joined onto the scratch directory.
///
/// `.` segments are dropped. Absolute paths, drive prefixes and `..` segments
/// are rejected, as is a path that normalizes to nothing.
///
/// ```
/// use std::path::Path;
/// use dagmerge::safety::validate_entry_path;
///
/// let p = validate_entry_path(Path::new("./dag/shard1/a.json")).unwrap();
/// assert_eq!(p, Path::new("dag/shard1/a.json"));
///
/// assert!(validate_entry_path(Path::new("../dag/a.json")).is_err());
/// assert!(validate_entry_path(Path::new("/dag/a.json")).is_err());
/// ```
pub fn validate_entry_path(path: &Path) -> Result<PathBuf, SecurityError> {
    let shown = || path.display().to_string();
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir => return Err(SecurityError::PathTraversal(shown())),
            Component::RootDir | Component::Prefix(_) => {
                return Err(SecurityError::AbsolutePath(shown()))
            }
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(SecurityError::PathTraversal(format!("{} is empty", shown())));
    }
    Ok(normalized)
}

/// Classify a tar entry.
pub fn classify(entry_type: tar::EntryType) -> EntryType {
    match entry_type {
        tar::EntryType::Regular | tar::EntryType::Continuous | tar::EntryType::GNUSparse => {
            EntryType::File
        }
        tar::EntryType::Directory => EntryType::Directory,
        tar::EntryType::Symlink => EntryType::Symlink,
        tar::EntryType::Link => EntryType::Hardlink,
        _ => EntryType::Other,
    }
}

/// Whether an entry of this type may be written during extraction.
///
/// Links could point a fragment path outside the scratch directory, so only
/// regular files and directories pass.
pub fn is_safe_entry_type(entry_type: EntryType) -> bool {
    matches!(entry_type, EntryType::File | EntryType::Directory)
}
