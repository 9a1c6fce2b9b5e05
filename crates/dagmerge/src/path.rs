//! Canonical path resolution for extracted fragments.

use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Default marker segment that roots the section namespace.
pub const DEFAULT_MARKER: &str = "dag";

/// Archive-independent location of a section, e.g. `dag/shard1/a.json`.
///
/// Always relative, always starts with the marker segment and never contains `..`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalPath(PathBuf);

impl CanonicalPath {
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Destination file for this section under `root`.
    pub fn under(&self, root: &Path) -> PathBuf {
        root.join(&self.0)
    }
}

impl fmt::Display for CanonicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl AsRef<Path> for CanonicalPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

/// Resolve the canonical path of `file`, or `None` if it is outside the namespace.
///
/// The marker must appear as an exact path segment and the file must sit strictly
/// below it. When `file` lives under `base` only the part below `base` is searched,
/// so a marker segment in the extraction root itself never leaks into the key.
/// Files outside `base` are searched in full.
pub fn resolve(file: &Path, base: &Path, marker: &str) -> Option<CanonicalPath> {
    match file.strip_prefix(base) {
        Ok(relative) => from_marker(relative, marker),
        Err(_) => from_marker(file, marker),
    }
}

fn from_marker(path: &Path, marker: &str) -> Option<CanonicalPath> {
    let components: Vec<Component<'_>> = path.components().collect();
    let start = components
        .iter()
        .position(|c| matches!(c, Component::Normal(part) if *part == marker))?;

    let mut canonical = PathBuf::new();
    for component in &components[start..] {
        match component {
            Component::Normal(part) => canonical.push(part),
            Component::CurDir => continue,
            _ => return None,
        }
    }

    // Marker alone names a directory, not a section
    if canonical.components().count() < 2 {
        return None;
    }
    Some(CanonicalPath(canonical))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve_str(file: &str, base: &str) -> Option<String> {
        resolve(Path::new(file), Path::new(base), DEFAULT_MARKER).map(|p| p.to_string())
    }

    #[test]
    fn test_resolve_from_absolute_path() {
        assert_eq!(
            resolve_str("/tmp/merge/dag-1_x/dag/shard1/a.json", "/tmp/merge/dag-1_x"),
            Some("dag/shard1/a.json".to_string())
        );
    }

    #[test]
    fn test_resolve_independent_of_extraction_root() {
        let a = resolve_str("/w/tmp/one_1/dag/s/a.json", "/w/tmp/one_1");
        let b = resolve_str("/w/tmp/two_2/nested/dag/s/a.json", "/w/tmp/two_2");
        assert_eq!(a, b);
        assert!(a.is_some());
    }

    #[test]
    fn test_resolve_relative_path() {
        assert_eq!(
            resolve_str("dag/shard/file", "/anything"),
            Some("dag/shard/file".to_string())
        );
    }

    #[test]
    fn test_resolve_ignores_marker_in_base() {
        assert_eq!(
            resolve_str("/data/dag/archives/tmp_merge/a_1/dag/s/a.json", "/data/dag/archives/tmp_merge/a_1"),
            Some("dag/s/a.json".to_string())
        );
        assert_eq!(
            resolve_str("/data/dag/archives/tmp_merge/a_1/other/a.json", "/data/dag/archives/tmp_merge/a_1"),
            None
        );
    }

    #[test]
    fn test_resolve_outside_base_searches_full_path() {
        assert_eq!(
            resolve_str("/elsewhere/dag/s/a.json", "/tmp/x"),
            Some("dag/s/a.json".to_string())
        );
    }

    #[test]
    fn test_resolve_requires_exact_segment() {
        assert_eq!(resolve_str("/tmp/x/mydag/s/a.json", "/tmp/x"), None);
        assert_eq!(resolve_str("/tmp/x/dagger/a.json", "/tmp/x"), None);
    }

    #[test]
    fn test_resolve_outside_namespace() {
        assert_eq!(resolve_str("/tmp/x/readme.txt", "/tmp/x"), None);
        assert_eq!(resolve_str("/tmp/x/other/a.json", "/tmp/x"), None);
    }

    #[test]
    fn test_resolve_marker_must_have_children() {
        assert_eq!(resolve_str("/tmp/x/dag", "/tmp/x"), None);
    }

    #[test]
    fn test_resolve_rejects_parent_after_marker() {
        assert_eq!(resolve_str("/tmp/x/dag/../etc/passwd", "/tmp/x"), None);
    }

    #[test]
    fn test_custom_marker() {
        let p = resolve(Path::new("/t/ledger/s/a"), Path::new("/t"), "ledger").unwrap();
        assert_eq!(p.as_path(), Path::new("ledger/s/a"));
        assert_eq!(p.under(Path::new("/out")), PathBuf::from("/out/ledger/s/a"));
    }
}
