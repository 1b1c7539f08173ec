//! Mount table and path resolution
//!
//! A mount table binds normalized path prefixes to targets (usually
//! backends). Resolution picks the most specific prefix that owns a path,
//! comparing whole path segments, and returns the path relative to that
//! mount.

use tracing::debug;

use crate::error::{ContentsError, Result};

/// Iterate the meaningful segments of a `/`-separated path
///
/// Empty segments (from repeated or surrounding slashes) and `.` are skipped.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty() && *s != ".")
}

/// Normalize a path: no leading/trailing slashes, no empty or `.` segments
pub fn normalize(path: &str) -> String {
    segments(path).collect::<Vec<_>>().join("/")
}

/// Join two paths and normalize the result
pub fn join(base: &str, child: &str) -> String {
    segments(base)
        .chain(segments(child))
        .collect::<Vec<_>>()
        .join("/")
}

/// Build the unified (caller-facing) path for a child of a mount point
///
/// Unified paths are absolute: `("b", "c/d")` becomes `/b/c/d` and the
/// unified root is `/`.
pub fn unified_path(mount: &str, child: &str) -> String {
    format!("/{}", join(mount, child))
}

/// Whether `prefix` is a segment-wise ancestor of (or equal to) `path`
///
/// Both arguments must already be normalized.
fn owns(prefix: &str, path: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some("") => true,
        Some(rest) => rest.starts_with('/'),
        None => false,
    }
}

/// Strip a matched prefix from a normalized path
fn child_of(prefix: &str, path: &str) -> String {
    if prefix.is_empty() {
        return path.to_string();
    }
    path[prefix.len()..].trim_start_matches('/').to_string()
}

/// A single prefix binding
#[derive(Debug, Clone)]
pub struct MountPoint<T> {
    prefix: String,
    target: T,
}

impl<T> MountPoint<T> {
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn target(&self) -> &T {
        &self.target
    }
}

/// Result of resolving a path against a mount table
#[derive(Debug)]
pub struct Resolved<'a, T> {
    /// Target bound at the matched prefix
    pub target: &'a T,
    /// Matched prefix (`""` for the root mount)
    pub prefix: &'a str,
    /// Path relative to the mount; `""` addresses the mount root
    pub child_path: String,
}

/// Immutable prefix -> target table with longest-prefix resolution
#[derive(Debug, Clone)]
pub struct MountTable<T> {
    /// Sorted by descending prefix so deeper mounts are tried first
    mounts: Vec<MountPoint<T>>,
}

impl<T> Default for MountTable<T> {
    fn default() -> Self {
        Self { mounts: Vec::new() }
    }
}

impl<T> MountTable<T> {
    /// Build a table from `(prefix, target)` bindings
    ///
    /// Prefixes are normalized before storage. Two bindings that normalize to
    /// the same prefix are rejected.
    pub fn from_bindings<I, S>(bindings: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, T)>,
        S: AsRef<str>,
    {
        let mut mounts: Vec<MountPoint<T>> = Vec::new();
        for (prefix, target) in bindings {
            let prefix = normalize(prefix.as_ref());
            if mounts.iter().any(|m| m.prefix == prefix) {
                return Err(ContentsError::Config(format!(
                    "Duplicate mount point: {:?}",
                    prefix
                )));
            }
            mounts.push(MountPoint { prefix, target });
        }

        mounts.sort_by(|a, b| b.prefix.cmp(&a.prefix));
        Ok(Self { mounts })
    }

    /// Resolve a unified path to its owning mount and child path
    pub fn resolve(&self, path: &str) -> Result<Resolved<'_, T>> {
        let normalized = normalize(path);

        let mount = self
            .mounts
            .iter()
            .find(|m| owns(&m.prefix, &normalized))
            .ok_or_else(|| ContentsError::NoMatchingMount(path.to_string()))?;

        let child_path = child_of(&mount.prefix, &normalized);
        debug!(
            "resolve: {:?} -> mount={:?} child={:?}",
            path, mount.prefix, child_path
        );

        Ok(Resolved {
            target: &mount.target,
            prefix: &mount.prefix,
            child_path,
        })
    }

    /// Prefix of the mount owning `path`, if any
    pub fn mount_point(&self, path: &str) -> Option<&str> {
        let normalized = normalize(path);
        self.mounts
            .iter()
            .find(|m| owns(&m.prefix, &normalized))
            .map(|m| m.prefix.as_str())
    }

    /// Iterate mounts, most specific prefix first
    pub fn iter(&self) -> impl Iterator<Item = &MountPoint<T>> {
        self.mounts.iter()
    }

    pub fn prefixes(&self) -> impl Iterator<Item = &str> {
        self.mounts.iter().map(|m| m.prefix.as_str())
    }

    /// Whether a root (`""`) mount is configured
    pub fn has_root(&self) -> bool {
        self.mounts.iter().any(|m| m.prefix.is_empty())
    }

    pub fn len(&self) -> usize {
        self.mounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mounts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abc() -> MountTable<&'static str> {
        MountTable::from_bindings([("", "A"), ("b", "B"), ("b/c", "C")]).unwrap()
    }

    #[test]
    fn test_longest_prefix_wins() {
        let table = abc();
        let checks = [
            ("", "", "A"),
            ("o", "", "A"),
            ("b", "b", "B"),
            ("b/o", "b", "B"),
            ("b/c", "b/c", "C"),
            ("b/c/o", "b/c", "C"),
        ];
        for (path, prefix, target) in checks {
            let resolved = table.resolve(path).unwrap();
            assert_eq!(resolved.prefix, prefix, "prefix for {:?}", path);
            assert_eq!(*resolved.target, target, "target for {:?}", path);
        }
    }

    #[test]
    fn test_segment_boundary() {
        let table = abc();
        assert_eq!(table.resolve("banana").unwrap().prefix, "");
        assert_eq!(table.resolve("b/cat").unwrap().prefix, "b");
        assert_eq!(table.resolve("b/cat").unwrap().child_path, "cat");

        let no_root = MountTable::from_bindings([("b", 1)]).unwrap();
        assert!(matches!(
            no_root.resolve("banana"),
            Err(ContentsError::NoMatchingMount(_))
        ));
    }

    #[test]
    fn test_mount_root_child_is_empty() {
        let table = abc();
        for prefix in ["", "b", "b/c", "/b/c/", "b//c"] {
            assert_eq!(table.resolve(prefix).unwrap().child_path, "");
        }
    }

    #[test]
    fn test_slashes_are_ignored() {
        let table = abc();
        let resolved = table.resolve("/b/c/nested/file.txt/").unwrap();
        assert_eq!(resolved.prefix, "b/c");
        assert_eq!(resolved.child_path, "nested/file.txt");
    }

    #[test]
    fn test_prefix_and_child_reconstruct_path() {
        let table = abc();
        for path in ["", "x", "b", "b/x/y", "b/c", "b/c/d/e", "/bb/c", "b/./c/z"] {
            let resolved = table.resolve(path).unwrap();
            assert_eq!(
                join(resolved.prefix, &resolved.child_path),
                normalize(path),
                "reconstruct {:?}",
                path
            );
        }
    }

    #[test]
    fn test_empty_table_resolves_nothing() {
        let table: MountTable<()> = MountTable::from_bindings(Vec::<(String, ())>::new()).unwrap();
        assert!(table.is_empty());
        assert!(matches!(
            table.resolve(""),
            Err(ContentsError::NoMatchingMount(_))
        ));
    }

    #[test]
    fn test_duplicate_prefix_rejected() {
        let result = MountTable::from_bindings([("data", 1), ("/data/", 2)]);
        assert!(matches!(result, Err(ContentsError::Config(_))));
    }

    #[test]
    fn test_prefixes_sorted_deepest_first() {
        let table = abc();
        assert_eq!(table.prefixes().collect::<Vec<_>>(), vec!["b/c", "b", ""]);
        assert!(table.has_root());
        assert_eq!(table.mount_point("b/c/x"), Some("b/c"));
    }

    #[test]
    fn test_unified_path() {
        assert_eq!(unified_path("", ""), "/");
        assert_eq!(unified_path("", "LICENSE"), "/LICENSE");
        assert_eq!(unified_path("b/c", ""), "/b/c");
        assert_eq!(unified_path("b", "sub/file"), "/b/sub/file");
    }
}
