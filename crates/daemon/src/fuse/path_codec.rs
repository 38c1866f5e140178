//! Key ↔ path mapping and child classification.
//!
//! Pure functions. Paths are mount-relative, `/`-separated, with the root
//! as the empty string. Keys are the same strings on the store side; a key
//! ending in `/` is a directory marker.

use std::collections::HashSet;

/// Kind of a directory entry as projected from the flat namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Directory,
}

/// One immediate child of a directory, as derived from a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildEntry {
    pub name: String,
    pub kind: EntryKind,
}

impl ChildEntry {
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::File,
        }
    }

    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Directory,
        }
    }
}

/// The store key of `name` under a directory at `parent_path`.
pub fn full_path(parent_path: &str, name: &str) -> String {
    if parent_path.is_empty() {
        name.to_owned()
    } else {
        format!("{parent_path}/{name}")
    }
}

/// The key prefix that enumerates everything under a directory.
pub fn listing_prefix(dir_path: &str) -> String {
    if dir_path.is_empty() {
        String::new()
    } else {
        format!("{dir_path}/")
    }
}

/// Project a listing under `prefix` onto the directory's immediate children.
///
/// The parent's own marker (`key == prefix`) is skipped; a single-segment
/// tail is a file; a multi-segment tail witnesses a subdirectory named by
/// its first segment, reported at most once. First-seen order is preserved.
pub fn classify_children(listing: &[String], prefix: &str) -> Vec<ChildEntry> {
    let mut children = Vec::new();
    let mut seen_dirs = HashSet::new();

    for key in listing {
        if key == prefix {
            continue;
        }
        let Some(tail) = key.strip_prefix(prefix) else {
            continue;
        };
        if tail.is_empty() {
            continue;
        }

        match tail.split_once('/') {
            None => children.push(ChildEntry::file(tail)),
            Some((first, _)) => {
                if !first.is_empty() && seen_dirs.insert(first.to_owned()) {
                    children.push(ChildEntry::dir(first));
                }
            }
        }
    }

    children
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_path_under_root_is_the_name() {
        assert_eq!(full_path("", "a.txt"), "a.txt");
    }

    #[test]
    fn full_path_joins_with_slash() {
        assert_eq!(full_path("a", "b.txt"), "a/b.txt");
        assert_eq!(full_path("a/b", "c"), "a/b/c");
    }

    #[test]
    fn listing_prefix_of_root_is_empty() {
        assert_eq!(listing_prefix(""), "");
    }

    #[test]
    fn listing_prefix_appends_slash() {
        assert_eq!(listing_prefix("a"), "a/");
        assert_eq!(listing_prefix("a/b"), "a/b/");
    }

    // Round trip: a plain name under any parent classifies back as a file.
    #[test]
    fn classify_single_file() {
        for parent in ["", "p", "p/q"] {
            let listing = vec![full_path(parent, "n.txt")];
            let children = classify_children(&listing, &listing_prefix(parent));
            assert_eq!(children, vec![ChildEntry::file("n.txt")], "parent={parent:?}");
        }
    }

    // A deeper key synthesizes a directory named by its first segment.
    #[test]
    fn classify_synthesizes_directory() {
        for parent in ["", "p"] {
            let listing = vec![full_path(parent, "a/b")];
            let children = classify_children(&listing, &listing_prefix(parent));
            assert_eq!(children, vec![ChildEntry::dir("a")], "parent={parent:?}");
        }
    }

    #[test]
    fn classify_dedups_directories() {
        let listing = vec!["x/1".to_string(), "x/2".to_string()];
        let children = classify_children(&listing, "");
        assert_eq!(children, vec![ChildEntry::dir("x")]);
    }

    #[test]
    fn classify_skips_parent_marker() {
        let listing = vec!["d/".to_string()];
        let children = classify_children(&listing, "d/");
        assert!(children.is_empty());
    }

    #[test]
    fn classify_marker_of_subdirectory_is_a_dir() {
        // Under root, "e/" is the marker of subdirectory e, not root's own.
        let listing = vec!["e/".to_string()];
        let children = classify_children(&listing, "");
        assert_eq!(children, vec![ChildEntry::dir("e")]);
    }

    #[test]
    fn classify_mixed_depths() {
        let listing = vec![
            "p/q/r/x".to_string(),
            "p/q/y".to_string(),
            "p/z".to_string(),
        ];
        let children = classify_children(&listing, "p/");
        assert_eq!(children, vec![ChildEntry::dir("q"), ChildEntry::file("z")]);
    }

    #[test]
    fn classify_file_and_dir_sharing_a_name() {
        // S3 permits both an object "x" and keys under "x/".
        let listing = vec!["x".to_string(), "x/1".to_string()];
        let children = classify_children(&listing, "");
        assert_eq!(children, vec![ChildEntry::file("x"), ChildEntry::dir("x")]);
    }

    #[test]
    fn classify_ignores_foreign_keys() {
        // Keys that do not carry the prefix cannot contribute children.
        let listing = vec!["other/file".to_string()];
        let children = classify_children(&listing, "d/");
        assert!(children.is_empty());
    }

    #[test]
    fn classify_drops_degenerate_tails() {
        // A doubled slash yields an empty first segment; drop it.
        let listing = vec!["d//x".to_string()];
        let children = classify_children(&listing, "d/");
        assert!(children.is_empty());
    }

    #[test]
    fn classify_preserves_first_seen_order() {
        let listing = vec![
            "b.txt".to_string(),
            "a/1".to_string(),
            "c.txt".to_string(),
            "a/2".to_string(),
        ];
        let children = classify_children(&listing, "");
        assert_eq!(
            children,
            vec![
                ChildEntry::file("b.txt"),
                ChildEntry::dir("a"),
                ChildEntry::file("c.txt"),
            ]
        );
    }
}
