//! Various utilities for working with files and paths.
//
// ## LICENSING
//
// Based on Cargo's utility functions with substantial modifications.

use std::fs;
use std::path::{Path, PathBuf};

/// Returns an iterator that walks up the directory hierarchy towards the root.
///
/// Each item is a [`Path`]. It will start with the given path, finishing at
/// the root. If the `stop_root_at` parameter is given, it will stop at the
/// given path (which will be the last item).
pub fn ancestors<'a>(path: &'a Path, stop_root_at: Option<&Path>) -> PathAncestors<'a> {
    PathAncestors::new(path, stop_root_at)
}

/// An iterator over parent paths from the current directory to a certain stopping directory.
pub struct PathAncestors<'a> {
    current: Option<&'a Path>,
    stop_at: Option<PathBuf>,
}

impl<'a> PathAncestors<'a> {
    fn new(path: &'a Path, stop_root_at: Option<&Path>) -> PathAncestors<'a> {
        let stop_at = stop_root_at.map(|p| p.to_path_buf());
        PathAncestors {
            current: Some(path),
            stop_at,
        }
    }
}

impl<'a> Iterator for PathAncestors<'a> {
    type Item = &'a Path;

    fn next(&mut self) -> Option<&'a Path> {
        if let Some(path) = self.current {
            self.current = path.parent();

            if let Some(ref stop_at) = self.stop_at {
                if path == stop_at {
                    self.current = None;
                }
            }

            Some(path)
        } else {
            None
        }
    }
}

/// Walks `root` breadth-first, returning the first path accepted by `predicate`.
///
/// Directories deeper than `max_depth` levels below `root` are not entered.
/// Unreadable directories are skipped silently; installation roots such as
/// `C:\` routinely contain folders the current user cannot list.
pub fn find_path(
    root: &Path,
    max_depth: usize,
    mut predicate: impl FnMut(&Path) -> bool,
) -> Option<PathBuf> {
    let mut frontier = vec![root.to_path_buf()];
    for _ in 0..=max_depth {
        let mut next = Vec::new();
        for dir in frontier {
            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };
            let mut entries = entries
                .filter_map(|e| e.ok().map(|e| e.path()))
                .collect::<Vec<_>>();
            // Directory iteration order is platform dependent.
            entries.sort();
            for path in entries {
                if predicate(&path) {
                    return Some(path);
                }
                if path.is_dir() && !path.is_symlink() {
                    next.push(path);
                }
            }
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
    }
    None
}

/// Returns `true` if the final component of `path` equals `name`, ignoring ASCII case.
pub fn file_name_is(path: &Path, name: &str) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.eq_ignore_ascii_case(name))
        .unwrap_or(false)
}

/// Returns `true` if any component of `path` contains `needle`, ignoring ASCII case.
pub fn path_contains(path: &Path, needle: &str) -> bool {
    let needle = needle.to_ascii_lowercase();
    path.components().any(|c| {
        c.as_os_str()
            .to_str()
            .map(|s| s.to_ascii_lowercase().contains(&needle))
            .unwrap_or(false)
    })
}
