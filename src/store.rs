//! Store Module for the view compiler
//!
//! Where raw view text comes from. The filesystem store reads the path the
//! configuration maps a logical name to; the memory store is keyed by name.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::{PoisonError, RwLock};
use walkdir::WalkDir;

/// Read-only source of view text, shared across concurrent renders.
pub trait ViewStore: Send + Sync {
    /// Text of the view `name` stored at `path`, `None` when it does not exist.
    fn load(&self, name: &str, path: &Path) -> io::Result<Option<String>>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// FILESYSTEM
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, Default)]
pub struct FsViewStore;

impl ViewStore for FsViewStore {
    fn load(&self, _name: &str, path: &Path) -> io::Result<Option<String>> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Logical names of every view under `dir` with the given extension, sorted.
///
/// Nested directories become `/`-separated names (`partials/nav`).
pub fn discover_views(dir: &Path, extension: &str) -> Vec<String> {
    let mut names = Vec::new();

    for entry in WalkDir::new(dir).follow_links(true).into_iter().flatten() {
        let path = entry.path();
        if !path.is_file() || path.extension().map_or(true, |ext| ext != extension) {
            continue;
        }
        let Ok(relative) = path.strip_prefix(dir) else {
            continue;
        };
        let parts: Vec<String> = relative
            .with_extension("")
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        names.push(parts.join("/"));
    }

    names.sort();
    names
}

// ═══════════════════════════════════════════════════════════════════════════════
// MEMORY
// ═══════════════════════════════════════════════════════════════════════════════

/// Views held in memory, keyed by logical name.
#[derive(Debug, Default)]
pub struct MemoryViewStore {
    views: RwLock<HashMap<String, String>>,
}

impl MemoryViewStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_view(self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.insert(name, text);
        self
    }

    /// Add or replace a view. A poisoned lock is recovered: the map only
    /// ever holds complete entries.
    pub fn insert(&self, name: impl Into<String>, text: impl Into<String>) {
        self.views
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), text.into());
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .views
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

impl ViewStore for MemoryViewStore {
    fn load(&self, name: &str, _path: &Path) -> io::Result<Option<String>> {
        let views = self.views.read().unwrap_or_else(PoisonError::into_inner);
        Ok(views.get(name).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_fs_store_reads_and_reports_missing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("home.ejs");
        fs::write(&path, "Hello").unwrap();

        let store = FsViewStore;
        assert_eq!(store.load("home", &path).unwrap().as_deref(), Some("Hello"));
        assert_eq!(store.load("gone", &dir.path().join("gone.ejs")).unwrap(), None);
    }

    #[test]
    fn test_discover_views_nested_and_filtered() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("partials/forms")).unwrap();
        fs::write(dir.path().join("home.ejs"), "").unwrap();
        fs::write(dir.path().join("layout.ejs"), "").unwrap();
        fs::write(dir.path().join("partials/nav.ejs"), "").unwrap();
        fs::write(dir.path().join("partials/forms/input.ejs"), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();

        let names = discover_views(dir.path(), "ejs");
        assert_eq!(
            names,
            vec!["home", "layout", "partials/forms/input", "partials/nav"]
        );
    }

    #[test]
    fn test_discover_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(discover_views(&dir.path().join("absent"), "ejs").is_empty());
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryViewStore::new().with_view("a", "A");
        store.insert("b", "B");
        assert_eq!(store.load("a", Path::new("ignored")).unwrap().as_deref(), Some("A"));
        assert_eq!(store.load("c", Path::new("ignored")).unwrap(), None);
        assert_eq!(store.names(), vec!["a", "b"]);
    }

    #[test]
    fn test_memory_store_survives_poisoned_lock() {
        let store = MemoryViewStore::new().with_view("a", "A");
        let poisoned = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = store.views.write().unwrap();
            panic!("writer panicked");
        }));
        assert!(poisoned.is_err());
        assert!(store.views.is_poisoned());

        store.insert("b", "B");
        assert_eq!(store.load("b", Path::new("ignored")).unwrap().as_deref(), Some("B"));
        assert_eq!(store.names(), vec!["a", "b"]);
    }
}
