//! Attribute store implementations
//!
//! - [`XattrStore`]: the platform extended-attribute API via the `xattr` crate
//! - [`MemoryStore`]: an in-process map, used for tests and simulated trees

use super::{AttributeStore, OVERRIDE_ATTRIBUTE};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// errno returned when removing an attribute that is not set
#[cfg(target_os = "macos")]
const ENOATTR: i32 = 93;
#[cfg(not(target_os = "macos"))]
const ENOATTR: i32 = 61; // ENODATA

/// errno for filesystems without xattr support
#[cfg(target_os = "macos")]
const ENOTSUP: i32 = 45;
#[cfg(not(target_os = "macos"))]
const ENOTSUP: i32 = 95;

/// Extended attributes through the operating system.
///
/// Symlinks are operated on directly, never followed.
#[derive(Debug, Clone, Copy, Default)]
pub struct XattrStore;

impl XattrStore {
    pub fn new() -> Self {
        Self
    }

    /// Whether the current platform exposes extended attributes at all
    pub fn supported() -> bool {
        xattr::SUPPORTED_PLATFORM
    }
}

fn normalize_error(err: io::Error) -> io::Error {
    match err.raw_os_error() {
        Some(code) if code == ENOTSUP => io::Error::new(io::ErrorKind::Unsupported, err),
        _ => err,
    }
}

impl AttributeStore for XattrStore {
    fn contains(&self, path: &Path, name: &str) -> io::Result<bool> {
        xattr::get(path, name)
            .map(|value| value.is_some())
            .map_err(normalize_error)
    }

    fn remove(&self, path: &Path, name: &str) -> io::Result<bool> {
        match xattr::remove(path, name) {
            Ok(()) => Ok(true),
            Err(e) if e.raw_os_error() == Some(ENOATTR) => Ok(false),
            Err(e) => Err(normalize_error(e)),
        }
    }
}

#[derive(Debug, Default)]
struct MemoryFile {
    attributes: HashSet<String>,
    read_only: bool,
}

/// In-memory attribute store.
///
/// Paths must be registered with [`MemoryStore::add_file`]; anything else
/// reports `NotFound`, like a missing file would.
#[derive(Debug, Default)]
pub struct MemoryStore {
    files: Mutex<HashMap<PathBuf, MemoryFile>>,
    contains_calls: AtomicU64,
    remove_calls: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a file, optionally carrying the override attribute
    pub fn add_file(&self, path: impl Into<PathBuf>, with_override: bool) {
        let mut file = MemoryFile::default();
        if with_override {
            file.attributes.insert(OVERRIDE_ATTRIBUTE.to_string());
        }
        self.files.lock().insert(path.into(), file);
    }

    /// Make removals on `path` fail with `PermissionDenied`
    pub fn set_read_only(&self, path: &Path) {
        if let Some(file) = self.files.lock().get_mut(path) {
            file.read_only = true;
        }
    }

    /// Number of registered files that still carry the override
    pub fn override_count(&self) -> usize {
        self.files
            .lock()
            .values()
            .filter(|f| f.attributes.contains(OVERRIDE_ATTRIBUTE))
            .count()
    }

    /// Total `contains` calls served
    pub fn contains_calls(&self) -> u64 {
        self.contains_calls.load(Ordering::Relaxed)
    }

    /// Total `remove` calls served
    pub fn remove_calls(&self) -> u64 {
        self.remove_calls.load(Ordering::Relaxed)
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("{}: no such file", path.display()),
    )
}

impl AttributeStore for MemoryStore {
    fn contains(&self, path: &Path, name: &str) -> io::Result<bool> {
        self.contains_calls.fetch_add(1, Ordering::Relaxed);
        let files = self.files.lock();
        let file = files.get(path).ok_or_else(|| not_found(path))?;
        Ok(file.attributes.contains(name))
    }

    fn remove(&self, path: &Path, name: &str) -> io::Result<bool> {
        self.remove_calls.fetch_add(1, Ordering::Relaxed);
        let mut files = self.files.lock();
        let file = files.get_mut(path).ok_or_else(|| not_found(path))?;
        if file.read_only {
            return Err(io::Error::from(io::ErrorKind::PermissionDenied));
        }
        Ok(file.attributes.remove(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_counts() {
        let store = MemoryStore::new();
        store.add_file("/a.md", true);
        store.add_file("/b.md", false);

        assert_eq!(store.override_count(), 1);
        assert!(store.contains(Path::new("/a.md"), OVERRIDE_ATTRIBUTE).unwrap());
        assert!(store.remove(Path::new("/a.md"), OVERRIDE_ATTRIBUTE).unwrap());
        assert!(!store.remove(Path::new("/b.md"), OVERRIDE_ATTRIBUTE).unwrap());

        assert_eq!(store.override_count(), 0);
        assert_eq!(store.contains_calls(), 1);
        assert_eq!(store.remove_calls(), 2);
    }

    #[test]
    fn test_memory_store_unknown_path() {
        let store = MemoryStore::new();
        let err = store
            .contains(Path::new("/nope"), OVERRIDE_ATTRIBUTE)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_xattr_store_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.txt");
        let err = XattrStore::new()
            .contains(&missing, OVERRIDE_ATTRIBUTE)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
