//! File enumeration by extension
//!
//! Walks a local tree with walkdir and yields [`FileTask`]s lazily. The walk
//! is single-pass: callers that need the same candidates twice (sampling,
//! then the full pass) call [`FileEnumerator::for_extension`] again and get
//! a fresh walk instead of rewinding a shared iterator.
//!
//! Excluded directories are pruned with `filter_entry`, so their contents
//! are never read. Symlinks are never followed.

use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// Directory names pruned from every walk
pub const DEFAULT_IGNORED_DIRS: &[&str] = &[".git", ".svn", ".hg", "node_modules"];

/// A single file to check or clear
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileTask {
    /// Full path to the file
    pub path: PathBuf,

    /// Normalized extension (lowercase, no leading dot)
    pub extension: String,
}

impl FileTask {
    pub fn new(path: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            extension: extension.into(),
        }
    }

    /// Approximate heap + inline footprint, used for memory ceilings
    pub fn estimated_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.path.as_os_str().len() + self.extension.len()
    }
}

/// Normalized extension of `path`, if it has one
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(OsStr::to_str)
        .filter(|ext| !ext.is_empty())
        .map(str::to_ascii_lowercase)
}

/// Rules deciding which directories and files the walk skips
#[derive(Debug, Clone)]
pub struct ExcludeRules {
    /// Directory names pruned wherever they appear
    pub ignored_dirs: Vec<String>,

    /// Patterns matched against the full path of directories and files
    pub patterns: Vec<Regex>,

    /// Descend into dot-directories and report dot-files
    pub include_hidden: bool,
}

impl Default for ExcludeRules {
    fn default() -> Self {
        Self {
            ignored_dirs: DEFAULT_IGNORED_DIRS.iter().map(|s| s.to_string()).collect(),
            patterns: Vec::new(),
            include_hidden: false,
        }
    }
}

impl ExcludeRules {
    /// Default rules plus the given compiled patterns
    pub fn with_patterns(patterns: Vec<Regex>) -> Self {
        Self {
            patterns,
            ..Self::default()
        }
    }

    /// Check if a path matches one of the exclude patterns
    pub fn is_excluded(&self, path: &Path) -> bool {
        if self.patterns.is_empty() {
            return false;
        }
        let path = path.to_string_lossy();
        self.patterns.iter().any(|re| re.is_match(&path))
    }

    /// Whether the walk should skip this entry (and, for directories,
    /// everything beneath it)
    fn skips(&self, entry: &DirEntry) -> bool {
        // Never prune the root itself
        if entry.depth() == 0 {
            return false;
        }

        let name = entry.file_name().to_string_lossy();
        if entry.file_type().is_dir() {
            if !self.include_hidden && name.starts_with('.') {
                return true;
            }
            if self.ignored_dirs.iter().any(|d| d == &*name) {
                return true;
            }
        }
        self.is_excluded(entry.path())
    }
}

/// Lazily enumerates candidate files under a root
#[derive(Debug, Clone)]
pub struct FileEnumerator {
    root: PathBuf,
    rules: ExcludeRules,
    shutdown: Option<Arc<AtomicBool>>,
}

impl FileEnumerator {
    pub fn new(root: impl Into<PathBuf>, rules: ExcludeRules) -> Self {
        Self {
            root: root.into(),
            rules,
            shutdown: None,
        }
    }

    /// Stop yielding files once this flag is raised
    pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every regular file that survives the exclude rules
    fn files(&self) -> impl Iterator<Item = DirEntry> + '_ {
        let shutdown = self.shutdown.clone();

        WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(move |entry| !self.rules.skips(entry))
            .take_while(move |_| {
                shutdown
                    .as_ref()
                    .map_or(true, |flag| !flag.load(Ordering::Relaxed))
            })
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    // Unreadable directories are common on home trees
                    if e.io_error().map(|io| io.kind()) == Some(std::io::ErrorKind::PermissionDenied) {
                        debug!(error = %e, "Skipping unreadable entry");
                    } else {
                        warn!(error = %e, "Walk error");
                    }
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
    }

    /// Files whose extension is in `extensions` (all files if empty)
    pub fn enumerate<'a>(&'a self, extensions: &'a [String]) -> impl Iterator<Item = FileTask> + 'a {
        let wanted: HashSet<&str> = extensions.iter().map(String::as_str).collect();

        self.files().filter_map(move |entry| {
            let extension = extension_of(entry.path())?;
            if wanted.is_empty() || wanted.contains(extension.as_str()) {
                Some(FileTask {
                    path: entry.into_path(),
                    extension,
                })
            } else {
                None
            }
        })
    }

    /// Files of one extension batch
    pub fn for_extension<'a>(&'a self, extension: &'a str) -> impl Iterator<Item = FileTask> + 'a {
        self.files().filter_map(move |entry| {
            let ext = extension_of(entry.path())?;
            (ext == extension).then(|| FileTask {
                path: entry.into_path(),
                extension: ext,
            })
        })
    }

    /// Distinct extensions present in the tree, most common first.
    ///
    /// Ties are broken alphabetically so the order is stable.
    pub fn discover_extensions(&self, limit: usize) -> Vec<(String, usize)> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for entry in self.files() {
            if let Some(ext) = extension_of(entry.path()) {
                *counts.entry(ext).or_default() += 1;
            }
        }

        let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(limit);
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of(Path::new("/a/b.MD")), Some("md".into()));
        assert_eq!(extension_of(Path::new("/a/archive.tar.gz")), Some("gz".into()));
        assert_eq!(extension_of(Path::new("/a/Makefile")), None);
        assert_eq!(extension_of(Path::new("/a/.bashrc")), None);
    }

    #[test]
    fn test_prunes_ignored_and_hidden_dirs() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("keep/a.md"));
        touch(&dir.path().join(".git/objects/b.md"));
        touch(&dir.path().join("node_modules/pkg/c.md"));
        touch(&dir.path().join(".cache/d.md"));
        touch(&dir.path().join("e.txt"));

        let enumerator = FileEnumerator::new(dir.path(), ExcludeRules::default());
        let tasks: Vec<FileTask> = enumerator.for_extension("md").collect();

        assert_eq!(tasks.len(), 1);
        assert!(tasks[0].path.ends_with("keep/a.md"));
        assert_eq!(tasks[0].extension, "md");
    }

    #[test]
    fn test_hidden_files_are_kept() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join(".notes.md"));
        touch(&dir.path().join("b.md"));
        touch(&dir.path().join(".cache/c.md"));

        let enumerator = FileEnumerator::new(dir.path(), ExcludeRules::default());
        let mut names: Vec<String> = enumerator
            .for_extension("md")
            .map(|t| t.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec![".notes.md", "b.md"]);
    }

    #[test]
    fn test_include_hidden() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join(".cache/d.md"));

        let rules = ExcludeRules {
            include_hidden: true,
            ..ExcludeRules::default()
        };
        let extensions = vec!["md".to_string()];
        let enumerator = FileEnumerator::new(dir.path(), rules);
        assert_eq!(enumerator.enumerate(&extensions).count(), 1);
    }

    #[test]
    fn test_exclude_patterns() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("Library/Caches/a.md"));
        touch(&dir.path().join("Documents/b.md"));

        let rules = ExcludeRules::with_patterns(vec![Regex::new("Library/Caches").unwrap()]);
        let enumerator = FileEnumerator::new(dir.path(), rules);
        let tasks: Vec<FileTask> = enumerator.enumerate(&[]).collect();
        assert_eq!(tasks.len(), 1);
        assert!(tasks[0].path.ends_with("Documents/b.md"));
    }

    #[test]
    fn test_enumeration_is_restartable() {
        let dir = tempdir().unwrap();
        for i in 0..5 {
            touch(&dir.path().join(format!("f{}.log", i)));
        }

        let enumerator = FileEnumerator::new(dir.path(), ExcludeRules::default());
        let partial: Vec<_> = enumerator.for_extension("log").take(2).collect();
        let full: Vec<_> = enumerator.for_extension("log").collect();
        assert_eq!(partial.len(), 2);
        assert_eq!(full.len(), 5);
    }

    #[test]
    fn test_shutdown_stops_enumeration() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("a.md"));

        let flag = Arc::new(AtomicBool::new(true));
        let enumerator = FileEnumerator::new(dir.path(), ExcludeRules::default()).with_shutdown(flag);
        assert_eq!(enumerator.for_extension("md").count(), 0);
    }

    #[test]
    fn test_discover_extensions_ranked() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("a.txt"));
        touch(&dir.path().join("b.txt"));
        touch(&dir.path().join("c.md"));
        touch(&dir.path().join("d.PDF"));

        let enumerator = FileEnumerator::new(dir.path(), ExcludeRules::default());
        let found = enumerator.discover_extensions(10);
        assert_eq!(
            found,
            vec![("txt".into(), 2), ("md".into(), 1), ("pdf".into(), 1)]
        );
        assert_eq!(enumerator.discover_extensions(1).len(), 1);
    }
}
