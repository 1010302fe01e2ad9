//! Launch Services override attribute access
//!
//! A file pinned to a specific handler application carries the
//! `com.apple.LaunchServices.OpenWith` extended attribute. Removing it
//! makes the file fall back to the system-wide default for its extension.
//!
//! The mutator only needs two primitives from the platform: read one named
//! attribute and remove one named attribute. Those live behind
//! [`AttributeStore`] so the engine can run against an in-memory store in
//! tests.

pub mod store;

pub use store::{MemoryStore, XattrStore};

use crate::error::{AttrError, AttrResult};
use std::io;
use std::path::Path;

/// Extended attribute holding the per-file handler override
pub const OVERRIDE_ATTRIBUTE: &str = "com.apple.LaunchServices.OpenWith";

/// Platform attribute primitives keyed by (path, attribute name)
pub trait AttributeStore: Send + Sync {
    /// Returns true if the named attribute is present on `path`
    fn contains(&self, path: &Path, name: &str) -> io::Result<bool>;

    /// Removes the named attribute. Returns false if it was already absent.
    fn remove(&self, path: &Path, name: &str) -> io::Result<bool>;
}

impl<S: AttributeStore + ?Sized> AttributeStore for std::sync::Arc<S> {
    fn contains(&self, path: &Path, name: &str) -> io::Result<bool> {
        (**self).contains(path, name)
    }

    fn remove(&self, path: &Path, name: &str) -> io::Result<bool> {
        (**self).remove(path, name)
    }
}

/// Checks and clears the override attribute on individual files
#[derive(Debug, Clone)]
pub struct AttributeMutator<S> {
    store: S,
    name: String,
}

impl<S: AttributeStore> AttributeMutator<S> {
    /// Mutator for the Launch Services override attribute
    pub fn new(store: S) -> Self {
        Self::with_attribute(store, OVERRIDE_ATTRIBUTE)
    }

    /// Mutator for an arbitrary attribute name
    pub fn with_attribute(store: S, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
        }
    }

    /// Attribute name this mutator operates on
    pub fn attribute(&self) -> &str {
        &self.name
    }

    /// Underlying store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Report whether the attribute is present, without modifying anything
    pub fn check(&self, path: &Path) -> AttrResult<bool> {
        self.store
            .contains(path, &self.name)
            .map_err(|e| AttrError::from_io(path, &e))
    }

    /// Remove the attribute if present. Idempotent: clearing an already
    /// clean file returns `Ok(false)`.
    pub fn clear(&self, path: &Path) -> AttrResult<bool> {
        self.store
            .remove(path, &self.name)
            .map_err(|e| AttrError::from_io(path, &e))
    }
}
