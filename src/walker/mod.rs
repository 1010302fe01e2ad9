//! Local filesystem enumeration
//!
//! # Architecture
//!
//! ```text
//!   root ──► walkdir (no symlinks) ──► prune excluded dirs ──► regular files
//!                                                                │
//!                                              extension filter ─┤
//!                                                                ▼
//!                                                      FileTask { path, ext }
//! ```
//!
//! Enumeration is lazy and single-pass. Each extension batch walks the
//! tree again rather than sharing one cursor between the sampler and the
//! full pass.

pub mod enumerate;

pub use enumerate::{extension_of, ExcludeRules, FileEnumerator, FileTask, DEFAULT_IGNORED_DIRS};
