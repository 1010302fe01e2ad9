//! Error types for lsreset
//!
//! This module defines the error hierarchy used across the engine:
//! - Per-file attribute errors (never abort a batch)
//! - Configuration and validation errors (fatal before any processing)
//! - Worker errors (honor the halt-on-error policy)
//!
//! Library code uses thiserror; the binary wraps these in anyhow.

use std::path::PathBuf;
use thiserror::Error;

/// Exit code for a clean run (all extensions processed or validly skipped)
pub const EXIT_SUCCESS: u8 = 0;

/// Exit code for runtime failures (halted worker errors, I/O)
pub const EXIT_FAILURE: u8 = 1;

/// Exit code for validation failures detected before processing
pub const EXIT_VALIDATION: u8 = 2;

/// Exit code after an interrupt (matches the shell's 128 + SIGINT)
pub const EXIT_CANCELLED: u8 = 130;

/// Top-level error type for lsreset
#[derive(Error, Debug)]
pub enum ResetError {
    /// Per-file attribute errors that escaped a batch
    #[error("Attribute error: {0}")]
    Attr(#[from] AttrError),

    /// Configuration / validation errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Worker/concurrency errors
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    /// I/O errors (log file, mapping file, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Interrupted by signal
    #[error("Operation interrupted by signal")]
    Interrupted,
}

impl ResetError {
    /// Process exit code that corresponds to this error
    pub fn exit_code(&self) -> u8 {
        match self {
            ResetError::Config(_) => EXIT_VALIDATION,
            ResetError::Interrupted => EXIT_CANCELLED,
            _ => EXIT_FAILURE,
        }
    }
}

/// Errors from reading or removing the override attribute on one file
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttrError {
    /// Path does not exist
    #[error("Path not found: '{path}'")]
    NotFound { path: String },

    /// Path is not writable (or not readable for checks)
    #[error("Permission denied: '{path}'")]
    PermissionDenied { path: String },

    /// Filesystem does not support extended attributes
    #[error("Extended attributes not supported on '{path}'")]
    Unsupported { path: String },

    /// Any other I/O failure
    #[error("Attribute operation failed on '{path}': {reason}")]
    Io { path: String, reason: String },
}

impl AttrError {
    /// Build an attribute error from an I/O error for the given path
    pub fn from_io(path: &std::path::Path, err: &std::io::Error) -> Self {
        let path = path.display().to_string();
        match err.kind() {
            std::io::ErrorKind::NotFound => AttrError::NotFound { path },
            std::io::ErrorKind::PermissionDenied => AttrError::PermissionDenied { path },
            std::io::ErrorKind::Unsupported => AttrError::Unsupported { path },
            _ => AttrError::Io {
                path,
                reason: err.to_string(),
            },
        }
    }

    /// Check if this error is an expected per-file condition on live trees
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AttrError::NotFound { .. } | AttrError::PermissionDenied { .. }
        )
    }

    /// Returns the path associated with this error
    pub fn path(&self) -> &str {
        match self {
            AttrError::NotFound { path }
            | AttrError::PermissionDenied { path }
            | AttrError::Unsupported { path }
            | AttrError::Io { path, .. } => path,
        }
    }
}

/// Configuration and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Root directory missing or not a directory
    #[error("Invalid root directory '{path}': {reason}")]
    InvalidRoot { path: PathBuf, reason: String },

    /// No root given and no home directory to fall back on
    #[error("No root directory given and $HOME is not set")]
    MissingRoot,

    /// Invalid worker count
    #[error("Invalid worker count {count}: must be between 1 and {max}")]
    InvalidWorkerCount { count: usize, max: usize },

    /// Invalid chunk size
    #[error("Invalid chunk size {size}: must be between 1 and {max}")]
    InvalidChunkSize { size: usize, max: usize },

    /// A numeric limit that must be positive was zero
    #[error("Invalid value for {flag}: must be greater than zero")]
    ZeroLimit { flag: &'static str },

    /// Unparseable size string
    #[error("Invalid size '{value}': expected a number with optional KB/MB/GB suffix")]
    InvalidSize { value: String },

    /// Malformed extension
    #[error("Invalid extension '{ext}': {reason}")]
    InvalidExtension { ext: String, reason: String },

    /// Nothing to process
    #[error("No matching extensions found under '{root}'")]
    NoExtensions { root: PathBuf },

    /// Invalid exclude pattern
    #[error("Invalid exclude pattern '{pattern}': {reason}")]
    InvalidExcludePattern { pattern: String, reason: String },

    /// Mutually exclusive flags
    #[error("Conflicting flags: {0}")]
    ConflictingFlags(String),

    /// Malformed association mapping line
    #[error("Invalid mapping at line {line}: {reason}")]
    InvalidMapping { line: usize, reason: String },

    /// External association tool not found
    #[error("Association tool '{tool}' not found in PATH")]
    ToolNotFound { tool: String },

    /// Log file cannot be opened
    #[error("Cannot open log file '{path}': {reason}")]
    InvalidLogFile { path: PathBuf, reason: String },
}

/// Worker thread errors
#[derive(Error, Debug, Clone)]
pub enum WorkerError {
    /// Worker panicked while mutating a file
    #[error("Worker {id} panicked on '{path}': {message}")]
    Panicked {
        id: usize,
        path: String,
        message: String,
    },

    /// Worker thread could not be spawned
    #[error("Failed to spawn worker {id}: {reason}")]
    SpawnFailed { id: usize, reason: String },
}

/// Result type alias for ResetError
pub type Result<T> = std::result::Result<T, ResetError>;

/// Result type alias for AttrError
pub type AttrResult<T> = std::result::Result<T, AttrError>;
