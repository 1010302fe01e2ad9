//! lsreset - Launch Services override reset engine
//!
//! Walks large file trees and removes the per-file handler override
//! (`com.apple.LaunchServices.OpenWith`) so files fall back to the
//! system-wide default application for their type.
//!
//! # Features
//!
//! - **Sampling Gate**: Each extension is sampled before a full pass.
//!   Extensions whose sample shows no overrides are skipped outright.
//!
//! - **Parallel Dispatch**: Files are chunked across a bounded worker pool
//!   with backpressure, optional ordering and rate limiting. A sequential
//!   executor takes over where a pool is not worthwhile.
//!
//! - **Bounded Memory**: Walks are lazy and an extension's files are
//!   dispatched in segments under a configurable memory ceiling.
//!
//! - **Interruptible**: Ctrl-C stops submission, lets in-flight chunks
//!   finish and still prints a partial report.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       RunOrchestrator                            │
//! │            (one extension at a time, shutdown flag)              │
//! └──────┬───────────────────┬───────────────────────┬──────────────┘
//!        │ fresh walk        │ fresh walk            │ results
//!        ▼                   ▼                       ▼
//! ┌─────────────┐    ┌──────────────┐        ┌──────────────────┐
//! │   Sampler   │    │  Dispatcher  │───────►│MetricsAggregator │
//! │ (reservoir, │    │ ┌──────────┐ │        │  (mutex-guarded) │
//! │ check only) │    │ │ Worker 1 │ │        └────────┬─────────┘
//! └──────┬──────┘    │ │   ...    │ │                 │
//!        │           │ │ Worker N │ │                 ▼
//!        │           │ └──────────┘ │            RunReport
//!        │           └──────┬───────┘
//!        ▼                  ▼
//! ┌─────────────────────────────────────┐
//! │ AttributeMutator (check / clear)    │
//! │   └─ AttributeStore (xattr, memory) │
//! └─────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```bash
//! # Reset Markdown and text files under ~/Documents
//! lsreset ~/Documents -e md,txt
//!
//! # See what would change across the home directory
//! lsreset --dry-run
//!
//! # Set system-wide defaults afterwards
//! lsreset apply-defaults defaults.txt
//! ```

pub mod attr;
pub mod config;
pub mod defaults;
pub mod dispatch;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod progress;
pub mod sampler;
pub mod walker;

pub use attr::{AttributeMutator, AttributeStore, MemoryStore, XattrStore, OVERRIDE_ATTRIBUTE};
pub use config::{CliArgs, RunConfig};
pub use dispatch::{select_dispatcher, Dispatcher, ParallelExecutor, SequentialExecutor, TaskResult, WorkerConfig};
pub use error::{AttrError, ConfigError, ResetError, Result, WorkerError};
pub use metrics::{ExtensionMetrics, ExtensionStatus, MetricsAggregator, RunReport};
pub use orchestrator::{RunObserver, RunOrchestrator, RunState, RunSummary};
pub use sampler::{SampleResult, Sampler};
pub use walker::{FileEnumerator, FileTask};
