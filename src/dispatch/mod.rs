//! Mutation dispatch
//!
//! Takes the tasks of one extension batch and runs the mutate function on
//! each, either across a bounded pool of worker threads or one at a time.
//! Callers do not need to know which ran: both executors share the
//! [`Dispatcher`] contract, and [`select_dispatcher`] picks one at startup.
//!
//! ```text
//!  tasks ──► chunk (chunk_size) ──► rate limiter ──► bounded chunk queue
//!                                                          │
//!                        ┌───────────────┬─────────────────┤
//!                        ▼               ▼                 ▼
//!                    Worker 0        Worker 1   ...    Worker N
//!                        │               │                 │
//!                        └───────────────┴────────┬────────┘
//!                                                 ▼
//!                                  result collector (re-sequenced when
//!                                  preserve_order is set) ──► ResultSink
//! ```

pub mod parallel;
pub mod rate;
pub mod sequential;

pub use parallel::ParallelExecutor;
pub use rate::RateLimiter;
pub use sequential::SequentialExecutor;

use crate::error::{AttrError, AttrResult, WorkerError};
use crate::walker::FileTask;
use std::any::Any;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

/// Default number of tasks handed to a worker at once
pub const DEFAULT_CHUNK_SIZE: usize = 256;

/// Function applied to every task: returns whether the override was present
pub type MutateFn<'a> = dyn Fn(&Path) -> AttrResult<bool> + Send + Sync + 'a;

/// Worker pool settings, fixed for the whole run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Number of worker threads
    pub worker_count: usize,

    /// Tasks per chunk
    pub chunk_size: usize,

    /// Stop handing out chunks after the first worker failure
    pub halt_on_error: bool,

    /// Emit results in input order rather than completion order
    pub preserve_order: bool,

    /// Ceiling on task submissions per second
    pub max_rate_per_second: Option<u32>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            halt_on_error: false,
            preserve_order: false,
            max_rate_per_second: None,
        }
    }
}

/// 75% of available CPUs, at least one
pub fn default_worker_count() -> usize {
    (num_cpus::get() * 3 / 4).max(1)
}

/// Outcome of a single task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskResult {
    /// The override was present (and removed, unless dry-run)
    Found,

    /// The override was absent
    Clean,

    /// Per-file failure, recorded and skipped
    Failed(AttrError),

    /// The worker running this task failed
    Aborted(String),
}

impl TaskResult {
    pub fn is_found(&self) -> bool {
        matches!(self, TaskResult::Found)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, TaskResult::Failed(_) | TaskResult::Aborted(_))
    }
}

impl From<AttrResult<bool>> for TaskResult {
    fn from(result: AttrResult<bool>) -> Self {
        match result {
            Ok(true) => TaskResult::Found,
            Ok(false) => TaskResult::Clean,
            Err(e) => TaskResult::Failed(e),
        }
    }
}

/// Receives each result as the dispatcher emits it.
///
/// Called from the dispatching thread, in emission order.
pub trait ResultSink: Sync {
    fn record(&self, task: &FileTask, result: &TaskResult);
}

impl<F> ResultSink for F
where
    F: Fn(&FileTask, &TaskResult) + Sync,
{
    fn record(&self, task: &FileTask, result: &TaskResult) {
        self(task, result)
    }
}

/// Everything a dispatch produced for one batch of tasks
#[derive(Debug, Default)]
pub struct RunOutcome {
    /// Results in emission order
    pub results: Vec<(FileTask, TaskResult)>,

    /// Tasks never handed to the mutate function
    pub unprocessed: Vec<FileTask>,

    /// Worker failures seen during the run
    pub worker_errors: Vec<WorkerError>,

    /// Dispatch stopped early because of halt-on-error
    pub halted: bool,

    /// Dispatch stopped early because of an interrupt
    pub cancelled: bool,
}

impl RunOutcome {
    pub fn processed(&self) -> usize {
        self.results.len()
    }

    pub fn found(&self) -> usize {
        self.results.iter().filter(|(_, r)| r.is_found()).count()
    }

    pub fn errors(&self) -> usize {
        self.results.iter().filter(|(_, r)| r.is_error()).count()
    }

    /// Emit a result to the sink and keep it
    fn emit(&mut self, sink: &dyn ResultSink, task: FileTask, result: TaskResult) {
        sink.record(&task, &result);
        self.results.push((task, result));
    }
}

/// Runs the mutate function over a batch of tasks
pub trait Dispatcher: Send + Sync {
    /// Executor name for logs and the run header
    fn name(&self) -> &'static str;

    /// Whether batches run concurrently, so an extension's duration
    /// overlaps with nothing else but its own workers
    fn is_parallel(&self) -> bool {
        false
    }

    /// Worker pool settings in effect
    fn config(&self) -> &WorkerConfig;

    /// Process `tasks`, forwarding each result to `sink` as it is emitted
    fn run(&self, tasks: Vec<FileTask>, mutate: &MutateFn<'_>, sink: &dyn ResultSink) -> RunOutcome;
}

/// Pick the executor once for the whole run
pub fn select_dispatcher(config: WorkerConfig, shutdown: Arc<AtomicBool>) -> Box<dyn Dispatcher> {
    if config.worker_count > 1 && ParallelExecutor::available() {
        info!(workers = config.worker_count, "Using parallel executor");
        Box::new(ParallelExecutor::new(config, shutdown))
    } else {
        info!("Using sequential executor");
        Box::new(SequentialExecutor::new(config, shutdown))
    }
}

/// Readable message from a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_worker_count_is_positive() {
        assert!(default_worker_count() >= 1);
        assert!(default_worker_count() <= num_cpus::get());
    }

    #[test]
    fn test_task_result_from_attr_result() {
        assert_eq!(TaskResult::from(Ok(true)), TaskResult::Found);
        assert_eq!(TaskResult::from(Ok(false)), TaskResult::Clean);
        let failed = TaskResult::from(Err(AttrError::NotFound { path: "/x".into() }));
        assert!(failed.is_error());
        assert!(!failed.is_found());
    }

    #[test]
    fn test_select_sequential_for_single_worker() {
        let config = WorkerConfig {
            worker_count: 1,
            ..WorkerConfig::default()
        };
        let dispatcher = select_dispatcher(config, Arc::new(AtomicBool::new(false)));
        assert_eq!(dispatcher.name(), "sequential");
        assert!(!dispatcher.is_parallel());
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}
