//! Sequential fallback executor
//!
//! Runs tasks one at a time on the calling thread. Used when only one
//! worker is configured or the platform cannot run a thread pool. The
//! result contract is identical to the parallel executor's: tasks are
//! grouped into `chunk_size` chunks, and a worker failure without
//! halt-on-error aborts the rest of its chunk.

use super::rate::{admit, RateLimiter};
use super::{panic_message, Dispatcher, MutateFn, ResultSink, RunOutcome, TaskResult, WorkerConfig};
use crate::error::WorkerError;
use crate::walker::FileTask;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, warn};

/// One-at-a-time executor
pub struct SequentialExecutor {
    config: WorkerConfig,
    shutdown: Arc<AtomicBool>,
}

impl SequentialExecutor {
    pub fn new(config: WorkerConfig, shutdown: Arc<AtomicBool>) -> Self {
        Self { config, shutdown }
    }
}

impl Dispatcher for SequentialExecutor {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn config(&self) -> &WorkerConfig {
        &self.config
    }

    fn run(&self, tasks: Vec<FileTask>, mutate: &MutateFn<'_>, sink: &dyn ResultSink) -> RunOutcome {
        let mut outcome = RunOutcome::default();
        let mut limiter = self.config.max_rate_per_second.map(RateLimiter::per_second);
        let chunk_size = self.config.chunk_size.max(1);
        let mut pending = tasks.into_iter().enumerate();

        while let Some((index, task)) = pending.next() {
            if !admit(&mut limiter, 1, &self.shutdown) {
                outcome.cancelled = true;
                outcome.unprocessed.push(task);
                break;
            }

            match panic::catch_unwind(AssertUnwindSafe(|| mutate(&task.path))) {
                Ok(result) => outcome.emit(sink, task, TaskResult::from(result)),
                Err(payload) => {
                    let failure = WorkerError::Panicked {
                        id: 0,
                        path: task.path.display().to_string(),
                        message: panic_message(payload.as_ref()),
                    };
                    let reason = failure.to_string();
                    outcome.worker_errors.push(failure);
                    outcome.emit(sink, task, TaskResult::Aborted(reason.clone()));

                    if self.config.halt_on_error {
                        error!(error = %reason, "Worker failed, halting dispatch");
                        outcome.halted = true;
                        break;
                    }
                    warn!(error = %reason, "Worker failed, aborting rest of chunk");
                    let rest = chunk_size - 1 - index % chunk_size;
                    for (_, task) in pending.by_ref().take(rest) {
                        outcome.emit(sink, task, TaskResult::Aborted(reason.clone()));
                    }
                }
            }
        }

        outcome.unprocessed.extend(pending.map(|(_, task)| task));
        if self.shutdown.load(Ordering::Relaxed) && !outcome.unprocessed.is_empty() {
            outcome.cancelled = true;
        }
        outcome
    }
}
