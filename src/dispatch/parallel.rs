//! Parallel chunked executor
//!
//! The dispatching thread splits tasks into chunks, paces them through the
//! rate limiter and pushes them onto a bounded crossbeam channel. Worker
//! threads pull whole chunks, run the mutate function on each task in
//! order, and send the chunk's results back on a result channel. The
//! dispatching thread is the only one that talks to the [`ResultSink`], so
//! sinks see results one at a time with a clear happens-before edge.
//!
//! Backpressure: the chunk channel holds `2 * worker_count` chunks, so the
//! dispatcher never runs far ahead of the workers.

use super::rate::{admit, RateLimiter};
use super::{panic_message, Dispatcher, MutateFn, ResultSink, RunOutcome, TaskResult, WorkerConfig};
use crate::error::WorkerError;
use crate::walker::FileTask;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, warn};

/// A numbered slice of the input
struct Chunk {
    index: usize,
    tasks: Vec<FileTask>,
}

/// What a worker sends back for one chunk
struct ChunkReport {
    index: usize,
    results: Vec<(FileTask, TaskResult)>,
    unprocessed: Vec<FileTask>,
    failure: Option<WorkerError>,
}

/// Thread-pool executor
pub struct ParallelExecutor {
    config: WorkerConfig,
    shutdown: Arc<AtomicBool>,
}

impl ParallelExecutor {
    pub fn new(config: WorkerConfig, shutdown: Arc<AtomicBool>) -> Self {
        Self { config, shutdown }
    }

    /// Whether this environment can usefully run a worker pool
    pub fn available() -> bool {
        thread::available_parallelism()
            .map(|n| n.get() > 1)
            .unwrap_or(false)
    }

    /// Chunk size after clamping to the rate ceiling, so one chunk never
    /// exceeds a full window
    fn effective_chunk_size(&self, limiter: Option<&RateLimiter>) -> usize {
        let size = self.config.chunk_size.max(1);
        match limiter {
            Some(l) => size.min(l.max_batch()),
            None => size,
        }
    }
}

fn split_chunks(tasks: Vec<FileTask>, chunk_size: usize) -> Vec<Chunk> {
    let mut chunks = Vec::with_capacity(tasks.len().div_ceil(chunk_size));
    let mut current = Vec::with_capacity(chunk_size);
    for task in tasks {
        current.push(task);
        if current.len() == chunk_size {
            chunks.push(Chunk {
                index: chunks.len(),
                tasks: std::mem::replace(&mut current, Vec::with_capacity(chunk_size)),
            });
        }
    }
    if !current.is_empty() {
        chunks.push(Chunk {
            index: chunks.len(),
            tasks: current,
        });
    }
    chunks
}

/// Re-sequences chunk reports when ordering is requested
struct Collector<'a> {
    sink: &'a dyn ResultSink,
    preserve_order: bool,
    next_index: usize,
    buffered: BTreeMap<usize, ChunkReport>,
    outcome: RunOutcome,
}

impl<'a> Collector<'a> {
    fn new(sink: &'a dyn ResultSink, preserve_order: bool) -> Self {
        Self {
            sink,
            preserve_order,
            next_index: 0,
            buffered: BTreeMap::new(),
            outcome: RunOutcome::default(),
        }
    }

    fn accept(&mut self, report: ChunkReport) {
        if !self.preserve_order {
            self.emit(report);
            return;
        }

        self.buffered.insert(report.index, report);
        while let Some(report) = self.buffered.remove(&self.next_index) {
            self.emit(report);
            self.next_index += 1;
        }
    }

    fn emit(&mut self, report: ChunkReport) {
        for (task, result) in report.results {
            self.outcome.emit(self.sink, task, result);
        }
        self.outcome.unprocessed.extend(report.unprocessed);
        if let Some(failure) = report.failure {
            self.outcome.worker_errors.push(failure);
        }
    }

    /// Flush whatever is still buffered (gaps left by unsent chunks)
    fn finish(mut self) -> RunOutcome {
        let remaining = std::mem::take(&mut self.buffered);
        for (_, report) in remaining {
            self.emit(report);
        }
        self.outcome
    }
}

impl Dispatcher for ParallelExecutor {
    fn name(&self) -> &'static str {
        "parallel"
    }

    fn is_parallel(&self) -> bool {
        true
    }

    fn config(&self) -> &WorkerConfig {
        &self.config
    }

    fn run(&self, tasks: Vec<FileTask>, mutate: &MutateFn<'_>, sink: &dyn ResultSink) -> RunOutcome {
        if tasks.is_empty() {
            return RunOutcome::default();
        }

        let mut limiter = self.config.max_rate_per_second.map(RateLimiter::per_second);
        let chunk_size = self.effective_chunk_size(limiter.as_ref());
        let chunks = split_chunks(tasks, chunk_size);
        let worker_count = self.config.worker_count.clamp(1, chunks.len());
        let halt_on_error = self.config.halt_on_error;

        let (chunk_tx, chunk_rx) = bounded::<Chunk>(worker_count * 2);
        let (report_tx, report_rx) = unbounded::<ChunkReport>();
        let halt = AtomicBool::new(false);
        let mut collector = Collector::new(sink, self.config.preserve_order);
        let mut unsent: Vec<FileTask> = Vec::new();
        let mut spawn_failures: Vec<WorkerError> = Vec::new();

        debug!(chunks = chunks.len(), chunk_size, workers = worker_count, "Dispatching");

        thread::scope(|scope| {
            for id in 0..worker_count {
                let chunk_rx = chunk_rx.clone();
                let report_tx = report_tx.clone();
                let halt = &halt;
                let shutdown = &*self.shutdown;

                let spawned = thread::Builder::new()
                    .name(format!("lsreset-{}", id))
                    .spawn_scoped(scope, move || {
                        worker_loop(id, chunk_rx, report_tx, mutate, halt, shutdown, halt_on_error)
                    });

                if let Err(e) = spawned {
                    // Remaining workers keep draining the queue
                    warn!(worker = id, error = %e, "Failed to spawn worker");
                    spawn_failures.push(WorkerError::SpawnFailed {
                        id,
                        reason: e.to_string(),
                    });
                }
            }
            drop(chunk_rx);
            drop(report_tx);

            let mut pending = chunks.into_iter();
            while let Some(chunk) = pending.next() {
                let stopped = halt.load(Ordering::Relaxed)
                    || !admit(&mut limiter, chunk.tasks.len(), &self.shutdown);
                if stopped {
                    unsent.extend(chunk.tasks);
                    break;
                }
                if let Err(returned) = chunk_tx.send(chunk) {
                    // Every worker is gone
                    unsent.extend(returned.into_inner().tasks);
                    break;
                }
                while let Ok(report) = report_rx.try_recv() {
                    collector.accept(report);
                }
            }
            for chunk in pending {
                unsent.extend(chunk.tasks);
            }
            drop(chunk_tx);

            for report in report_rx.iter() {
                collector.accept(report);
            }
        });

        let mut outcome = collector.finish();
        outcome.unprocessed.extend(unsent);
        outcome.worker_errors.extend(spawn_failures);
        outcome.halted = halt.load(Ordering::Relaxed);
        outcome.cancelled = self.shutdown.load(Ordering::Relaxed) && !outcome.unprocessed.is_empty();

        if outcome.halted {
            error!(
                unprocessed = outcome.unprocessed.len(),
                "Dispatch halted after worker failure"
            );
        }
        outcome
    }
}

/// Worker thread: pull chunks until the queue closes
fn worker_loop(
    id: usize,
    chunk_rx: Receiver<Chunk>,
    report_tx: Sender<ChunkReport>,
    mutate: &MutateFn<'_>,
    halt: &AtomicBool,
    shutdown: &AtomicBool,
    halt_on_error: bool,
) {
    debug!("Worker {} started", id);

    while let Ok(chunk) = chunk_rx.recv() {
        // Queued but not started: hand it back untouched
        if halt.load(Ordering::Relaxed) || shutdown.load(Ordering::Relaxed) {
            let report = ChunkReport {
                index: chunk.index,
                results: Vec::new(),
                unprocessed: chunk.tasks,
                failure: None,
            };
            if report_tx.send(report).is_err() {
                break;
            }
            continue;
        }

        let report = process_chunk(id, chunk, mutate, halt, halt_on_error);
        if report_tx.send(report).is_err() {
            break;
        }
    }

    debug!("Worker {} finished", id);
}

/// Run one chunk in order. A panic in the mutate function is a worker
/// failure: the failing task is aborted and the rest of the chunk is either
/// aborted too or handed back unprocessed when halting.
fn process_chunk(
    id: usize,
    chunk: Chunk,
    mutate: &MutateFn<'_>,
    halt: &AtomicBool,
    halt_on_error: bool,
) -> ChunkReport {
    let mut results = Vec::with_capacity(chunk.tasks.len());
    let mut unprocessed = Vec::new();
    let mut failure = None;
    let mut tasks = chunk.tasks.into_iter();

    while let Some(task) = tasks.next() {
        match panic::catch_unwind(AssertUnwindSafe(|| mutate(&task.path))) {
            Ok(result) => results.push((task, TaskResult::from(result))),
            Err(payload) => {
                let err = WorkerError::Panicked {
                    id,
                    path: task.path.display().to_string(),
                    message: panic_message(payload.as_ref()),
                };
                let reason = err.to_string();
                results.push((task, TaskResult::Aborted(reason.clone())));

                if halt_on_error {
                    error!(worker = id, error = %reason, "Worker failed, halting");
                    halt.store(true, Ordering::SeqCst);
                    unprocessed.extend(tasks.by_ref());
                } else {
                    warn!(worker = id, error = %reason, "Worker failed, aborting rest of chunk");
                    results.extend(tasks.by_ref().map(|t| (t, TaskResult::Aborted(reason.clone()))));
                }
                failure = Some(err);
                break;
            }
        }
    }

    ChunkReport {
        index: chunk.index,
        results,
        unprocessed,
        failure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AttrResult;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::path::{Path, PathBuf};
    use std::time::{Duration, Instant};

    fn tasks(n: usize) -> Vec<FileTask> {
        (0..n)
            .map(|i| FileTask::new(format!("/t/{:05}.md", i), "md"))
            .collect()
    }

    fn executor(config: WorkerConfig) -> ParallelExecutor {
        ParallelExecutor::new(config, Arc::new(AtomicBool::new(false)))
    }

    fn noop(_: &FileTask, _: &TaskResult) {}

    #[test]
    fn test_reports_parallel_mode() {
        let exec = executor(WorkerConfig::default());
        assert!(exec.is_parallel());
        assert_eq!(exec.name(), "parallel");
    }

    #[test]
    fn test_split_chunks() {
        let chunks = split_chunks(tasks(10), 4);
        let sizes: Vec<usize> = chunks.iter().map(|c| c.tasks.len()).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(chunks[2].index, 2);
    }

    #[test]
    fn test_every_task_processed_exactly_once() {
        let exec = executor(WorkerConfig {
            worker_count: 8,
            chunk_size: 7,
            ..WorkerConfig::default()
        });
        let seen = Mutex::new(Vec::new());
        let sink = |t: &FileTask, _: &TaskResult| seen.lock().push(t.path.clone());

        let outcome = exec.run(tasks(1000), &|_| Ok(false), &sink);

        assert_eq!(outcome.processed(), 1000);
        let unique: HashSet<PathBuf> = seen.lock().iter().cloned().collect();
        assert_eq!(unique.len(), 1000);
        assert_eq!(seen.lock().len(), 1000);
    }

    #[test]
    fn test_preserve_order_independent_of_worker_count() {
        let input = tasks(500);
        let expected: Vec<PathBuf> = input.iter().map(|t| t.path.clone()).collect();

        for workers in [1, 2, 4, 8] {
            let exec = executor(WorkerConfig {
                worker_count: workers,
                chunk_size: 13,
                preserve_order: true,
                ..WorkerConfig::default()
            });
            let outcome = exec.run(input.clone(), &|_| Ok(true), &noop);
            let order: Vec<PathBuf> = outcome.results.into_iter().map(|(t, _)| t.path).collect();
            assert_eq!(order, expected, "order differs with {} workers", workers);
        }
    }

    #[test]
    fn test_halt_on_error_reports_unprocessed() {
        let exec = executor(WorkerConfig {
            worker_count: 2,
            chunk_size: 10,
            halt_on_error: true,
            ..WorkerConfig::default()
        });
        let mutate = |p: &Path| -> AttrResult<bool> {
            if p.ends_with("00005.md") {
                panic!("worker blew up");
            }
            Ok(false)
        };

        let outcome = exec.run(tasks(200), &mutate, &noop);

        assert!(outcome.halted);
        assert_eq!(outcome.worker_errors.len(), 1);
        assert!(!outcome.unprocessed.is_empty());
        // Nothing lost, nothing doubled
        assert_eq!(outcome.processed() + outcome.unprocessed.len(), 200);
        let mut all: HashSet<PathBuf> = outcome.results.iter().map(|(t, _)| t.path.clone()).collect();
        all.extend(outcome.unprocessed.iter().map(|t| t.path.clone()));
        assert_eq!(all.len(), 200);
    }

    #[test]
    fn test_worker_failure_without_halt_aborts_chunk_rest() {
        let exec = executor(WorkerConfig {
            worker_count: 4,
            chunk_size: 10,
            ..WorkerConfig::default()
        });
        let mutate = |p: &Path| -> AttrResult<bool> {
            if p.ends_with("00003.md") {
                panic!("bad file");
            }
            Ok(true)
        };

        let outcome = exec.run(tasks(50), &mutate, &noop);

        assert!(!outcome.halted);
        assert_eq!(outcome.processed(), 50);
        // Tasks 3..10 of the first chunk are aborted
        assert_eq!(outcome.errors(), 7);
        assert_eq!(outcome.found(), 43);
    }

    #[test]
    fn test_cancel_mid_run_finishes_in_flight_chunks() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let exec = ParallelExecutor::new(
            WorkerConfig {
                worker_count: 1,
                chunk_size: 5,
                preserve_order: true,
                ..WorkerConfig::default()
            },
            Arc::clone(&shutdown),
        );
        let flag = Arc::clone(&shutdown);
        let mutate = move |p: &Path| -> AttrResult<bool> {
            if p.ends_with("00002.md") {
                flag.store(true, Ordering::SeqCst);
            }
            Ok(false)
        };

        let outcome = exec.run(tasks(100), &mutate, &noop);

        // The in-flight chunk completes whole; queued chunks come back untouched
        assert!(outcome.cancelled);
        assert_eq!(outcome.processed(), 5);
        assert_eq!(outcome.unprocessed.len(), 95);
    }

    #[test]
    fn test_rate_limit_paces_submission() {
        let exec = executor(WorkerConfig {
            worker_count: 2,
            chunk_size: 100,
            max_rate_per_second: Some(20),
            ..WorkerConfig::default()
        });
        let start = Instant::now();
        let outcome = exec.run(tasks(40), &|_| Ok(false), &noop);
        assert_eq!(outcome.processed(), 40);
        // 40 tasks at 20/s need the second window
        assert!(start.elapsed() >= Duration::from_millis(900));
    }

    #[test]
    fn test_empty_input() {
        let exec = executor(WorkerConfig::default());
        let outcome = exec.run(Vec::new(), &|_| Ok(true), &noop);
        assert_eq!(outcome.processed(), 0);
        assert!(!outcome.cancelled);
    }
}
