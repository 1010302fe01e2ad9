//! Run orchestration
//!
//! Drives one run through its states:
//!
//! ```text
//!  Init ─► Validating ─► ┌─────────── per extension ───────────┐ ─► Reporting ─► Done
//!                        │ Sampling ─► Deciding ─┬─► Skipped    │
//!                        │                       └─► Dispatching │
//!                        │                            ─► Recording│
//!                        └─────────────────────────────────────┘
//!
//!  any state ──(interrupt)──► Cancelled
//! ```
//!
//! Extensions are processed one at a time; parallelism lives inside the
//! dispatcher. Each extension gets a fresh walk for sampling and another
//! for the full pass. An interrupt raises the shared shutdown flag: the
//! walk stops yielding, the dispatcher stops submitting, in-flight chunks
//! finish, and the run ends with a partial report.

use crate::attr::{AttributeMutator, AttributeStore};
use crate::config::RunConfig;
use crate::dispatch::{select_dispatcher, Dispatcher, ResultSink, TaskResult};
use crate::error::{ConfigError, Result, EXIT_CANCELLED, EXIT_FAILURE, EXIT_SUCCESS};
use crate::metrics::{ExtensionMetrics, ExtensionStatus, MetricsAggregator, RunReport};
use crate::sampler::{SampleResult, Sampler};
use crate::walker::{FileEnumerator, FileTask};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    Validating,
    Sampling,
    Deciding,
    Skipped,
    Dispatching,
    Recording,
    Reporting,
    Done,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Done | RunState::Cancelled)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Init => "init",
            RunState::Validating => "validating",
            RunState::Sampling => "sampling",
            RunState::Deciding => "deciding",
            RunState::Skipped => "skipped",
            RunState::Dispatching => "dispatching",
            RunState::Recording => "recording",
            RunState::Reporting => "reporting",
            RunState::Done => "done",
            RunState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Hooks for live display of a run
///
/// Every task result is forwarded through [`ResultSink::record`]; the
/// extension hooks fire from the orchestrating thread.
pub trait RunObserver: ResultSink + Send {
    fn extension_started(&self, _extension: &str, _index: usize, _total: usize) {}

    fn extension_sampled(&self, _sample: &SampleResult) {}

    fn extension_finished(&self, _metrics: &ExtensionMetrics) {}
}

/// Final state and report of a run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub report: RunReport,
    pub state: RunState,
}

impl RunSummary {
    /// Process exit code for this outcome
    pub fn exit_code(&self) -> u8 {
        if self.state == RunState::Cancelled {
            EXIT_CANCELLED
        } else if self.report.halted() {
            EXIT_FAILURE
        } else {
            EXIT_SUCCESS
        }
    }
}

/// Sequences extensions through sampling, dispatch and metrics
pub struct RunOrchestrator<S> {
    config: RunConfig,
    mutator: AttributeMutator<S>,
    enumerator: FileEnumerator,
    dispatcher: Box<dyn Dispatcher>,
    observer: Option<Arc<dyn RunObserver>>,
    shutdown: Arc<AtomicBool>,
    state: RunState,
}

impl<S: AttributeStore> RunOrchestrator<S> {
    /// Build an orchestrator; the executor is chosen here, once per run
    pub fn new(config: RunConfig, store: S) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let dispatcher = select_dispatcher(config.workers.clone(), Arc::clone(&shutdown));
        let enumerator = FileEnumerator::new(config.root.clone(), config.exclude.clone())
            .with_shutdown(Arc::clone(&shutdown));

        Self {
            config,
            mutator: AttributeMutator::new(store),
            enumerator,
            dispatcher,
            observer: None,
            shutdown,
            state: RunState::Init,
        }
    }

    /// Replace the executor. It must share [`Self::shutdown_flag`] to be
    /// interruptible.
    pub fn with_dispatcher(mut self, dispatcher: Box<dyn Dispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Get the shutdown flag for signal handling
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn dispatcher_name(&self) -> &'static str {
        self.dispatcher.name()
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    fn transition(&mut self, next: RunState) {
        // Cancelled is absorbing
        if self.state == RunState::Cancelled {
            return;
        }
        debug!(from = %self.state, to = %next, "State change");
        self.state = next;
    }

    /// Run every extension and build the report.
    ///
    /// Validation failures are returned as errors before anything is
    /// touched. Interrupts and halted extensions still produce a summary.
    pub fn run(&mut self) -> Result<RunSummary> {
        self.transition(RunState::Validating);
        let extensions = self.validate()?;

        let metrics = MetricsAggregator::new(self.dispatcher.is_parallel(), self.config.dry_run);
        let mut sampler = Sampler::new(self.config.sample_size, self.config.seed);
        let mut budget = self.config.max_files;
        let mut limit_reached = false;

        info!(
            root = %self.config.root.display(),
            extensions = extensions.len(),
            executor = self.dispatcher.name(),
            dry_run = self.config.dry_run,
            "Starting run"
        );

        for (index, extension) in extensions.iter().enumerate() {
            if self.is_shutdown() {
                self.transition(RunState::Cancelled);
                break;
            }
            if budget == Some(0) {
                info!("File limit reached, stopping before '{}'", extension);
                limit_reached = true;
                break;
            }

            if let Some(observer) = &self.observer {
                observer.extension_started(extension, index, extensions.len());
            }

            self.transition(RunState::Sampling);
            metrics.begin(extension, None);
            let sample = sampler.sample(
                extension,
                self.enumerator.for_extension(extension),
                |path| self.mutator.check(path),
            );
            if let Some(observer) = &self.observer {
                observer.extension_sampled(&sample);
            }

            if self.is_shutdown() {
                metrics.finalize(extension, ExtensionStatus::Cancelled);
                self.transition(RunState::Cancelled);
                break;
            }

            self.transition(RunState::Deciding);
            if !sample.worth_processing {
                self.transition(RunState::Skipped);
                info!(
                    extension = %extension,
                    sampled = sample.sampled,
                    population = sample.population,
                    "No overrides in sample, skipping"
                );
                metrics.skip(&sample);
                self.notify_finished(&metrics, extension);
                continue;
            }

            self.transition(RunState::Dispatching);
            metrics.begin(extension, Some(&sample));
            let status = self.dispatch_extension(extension, &metrics, &mut budget);

            self.transition(RunState::Recording);
            let finished = metrics.finalize(extension, status);
            info!(
                extension = %extension,
                files = finished.files_total,
                with_override = finished.files_with_override,
                errors = finished.errors,
                status = %finished.status,
                "Extension finished"
            );
            self.notify_finished(&metrics, extension);

            match status {
                ExtensionStatus::Cancelled => {
                    self.transition(RunState::Cancelled);
                    break;
                }
                ExtensionStatus::LimitReached => {
                    limit_reached = true;
                    break;
                }
                ExtensionStatus::Halted => {
                    warn!(extension = %extension, "Extension halted after worker failure");
                }
                _ => {}
            }
        }

        let cancelled = self.state == RunState::Cancelled;
        self.transition(RunState::Reporting);
        let report = metrics.report(cancelled, limit_reached);
        self.transition(RunState::Done);

        Ok(RunSummary {
            report,
            state: self.state,
        })
    }

    /// Check the root and settle the extension list
    fn validate(&self) -> Result<Vec<String>> {
        let root = &self.config.root;
        if !root.exists() {
            return Err(ConfigError::InvalidRoot {
                path: root.clone(),
                reason: "does not exist".into(),
            }
            .into());
        }
        if !root.is_dir() {
            return Err(ConfigError::InvalidRoot {
                path: root.clone(),
                reason: "not a directory".into(),
            }
            .into());
        }

        if !self.config.extensions.is_empty() {
            // At least one listed extension must have a file in the tree.
            // An interrupted walk proves nothing; the run loop cancels.
            let has_candidates = self.enumerator.enumerate(&self.config.extensions).next().is_some();
            if !has_candidates && !self.is_shutdown() {
                return Err(ConfigError::NoExtensions { root: root.clone() }.into());
            }
            return Ok(self.config.extensions.clone());
        }

        let discovered = self.enumerator.discover_extensions(self.config.max_extensions);
        if discovered.is_empty() {
            return Err(ConfigError::NoExtensions { root: root.clone() }.into());
        }
        for (ext, count) in &discovered {
            debug!(extension = %ext, files = count, "Discovered extension");
        }
        Ok(discovered.into_iter().map(|(ext, _)| ext).collect())
    }

    /// Full pass over one extension in memory-bounded segments
    fn dispatch_extension(
        &self,
        extension: &str,
        metrics: &MetricsAggregator,
        budget: &mut Option<u64>,
    ) -> ExtensionStatus {
        let mutator = &self.mutator;
        let dry_run = self.config.dry_run;
        let mutate = move |path: &Path| {
            if dry_run {
                mutator.check(path)
            } else {
                mutator.clear(path)
            }
        };

        let observer = self.observer.as_deref();
        let sink = |task: &FileTask, result: &TaskResult| {
            if let TaskResult::Failed(e) = result {
                debug!(error = %e, "File skipped");
            }
            metrics.record(&task.extension, result);
            if let Some(observer) = observer {
                observer.record(task, result);
            }
        };

        let mut candidates = self.enumerator.for_extension(extension).peekable();
        loop {
            let segment = self.next_segment(&mut candidates, *budget);
            if segment.is_empty() {
                break;
            }

            let outcome = self.dispatcher.run(segment, &mutate, &sink);
            for failure in &outcome.worker_errors {
                warn!(extension = %extension, error = %failure, "Worker error");
            }

            // Leftovers without a halt or an interrupt were lost to a worker
            // failure and count as per-file errors
            let mut accounted = outcome.processed();
            if !outcome.halted && !outcome.cancelled && !outcome.unprocessed.is_empty() {
                let reason = outcome
                    .worker_errors
                    .first()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "task was never run".to_string());
                warn!(
                    extension = %extension,
                    tasks = outcome.unprocessed.len(),
                    "Recording unprocessed tasks as aborted"
                );
                for task in &outcome.unprocessed {
                    sink(task, &TaskResult::Aborted(reason.clone()));
                }
                accounted += outcome.unprocessed.len();
            }

            if let Some(remaining) = budget.as_mut() {
                *remaining = remaining.saturating_sub(accounted as u64);
            }

            if outcome.cancelled {
                return ExtensionStatus::Cancelled;
            }
            if outcome.halted {
                return ExtensionStatus::Halted;
            }
            if *budget == Some(0) && candidates.peek().is_some() {
                return ExtensionStatus::LimitReached;
            }
        }

        // The walk stops yielding on interrupt, so a short pass may be a cut one
        if self.is_shutdown() {
            ExtensionStatus::Cancelled
        } else {
            ExtensionStatus::Completed
        }
    }

    /// Pull the next batch of tasks, bounded by the file budget and the
    /// memory ceiling
    fn next_segment<I>(&self, candidates: &mut I, budget: Option<u64>) -> Vec<FileTask>
    where
        I: Iterator<Item = FileTask>,
    {
        let mut segment = Vec::new();
        let mut bytes = 0u64;

        if budget == Some(0) {
            return segment;
        }

        for task in candidates {
            bytes += task.estimated_size() as u64;
            segment.push(task);

            if budget.is_some_and(|b| segment.len() as u64 >= b) {
                break;
            }
            if self.config.max_memory_bytes.is_some_and(|m| bytes >= m) {
                debug!(tasks = segment.len(), bytes, "Memory ceiling reached, dispatching segment");
                break;
            }
        }
        segment
    }

    fn notify_finished(&self, metrics: &MetricsAggregator, extension: &str) {
        if let (Some(observer), Some(snapshot)) = (&self.observer, metrics.get(extension)) {
            observer.extension_finished(&snapshot);
        }
    }
}
