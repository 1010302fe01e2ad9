//! Per-extension metrics aggregation
//!
//! Workers never touch these counters. The dispatcher forwards each task
//! result to [`MetricsAggregator::record`], which takes a mutex around the
//! per-extension table. One lock per record keeps every increment; the
//! report is a snapshot taken under the same lock.

use crate::dispatch::{ResultSink, TaskResult};
use crate::sampler::SampleResult;
use crate::walker::FileTask;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

/// Where an extension batch ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionStatus {
    /// Full pass still running
    Running,

    /// Full pass finished
    Completed,

    /// Sampler judged it not worth processing
    Skipped,

    /// Dispatch stopped after a worker failure
    Halted,

    /// Interrupted mid-extension
    Cancelled,

    /// Run-wide file ceiling reached during this extension
    LimitReached,
}

impl fmt::Display for ExtensionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExtensionStatus::Running => "running",
            ExtensionStatus::Completed => "done",
            ExtensionStatus::Skipped => "skipped",
            ExtensionStatus::Halted => "halted",
            ExtensionStatus::Cancelled => "cancelled",
            ExtensionStatus::LimitReached => "limit",
        };
        f.write_str(s)
    }
}

/// Counters and timing for one extension batch
#[derive(Debug, Clone)]
pub struct ExtensionMetrics {
    pub extension: String,

    /// Files run through the mutator (found, clean or failed)
    pub files_total: u64,

    /// Files where the override was present
    pub files_with_override: u64,

    /// Per-file and worker failures
    pub errors: u64,

    /// Files inspected by the sampler
    pub sampled: u64,

    pub status: ExtensionStatus,

    started: Instant,
    finished: Option<Instant>,
}

impl ExtensionMetrics {
    fn new(extension: &str) -> Self {
        Self {
            extension: extension.to_string(),
            files_total: 0,
            files_with_override: 0,
            errors: 0,
            sampled: 0,
            status: ExtensionStatus::Running,
            started: Instant::now(),
            finished: None,
        }
    }

    fn observe(&mut self, result: &TaskResult) {
        self.files_total += 1;
        match result {
            TaskResult::Found => self.files_with_override += 1,
            TaskResult::Clean => {}
            TaskResult::Failed(_) | TaskResult::Aborted(_) => self.errors += 1,
        }
    }

    /// Elapsed time, up to now if still running
    pub fn duration(&self) -> Duration {
        self.finished
            .unwrap_or_else(Instant::now)
            .duration_since(self.started)
    }

    /// Files per second over the extension's elapsed time
    pub fn rate(&self) -> f64 {
        let secs = self.duration().as_secs_f64();
        if secs > 0.0 {
            self.files_total as f64 / secs
        } else {
            0.0
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.finished.is_some()
    }
}

/// Final (or partial) result of a run
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Extensions in the order they were started
    pub extensions: Vec<ExtensionMetrics>,

    /// Wall-clock time when the run began
    pub started_at: DateTime<Utc>,

    /// Wall-clock span of the whole run
    pub wall_clock: Duration,

    /// Workers ran in parallel
    pub parallel: bool,

    /// Dry-run: nothing was cleared
    pub dry_run: bool,

    /// Run ended by interrupt
    pub cancelled: bool,

    /// Run-wide file ceiling reached
    pub limit_reached: bool,
}

impl RunReport {
    pub fn get(&self, extension: &str) -> Option<&ExtensionMetrics> {
        self.extensions.iter().find(|m| m.extension == extension)
    }

    pub fn total_files(&self) -> u64 {
        self.extensions.iter().map(|m| m.files_total).sum()
    }

    pub fn total_with_override(&self) -> u64 {
        self.extensions.iter().map(|m| m.files_with_override).sum()
    }

    pub fn total_errors(&self) -> u64 {
        self.extensions.iter().map(|m| m.errors).sum()
    }

    /// Sum of per-extension durations
    pub fn summed_duration(&self) -> Duration {
        self.extensions.iter().map(|m| m.duration()).sum()
    }

    /// Total time for the totals row: the wall-clock span for parallel
    /// runs, the sum of extension passes for sequential ones
    pub fn total_duration(&self) -> Duration {
        if self.parallel {
            self.wall_clock
        } else {
            self.summed_duration()
        }
    }

    pub fn total_rate(&self) -> f64 {
        let secs = self.total_duration().as_secs_f64();
        if secs > 0.0 {
            self.total_files() as f64 / secs
        } else {
            0.0
        }
    }

    /// Any extension stopped by a worker failure
    pub fn halted(&self) -> bool {
        self.extensions
            .iter()
            .any(|m| m.status == ExtensionStatus::Halted)
    }

    fn ranked(&self) -> Vec<&ExtensionMetrics> {
        let mut ranked: Vec<&ExtensionMetrics> = self
            .extensions
            .iter()
            .filter(|m| m.status == ExtensionStatus::Completed && m.files_total > 0)
            .collect();
        ranked.sort_by(|a, b| b.rate().total_cmp(&a.rate()));
        ranked
    }

    /// Completed extensions with the highest throughput
    pub fn fastest(&self, n: usize) -> Vec<&ExtensionMetrics> {
        self.ranked().into_iter().take(n).collect()
    }

    /// Completed extensions with the lowest throughput
    pub fn slowest(&self, n: usize) -> Vec<&ExtensionMetrics> {
        self.ranked().into_iter().rev().take(n).collect()
    }
}

#[derive(Debug, Default)]
struct Inner {
    order: Vec<String>,
    by_extension: HashMap<String, ExtensionMetrics>,
}

impl Inner {
    fn entry(&mut self, extension: &str) -> &mut ExtensionMetrics {
        let order = &mut self.order;
        self.by_extension
            .entry(extension.to_string())
            .or_insert_with(|| {
                order.push(extension.to_string());
                ExtensionMetrics::new(extension)
            })
    }
}

/// Thread-safe accumulator of per-extension metrics
#[derive(Debug)]
pub struct MetricsAggregator {
    inner: Mutex<Inner>,
    started: Instant,
    started_at: DateTime<Utc>,
    parallel: bool,
    dry_run: bool,
}

impl MetricsAggregator {
    pub fn new(parallel: bool, dry_run: bool) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            started: Instant::now(),
            started_at: Utc::now(),
            parallel,
            dry_run,
        }
    }

    /// Open (or reopen) the entry for an extension and start its clock
    pub fn begin(&self, extension: &str, sample: Option<&SampleResult>) {
        let mut inner = self.inner.lock();
        let metrics = inner.entry(extension);
        metrics.started = Instant::now();
        metrics.status = ExtensionStatus::Running;
        if let Some(sample) = sample {
            metrics.sampled = sample.sampled as u64;
        }
    }

    /// Record one completed task
    pub fn record(&self, extension: &str, result: &TaskResult) {
        self.inner.lock().entry(extension).observe(result);
    }

    /// Record an extension the sampler ruled out; it reports zero files
    pub fn skip(&self, sample: &SampleResult) {
        let mut inner = self.inner.lock();
        let metrics = inner.entry(&sample.extension);
        metrics.sampled = sample.sampled as u64;
        metrics.status = ExtensionStatus::Skipped;
        metrics.finished = Some(Instant::now());
    }

    /// Close an extension's entry. Later records still count but the
    /// duration is frozen.
    pub fn finalize(&self, extension: &str, status: ExtensionStatus) -> ExtensionMetrics {
        let mut inner = self.inner.lock();
        let metrics = inner.entry(extension);
        if metrics.finished.is_none() {
            metrics.finished = Some(Instant::now());
        }
        metrics.status = status;
        metrics.clone()
    }

    /// Snapshot of one extension
    pub fn get(&self, extension: &str) -> Option<ExtensionMetrics> {
        self.inner.lock().by_extension.get(extension).cloned()
    }

    /// Build the run report from every observation so far
    pub fn report(&self, cancelled: bool, limit_reached: bool) -> RunReport {
        let inner = self.inner.lock();
        let extensions = inner
            .order
            .iter()
            .filter_map(|ext| inner.by_extension.get(ext).cloned())
            .collect();

        RunReport {
            extensions,
            started_at: self.started_at,
            wall_clock: self.started.elapsed(),
            parallel: self.parallel,
            dry_run: self.dry_run,
            cancelled,
            limit_reached,
        }
    }
}

impl ResultSink for MetricsAggregator {
    fn record(&self, task: &FileTask, result: &TaskResult) {
        MetricsAggregator::record(self, &task.extension, result);
    }
}
