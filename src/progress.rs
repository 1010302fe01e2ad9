//! Progress reporting and the final report
//!
//! Provides real-time progress display using indicatif progress bars, and
//! the tabular per-extension report printed at the end of a run.

use crate::dispatch::{ResultSink, TaskResult};
use crate::metrics::{ExtensionMetrics, ExtensionStatus, RunReport};
use crate::orchestrator::RunObserver;
use crate::sampler::SampleResult;
use crate::walker::FileTask;
use console::style;
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Results between spinner message refreshes
const REFRESH_EVERY: u64 = 64;

/// Progress reporter that displays run status
pub struct ProgressReporter {
    /// Progress bar
    bar: ProgressBar,

    /// Extension currently being processed
    current: Mutex<String>,

    /// Position of the current extension in the run
    position: Mutex<(usize, usize)>,

    files: AtomicU64,
    found: AtomicU64,
    errors: AtomicU64,
    started: Instant,
}

impl ProgressReporter {
    /// Create a new progress reporter
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();

        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );

        bar.enable_steady_tick(Duration::from_millis(100));

        Self {
            bar,
            current: Mutex::new(String::new()),
            position: Mutex::new((0, 0)),
            files: AtomicU64::new(0),
            found: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    /// Refresh the spinner message from the counters
    fn update(&self) {
        let files = self.files.load(Ordering::Relaxed);
        let elapsed = self.started.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 {
            files as f64 / elapsed
        } else {
            0.0
        };
        let (index, total) = *self.position.lock();

        let msg = format!(
            "[{}/{}] .{} | Files: {} | Overrides: {} | Errors: {} | Rate: {:.0}/s",
            index,
            total,
            self.current.lock(),
            format_number(files),
            format_number(self.found.load(Ordering::Relaxed)),
            format_number(self.errors.load(Ordering::Relaxed)),
            rate,
        );

        self.bar.set_message(msg);
    }

    /// Set a status message
    pub fn set_status(&self, status: &str) {
        self.bar.set_message(status.to_string());
    }

    /// Finish the progress display with a final message
    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    /// Finish and clear the progress display
    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultSink for ProgressReporter {
    fn record(&self, _task: &FileTask, result: &TaskResult) {
        let files = self.files.fetch_add(1, Ordering::Relaxed) + 1;
        match result {
            TaskResult::Found => {
                self.found.fetch_add(1, Ordering::Relaxed);
            }
            TaskResult::Clean => {}
            TaskResult::Failed(_) | TaskResult::Aborted(_) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
            }
        }
        if files % REFRESH_EVERY == 0 {
            self.update();
        }
    }
}

impl RunObserver for ProgressReporter {
    fn extension_started(&self, extension: &str, index: usize, total: usize) {
        *self.current.lock() = extension.to_string();
        *self.position.lock() = (index + 1, total);
        self.set_status(&format!("[{}/{}] Sampling .{}...", index + 1, total, extension));
    }

    fn extension_sampled(&self, sample: &SampleResult) {
        if sample.worth_processing {
            self.update();
        }
    }

    fn extension_finished(&self, _metrics: &ExtensionMetrics) {
        self.update();
    }
}

/// Format a number with thousands separators
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = bytes
        .chunks(3)
        .map(|chunk| {
            chunk
                .iter()
                .rev()
                .map(|&b| b as char)
                .collect::<String>()
        })
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

fn format_rate(rate: f64) -> String {
    format!("{:.0}/s", rate)
}

/// Render the report as plain text (no styling), for log files
pub fn render_report(report: &RunReport) -> String {
    let mut out = String::new();
    let title = match (report.cancelled, report.dry_run) {
        (true, _) => "Run Interrupted (partial report)",
        (false, true) => "Dry Run Complete",
        (false, false) => "Run Complete",
    };

    let _ = writeln!(out, "{} at {}", title, report.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
    let _ = writeln!(
        out,
        "{:<12} {:>12} {:>12} {:>8} {:>10} {:>10}  {}",
        "EXTENSION", "FILES", "OVERRIDES", "ERRORS", "DURATION", "RATE", "STATUS"
    );
    for m in &report.extensions {
        let _ = writeln!(
            out,
            "{:<12} {:>12} {:>12} {:>8} {:>9.2}s {:>10}  {}",
            format!(".{}", m.extension),
            format_number(m.files_total),
            format_number(m.files_with_override),
            format_number(m.errors),
            m.duration().as_secs_f64(),
            format_rate(m.rate()),
            m.status,
        );
    }
    let _ = writeln!(
        out,
        "{:<12} {:>12} {:>12} {:>8} {:>9.2}s {:>10}",
        "TOTAL",
        format_number(report.total_files()),
        format_number(report.total_with_override()),
        format_number(report.total_errors()),
        report.total_duration().as_secs_f64(),
        format_rate(report.total_rate()),
    );

    let fastest = ranking(&report.fastest(3));
    if !fastest.is_empty() {
        let _ = writeln!(out, "Fastest: {}", fastest);
        let _ = writeln!(out, "Slowest: {}", ranking(&report.slowest(3)));
    }
    if report.limit_reached {
        let _ = writeln!(out, "File limit reached; remaining extensions not processed");
    }
    out
}

fn ranking(metrics: &[&ExtensionMetrics]) -> String {
    metrics
        .iter()
        .map(|m| format!(".{} ({})", m.extension, format_rate(m.rate())))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Print the final report
pub fn print_report(report: &RunReport) {
    let title = if report.cancelled {
        style("Run Interrupted (partial report)").yellow().bold()
    } else if report.dry_run {
        style("Dry Run Complete").green().bold()
    } else {
        style("Run Complete").green().bold()
    };

    println!();
    println!("{}", title);
    println!("{}", style("─".repeat(78)).dim());
    println!(
        "  {}",
        style(format!(
            "{:<12} {:>12} {:>12} {:>8} {:>10} {:>10}  {}",
            "Extension", "Files", "Overrides", "Errors", "Duration", "Rate", "Status"
        ))
        .bold()
    );
    for m in &report.extensions {
        let status = match m.status {
            ExtensionStatus::Completed => style(m.status.to_string()).green(),
            ExtensionStatus::Skipped => style(m.status.to_string()).dim(),
            _ => style(m.status.to_string()).yellow(),
        };
        println!(
            "  {:<12} {:>12} {:>12} {:>8} {:>9.2}s {:>10}  {}",
            format!(".{}", m.extension),
            format_number(m.files_total),
            format_number(m.files_with_override),
            format_number(m.errors),
            m.duration().as_secs_f64(),
            format_rate(m.rate()),
            status,
        );
    }
    println!("{}", style("─".repeat(78)).dim());
    println!(
        "  {:<12} {:>12} {:>12} {:>8} {:>9.2}s {:>10}",
        style("Total").bold(),
        format_number(report.total_files()),
        format_number(report.total_with_override()),
        format_number(report.total_errors()),
        report.total_duration().as_secs_f64(),
        format_rate(report.total_rate()),
    );

    let fastest = report.fastest(3);
    if !fastest.is_empty() {
        println!();
        println!("  {} {}", style("Fastest:").bold(), ranking(&fastest));
        println!("  {} {}", style("Slowest:").bold(), ranking(&report.slowest(3)));
    }
    if report.total_errors() > 0 {
        println!(
            "  {} {} files could not be processed",
            style("Errors:").yellow().bold(),
            format_number(report.total_errors())
        );
    }
    if report.limit_reached {
        println!(
            "  {} remaining extensions not processed",
            style("File limit reached:").yellow().bold()
        );
    }
    println!();
}

/// Print a header at the start of the run
pub fn print_header(
    root: &Path,
    extensions: &[String],
    workers: usize,
    max_memory: Option<u64>,
    dry_run: bool,
) {
    println!();
    println!(
        "{} {}",
        style("lsreset").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Root:").bold(), root.display());
    if extensions.is_empty() {
        println!("  {} auto-detect", style("Extensions:").bold());
    } else {
        println!("  {} {}", style("Extensions:").bold(), extensions.join(", "));
    }
    println!("  {} {}", style("Workers:").bold(), workers);
    if let Some(bytes) = max_memory {
        println!("  {} {}", style("Task memory:").bold(), format_size(bytes, BINARY));
    }
    if dry_run {
        println!("  {} {}", style("Mode:").bold(), style("dry run").yellow());
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsAggregator;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567), "1,234,567");
        assert_eq!(format_number(1234567890), "1,234,567,890");
    }

    #[test]
    fn test_render_report_lists_extensions_and_totals() {
        let metrics = MetricsAggregator::new(false, false);
        metrics.begin("md", None);
        for _ in 0..1200 {
            metrics.record("md", &TaskResult::Found);
        }
        metrics.finalize("md", ExtensionStatus::Completed);

        let text = render_report(&metrics.report(false, false));
        assert!(text.contains("Run Complete"));
        assert!(text.contains(".md"));
        assert!(text.contains("1,200"));
        assert!(text.contains("TOTAL"));
        assert!(text.contains("Fastest: .md"));
    }

    #[test]
    fn test_render_partial_report() {
        let metrics = MetricsAggregator::new(false, true);
        metrics.begin("txt", None);
        metrics.finalize("txt", ExtensionStatus::Cancelled);

        let text = render_report(&metrics.report(true, false));
        assert!(text.contains("partial report"));
        assert!(text.contains("cancelled"));
        assert!(!text.contains("Fastest"));
    }

    #[test]
    fn test_reporter_counts_results() {
        let reporter = ProgressReporter::new();
        let task = FileTask::new("/a.md", "md");
        reporter.record(&task, &TaskResult::Found);
        reporter.record(&task, &TaskResult::Clean);
        assert_eq!(reporter.files.load(Ordering::Relaxed), 2);
        assert_eq!(reporter.found.load(Ordering::Relaxed), 1);
        reporter.finish_and_clear();
    }
}
