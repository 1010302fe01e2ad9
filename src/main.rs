//! lsreset - Launch Services override reset
//!
//! Entry point for the CLI application.

use anyhow::{Context, Result};
use clap::Parser;
use lsreset::config::{CliArgs, Command, RunConfig};
use lsreset::defaults::{load_mapping, DefaultsApplier};
use lsreset::error::{ConfigError, ResetError, EXIT_CANCELLED, EXIT_FAILURE, EXIT_SUCCESS, EXIT_VALIDATION};
use lsreset::orchestrator::{RunObserver, RunOrchestrator, RunState};
use lsreset::progress::{print_header, print_report, render_report, ProgressReporter};
use lsreset::XattrStore;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

fn main() -> ExitCode {
    match run() {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_code_for(&e))
        }
    }
}

/// Map an error chain to the process exit code
fn exit_code_for(e: &anyhow::Error) -> u8 {
    if let Some(err) = e.downcast_ref::<ResetError>() {
        return err.exit_code();
    }
    if e.downcast_ref::<ConfigError>().is_some() {
        return EXIT_VALIDATION;
    }
    EXIT_FAILURE
}

fn run() -> Result<u8> {
    // Parse CLI arguments
    let args = CliArgs::parse();

    if let Some(Command::ApplyDefaults {
        mapping,
        tool,
        dry_run,
        verbose,
    }) = &args.command
    {
        setup_logging(*verbose, None)?;
        return apply_defaults(mapping, tool, *dry_run);
    }

    // Setup logging
    let mut log_file = setup_logging(args.verbose, args.log_file.as_deref())?;

    // Validate and create config
    let config = RunConfig::from_args(args).context("Invalid configuration")?;

    if !XattrStore::supported() {
        warn!("Extended attributes are not supported on this platform; every file will fail");
    }

    // Print header
    if config.show_progress {
        print_header(
            &config.root,
            &config.extensions,
            config.workers.worker_count,
            config.max_memory_bytes,
            config.dry_run,
        );
    }

    let mut orchestrator = RunOrchestrator::new(config.clone(), XattrStore::new());

    // Setup signal handler: first interrupt drains, second one exits
    let shutdown_flag = orchestrator.shutdown_flag();
    ctrlc::set_handler(move || {
        if shutdown_flag.swap(true, Ordering::SeqCst) {
            eprintln!("\nSecond interrupt, exiting immediately");
            std::process::exit(i32::from(EXIT_CANCELLED));
        }
        eprintln!("\nInterrupt received, finishing in-flight work...");
    })
    .context("Failed to set signal handler")?;

    // Create progress reporter
    let progress = config.show_progress.then(|| Arc::new(ProgressReporter::new()));
    if let Some(ref p) = progress {
        p.set_status("Scanning...");
        orchestrator = orchestrator.with_observer(Arc::clone(p) as Arc<dyn RunObserver>);
    }

    // Run every extension
    let summary = orchestrator.run().context("Run failed")?;

    // Finish progress
    if let Some(ref p) = progress {
        if summary.state == RunState::Cancelled {
            p.finish("Run interrupted");
        } else {
            p.finish_and_clear();
        }
    }

    print_report(&summary.report);

    if let Some(ref mut file) = log_file {
        file.write_all(render_report(&summary.report).as_bytes())
            .context("Failed to write report to log file")?;
    }

    if summary.state == RunState::Cancelled {
        info!("Run was interrupted before completion");
    }
    if summary.report.total_errors() > 0 {
        info!(errors = summary.report.total_errors(), "Run completed with errors");
    }

    Ok(summary.exit_code())
}

/// Set system-wide defaults from a mapping file
fn apply_defaults(mapping: &Path, tool: &str, dry_run: bool) -> Result<u8> {
    let associations = load_mapping(mapping)
        .with_context(|| format!("Failed to load mapping '{}'", mapping.display()))?;
    let applier = DefaultsApplier::new(tool, dry_run).context("Cannot apply defaults")?;

    let summary = applier.apply(&associations);
    if !summary.dry_run {
        println!(
            "Applied {} of {} associations ({} failed)",
            summary.applied,
            associations.len(),
            summary.failed
        );
    }

    Ok(if summary.failed > 0 {
        EXIT_FAILURE
    } else {
        EXIT_SUCCESS
    })
}

/// Install the tracing subscriber. With a log file, a second plain-text
/// layer writes there and a handle is returned for the final report.
fn setup_logging(verbose: bool, log_file: Option<&Path>) -> Result<Option<File>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("lsreset=debug,warn")
        } else {
            EnvFilter::new("lsreset=info,warn")
        }
    });

    let (file_layer, report_handle) = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| ConfigError::InvalidLogFile {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })?;
            let handle = file.try_clone().context("Failed to duplicate log file handle")?;
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(Mutex::new(file));
            (Some(layer), Some(handle))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .init();

    Ok(report_handle)
}
