//! Configuration types for lsreset
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - Runtime configuration with validation
//! - Size and extension parsing helpers

use crate::dispatch::{default_worker_count, WorkerConfig, DEFAULT_CHUNK_SIZE};
use crate::error::ConfigError;
use crate::sampler::DEFAULT_SAMPLE_SIZE;
use crate::walker::ExcludeRules;
use clap::Parser;
use regex::Regex;
use std::path::PathBuf;

/// Maximum reasonable worker count
pub const MAX_WORKERS: usize = 512;

/// Largest chunk handed to a worker at once
pub const MAX_CHUNK_SIZE: usize = 100_000;

/// Extensions considered when none are given explicitly
pub const DEFAULT_MAX_EXTENSIONS: usize = 64;

/// Default external association tool
pub const DEFAULT_ASSOCIATION_TOOL: &str = "duti";

/// Reset per-file Launch Services handler overrides
#[derive(Parser, Debug, Clone)]
#[command(
    name = "lsreset",
    version,
    about = "Reset per-file Launch Services handler overrides across large file trees",
    long_about = "Walks a directory tree and removes the com.apple.LaunchServices.OpenWith \
                  extended attribute from every matching file, so each file falls back to the \
                  system-wide default application for its type.\n\n\
                  Each extension is sampled first. Extensions where no sampled file carries an \
                  override are skipped without a full pass.",
    after_help = "EXAMPLES:\n    \
        lsreset ~/Documents -e md,txt\n    \
        lsreset ~/Downloads --dry-run\n    \
        lsreset /Volumes/Share -w 8 --max-rate 2000 --exclude '\\.photoslibrary'\n    \
        lsreset apply-defaults defaults.txt --dry-run",
    args_conflicts_with_subcommands = true,
    subcommand_negates_reqs = true
)]
pub struct CliArgs {
    /// Root directory to scan (defaults to $HOME)
    #[arg(value_name = "ROOT", env = "LSRESET_ROOT")]
    pub root: Option<PathBuf>,

    /// Subcommand (apply-defaults)
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Extensions to process (comma-separated or repeated; all if omitted)
    #[arg(
        short = 'e',
        long = "ext",
        value_name = "EXT",
        value_delimiter = ',',
        action = clap::ArgAction::Append,
        env = "LSRESET_EXT"
    )]
    pub extensions: Vec<String>,

    /// Report what would be cleared without changing anything
    #[arg(short = 'n', long, env = "LSRESET_DRY_RUN")]
    pub dry_run: bool,

    /// Number of worker threads
    #[arg(
        short = 'w',
        long,
        default_value_t = default_worker_count(),
        value_name = "NUM",
        env = "LSRESET_WORKERS"
    )]
    pub workers: usize,

    /// Files handed to a worker at once
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE, value_name = "NUM", env = "LSRESET_CHUNK_SIZE")]
    pub chunk_size: usize,

    /// Files checked per extension before deciding on a full pass (0 disables sampling)
    #[arg(long, default_value_t = DEFAULT_SAMPLE_SIZE, value_name = "NUM", env = "LSRESET_SAMPLE_SIZE")]
    pub sample_size: usize,

    /// Stop after this many files across all extensions
    #[arg(long, value_name = "NUM", env = "LSRESET_MAX_FILES")]
    pub max_files: Option<u64>,

    /// Ceiling on files submitted per second
    #[arg(long, value_name = "NUM", env = "LSRESET_MAX_RATE")]
    pub max_rate: Option<u32>,

    /// Ceiling on buffered task memory (e.g. 64MB, 1GB)
    #[arg(long, value_name = "SIZE", env = "LSRESET_MAX_MEMORY")]
    pub max_memory: Option<String>,

    /// Stop the current extension on the first worker failure
    #[arg(long, env = "LSRESET_HALT_ON_ERROR")]
    pub halt_on_error: bool,

    /// Record results in walk order instead of completion order
    #[arg(long, env = "LSRESET_PRESERVE_ORDER")]
    pub preserve_order: bool,

    /// Exclude paths matching pattern (can be repeated)
    #[arg(long = "exclude", value_name = "PATTERN", action = clap::ArgAction::Append)]
    pub exclude_patterns: Vec<String>,

    /// Descend into hidden directories
    #[arg(long, env = "LSRESET_INCLUDE_HIDDEN")]
    pub include_hidden: bool,

    /// Most extensions to process when none are given
    #[arg(long, default_value_t = DEFAULT_MAX_EXTENSIONS, value_name = "NUM")]
    pub max_extensions: usize,

    /// Seed for the sampler (reproducible runs)
    #[arg(long, value_name = "NUM")]
    pub seed: Option<u64>,

    /// Also write logs and the final report to this file
    #[arg(long, value_name = "FILE", env = "LSRESET_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Quiet mode - suppress progress output
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

/// Subcommands
#[derive(clap::Subcommand, Debug, Clone)]
pub enum Command {
    /// Apply system-wide default handlers from a mapping file
    ApplyDefaults {
        /// Mapping file: one `<bundle-id> <.ext|uti> <role>` per line
        #[arg(value_name = "MAPPING")]
        mapping: PathBuf,

        /// Association tool to invoke
        #[arg(long, default_value = DEFAULT_ASSOCIATION_TOOL, value_name = "PATH")]
        tool: String,

        /// Print the commands instead of running them
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Verbose output (debug logging)
        #[arg(short = 'v', long)]
        verbose: bool,
    },
}

/// Parse a human-readable size string (e.g., "64MB", "1.5GB")
pub fn parse_size(s: &str) -> Result<u64, ConfigError> {
    let upper = s.trim().to_uppercase();

    let (num_str, multiplier) = if let Some(n) = upper.strip_suffix("TB") {
        (n, 1024u64 * 1024 * 1024 * 1024)
    } else if let Some(n) = upper.strip_suffix("GB") {
        (n, 1024u64 * 1024 * 1024)
    } else if let Some(n) = upper.strip_suffix("MB") {
        (n, 1024u64 * 1024)
    } else if let Some(n) = upper.strip_suffix("KB") {
        (n, 1024u64)
    } else if let Some(n) = upper.strip_suffix('B') {
        (n, 1u64)
    } else {
        // Assume bytes if no suffix
        (upper.as_str(), 1u64)
    };

    let num: f64 = num_str
        .trim()
        .parse()
        .ok()
        .filter(|n: &f64| n.is_finite() && *n >= 0.0)
        .ok_or_else(|| ConfigError::InvalidSize {
            value: s.to_string(),
        })?;

    Ok((num * multiplier as f64) as u64)
}

/// Normalize a user-supplied extension: strip the leading dot, lowercase
pub fn normalize_extension(ext: &str) -> Result<String, ConfigError> {
    let trimmed = ext.trim();
    let bare = trimmed.strip_prefix('.').unwrap_or(trimmed);

    if bare.is_empty() {
        return Err(ConfigError::InvalidExtension {
            ext: ext.to_string(),
            reason: "empty extension".into(),
        });
    }
    if bare.contains(['/', '\\', '.']) || bare.chars().any(char::is_whitespace) {
        return Err(ConfigError::InvalidExtension {
            ext: ext.to_string(),
            reason: "must be a single path component without dots".into(),
        });
    }

    Ok(bare.to_ascii_lowercase())
}

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Directory to scan
    pub root: PathBuf,

    /// Normalized extension allow-list (empty = discover from the tree)
    pub extensions: Vec<String>,

    /// Most extensions to discover when the allow-list is empty
    pub max_extensions: usize,

    /// Check instead of clear
    pub dry_run: bool,

    /// Worker pool settings
    pub workers: WorkerConfig,

    /// Files sampled per extension
    pub sample_size: usize,

    /// Sampler seed
    pub seed: Option<u64>,

    /// Run-wide file ceiling
    pub max_files: Option<u64>,

    /// Ceiling on buffered task bytes per dispatch segment
    pub max_memory_bytes: Option<u64>,

    /// Directory and path exclusions
    pub exclude: ExcludeRules,

    /// Show progress indicator
    pub show_progress: bool,

    /// Verbose logging
    pub verbose: bool,

    /// Log file destination
    pub log_file: Option<PathBuf>,
}

impl RunConfig {
    /// Configuration with defaults for everything but the root
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extensions: Vec::new(),
            max_extensions: DEFAULT_MAX_EXTENSIONS,
            dry_run: false,
            workers: WorkerConfig::default(),
            sample_size: DEFAULT_SAMPLE_SIZE,
            seed: None,
            max_files: None,
            max_memory_bytes: None,
            exclude: ExcludeRules::default(),
            show_progress: false,
            verbose: false,
            log_file: None,
        }
    }

    /// Create and validate configuration from CLI arguments
    pub fn from_args(args: CliArgs) -> Result<Self, ConfigError> {
        if args.quiet && args.verbose {
            return Err(ConfigError::ConflictingFlags(
                "--quiet and --verbose cannot be used together".into(),
            ));
        }

        let root = match args.root {
            Some(root) => root,
            None => std::env::var_os("HOME")
                .map(PathBuf::from)
                .ok_or(ConfigError::MissingRoot)?,
        };

        // Validate worker count
        if args.workers == 0 || args.workers > MAX_WORKERS {
            return Err(ConfigError::InvalidWorkerCount {
                count: args.workers,
                max: MAX_WORKERS,
            });
        }

        // Validate chunk size
        if args.chunk_size == 0 || args.chunk_size > MAX_CHUNK_SIZE {
            return Err(ConfigError::InvalidChunkSize {
                size: args.chunk_size,
                max: MAX_CHUNK_SIZE,
            });
        }

        if args.max_files == Some(0) {
            return Err(ConfigError::ZeroLimit { flag: "--max-files" });
        }
        if args.max_rate == Some(0) {
            return Err(ConfigError::ZeroLimit { flag: "--max-rate" });
        }
        if args.max_extensions == 0 {
            return Err(ConfigError::ZeroLimit {
                flag: "--max-extensions",
            });
        }

        let max_memory_bytes = match args.max_memory.as_deref() {
            Some(s) => match parse_size(s)? {
                0 => return Err(ConfigError::ZeroLimit { flag: "--max-memory" }),
                n => Some(n),
            },
            None => None,
        };

        // Normalize extensions, dropping duplicates but keeping order
        let mut extensions: Vec<String> = Vec::with_capacity(args.extensions.len());
        for ext in &args.extensions {
            let ext = normalize_extension(ext)?;
            if !extensions.contains(&ext) {
                extensions.push(ext);
            }
        }

        // Compile exclude patterns
        let exclude_patterns = args
            .exclude_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| ConfigError::InvalidExcludePattern {
                    pattern: p.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut exclude = ExcludeRules::with_patterns(exclude_patterns);
        exclude.include_hidden = args.include_hidden;

        // Validate log file path
        if let Some(ref log_file) = args.log_file {
            if let Some(parent) = log_file.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    return Err(ConfigError::InvalidLogFile {
                        path: log_file.clone(),
                        reason: format!("Parent directory '{}' does not exist", parent.display()),
                    });
                }
            }
        }

        Ok(Self {
            root,
            extensions,
            max_extensions: args.max_extensions,
            dry_run: args.dry_run,
            workers: WorkerConfig {
                worker_count: args.workers,
                chunk_size: args.chunk_size,
                halt_on_error: args.halt_on_error,
                preserve_order: args.preserve_order,
                max_rate_per_second: args.max_rate,
            },
            sample_size: args.sample_size,
            seed: args.seed,
            max_files: args.max_files,
            max_memory_bytes,
            exclude,
            show_progress: !args.quiet,
            verbose: args.verbose,
            log_file: args.log_file,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(std::iter::once("lsreset").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("512").unwrap(), 512);
        assert_eq!(parse_size("64MB").unwrap(), 64 * 1024 * 1024);
        assert_eq!(parse_size("1.5kb").unwrap(), 1536);
        assert_eq!(parse_size("2GB").unwrap(), 2 * 1024 * 1024 * 1024);
        assert!(parse_size("lots").is_err());
        assert!(parse_size("-5MB").is_err());
    }

    #[test]
    fn test_normalize_extension() {
        assert_eq!(normalize_extension(".MD").unwrap(), "md");
        assert_eq!(normalize_extension("txt").unwrap(), "txt");
        assert!(normalize_extension(".").is_err());
        assert!(normalize_extension("tar.gz").is_err());
        assert!(normalize_extension("a/b").is_err());
    }

    #[test]
    fn test_from_args_normalizes_extensions() {
        let args = parse(&["/tmp", "-e", ".MD,txt", "--ext", "md"]);
        let config = RunConfig::from_args(args).unwrap();
        assert_eq!(config.extensions, vec!["md", "txt"]);
        assert_eq!(config.root, PathBuf::from("/tmp"));
        assert!(config.show_progress);
    }

    #[test]
    fn test_worker_settings_flow_through() {
        let args = parse(&[
            "/tmp",
            "-w",
            "3",
            "--chunk-size",
            "64",
            "--max-rate",
            "100",
            "--halt-on-error",
            "--preserve-order",
            "--max-memory",
            "8MB",
        ]);
        let config = RunConfig::from_args(args).unwrap();
        assert_eq!(config.workers.worker_count, 3);
        assert_eq!(config.workers.chunk_size, 64);
        assert_eq!(config.workers.max_rate_per_second, Some(100));
        assert!(config.workers.halt_on_error);
        assert!(config.workers.preserve_order);
        assert_eq!(config.max_memory_bytes, Some(8 * 1024 * 1024));
    }

    #[test]
    fn test_rejects_invalid_limits() {
        let err = RunConfig::from_args(parse(&["/tmp", "-w", "0"])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidWorkerCount { .. }));

        let err = RunConfig::from_args(parse(&["/tmp", "--chunk-size", "0"])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidChunkSize { .. }));

        let err = RunConfig::from_args(parse(&["/tmp", "--max-files", "0"])).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroLimit { flag: "--max-files" }));

        let err = RunConfig::from_args(parse(&["/tmp", "--max-memory", "0"])).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroLimit { .. }));
    }

    #[test]
    fn test_rejects_quiet_with_verbose() {
        let err = RunConfig::from_args(parse(&["/tmp", "-q", "-v"])).unwrap_err();
        assert!(matches!(err, ConfigError::ConflictingFlags(_)));
    }

    #[test]
    fn test_exclude_pattern() {
        let config = RunConfig::from_args(parse(&["/tmp", "--exclude", r"\.photoslibrary"])).unwrap();
        assert!(config
            .exclude
            .is_excluded(std::path::Path::new("/Users/me/Pictures/Photos.photoslibrary/x.jpg")));
        assert!(!config.exclude.is_excluded(std::path::Path::new("/Users/me/notes.md")));

        let err = RunConfig::from_args(parse(&["/tmp", "--exclude", "("])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidExcludePattern { .. }));
    }

    #[test]
    fn test_apply_defaults_subcommand() {
        let args = parse(&["apply-defaults", "map.txt", "--dry-run"]);
        match args.command {
            Some(Command::ApplyDefaults {
                mapping,
                tool,
                dry_run,
                ..
            }) => {
                assert_eq!(mapping, PathBuf::from("map.txt"));
                assert_eq!(tool, DEFAULT_ASSOCIATION_TOOL);
                assert!(dry_run);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
