//! System-wide default handlers
//!
//! Clearing per-file overrides makes files fall back to the system default
//! for their type. This module sets those defaults from a static mapping
//! file by invoking an external association tool (`duti` by default) once
//! per entry.
//!
//! Mapping format, one entry per line:
//!
//! ```text
//! # bundle id                   type               role
//! com.microsoft.VSCode          .md                all
//! com.apple.TextEdit            public.plain-text  editor
//! ```

use crate::error::ConfigError;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

/// Roles accepted by the association tool
pub const VALID_ROLES: &[&str] = &["all", "viewer", "editor", "shell", "none"];

/// One line of the mapping file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Association {
    /// Application bundle identifier
    pub bundle_id: String,

    /// `.ext` or a uniform type identifier
    pub content_type: String,

    /// Handler role
    pub role: String,

    /// Line number in the mapping file (1-based)
    pub line: usize,
}

impl fmt::Display for Association {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.bundle_id, self.content_type, self.role)
    }
}

/// Parse mapping text. Blank lines and `#` comments are ignored.
pub fn parse_mapping(text: &str) -> Result<Vec<Association>, ConfigError> {
    let mut associations = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let content = raw.split('#').next().unwrap_or("").trim();
        if content.is_empty() {
            continue;
        }

        let fields: Vec<&str> = content.split_whitespace().collect();
        let [bundle_id, content_type, role] = fields[..] else {
            return Err(ConfigError::InvalidMapping {
                line,
                reason: format!("expected 3 fields, found {}", fields.len()),
            });
        };

        if !bundle_id.contains('.') {
            return Err(ConfigError::InvalidMapping {
                line,
                reason: format!("'{}' is not a bundle identifier", bundle_id),
            });
        }

        let is_extension = content_type.len() > 1 && content_type.starts_with('.');
        let is_uti = !content_type.starts_with('.') && content_type.contains('.');
        if !is_extension && !is_uti {
            return Err(ConfigError::InvalidMapping {
                line,
                reason: format!("'{}' is neither a .ext nor a UTI", content_type),
            });
        }

        let role = role.to_ascii_lowercase();
        if !VALID_ROLES.contains(&role.as_str()) {
            return Err(ConfigError::InvalidMapping {
                line,
                reason: format!("unknown role '{}' (expected one of {})", role, VALID_ROLES.join(", ")),
            });
        }

        associations.push(Association {
            bundle_id: bundle_id.to_string(),
            content_type: content_type.to_string(),
            role,
            line,
        });
    }

    Ok(associations)
}

/// Read and parse a mapping file
pub fn load_mapping(path: &Path) -> crate::error::Result<Vec<Association>> {
    let text = fs::read_to_string(path)?;
    Ok(parse_mapping(&text)?)
}

/// Counts from one apply pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub applied: usize,
    pub failed: usize,
    pub dry_run: bool,
}

/// Runs the association tool for each mapping entry
#[derive(Debug, Clone)]
pub struct DefaultsApplier {
    tool: PathBuf,
    dry_run: bool,
}

impl DefaultsApplier {
    /// Resolve `tool` (a name on PATH or an explicit path).
    ///
    /// In dry-run mode a missing tool is tolerated since nothing is run.
    pub fn new(tool: &str, dry_run: bool) -> Result<Self, ConfigError> {
        let resolved = match find_tool(tool) {
            Some(path) => path,
            None if dry_run => PathBuf::from(tool),
            None => {
                return Err(ConfigError::ToolNotFound {
                    tool: tool.to_string(),
                })
            }
        };
        debug!(tool = %resolved.display(), "Using association tool");

        Ok(Self {
            tool: resolved,
            dry_run,
        })
    }

    /// Command line for one association
    pub fn command_line(&self, association: &Association) -> String {
        format!("{} -s {}", self.tool.display(), association)
    }

    /// Apply every association. Per-entry failures are logged and counted.
    pub fn apply(&self, associations: &[Association]) -> ApplySummary {
        let mut summary = ApplySummary {
            dry_run: self.dry_run,
            ..ApplySummary::default()
        };

        for association in associations {
            if self.dry_run {
                println!("{}", self.command_line(association));
                summary.applied += 1;
                continue;
            }

            let result = Command::new(&self.tool)
                .arg("-s")
                .arg(&association.bundle_id)
                .arg(&association.content_type)
                .arg(&association.role)
                .output();

            match result {
                Ok(output) if output.status.success() => {
                    debug!(line = association.line, "Applied {}", association);
                    summary.applied += 1;
                }
                Ok(output) => {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    warn!(
                        line = association.line,
                        status = %output.status,
                        stderr = %stderr.trim(),
                        "Failed to apply {}",
                        association
                    );
                    summary.failed += 1;
                }
                Err(e) => {
                    warn!(line = association.line, error = %e, "Failed to run association tool");
                    summary.failed += 1;
                }
            }
        }

        info!(
            applied = summary.applied,
            failed = summary.failed,
            dry_run = summary.dry_run,
            "Defaults applied"
        );
        summary
    }
}

/// Locate an executable by explicit path or on PATH
fn find_tool(tool: &str) -> Option<PathBuf> {
    let candidate = Path::new(tool);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .map(|dir| dir.join(tool))
        .find(|p| p.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAPPING: &str = "\
# editors
com.microsoft.VSCode   .md               all
com.apple.TextEdit     public.plain-text Editor   # trailing comment

com.apple.Preview      .pdf              viewer
";

    #[test]
    fn test_parse_mapping() {
        let entries = parse_mapping(MAPPING).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].bundle_id, "com.microsoft.VSCode");
        assert_eq!(entries[0].content_type, ".md");
        assert_eq!(entries[1].role, "editor");
        assert_eq!(entries[1].line, 3);
        assert_eq!(entries[2].line, 5);
    }

    #[test]
    fn test_parse_mapping_errors() {
        let err = parse_mapping("com.apple.Preview .pdf").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidMapping { line: 1, .. }));

        let err = parse_mapping("\ncom.apple.Preview pdf viewer").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidMapping { line: 2, .. }));

        let err = parse_mapping("Preview .pdf viewer").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidMapping { .. }));

        let err = parse_mapping("com.apple.Preview .pdf owner").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidMapping { .. }));
    }

    #[test]
    fn test_missing_tool_is_validation_error() {
        let err = DefaultsApplier::new("lsreset-no-such-tool", false).unwrap_err();
        assert!(matches!(err, ConfigError::ToolNotFound { .. }));

        // Dry-run never runs the tool
        let applier = DefaultsApplier::new("lsreset-no-such-tool", true).unwrap();
        let summary = applier.apply(&parse_mapping(MAPPING).unwrap());
        assert_eq!(summary.applied, 3);
        assert!(summary.dry_run);
    }

    #[test]
    fn test_command_line() {
        let applier = DefaultsApplier::new("duti-not-installed", true).unwrap();
        let entries = parse_mapping("com.apple.Preview .pdf viewer").unwrap();
        assert_eq!(
            applier.command_line(&entries[0]),
            "duti-not-installed -s com.apple.Preview .pdf viewer"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_apply_counts_failures() {
        let entries = parse_mapping(MAPPING).unwrap();

        let ok = DefaultsApplier::new("true", false).unwrap().apply(&entries);
        assert_eq!(ok.applied, 3);
        assert_eq!(ok.failed, 0);

        let failing = DefaultsApplier::new("false", false).unwrap().apply(&entries);
        assert_eq!(failing.applied, 0);
        assert_eq!(failing.failed, 3);
    }
}
