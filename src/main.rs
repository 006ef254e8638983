//! Binary entry point for the testlink CLI.
//!
//! ## Usage
//!
//! ```bash
//! # Check that links and forward relations agree
//! testlink validate
//!
//! # Preview what sync would add
//! testlink sync --dry-run
//!
//! # Remove links to members that no longer exist
//! testlink sync --prune --force
//!
//! # Resolve one placeholder marker
//! testlink pair --placeholder @A
//!
//! # Qualify short @see targets
//! testlink fix-refs
//! ```

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};

use testlink::cli::{open, run_fix_refs, run_pair, run_sync, run_validate, OutputFormat};
use testlink_core::error::{OutputErrorCode, TestlinkError};
use testlink_core::output::{emit_response, ErrorResponse};
use testlink_core::sync::{Orchestrator, SyncOptions};

// ============================================================================
// CLI Structure
// ============================================================================

/// Bidirectional test traceability.
///
/// Keeps `#[TestedBy]` on production members, link declarations on tests
/// and `@see` tags on both sides in agreement.
#[derive(Parser, Debug)]
#[command(name = "testlink", version, about = "Bidirectional test traceability")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Command,
}

/// Global arguments shared by all subcommands.
#[derive(Parser, Debug)]
struct GlobalArgs {
    /// Project root directory (default: current directory).
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Configuration file (default: testlink.toml in the root).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level for tracing output.
    #[arg(long, global = true, value_enum, default_value = "warn")]
    log_level: LogLevel,

    /// Output format.
    #[arg(long, global = true, value_enum, default_value = "text")]
    format: OutputFormat,
}

/// Log level for tracing output.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn to_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// CLI subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Check links, forward relations, placeholders and `@see` names.
    ///
    /// Exits with status 1 when the tree is inconsistent.
    Validate,
    /// Add missing links and forward relations with their `@see` tags.
    Sync {
        /// Report the changes without writing files.
        #[arg(long)]
        dry_run: bool,
        /// Also remove links and tags pointing at members that no longer exist.
        #[arg(long)]
        prune: bool,
        /// Confirm pruning.
        #[arg(long)]
        force: bool,
    },
    /// Resolve placeholder markers into real links.
    Pair {
        /// Report the changes without writing files.
        #[arg(long)]
        dry_run: bool,
        /// Resolve only this placeholder (e.g. `@A` or `@@A`).
        #[arg(long)]
        placeholder: Option<String>,
    },
    /// Rewrite short `@see` targets to their fully-qualified form.
    FixRefs {
        /// Report the changes without writing files.
        #[arg(long)]
        dry_run: bool,
    },
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_tracing(cli.global.log_level);

    match execute(cli) {
        Ok(code) => code,
        Err(err) => {
            let error_code = OutputErrorCode::from(&err);
            let response = ErrorResponse::from_error(&err);

            // Errors go to stdout as JSON whatever the format
            let _ = emit_response(&response, &mut io::stdout());
            let _ = io::stdout().flush();

            ExitCode::from(error_code.code())
        }
    }
}

/// Initialize tracing subscriber.
fn init_tracing(level: LogLevel) {
    use tracing_subscriber::fmt::format::FmtSpan;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_tracing_level().to_string()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

/// Execute the CLI command.
fn execute(cli: Cli) -> Result<ExitCode, TestlinkError> {
    let format = cli.global.format;
    match cli.command {
        Command::Validate => execute_validate(&cli.global, format),
        Command::Sync {
            dry_run,
            prune,
            force,
        } => {
            let options = SyncOptions {
                dry_run,
                prune,
                force,
            };
            // Reject an unconfirmed prune before touching the tree
            options.check()?;
            let mut orchestrator = open_orchestrator(&cli.global)?;
            print_output(&run_sync(&mut orchestrator, &options, format)?)
        }
        Command::Pair {
            dry_run,
            placeholder,
        } => {
            let mut orchestrator = open_orchestrator(&cli.global)?;
            print_output(&run_pair(
                &mut orchestrator,
                placeholder.as_deref(),
                dry_run,
                format,
            )?)
        }
        Command::FixRefs { dry_run } => {
            let mut orchestrator = open_orchestrator(&cli.global)?;
            print_output(&run_fix_refs(&mut orchestrator, dry_run, format)?)
        }
    }
}

// ============================================================================
// Command Executors
// ============================================================================

fn execute_validate(global: &GlobalArgs, format: OutputFormat) -> Result<ExitCode, TestlinkError> {
    let orchestrator = open_orchestrator(global)?;
    let output = run_validate(&orchestrator, format)?;
    print_output(&output.rendered)?;
    Ok(if output.valid {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn open_orchestrator(global: &GlobalArgs) -> Result<Orchestrator, TestlinkError> {
    let root = match &global.root {
        Some(root) => root.clone(),
        None => std::env::current_dir()
            .map_err(|e| TestlinkError::io(".", e))?,
    };
    open(&root, global.config.as_deref())
}

fn print_output(rendered: &str) -> Result<ExitCode, TestlinkError> {
    let mut stdout = io::stdout();
    let result = if rendered.ends_with('\n') {
        write!(stdout, "{}", rendered)
    } else {
        writeln!(stdout, "{}", rendered)
    };
    result
        .and_then(|()| stdout.flush())
        .map_err(|e| TestlinkError::internal(e.to_string()))?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    mod cli_parsing {
        use super::*;

        #[test]
        fn validate_defaults() {
            let cli = Cli::try_parse_from(["testlink", "validate"]).unwrap();
            assert!(matches!(cli.command, Command::Validate));
            assert!(matches!(cli.global.format, OutputFormat::Text));
            assert!(matches!(cli.global.log_level, LogLevel::Warn));
            assert!(cli.global.root.is_none());
        }

        #[test]
        fn sync_flags() {
            let args = ["testlink", "sync", "--dry-run", "--prune", "--force"];
            let cli = Cli::try_parse_from(args).unwrap();
            match cli.command {
                Command::Sync {
                    dry_run,
                    prune,
                    force,
                } => {
                    assert!(dry_run);
                    assert!(prune);
                    assert!(force);
                }
                _ => panic!("expected Sync"),
            }
        }

        #[test]
        fn pair_with_placeholder() {
            let args = ["testlink", "pair", "--placeholder", "@@A"];
            let cli = Cli::try_parse_from(args).unwrap();
            match cli.command {
                Command::Pair {
                    dry_run,
                    placeholder,
                } => {
                    assert!(!dry_run);
                    assert_eq!(placeholder.as_deref(), Some("@@A"));
                }
                _ => panic!("expected Pair"),
            }
        }

        #[test]
        fn global_args_after_subcommand() {
            let args = [
                "testlink",
                "fix-refs",
                "--dry-run",
                "--root",
                "/tmp/project",
                "--format",
                "json",
                "--log-level",
                "debug",
            ];
            let cli = Cli::try_parse_from(args).unwrap();
            assert!(matches!(cli.command, Command::FixRefs { dry_run: true }));
            assert_eq!(cli.global.root, Some(PathBuf::from("/tmp/project")));
            assert!(matches!(cli.global.format, OutputFormat::Json));
            assert!(matches!(cli.global.log_level, LogLevel::Debug));
        }

        #[test]
        fn unknown_format_is_rejected() {
            assert!(Cli::try_parse_from(["testlink", "validate", "--format", "xml"]).is_err());
        }
    }
}
