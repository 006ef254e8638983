//! CLI front door.
//!
//! Provides the command implementations behind the `testlink` binary:
//! - `validate` - Check links, forward relations, placeholders and `@see` names
//! - `sync` - Add missing links and forward relations, optionally prune stale ones
//! - `pair` - Resolve `@A` / `@@A` placeholder markers into real links
//! - `fix-refs` - Qualify short `@see` targets
//!
//! Each runner takes an open [`Orchestrator`] and returns the rendered
//! output, JSON envelope or text summary, so the caller only prints it.
//!
//! ## Error Handling
//!
//! All functions return `Result<T, TestlinkError>`. Per-file write failures
//! are not errors here: they are collected in the report and rendered with
//! it.

use std::path::Path;

use clap::ValueEnum;
use serde::Serialize;

use testlink_core::error::TestlinkError;
use testlink_core::output::{
    fix_refs_summary, pair_summary, sync_summary, validate_summary, FixRefsResponse,
    PairResponse, SyncResponse, ValidateResponse,
};
use testlink_core::sync::{Orchestrator, SyncOptions};

/// Output format shared by every command.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text summary (default).
    #[default]
    Text,
    /// Full JSON response.
    Json,
}

/// Rendered output of a validate run.
#[derive(Debug, Clone)]
pub struct ValidateOutput {
    pub rendered: String,
    pub valid: bool,
}

/// Load configuration and sources under `root`.
///
/// A `root` that exists but is not a directory is an argument error; a
/// missing one is reported by the tree loader.
pub fn open(root: &Path, config: Option<&Path>) -> Result<Orchestrator, TestlinkError> {
    if root.exists() && !root.is_dir() {
        return Err(TestlinkError::invalid_args(format!(
            "--root {} is not a directory",
            root.display()
        )));
    }
    let orchestrator = Orchestrator::open(root, config)?;
    tracing::debug!(
        root = %root.display(),
        files = orchestrator.tree().len(),
        "opened source tree"
    );
    Ok(orchestrator)
}

/// Run `validate`.
pub fn run_validate(
    orchestrator: &Orchestrator,
    format: OutputFormat,
) -> Result<ValidateOutput, TestlinkError> {
    let report = orchestrator.validate();
    let valid = report.is_valid();
    let rendered = match format {
        OutputFormat::Json => to_json(&ValidateResponse::new(report))?,
        OutputFormat::Text => validate_summary(&report),
    };
    Ok(ValidateOutput { rendered, valid })
}

/// Run `sync`.
///
/// Prune without `force` is rejected before the tree is scanned.
pub fn run_sync(
    orchestrator: &mut Orchestrator,
    options: &SyncOptions,
    format: OutputFormat,
) -> Result<String, TestlinkError> {
    let result = orchestrator.sync(options)?;
    match format {
        OutputFormat::Json => to_json(&SyncResponse::new(result)),
        OutputFormat::Text => Ok(sync_summary(&result)),
    }
}

/// Run `pair`, for every placeholder or only `placeholder`.
pub fn run_pair(
    orchestrator: &mut Orchestrator,
    placeholder: Option<&str>,
    dry_run: bool,
    format: OutputFormat,
) -> Result<String, TestlinkError> {
    let report = orchestrator.pair(placeholder, dry_run)?;
    match format {
        OutputFormat::Json => to_json(&PairResponse::new(report)),
        OutputFormat::Text => Ok(pair_summary(&report)),
    }
}

/// Run `fix-refs`.
pub fn run_fix_refs(
    orchestrator: &mut Orchestrator,
    dry_run: bool,
    format: OutputFormat,
) -> Result<String, TestlinkError> {
    let report = orchestrator.fix_refs(dry_run);
    match format {
        OutputFormat::Json => to_json(&FixRefsResponse::new(report)),
        OutputFormat::Text => Ok(fix_refs_summary(&report)),
    }
}

fn to_json<T: Serialize>(response: &T) -> Result<String, TestlinkError> {
    serde_json::to_string_pretty(response)
        .map_err(|e| TestlinkError::internal(format!("JSON serialization error: {}", e)))
}

// ============================================================================
// Tests
// ============================================================================
