//! JSON output types and text summaries for CLI responses.
//!
//! Every JSON response is an envelope with `status` first and a
//! `schema_version`, followed by the report of the command that produced
//! it. Errors use [`ErrorResponse`] with the stable code from
//! [`OutputErrorCode`].
//!
//! ## Design Principles
//!
//! 1. **Status first:** every response starts with `status` (`ok` or `error`)
//! 2. **Deterministic:** file lists and findings are sorted, so the same tree
//!    yields the same output
//! 3. **Versioned:** `schema_version` changes only on breaking changes

use std::fmt::Write as _;
use std::io::{self, Write};

use serde::Serialize;

use crate::error::{OutputErrorCode, TestlinkError};
use crate::sync::{FixReport, PairReport, SyncResult, ValidateReport};

/// Current schema version for all responses.
pub const SCHEMA_VERSION: &str = "1";

// ============================================================================
// Errors
// ============================================================================

/// Error information for JSON output.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorInfo {
    /// Numeric error code (also the process exit code).
    pub code: u8,
    /// Human-readable message.
    pub message: String,
    /// Error-specific structured data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorInfo {
    /// Create from a TestlinkError.
    pub fn from_error(err: &TestlinkError) -> Self {
        let details = match err {
            TestlinkError::InvalidPlaceholder { id, reason } => {
                Some(serde_json::json!({ "id": id, "reason": reason }))
            }
            TestlinkError::PlaceholderNotFound { id } => Some(serde_json::json!({ "id": id })),
            TestlinkError::FileNotFound { path }
            | TestlinkError::Config { path, .. }
            | TestlinkError::Io { path, .. } => Some(serde_json::json!({ "path": path })),
            TestlinkError::ApplyError {
                file: Some(file), ..
            } => Some(serde_json::json!({ "file": file })),
            _ => None,
        };
        ErrorInfo {
            code: OutputErrorCode::from(err).code(),
            message: err.to_string(),
            details,
        }
    }
}

/// Error response envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Status: "error".
    pub status: String,
    /// Schema version for compatibility.
    pub schema_version: String,
    /// Error information.
    pub error: ErrorInfo,
}

impl ErrorResponse {
    /// Create an error response from a TestlinkError.
    pub fn from_error(err: &TestlinkError) -> Self {
        ErrorResponse {
            status: "error".to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            error: ErrorInfo::from_error(err),
        }
    }
}

// ============================================================================
// Response Structs
// ============================================================================

/// Response for the validate command.
#[derive(Debug, Clone, Serialize)]
pub struct ValidateResponse {
    /// Status: "ok".
    pub status: String,
    /// Schema version for compatibility.
    pub schema_version: String,
    /// True when links and forward relations agree and placeholders resolve.
    pub valid: bool,
    #[serde(flatten)]
    pub report: ValidateReport,
}

impl ValidateResponse {
    pub fn new(report: ValidateReport) -> Self {
        ValidateResponse {
            status: "ok".to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            valid: report.is_valid(),
            report,
        }
    }
}

/// Response for the sync command.
#[derive(Debug, Clone, Serialize)]
pub struct SyncResponse {
    /// Status: "ok".
    pub status: String,
    /// Schema version for compatibility.
    pub schema_version: String,
    #[serde(flatten)]
    pub result: SyncResult,
}

impl SyncResponse {
    pub fn new(result: SyncResult) -> Self {
        SyncResponse {
            status: "ok".to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            result,
        }
    }
}

/// Response for the pair command.
#[derive(Debug, Clone, Serialize)]
pub struct PairResponse {
    /// Status: "ok".
    pub status: String,
    /// Schema version for compatibility.
    pub schema_version: String,
    #[serde(flatten)]
    pub report: PairReport,
}

impl PairResponse {
    pub fn new(report: PairReport) -> Self {
        PairResponse {
            status: "ok".to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            report,
        }
    }
}

/// Response for the fix-refs command.
#[derive(Debug, Clone, Serialize)]
pub struct FixRefsResponse {
    /// Status: "ok".
    pub status: String,
    /// Schema version for compatibility.
    pub schema_version: String,
    #[serde(flatten)]
    pub report: FixReport,
}

impl FixRefsResponse {
    pub fn new(report: FixReport) -> Self {
        FixRefsResponse {
            status: "ok".to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            report,
        }
    }
}

/// Write a response as pretty-printed JSON followed by a newline.
pub fn emit_response<T: Serialize>(response: &T, writer: &mut impl Write) -> io::Result<()> {
    let json = serde_json::to_string_pretty(response)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writeln!(writer, "{}", json)
}

// ============================================================================
// Text Summaries
// ============================================================================

fn push_list(out: &mut String, heading: &str, items: impl IntoIterator<Item = String>) {
    let items: Vec<String> = items.into_iter().collect();
    if items.is_empty() {
        return;
    }
    let _ = writeln!(out, "  {heading}:");
    for item in items {
        let _ = writeln!(out, "    - {item}");
    }
}

fn files_line(out: &mut String, dry_run: bool, files: &[String]) {
    if dry_run {
        let _ = writeln!(out, "Dry run: {} file(s) would be modified", files.len());
    } else {
        let _ = writeln!(out, "{} file(s) modified", files.len());
    }
    for file in files {
        let _ = writeln!(out, "  {file}");
    }
}

/// Human-readable summary of a validation run.
pub fn validate_summary(report: &ValidateReport) -> String {
    let mut out = String::new();
    let v = &report.validation;
    let _ = writeln!(
        out,
        "{} link(s): {}",
        v.total_links,
        if report.is_valid() { "valid" } else { "INVALID" }
    );
    push_list(
        &mut out,
        "Missing forward relations",
        v.missing_forward_relation
            .iter()
            .map(|p| format!("{} -> {}", p.test, p.method)),
    );
    push_list(
        &mut out,
        "Orphan forward relations",
        v.orphan_forward_relation
            .iter()
            .map(|p| format!("{} <- {}", p.test, p.method)),
    );
    push_list(
        &mut out,
        "Duplicates",
        v.duplicates
            .iter()
            .map(|p| format!("{} -> {}", p.test, p.method)),
    );
    push_list(
        &mut out,
        "Placeholder errors",
        report.placeholder_errors.iter().map(|e| e.message.clone()),
    );
    push_list(
        &mut out,
        "Unqualified @see references",
        report.name_issues.iter().map(|i| match &i.resolved {
            Some(resolved) => format!("{}:{}: {} -> {}", i.file, i.line, i.original, resolved),
            None => format!(
                "{}:{}: {} ({})",
                i.file,
                i.line,
                i.original,
                i.message.as_deref().unwrap_or("unresolvable")
            ),
        }),
    );
    push_list(&mut out, "Warnings", report.warnings.iter().cloned());
    out
}

/// Human-readable summary of a sync run.
pub fn sync_summary(result: &SyncResult) -> String {
    let mut out = String::new();
    files_line(&mut out, result.dry_run, &result.modified_files);
    let _ = writeln!(
        out,
        "  {} test link(s), {} forward relation(s), {} @see added, {} @see removed",
        result.forward_actions,
        result.reverse_actions,
        result.cross_ref_additions,
        result.cross_ref_removals
    );
    push_list(&mut out, "Pruned", result.pruned_files.iter().cloned());
    push_list(&mut out, "Warnings", result.warnings.iter().cloned());
    push_list(&mut out, "Errors", result.errors.iter().cloned());
    out
}

/// Human-readable summary of placeholder pairing.
pub fn pair_summary(report: &PairReport) -> String {
    let mut out = String::new();
    for line in &report.summary {
        let _ = writeln!(out, "{line}");
    }
    files_line(&mut out, report.dry_run, &report.modified_files);
    push_list(
        &mut out,
        "Placeholder errors",
        report.result.errors.iter().map(|e| e.message.clone()),
    );
    push_list(
        &mut out,
        "Warnings",
        report
            .result
            .warnings
            .iter()
            .map(|w| w.message.clone())
            .chain(report.warnings.iter().cloned()),
    );
    push_list(&mut out, "Errors", report.errors.iter().cloned());
    out
}

/// Human-readable summary of a fix-refs run.
pub fn fix_refs_summary(report: &FixReport) -> String {
    let mut out = String::new();
    files_line(&mut out, report.dry_run, &report.modified_files);
    let _ = writeln!(
        out,
        "  {} reference(s) qualified, {} unresolvable",
        report.fixed, report.unfixable
    );
    push_list(
        &mut out,
        "Unresolvable",
        report.issues.iter().filter(|i| !i.fixable).map(|i| {
            format!(
                "{}:{}: {} ({})",
                i.file,
                i.line,
                i.original,
                i.message.as_deref().unwrap_or("unresolvable")
            )
        }),
    );
    push_list(&mut out, "Errors", report.errors.iter().cloned());
    out
}

// ============================================================================
// Tests
// ============================================================================
