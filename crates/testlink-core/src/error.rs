//! Error types and exit codes for testlink.
//!
//! `TestlinkError` is the single error type returned across the crate
//! boundary. Subsystem errors (`PatchError`, I/O) are bridged into it with
//! `From` impls so callers can use `?` throughout.
//!
//! ## Exit Codes
//!
//! - `2`: Invalid arguments (bad flags, malformed placeholder filter)
//! - `3`: Resolution errors (placeholder or file not found)
//! - `4`: Apply errors (edit could not be applied or written)
//! - `10`: Internal errors (bugs, unexpected state)

use std::fmt;
use std::io;

use thiserror::Error;

use crate::patch::PatchError;

// ============================================================================
// Output Error Codes
// ============================================================================

/// Stable error codes for JSON output and process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OutputErrorCode {
    /// Invalid arguments from caller.
    InvalidArguments = 2,
    /// Something the caller named could not be found.
    ResolutionError = 3,
    /// Edits could not be applied or written.
    ApplyError = 4,
    /// Bugs and unexpected state.
    InternalError = 10,
}

impl OutputErrorCode {
    /// Get the numeric code value.
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for OutputErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ============================================================================
// Unified Error Type
// ============================================================================

/// Unified error type for testlink operations.
#[derive(Debug, Error)]
pub enum TestlinkError {
    /// Invalid arguments from caller.
    #[error("invalid arguments: {message}")]
    InvalidArguments { message: String },

    /// Prune was requested without the confirmation flag.
    #[error("prune removes links and cross-references; re-run with --force to confirm")]
    PruneNotConfirmed,

    /// A placeholder id supplied by the caller does not match the grammar.
    #[error("invalid placeholder '{id}': {reason}")]
    InvalidPlaceholder { id: String, reason: String },

    /// A well-formed placeholder id that no source file declares.
    #[error("placeholder '{id}' not found")]
    PlaceholderNotFound { id: String },

    /// File or directory not found.
    #[error("file not found: {path}")]
    FileNotFound { path: String },

    /// Configuration file could not be read or parsed.
    #[error("configuration error in {path}: {message}")]
    Config { path: String, message: String },

    /// Failed to apply edits.
    #[error("apply error: {message}")]
    ApplyError {
        message: String,
        file: Option<String>,
    },

    /// I/O failure on a specific path.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Internal error (bug or unexpected state).
    #[error("internal error: {message}")]
    InternalError { message: String },
}

// ============================================================================
// Error Code Mapping
// ============================================================================

impl From<&TestlinkError> for OutputErrorCode {
    fn from(err: &TestlinkError) -> Self {
        match err {
            TestlinkError::InvalidArguments { .. } => OutputErrorCode::InvalidArguments,
            TestlinkError::PruneNotConfirmed => OutputErrorCode::InvalidArguments,
            TestlinkError::InvalidPlaceholder { .. } => OutputErrorCode::InvalidArguments,
            TestlinkError::Config { .. } => OutputErrorCode::InvalidArguments,
            TestlinkError::PlaceholderNotFound { .. } => OutputErrorCode::ResolutionError,
            TestlinkError::FileNotFound { .. } => OutputErrorCode::ResolutionError,
            TestlinkError::ApplyError { .. } => OutputErrorCode::ApplyError,
            TestlinkError::Io { .. } => OutputErrorCode::ApplyError,
            TestlinkError::InternalError { .. } => OutputErrorCode::InternalError,
        }
    }
}

impl From<TestlinkError> for OutputErrorCode {
    fn from(err: TestlinkError) -> Self {
        OutputErrorCode::from(&err)
    }
}

// ============================================================================
// Bridge: PatchError -> TestlinkError
// ============================================================================

impl From<PatchError> for TestlinkError {
    fn from(err: PatchError) -> Self {
        let file = Some(err.path().to_string());
        TestlinkError::ApplyError {
            message: err.to_string(),
            file,
        }
    }
}

// ============================================================================
// Convenience Constructors
// ============================================================================

impl TestlinkError {
    /// Create an invalid arguments error.
    pub fn invalid_args(message: impl Into<String>) -> Self {
        TestlinkError::InvalidArguments {
            message: message.into(),
        }
    }

    /// Create an invalid placeholder error.
    pub fn invalid_placeholder(id: impl Into<String>, reason: impl Into<String>) -> Self {
        TestlinkError::InvalidPlaceholder {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Create a file not found error.
    pub fn file_not_found(path: impl Into<String>) -> Self {
        TestlinkError::FileNotFound { path: path.into() }
    }

    /// Wrap an I/O error with the path it occurred on.
    pub fn io(path: impl Into<String>, source: io::Error) -> Self {
        TestlinkError::Io {
            path: path.into(),
            source,
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        TestlinkError::InternalError {
            message: message.into(),
        }
    }

    /// Get the error code for this error.
    pub fn error_code(&self) -> OutputErrorCode {
        OutputErrorCode::from(self)
    }
}

// ============================================================================
// Tests
// ============================================================================
