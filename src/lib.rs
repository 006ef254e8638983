//! testlink - keep tests and production code pointing at each other.
//!
//! This crate provides the CLI binary for testlink. The engine lives in
//! `testlink-core`.
//!
//! ## Modules
//!
//! - `cli` - CLI command implementations

pub mod cli;

// Re-export core types for convenience
pub use testlink_core::error::{OutputErrorCode, TestlinkError};
pub use testlink_core::output::{ErrorInfo, ErrorResponse, SCHEMA_VERSION};
pub use testlink_core::sync::{Orchestrator, SyncOptions};
