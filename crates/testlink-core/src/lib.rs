//! Core engine for testlink.
//!
//! This crate keeps tests and production code pointing at each other:
//! - Source tree loading and PHP-like source scanning
//! - Link registries and bidirectional validation
//! - Placeholder pairing (`@A` / `@@A` markers)
//! - Format-preserving edits of attributes, chained calls and `@see` tags
//! - Name resolution for short `@see` targets
//! - Sync planning and committing, with dry runs that match real runs
//! - Error types, error codes and JSON output types for CLI responses

pub mod config;
pub mod docblock;
pub mod error;
pub mod model;
pub mod output;
pub mod patch;
pub mod placeholder;
pub mod registry;
pub mod resolver;
pub mod rewrite;
pub mod scan;
pub mod sync;
pub mod text;
pub mod workspace;

pub use config::Config;
pub use error::{OutputErrorCode, TestlinkError};
pub use model::{Dialect, UnitId};
pub use scan::Catalog;
pub use sync::{
    FixReport, Orchestrator, PairReport, SyncOptions, SyncResult, ValidateReport,
};
pub use workspace::SourceTree;
