//! Placeholder resolution.
//!
//! A placeholder is a topic marker (`'@A'`) written where a link target is
//! not known yet. Every production member and every test tagged with the same
//! id are considered mutually tested, so an id with P production entries and
//! T test entries resolves to exactly P×T actions.
//!
//! The doubled-sigil form (`'@@A'`) asks for `@see` cross-reference comments
//! instead of native link syntax. Only the annotation dialect has doc
//! comments to carry them, so `@@` ids with a chaining test fail.
//!
//! Failures are scoped to one id: an orphaned or invalid id produces an
//! error and zero actions, and every other id still resolves.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::TestlinkError;
use crate::model::{Dialect, PlaceholderEntry, PlaceholderRole};

static GRAMMAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@@?[A-Za-z][A-Za-z0-9_-]*$").expect("placeholder grammar is a valid regex")
});

// ============================================================================
// Placeholder Ids
// ============================================================================

/// A validated placeholder id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlaceholderId(String);

impl PlaceholderId {
    /// Parse an id, returning `None` when it does not match the grammar.
    pub fn parse(raw: &str) -> Option<Self> {
        GRAMMAR.is_match(raw).then(|| PlaceholderId(raw.to_string()))
    }

    /// Parse an id supplied by a caller, explaining what is wrong with it.
    pub fn parse_strict(raw: &str) -> Result<Self, TestlinkError> {
        if let Some(id) = Self::parse(raw) {
            return Ok(id);
        }
        let reason = if !raw.starts_with('@') {
            "must start with '@' or '@@'"
        } else if raw.starts_with("@@@") {
            "at most two '@' sigils are allowed"
        } else if !raw
            .trim_start_matches('@')
            .starts_with(|c: char| c.is_ascii_alphabetic())
        {
            "the name must start with a letter"
        } else {
            "only letters, digits, '-' and '_' may follow the first letter"
        };
        Err(TestlinkError::invalid_placeholder(raw, reason))
    }

    /// Whether `raw` is a placeholder id.
    pub fn is_placeholder(raw: &str) -> bool {
        GRAMMAR.is_match(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the doubled-sigil form.
    pub fn see_tag_mode(&self) -> bool {
        self.0.starts_with("@@")
    }
}

impl fmt::Display for PlaceholderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Results
// ============================================================================

/// Why an id failed to resolve, or why an entry was flagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceholderIssueKind {
    NoProductionEntries,
    NoTestEntries,
    DialectMismatch,
    DuplicateEntry,
}

/// An error or warning scoped to one placeholder id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaceholderIssue {
    pub id: String,
    pub kind: PlaceholderIssueKind,
    pub message: String,
}

impl fmt::Display for PlaceholderIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// One production × test pairing produced by resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaceholderAction {
    pub id: String,
    pub production: PlaceholderEntry,
    pub test: PlaceholderEntry,
    pub production_class: String,
    pub production_member: String,
    pub test_class: String,
    pub test_member: String,
    /// Production side gets a `@see` comment instead of `#[TestedBy]`.
    pub production_uses_see: bool,
    /// Test side gets a `@see` comment instead of a link declaration.
    pub test_uses_see: bool,
    pub dialect: Dialect,
    pub with_coverage: bool,
}

impl PlaceholderAction {
    fn new(id: &str, production: &PlaceholderEntry, test: &PlaceholderEntry) -> Self {
        PlaceholderAction {
            id: id.to_string(),
            production_class: production.owner.type_name().to_string(),
            production_member: production.owner.member().to_string(),
            test_class: test.owner.type_name().to_string(),
            test_member: test.owner.member().to_string(),
            production_uses_see: production.see_tag_mode,
            test_uses_see: test.see_tag_mode,
            dialect: test.dialect.unwrap_or(Dialect::Annotation),
            with_coverage: test.with_coverage,
            production: production.clone(),
            test: test.clone(),
        }
    }
}

/// Output of placeholder resolution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlaceholderResult {
    pub actions: Vec<PlaceholderAction>,
    pub errors: Vec<PlaceholderIssue>,
    pub warnings: Vec<PlaceholderIssue>,
}

impl PlaceholderResult {
    /// One line per resolved id: `@A: 2 production × 3 tests = 6 links`.
    pub fn summary(&self) -> Vec<String> {
        let mut by_id: BTreeMap<&str, (BTreeSet<(&str, u32)>, BTreeSet<(&str, u32)>, usize)> =
            BTreeMap::new();
        for action in &self.actions {
            let entry = by_id.entry(&action.id).or_default();
            entry
                .0
                .insert((action.production.file.as_str(), action.production.line));
            entry
                .1
                .insert((action.test.file.as_str(), action.test.line));
            entry.2 += 1;
        }
        by_id
            .into_iter()
            .map(|(id, (productions, tests, links))| {
                format!(
                    "{id}: {} production × {} {} = {links} {}",
                    productions.len(),
                    tests.len(),
                    if tests.len() == 1 { "test" } else { "tests" },
                    if links == 1 { "link" } else { "links" },
                )
            })
            .collect()
    }
}

// ============================================================================
// PlaceholderRegistry
// ============================================================================

/// Placeholder entries grouped by id.
#[derive(Debug, Clone, Default)]
pub struct PlaceholderRegistry {
    groups: BTreeMap<String, Vec<PlaceholderEntry>>,
    warnings: Vec<PlaceholderIssue>,
}

impl PlaceholderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from scanned entries.
    pub fn from_entries(entries: impl IntoIterator<Item = PlaceholderEntry>) -> Self {
        let mut registry = Self::new();
        for entry in entries {
            registry.register(entry);
        }
        registry
    }

    /// Add an entry. Entries whose id is not a placeholder are ignored; an
    /// identical entry seen twice is kept once and reported as a warning.
    pub fn register(&mut self, entry: PlaceholderEntry) {
        if !PlaceholderId::is_placeholder(&entry.id) {
            return;
        }
        let group = self.groups.entry(entry.id.clone()).or_default();
        let duplicate = group.iter().any(|e| {
            e.role == entry.role && e.owner == entry.owner && e.file == entry.file && e.line == entry.line
        });
        if duplicate {
            self.warnings.push(PlaceholderIssue {
                id: entry.id.clone(),
                kind: PlaceholderIssueKind::DuplicateEntry,
                message: format!(
                    "Placeholder '{}' is declared twice on {} ({}:{}); counted once",
                    entry.id, entry.owner, entry.file, entry.line
                ),
            });
            return;
        }
        group.push(entry);
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    /// Entries for one id.
    pub fn entries(&self, id: &str) -> &[PlaceholderEntry] {
        self.groups.get(id).map_or(&[], Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Resolve every registered id.
    pub fn resolve_all(&self) -> PlaceholderResult {
        let mut result = PlaceholderResult {
            warnings: self.warnings.clone(),
            ..Default::default()
        };
        for (id, entries) in &self.groups {
            resolve_group(id, entries, &mut result);
        }
        tracing::debug!(
            ids = self.groups.len(),
            actions = result.actions.len(),
            errors = result.errors.len(),
            "resolved placeholders"
        );
        result
    }

    /// Resolve a single id supplied by the caller.
    ///
    /// The id grammar is checked before the lookup; an id no source declares
    /// is a `PlaceholderNotFound` error.
    pub fn resolve_one(&self, raw: &str) -> Result<PlaceholderResult, TestlinkError> {
        let id = PlaceholderId::parse_strict(raw)?;
        let entries = self
            .groups
            .get(id.as_str())
            .ok_or_else(|| TestlinkError::PlaceholderNotFound {
                id: id.to_string(),
            })?;
        let mut result = PlaceholderResult {
            warnings: self
                .warnings
                .iter()
                .filter(|w| w.id == id.as_str())
                .cloned()
                .collect(),
            ..Default::default()
        };
        resolve_group(id.as_str(), entries, &mut result);
        Ok(result)
    }
}

fn resolve_group(id: &str, entries: &[PlaceholderEntry], result: &mut PlaceholderResult) {
    let mut productions: Vec<&PlaceholderEntry> = entries
        .iter()
        .filter(|e| e.role == PlaceholderRole::Production)
        .collect();
    let mut tests: Vec<&PlaceholderEntry> = entries
        .iter()
        .filter(|e| e.role == PlaceholderRole::Test)
        .collect();
    productions.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    tests.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

    if productions.is_empty() {
        result.errors.push(PlaceholderIssue {
            id: id.to_string(),
            kind: PlaceholderIssueKind::NoProductionEntries,
            message: format!(
                "Placeholder '{id}': no matching production entries ({} test {})",
                tests.len(),
                if tests.len() == 1 { "entry" } else { "entries" }
            ),
        });
        return;
    }
    if tests.is_empty() {
        result.errors.push(PlaceholderIssue {
            id: id.to_string(),
            kind: PlaceholderIssueKind::NoTestEntries,
            message: format!(
                "Placeholder '{id}': no matching test entries ({} production {})",
                productions.len(),
                if productions.len() == 1 { "entry" } else { "entries" }
            ),
        });
        return;
    }

    let see_tag_mode = entries.iter().any(|e| e.see_tag_mode);
    if see_tag_mode {
        let chaining = tests
            .iter()
            .filter(|t| t.dialect == Some(Dialect::Chaining))
            .count();
        if chaining > 0 {
            let single = format!("@{}", id.trim_start_matches('@'));
            result.errors.push(PlaceholderIssue {
                id: id.to_string(),
                kind: PlaceholderIssueKind::DialectMismatch,
                message: format!(
                    "Placeholder '{id}': the chaining dialect does not support @see cross-reference generation \
                     ({chaining} chaining test {}); use '{single}' instead",
                    if chaining == 1 { "entry" } else { "entries" }
                ),
            });
            return;
        }
    }

    for production in &productions {
        for test in &tests {
            result
                .actions
                .push(PlaceholderAction::new(id, production, test));
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
