//! Short-name to fully-qualified-name resolution for `@see` targets.
//!
//! A reference written without a leading `\` is resolved in the context of
//! the file it appears in: first through the file's `use` imports, then
//! relative to the file's namespace, then in the global namespace. The last
//! two only succeed for types the scan actually loaded.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;

use crate::docblock::find_member_line;
use crate::model::{normalize_reference, CrossRefEntry, NameResolutionIssue};
use crate::scan::Catalog;
use crate::text::{EditOutcome, TextLines};
use crate::workspace::SourceTree;

static NAMESPACE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*namespace\s+([A-Za-z_][A-Za-z0-9_\\]*)\s*[;{]")
        .expect("namespace regex is valid")
});

static USE_STATEMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*use\s+([^;]+);").expect("use regex is valid"));

static TYPE_DECLARATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:(?:abstract|final|readonly)\s+)*(?:class|interface|trait|enum)\s+[A-Za-z_]")
        .expect("type declaration regex is valid")
});

// ============================================================================
// Import Tables
// ============================================================================

/// Namespace and `use` imports of one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportTable {
    /// Declared namespace, without leading `\`.
    pub namespace: Option<String>,
    /// Alias (last segment or `as` name) to fully-qualified name.
    pub imports: BTreeMap<String, String>,
}

impl ImportTable {
    /// Read the namespace and class imports from file text.
    ///
    /// Reading stops at the first type declaration so that trait `use`
    /// statements inside class bodies are not mistaken for imports.
    pub fn parse(text: &str) -> Self {
        let mut table = ImportTable::default();
        for line in text.lines() {
            if TYPE_DECLARATION.is_match(line) {
                break;
            }
            if table.namespace.is_none() {
                if let Some(caps) = NAMESPACE.captures(line) {
                    table.namespace = Some(caps[1].to_string());
                    continue;
                }
            }
            if let Some(caps) = USE_STATEMENT.captures(line) {
                table.parse_use(caps[1].trim());
            }
        }
        table
    }

    fn parse_use(&mut self, clause: &str) {
        if clause.starts_with("function ") || clause.starts_with("const ") {
            return;
        }
        for item in split_top_level(clause) {
            match item.split_once('{') {
                Some((prefix, rest)) => {
                    let prefix = normalize_reference(prefix).trim_end_matches('\\');
                    let inner = rest.trim_end().trim_end_matches('}');
                    for member in inner.split(',') {
                        let member = member.trim();
                        if member.is_empty()
                            || member.starts_with("function ")
                            || member.starts_with("const ")
                        {
                            continue;
                        }
                        self.add_import(&format!("{prefix}\\{member}"));
                    }
                }
                None => self.add_import(item),
            }
        }
    }

    fn add_import(&mut self, item: &str) {
        let item = item.trim();
        let (name, alias) = match item.split_once(" as ") {
            Some((name, alias)) => (name.trim(), alias.trim().to_string()),
            None => {
                let alias = item.rsplit('\\').next().unwrap_or(item).to_string();
                (item, alias)
            }
        };
        let name = normalize_reference(name);
        if !name.is_empty() && !alias.is_empty() {
            self.imports.insert(alias, name.to_string());
        }
    }

    /// Qualify `name` through the imports, matching on its first segment.
    pub fn qualify(&self, name: &str) -> Option<String> {
        let (first, rest) = match name.split_once('\\') {
            Some((first, rest)) => (first, Some(rest)),
            None => (name, None),
        };
        let base = self.imports.get(first)?;
        Some(match rest {
            Some(rest) => format!("{base}\\{rest}"),
            None => base.clone(),
        })
    }
}

/// Split a `use` clause on commas outside `{}` groups.
fn split_top_level(clause: &str) -> Vec<&str> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (idx, c) in clause.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                items.push(clause[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    items.push(clause[start..].trim());
    items.retain(|s| !s.is_empty());
    items
}

// ============================================================================
// NameResolver
// ============================================================================

/// Resolves short references against imports and the set of loaded types.
#[derive(Debug, Default)]
pub struct NameResolver {
    loaded_types: HashSet<String>,
    cache: HashMap<String, ImportTable>,
}

impl NameResolver {
    /// Create a resolver that knows `loaded_types` (fully qualified, no
    /// leading `\`).
    pub fn new(loaded_types: impl IntoIterator<Item = String>) -> Self {
        NameResolver {
            loaded_types: loaded_types.into_iter().collect(),
            cache: HashMap::new(),
        }
    }

    /// Create a resolver for the types a scan discovered.
    pub fn for_catalog(catalog: &Catalog) -> Self {
        Self::new(catalog.type_names().map(str::to_string))
    }

    /// Import table of `file`, parsed once per path.
    pub fn imports(&mut self, file: &str, text: &str) -> &ImportTable {
        self.cache
            .entry(file.to_string())
            .or_insert_with(|| ImportTable::parse(text))
    }

    fn is_loaded(&self, type_name: &str) -> bool {
        self.loaded_types.contains(type_name)
    }

    /// Resolve `reference` (a type or `Type::member`) as seen from `file`.
    ///
    /// Returns the fully-qualified form with a leading `\`, or an error
    /// message naming the short token that could not be resolved.
    pub fn resolve(&mut self, file: &str, text: &str, reference: &str) -> Result<String, String> {
        let reference = reference.trim();
        if reference.starts_with('\\') {
            return Ok(reference.to_string());
        }
        let (type_part, member) = match reference.split_once("::") {
            Some((t, m)) => (t, Some(m)),
            None => (reference, None),
        };

        let table = self.imports(file, text).clone();
        let qualified = table
            .qualify(type_part)
            .or_else(|| {
                let candidate = match &table.namespace {
                    Some(ns) => format!("{ns}\\{type_part}"),
                    None => type_part.to_string(),
                };
                self.is_loaded(&candidate).then_some(candidate)
            })
            .or_else(|| {
                self.is_loaded(type_part)
                    .then(|| type_part.to_string())
            });

        match qualified {
            Some(type_name) => Ok(match member {
                Some(member) => format!("\\{type_name}::{member}"),
                None => format!("\\{type_name}"),
            }),
            None => {
                let token = type_part.split('\\').next().unwrap_or(type_part);
                Err(format!(
                    "cannot resolve '{token}' in '{reference}': not imported and no loaded type matches"
                ))
            }
        }
    }

    /// Build the issue for one cross-reference, or `None` when it is already
    /// fully qualified.
    pub fn issue_for(&mut self, entry: &CrossRefEntry, text: &str) -> Option<NameResolutionIssue> {
        if entry.is_fully_qualified() {
            return None;
        }
        let (resolved, message) = match self.resolve(&entry.file, text, &entry.target) {
            Ok(resolved) => (Some(resolved), None),
            Err(message) => (None, Some(message)),
        };
        Some(NameResolutionIssue {
            original: entry.target.clone(),
            fixable: resolved.is_some(),
            resolved,
            message,
            file: entry.file.clone(),
            line: entry.line,
            owner: entry.owner.clone(),
        })
    }

    /// Issues for every cross-reference in the catalog not written fully
    /// qualified.
    pub fn check(&mut self, catalog: &Catalog, tree: &SourceTree) -> Vec<NameResolutionIssue> {
        let mut issues = Vec::new();
        for entry in &catalog.cross_refs {
            let Some(text) = tree.text(&entry.file) else {
                continue;
            };
            if let Some(issue) = self.issue_for(entry, text) {
                if !issue.fixable {
                    tracing::warn!(
                        file = %issue.file,
                        line = issue.line,
                        reference = %issue.original,
                        "unresolvable cross-reference"
                    );
                }
                issues.push(issue);
            }
        }
        issues
    }
}

// ============================================================================
// Fixing
// ============================================================================

/// Rewrite `@see <original>` above `member` to `@see <resolved>`.
///
/// Only the `window` lines directly above the member are searched, and only
/// the token after `@see` is replaced; any trailing description is kept.
pub fn qualify_cross_ref(
    text: &str,
    member: &str,
    original: &str,
    resolved: &str,
    window: usize,
) -> EditOutcome {
    let lines = TextLines::parse(text);
    match find_member_line(&lines.lines, member) {
        Some(member_line) => replace_see_token(text, original, resolved, member_line, window),
        None => EditOutcome::unchanged(text),
    }
}

fn replace_see_token(
    text: &str,
    original: &str,
    resolved: &str,
    member_line: usize,
    window: usize,
) -> EditOutcome {
    let pattern = format!(r"@see\s+({})(?:\s|\*|$)", regex::escape(original));
    let Ok(re) = Regex::new(&pattern) else {
        return EditOutcome::unchanged(text);
    };

    let mut doc = TextLines::parse(text);
    let lowest = member_line.saturating_sub(window);
    for idx in (lowest..member_line.min(doc.len())).rev() {
        let line = &doc.lines[idx];
        let Some(token) = re.captures(line).and_then(|caps| caps.get(1)) else {
            continue;
        };
        let mut updated = String::with_capacity(line.len() + resolved.len());
        updated.push_str(&line[..token.start()]);
        updated.push_str(resolved);
        updated.push_str(&line[token.end()..]);
        doc.lines[idx] = updated;
        return EditOutcome::compare(text, doc.render());
    }
    EditOutcome::unchanged(text)
}

// ============================================================================
// Tests
// ============================================================================
