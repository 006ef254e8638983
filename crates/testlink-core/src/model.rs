//! Entity model: production units, test units, links, placeholders and
//! cross-references.
//!
//! Every record here is rebuilt from a full source scan on each invocation;
//! none of them is persisted. Identity of a unit is its [`UnitId`]
//! (`Type::member`, with the type written without a leading `\`).

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Identifiers
// ============================================================================

/// Strip the leading namespace separator from a type or reference.
pub fn normalize_reference(reference: &str) -> &str {
    reference.trim().trim_start_matches('\\')
}

/// Identity of a production or test unit: `Type::member`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(String);

impl UnitId {
    /// Build an id from a type name and member name.
    pub fn new(type_name: &str, member: &str) -> Self {
        UnitId(format!("{}::{}", normalize_reference(type_name), member))
    }

    /// Parse `Type::member` (leading `\` allowed).
    pub fn parse(reference: &str) -> Option<Self> {
        let (type_name, member) = normalize_reference(reference).split_once("::")?;
        if type_name.is_empty() || member.is_empty() {
            return None;
        }
        Some(UnitId::new(type_name, member))
    }

    /// The full `Type::member` string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The owning type.
    pub fn type_name(&self) -> &str {
        self.0.split_once("::").map_or(&self.0, |(t, _)| t)
    }

    /// The member name.
    pub fn member(&self) -> &str {
        self.0.split_once("::").map_or("", |(_, m)| m)
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Dialects and Test Declarations
// ============================================================================

/// Test-declaration dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Fluent chaining on a test closure: `test('x', fn)->linksAndCovers(...)`.
    Chaining,
    /// Attributes on test methods: `#[LinksAndCovers(...)]`.
    Annotation,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Chaining => write!(f, "chaining"),
            Dialect::Annotation => write!(f, "annotation"),
        }
    }
}

/// How a test is declared, per dialect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "dialect", rename_all = "lowercase")]
pub enum TestDeclaration {
    /// A method on a test class.
    Annotation { method: String },
    /// A `test()`/`it()` call, possibly nested in `describe()` groups.
    Chaining {
        function: String,
        description: String,
        groups: Vec<String>,
    },
}

impl TestDeclaration {
    /// The dialect of this declaration.
    pub fn dialect(&self) -> Dialect {
        match self {
            TestDeclaration::Annotation { .. } => Dialect::Annotation,
            TestDeclaration::Chaining { .. } => Dialect::Chaining,
        }
    }

    /// Member name used in identities: the method, or the `>`-joined path.
    pub fn display_name(&self) -> String {
        match self {
            TestDeclaration::Annotation { method } => method.clone(),
            TestDeclaration::Chaining {
                description,
                groups,
                ..
            } => groups
                .iter()
                .map(String::as_str)
                .chain(std::iter::once(description.as_str()))
                .collect::<Vec<_>>()
                .join(" > "),
        }
    }

    /// Identifier-safe member name used in `@see` targets.
    ///
    /// Chaining descriptions contain spaces; they are folded to `_` with
    /// nesting levels separated by `__`.
    pub fn reference_member(&self) -> String {
        match self {
            TestDeclaration::Annotation { method } => method.clone(),
            TestDeclaration::Chaining {
                description,
                groups,
                ..
            } => groups
                .iter()
                .chain(std::iter::once(description))
                .map(|part| slug(part))
                .collect::<Vec<_>>()
                .join("__"),
        }
    }
}

fn slug(part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    for c in part.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}

// ============================================================================
// Units
// ============================================================================

/// A forward relation: `#[TestedBy(...)]` on a production member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardRelation {
    pub test_type: String,
    pub test_member: String,
    /// 1-indexed line of the attribute.
    pub line: u32,
    /// Attribute text without indentation.
    pub raw: String,
}

impl ForwardRelation {
    /// Id of the test this relation names.
    pub fn test_id(&self) -> UnitId {
        UnitId::new(&self.test_type, &self.test_member)
    }
}

/// A production method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductionUnit {
    pub type_name: String,
    pub member: String,
    pub file: String,
    pub line: u32,
    pub forward_relations: Vec<ForwardRelation>,
}

impl ProductionUnit {
    pub fn id(&self) -> UnitId {
        UnitId::new(&self.type_name, &self.member)
    }

    /// `@see` target pointing at this unit.
    pub fn reference(&self) -> String {
        format!("\\{}::{}", self.type_name, self.member)
    }

    /// Whether a forward relation names `test`.
    pub fn has_forward_relation(&self, test: &UnitId) -> bool {
        self.forward_relations.iter().any(|fr| &fr.test_id() == test)
    }
}

/// Where a link declaration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkOrigin {
    /// `#[Links]` / `#[LinksAndCovers]` attribute.
    Attribute,
    /// `links()` / `linksAndCovers()` call (chained or in a test body).
    Call,
}

/// A link as declared in test source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredLink {
    pub target_type: String,
    pub target_member: String,
    pub with_coverage: bool,
    pub origin: LinkOrigin,
    /// 1-indexed line of the declaration.
    pub line: u32,
    /// Source text of the declaration (attribute line or call expression).
    pub raw: String,
}

impl DeclaredLink {
    pub fn target_id(&self) -> UnitId {
        UnitId::new(&self.target_type, &self.target_member)
    }
}

/// A test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestUnit {
    pub type_name: String,
    pub file: String,
    pub line: u32,
    pub declaration: TestDeclaration,
    pub links: Vec<DeclaredLink>,
}

impl TestUnit {
    pub fn id(&self) -> UnitId {
        UnitId::new(&self.type_name, &self.member())
    }

    pub fn member(&self) -> String {
        self.declaration.display_name()
    }

    pub fn dialect(&self) -> Dialect {
        self.declaration.dialect()
    }

    /// `@see` target pointing at this test.
    pub fn reference(&self) -> String {
        format!(
            "\\{}::{}",
            self.type_name,
            self.declaration.reference_member()
        )
    }

    /// Whether this test links to `method` by any origin.
    pub fn links_to(&self, method: &UnitId) -> bool {
        self.links.iter().any(|l| &l.target_id() == method)
    }
}

/// An edge in the link graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Link {
    pub test: UnitId,
    pub method: UnitId,
    pub with_coverage: bool,
}

// ============================================================================
// Placeholders
// ============================================================================

/// Which side a placeholder marker sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaceholderRole {
    Production,
    Test,
}

/// A placeholder marker found in source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceholderEntry {
    /// Full id including sigils (`@A`, `@@A`).
    pub id: String,
    pub role: PlaceholderRole,
    pub owner: UnitId,
    pub file: String,
    /// 1-indexed line of the marker.
    pub line: u32,
    /// Dialect of the owning test; `None` for production entries.
    pub dialect: Option<Dialect>,
    /// True for the doubled-sigil form.
    pub see_tag_mode: bool,
    /// Link kind requested by a test marker (`linksAndCovers` vs `links`).
    pub with_coverage: bool,
    /// Source text of the marker (attribute line or call expression).
    pub raw: String,
}

impl PlaceholderEntry {
    /// Ordering key: file, line, owner.
    pub fn sort_key(&self) -> (&str, u32, &UnitId) {
        (&self.file, self.line, &self.owner)
    }
}

// ============================================================================
// Cross-References
// ============================================================================

/// Which side a cross-reference comment sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrossRefContext {
    Production,
    Test,
}

/// A `@see` line in a member's doc comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossRefEntry {
    pub target: String,
    pub file: String,
    pub line: u32,
    pub context: CrossRefContext,
    pub owner: UnitId,
}

impl CrossRefEntry {
    /// Whether the target is written fully qualified.
    pub fn is_fully_qualified(&self) -> bool {
        self.target.starts_with('\\')
    }
}

// ============================================================================
// Name Resolution
// ============================================================================

/// A cross-reference whose target is not written fully qualified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameResolutionIssue {
    /// The reference as written.
    pub original: String,
    /// Fully-qualified form, when resolvable.
    pub resolved: Option<String>,
    pub fixable: bool,
    pub message: Option<String>,
    pub file: String,
    pub line: u32,
    pub owner: UnitId,
}

// ============================================================================
// Tests
// ============================================================================
