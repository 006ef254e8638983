//! Source scanner.
//!
//! Scanning happens in two passes. [`parse_source`] turns one file into a
//! [`ParsedFile`]: classes with their methods (attributes, `@see` lines and
//! link calls in the body) and top-level chaining test statements with their
//! chained calls. Extractors then turn parsed files into entity records: the
//! production extractor for production files, and one [`DialectExtractor`]
//! per test dialect for test files.
//!
//! The parser is line oriented. Attributes are expected on a single line,
//! and brace depth is tracked with string and comment awareness so that
//! class and method extents are found without a full grammar.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;

use crate::docblock::cross_ref_lines;
use crate::model::{
    normalize_reference, CrossRefContext, CrossRefEntry, DeclaredLink, Dialect, ForwardRelation,
    LinkOrigin, PlaceholderEntry, PlaceholderRole, ProductionUnit, TestDeclaration, TestUnit,
    UnitId,
};
use crate::placeholder::{PlaceholderId, PlaceholderRegistry};
use crate::registry::{LinkRegistries, ValidationResult};
use crate::resolver::ImportTable;
use crate::rewrite::TEST_CALL;
use crate::text::{brace_delta, find_call_statement, is_attribute_line, is_blank, unquote, TextLines};
use crate::workspace::{FileRole, SourceFile, SourceTree};

static CLASS_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:(?:abstract|final|readonly)\s+)*(?:class|trait|interface|enum)\s+([A-Za-z_][A-Za-z0-9_]*)")
        .expect("class regex is valid")
});

static METHOD_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:(?:abstract|final|public|protected|private|static|readonly)\s+)*function\s+&?([A-Za-z_][A-Za-z0-9_]*)\s*\(",
    )
    .expect("method regex is valid")
});

static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*#\[\s*\\?(?:[A-Za-z0-9_]+\\)*([A-Za-z_][A-Za-z0-9_]*)\s*(?:\((.*)\))?\s*\]\s*$")
        .expect("attribute regex is valid")
});

static LINK_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(->\s*)?\b(linksAndCovers|links)\s*\(").expect("link call regex is valid")
});

static DESCRIBE_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\bdescribe\s*\(\s*(?:'((?:[^'\\]|\\.)*)'|"((?:[^"\\]|\\.)*)")"#)
        .expect("describe regex is valid")
});

// ============================================================================
// Parsed Representation
// ============================================================================

/// A single-line attribute such as `#[TestedBy(Foo::class, 'bar')]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedAttribute {
    /// Short attribute name (namespace stripped).
    pub name: String,
    pub args: Vec<String>,
    /// 1-indexed line.
    pub line: u32,
    /// Attribute text without indentation.
    pub raw: String,
}

/// A `links()`/`linksAndCovers()` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedCall {
    pub name: String,
    pub args: Vec<String>,
    pub line: u32,
    /// Call text, including the leading `->` for chained calls.
    pub raw: String,
    pub chained: bool,
}

impl ParsedCall {
    pub fn with_coverage(&self) -> bool {
        self.name == "linksAndCovers"
    }
}

/// A method of a parsed class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedMethod {
    pub name: String,
    pub line: u32,
    pub attributes: Vec<ParsedAttribute>,
    /// `@see` targets of the doc comment with their 1-indexed lines.
    pub see_refs: Vec<(u32, String)>,
    pub body_calls: Vec<ParsedCall>,
}

/// A class, trait, interface or enum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedClass {
    /// Fully-qualified name, no leading `\`.
    pub name: String,
    pub line: u32,
    pub methods: Vec<ParsedMethod>,
}

/// A top-level `test()`/`it()` statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedTestCall {
    pub function: String,
    pub description: String,
    /// Enclosing `describe()` descriptions, outermost first.
    pub groups: Vec<String>,
    pub line: u32,
    pub calls: Vec<ParsedCall>,
}

/// Everything the scanner extracts from one file.
#[derive(Debug, Clone, Default)]
pub struct ParsedFile {
    pub path: String,
    pub imports: ImportTable,
    pub classes: Vec<ParsedClass>,
    pub test_calls: Vec<ParsedTestCall>,
}

// ============================================================================
// Parsing
// ============================================================================

struct OpenScope<T> {
    item: T,
    depth: i32,
    opened: bool,
}

impl<T> OpenScope<T> {
    fn new(item: T, depth: i32) -> Self {
        OpenScope {
            item,
            depth,
            opened: false,
        }
    }

    /// Update after a line; returns true once the scope has closed.
    fn step(&mut self, depth: i32) -> bool {
        if depth > self.depth {
            self.opened = true;
        }
        self.opened && depth <= self.depth
    }
}

/// Parse one file.
pub fn parse_source(path: &str, text: &str) -> ParsedFile {
    let lines = TextLines::parse(text).lines;
    let imports = ImportTable::parse(text);

    let mut classes: Vec<ParsedClass> = Vec::new();
    let mut test_calls: Vec<ParsedTestCall> = Vec::new();
    let mut class_stack: Vec<OpenScope<ParsedClass>> = Vec::new();
    let mut method: Option<OpenScope<ParsedMethod>> = None;
    let mut describes: Vec<OpenScope<String>> = Vec::new();

    let mut depth = 0i32;
    let mut in_block_comment = false;

    for (idx, line) in lines.iter().enumerate() {
        let line_no = idx as u32 + 1;
        let before = depth;
        let starts_in_comment = in_block_comment;
        depth += brace_delta(line, &mut in_block_comment);

        if starts_in_comment || line.trim_start().starts_with('*') || line.trim_start().starts_with("//") {
            close_scopes(&mut class_stack, &mut method, &mut describes, &mut classes, depth);
            continue;
        }

        let class_depth = class_stack.last().map(|c| c.depth);
        if let Some(open) = method.as_mut() {
            if open.opened || depth > open.depth {
                open.item.body_calls.extend(
                    find_link_calls(line, line_no, 0)
                        .into_iter()
                        .filter(|c| !c.chained),
                );
            }
        } else if let Some(caps) = CLASS_DECL.captures(line) {
            let short = &caps[1];
            let name = match &imports.namespace {
                Some(ns) => format!("{ns}\\{short}"),
                None => short.to_string(),
            };
            let class = ParsedClass {
                name,
                line: line_no,
                methods: Vec::new(),
            };
            if line.contains('{') && depth <= before {
                classes.push(class);
            } else {
                class_stack.push(OpenScope::new(class, before));
            }
        } else if let (Some(class_depth), Some(caps)) = (class_depth, METHOD_DECL.captures(line)) {
            if before == class_depth + 1 {
                let mut parsed = ParsedMethod {
                    name: caps[1].to_string(),
                    line: line_no,
                    attributes: attributes_above(&lines, idx),
                    see_refs: cross_ref_lines(&lines, idx)
                        .into_iter()
                        .map(|(i, target)| (i as u32 + 1, target))
                        .collect(),
                    body_calls: Vec::new(),
                };
                let brace = line.find('{');
                if let Some(brace) = brace {
                    parsed.body_calls.extend(
                        find_link_calls(line, line_no, brace)
                            .into_iter()
                            .filter(|c| !c.chained),
                    );
                }
                let bodiless = line.trim_end().ends_with(';') || brace.is_some();
                if bodiless && depth <= before {
                    push_method(&mut class_stack, parsed);
                } else {
                    method = Some(OpenScope::new(parsed, before));
                }
            }
        } else if class_stack.is_empty() {
            if let Some(caps) = DESCRIBE_CALL.captures(line) {
                let description = caps
                    .get(1)
                    .or_else(|| caps.get(2))
                    .map_or(String::new(), |m| unescape(m.as_str()));
                describes.push(OpenScope::new(description, before));
            } else if let Some(call) = parse_test_call(&lines, idx, &describes) {
                test_calls.push(call);
            }
        }

        close_scopes(&mut class_stack, &mut method, &mut describes, &mut classes, depth);
    }

    // Unterminated scopes at end of file still count.
    if let Some(open) = method.take() {
        push_method(&mut class_stack, open.item);
    }
    while let Some(open) = class_stack.pop() {
        classes.push(open.item);
    }
    classes.sort_by_key(|c| c.line);

    ParsedFile {
        path: path.to_string(),
        imports,
        classes,
        test_calls,
    }
}

fn close_scopes(
    class_stack: &mut Vec<OpenScope<ParsedClass>>,
    method: &mut Option<OpenScope<ParsedMethod>>,
    describes: &mut Vec<OpenScope<String>>,
    classes: &mut Vec<ParsedClass>,
    depth: i32,
) {
    if let Some(open) = method.as_mut() {
        if open.step(depth) {
            if let Some(open) = method.take() {
                push_method(class_stack, open.item);
            }
        }
    }
    while let Some(open) = class_stack.last_mut() {
        if !open.step(depth) {
            break;
        }
        if let Some(open) = class_stack.pop() {
            classes.push(open.item);
        }
    }
    while let Some(open) = describes.last_mut() {
        if !open.step(depth) {
            break;
        }
        describes.pop();
    }
}

fn push_method(class_stack: &mut [OpenScope<ParsedClass>], method: ParsedMethod) {
    if let Some(class) = class_stack.last_mut() {
        class.item.methods.push(method);
    }
}

/// Attributes in the stack directly above `member_idx`, top to bottom.
fn attributes_above(lines: &[String], member_idx: usize) -> Vec<ParsedAttribute> {
    let mut found = Vec::new();
    let mut idx = member_idx;
    while idx > 0 {
        idx -= 1;
        let line = &lines[idx];
        if is_blank(line) {
            continue;
        }
        if !is_attribute_line(line) {
            break;
        }
        if let Some(caps) = ATTRIBUTE.captures(line) {
            found.push(ParsedAttribute {
                name: caps[1].to_string(),
                args: caps.get(2).map_or(Vec::new(), |m| split_args(m.as_str())),
                line: idx as u32 + 1,
                raw: line.trim().to_string(),
            });
        }
    }
    found.reverse();
    found
}

fn parse_test_call(
    lines: &[String],
    idx: usize,
    describes: &[OpenScope<String>],
) -> Option<ParsedTestCall> {
    let line = &lines[idx];
    let caps = TEST_CALL.captures(line)?;
    let whole = caps.get(0)?;
    let literal = caps.get(1).or_else(|| caps.get(2))?;
    let function = if whole.as_str().starts_with("it") {
        "it"
    } else {
        "test"
    };
    let paren = whole.start() + line[whole.start()..].find('(')?;
    let stmt = find_call_statement(lines, (idx, paren))?;

    let mut calls = Vec::new();
    for i in stmt.close.0..=stmt.end.0 {
        let from = if i == stmt.close.0 { stmt.close.1 } else { 0 };
        calls.extend(
            find_link_calls(&lines[i], i as u32 + 1, from)
                .into_iter()
                .filter(|c| c.chained),
        );
    }

    Some(ParsedTestCall {
        function: function.to_string(),
        description: unescape(literal.as_str()),
        groups: describes.iter().map(|d| d.item.clone()).collect(),
        line: idx as u32 + 1,
        calls,
    })
}

fn unescape(literal: &str) -> String {
    literal.replace("\\'", "'").replace("\\\"", "\"")
}

/// Link calls on `line` at or after byte column `from`.
fn find_link_calls(line: &str, line_no: u32, from: usize) -> Vec<ParsedCall> {
    let Some(segment) = line.get(from..) else {
        return Vec::new();
    };
    let mut calls = Vec::new();
    for caps in LINK_CALL.captures_iter(segment) {
        let Some(whole) = caps.get(0) else { continue };
        let before = &segment[..whole.start()];
        if before.trim_end().ends_with("function") || before.ends_with("::") {
            continue;
        }
        let open = whole.end() - 1;
        let Some(close) = matching_paren(segment, open) else {
            continue;
        };
        calls.push(ParsedCall {
            name: caps[2].to_string(),
            args: split_args(&segment[open + 1..close]),
            line: line_no,
            raw: segment[whole.start()..=close].to_string(),
            chained: caps.get(1).is_some(),
        });
    }
    calls
}

/// Byte index of the `)` matching the `(` at `open`, on the same line.
fn matching_paren(line: &str, open: usize) -> Option<usize> {
    let bytes = line.as_bytes();
    let mut depth = 0usize;
    let mut in_string: Option<u8> = None;
    let mut col = open;
    while col < bytes.len() {
        let b = bytes[col];
        if let Some(q) = in_string {
            if b == b'\\' {
                col += 1;
            } else if b == q {
                in_string = None;
            }
        } else {
            match b {
                b'\'' | b'"' => in_string = Some(b),
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(col);
                    }
                }
                _ => {}
            }
        }
        col += 1;
    }
    None
}

/// Split call arguments on top-level commas.
pub fn split_args(args: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut in_string: Option<char> = None;
    let mut escaped = false;
    let mut current = String::new();
    for c in args.chars() {
        if let Some(q) = in_string {
            current.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                in_string = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => {
                in_string = Some(c);
                current.push(c);
            }
            '(' | '[' => {
                depth += 1;
                current.push(c);
            }
            ')' | ']' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth == 0 => {
                out.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        out.push(current.trim().to_string());
    }
    out
}

// ============================================================================
// Argument Evaluation
// ============================================================================

/// What a link or forward-relation declaration points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Unit { type_name: String, member: String },
    Placeholder(String),
}

/// Qualify a class name written in `imports`' file.
pub fn qualify_class(name: &str, imports: &ImportTable) -> String {
    let name = name.trim();
    if let Some(fq) = name.strip_prefix('\\') {
        return fq.to_string();
    }
    if let Some(q) = imports.qualify(name) {
        return q;
    }
    match &imports.namespace {
        Some(ns) => format!("{ns}\\{name}"),
        None => name.to_string(),
    }
}

fn eval_class(arg: &str, imports: &ImportTable) -> Option<String> {
    let arg = arg.trim();
    if let Some(class) = arg.strip_suffix("::class") {
        return Some(qualify_class(class, imports));
    }
    unquote(arg).map(|s| normalize_reference(&s).to_string())
}

/// Evaluate declaration arguments into a target.
///
/// Accepted forms: `'@id'`, `'Type::member'`, `Type::class.'::member'`, and
/// the two-argument `Type::class, 'member'` / `'Type', 'member'`.
pub fn parse_target(args: &[String], imports: &ImportTable) -> Result<Target, String> {
    match args {
        [single] => {
            if let Some(value) = unquote(single) {
                if value.starts_with('@') {
                    return if PlaceholderId::is_placeholder(&value) {
                        Ok(Target::Placeholder(value))
                    } else {
                        Err(format!("'{value}' is not a valid placeholder id"))
                    };
                }
                let (type_name, member) = value
                    .split_once("::")
                    .ok_or_else(|| format!("'{value}' does not name a member"))?;
                return Ok(Target::Unit {
                    type_name: normalize_reference(type_name).to_string(),
                    member: member.to_string(),
                });
            }
            let (class, member) = single
                .split_once('.')
                .ok_or_else(|| format!("'{single}' does not name a member"))?;
            let type_name =
                eval_class(class, imports).ok_or_else(|| format!("cannot read class '{class}'"))?;
            let member = unquote(member)
                .and_then(|m| m.strip_prefix("::").map(str::to_string))
                .ok_or_else(|| format!("cannot read member in '{single}'"))?;
            Ok(Target::Unit { type_name, member })
        }
        [class, member] => {
            let type_name =
                eval_class(class, imports).ok_or_else(|| format!("cannot read class '{class}'"))?;
            let member = unquote(member).ok_or_else(|| format!("cannot read member '{member}'"))?;
            Ok(Target::Unit { type_name, member })
        }
        _ => Err(format!("expected 1 or 2 arguments, got {}", args.len())),
    }
}

/// Type name of a chaining test file, derived from its path:
/// `tests/Unit/UserServiceTest.php` is `Tests\Unit\UserServiceTest`.
pub fn chaining_type_name(path: &str) -> String {
    let stem = path.rsplit_once('.').map_or(path, |(stem, _)| stem);
    stem.split('/')
        .filter(|s| !s.is_empty())
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("\\")
}

// ============================================================================
// Extraction
// ============================================================================

/// Records extracted from one or more files.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub productions: Vec<ProductionUnit>,
    pub tests: Vec<TestUnit>,
    pub placeholders: Vec<PlaceholderEntry>,
    pub cross_refs: Vec<CrossRefEntry>,
    pub warnings: Vec<String>,
}

impl Extraction {
    fn extend(&mut self, other: Extraction) {
        self.productions.extend(other.productions);
        self.tests.extend(other.tests);
        self.placeholders.extend(other.placeholders);
        self.cross_refs.extend(other.cross_refs);
        self.warnings.extend(other.warnings);
    }

    fn warn(&mut self, file: &str, line: u32, message: String) {
        tracing::warn!(file, line, "{message}");
        self.warnings.push(format!("{file}:{line}: {message}"));
    }
}

/// Turns parsed test files into test units for one dialect.
pub trait DialectExtractor {
    fn dialect(&self) -> Dialect;

    fn extract(&self, file: &ParsedFile) -> Extraction;
}

/// Test methods on test classes, linked with attributes or body calls.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnnotationExtractor;

impl AnnotationExtractor {
    fn is_test_method(method: &ParsedMethod) -> bool {
        method.name.starts_with("test")
            || method
                .attributes
                .iter()
                .any(|a| matches!(a.name.as_str(), "Test" | "Links" | "LinksAndCovers"))
            || !method.body_calls.is_empty()
    }
}

impl DialectExtractor for AnnotationExtractor {
    fn dialect(&self) -> Dialect {
        Dialect::Annotation
    }

    fn extract(&self, file: &ParsedFile) -> Extraction {
        let mut out = Extraction::default();
        for class in &file.classes {
            for method in class.methods.iter().filter(|m| Self::is_test_method(m)) {
                let owner = UnitId::new(&class.name, &method.name);
                let mut test = TestUnit {
                    type_name: class.name.clone(),
                    file: file.path.clone(),
                    line: method.line,
                    declaration: TestDeclaration::Annotation {
                        method: method.name.clone(),
                    },
                    links: Vec::new(),
                };

                let attribute_decls = method
                    .attributes
                    .iter()
                    .filter(|a| a.name == "Links" || a.name == "LinksAndCovers")
                    .map(|a| {
                        (
                            &a.args,
                            a.name == "LinksAndCovers",
                            LinkOrigin::Attribute,
                            a.line,
                            &a.raw,
                        )
                    });
                let call_decls = method.body_calls.iter().map(|c| {
                    (&c.args, c.with_coverage(), LinkOrigin::Call, c.line, &c.raw)
                });

                for (args, with_coverage, origin, line, raw) in attribute_decls.chain(call_decls) {
                    match parse_target(args, &file.imports) {
                        Ok(Target::Unit { type_name, member }) => test.links.push(DeclaredLink {
                            target_type: type_name,
                            target_member: member,
                            with_coverage,
                            origin,
                            line,
                            raw: raw.clone(),
                        }),
                        Ok(Target::Placeholder(id)) => out.placeholders.push(PlaceholderEntry {
                            see_tag_mode: id.starts_with("@@"),
                            id,
                            role: PlaceholderRole::Test,
                            owner: owner.clone(),
                            file: file.path.clone(),
                            line,
                            dialect: Some(Dialect::Annotation),
                            with_coverage,
                            raw: raw.clone(),
                        }),
                        Err(message) => out.warn(&file.path, line, message),
                    }
                }

                out.cross_refs.extend(see_entries(
                    &method.see_refs,
                    &file.path,
                    CrossRefContext::Test,
                    &owner,
                ));
                out.tests.push(test);
            }
        }
        out
    }
}

/// Top-level `test()`/`it()` statements with chained link calls.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChainingExtractor;

impl DialectExtractor for ChainingExtractor {
    fn dialect(&self) -> Dialect {
        Dialect::Chaining
    }

    fn extract(&self, file: &ParsedFile) -> Extraction {
        let mut out = Extraction::default();
        let type_name = chaining_type_name(&file.path);
        for call in &file.test_calls {
            let mut test = TestUnit {
                type_name: type_name.clone(),
                file: file.path.clone(),
                line: call.line,
                declaration: TestDeclaration::Chaining {
                    function: call.function.clone(),
                    description: call.description.clone(),
                    groups: call.groups.clone(),
                },
                links: Vec::new(),
            };
            let owner = test.id();
            for link in &call.calls {
                match parse_target(&link.args, &file.imports) {
                    Ok(Target::Unit { type_name, member }) => test.links.push(DeclaredLink {
                        target_type: type_name,
                        target_member: member,
                        with_coverage: link.with_coverage(),
                        origin: LinkOrigin::Call,
                        line: link.line,
                        raw: link.raw.clone(),
                    }),
                    Ok(Target::Placeholder(id)) => out.placeholders.push(PlaceholderEntry {
                        see_tag_mode: id.starts_with("@@"),
                        id,
                        role: PlaceholderRole::Test,
                        owner: owner.clone(),
                        file: file.path.clone(),
                        line: link.line,
                        dialect: Some(Dialect::Chaining),
                        with_coverage: link.with_coverage(),
                        raw: link.raw.clone(),
                    }),
                    Err(message) => out.warn(&file.path, link.line, message),
                }
            }
            out.tests.push(test);
        }
        out
    }
}

/// Production methods with their forward relations and markers.
pub fn extract_production(file: &ParsedFile) -> Extraction {
    let mut out = Extraction::default();
    for class in &file.classes {
        for method in &class.methods {
            let owner = UnitId::new(&class.name, &method.name);
            let mut unit = ProductionUnit {
                type_name: class.name.clone(),
                member: method.name.clone(),
                file: file.path.clone(),
                line: method.line,
                forward_relations: Vec::new(),
            };
            for attr in method.attributes.iter().filter(|a| a.name == "TestedBy") {
                match parse_target(&attr.args, &file.imports) {
                    Ok(Target::Unit { type_name, member }) => {
                        unit.forward_relations.push(ForwardRelation {
                            test_type: type_name,
                            test_member: member,
                            line: attr.line,
                            raw: attr.raw.clone(),
                        })
                    }
                    Ok(Target::Placeholder(id)) => out.placeholders.push(PlaceholderEntry {
                        see_tag_mode: id.starts_with("@@"),
                        id,
                        role: PlaceholderRole::Production,
                        owner: owner.clone(),
                        file: file.path.clone(),
                        line: attr.line,
                        dialect: None,
                        with_coverage: false,
                        raw: attr.raw.clone(),
                    }),
                    Err(message) => out.warn(&file.path, attr.line, message),
                }
            }
            out.cross_refs.extend(see_entries(
                &method.see_refs,
                &file.path,
                CrossRefContext::Production,
                &owner,
            ));
            out.productions.push(unit);
        }
    }
    out
}

fn see_entries(
    refs: &[(u32, String)],
    file: &str,
    context: CrossRefContext,
    owner: &UnitId,
) -> Vec<CrossRefEntry> {
    refs.iter()
        .map(|(line, target)| CrossRefEntry {
            target: target.clone(),
            file: file.to_string(),
            line: *line,
            context,
            owner: owner.clone(),
        })
        .collect()
}

// ============================================================================
// Catalog
// ============================================================================

/// A type seen by the scan, with its member names.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TypeInfo {
    pub file: String,
    pub members: BTreeSet<String>,
}

/// Result of scanning a whole source tree.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub productions: Vec<ProductionUnit>,
    pub tests: Vec<TestUnit>,
    pub placeholders: Vec<PlaceholderEntry>,
    pub cross_refs: Vec<CrossRefEntry>,
    pub warnings: Vec<String>,
    types: BTreeMap<String, TypeInfo>,
}

impl Catalog {
    /// Scan every file in `tree`.
    pub fn scan(tree: &SourceTree) -> Self {
        let extractors: [&dyn DialectExtractor; 2] = [&AnnotationExtractor, &ChainingExtractor];
        let mut catalog = Catalog {
            warnings: tree.warnings.clone(),
            ..Default::default()
        };
        let mut extraction = Extraction::default();

        for file in tree.files() {
            let parsed = parse_source(&file.path, &file.text);
            catalog.record_types(file, &parsed);
            match file.role {
                FileRole::Production => extraction.extend(extract_production(&parsed)),
                FileRole::Test => {
                    for extractor in extractors {
                        let found = extractor.extract(&parsed);
                        tracing::debug!(
                            file = %file.path,
                            dialect = %extractor.dialect(),
                            tests = found.tests.len(),
                            "extracted tests"
                        );
                        extraction.extend(found);
                    }
                }
            }
        }

        catalog.productions = extraction.productions;
        catalog.tests = extraction.tests;
        catalog.placeholders = extraction.placeholders;
        catalog.cross_refs = extraction.cross_refs;
        catalog.warnings.extend(extraction.warnings);

        tracing::debug!(
            files = tree.len(),
            productions = catalog.productions.len(),
            tests = catalog.tests.len(),
            placeholders = catalog.placeholders.len(),
            cross_refs = catalog.cross_refs.len(),
            "scan complete"
        );
        catalog
    }

    fn record_types(&mut self, file: &SourceFile, parsed: &ParsedFile) {
        for class in &parsed.classes {
            let info = self.types.entry(class.name.clone()).or_insert_with(|| TypeInfo {
                file: file.path.clone(),
                members: BTreeSet::new(),
            });
            info.members
                .extend(class.methods.iter().map(|m| m.name.clone()));
        }
        if file.role == FileRole::Test && !parsed.test_calls.is_empty() {
            let info = self
                .types
                .entry(chaining_type_name(&file.path))
                .or_insert_with(|| TypeInfo {
                    file: file.path.clone(),
                    members: BTreeSet::new(),
                });
            for call in &parsed.test_calls {
                let decl = TestDeclaration::Chaining {
                    function: call.function.clone(),
                    description: call.description.clone(),
                    groups: call.groups.clone(),
                };
                info.members.insert(decl.display_name());
                info.members.insert(decl.reference_member());
            }
        }
    }

    /// Names of every type the scan saw.
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    /// Whether the scan saw `type_name` (leading `\` allowed).
    pub fn is_type_loaded(&self, type_name: &str) -> bool {
        self.types.contains_key(normalize_reference(type_name))
    }

    /// Whether `type_name` has a member called `member`.
    pub fn member_exists(&self, type_name: &str, member: &str) -> bool {
        self.types
            .get(normalize_reference(type_name))
            .is_some_and(|t| t.members.contains(member))
    }

    /// Whether a reference points at a loaded type but a missing member.
    pub fn is_stale(&self, type_name: &str, member: &str) -> bool {
        self.is_type_loaded(type_name) && !self.member_exists(type_name, member)
    }

    pub fn test(&self, id: &UnitId) -> Option<&TestUnit> {
        self.tests.iter().find(|t| &t.id() == id)
    }

    pub fn production(&self, id: &UnitId) -> Option<&ProductionUnit> {
        self.productions.iter().find(|p| &p.id() == id)
    }

    /// Cross-reference targets currently on `owner`'s doc comment.
    pub fn cross_refs_for<'a>(
        &'a self,
        owner: &'a UnitId,
    ) -> impl Iterator<Item = &'a CrossRefEntry> + 'a {
        self.cross_refs.iter().filter(move |c| &c.owner == owner)
    }

    /// Link registries built from declared test links.
    pub fn registries(&self) -> LinkRegistries {
        LinkRegistries::from_tests(&self.tests)
    }

    /// Placeholder entries grouped by id.
    pub fn placeholder_registry(&self) -> PlaceholderRegistry {
        PlaceholderRegistry::from_entries(self.placeholders.iter().cloned())
    }

    /// Compare declared links with forward relations.
    pub fn validate(&self) -> ValidationResult {
        self.registries().validate_bidirectional(&self.productions)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PathsConfig;

    const PRODUCTION: &str = r"<?php

namespace App;

use Tests\Unit\UserServiceTest;

final class UserService
{
    /**
     * Creates a user.
     *
     * @see \Tests\Unit\UserServiceTest::testCreate
     */
    #[TestedBy(UserServiceTest::class, 'testCreate')]
    public function create(string $name): User
    {
        if ($name === '') {
            throw new \InvalidArgumentException('{');
        }
        return new User($name);
    }

    #[TestedBy('@A')]
    public function update(User $user): void
    {
    }

    abstract protected function hook(): void;
}
";

    const ANNOTATION_TEST: &str = r"<?php

namespace Tests\Unit;

use App\UserService;
use PHPUnit\Framework\TestCase;

class UserServiceTest extends TestCase
{
    #[LinksAndCovers(UserService::class, 'create')]
    public function testCreate(): void
    {
        links(UserService::class, 'update');
    }

    #[Links('@@B')]
    public function testUpdate(): void
    {
    }

    protected function setUp(): void
    {
    }
}
";

    const CHAINING_TEST: &str = r"<?php

use App\UserService;

describe('UserService', function () {
    test('creates user', function () {
        expect(true)->toBeTrue();
    })->linksAndCovers(UserService::class.'::create');

    it('updates user', fn () => true)->links('@A');
});

test('top level', fn () => true)->linksAndCovers('\App\UserService::create')->links(\App\Other::class.'::x');
";

    mod parse_tests {
        use super::*;

        #[test]
        fn classes_and_methods() {
            let parsed = parse_source("src/UserService.php", PRODUCTION);
            assert_eq!(parsed.classes.len(), 1);
            let class = &parsed.classes[0];
            assert_eq!(class.name, "App\\UserService");
            let names: Vec<_> = class.methods.iter().map(|m| m.name.as_str()).collect();
            assert_eq!(names, vec!["create", "update", "hook"]);
            let create = &class.methods[0];
            assert_eq!(create.attributes.len(), 1);
            assert_eq!(create.attributes[0].name, "TestedBy");
            assert_eq!(create.attributes[0].args, vec!["UserServiceTest::class", "'testCreate'"]);
            assert_eq!(create.see_refs, vec![(12, "\\Tests\\Unit\\UserServiceTest::testCreate".to_string())]);
        }

        #[test]
        fn body_calls_are_collected() {
            let parsed = parse_source("tests/Unit/UserServiceTest.php", ANNOTATION_TEST);
            let test_create = &parsed.classes[0].methods[0];
            assert_eq!(test_create.body_calls.len(), 1);
            assert_eq!(test_create.body_calls[0].raw, "links(UserService::class, 'update')");
            assert!(!test_create.body_calls[0].chained);
        }

        #[test]
        fn chaining_statements_with_groups() {
            let parsed = parse_source("tests/Feature/UserTest.php", CHAINING_TEST);
            assert_eq!(parsed.test_calls.len(), 3);
            let first = &parsed.test_calls[0];
            assert_eq!(first.description, "creates user");
            assert_eq!(first.groups, vec!["UserService"]);
            assert_eq!(first.calls.len(), 1);
            assert_eq!(first.calls[0].line, 8);
            assert_eq!(parsed.test_calls[1].function, "it");
            assert_eq!(parsed.test_calls[1].calls[0].raw, "->links('@A')");
            let last = &parsed.test_calls[2];
            assert!(last.groups.is_empty());
            assert_eq!(last.calls.len(), 2);
        }

        #[test]
        fn split_args_respects_strings() {
            assert_eq!(
                split_args("Foo::class, 'a, b', bar(1, 2)"),
                vec!["Foo::class", "'a, b'", "bar(1, 2)"]
            );
        }

        #[test]
        fn chaining_type_names() {
            assert_eq!(
                chaining_type_name("tests/Unit/userServiceTest.php"),
                "Tests\\Unit\\UserServiceTest"
            );
        }
    }

    mod target_tests {
        use super::*;

        fn imports() -> ImportTable {
            ImportTable::parse("<?php\nnamespace Tests;\nuse App\\UserService;\n")
        }

        fn args(list: &[&str]) -> Vec<String> {
            list.iter().map(|s| s.to_string()).collect()
        }

        #[test]
        fn all_forms() {
            let unit = |t: &str, m: &str| Target::Unit {
                type_name: t.to_string(),
                member: m.to_string(),
            };
            let i = imports();
            assert_eq!(
                parse_target(&args(&["UserService::class", "'create'"]), &i),
                Ok(unit("App\\UserService", "create"))
            );
            assert_eq!(
                parse_target(&args(&["UserService::class.'::create'"]), &i),
                Ok(unit("App\\UserService", "create"))
            );
            assert_eq!(
                parse_target(&args(&["'\\App\\UserService::create'"]), &i),
                Ok(unit("App\\UserService", "create"))
            );
            assert_eq!(
                parse_target(&args(&["Local::class", "'x'"]), &i),
                Ok(unit("Tests\\Local", "x"))
            );
            assert_eq!(
                parse_target(&args(&["'@A'"]), &i),
                Ok(Target::Placeholder("@A".to_string()))
            );
        }

        #[test]
        fn malformed_placeholder_is_error() {
            assert!(parse_target(&args(&["'@1A'"]), &imports()).is_err());
            assert!(parse_target(&args(&["'nothing'"]), &imports()).is_err());
        }
    }

    mod catalog_tests {
        use super::*;

        fn tree() -> SourceTree {
            SourceTree::in_memory(
                &PathsConfig::default(),
                [
                    ("src/UserService.php", PRODUCTION),
                    ("tests/Unit/UserServiceTest.php", ANNOTATION_TEST),
                    ("tests/Feature/UserTest.php", CHAINING_TEST),
                ],
            )
        }

        #[test]
        fn productions_and_forward_relations() {
            let catalog = Catalog::scan(&tree());
            assert_eq!(catalog.productions.len(), 3);
            let create = catalog
                .production(&UnitId::new("App\\UserService", "create"))
                .unwrap();
            assert_eq!(create.forward_relations.len(), 1);
            assert_eq!(
                create.forward_relations[0].test_id(),
                UnitId::new("Tests\\Unit\\UserServiceTest", "testCreate")
            );
        }

        #[test]
        fn tests_from_both_dialects() {
            let catalog = Catalog::scan(&tree());
            let annotation: Vec<_> = catalog
                .tests
                .iter()
                .filter(|t| t.dialect() == Dialect::Annotation)
                .collect();
            assert_eq!(annotation.len(), 2);
            let chaining: Vec<_> = catalog
                .tests
                .iter()
                .filter(|t| t.dialect() == Dialect::Chaining)
                .collect();
            assert_eq!(chaining.len(), 3);
            assert_eq!(
                chaining[0].id(),
                UnitId::new("Tests\\Feature\\UserTest", "UserService > creates user")
            );
            let test_create = &annotation[0];
            assert_eq!(test_create.links.len(), 2);
            assert_eq!(test_create.links[0].origin, LinkOrigin::Attribute);
            assert_eq!(test_create.links[1].origin, LinkOrigin::Call);
            assert!(!test_create.links[1].with_coverage);
        }

        #[test]
        fn placeholders_on_both_sides() {
            let catalog = Catalog::scan(&tree());
            let ids: Vec<_> = catalog
                .placeholders
                .iter()
                .map(|p| (p.id.as_str(), p.role, p.dialect))
                .collect();
            assert!(ids.contains(&("@A", PlaceholderRole::Production, None)));
            assert!(ids.contains(&("@A", PlaceholderRole::Test, Some(Dialect::Chaining))));
            assert!(ids.contains(&("@@B", PlaceholderRole::Test, Some(Dialect::Annotation))));
        }

        #[test]
        fn types_and_members() {
            let catalog = Catalog::scan(&tree());
            assert!(catalog.is_type_loaded("\\App\\UserService"));
            assert!(catalog.member_exists("App\\UserService", "hook"));
            assert!(catalog.is_stale("App\\UserService", "deleted"));
            assert!(!catalog.is_stale("App\\Other", "x"));
            assert!(catalog.member_exists("Tests\\Feature\\UserTest", "UserService > creates user"));
            assert!(catalog.member_exists("Tests\\Feature\\UserTest", "UserService__creates_user"));
        }

        #[test]
        fn cross_refs_are_recorded() {
            let catalog = Catalog::scan(&tree());
            assert_eq!(catalog.cross_refs.len(), 1);
            assert_eq!(catalog.cross_refs[0].context, CrossRefContext::Production);
        }

        #[test]
        fn cross_refs_filtered_by_owner() {
            let catalog = Catalog::scan(&tree());
            let owner = UnitId::new("App\\UserService", "create");
            let targets: Vec<&str> = catalog
                .cross_refs_for(&owner)
                .map(|c| c.target.as_str())
                .collect();
            assert_eq!(targets, vec!["\\Tests\\Unit\\UserServiceTest::testCreate"]);
            let other = UnitId::new("App\\UserService", "update");
            assert_eq!(catalog.cross_refs_for(&other).count(), 0);
        }

        #[test]
        fn validation_over_scan() {
            let result = Catalog::scan(&tree()).validate();
            // testCreate -> create is declared both ways.
            assert!(!result
                .missing_forward_relation
                .iter()
                .any(|p| p.test == UnitId::new("Tests\\Unit\\UserServiceTest", "testCreate")
                    && p.method == UnitId::new("App\\UserService", "create")));
            assert!(!result.is_valid());
        }
    }
}
