//! Line-level rewrites of link declarations.
//!
//! Renderers produce the source text of forward relations and link
//! declarations; the mutators insert or remove them relative to a member
//! (annotation dialect) or a test statement (chaining dialect).

use std::sync::LazyLock;

use regex::Regex;

use crate::docblock::{attribute_start, find_member_line};
use crate::model::{normalize_reference, Dialect};
use crate::text::{
    find_call_statement, is_blank, leading_whitespace, quote, EditOutcome, TextLines,
};

pub(crate) static TEST_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\b(?:test|it)\s*\(\s*(?:'((?:[^'\\]|\\.)*)'|"((?:[^"\\]|\\.)*)")"#)
        .expect("test call regex is valid")
});

// ============================================================================
// Renderers
// ============================================================================

fn class_ref(type_name: &str) -> String {
    format!("\\{}::class", normalize_reference(type_name))
}

/// `#[TestedBy(...)]` naming a test.
///
/// Annotation tests are real classes and are referenced with `::class`;
/// chaining tests have no class, so their derived type name is quoted.
pub fn render_tested_by(test_type: &str, test_member: &str, dialect: Dialect) -> String {
    match dialect {
        Dialect::Annotation => format!(
            "#[TestedBy({}, {})]",
            class_ref(test_type),
            quote(test_member)
        ),
        Dialect::Chaining => format!(
            "#[TestedBy({}, {})]",
            quote(normalize_reference(test_type)),
            quote(test_member)
        ),
    }
}

/// `#[LinksAndCovers(...)]` or `#[Links(...)]` on a test method.
pub fn render_link_attribute(target_type: &str, target_member: &str, with_coverage: bool) -> String {
    format!(
        "#[{}({}, {})]",
        link_name(with_coverage, true),
        class_ref(target_type),
        quote(target_member)
    )
}

/// `->linksAndCovers(...)` or `->links(...)` chained on a test statement.
pub fn render_link_call(target_type: &str, target_member: &str, with_coverage: bool) -> String {
    format!(
        "->{}({}.{})",
        link_name(with_coverage, false),
        class_ref(target_type),
        quote(&format!("::{target_member}"))
    )
}

/// `linksAndCovers(...);` as a statement inside an annotation test body.
pub fn render_link_statement(target_type: &str, target_member: &str, with_coverage: bool) -> String {
    format!(
        "{}({}, {});",
        link_name(with_coverage, false),
        class_ref(target_type),
        quote(target_member)
    )
}

fn link_name(with_coverage: bool, attribute: bool) -> &'static str {
    match (with_coverage, attribute) {
        (true, true) => "LinksAndCovers",
        (false, true) => "Links",
        (true, false) => "linksAndCovers",
        (false, false) => "links",
    }
}

// ============================================================================
// Attributes
// ============================================================================

/// Insert `attribute` directly above `member`, below any existing attributes.
///
/// No-op when the member already carries an identical attribute line.
pub fn add_attribute(text: &str, member: &str, attribute: &str) -> EditOutcome {
    let mut doc = TextLines::parse(text);
    let Some(member_line) = find_member_line(&doc.lines, member) else {
        return EditOutcome::unchanged(text);
    };
    let start = attribute_start(&doc.lines, member_line);
    if doc.lines[start..member_line]
        .iter()
        .any(|l| l.trim() == attribute.trim())
    {
        return EditOutcome::unchanged(text);
    }
    let indent = leading_whitespace(&doc.lines[member_line]).to_string();
    doc.lines
        .insert(member_line, format!("{indent}{}", attribute.trim()));
    EditOutcome::compare(text, doc.render())
}

/// Remove attribute lines above `member` equal to `attribute` (ignoring
/// indentation).
pub fn remove_attribute(text: &str, member: &str, attribute: &str) -> EditOutcome {
    let mut doc = TextLines::parse(text);
    let Some(member_line) = find_member_line(&doc.lines, member) else {
        return EditOutcome::unchanged(text);
    };
    let start = attribute_start(&doc.lines, member_line);
    let before = doc.lines.len();
    let mut idx = start;
    let mut end = member_line;
    while idx < end {
        if doc.lines[idx].trim() == attribute.trim() {
            doc.lines.remove(idx);
            end -= 1;
        } else {
            idx += 1;
        }
    }
    if doc.lines.len() == before {
        return EditOutcome::unchanged(text);
    }
    EditOutcome::compare(text, doc.render())
}

// ============================================================================
// Chained Calls
// ============================================================================

/// Find the `test()`/`it()` statement declaring `description`.
///
/// When several statements share the description, the one closest to
/// `line_hint` (1-indexed) wins.
pub fn find_test_statement(lines: &[String], description: &str, line_hint: u32) -> Option<(usize, usize)> {
    let hint = (line_hint as usize).saturating_sub(1);
    let mut best: Option<(usize, usize)> = None;
    for (idx, line) in lines.iter().enumerate() {
        for caps in TEST_CALL.captures_iter(line) {
            let literal = caps.get(1).or_else(|| caps.get(2));
            let Some(literal) = literal else { continue };
            let unescaped = literal.as_str().replace("\\'", "'").replace("\\\"", "\"");
            if unescaped != description {
                continue;
            }
            let Some(whole) = caps.get(0) else { continue };
            let Some(paren) = line[whole.start()..].find('(') else {
                continue;
            };
            let candidate = (idx, whole.start() + paren);
            let closer = best.is_none_or(|(b, _)| idx.abs_diff(hint) < b.abs_diff(hint));
            if closer {
                best = Some(candidate);
            }
        }
    }
    best
}

/// Append `call` to the chaining test statement declaring `description`,
/// right before its terminating `;`.
///
/// No-op when the statement already contains `call`.
pub fn add_chain_call(text: &str, description: &str, line_hint: u32, call: &str) -> EditOutcome {
    let mut doc = TextLines::parse(text);
    let Some(open) = find_test_statement(&doc.lines, description, line_hint) else {
        return EditOutcome::unchanged(text);
    };
    let Some(stmt) = find_call_statement(&doc.lines, open) else {
        return EditOutcome::unchanged(text);
    };
    if tail_text(&doc.lines, stmt.close, stmt.end).contains(call) {
        return EditOutcome::unchanged(text);
    }
    let (line, col) = stmt.end;
    doc.lines[line].insert_str(col, call);
    EditOutcome::compare(text, doc.render())
}

/// Remove `call` from the tail of the chaining test statement declaring
/// `description`. A line left empty by the removal is dropped.
pub fn remove_chain_call(text: &str, description: &str, line_hint: u32, call: &str) -> EditOutcome {
    let mut doc = TextLines::parse(text);
    let Some(open) = find_test_statement(&doc.lines, description, line_hint) else {
        return EditOutcome::unchanged(text);
    };
    let Some(stmt) = find_call_statement(&doc.lines, open) else {
        return EditOutcome::unchanged(text);
    };
    for idx in stmt.close.0..=stmt.end.0 {
        let from = if idx == stmt.close.0 { stmt.close.1 } else { 0 };
        let Some(pos) = doc.lines[idx][from..].find(call) else {
            continue;
        };
        let pos = from + pos;
        doc.lines[idx].replace_range(pos..pos + call.len(), "");
        if is_blank(&doc.lines[idx]) {
            doc.lines.remove(idx);
        }
        return EditOutcome::compare(text, doc.render());
    }
    EditOutcome::unchanged(text)
}

fn tail_text(lines: &[String], close: (usize, usize), end: (usize, usize)) -> String {
    let mut out = String::new();
    for idx in close.0..=end.0 {
        let line = &lines[idx];
        let from = if idx == close.0 { close.1 } else { 0 };
        let to = if idx == end.0 { end.1 } else { line.len() };
        out.push_str(&line[from..to]);
        out.push('\n');
    }
    out
}

// ============================================================================
// Tests
// ============================================================================
