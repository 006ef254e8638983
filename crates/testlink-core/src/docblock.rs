//! Format-preserving editor for `@see` cross-reference lines.
//!
//! Edits are scoped to the doc comment of one member. Everything outside
//! that comment, including line endings and the trailing newline, is left
//! byte-identical. Indentation of inserted lines is taken from the comment
//! being edited (or from the member line when a comment is synthesized), so
//! tab- and space-indented files both keep their style.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::model::normalize_reference;
use crate::text::{is_attribute_line, is_blank, leading_whitespace, EditOutcome, TextLines};

static SEE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:/\*\*)?\s*\*?\s*@see\s+([^\s*]+)").expect("see-line regex is valid")
});

const MODIFIERS: &str = r"(?:(?:abstract|final|public|protected|private|static|readonly)\s+)*";

// ============================================================================
// Location
// ============================================================================

/// Find the 0-indexed line declaring `function <member>(`.
///
/// Lookup is by name only; the first declaration in the file wins.
pub fn find_member_line(lines: &[String], member: &str) -> Option<usize> {
    let pattern = format!(
        r"^\s*{MODIFIERS}function\s+&?{}\s*\(",
        regex::escape(member)
    );
    let re = Regex::new(&pattern).ok()?;
    lines.iter().position(|line| re.is_match(line))
}

/// Line span of a doc comment, 0-indexed and inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocBlock {
    pub start: usize,
    pub end: usize,
}

impl DocBlock {
    /// `/** ... */` written on one line.
    pub fn is_single_line(&self) -> bool {
        self.start == self.end
    }
}

/// Find the doc comment attached to the member declared on `member_line`.
///
/// Walks upward over blank and attribute lines. Any other content before a
/// comment terminator means the member has no doc comment, as does a plain
/// `/* */` comment or a terminator whose body is not made of `*` lines.
pub fn find_doc_block(lines: &[String], member_line: usize) -> Option<DocBlock> {
    let mut idx = member_line;
    while idx > 0 {
        idx -= 1;
        let line = &lines[idx];
        if is_blank(line) || is_attribute_line(line) {
            continue;
        }
        let trimmed = line.trim();
        if !trimmed.ends_with("*/") {
            return None;
        }
        if trimmed.starts_with("/**") {
            return Some(DocBlock {
                start: idx,
                end: idx,
            });
        }
        if trimmed.starts_with("/*") {
            return None;
        }
        let end = idx;
        while idx > 0 {
            idx -= 1;
            let trimmed = lines[idx].trim_start();
            if trimmed.starts_with("/**") {
                return Some(DocBlock { start: idx, end });
            }
            // Only comment body lines may sit between the opener and `*/`.
            if !trimmed.starts_with('*') {
                return None;
            }
        }
        return None;
    }
    None
}

/// First line of the attribute stack directly above the member.
pub fn attribute_start(lines: &[String], member_line: usize) -> usize {
    let mut start = member_line;
    while start > 0 && is_attribute_line(&lines[start - 1]) {
        start -= 1;
    }
    start
}

fn see_target(line: &str) -> Option<&str> {
    SEE_LINE
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

fn is_separator(line: &str) -> bool {
    line.trim() == "*"
}

// ============================================================================
// Queries
// ============================================================================

/// Cross-reference targets in `member`'s doc comment, as written.
pub fn cross_refs_of(text: &str, member: &str) -> Vec<String> {
    let lines = TextLines::parse(text);
    let Some(member_line) = find_member_line(&lines.lines, member) else {
        return Vec::new();
    };
    let Some(block) = find_doc_block(&lines.lines, member_line) else {
        return Vec::new();
    };
    lines.lines[block.start..=block.end]
        .iter()
        .filter_map(|line| see_target(line).map(str::to_string))
        .collect()
}

/// Cross-reference targets with their 0-indexed line, for the doc comment
/// ending right above `member_line`.
pub fn cross_ref_lines(lines: &[String], member_line: usize) -> Vec<(usize, String)> {
    let Some(block) = find_doc_block(lines, member_line) else {
        return Vec::new();
    };
    (block.start..=block.end)
        .filter_map(|idx| see_target(&lines[idx]).map(|t| (idx, t.to_string())))
        .collect()
}

// ============================================================================
// Adding
// ============================================================================

/// Add `@see` lines for each target not already present in `member`'s doc
/// comment.
///
/// Targets are compared after stripping a leading `\`, both against the
/// existing comment and against each other. When nothing is novel, or the
/// member cannot be found, the text is returned unchanged.
pub fn add_cross_refs(text: &str, member: &str, targets: &[String]) -> EditOutcome {
    let mut doc = TextLines::parse(text);
    let Some(member_line) = find_member_line(&doc.lines, member) else {
        return EditOutcome::unchanged(text);
    };

    let block = find_doc_block(&doc.lines, member_line);
    let mut seen: HashSet<String> = block
        .map(|b| {
            doc.lines[b.start..=b.end]
                .iter()
                .filter_map(|l| see_target(l))
                .map(|t| normalize_reference(t).to_string())
                .collect()
        })
        .unwrap_or_default();
    let novel: Vec<&str> = targets
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty() && seen.insert(normalize_reference(t).to_string()))
        .collect();
    if novel.is_empty() {
        return EditOutcome::unchanged(text);
    }

    match block {
        Some(block) => {
            let block = expand_single_line(&mut doc.lines, block);
            let close = &doc.lines[block.end];
            let prefix = leading_whitespace(close).to_string();
            let mut insert = Vec::with_capacity(novel.len() + 1);
            let last = &doc.lines[block.end - 1];
            if block.end - 1 != block.start && !is_separator(last) && see_target(last).is_none() {
                insert.push(format!("{prefix}*"));
            }
            insert.extend(novel.iter().map(|t| format!("{prefix}* @see {t}")));
            doc.lines.splice(block.end..block.end, insert);
        }
        None => {
            let indent = leading_whitespace(&doc.lines[member_line]).to_string();
            let at = attribute_start(&doc.lines, member_line);
            let mut insert = Vec::with_capacity(novel.len() + 2);
            insert.push(format!("{indent}/**"));
            insert.extend(novel.iter().map(|t| format!("{indent} * @see {t}")));
            insert.push(format!("{indent} */"));
            doc.lines.splice(at..at, insert);
        }
    }

    EditOutcome::compare(text, doc.render())
}

/// Rewrite a single-line `/** text */` (or a closing line carrying content)
/// into the multi-line shape, returning the new span.
fn expand_single_line(lines: &mut Vec<String>, block: DocBlock) -> DocBlock {
    if block.is_single_line() {
        let line = &lines[block.start];
        let indent = leading_whitespace(line).to_string();
        let inner = line
            .trim()
            .trim_start_matches("/**")
            .trim_end_matches("*/")
            .trim()
            .to_string();
        let mut replacement = vec![format!("{indent}/**")];
        if !inner.is_empty() {
            replacement.push(format!("{indent} * {inner}"));
        }
        replacement.push(format!("{indent} */"));
        let len = replacement.len();
        lines.splice(block.start..=block.start, replacement);
        return DocBlock {
            start: block.start,
            end: block.start + len - 1,
        };
    }

    let close = lines[block.end].trim();
    if close == "*/" {
        return block;
    }
    let indent = leading_whitespace(&lines[block.start]).to_string();
    let content = lines[block.end]
        .trim_end()
        .trim_end_matches("*/")
        .trim_end()
        .to_string();
    lines.splice(
        block.end..=block.end,
        [content, format!("{indent} */")],
    );
    DocBlock {
        start: block.start,
        end: block.end + 1,
    }
}

// ============================================================================
// Removing
// ============================================================================

/// Remove `@see` lines whose normalized target is in `targets`.
pub fn remove_cross_refs(text: &str, member: &str, targets: &[String]) -> EditOutcome {
    let wanted: HashSet<&str> = targets.iter().map(|t| normalize_reference(t)).collect();
    remove_matching(text, member, |target| {
        wanted.contains(normalize_reference(target))
    })
}

/// Remove every `@see` line from `member`'s doc comment.
pub fn remove_all_cross_refs(text: &str, member: &str) -> EditOutcome {
    remove_matching(text, member, |_| true)
}

fn remove_matching(text: &str, member: &str, matches: impl Fn(&str) -> bool) -> EditOutcome {
    let mut doc = TextLines::parse(text);
    let Some(member_line) = find_member_line(&doc.lines, member) else {
        return EditOutcome::unchanged(text);
    };
    let Some(block) = find_doc_block(&doc.lines, member_line) else {
        return EditOutcome::unchanged(text);
    };

    if block.is_single_line() {
        let line = &doc.lines[block.start];
        return match see_target(line) {
            Some(target) if matches(target) => {
                doc.lines.remove(block.start);
                EditOutcome::compare(text, doc.render())
            }
            _ => EditOutcome::unchanged(text),
        };
    }

    let removed: Vec<usize> = (block.start + 1..block.end)
        .filter(|&idx| see_target(&doc.lines[idx]).is_some_and(&matches))
        .collect();
    if removed.is_empty() {
        return EditOutcome::unchanged(text);
    }

    let mut body: Vec<String> = (block.start + 1..block.end)
        .filter(|idx| !removed.contains(idx))
        .map(|idx| doc.lines[idx].clone())
        .collect();
    while body.last().is_some_and(|l| is_separator(l)) {
        body.pop();
    }

    let has_content = body.iter().any(|l| !is_separator(l) && !is_blank(l));
    let open_has_content = !doc.lines[block.start]
        .trim()
        .trim_start_matches("/**")
        .trim()
        .is_empty();
    let close_has_content = doc.lines[block.end].trim() != "*/";
    let replacement = if has_content || open_has_content || close_has_content {
        let mut lines = Vec::with_capacity(body.len() + 2);
        lines.push(doc.lines[block.start].clone());
        lines.extend(body);
        lines.push(doc.lines[block.end].clone());
        lines
    } else {
        Vec::new()
    };
    doc.lines.splice(block.start..=block.end, replacement);

    EditOutcome::compare(text, doc.render())
}

// ============================================================================
// Tests
// ============================================================================
