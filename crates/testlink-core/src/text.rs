//! Line-oriented text utilities.
//!
//! All file mutation in testlink is line based. `TextLines` splits a file
//! into lines while remembering its line ending and whether it ended with a
//! newline, so that `render()` reproduces the original bytes exactly when no
//! line was touched.
//!
//! ## Coordinate Conventions
//!
//! - Line numbers reported to users are **1-indexed**
//! - Indices into `TextLines::lines` are **0-indexed**

// ============================================================================
// Edit Outcome
// ============================================================================

/// Result of a text-mutating operation.
///
/// `changed == false` guarantees `text` is byte-identical to the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditOutcome {
    /// The (possibly) updated text.
    pub text: String,
    /// Whether the text differs from the input.
    pub changed: bool,
}

impl EditOutcome {
    /// An outcome that leaves `text` untouched.
    pub fn unchanged(text: &str) -> Self {
        EditOutcome {
            text: text.to_string(),
            changed: false,
        }
    }

    /// Build an outcome, deriving `changed` by comparison with the original.
    pub fn compare(original: &str, text: String) -> Self {
        let changed = text != original;
        EditOutcome { text, changed }
    }
}

// ============================================================================
// Line Splitting
// ============================================================================

/// Line terminator used by a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    Lf,
    CrLf,
}

impl LineEnding {
    fn as_str(self) -> &'static str {
        match self {
            LineEnding::Lf => "\n",
            LineEnding::CrLf => "\r\n",
        }
    }
}

/// A file split into lines, reversible via [`TextLines::render`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextLines {
    /// Line contents without terminators.
    pub lines: Vec<String>,
    ending: LineEnding,
    trailing_newline: bool,
}

impl TextLines {
    /// Split `text` into lines.
    pub fn parse(text: &str) -> Self {
        let ending = if text.contains("\r\n") {
            LineEnding::CrLf
        } else {
            LineEnding::Lf
        };
        let trailing_newline = text.ends_with('\n');

        let lines = if text.is_empty() {
            Vec::new()
        } else {
            let body = text.strip_suffix('\n').unwrap_or(text);
            body.split('\n')
                .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
                .collect()
        };

        TextLines {
            lines,
            ending,
            trailing_newline,
        }
    }

    /// Join the lines back into file text.
    pub fn render(&self) -> String {
        let mut out = self.lines.join(self.ending.as_str());
        if self.trailing_newline && !self.lines.is_empty() {
            out.push_str(self.ending.as_str());
        }
        out
    }

    /// Number of lines.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Whether there are no lines.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

// ============================================================================
// Line Helpers
// ============================================================================

/// The leading whitespace (spaces and tabs) of a line.
pub fn leading_whitespace(line: &str) -> &str {
    let end = line
        .find(|c: char| c != ' ' && c != '\t')
        .unwrap_or(line.len());
    &line[..end]
}

/// Whether a line is a single-line metadata attribute (`#[...]`).
pub fn is_attribute_line(line: &str) -> bool {
    line.trim_start().starts_with("#[")
}

/// Whether a line is empty or whitespace only.
pub fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

/// Quote a value as a single-quoted source string literal.
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "\\'"))
}

/// Strip one layer of single or double quotes from a literal.
///
/// Returns `None` if `literal` is not a quoted string.
pub fn unquote(literal: &str) -> Option<String> {
    let literal = literal.trim();
    let bytes = literal.as_bytes();
    if bytes.len() < 2 {
        return None;
    }
    let quote = bytes[0];
    if (quote != b'\'' && quote != b'"') || bytes[bytes.len() - 1] != quote {
        return None;
    }
    let inner = &literal[1..literal.len() - 1];
    let escaped = if quote == b'\'' { "\\'" } else { "\\\"" };
    Some(inner.replace(escaped, &literal[..1]))
}

// ============================================================================
// Statement Scanning
// ============================================================================

/// Position of a character inside a [`TextLines`]: (line index, byte column).
pub type LinePos = (usize, usize);

/// Boundaries of a call statement such as `test('x', fn () {...})->links(...);`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallStatement {
    /// The `)` that closes the outermost call.
    pub close: LinePos,
    /// The `;` that terminates the statement.
    pub end: LinePos,
}

/// Find the extent of a call statement whose opening `(` is at `open`.
///
/// Tracks parenthesis depth while skipping string literals, `//` line
/// comments and `/* */` block comments.
pub fn find_call_statement(lines: &[String], open: LinePos) -> Option<CallStatement> {
    let mut depth = 0usize;
    let mut close = None;
    let mut in_block_comment = false;

    for (idx, line) in lines.iter().enumerate().skip(open.0) {
        let start_col = if idx == open.0 { open.1 } else { 0 };
        let bytes = line.as_bytes();
        let mut col = start_col;
        let mut in_string: Option<u8> = None;

        while col < bytes.len() {
            let b = bytes[col];
            if in_block_comment {
                if b == b'*' && bytes.get(col + 1) == Some(&b'/') {
                    in_block_comment = false;
                    col += 1;
                }
            } else if let Some(q) = in_string {
                if b == b'\\' {
                    col += 1;
                } else if b == q {
                    in_string = None;
                }
            } else {
                match b {
                    b'\'' | b'"' => in_string = Some(b),
                    b'/' if bytes.get(col + 1) == Some(&b'/') => break,
                    b'/' if bytes.get(col + 1) == Some(&b'*') => {
                        in_block_comment = true;
                        col += 1;
                    }
                    b'(' => depth += 1,
                    b')' => {
                        depth = depth.saturating_sub(1);
                        if depth == 0 && close.is_none() {
                            close = Some((idx, col));
                        }
                    }
                    b';' if depth == 0 => {
                        return close.map(|close| CallStatement {
                            close,
                            end: (idx, col),
                        });
                    }
                    _ => {}
                }
            }
            col += 1;
        }
    }
    None
}

/// Net change in brace depth contributed by one line.
///
/// Braces inside string literals and comments are ignored. `in_block_comment`
/// carries block-comment state across lines.
pub fn brace_delta(line: &str, in_block_comment: &mut bool) -> i32 {
    let bytes = line.as_bytes();
    let mut delta = 0;
    let mut col = 0;
    let mut in_string: Option<u8> = None;

    while col < bytes.len() {
        let b = bytes[col];
        if *in_block_comment {
            if b == b'*' && bytes.get(col + 1) == Some(&b'/') {
                *in_block_comment = false;
                col += 1;
            }
        } else if let Some(q) = in_string {
            if b == b'\\' {
                col += 1;
            } else if b == q {
                in_string = None;
            }
        } else {
            match b {
                b'\'' | b'"' => in_string = Some(b),
                b'/' if bytes.get(col + 1) == Some(&b'/') => break,
                b'#' if bytes.get(col + 1) != Some(&b'[') => break,
                b'/' if bytes.get(col + 1) == Some(&b'*') => {
                    *in_block_comment = true;
                    col += 1;
                }
                b'{' => delta += 1,
                b'}' => delta -= 1,
                _ => {}
            }
        }
        col += 1;
    }
    delta
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    mod text_lines_tests {
        use super::*;

        #[test]
        fn render_preserves_trailing_newline() {
            let text = "<?php\n\nclass A {}\n";
            assert_eq!(TextLines::parse(text).render(), text);
        }

        #[test]
        fn render_preserves_missing_trailing_newline() {
            let text = "line1\nline2";
            let lines = TextLines::parse(text);
            assert_eq!(lines.len(), 2);
            assert_eq!(lines.render(), text);
        }

        #[test]
        fn render_preserves_crlf() {
            let text = "a\r\nb\r\n";
            let lines = TextLines::parse(text);
            assert_eq!(lines.lines, vec!["a", "b"]);
            assert_eq!(lines.render(), text);
        }

        #[test]
        fn empty_text() {
            let lines = TextLines::parse("");
            assert!(lines.is_empty());
            assert_eq!(lines.render(), "");
        }
    }

    mod helper_tests {
        use super::*;

        #[test]
        fn leading_whitespace_spaces_and_tabs() {
            assert_eq!(leading_whitespace("    foo"), "    ");
            assert_eq!(leading_whitespace("\t\tfoo"), "\t\t");
            assert_eq!(leading_whitespace("foo"), "");
            assert_eq!(leading_whitespace("   "), "   ");
        }

        #[test]
        fn attribute_detection() {
            assert!(is_attribute_line("    #[Test]"));
            assert!(!is_attribute_line("    # comment"));
            assert!(!is_attribute_line("    public function a()"));
        }

        #[test]
        fn quote_and_unquote() {
            assert_eq!(quote("it's"), "'it\\'s'");
            assert_eq!(unquote("'it\\'s'").as_deref(), Some("it's"));
            assert_eq!(unquote("\"plain\"").as_deref(), Some("plain"));
            assert_eq!(unquote("Foo::class"), None);
            assert_eq!(unquote("'"), None);
        }
    }

    mod statement_tests {
        use super::*;

        fn lines(text: &str) -> Vec<String> {
            TextLines::parse(text).lines
        }

        #[test]
        fn single_line_statement() {
            let l = lines("test('a', fn () => true)->links(A::class.'::b');");
            let stmt = find_call_statement(&l, (0, 4)).unwrap();
            assert_eq!(stmt.close, (0, 23));
            assert_eq!(stmt.end.1, l[0].len() - 1);
        }

        #[test]
        fn multi_line_statement_ignores_strings_and_comments() {
            let l = lines(
                "test('has ) paren', function () {\n    // a ) comment\n    expect(1)->toBe(1);\n})->linksAndCovers(A::class.'::b');\n",
            );
            let stmt = find_call_statement(&l, (0, 4)).unwrap();
            assert_eq!(stmt.close, (3, 1));
            assert_eq!(stmt.end.0, 3);
        }

        #[test]
        fn unterminated_statement() {
            let l = lines("test('a', function () {\n");
            assert_eq!(find_call_statement(&l, (0, 4)), None);
        }

        #[test]
        fn brace_delta_skips_strings() {
            let mut in_comment = false;
            assert_eq!(brace_delta("class A {", &mut in_comment), 1);
            assert_eq!(brace_delta("  $x = '{';", &mut in_comment), 0);
            assert_eq!(brace_delta("}); // }", &mut in_comment), -1);
            assert_eq!(brace_delta("/* {", &mut in_comment), 0);
            assert!(in_comment);
            assert_eq!(brace_delta("} */ }", &mut in_comment), -1);
        }
    }
}
