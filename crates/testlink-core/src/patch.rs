//! Per-file edit batches.
//!
//! Every change the orchestrator makes to one file is collected into a
//! [`FilePatch`] and applied as a single read-modify-write:
//!
//! - Line patches replace a known line (verified by content hash) with zero
//!   or more lines. They are applied bottom-to-top so earlier line numbers
//!   stay valid.
//! - Member edits are addressed by member name or test description and
//!   relocate their target in the current buffer, so they run after all line
//!   patches, in insertion order.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use crate::docblock::{add_cross_refs, remove_cross_refs};
use crate::resolver::qualify_cross_ref;
use crate::rewrite::{add_attribute, add_chain_call, remove_attribute, remove_chain_call};
use crate::text::{EditOutcome, TextLines};

/// Hash type for content verification (SHA-256, stored as hex string for JSON compatibility).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl ContentHash {
    /// Compute SHA-256 hash of the given bytes, returning hex-encoded string.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let result = hasher.finalize();
        ContentHash(hex::encode(result))
    }

    /// Hash of one line's text, without its terminator.
    pub fn of_line(line: &str) -> Self {
        Self::compute(line.as_bytes())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Why a file patch could not be applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    /// The line no longer has the content the patch was planned against.
    #[error("{path}:{line}: line changed since scan")]
    HashMismatch { path: String, line: u32 },

    /// The line does not exist in the current buffer.
    #[error("{path}:{line}: line out of bounds ({len} lines)")]
    LineOutOfBounds { path: String, line: u32, len: usize },

    /// Two line patches target the same line.
    #[error("{path}:{line}: overlapping line patches")]
    OverlappingLinePatches { path: String, line: u32 },
}

impl PatchError {
    /// File the error occurred in.
    pub fn path(&self) -> &str {
        match self {
            PatchError::HashMismatch { path, .. }
            | PatchError::LineOutOfBounds { path, .. }
            | PatchError::OverlappingLinePatches { path, .. } => path,
        }
    }
}

// ============================================================================
// Edits
// ============================================================================

/// Replace one line with zero or more lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinePatch {
    /// 1-indexed line number.
    pub line: u32,
    /// Hash of the line as scanned.
    pub expected: ContentHash,
    /// Lines written in its place; empty deletes the line.
    pub replacement: Vec<String>,
}

impl LinePatch {
    /// Plan a replacement for `current`, the text of `line` at scan time.
    pub fn replace(line: u32, current: &str, replacement: Vec<String>) -> Self {
        LinePatch {
            line,
            expected: ContentHash::of_line(current),
            replacement,
        }
    }

    /// Plan deletion of `line`.
    pub fn delete(line: u32, current: &str) -> Self {
        Self::replace(line, current, Vec::new())
    }
}

/// An edit addressed by member name or test description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MemberEdit {
    AddCrossRefs {
        member: String,
        targets: Vec<String>,
    },
    RemoveCrossRefs {
        member: String,
        targets: Vec<String>,
    },
    AddAttribute {
        member: String,
        attribute: String,
    },
    RemoveAttribute {
        member: String,
        attribute: String,
    },
    AddChainCall {
        description: String,
        line_hint: u32,
        call: String,
    },
    RemoveChainCall {
        description: String,
        line_hint: u32,
        call: String,
    },
    /// Rewrite a short `@see` target to its fully-qualified form.
    QualifyCrossRef {
        member: String,
        original: String,
        resolved: String,
        window: usize,
    },
}

impl MemberEdit {
    /// Apply to `text`, locating the target afresh.
    pub fn apply(&self, text: &str) -> EditOutcome {
        match self {
            MemberEdit::AddCrossRefs { member, targets } => add_cross_refs(text, member, targets),
            MemberEdit::RemoveCrossRefs { member, targets } => {
                remove_cross_refs(text, member, targets)
            }
            MemberEdit::AddAttribute { member, attribute } => {
                add_attribute(text, member, attribute)
            }
            MemberEdit::RemoveAttribute { member, attribute } => {
                remove_attribute(text, member, attribute)
            }
            MemberEdit::AddChainCall {
                description,
                line_hint,
                call,
            } => add_chain_call(text, description, *line_hint, call),
            MemberEdit::RemoveChainCall {
                description,
                line_hint,
                call,
            } => remove_chain_call(text, description, *line_hint, call),
            MemberEdit::QualifyCrossRef {
                member,
                original,
                resolved,
                window,
            } => qualify_cross_ref(text, member, original, resolved, *window),
        }
    }
}

// ============================================================================
// FilePatch
// ============================================================================

/// All planned edits for one file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePatch {
    pub path: String,
    pub line_patches: Vec<LinePatch>,
    pub member_edits: Vec<MemberEdit>,
}

impl FilePatch {
    pub fn new(path: impl Into<String>) -> Self {
        FilePatch {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.line_patches.is_empty() && self.member_edits.is_empty()
    }

    /// Queue a member edit, skipping exact repeats.
    pub fn push_member_edit(&mut self, edit: MemberEdit) {
        if !self.member_edits.contains(&edit) {
            self.member_edits.push(edit);
        }
    }

    /// Apply every edit to `text`.
    ///
    /// Line patches are verified against their hashes before any is applied,
    /// so a mismatch leaves the text untouched.
    pub fn apply(&self, text: &str) -> Result<EditOutcome, PatchError> {
        let mut doc = TextLines::parse(text);

        let mut patches: Vec<&LinePatch> = self.line_patches.iter().collect();
        patches.sort_by(|a, b| b.line.cmp(&a.line));
        for pair in patches.windows(2) {
            if pair[0].line == pair[1].line {
                return Err(PatchError::OverlappingLinePatches {
                    path: self.path.clone(),
                    line: pair[0].line,
                });
            }
        }
        for patch in &patches {
            let idx = (patch.line as usize).checked_sub(1);
            let current = idx.and_then(|i| doc.lines.get(i)).ok_or_else(|| {
                PatchError::LineOutOfBounds {
                    path: self.path.clone(),
                    line: patch.line,
                    len: doc.len(),
                }
            })?;
            if ContentHash::of_line(current) != patch.expected {
                return Err(PatchError::HashMismatch {
                    path: self.path.clone(),
                    line: patch.line,
                });
            }
        }
        for patch in &patches {
            let idx = patch.line as usize - 1;
            doc.lines
                .splice(idx..=idx, patch.replacement.iter().cloned());
        }

        let mut current = if patches.is_empty() {
            text.to_string()
        } else {
            doc.render()
        };
        for edit in &self.member_edits {
            let outcome = edit.apply(&current);
            if !outcome.changed {
                tracing::debug!(path = %self.path, ?edit, "member edit was a no-op");
            }
            current = outcome.text;
        }

        Ok(EditOutcome::compare(text, current))
    }
}

// ============================================================================
// EditPlan
// ============================================================================

/// File patches keyed by path, in deterministic order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditPlan {
    pub files: BTreeMap<String, FilePatch>,
}

impl EditPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Patch for `path`, created on first use.
    pub fn file_mut(&mut self, path: &str) -> &mut FilePatch {
        self.files
            .entry(path.to_string())
            .or_insert_with(|| FilePatch::new(path))
    }

    pub fn is_empty(&self) -> bool {
        self.files.values().all(FilePatch::is_empty)
    }

    /// Paths with at least one edit.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files
            .values()
            .filter(|p| !p.is_empty())
            .map(|p| p.path.as_str())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    mod content_hash_tests {
        use super::*;

        #[test]
        fn compute_is_hex_sha256() {
            let hash = ContentHash::compute(b"hello");
            assert_eq!(hash.0.len(), 64);
            assert_eq!(
                hash.0,
                "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
            );
        }

        #[test]
        fn line_hash_ignores_terminator() {
            assert_eq!(ContentHash::of_line("abc"), ContentHash::compute(b"abc"));
        }
    }

    mod file_patch_tests {
        use super::*;

        const TEXT: &str = "a\n    #[TestedBy('@A')]\nb\n    #[TestedBy('@B')]\n    public function create() {}\n";

        #[test]
        fn line_patches_apply_bottom_up() {
            let mut patch = FilePatch::new("src/A.php");
            patch.line_patches.push(LinePatch::replace(
                2,
                "    #[TestedBy('@A')]",
                vec!["    #[X]".to_string(), "    #[Y]".to_string()],
            ));
            patch
                .line_patches
                .push(LinePatch::delete(4, "    #[TestedBy('@B')]"));
            let out = patch.apply(TEXT).unwrap();
            assert_eq!(
                out.text,
                "a\n    #[X]\n    #[Y]\nb\n    public function create() {}\n"
            );
        }

        #[test]
        fn hash_mismatch_is_reported() {
            let mut patch = FilePatch::new("src/A.php");
            patch.line_patches.push(LinePatch::delete(1, "changed"));
            let err = patch.apply(TEXT).unwrap_err();
            assert_eq!(
                err,
                PatchError::HashMismatch {
                    path: "src/A.php".to_string(),
                    line: 1,
                }
            );
            assert_eq!(err.path(), "src/A.php");
        }

        #[test]
        fn out_of_bounds_is_reported() {
            let mut patch = FilePatch::new("src/A.php");
            patch.line_patches.push(LinePatch::delete(99, "x"));
            assert!(matches!(
                patch.apply(TEXT),
                Err(PatchError::LineOutOfBounds { line: 99, .. })
            ));
        }

        #[test]
        fn overlapping_patches_are_rejected() {
            let mut patch = FilePatch::new("src/A.php");
            patch.line_patches.push(LinePatch::delete(1, "a"));
            patch.line_patches.push(LinePatch::delete(1, "a"));
            assert!(matches!(
                patch.apply(TEXT),
                Err(PatchError::OverlappingLinePatches { .. })
            ));
        }

        #[test]
        fn member_edits_run_after_line_patches() {
            let mut patch = FilePatch::new("src/A.php");
            patch
                .line_patches
                .push(LinePatch::delete(4, "    #[TestedBy('@B')]"));
            patch.push_member_edit(MemberEdit::AddAttribute {
                member: "create".to_string(),
                attribute: "#[TestedBy('T', 'a')]".to_string(),
            });
            patch.push_member_edit(MemberEdit::AddCrossRefs {
                member: "create".to_string(),
                targets: vec!["\\T::a".to_string()],
            });
            let out = patch.apply(TEXT).unwrap();
            assert_eq!(
                out.text,
                "a\n    #[TestedBy('@A')]\nb\n    /**\n     * @see \\T::a\n     */\n    #[TestedBy('T', 'a')]\n    public function create() {}\n"
            );
        }

        #[test]
        fn repeated_member_edits_are_queued_once() {
            let mut patch = FilePatch::new("src/A.php");
            let edit = MemberEdit::AddCrossRefs {
                member: "create".to_string(),
                targets: vec!["\\T::a".to_string()],
            };
            patch.push_member_edit(edit.clone());
            patch.push_member_edit(edit);
            assert_eq!(patch.member_edits.len(), 1);
        }

        #[test]
        fn empty_patch_is_unchanged() {
            let out = FilePatch::new("src/A.php").apply(TEXT).unwrap();
            assert!(!out.changed);
            assert_eq!(out.text, TEXT);
        }
    }

    mod edit_plan_tests {
        use super::*;

        #[test]
        fn edits_group_by_path() {
            let mut plan = EditPlan::new();
            plan.file_mut("src/B.php").line_patches.push(LinePatch::delete(1, "x"));
            plan.file_mut("src/A.php").push_member_edit(MemberEdit::AddAttribute {
                member: "m".to_string(),
                attribute: "#[X]".to_string(),
            });
            plan.file_mut("src/B.php").line_patches.push(LinePatch::delete(2, "y"));
            let paths: Vec<_> = plan.paths().collect();
            assert_eq!(paths, vec!["src/A.php", "src/B.php"]);
            assert_eq!(plan.files["src/B.php"].line_patches.len(), 2);
            assert!(!plan.is_empty());
        }
    }
}
