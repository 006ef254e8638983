//! Sync orchestrator.
//!
//! Planning is pure: [`plan`] and [`plan_placeholders`] read a [`Catalog`]
//! together with the scanned text and produce an [`EditPlan`] plus the
//! actions that explain it. [`commit`] then applies the plan one file at a
//! time, either in memory (dry run) or to disk. Results are derived from the
//! plan and from which files the plan actually changes, so a dry run and a
//! real run report the same files and counts.
//!
//! ## Passes
//!
//! 1. **Forward**: a `#[TestedBy]` naming a test that does not link back
//!    gets the link added on the test side, in the test's dialect.
//! 2. **Reverse**: a test link to a method without the matching
//!    `#[TestedBy]` gets one added on the production side.
//! 3. **Cross-references**: every forward relation, declared or planned in
//!    pass 2, gets a `@see` to its test in the production doc comment.
//! 4. **Prune** (opt-in): links, forward relations and `@see` lines whose
//!    target type is loaded but whose member is gone are removed. Targets in
//!    types the scan never saw are left alone.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

use crate::config::Config;
use crate::error::TestlinkError;
use crate::model::{
    normalize_reference, Dialect, LinkOrigin, NameResolutionIssue, PlaceholderEntry,
    TestDeclaration, UnitId,
};
use crate::patch::{EditPlan, FilePatch, LinePatch, MemberEdit};
use crate::placeholder::{PlaceholderAction, PlaceholderIssue, PlaceholderResult};
use crate::registry::ValidationResult;
use crate::resolver::NameResolver;
use crate::rewrite::{
    render_link_attribute, render_link_call, render_link_statement, render_tested_by,
};
use crate::scan::Catalog;
use crate::text::{is_blank, leading_whitespace, TextLines};
use crate::workspace::SourceTree;

// ============================================================================
// Options
// ============================================================================

/// Flags of one sync run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncOptions {
    /// Compute and report the plan without writing.
    pub dry_run: bool,
    /// Remove links, forward relations and `@see` lines to deleted members.
    pub prune: bool,
    /// Confirms `prune`.
    pub force: bool,
}

impl SyncOptions {
    /// Reject a prune request that has not been confirmed.
    pub fn check(&self) -> Result<(), TestlinkError> {
        if self.prune && !self.force {
            return Err(TestlinkError::PruneNotConfirmed);
        }
        Ok(())
    }
}

// ============================================================================
// Plan
// ============================================================================

/// One planned change, reported alongside the edits that implement it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SyncAction {
    /// A test gains a link back to a method that names it.
    AddTestLink {
        test: UnitId,
        method: UnitId,
        dialect: Dialect,
        file: String,
    },
    /// A production method gains a `#[TestedBy]` for a test linking to it.
    AddForwardRelation {
        method: UnitId,
        test: UnitId,
        file: String,
    },
    /// A production doc comment gains a `@see` line.
    AddCrossRef {
        owner: UnitId,
        target: String,
        file: String,
    },
    /// A link to a deleted method is removed.
    PruneLink {
        test: UnitId,
        target: UnitId,
        file: String,
    },
    /// A `#[TestedBy]` naming a deleted test is removed.
    PruneForwardRelation {
        method: UnitId,
        test: UnitId,
        file: String,
    },
    /// A `@see` line to a deleted member is removed.
    PruneCrossRef {
        owner: UnitId,
        target: String,
        file: String,
    },
}

impl SyncAction {
    /// File the action edits.
    pub fn file(&self) -> &str {
        match self {
            SyncAction::AddTestLink { file, .. }
            | SyncAction::AddForwardRelation { file, .. }
            | SyncAction::AddCrossRef { file, .. }
            | SyncAction::PruneLink { file, .. }
            | SyncAction::PruneForwardRelation { file, .. }
            | SyncAction::PruneCrossRef { file, .. } => file,
        }
    }

    pub fn is_prune(&self) -> bool {
        matches!(
            self,
            SyncAction::PruneLink { .. }
                | SyncAction::PruneForwardRelation { .. }
                | SyncAction::PruneCrossRef { .. }
        )
    }
}

/// Output of [`plan`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncPlan {
    pub actions: Vec<SyncAction>,
    pub edits: EditPlan,
    pub warnings: Vec<String>,
}

impl SyncPlan {
    fn count(&self, pred: impl Fn(&SyncAction) -> bool) -> usize {
        self.actions.iter().filter(|a| pred(a)).count()
    }

    /// Links added on the test side.
    pub fn forward_actions(&self) -> usize {
        self.count(|a| matches!(a, SyncAction::AddTestLink { .. }))
    }

    /// Forward relations added on the production side.
    pub fn reverse_actions(&self) -> usize {
        self.count(|a| matches!(a, SyncAction::AddForwardRelation { .. }))
    }

    pub fn cross_ref_additions(&self) -> usize {
        self.count(|a| matches!(a, SyncAction::AddCrossRef { .. }))
    }

    pub fn cross_ref_removals(&self) -> usize {
        self.count(|a| matches!(a, SyncAction::PruneCrossRef { .. }))
    }

    /// Files touched by at least one prune action.
    pub fn pruned_files(&self) -> BTreeSet<&str> {
        self.actions
            .iter()
            .filter(|a| a.is_prune())
            .map(SyncAction::file)
            .collect()
    }
}

/// Plan a sync over a scanned tree.
///
/// `tree` supplies the scanned text used for name resolution and line
/// preconditions; nothing is read from disk and nothing is written.
pub fn plan(catalog: &Catalog, tree: &SourceTree, options: &SyncOptions) -> SyncPlan {
    let mut planner = Planner {
        catalog,
        tree,
        resolver: NameResolver::for_catalog(catalog),
        plan: SyncPlan::default(),
        planned: BTreeMap::new(),
        deleted_lines: HashSet::new(),
    };
    planner.forward();
    planner.reverse();
    planner.cross_refs();
    planner.prune(options.prune);

    tracing::debug!(
        actions = planner.plan.actions.len(),
        files = planner.plan.edits.paths().count(),
        warnings = planner.plan.warnings.len(),
        "planned sync"
    );
    planner.plan
}

struct Planner<'a> {
    catalog: &'a Catalog,
    tree: &'a SourceTree,
    resolver: NameResolver,
    plan: SyncPlan,
    /// Forward relations added by the reverse pass, per production method.
    planned: BTreeMap<UnitId, Vec<UnitId>>,
    /// Lines already queued for deletion, per file.
    deleted_lines: HashSet<(String, u32)>,
}

impl Planner<'_> {
    fn warn(&mut self, file: &str, line: u32, message: String) {
        tracing::warn!(file, line, "{message}");
        self.plan.warnings.push(format!("{file}:{line}: {message}"));
    }

    fn warn_missing(&mut self, file: &str, line: u32) {
        self.warn(
            file,
            line,
            "file is not in the source tree; names were not resolved".to_string(),
        );
    }

    fn edit(&mut self, file: &str, edit: MemberEdit) {
        self.plan.edits.file_mut(file).push_member_edit(edit);
    }

    fn forward(&mut self) {
        let catalog = self.catalog;
        for production in &catalog.productions {
            let method = production.id();
            for relation in &production.forward_relations {
                let test_id = relation.test_id();
                let Some(test) = catalog.test(&test_id) else {
                    // Stale relations are reported by the prune pass.
                    if !catalog.is_stale(&relation.test_type, &relation.test_member) {
                        self.warn(
                            &production.file,
                            relation.line,
                            format!("{method} names {test_id}, which the scan did not find"),
                        );
                    }
                    continue;
                };
                if test.links_to(&method) {
                    continue;
                }
                let edit = match &test.declaration {
                    TestDeclaration::Annotation { method: name } => MemberEdit::AddAttribute {
                        member: name.clone(),
                        attribute: render_link_attribute(
                            &production.type_name,
                            &production.member,
                            true,
                        ),
                    },
                    TestDeclaration::Chaining { description, .. } => MemberEdit::AddChainCall {
                        description: description.clone(),
                        line_hint: test.line,
                        call: render_link_call(&production.type_name, &production.member, true),
                    },
                };
                self.edit(&test.file, edit);
                self.plan.actions.push(SyncAction::AddTestLink {
                    test: test_id,
                    method: method.clone(),
                    dialect: test.dialect(),
                    file: test.file.clone(),
                });
            }
        }
    }

    fn reverse(&mut self) {
        let catalog = self.catalog;
        for test in &catalog.tests {
            let test_id = test.id();
            for link in &test.links {
                let method = link.target_id();
                let Some(production) = catalog.production(&method) else {
                    continue;
                };
                if production.has_forward_relation(&test_id) {
                    continue;
                }
                let planned = self.planned.entry(method.clone()).or_default();
                if planned.contains(&test_id) {
                    continue;
                }
                planned.push(test_id.clone());
                self.edit(
                    &production.file,
                    MemberEdit::AddAttribute {
                        member: production.member.clone(),
                        attribute: render_tested_by(&test.type_name, &test.member(), test.dialect()),
                    },
                );
                self.plan.actions.push(SyncAction::AddForwardRelation {
                    method,
                    test: test_id.clone(),
                    file: production.file.clone(),
                });
            }
        }
    }

    fn cross_refs(&mut self) {
        let (catalog, tree) = (self.catalog, self.tree);
        for production in &catalog.productions {
            let method = production.id();
            let Some(text) = tree.text(&production.file) else {
                self.warn_missing(&production.file, production.line);
                continue;
            };
            let mut present: HashSet<String> = HashSet::new();
            for entry in catalog.cross_refs_for(&method) {
                let resolved = self
                    .resolver
                    .resolve(&entry.file, text, &entry.target)
                    .unwrap_or_else(|_| entry.target.clone());
                present.insert(normalize_reference(&resolved).to_string());
            }

            let declared = production.forward_relations.iter().map(|fr| fr.test_id());
            let planned = self.planned.get(&method).into_iter().flatten().cloned();
            let mut targets = Vec::new();
            for test_id in declared.chain(planned) {
                let Some(test) = catalog.test(&test_id) else {
                    continue;
                };
                let target = test.reference();
                if present.insert(normalize_reference(&target).to_string()) {
                    targets.push(target);
                }
            }
            if targets.is_empty() {
                continue;
            }

            for target in &targets {
                self.plan.actions.push(SyncAction::AddCrossRef {
                    owner: method.clone(),
                    target: target.clone(),
                    file: production.file.clone(),
                });
            }
            self.edit(
                &production.file,
                MemberEdit::AddCrossRefs {
                    member: production.member.clone(),
                    targets,
                },
            );
        }
    }

    fn prune(&mut self, enabled: bool) {
        let (catalog, tree) = (self.catalog, self.tree);
        let hint = "run sync with --prune --force to remove it";

        for production in &catalog.productions {
            let method = production.id();
            for relation in &production.forward_relations {
                if !catalog.is_stale(&relation.test_type, &relation.test_member) {
                    continue;
                }
                if !enabled {
                    self.warn(
                        &production.file,
                        relation.line,
                        format!("{method} names deleted test {}; {hint}", relation.test_id()),
                    );
                    continue;
                }
                self.edit(
                    &production.file,
                    MemberEdit::RemoveAttribute {
                        member: production.member.clone(),
                        attribute: relation.raw.clone(),
                    },
                );
                self.plan.actions.push(SyncAction::PruneForwardRelation {
                    method: method.clone(),
                    test: relation.test_id(),
                    file: production.file.clone(),
                });
            }
        }

        for test in &catalog.tests {
            let test_id = test.id();
            for link in &test.links {
                if !catalog.is_stale(&link.target_type, &link.target_member) {
                    continue;
                }
                if !enabled {
                    self.warn(
                        &test.file,
                        link.line,
                        format!("{test_id} links deleted method {}; {hint}", link.target_id()),
                    );
                    continue;
                }
                let planned = match (link.origin, &test.declaration) {
                    (LinkOrigin::Attribute, TestDeclaration::Annotation { method }) => {
                        self.edit(
                            &test.file,
                            MemberEdit::RemoveAttribute {
                                member: method.clone(),
                                attribute: link.raw.clone(),
                            },
                        );
                        true
                    }
                    (LinkOrigin::Call, TestDeclaration::Chaining { description, .. }) => {
                        self.edit(
                            &test.file,
                            MemberEdit::RemoveChainCall {
                                description: description.clone(),
                                line_hint: test.line,
                                call: link.raw.clone(),
                            },
                        );
                        true
                    }
                    (LinkOrigin::Call, TestDeclaration::Annotation { .. }) => {
                        self.delete_statement(&test.file, link.line, &link.raw)
                    }
                    (LinkOrigin::Attribute, TestDeclaration::Chaining { .. }) => false,
                };
                if planned {
                    self.plan.actions.push(SyncAction::PruneLink {
                        test: test_id.clone(),
                        target: link.target_id(),
                        file: test.file.clone(),
                    });
                }
            }
        }

        for entry in &catalog.cross_refs {
            let Some(text) = tree.text(&entry.file) else {
                self.warn_missing(&entry.file, entry.line);
                continue;
            };
            let resolved = self
                .resolver
                .resolve(&entry.file, text, &entry.target)
                .unwrap_or_else(|_| entry.target.clone());
            let Some(target) = UnitId::parse(&resolved) else {
                continue;
            };
            if !catalog.is_stale(target.type_name(), target.member()) {
                continue;
            }
            if !enabled {
                self.warn(
                    &entry.file,
                    entry.line,
                    format!("@see {} points at a deleted member; {hint}", entry.target),
                );
                continue;
            }
            self.edit(
                &entry.file,
                MemberEdit::RemoveCrossRefs {
                    member: entry.owner.member().to_string(),
                    targets: vec![entry.target.clone()],
                },
            );
            self.plan.actions.push(SyncAction::PruneCrossRef {
                owner: entry.owner.clone(),
                target: entry.target.clone(),
                file: entry.file.clone(),
            });
        }
    }

    /// Queue deletion of a `links(...);` statement that sits alone on its
    /// line.
    fn delete_statement(&mut self, file: &str, line: u32, raw: &str) -> bool {
        let Some(current) = line_text(self.tree, file, line) else {
            return false;
        };
        if current.trim() != format!("{raw};") {
            self.warn(
                file,
                line,
                format!("cannot prune '{raw}': the statement shares its line"),
            );
            return false;
        }
        if self.deleted_lines.insert((file.to_string(), line)) {
            self.plan
                .edits
                .file_mut(file)
                .line_patches
                .push(LinePatch::delete(line, &current));
        }
        true
    }
}

fn line_text(tree: &SourceTree, file: &str, line: u32) -> Option<String> {
    let idx = (line as usize).checked_sub(1)?;
    TextLines::parse(tree.text(file)?).lines.into_iter().nth(idx)
}

// ============================================================================
// Placeholder Planning
// ============================================================================

/// File edits that replace placeholder markers with concrete declarations.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlaceholderPlan {
    pub edits: EditPlan,
    pub warnings: Vec<String>,
}

/// How a marker is written, which decides how it is replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MarkerForm {
    /// `#[TestedBy('@A')]`, `#[Links('@A')]`: one line per counterpart.
    Attribute,
    /// `->links('@A')`: replaced in place by one call per counterpart.
    Chained,
    /// `links('@A');` in a test body.
    Statement,
}

impl MarkerForm {
    fn of(raw: &str) -> Self {
        if raw.starts_with("#[") {
            MarkerForm::Attribute
        } else if raw.starts_with("->") {
            MarkerForm::Chained
        } else {
            MarkerForm::Statement
        }
    }
}

/// Replacements collected for one marker.
#[derive(Debug)]
struct Marker {
    raw: String,
    form: MarkerForm,
    renders: Vec<String>,
}

#[derive(Debug, Default)]
struct MarkerEdits {
    /// Keyed by (file, 1-indexed line).
    lines: BTreeMap<(String, u32), Vec<Marker>>,
    member_edits: BTreeMap<String, Vec<MemberEdit>>,
}

impl MarkerEdits {
    /// Record `render` as a replacement for `entry`'s marker. An empty
    /// render list removes the marker.
    fn replace(&mut self, entry: &PlaceholderEntry, render: Option<String>) {
        let markers = self
            .lines
            .entry((entry.file.clone(), entry.line))
            .or_default();
        let idx = match markers.iter().position(|m| m.raw == entry.raw) {
            Some(idx) => idx,
            None => {
                markers.push(Marker {
                    raw: entry.raw.clone(),
                    form: MarkerForm::of(&entry.raw),
                    renders: Vec::new(),
                });
                markers.len() - 1
            }
        };
        if let Some(render) = render {
            if !markers[idx].renders.contains(&render) {
                markers[idx].renders.push(render);
            }
        }
    }

    fn add_cross_ref(&mut self, file: &str, member: &str, target: String) {
        let edits = self.member_edits.entry(file.to_string()).or_default();
        for edit in edits.iter_mut() {
            if let MemberEdit::AddCrossRefs {
                member: existing,
                targets,
            } = edit
            {
                if existing == member {
                    if !targets.contains(&target) {
                        targets.push(target);
                    }
                    return;
                }
            }
        }
        edits.push(MemberEdit::AddCrossRefs {
            member: member.to_string(),
            targets: vec![target],
        });
    }
}

/// Convert resolved placeholder actions into file edits.
///
/// Each marker line is replaced by the concrete declarations for all of its
/// counterparts: attribute lines for attribute markers, chained calls on the
/// same line for chained markers, statements for body markers. Doubled-sigil
/// markers are removed and a `@see` line to each counterpart is added to the
/// owning member instead.
pub fn plan_placeholders(
    result: &PlaceholderResult,
    catalog: &Catalog,
    tree: &SourceTree,
) -> PlaceholderPlan {
    let mut collected = MarkerEdits::default();
    for action in &result.actions {
        plan_production_side(action, catalog, &mut collected);
        plan_test_side(action, &mut collected);
    }

    let mut out = PlaceholderPlan::default();
    let mut texts: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for ((file, line), markers) in &collected.lines {
        if !texts.contains_key(file.as_str()) {
            let Some(text) = tree.text(file) else {
                out.warnings
                    .push(format!("{file}: not in the scanned tree; markers left as-is"));
                continue;
            };
            texts.insert(file.as_str(), TextLines::parse(text).lines);
        }
        let lines = &texts[file.as_str()];
        let Some(current) = (*line as usize).checked_sub(1).and_then(|i| lines.get(i)) else {
            out.warnings
                .push(format!("{file}:{line}: marker line is out of range"));
            continue;
        };
        let replacement = substitute(current, markers);
        out.edits
            .file_mut(file)
            .line_patches
            .push(LinePatch::replace(*line, current, replacement));
    }
    for (file, edits) in collected.member_edits {
        let patch: &mut FilePatch = out.edits.file_mut(&file);
        for edit in edits {
            patch.push_member_edit(edit);
        }
    }

    tracing::debug!(
        actions = result.actions.len(),
        files = out.edits.paths().count(),
        "planned placeholder resolution"
    );
    out
}

fn plan_production_side(action: &PlaceholderAction, catalog: &Catalog, out: &mut MarkerEdits) {
    let entry = &action.production;
    if action.production_uses_see {
        let target = catalog
            .test(&action.test.owner)
            .map_or_else(|| format!("\\{}", action.test.owner), |t| t.reference());
        out.replace(entry, None);
        out.add_cross_ref(&entry.file, &action.production_member, target);
    } else {
        out.replace(
            entry,
            Some(render_tested_by(
                &action.test_class,
                &action.test_member,
                action.dialect,
            )),
        );
    }
}

fn plan_test_side(action: &PlaceholderAction, out: &mut MarkerEdits) {
    let entry = &action.test;
    if action.test_uses_see {
        out.replace(entry, None);
        out.add_cross_ref(
            &entry.file,
            &action.test_member,
            format!(
                "\\{}::{}",
                normalize_reference(&action.production_class),
                action.production_member
            ),
        );
        return;
    }
    let (class, member, cov) = (
        &action.production_class,
        &action.production_member,
        action.with_coverage,
    );
    let render = match MarkerForm::of(&entry.raw) {
        MarkerForm::Attribute => render_link_attribute(class, member, cov),
        MarkerForm::Chained => render_link_call(class, member, cov),
        MarkerForm::Statement => render_link_statement(class, member, cov),
    };
    out.replace(entry, Some(render));
}

/// Replacement lines for one marker line.
fn substitute(current: &str, markers: &[Marker]) -> Vec<String> {
    let indent = leading_whitespace(current);
    let whole_line = markers.iter().any(|m| match m.form {
        MarkerForm::Attribute => true,
        MarkerForm::Statement => current.trim() == format!("{};", m.raw),
        MarkerForm::Chained => false,
    });
    if whole_line {
        return markers
            .iter()
            .flat_map(|m| m.renders.iter().map(move |r| format!("{indent}{r}")))
            .collect();
    }

    let mut line = current.to_string();
    for marker in markers {
        match marker.form {
            MarkerForm::Statement if marker.renders.is_empty() => {
                line = line.replacen(&format!("{};", marker.raw), "", 1);
            }
            MarkerForm::Statement => {
                let joined = marker
                    .renders
                    .iter()
                    .map(|r| r.trim_end_matches(';'))
                    .collect::<Vec<_>>()
                    .join("; ");
                line = line.replacen(&marker.raw, &joined, 1);
            }
            _ => {
                line = line.replacen(&marker.raw, &marker.renders.concat(), 1);
            }
        }
    }
    if is_blank(&line) {
        Vec::new()
    } else {
        vec![line]
    }
}

// ============================================================================
// Commit
// ============================================================================

/// Files a commit changed and the failures it collected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommitOutcome {
    pub modified_files: Vec<String>,
    pub errors: Vec<String>,
}

/// Apply `edits` file by file.
///
/// Each file is read once, every edit aimed at it is applied to that
/// buffer, and the result is written once. A dry run applies the same edits
/// to the scanned text and writes nothing. Failures are collected per file;
/// the file is left untouched and the remaining files proceed.
pub fn commit(tree: &mut SourceTree, edits: &EditPlan, dry_run: bool) -> CommitOutcome {
    let mut outcome = CommitOutcome::default();
    for patch in edits.files.values().filter(|p| !p.is_empty()) {
        match commit_file(tree, patch, dry_run) {
            Ok(true) => outcome.modified_files.push(patch.path.clone()),
            Ok(false) => {
                tracing::debug!(path = %patch.path, "edits left file unchanged");
            }
            Err(err) => {
                tracing::warn!(path = %patch.path, error = %err, "failed to apply edits");
                outcome.errors.push(err.to_string());
            }
        }
    }
    tracing::info!(
        modified = outcome.modified_files.len(),
        errors = outcome.errors.len(),
        dry_run,
        "commit complete"
    );
    outcome
}

fn commit_file(
    tree: &mut SourceTree,
    patch: &FilePatch,
    dry_run: bool,
) -> Result<bool, TestlinkError> {
    let text = if dry_run {
        tree.text(&patch.path)
            .map(str::to_string)
            .ok_or_else(|| TestlinkError::file_not_found(patch.path.as_str()))?
    } else {
        tree.read_current(&patch.path)?
    };
    let outcome = patch.apply(&text)?;
    if !outcome.changed {
        return Ok(false);
    }
    if !dry_run {
        tree.write(&patch.path, &outcome.text)?;
    }
    Ok(true)
}

// ============================================================================
// Reports
// ============================================================================

/// Result of a sync run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncResult {
    pub modified_files: Vec<String>,
    pub pruned_files: Vec<String>,
    pub cross_ref_additions: usize,
    pub cross_ref_removals: usize,
    pub reverse_actions: usize,
    pub forward_actions: usize,
    pub actions: Vec<SyncAction>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub dry_run: bool,
}

impl SyncResult {
    fn new(plan: SyncPlan, commit: CommitOutcome, dry_run: bool) -> Self {
        let pruned = plan.pruned_files();
        let pruned_files = commit
            .modified_files
            .iter()
            .filter(|f| pruned.contains(f.as_str()))
            .cloned()
            .collect();
        SyncResult {
            cross_ref_additions: plan.cross_ref_additions(),
            cross_ref_removals: plan.cross_ref_removals(),
            reverse_actions: plan.reverse_actions(),
            forward_actions: plan.forward_actions(),
            modified_files: commit.modified_files,
            pruned_files,
            actions: plan.actions,
            warnings: plan.warnings,
            errors: commit.errors,
            dry_run,
        }
    }
}

/// Result of a validation run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidateReport {
    pub validation: ValidationResult,
    pub placeholder_errors: Vec<PlaceholderIssue>,
    pub placeholder_warnings: Vec<PlaceholderIssue>,
    pub name_issues: Vec<NameResolutionIssue>,
    /// Scan warnings (unreadable files, malformed declarations).
    pub warnings: Vec<String>,
}

impl ValidateReport {
    /// Links and forward relations agree and every placeholder resolves.
    pub fn is_valid(&self) -> bool {
        self.validation.is_valid() && self.placeholder_errors.is_empty()
    }
}

/// Result of placeholder pairing.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PairReport {
    pub result: PlaceholderResult,
    pub summary: Vec<String>,
    pub modified_files: Vec<String>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub dry_run: bool,
}

/// Result of qualifying short `@see` references.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FixReport {
    pub issues: Vec<NameResolutionIssue>,
    pub fixed: usize,
    pub unfixable: usize,
    pub modified_files: Vec<String>,
    pub errors: Vec<String>,
    pub dry_run: bool,
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Entry point for the four operations over one source tree.
///
/// Every operation rescans the tree it holds, so successive calls see the
/// edits of earlier ones.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    config: Config,
    tree: SourceTree,
}

impl Orchestrator {
    pub fn new(config: Config, tree: SourceTree) -> Self {
        Orchestrator { config, tree }
    }

    /// Load configuration and source files under `root`.
    ///
    /// `config_path` overrides the `testlink.toml` lookup in `root`.
    pub fn open(root: &Path, config_path: Option<&Path>) -> Result<Self, TestlinkError> {
        let config = match config_path {
            Some(path) => Config::load(path)?,
            None => Config::load_from_root(root)?,
        };
        let tree = SourceTree::load(root, &config.paths)?;
        Ok(Self::new(config, tree))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn tree(&self) -> &SourceTree {
        &self.tree
    }

    /// Scan the current tree.
    pub fn catalog(&self) -> Catalog {
        Catalog::scan(&self.tree)
    }

    /// Check link consistency, placeholders and `@see` qualification.
    pub fn validate(&self) -> ValidateReport {
        let catalog = self.catalog();
        let placeholders = catalog.placeholder_registry().resolve_all();
        let name_issues = NameResolver::for_catalog(&catalog).check(&catalog, &self.tree);
        ValidateReport {
            validation: catalog.validate(),
            placeholder_errors: placeholders.errors,
            placeholder_warnings: placeholders.warnings,
            name_issues,
            warnings: catalog.warnings,
        }
    }

    /// Synchronize forward and reverse relations and their `@see` lines.
    pub fn sync(&mut self, options: &SyncOptions) -> Result<SyncResult, TestlinkError> {
        options.check()?;
        let catalog = self.catalog();
        let mut planned = plan(&catalog, &self.tree, options);
        let mut warnings = catalog.warnings;
        warnings.append(&mut planned.warnings);
        planned.warnings = warnings;
        let outcome = commit(&mut self.tree, &planned.edits, options.dry_run);
        Ok(SyncResult::new(planned, outcome, options.dry_run))
    }

    /// Resolve placeholder markers, all of them or the one named.
    pub fn pair(
        &mut self,
        placeholder: Option<&str>,
        dry_run: bool,
    ) -> Result<PairReport, TestlinkError> {
        let catalog = self.catalog();
        let registry = catalog.placeholder_registry();
        let result = match placeholder {
            Some(id) => registry.resolve_one(id)?,
            None => registry.resolve_all(),
        };
        let planned = plan_placeholders(&result, &catalog, &self.tree);
        let outcome = commit(&mut self.tree, &planned.edits, dry_run);
        Ok(PairReport {
            summary: result.summary(),
            result,
            modified_files: outcome.modified_files,
            warnings: planned.warnings,
            errors: outcome.errors,
            dry_run,
        })
    }

    /// Rewrite short `@see` targets to their fully-qualified form.
    pub fn fix_refs(&mut self, dry_run: bool) -> FixReport {
        let catalog = self.catalog();
        let issues = NameResolver::for_catalog(&catalog).check(&catalog, &self.tree);
        let window = self.config.resolver.fix_window;

        let mut edits = EditPlan::new();
        for issue in issues.iter().filter(|i| i.fixable) {
            let Some(resolved) = &issue.resolved else {
                continue;
            };
            edits
                .file_mut(&issue.file)
                .push_member_edit(MemberEdit::QualifyCrossRef {
                    member: issue.owner.member().to_string(),
                    original: issue.original.clone(),
                    resolved: resolved.clone(),
                    window,
                });
        }
        let outcome = commit(&mut self.tree, &edits, dry_run);

        let fixed = issues
            .iter()
            .filter(|i| i.fixable && outcome.modified_files.contains(&i.file))
            .count();
        FixReport {
            unfixable: issues.iter().filter(|i| !i.fixable).count(),
            fixed,
            issues,
            modified_files: outcome.modified_files,
            errors: outcome.errors,
            dry_run,
        }
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

class UserService
{
    #[TestedBy(UserServiceTest::class, 'testCreate')]
    public function create(): void
    {
    }

    public function update(): void
    {
    }

    #[TestedBy(UserServiceTest::class, 'testRemoved')]
    public function delete(): void
    {
    }
}
";

    const TEST: &str = r"<?php

namespace Tests\Unit;

use App\UserService;

class UserServiceTest
{
    public function testCreate(): void
    {
    }

    #[LinksAndCovers(UserService::class, 'update')]
    public function testUpdate(): void
    {
    }

    #[Links(UserService::class, 'archive')]
    public function testArchive(): void
    {
        links(UserService::class, 'purge');
    }
}
";

    fn tree() -> SourceTree {
        SourceTree::in_memory(
            &PathsConfig::default(),
            [
                ("src/UserService.php", PRODUCTION),
                ("tests/Unit/UserServiceTest.php", TEST),
            ],
        )
    }

    fn orchestrator(tree: SourceTree) -> Orchestrator {
        Orchestrator::new(Config::default(), tree)
    }

    mod plan_tests {
        use super::*;

        #[test]
        fn forward_reverse_and_cross_refs() {
            let tree = tree();
            let catalog = Catalog::scan(&tree);
            let plan = plan(&catalog, &tree, &SyncOptions::default());

            assert_eq!(plan.forward_actions(), 1);
            assert_eq!(plan.reverse_actions(), 1);
            assert_eq!(plan.cross_ref_additions(), 2);
            assert!(plan.actions.contains(&SyncAction::AddTestLink {
                test: UnitId::new("Tests\\Unit\\UserServiceTest", "testCreate"),
                method: UnitId::new("App\\UserService", "create"),
                dialect: Dialect::Annotation,
                file: "tests/Unit/UserServiceTest.php".to_string(),
            }));
            assert!(plan.actions.contains(&SyncAction::AddForwardRelation {
                method: UnitId::new("App\\UserService", "update"),
                test: UnitId::new("Tests\\Unit\\UserServiceTest", "testUpdate"),
                file: "src/UserService.php".to_string(),
            }));
        }

        #[test]
        fn stale_targets_warn_without_prune() {
            let tree = tree();
            let catalog = Catalog::scan(&tree);
            let plan = plan(&catalog, &tree, &SyncOptions::default());
            assert!(!plan.actions.iter().any(SyncAction::is_prune));
            assert_eq!(
                plan.warnings
                    .iter()
                    .filter(|w| w.contains("--prune --force"))
                    .count(),
                3
            );
        }

        #[test]
        fn file_missing_from_tree_is_warned() {
            let catalog = Catalog::scan(&tree());
            let partial = SourceTree::in_memory(
                &PathsConfig::default(),
                [("tests/Unit/UserServiceTest.php", TEST)],
            );
            let plan = plan(&catalog, &partial, &SyncOptions::default());
            assert!(plan.warnings.iter().any(|w| {
                w.starts_with("src/UserService.php:") && w.contains("not in the source tree")
            }));
            assert_eq!(plan.cross_ref_additions(), 0);
        }

        #[test]
        fn prune_plans_each_stale_declaration() {
            let tree = tree();
            let catalog = Catalog::scan(&tree);
            let options = SyncOptions {
                prune: true,
                force: true,
                ..Default::default()
            };
            let plan = plan(&catalog, &tree, &options);
            let prunes: Vec<_> = plan.actions.iter().filter(|a| a.is_prune()).collect();
            assert_eq!(prunes.len(), 3);
            let pruned: Vec<_> = plan.pruned_files().into_iter().collect();
            assert_eq!(
                pruned,
                vec!["src/UserService.php", "tests/Unit/UserServiceTest.php"]
            );
            let test_patch = &plan.edits.files["tests/Unit/UserServiceTest.php"];
            assert_eq!(test_patch.line_patches.len(), 1);
            assert_eq!(test_patch.line_patches[0].line, 21);
        }

        #[test]
        fn existing_short_cross_ref_is_not_duplicated() {
            let production = PRODUCTION.replace(
                "    #[TestedBy(UserServiceTest::class, 'testCreate')]",
                "    /**\n     * @see UserServiceTest::testCreate\n     */\n    #[TestedBy(UserServiceTest::class, 'testCreate')]",
            );
            let tree = SourceTree::in_memory(
                &PathsConfig::default(),
                [
                    ("src/UserService.php", production.as_str()),
                    ("tests/Unit/UserServiceTest.php", TEST),
                ],
            );
            let catalog = Catalog::scan(&tree);
            let plan = plan(&catalog, &tree, &SyncOptions::default());
            assert_eq!(plan.cross_ref_additions(), 1);
        }
    }

    mod commit_tests {
        use super::*;

        #[test]
        fn apply_makes_tree_consistent() {
            let mut orch = orchestrator(tree());
            let options = SyncOptions {
                prune: true,
                force: true,
                ..Default::default()
            };
            let result = orch.sync(&options).unwrap();
            assert!(result.errors.is_empty());
            assert_eq!(result.modified_files.len(), 2);

            let report = orch.validate();
            assert!(report.validation.is_valid(), "{:?}", report.validation);
            let test_text = orch.tree().text("tests/Unit/UserServiceTest.php").unwrap();
            assert!(!test_text.contains("archive"));
            assert!(!test_text.contains("purge"));
            assert!(test_text.contains(
                "    #[LinksAndCovers(\\App\\UserService::class, 'create')]\n    public function testCreate(): void"
            ));
            let production = orch.tree().text("src/UserService.php").unwrap();
            assert!(!production.contains("testRemoved"));
            assert!(production.contains("     * @see \\Tests\\Unit\\UserServiceTest::testUpdate\n"));
        }

        #[test]
        fn second_sync_is_a_no_op() {
            let mut orch = orchestrator(tree());
            orch.sync(&SyncOptions::default()).unwrap();
            let again = orch.sync(&SyncOptions::default()).unwrap();
            assert!(again.modified_files.is_empty());
            assert_eq!(again.forward_actions + again.reverse_actions, 0);
            assert_eq!(again.cross_ref_additions, 0);
        }

        #[test]
        fn dry_run_matches_apply() {
            let mut dry = orchestrator(tree());
            let mut real = orchestrator(tree());
            let dry_result = dry
                .sync(&SyncOptions {
                    dry_run: true,
                    ..Default::default()
                })
                .unwrap();
            let real_result = real.sync(&SyncOptions::default()).unwrap();

            assert_eq!(dry_result.modified_files, real_result.modified_files);
            assert_eq!(dry_result.actions, real_result.actions);
            assert_eq!(dry_result.cross_ref_additions, real_result.cross_ref_additions);
            assert!(dry_result.dry_run);
            assert_eq!(dry.tree().text("src/UserService.php"), Some(PRODUCTION));
        }

        #[test]
        fn prune_requires_force() {
            let mut orch = orchestrator(tree());
            let err = orch
                .sync(&SyncOptions {
                    prune: true,
                    ..Default::default()
                })
                .unwrap_err();
            assert!(matches!(err, TestlinkError::PruneNotConfirmed));
            assert_eq!(orch.tree().text("src/UserService.php"), Some(PRODUCTION));
        }

        #[test]
        fn stale_line_precondition_is_collected() {
            let mut tree = tree();
            let mut edits = EditPlan::new();
            edits
                .file_mut("src/UserService.php")
                .line_patches
                .push(LinePatch::delete(1, "<?php changed"));
            let outcome = commit(&mut tree, &edits, false);
            assert!(outcome.modified_files.is_empty());
            assert_eq!(outcome.errors.len(), 1);
            assert!(outcome.errors[0].contains("src/UserService.php:1"));
        }
    }

    mod placeholder_tests {
        use super::*;

        const MARKED_PRODUCTION: &str = r"<?php

namespace App;

class UserService
{
    #[TestedBy('@A')]
    public function create(): void
    {
    }

    #[TestedBy('@@B')]
    public function update(): void
    {
    }
}
";

        const MARKED_CHAINING: &str = r"<?php

test('creates user', function () {
    expect(true)->toBeTrue();
})->linksAndCovers('@A');
";

        const MARKED_ANNOTATION: &str = r"<?php

namespace Tests\Unit;

class UserServiceTest
{
    #[LinksAndCovers('@@B')]
    public function testUpdate(): void
    {
    }

    public function testCreate(): void
    {
        links('@A');
    }
}
";

        fn marked() -> SourceTree {
            SourceTree::in_memory(
                &PathsConfig::default(),
                [
                    ("src/UserService.php", MARKED_PRODUCTION),
                    ("tests/Feature/UserTest.php", MARKED_CHAINING),
                    ("tests/Unit/UserServiceTest.php", MARKED_ANNOTATION),
                ],
            )
        }

        #[test]
        fn pair_rewrites_markers() {
            let mut orch = orchestrator(marked());
            let report = orch.pair(None, false).unwrap();
            assert!(report.result.errors.is_empty());
            assert_eq!(report.result.actions.len(), 3);
            assert_eq!(report.modified_files.len(), 3);

            let production = orch.tree().text("src/UserService.php").unwrap();
            assert!(production.contains(
                "    #[TestedBy('Tests\\Feature\\UserTest', 'creates user')]\n    #[TestedBy(\\Tests\\Unit\\UserServiceTest::class, 'testCreate')]\n    public function create(): void"
            ));
            assert!(!production.contains("@@B"));
            assert!(production.contains("     * @see \\Tests\\Unit\\UserServiceTest::testUpdate\n"));

            let chaining = orch.tree().text("tests/Feature/UserTest.php").unwrap();
            assert!(chaining.contains("})->linksAndCovers(\\App\\UserService::class.'::create');\n"));

            let annotation = orch.tree().text("tests/Unit/UserServiceTest.php").unwrap();
            assert!(annotation.contains("        links(\\App\\UserService::class, 'create');\n"));
            assert!(annotation.contains("     * @see \\App\\UserService::update\n"));
            assert!(!annotation.contains("@@B"));
        }

        #[test]
        fn paired_tree_validates() {
            let mut orch = orchestrator(marked());
            orch.pair(None, false).unwrap();
            let report = orch.validate();
            assert!(report.placeholder_errors.is_empty());
            assert!(report.validation.is_valid(), "{:?}", report.validation);
        }

        #[test]
        fn single_placeholder_filter() {
            let mut orch = orchestrator(marked());
            let report = orch.pair(Some("@@B"), true).unwrap();
            assert_eq!(report.result.actions.len(), 1);
            assert_eq!(
                report.modified_files,
                vec!["src/UserService.php", "tests/Unit/UserServiceTest.php"]
            );
            assert_eq!(orch.tree().text("src/UserService.php"), Some(MARKED_PRODUCTION));
        }

        #[test]
        fn unknown_and_malformed_filters_are_errors() {
            let mut orch = orchestrator(marked());
            assert!(matches!(
                orch.pair(Some("@Z"), true),
                Err(TestlinkError::PlaceholderNotFound { .. })
            ));
            assert!(matches!(
                orch.pair(Some("A"), true),
                Err(TestlinkError::InvalidPlaceholder { .. })
            ));
        }

        #[test]
        fn chained_markers_on_one_line_are_replaced_in_place() {
            let markers = vec![
                Marker {
                    raw: "->links('@A')".to_string(),
                    form: MarkerForm::Chained,
                    renders: vec!["->links(\\X::class.'::a')".to_string()],
                },
                Marker {
                    raw: "->linksAndCovers('@B')".to_string(),
                    form: MarkerForm::Chained,
                    renders: vec![
                        "->linksAndCovers(\\Y::class.'::b')".to_string(),
                        "->linksAndCovers(\\Y::class.'::c')".to_string(),
                    ],
                },
            ];
            assert_eq!(
                substitute("})->links('@A')->linksAndCovers('@B');", &markers),
                vec!["})->links(\\X::class.'::a')->linksAndCovers(\\Y::class.'::b')->linksAndCovers(\\Y::class.'::c');"]
            );
        }

        #[test]
        fn removed_marker_drops_its_line() {
            let markers = vec![Marker {
                raw: "#[TestedBy('@@B')]".to_string(),
                form: MarkerForm::Attribute,
                renders: Vec::new(),
            }];
            assert!(substitute("    #[TestedBy('@@B')]", &markers).is_empty());
        }
    }

    mod fix_refs_tests {
        use super::*;

        #[test]
        fn qualifies_short_references() {
            let production = PRODUCTION.replace(
                "    #[TestedBy(UserServiceTest::class, 'testCreate')]",
                "    /**\n     * @see UserServiceTest::testCreate\n     * @see Nowhere::x\n     */\n    #[TestedBy(UserServiceTest::class, 'testCreate')]",
            );
            let tree = SourceTree::in_memory(
                &PathsConfig::default(),
                [
                    ("src/UserService.php", production.as_str()),
                    ("tests/Unit/UserServiceTest.php", TEST),
                ],
            );
            let mut orch = orchestrator(tree);
            let report = orch.fix_refs(false);
            assert_eq!(report.issues.len(), 2);
            assert_eq!(report.fixed, 1);
            assert_eq!(report.unfixable, 1);
            let text = orch.tree().text("src/UserService.php").unwrap();
            assert!(text.contains("     * @see \\Tests\\Unit\\UserServiceTest::testCreate\n"));
            assert!(text.contains("     * @see Nowhere::x\n"));
        }
    }
}
