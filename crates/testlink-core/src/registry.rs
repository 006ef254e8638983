//! Link registry and bidirectional validation.
//!
//! A [`LinkRegistry`] is an in-memory link graph with two inverted indices
//! (by production method and by test). [`LinkRegistries`] keeps one registry
//! per registration source so that a pair declared both as an attribute and
//! as a call can be reported as a duplicate instead of silently merged.
//!
//! Registries are explicit values built from a scan; there is no
//! process-wide registry.

use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

use crate::model::{Link, LinkOrigin, ProductionUnit, TestUnit, UnitId};

// ============================================================================
// LinkRegistry
// ============================================================================

/// Link graph for one registration source.
#[derive(Debug, Clone, Default)]
pub struct LinkRegistry {
    by_method: BTreeMap<UnitId, Vec<Link>>,
    by_test: BTreeMap<UnitId, Vec<Link>>,
}

impl LinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a (test, method) edge.
    ///
    /// Registering an existing pair again updates it in place. Coverage is
    /// most-permissive-wins: once a pair is registered with coverage it keeps
    /// it.
    pub fn register_link(&mut self, test: UnitId, method: UnitId, with_coverage: bool) {
        let link = Link {
            test,
            method,
            with_coverage,
        };
        upsert(
            self.by_method.entry(link.method.clone()).or_default(),
            &link,
        );
        upsert(self.by_test.entry(link.test.clone()).or_default(), &link);
    }

    /// Links pointing at `method`.
    pub fn links_for_method(&self, method: &UnitId) -> &[Link] {
        self.by_method.get(method).map_or(&[], Vec::as_slice)
    }

    /// Links declared by `test`.
    pub fn links_for_test(&self, test: &UnitId) -> &[Link] {
        self.by_test.get(test).map_or(&[], Vec::as_slice)
    }

    /// Whether the pair is registered.
    pub fn contains(&self, test: &UnitId, method: &UnitId) -> bool {
        self.links_for_test(test).iter().any(|l| &l.method == method)
    }

    /// All links, ordered by test then registration order.
    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.by_test.values().flatten()
    }

    /// Number of distinct (test, method) pairs.
    pub fn len(&self) -> usize {
        self.by_test.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_test.is_empty()
    }
}

fn upsert(edges: &mut Vec<Link>, link: &Link) {
    match edges
        .iter_mut()
        .find(|e| e.test == link.test && e.method == link.method)
    {
        Some(existing) => existing.with_coverage |= link.with_coverage,
        None => edges.push(link.clone()),
    }
}

// ============================================================================
// Validation Results
// ============================================================================

/// A (test, method) pair, used in validation findings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LinkPair {
    pub test: UnitId,
    pub method: UnitId,
}

/// Outcome of [`LinkRegistries::validate_bidirectional`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationResult {
    /// Pairs registered by both sources (warning).
    pub duplicates: Vec<LinkPair>,
    /// Test links to a method that has no forward relation back.
    pub missing_forward_relation: Vec<LinkPair>,
    /// Forward relation names a test that never links back.
    pub orphan_forward_relation: Vec<LinkPair>,
    /// Distinct pairs across both sources.
    pub total_links: usize,
}

impl ValidationResult {
    /// True when forward and reverse relations agree. Duplicates are warnings.
    pub fn is_valid(&self) -> bool {
        self.missing_forward_relation.is_empty() && self.orphan_forward_relation.is_empty()
    }
}

// ============================================================================
// LinkRegistries
// ============================================================================

/// One registry per registration source.
#[derive(Debug, Clone, Default)]
pub struct LinkRegistries {
    pub attribute: LinkRegistry,
    pub call: LinkRegistry,
}

impl LinkRegistries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build registries from the declared links of every test.
    pub fn from_tests(tests: &[TestUnit]) -> Self {
        let mut registries = Self::new();
        for test in tests {
            let test_id = test.id();
            for link in &test.links {
                registries.source_mut(link.origin).register_link(
                    test_id.clone(),
                    link.target_id(),
                    link.with_coverage,
                );
            }
        }
        registries
    }

    /// Registry for one source.
    pub fn source_mut(&mut self, origin: LinkOrigin) -> &mut LinkRegistry {
        match origin {
            LinkOrigin::Attribute => &mut self.attribute,
            LinkOrigin::Call => &mut self.call,
        }
    }

    /// Whether either source registers the pair.
    pub fn contains(&self, test: &UnitId, method: &UnitId) -> bool {
        self.attribute.contains(test, method) || self.call.contains(test, method)
    }

    /// Union of both sources, one entry per pair, coverage OR-ed.
    pub fn all_links(&self) -> Vec<Link> {
        let mut merged = LinkRegistry::new();
        for link in self.attribute.links().chain(self.call.links()) {
            merged.register_link(link.test.clone(), link.method.clone(), link.with_coverage);
        }
        merged.links().cloned().collect()
    }

    /// Pairs present in both sources.
    pub fn validate(&self) -> Vec<LinkPair> {
        let mut duplicates: Vec<LinkPair> = self
            .attribute
            .links()
            .filter(|l| self.call.contains(&l.test, &l.method))
            .map(|l| LinkPair {
                test: l.test.clone(),
                method: l.method.clone(),
            })
            .collect();
        duplicates.sort();
        duplicates
    }

    /// Compare links against declared forward relations.
    pub fn validate_bidirectional(&self, productions: &[ProductionUnit]) -> ValidationResult {
        let links = self.all_links();

        let forward: HashSet<(UnitId, UnitId)> = productions
            .iter()
            .flat_map(|p| {
                let method = p.id();
                p.forward_relations
                    .iter()
                    .map(move |fr| (fr.test_id(), method.clone()))
            })
            .collect();
        let linked: HashSet<(&UnitId, &UnitId)> =
            links.iter().map(|l| (&l.test, &l.method)).collect();

        let mut missing_forward_relation: Vec<LinkPair> = links
            .iter()
            .filter(|l| !forward.contains(&(l.test.clone(), l.method.clone())))
            .map(|l| LinkPair {
                test: l.test.clone(),
                method: l.method.clone(),
            })
            .collect();
        missing_forward_relation.sort();

        let mut orphan_forward_relation: Vec<LinkPair> = forward
            .iter()
            .filter(|(test, method)| !linked.contains(&(test, method)))
            .map(|(test, method)| LinkPair {
                test: test.clone(),
                method: method.clone(),
            })
            .collect();
        orphan_forward_relation.sort();

        ValidationResult {
            duplicates: self.validate(),
            missing_forward_relation,
            orphan_forward_relation,
            total_links: links.len(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
