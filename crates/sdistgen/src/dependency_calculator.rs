//! Reduced dependency calculation for exported targets
//!
//! When a target is exported, many of its internal transitive library
//! dependencies may already be bundled by other exported targets that "own"
//! them. An exported target therefore only needs to declare a reduced set of
//! dependencies:
//!
//! - third-party requirements reachable from it,
//! - the internal, source-owning targets it owns itself,
//! - the other exported targets owning the rest of its closure.
//!
//! Ownership mirrors the BUILD file convention of targets only owning sources
//! in their own filesystem subtree: the owner of an internal target is the
//! nearest exported target in its ancestor lineage whose closure contains it.
//! The single ambiguous case is two exported targets in the same spec path
//! that can both reach the target.

use std::{fmt, hash::Hash};

use indexmap::{IndexMap, IndexSet};
use log::{debug, trace};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::ancestry::TargetAncestorIterator;


/// The capabilities the calculator needs from a dependency graph
///
/// Implemented once per packaging ecosystem; the calculator itself knows
/// nothing about target kinds.
pub trait ExportGraph {
    type Node: Clone + Eq + Hash + fmt::Display;

    /// Whether the node owns files that must be bundled when it is part of an
    /// exported target's closure
    fn requires_export(&self, node: &Self::Node) -> bool;

    /// Whether the node is a top-level exported target
    fn is_exported(&self, node: &Self::Node) -> bool;

    /// Outgoing dependency edges of the node, in declaration order
    fn dependencies(&self, node: &Self::Node) -> Vec<Self::Node>;

    /// Whether the node was declared by the user rather than synthesized by
    /// code generation
    fn is_original(&self, node: &Self::Node) -> bool;

    /// The original node a synthesized node was generated from; original
    /// nodes return themselves
    fn derived_from(&self, node: &Self::Node) -> Self::Node;

    fn spec_path(&self, node: &Self::Node) -> String;

    /// All original nodes registered exactly at `spec_path`, in registration
    /// order; synthesized nodes are never enumerated
    fn targets_in_spec_path(&self, spec_path: &str) -> Vec<Self::Node>;
}

/// Errors raised while calculating reduced dependencies
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyError {
    /// Reduced dependencies were requested for a target that is not exported
    UnExported { target: String },
    /// An exportable target has no exported owner in its ancestor lineage
    NoOwner { target: String },
    /// More than one exported target in the same spec path owns a target
    AmbiguousOwner {
        target: String,
        owner: String,
        others: Vec<String>,
    },
}

impl fmt::Display for DependencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnExported { target } => write!(
                f,
                "Cannot calculate reduced dependencies for a non-exported target, given: {target}"
            ),
            Self::NoOwner { target } => {
                write!(f, "No exported target owner found for {target}")
            }
            Self::AmbiguousOwner {
                target,
                owner,
                others,
            } => write!(
                f,
                "Owners for {target} are ambiguous.  Found {owner} and {} others: [{}]",
                others.len(),
                others.join(", ")
            ),
        }
    }
}

impl std::error::Error for DependencyError {}

/// Calculates the reduced dependency sets of exported targets
#[derive(Debug)]
pub struct DependencyCalculator<'g, G> {
    graph: &'g G,
}

impl<'g, G: ExportGraph> DependencyCalculator<'g, G> {
    pub fn new(graph: &'g G) -> Self {
        Self { graph }
    }

    /// Calculate the reduced transitive dependencies of an exported target
    ///
    /// Three passes over the graph:
    /// 1. walk the original exported target collecting provisionally owned
    ///    targets, stopping at other exported targets;
    /// 2. resolve the owner of each exportable target from its ancestor
    ///    lineage;
    /// 3. walk the exported target again, replacing every dependency owned by
    ///    another exported target with that owner.
    ///
    /// Third-party targets are only collected in the last pass since they may
    /// be introduced by exported subgraphs discovered in the second.
    pub fn reduced_dependencies(
        &self,
        exported: &G::Node,
    ) -> Result<IndexSet<G::Node>, DependencyError> {
        let graph = self.graph;
        if !graph.is_exported(exported) {
            return Err(DependencyError::UnExported {
                target: exported.to_string(),
            });
        }

        // Ownership is only checked on the original target graph.
        let original = graph.derived_from(exported);
        let is_start = |node: &G::Node| node == exported || *node == original;

        let mut owner_by_owned: IndexMap<G::Node, Option<G::Node>> = IndexMap::new();
        self.walk(&original, |current| {
            if graph.is_original(current) {
                owner_by_owned.insert(current.clone(), None);
            }
            is_start(current) || !graph.is_exported(current)
        });
        debug!(
            "Collected {} provisionally owned targets for {exported}",
            owner_by_owned.len()
        );

        let exportable: Vec<G::Node> = owner_by_owned
            .keys()
            .filter(|node| graph.requires_export(node) && !graph.is_exported(node))
            .cloned()
            .collect();
        let mut closures = FxHashMap::default();
        for owned in exportable {
            let owner = self.resolve_owner(&owned, &mut closures)?;
            trace!("{owned} is owned by {owner}");
            owner_by_owned.insert(owned, Some(owner));
        }

        let mut reduced = IndexSet::new();
        self.walk(exported, |current| {
            if is_start(current) {
                return true;
            }
            let owner = owner_by_owned
                .get(&graph.derived_from(current))
                .cloned()
                .flatten();
            let owned_by_self = owner.as_ref().is_some_and(|owner| *owner == original);
            match owner {
                Some(owner) if !owned_by_self => {
                    reduced.insert(owner);
                }
                _ => {
                    reduced.insert(current.clone());
                }
            }
            owned_by_self || !graph.requires_export(current)
        });

        Ok(reduced
            .into_iter()
            .filter(|node| graph.is_original(node))
            .collect())
    }

    /// Find the nearest exported target whose closure contains `owned`
    fn resolve_owner(
        &self,
        owned: &G::Node,
        closures: &mut FxHashMap<G::Node, FxHashSet<G::Node>>,
    ) -> Result<G::Node, DependencyError> {
        let spec_path = self.graph.spec_path(owned);

        let mut potential_owners = IndexSet::new();
        for potential_owner in TargetAncestorIterator::new(self.graph, &spec_path) {
            if !self.graph.is_exported(&potential_owner) {
                continue;
            }
            let closure = closures
                .entry(potential_owner.clone())
                .or_insert_with(|| self.closure(&potential_owner));
            if closure.contains(owned) {
                potential_owners.insert(potential_owner);
            }
        }

        let mut candidates = potential_owners.into_iter();
        let Some(owner) = candidates.next() else {
            return Err(DependencyError::NoOwner {
                target: owned.to_string(),
            });
        };

        // Owners further up the lineage lose to the nearest one; only owners
        // sharing its spec path are ambiguous.
        let owner_path = self.graph.spec_path(&owner);
        let ambiguous: Vec<String> = candidates
            .filter(|candidate| self.graph.spec_path(candidate) == owner_path)
            .map(|candidate| candidate.to_string())
            .collect();
        if !ambiguous.is_empty() {
            return Err(DependencyError::AmbiguousOwner {
                target: owned.to_string(),
                owner: owner.to_string(),
                others: ambiguous,
            });
        }

        Ok(owner)
    }

    /// All nodes reachable from `node`, including itself
    pub fn closure(&self, node: &G::Node) -> FxHashSet<G::Node> {
        let mut closure = FxHashSet::default();
        self.walk(node, |current| {
            closure.insert(current.clone());
            true
        });
        closure
    }

    /// Depth-first pre-order walk from `start`, visiting each node once
    ///
    /// The visitor returns whether the dependencies of the visited node
    /// should be walked as well.
    fn walk<F>(&self, start: &G::Node, mut visitor: F)
    where
        F: FnMut(&G::Node) -> bool,
    {
        let mut visited = FxHashSet::default();
        let mut stack = vec![start.clone()];

        while let Some(current) = stack.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            if visitor(&current) {
                // Reversed so the first declared dependency is walked first.
                stack.extend(self.graph.dependencies(&current).into_iter().rev());
            }
        }
    }
}
