//! Ancestor lineage enumeration
//!
//! A target's ancestor lineage is every target registered in its own spec path
//! (its siblings), then every target in the parent spec path, and so on up to
//! the build root, nearest first.

use std::collections::VecDeque;

use crate::dependency_calculator::ExportGraph;

/// Iterator over a spec path and each of its parents, ending with the root (`""`)
#[derive(Debug, Clone)]
pub struct SpecPathLineage<'a> {
    next: Option<&'a str>,
}

impl<'a> SpecPathLineage<'a> {
    pub fn new(spec_path: &'a str) -> Self {
        Self {
            next: Some(spec_path),
        }
    }
}

impl<'a> Iterator for SpecPathLineage<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = if current.is_empty() {
            None
        } else {
            Some(current.rsplit_once('/').map_or("", |(parent, _)| parent))
        };
        Some(current)
    }
}

/// Iterator yielding a target's siblings and then its ancestors, nearest first
pub struct TargetAncestorIterator<'g, 'p, G: ExportGraph> {
    graph: &'g G,
    lineage: SpecPathLineage<'p>,
    pending: VecDeque<G::Node>,
}

impl<'g, 'p, G: ExportGraph> TargetAncestorIterator<'g, 'p, G> {
    pub fn new(graph: &'g G, spec_path: &'p str) -> Self {
        Self {
            graph,
            lineage: SpecPathLineage::new(spec_path),
            pending: VecDeque::new(),
        }
    }
}

impl<G: ExportGraph> Iterator for TargetAncestorIterator<'_, '_, G> {
    type Item = G::Node;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(node) = self.pending.pop_front() {
                return Some(node);
            }
            // Spec paths without registered targets are skipped.
            let spec_path = self.lineage.next()?;
            self.pending.extend(self.graph.targets_in_spec_path(spec_path));
        }
    }
}

impl<G: ExportGraph> std::fmt::Debug for TargetAncestorIterator<'_, '_, G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetAncestorIterator")
            .field("lineage", &self.lineage)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}
