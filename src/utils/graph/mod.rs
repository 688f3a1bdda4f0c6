//! Graph abstractions and algorithms over block-indexed control-flow graphs.
//!
//! Nodes are plain block serials (`usize`), with node 0 as the entry. The
//! algorithms here only need to walk edges, so they are written against the
//! small [`FlowGraph`] trait rather than a concrete function type. This keeps
//! them testable on tiny hand-written graphs.
//!
//! # Algorithms
//!
//! - [`compute_dominance`] - Iterative dominator sets, inverted to "dominates"
//! - [`reachable_from`] - Worklist reachability

mod dominators;
mod traversal;

pub use dominators::{compute_dominance, DominanceSets};
pub use traversal::reachable_from;

use crate::analysis::ir::Function;

/// A directed graph whose nodes are the indices `0..node_count()`.
pub trait FlowGraph {
    /// Returns the number of nodes.
    fn node_count(&self) -> usize;

    /// Returns the successors of `node`.
    fn successors(&self, node: usize) -> &[usize];

    /// Returns the predecessors of `node`.
    fn predecessors(&self, node: usize) -> &[usize];
}

impl FlowGraph for Function {
    fn node_count(&self) -> usize {
        self.block_count()
    }

    fn successors(&self, node: usize) -> &[usize] {
        self.block(node).map_or(&[], |b| b.succs())
    }

    fn predecessors(&self, node: usize) -> &[usize] {
        self.block(node).map_or(&[], |b| b.preds())
    }
}

/// Edge-list graph used by the algorithm tests.
#[cfg(test)]
pub(crate) struct TestGraph {
    succs: Vec<Vec<usize>>,
    preds: Vec<Vec<usize>>,
}

#[cfg(test)]
impl TestGraph {
    pub(crate) fn new(node_count: usize, edges: &[(usize, usize)]) -> Self {
        let mut succs = vec![Vec::new(); node_count];
        let mut preds = vec![Vec::new(); node_count];
        for &(src, dst) in edges {
            succs[src].push(dst);
            preds[dst].push(src);
        }
        Self { succs, preds }
    }
}

#[cfg(test)]
impl FlowGraph for TestGraph {
    fn node_count(&self) -> usize {
        self.succs.len()
    }

    fn successors(&self, node: usize) -> &[usize] {
        &self.succs[node]
    }

    fn predecessors(&self, node: usize) -> &[usize] {
        &self.preds[node]
    }
}
