//! Dominator sets computed by iterative data flow.
//!
//! A node `d` **dominates** `n` if every path from the entry (node 0) to `n`
//! passes through `d`. Every node dominates itself.
//!
//! The fixpoint starts with the entry dominated only by itself and every
//! other node dominated by everything, then repeatedly intersects each
//! node's set with those of its predecessors. Nodes unreachable from the
//! entry keep the full set, which makes every node dominate them.
//!
//! Callers of the deflattening engine want the inverse relation ("which
//! blocks does `d` dominate?"), so the result is transposed before it is
//! returned.

use crate::utils::{graph::FlowGraph, BitSet};

/// The dominance relation of a graph, indexed by dominator.
#[derive(Debug, Clone)]
pub struct DominanceSets {
    /// `dominated[d]` holds every node that `d` dominates.
    dominated: Vec<BitSet>,
}

impl DominanceSets {
    /// Returns `true` if `dominator` dominates `node`.
    #[must_use]
    pub fn dominates(&self, dominator: usize, node: usize) -> bool {
        self.dominated
            .get(dominator)
            .is_some_and(|set| set.contains(node))
    }

    /// Returns the set of nodes dominated by `dominator`, if it exists.
    #[must_use]
    pub fn dominated_by(&self, dominator: usize) -> Option<&BitSet> {
        self.dominated.get(dominator)
    }

    /// Returns the number of nodes covered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.dominated.len()
    }

    /// Returns `true` for the empty graph.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dominated.is_empty()
    }
}

/// Computes the dominance relation of `graph` rooted at node 0.
///
/// # Arguments
///
/// * `graph` - The graph to analyze.
///
/// # Returns
///
/// The relation indexed by dominator; empty for an empty graph.
pub fn compute_dominance<G: FlowGraph + ?Sized>(graph: &G) -> DominanceSets {
    let count = graph.node_count();
    if count == 0 {
        return DominanceSets {
            dominated: Vec::new(),
        };
    }

    // dominators[n] holds the nodes that dominate n.
    let mut dominators = vec![BitSet::full(count); count];
    dominators[0] = BitSet::new(count);
    dominators[0].insert(0);

    let mut changed = true;
    while changed {
        changed = false;
        for node in 1..count {
            let mut next = dominators[node].clone();
            for &pred in graph.predecessors(node) {
                if pred < count {
                    next.intersect_with(&dominators[pred]);
                }
            }
            next.insert(node);
            if next != dominators[node] {
                dominators[node] = next;
                changed = true;
            }
        }
    }

    let mut dominated = vec![BitSet::new(count); count];
    for (node, doms) in dominators.iter().enumerate() {
        for dom in doms.iter() {
            dominated[dom].insert(node);
        }
    }
    DominanceSets { dominated }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::graph::TestGraph;

    #[test]
    fn test_dominance_empty_graph() {
        let dom = compute_dominance(&TestGraph::new(0, &[]));
        assert!(dom.is_empty());
        assert!(!dom.dominates(0, 0));
    }

    #[test]
    fn test_dominance_diamond() {
        //     0
        //    / \
        //   1   2
        //    \ /
        //     3
        let graph = TestGraph::new(4, &[(0, 1), (0, 2), (1, 3), (2, 3)]);
        let dom = compute_dominance(&graph);

        for n in 0..4 {
            assert!(dom.dominates(0, n));
            assert!(dom.dominates(n, n));
        }
        assert!(!dom.dominates(1, 3));
        assert!(!dom.dominates(2, 3));
        assert_eq!(dom.dominated_by(1).map(BitSet::count), Some(1));
    }

    #[test]
    fn test_dominance_loop() {
        // 0 -> 1 -> 2 -> 3, 2 -> 1
        let graph = TestGraph::new(4, &[(0, 1), (1, 2), (2, 1), (2, 3)]);
        let dom = compute_dominance(&graph);

        assert!(dom.dominates(1, 2));
        assert!(dom.dominates(1, 3));
        assert!(dom.dominates(2, 3));
        assert!(!dom.dominates(2, 1));
        assert!(!dom.dominates(3, 2));
    }

    #[test]
    fn test_dominance_unreachable_node() {
        let graph = TestGraph::new(3, &[(0, 1)]);
        let dom = compute_dominance(&graph);

        assert!(dom.dominates(1, 2));
        assert!(!dom.dominates(2, 1));
    }
}
