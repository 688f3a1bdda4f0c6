//! Reachability.

use crate::utils::{graph::FlowGraph, BitSet};

/// Returns the set of nodes reachable from `start`, including `start`.
///
/// Uses an explicit worklist; successors outside the graph are ignored.
pub fn reachable_from<G: FlowGraph + ?Sized>(graph: &G, start: usize) -> BitSet {
    let count = graph.node_count();
    let mut visited = BitSet::new(count);
    if start >= count {
        return visited;
    }

    let mut worklist = vec![start];
    visited.insert(start);
    while let Some(node) = worklist.pop() {
        for &succ in graph.successors(node) {
            if visited.insert(succ) {
                worklist.push(succ);
            }
        }
    }
    visited
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::graph::TestGraph;

    #[test]
    fn test_reachable_skips_orphans() {
        let graph = TestGraph::new(5, &[(0, 1), (1, 2), (2, 1), (3, 4)]);
        let reached: Vec<_> = reachable_from(&graph, 0).iter().collect();
        assert_eq!(reached, vec![0, 1, 2]);
    }

    #[test]
    fn test_reachable_out_of_range_start() {
        let graph = TestGraph::new(2, &[(0, 1)]);
        assert!(reachable_from(&graph, 7).is_empty());
    }
}
