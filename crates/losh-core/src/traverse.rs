//! # Traversal
//!
//! Depth-first and breadth-first walks over outgoing references. Both are
//! cycle-safe: a node is visited at most once.
//!
//! Depth-first order is pre-order (discovery order) reversed. Every node is
//! pushed to the front of the result the first time it is reached, so the
//! root ends up last and later discoveries come earlier. Breadth-first order is plain
//! discovery order with the root first.

use crate::graph::{Graph, NodeRef};
use crate::node_set::NodeSet;

/// Every node reachable from `root`, depth-first, front-inserted.
///
/// Children are explored in schema field order, list elements in list order.
pub fn depth_first(graph: &Graph, root: NodeRef) -> NodeSet {
    let mut visited = NodeSet::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if !visited.push_front(node) {
            continue;
        }
        let before = stack.len();
        stack.extend(
            graph
                .references(node)
                .map(|(_, child)| child)
                .filter(|child| !visited.contains(*child)),
        );
        // First child must be popped first.
        stack[before..].reverse();
    }
    visited
}

/// Every node reachable from `root`, breadth-first, root first.
pub fn breadth_first(graph: &Graph, root: NodeRef) -> NodeSet {
    let mut traversed = NodeSet::new();
    let mut queue = NodeSet::new();
    queue.push_back(root);
    while let Some(node) = queue.pop_front() {
        traversed.push_back(node);
        for (_, child) in graph.references(node) {
            if !traversed.contains(child) {
                queue.push_back(child);
            }
        }
    }
    traversed
}

// =============================================================================
// TESTS
// =============================================================================
