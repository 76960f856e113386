//! Topological sorting of the plugin graph.

use std::collections::VecDeque;

/// A precedence constraint: `predecessor` must come before `successor`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge<T> {
    pub predecessor: T,
    pub successor: T,
}

impl<T> Edge<T> {
    pub fn new(predecessor: T, successor: T) -> Self {
        Self {
            predecessor,
            successor,
        }
    }
}

/// Generate a topological sort of `nodes` under the constraints in `edges`.
///
/// The relative order of nodes not constrained against each other is
/// preserved, so the output is deterministic when several orderings would
/// satisfy the edges. On success every edge has been consumed. If the
/// constraints contain a cycle, the edges involved survive and are
/// returned as the error value so the caller can report them.
pub fn tsort<T>(nodes: &[T], mut edges: Vec<Edge<T>>) -> Result<Vec<T>, Vec<Edge<T>>>
where
    T: PartialEq + Clone,
{
    let mut sorted = Vec::with_capacity(nodes.len());

    // Nodes with no incoming edge, in input order.
    let mut zeros: VecDeque<T> = nodes
        .iter()
        .filter(|node| !edges.iter().any(|edge| edge.successor == **node))
        .cloned()
        .collect();

    while let Some(zero) = zeros.pop_front() {
        // Remove every edge leaving this node; a successor whose last
        // incoming edge goes away becomes a zero itself.
        let mut index = 0;
        while index < edges.len() {
            if edges[index].predecessor == zero {
                let edge = edges.remove(index);
                if !edges.iter().any(|other| other.successor == edge.successor) {
                    zeros.push_back(edge.successor);
                }
            } else {
                index += 1;
            }
        }

        sorted.push(zero);
    }

    if edges.is_empty() {
        Ok(sorted)
    } else {
        Err(edges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn precedes(order: &[&str], first: &str, second: &str) -> bool {
        let a = order.iter().position(|n| *n == first);
        let b = order.iter().position(|n| *n == second);
        matches!((a, b), (Some(a), Some(b)) if a < b)
    }

    fn edge(p: &'static str, s: &'static str) -> Edge<&'static str> {
        Edge::new(p, s)
    }

    #[test]
    fn sorts_the_seed_graph() {
        let nodes = ["a", "b", "c", "d", "e", "f", "g", "h"];
        let edges = vec![
            edge("a", "b"),
            edge("a", "c"),
            edge("a", "d"),
            edge("b", "e"),
            edge("g", "h"),
        ];

        let sorted = tsort(&nodes, edges).unwrap();

        assert_eq!(sorted.len(), nodes.len());
        for node in nodes {
            assert!(sorted.contains(&node));
        }
        assert!(precedes(&sorted, "a", "b"));
        assert!(precedes(&sorted, "a", "c"));
        assert!(precedes(&sorted, "a", "d"));
        assert!(precedes(&sorted, "b", "e"));
        assert!(precedes(&sorted, "g", "h"));
    }

    #[test]
    fn reports_cycles_with_their_edges() {
        let nodes = ["a", "b", "c", "d", "e", "f", "g", "h"];
        let edges = vec![
            edge("a", "b"),
            edge("a", "c"),
            edge("a", "d"),
            edge("b", "e"),
            edge("e", "f"),
            edge("f", "a"),
            edge("g", "h"),
        ];

        let surviving = tsort(&nodes, edges).unwrap_err();

        assert!(!surviving.is_empty());
        // The g -> h constraint is not part of the cycle and is consumed.
        assert!(!surviving
            .iter()
            .any(|e| e.predecessor == "g" && e.successor == "h"));
    }

    #[test]
    fn unconstrained_nodes_keep_their_input_order() {
        let nodes = ["x", "y", "z"];
        let sorted = tsort(&nodes, Vec::new()).unwrap();
        assert_eq!(sorted, vec!["x", "y", "z"]);

        // A single constraint must not disturb unrelated pairs.
        let nodes = ["x", "y", "z"];
        let sorted = tsort(&nodes, vec![edge("z", "x")]).unwrap();
        assert!(precedes(&sorted, "z", "x"));
        assert!(precedes(&sorted, "y", "z") || precedes(&sorted, "y", "x"));
        assert_eq!(sorted[0], "y");
    }

    #[test]
    fn empty_input_sorts_to_empty_output() {
        let nodes: [&str; 0] = [];
        assert_eq!(tsort(&nodes, Vec::new()).unwrap(), Vec::<&str>::new());
    }
}
