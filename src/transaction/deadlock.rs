//! The waits-for graph. An edge `A -> B` means transaction A is waiting
//! for a lock held by transaction B; a directed cycle is a deadlock.

use std::collections::HashMap;

use parking_lot::RwLock;
use uuid::Uuid;

/// A multiset of directed edges between transactions, guarded by its own
/// reader/writer latch.
pub struct WaitsForGraph {
    edges: RwLock<Vec<(Uuid, Uuid)>>,
}

impl Default for WaitsForGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitsForGraph {
    pub fn new() -> Self {
        Self {
            edges: RwLock::new(Vec::new()),
        }
    }

    /// Add an edge. Logically, `from` waits for `to`.
    pub fn add_edge(&self, from: Uuid, to: Uuid) {
        self.edges.write().push((from, to));
    }

    /// Remove one matching edge if multiple copies exist.
    pub fn remove_edge(&self, from: Uuid, to: Uuid) {
        let mut edges = self.edges.write();
        if let Some(pos) = edges.iter().position(|&e| e == (from, to)) {
            edges.swap_remove(pos);
        }
    }

    /// True if the graph contains a directed cycle. Runs a three-color
    /// depth-first search from every vertex, so every component is
    /// explored.
    pub fn detect_cycle(&self) -> bool {
        let edges = self.edges.read();
        let mut adjacency: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for &(from, to) in edges.iter() {
            adjacency.entry(from).or_default().push(to);
            adjacency.entry(to).or_default();
        }

        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        fn visit(
            vertex: Uuid,
            adjacency: &HashMap<Uuid, Vec<Uuid>>,
            colors: &mut HashMap<Uuid, Color>,
        ) -> bool {
            colors.insert(vertex, Color::Gray);
            if let Some(nexts) = adjacency.get(&vertex) {
                for &next in nexts {
                    match colors.get(&next).copied().unwrap_or(Color::White) {
                        Color::Gray => return true,
                        Color::White => {
                            if visit(next, adjacency, colors) {
                                return true;
                            }
                        }
                        Color::Black => {}
                    }
                }
            }
            colors.insert(vertex, Color::Black);
            false
        }

        let mut colors: HashMap<Uuid, Color> = HashMap::new();
        let vertices: Vec<Uuid> = adjacency.keys().copied().collect();
        for vertex in vertices {
            if colors.get(&vertex).copied().unwrap_or(Color::White) == Color::White
                && visit(vertex, &adjacency, &mut colors)
            {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<Uuid> {
        (0..n).map(|_| Uuid::new_v4()).collect()
    }

    #[test]
    fn test_empty_graph_has_no_cycle() {
        let graph = WaitsForGraph::new();
        assert!(!graph.detect_cycle());
    }

    #[test]
    fn test_two_node_cycle() {
        let graph = WaitsForGraph::new();
        let tx = ids(2);
        graph.add_edge(tx[0], tx[1]);
        assert!(!graph.detect_cycle());
        graph.add_edge(tx[1], tx[0]);
        assert!(graph.detect_cycle());
        graph.remove_edge(tx[1], tx[0]);
        assert!(!graph.detect_cycle());
    }

    #[test]
    fn test_cycle_not_reachable_from_first_edge() {
        // A chain hangs off a cycle that a DFS seeded only at the first
        // edge's origin would have to walk every branch to find.
        let graph = WaitsForGraph::new();
        let tx = ids(5);
        graph.add_edge(tx[0], tx[1]);
        graph.add_edge(tx[0], tx[2]);
        graph.add_edge(tx[2], tx[3]);
        graph.add_edge(tx[3], tx[4]);
        graph.add_edge(tx[4], tx[2]);
        assert!(graph.detect_cycle());
    }

    #[test]
    fn test_disconnected_cycle_is_found() {
        let graph = WaitsForGraph::new();
        let tx = ids(4);
        graph.add_edge(tx[0], tx[1]);
        graph.add_edge(tx[2], tx[3]);
        graph.add_edge(tx[3], tx[2]);
        assert!(graph.detect_cycle());
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let graph = WaitsForGraph::new();
        let tx = ids(4);
        graph.add_edge(tx[0], tx[1]);
        graph.add_edge(tx[0], tx[2]);
        graph.add_edge(tx[1], tx[3]);
        graph.add_edge(tx[2], tx[3]);
        assert!(!graph.detect_cycle());
    }

    #[test]
    fn test_self_edge() {
        let graph = WaitsForGraph::new();
        let tx = ids(1);
        graph.add_edge(tx[0], tx[0]);
        assert!(graph.detect_cycle());
    }

    #[test]
    fn test_remove_deletes_single_copy() {
        let graph = WaitsForGraph::new();
        let tx = ids(2);
        graph.add_edge(tx[0], tx[1]);
        graph.add_edge(tx[0], tx[1]);
        graph.add_edge(tx[1], tx[0]);
        graph.remove_edge(tx[0], tx[1]);
        // One copy of the forward edge remains, so the cycle persists.
        assert!(graph.detect_cycle());
    }
}
