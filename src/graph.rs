//! Append-only directed graph with dense u64 node ids.
//!
//! Node ids live in `[0, num_nodes)` and only ever grow at the high end:
//! inserting an arc that names id `n` implicitly creates all ids up to `n`.
//! The graph is multigraph-free — duplicate arcs are dropped on insert.
//! Reads are safe concurrently with each other; mutation happens on a single
//! control thread between traversals.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::sync::atomic::{AtomicU64, Ordering};

/// A directed arc between two node ids.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub from: u64,
    pub to: u64,
}

impl Edge {
    pub fn new(from: u64, to: u64) -> Self {
        Self { from, to }
    }

    /// The same arc with endpoints swapped.
    pub fn flip(self) -> Self {
        Self { from: self.to, to: self.from }
    }
}

pub struct Graph {
    /// node → successor list
    adj: DashMap<u64, SmallVec<[u64; 8]>>,
    num_nodes: AtomicU64,
    num_arcs: AtomicU64,
}

impl Graph {
    pub fn new() -> Self {
        Self {
            adj: DashMap::new(),
            num_nodes: AtomicU64::new(0),
            num_arcs: AtomicU64::new(0),
        }
    }

    /// A graph with `n` isolated nodes and no arcs.
    pub fn with_nodes(n: u64) -> Self {
        let g = Self::new();
        g.num_nodes.store(n, Ordering::Relaxed);
        g
    }

    pub fn num_nodes(&self) -> u64 {
        self.num_nodes.load(Ordering::Acquire)
    }

    pub fn num_arcs(&self) -> u64 {
        self.num_arcs.load(Ordering::Relaxed)
    }

    pub fn contains_node(&self, node: u64) -> bool {
        node < self.num_nodes()
    }

    pub fn outdegree(&self, node: u64) -> usize {
        self.adj.get(&node).map_or(0, |s| s.len())
    }

    pub fn has_arc(&self, from: u64, to: u64) -> bool {
        self.adj.get(&from).is_some_and(|s| s.contains(&to))
    }

    /// Successor view for one node. Holds a shard read guard; drop it before
    /// mutating the graph.
    pub fn successors(&self, node: u64) -> Successors<'_> {
        Successors { inner: self.adj.get(&node) }
    }

    /// Iterate node ids starting at `from`.
    pub fn nodes_from(&self, from: u64) -> impl Iterator<Item = u64> {
        from..self.num_nodes()
    }

    /// Insert a batch of arcs, extending the node space as needed.
    /// Returns true iff at least one arc was not already present.
    pub fn add_edges(&self, edges: &[Edge]) -> bool {
        let mut changed = false;
        for edge in edges {
            let top = edge.from.max(edge.to) + 1;
            self.num_nodes.fetch_max(top, Ordering::AcqRel);
            let mut succ = self.adj.entry(edge.from).or_default();
            if !succ.contains(&edge.to) {
                succ.push(edge.to);
                self.num_arcs.fetch_add(1, Ordering::Relaxed);
                changed = true;
            }
        }
        changed
    }

    /// The graph with every arc flipped. Node space is preserved.
    pub fn transpose(&self) -> Graph {
        let t = Graph::with_nodes(self.num_nodes());
        for entry in self.adj.iter() {
            let from = *entry.key();
            for &to in entry.value().iter() {
                let mut succ = t.adj.entry(to).or_default();
                if !succ.contains(&from) {
                    succ.push(from);
                    t.num_arcs.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        t
    }

    /// Rough heap footprint of the adjacency structure.
    pub fn memory_usage(&self) -> usize {
        let mut bytes = std::mem::size_of::<Self>();
        for entry in self.adj.iter() {
            bytes += std::mem::size_of::<u64>()
                + std::mem::size_of::<SmallVec<[u64; 8]>>()
                + entry.value().capacity() * std::mem::size_of::<u64>();
        }
        bytes
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Successors<'a> {
    inner: Option<dashmap::mapref::one::Ref<'a, u64, SmallVec<[u64; 8]>>>,
}

impl Successors<'_> {
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.inner.iter().flat_map(|s| s.value().iter().copied())
    }

    pub fn len(&self) -> usize {
        self.inner.as_ref().map_or(0, |s| s.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dense_node_growth() {
        let g = Graph::new();
        assert!(g.add_edges(&[Edge::new(0, 5)]));
        assert_eq!(g.num_nodes(), 6);
        assert!(g.contains_node(3));
        assert!(!g.contains_node(6));
        assert_eq!(g.num_arcs(), 1);
    }

    #[test]
    fn test_duplicate_arcs_dropped() {
        let g = Graph::new();
        assert!(g.add_edges(&[Edge::new(0, 1), Edge::new(0, 1)]));
        assert_eq!(g.num_arcs(), 1);
        assert!(!g.add_edges(&[Edge::new(0, 1)]));
        assert!(g.has_arc(0, 1));
        assert!(!g.has_arc(1, 0));
    }

    #[test]
    fn test_transpose_flips_every_arc() {
        let g = Graph::new();
        g.add_edges(&[Edge::new(0, 1), Edge::new(1, 2), Edge::new(0, 2)]);
        let t = g.transpose();
        assert_eq!(t.num_nodes(), g.num_nodes());
        assert_eq!(t.num_arcs(), g.num_arcs());
        assert!(t.has_arc(1, 0));
        assert!(t.has_arc(2, 1));
        assert!(t.has_arc(2, 0));
        assert!(!t.has_arc(0, 1));
    }

    #[test]
    fn test_successors_view() {
        let g = Graph::new();
        g.add_edges(&[Edge::new(3, 1), Edge::new(3, 2)]);
        let succ = g.successors(3);
        let mut out: Vec<u64> = succ.iter().collect();
        out.sort_unstable();
        assert_eq!(out, vec![1, 2]);
        assert_eq!(g.outdegree(3), 2);
        assert_eq!(g.outdegree(1), 0);
    }
}
