//! Dynamic approximate neighborhood functions.
//!
//! `Danf` keeps, for every node of a growing directed graph and every hop
//! count `1..=h`, a probabilistic estimate of the node's out-ball size, and
//! updates those estimates under edge insertion without recomputing from
//! scratch. Full per-hop counters are stored only for nodes of an
//! incrementally maintained vertex cover; every other node keeps just the
//! dense top level. New edges push their effect backwards through the
//! transpose graph with one multi-source search per ≤64-edge partition.

use crate::cover::{CoverChange, DynamicVertexCover};
use crate::error::{Error, Result};
use crate::graph::{Edge, Graph};
use crate::hyperball;
use crate::msbfs::{MsBfs, Traveler, Visit, Visitor, MAX_WAVES};
use crate::sketch::{register_max, CounterArray};
use ahash::{AHashMap, AHashSet};
use roaring::RoaringTreemap;
use serde::Serialize;

/// Default number of edges (waves) per propagation partition.
pub const DEFAULT_PARTITION_SIZE: usize = MAX_WAVES;

/// Observability snapshot of the orchestrator's footprint.
#[derive(Copy, Clone, Debug, Serialize)]
pub struct MemoryStats {
    pub graph_bytes: usize,
    pub counter_bytes: usize,
    pub cover_bytes: usize,
    pub engine_bytes: usize,
}

/// Payload travelling with one new arc's propagation wave. Block `k`
/// approximates the k-hop out-ball of the arc's head (block 0 seeds the head
/// itself), merged with the tail's aligned history when the tail is covered.
#[derive(Clone)]
struct HistoryTraveler {
    blocks: Vec<Vec<u8>>,
}

impl Traveler for HistoryTraveler {
    fn merge(&mut self, other: &Self, _depth: u32) {
        for (dst, src) in self.blocks.iter_mut().zip(&other.blocks) {
            register_max(dst, src);
        }
    }
}

/// Deposits traveler blocks into the history at every node a wave reaches.
///
/// A node at 1-indexed distance `hops` from the new arc's head takes block
/// `level + 1 - hops` into level `level` (compacted slot when covered, dense
/// top slot always). Waves stop at distance `h` and at other batch sources.
struct PropagationVisitor<'a> {
    history: &'a [CounterArray],
    counter_index: &'a AHashMap<u64, u64>,
    h: usize,
    batch_sources: &'a RoaringTreemap,
}

impl Visitor<HistoryTraveler> for PropagationVisitor<'_> {
    fn visit(&self, v: Visit<'_, HistoryTraveler>) -> u64 {
        let hops = v.depth as usize + 1;
        if let Some(t) = v.traveler {
            if let Some(&idx) = self.counter_index.get(&v.node) {
                for level in (hops - 1)..(self.h - 1) {
                    self.history[level].merge_counter(&t.blocks[level + 1 - hops], idx as usize);
                }
            }
            self.history[self.h - 1].merge_counter(&t.blocks[self.h - hops], v.node as usize);
        }
        if hops >= self.h {
            return 0;
        }
        if v.depth > 0 && self.batch_sources.contains(v.node) {
            // Another wave is rooted here and already carries this node's
            // history; going further would repeat its work.
            return 0;
        }
        v.frontier
    }
}

pub struct Danf {
    h: usize,
    graph: Graph,
    transpose: Graph,
    cover: DynamicVertexCover,
    /// cover node → compacted counter slot, assigned in first-seen order
    counter_index: AHashMap<u64, u64>,
    /// levels 0..h-2 compacted over the counter index, level h-1 dense
    history: Vec<CounterArray>,
    engine: MsBfs,
    partition_size: usize,
    poisoned: bool,
}

impl Danf {
    /// Build the orchestrator over `graph` with a random sketch seed.
    pub fn new(h: usize, log2m: u32, graph: Graph) -> Result<Self> {
        Self::with_seed(h, log2m, graph, rand::random())
    }

    /// Build with a pinned sketch seed; equal seeds make runs
    /// register-for-register reproducible.
    pub fn with_seed(h: usize, log2m: u32, graph: Graph, seed: u64) -> Result<Self> {
        if h == 0 {
            return Err(Error::InvalidH(0));
        }
        let engine = MsBfs::new()?;
        let transpose = graph.transpose();

        let mut cover = DynamicVertexCover::new();
        for node in graph.nodes_from(0) {
            for succ in graph.successors(node).iter() {
                cover.insert_edge(Edge::new(node, succ));
            }
        }
        let mut counter_index = AHashMap::new();
        for (slot, node) in cover.iter().enumerate() {
            counter_index.insert(node, slot as u64);
        }
        let covered = counter_index.len();

        tracing::info!(
            nodes = graph.num_nodes(),
            arcs = graph.num_arcs(),
            covered,
            h,
            "seeding history"
        );

        let dense = hyperball::neighborhood_history(&graph, h, log2m, seed, engine.pool());
        let mut history = Vec::with_capacity(h);
        for (level, array) in dense.into_iter().enumerate() {
            if level + 1 == h {
                history.push(array);
            } else {
                history.push(array.extract(cover.iter().map(|n| n as usize), covered));
            }
        }

        Ok(Self {
            h,
            graph,
            transpose,
            cover,
            counter_index,
            history,
            engine,
            partition_size: DEFAULT_PARTITION_SIZE,
            poisoned: false,
        })
    }

    /// Insert a batch of arcs and fold their effect into the history.
    ///
    /// Runs to completion or fails fatally; after an [`Error::Traversal`] the
    /// instance is poisoned and must be rebuilt.
    pub fn add_edges(&mut self, edges: &[Edge]) -> Result<()> {
        if self.poisoned {
            return Err(Error::Inconsistent);
        }

        // Drop arcs already present and in-batch duplicates up front, so
        // re-inserting a batch is a no-op.
        let mut batch_seen = AHashSet::new();
        let new_edges: Vec<Edge> = edges
            .iter()
            .copied()
            .filter(|e| batch_seen.insert(*e) && !self.graph.has_arc(e.from, e.to))
            .collect();
        if new_edges.is_empty() {
            return Ok(());
        }

        tracing::info!(batch = new_edges.len(), "inserting edge batch");

        let old_nodes = self.graph.num_nodes();
        self.graph.add_edges(&new_edges);
        let flipped: Vec<Edge> = new_edges.iter().map(|e| e.flip()).collect();
        self.transpose.add_edges(&flipped);
        let new_nodes = self.graph.num_nodes();

        // Appended nodes get a dense top-level slot counting themselves.
        if new_nodes > old_nodes {
            let top = self.h - 1;
            self.history[top].add_counters((new_nodes - old_nodes) as usize);
            for node in old_nodes..new_nodes {
                self.history[top].add(node as usize, node);
            }
        }

        let mut added: Vec<u64> = Vec::new();
        for edge in &new_edges {
            for (node, change) in self.cover.insert_edge(*edge) {
                match change {
                    CoverChange::Added => added.push(node),
                    CoverChange::Removed => {
                        // Insertions cannot shrink the cover; seeing this
                        // means the history can no longer be trusted.
                        self.poisoned = true;
                        return Err(Error::Unsupported(
                            "vertex cover removal during edge insertion",
                        ));
                    }
                }
            }
        }

        // Newly covered nodes need compacted slots before any wave runs.
        for &node in &added {
            let slot = self.counter_index.len() as u64;
            self.counter_index.insert(node, slot);
        }
        for level in 0..self.h - 1 {
            self.history[level].add_counters(added.len());
        }
        for &node in &added {
            self.seed_incomplete_history(node);
        }

        self.propagate(&new_edges)
    }

    /// Edge deletion is acknowledged but rejected; the history cannot shrink.
    pub fn delete_edges(&mut self, _edges: &[Edge]) -> Result<()> {
        Err(Error::Unsupported("edge deletion"))
    }

    /// Local history for a node that just entered the cover: itself at every
    /// level, plus everything its current successors' counters already know.
    /// Contributions that exist only because of this batch's edges arrive
    /// later, through propagation.
    fn seed_incomplete_history(&self, node: u64) {
        let Some(&slot) = self.counter_index.get(&node) else {
            return;
        };
        let slot = slot as usize;
        let top = self.h - 1;
        for level in 0..top {
            self.history[level].add(slot, node);
        }
        for succ in self.graph.successors(node).iter() {
            if succ == node {
                continue;
            }
            if self.h >= 2 {
                self.history[0].add(slot, succ);
            } else {
                self.history[top].add(node as usize, succ);
            }
            if let Some(&sslot) = self.counter_index.get(&succ) {
                let sslot = sslot as usize;
                for level in 1..top {
                    self.history[level].union(slot, &self.history[level - 1], sslot);
                }
                if self.h >= 2 {
                    self.history[top].union(node as usize, &self.history[top - 1], sslot);
                }
            }
        }
    }

    /// One propagation pass for the whole batch: one traveler per new arc,
    /// one multi-source search over the transpose per partition.
    fn propagate(&mut self, new_edges: &[Edge]) -> Result<()> {
        let top = self.h - 1;
        let mut batch_sources = RoaringTreemap::new();
        for edge in new_edges {
            batch_sources.insert(edge.from);
        }

        // Widest waves first, so partitions group sources of similar reach
        // and narrow waves hit the batch-source pruning early.
        let mut ordered: Vec<(f64, Edge)> = new_edges
            .iter()
            .map(|&e| (self.history[top].count(e.from as usize), e))
            .collect();
        ordered.sort_by(|a, b| b.0.total_cmp(&a.0));

        let chunks: Vec<Vec<Edge>> = ordered
            .chunks(self.partition_size)
            .map(|c| c.iter().map(|&(_, e)| e).collect())
            .collect();

        for chunk in chunks {
            let sources: Vec<u64> = chunk.iter().map(|e| e.from).collect();
            let travelers: Vec<HistoryTraveler> =
                chunk.iter().map(|&e| self.build_traveler(e)).collect();
            let visitor = PropagationVisitor {
                history: &self.history,
                counter_index: &self.counter_index,
                h: self.h,
                batch_sources: &batch_sources,
            };
            tracing::debug!(waves = sources.len(), "running propagation partition");
            if let Err(e) = self
                .engine
                .search(&self.transpose, &sources, &visitor, Some(travelers))
            {
                self.poisoned = true;
                return Err(e);
            }
        }
        Ok(())
    }

    fn build_traveler(&self, edge: Edge) -> HistoryTraveler {
        let logic = &self.history[self.h - 1];
        let m = logic.registers_per_counter();
        let mut blocks = vec![vec![0u8; m]; self.h];

        logic.seed_block(&mut blocks[0], edge.to);
        if let Some(&head_slot) = self.counter_index.get(&edge.to) {
            for k in 1..self.h {
                self.history[k - 1].counter(head_slot as usize, &mut blocks[k]);
            }
        } else {
            // Head outside the cover: every neighbor of an uncovered node is
            // covered, so one collection step reconstructs its balls.
            for k in 1..self.h {
                logic.seed_block(&mut blocks[k], edge.to);
            }
            for succ in self.graph.successors(edge.to).iter() {
                if succ == edge.to {
                    continue;
                }
                if self.h >= 2 {
                    logic.seed_block(&mut blocks[1], succ);
                }
                if let Some(&wslot) = self.counter_index.get(&succ) {
                    for k in 2..self.h {
                        self.history[k - 2].max_into_block(wslot as usize, &mut blocks[k]);
                    }
                }
            }
        }

        if let Some(&tail_slot) = self.counter_index.get(&edge.from) {
            logic.seed_block(&mut blocks[0], edge.from);
            for k in 1..self.h {
                self.history[k - 1].max_into_block(tail_slot as usize, &mut blocks[k]);
            }
        }

        HistoryTraveler { blocks }
    }

    /// Estimated `hops`-hop out-ball size of `node`. Any node can be queried
    /// at `hops == h`; lower levels exist only for cover members.
    pub fn count(&self, node: u64, hops: usize) -> Result<f64> {
        if self.poisoned {
            return Err(Error::Inconsistent);
        }
        if hops == 0 || hops > self.h {
            return Err(Error::InvalidHopCount { got: hops, max: self.h });
        }
        if !self.graph.contains_node(node) {
            return Err(Error::UnknownNode(node));
        }
        if hops == self.h {
            return Ok(self.history[self.h - 1].count(node as usize));
        }
        match self.counter_index.get(&node) {
            Some(&slot) => Ok(self.history[hops - 1].count(slot as usize)),
            None => Err(Error::NotInVertexCover(node)),
        }
    }

    /// All `h` per-hop estimates for a cover member.
    pub fn counts(&self, node: u64) -> Result<Vec<f64>> {
        if self.poisoned {
            return Err(Error::Inconsistent);
        }
        if !self.graph.contains_node(node) {
            return Err(Error::UnknownNode(node));
        }
        if !self.cover.is_in_vertex_cover(node) {
            return Err(Error::NotInVertexCover(node));
        }
        (1..=self.h).map(|hops| self.count(node, hops)).collect()
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn transpose(&self) -> &Graph {
        &self.transpose
    }

    pub fn max_h(&self) -> usize {
        self.h
    }

    pub fn vertex_cover(&self) -> &DynamicVertexCover {
        &self.cover
    }

    /// Compacted counter slot of a cover member, if it has one.
    pub fn compact_index(&self, node: u64) -> Option<u64> {
        self.counter_index.get(&node).copied()
    }

    /// Edges per propagation partition, clamped to the wave capacity.
    pub fn set_partition_size(&mut self, size: usize) {
        self.partition_size = size.clamp(1, MAX_WAVES);
    }

    pub fn memory_stats(&self) -> MemoryStats {
        MemoryStats {
            graph_bytes: self.graph.memory_usage() + self.transpose.memory_usage(),
            counter_bytes: self.history.iter().map(|a| a.memory_usage()).sum(),
            cover_bytes: self.cover.memory_usage()
                + self.counter_index.len() * 2 * std::mem::size_of::<u64>(),
            // Per-search scratch: three mask words and two traveler slots per node.
            engine_bytes: self.graph.num_nodes() as usize * 56,
        }
    }

    /// Release the engine's worker pool along with all state.
    pub fn close(self) {}
}
