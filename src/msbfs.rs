//! Concurrent multi-source breadth-first search.
//!
//! One `search` call advances up to 64 independent waves in lock-step rounds
//! over a shared graph scan. Wave membership is a bit mask per node; per-round
//! work is split over disjoint node-id ranges, one worker partition each, so a
//! node is scanned by exactly one worker per round. Waves may carry a payload
//! ([`Traveler`]) that is merged whenever two waves land on the same node in
//! the same round, and a [`Visitor`] sees every node as soon as any wave
//! reaches it and may prune waves there.
//!
//! The engine owns its worker pool; dropping the engine releases the threads.
//! Invocations are not reentrant — reuse the engine sequentially.

use crate::error::{Error, Result};
use crate::graph::Graph;
use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Wave capacity of a single `search` invocation (one bit per wave).
pub const MAX_WAVES: usize = 64;

/// Payload carried along with a wave.
///
/// `merge` folds another wave's payload into this one when the waves collide;
/// it must be commutative and associative in effect, so the deposited state
/// does not depend on arrival order. The engine shares payloads behind `Arc`
/// and merges through [`Arc::make_mut`]: a payload referenced by more than one
/// node is cloned before its first mutation, a uniquely owned one is mutated
/// in place.
pub trait Traveler: Clone + Send + Sync {
    fn merge(&mut self, other: &Self, depth: u32);
}

/// Payload-less searches.
impl Traveler for () {
    fn merge(&mut self, _other: &Self, _depth: u32) {}
}

/// One visitor callback's view of a node.
pub struct Visit<'a, T> {
    pub node: u64,
    /// Waves arriving at this node this round.
    pub frontier: u64,
    /// All waves that have ever reached this node, including this round's.
    pub seen: u64,
    /// Round index; sources are visited at depth 0.
    pub depth: u32,
    /// Merged payload of the arriving waves, if any wave carries one.
    pub traveler: Option<&'a T>,
}

/// Called once per reached node per round, from worker threads.
///
/// Returns the wave mask to keep propagating from this node; bits outside
/// `visit.frontier` are ignored, and returning `0` prunes every wave here.
pub trait Visitor<T>: Sync {
    fn visit(&self, visit: Visit<'_, T>) -> u64;
}

impl<T, F> Visitor<T> for F
where
    F: Fn(Visit<'_, T>) -> u64 + Sync,
{
    fn visit(&self, visit: Visit<'_, T>) -> u64 {
        self(visit)
    }
}

/// Visitor that lets every wave through untouched.
pub struct PropagateAll;

impl<T> Visitor<T> for PropagateAll {
    fn visit(&self, visit: Visit<'_, T>) -> u64 {
        visit.frontier
    }
}

/// Per-node wave membership after a search: bit `i` of `mask(node)` is set iff
/// source `i` reached the node within the (possibly pruned) search.
#[derive(Debug)]
pub struct SeenBits {
    bits: Vec<u64>,
}

impl SeenBits {
    pub fn mask(&self, node: u64) -> u64 {
        self.bits.get(node as usize).copied().unwrap_or(0)
    }

    /// Did the wave rooted at `sources[source_rank]` reach `node`?
    pub fn reached(&self, source_rank: usize, node: u64) -> bool {
        self.mask(node) & (1u64 << source_rank) != 0
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }
}

pub struct MsBfs {
    pool: ThreadPool,
    threads: usize,
}

impl MsBfs {
    /// Engine with `available_parallelism * 2` workers.
    pub fn new() -> Result<Self> {
        let parallelism = std::thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(1);
        Self::with_threads(parallelism * 2)
    }

    pub fn with_threads(threads: usize) -> Result<Self> {
        let threads = threads.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("msbfs-{i}"))
            .build()
            .map_err(|e| Error::Resource(e.to_string()))?;
        Ok(Self { pool, threads })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// The owned worker pool, for callers that want to run their own
    /// node-parallel sweeps on the same threads.
    pub fn pool(&self) -> &ThreadPool {
        &self.pool
    }

    /// Multi-source reachability with no payload and no pruning.
    pub fn reach(&self, graph: &Graph, sources: &[u64]) -> Result<SeenBits> {
        self.search::<(), _>(graph, sources, &PropagateAll, None)
    }

    /// Run one synchronized multi-source search.
    ///
    /// `sources[i]` roots wave `i`; `travelers`, when given, must supply one
    /// payload per source (coincident sources merge theirs at depth 0).
    /// Worker panics abort the search and surface as [`Error::Traversal`].
    pub fn search<T, V>(
        &self,
        graph: &Graph,
        sources: &[u64],
        visitor: &V,
        travelers: Option<Vec<T>>,
    ) -> Result<SeenBits>
    where
        T: Traveler,
        V: Visitor<T>,
    {
        if sources.len() > MAX_WAVES {
            return Err(Error::TooManySources { got: sources.len(), max: MAX_WAVES });
        }
        if let Some(t) = &travelers {
            if t.len() != sources.len() {
                return Err(Error::TravelerMismatch { got: t.len(), want: sources.len() });
            }
        }
        for &s in sources {
            if !graph.contains_node(s) {
                return Err(Error::UnknownNode(s));
            }
        }

        let n = graph.num_nodes() as usize;
        let mut frontier: Vec<AtomicU64> = (0..n).map(|_| AtomicU64::new(0)).collect();
        let mut next: Vec<AtomicU64> = (0..n).map(|_| AtomicU64::new(0)).collect();
        let seen: Vec<AtomicU64> = (0..n).map(|_| AtomicU64::new(0)).collect();
        let mut cur_trav: Vec<Mutex<Option<Arc<T>>>> = (0..n).map(|_| Mutex::new(None)).collect();
        let mut nxt_trav: Vec<Mutex<Option<Arc<T>>>> = (0..n).map(|_| Mutex::new(None)).collect();

        let mut traveler_iter = travelers.map(|t| t.into_iter());
        for (rank, &s) in sources.iter().enumerate() {
            let bit = 1u64 << rank;
            frontier[s as usize].fetch_or(bit, Ordering::Relaxed);
            seen[s as usize].fetch_or(bit, Ordering::Relaxed);
            if let Some(iter) = traveler_iter.as_mut() {
                if let Some(t) = iter.next() {
                    let mut slot = cur_trav[s as usize].lock();
                    match slot.as_mut() {
                        None => *slot = Some(Arc::new(t)),
                        Some(existing) => Arc::make_mut(existing).merge(&t, 0),
                    }
                }
            }
        }

        let mut depth: u32 = 0;
        let mut alive = !sources.is_empty();
        while alive {
            // Phase 1: scan frontiers, visit, push into successors.
            self.broadcast_ranges(n, |lo, hi| {
                for node in lo..hi {
                    let bits = frontier[node].load(Ordering::Relaxed);
                    if bits == 0 {
                        continue;
                    }
                    let trav = cur_trav[node].lock().clone();
                    let keep = visitor.visit(Visit {
                        node: node as u64,
                        frontier: bits,
                        seen: seen[node].load(Ordering::Relaxed),
                        depth,
                        traveler: trav.as_deref(),
                    }) & bits;
                    if keep == 0 {
                        continue;
                    }
                    for succ in graph.successors(node as u64).iter() {
                        let succ = succ as usize;
                        next[succ].fetch_or(keep, Ordering::Relaxed);
                        if let Some(t) = &trav {
                            let mut slot = nxt_trav[succ].lock();
                            match slot.as_mut() {
                                None => *slot = Some(Arc::clone(t)),
                                Some(existing) => Arc::make_mut(existing).merge(t, depth + 1),
                            }
                        }
                    }
                }
            })?;

            // Phase 2: fold the next frontier into the seen sets, dropping
            // wave bits (and payloads) for nodes already reached.
            let progressed = self.broadcast_ranges(n, |lo, hi| {
                let mut local_any = false;
                for node in lo..hi {
                    let old = frontier[node].swap(0, Ordering::Relaxed);
                    if old != 0 {
                        *cur_trav[node].lock() = None;
                    }
                    let pushed = next[node].load(Ordering::Relaxed);
                    if pushed != 0 {
                        let already = seen[node].load(Ordering::Relaxed);
                        let fresh = pushed & !already;
                        next[node].store(fresh, Ordering::Relaxed);
                        if fresh != 0 {
                            seen[node].store(already | fresh, Ordering::Relaxed);
                            local_any = true;
                        } else {
                            *nxt_trav[node].lock() = None;
                        }
                    }
                }
                local_any
            })?;

            std::mem::swap(&mut frontier, &mut next);
            std::mem::swap(&mut cur_trav, &mut nxt_trav);
            alive = progressed.into_iter().any(|b| b);
            depth += 1;
        }

        tracing::debug!(rounds = depth, sources = sources.len(), "multi-source search done");

        Ok(SeenBits {
            bits: seen.into_iter().map(|a| a.into_inner()).collect(),
        })
    }

    /// Run `f` over disjoint node-id ranges, one per pool thread, and wait for
    /// all of them. A panicking worker cancels the call and is surfaced as
    /// [`Error::Traversal`].
    fn broadcast_ranges<R, F>(&self, n: usize, f: F) -> Result<Vec<R>>
    where
        R: Send,
        F: Fn(usize, usize) -> R + Sync,
    {
        let chunk = n.div_ceil(self.threads).max(1);
        catch_unwind(AssertUnwindSafe(|| {
            self.pool.broadcast(|ctx| {
                let lo = (ctx.index() * chunk).min(n);
                let hi = ((ctx.index() + 1) * chunk).min(n);
                f(lo, hi)
            })
        }))
        .map_err(|payload| Error::Traversal(panic_message(&payload)))
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Edge;

    fn chain(n: u64) -> Graph {
        let g = Graph::new();
        let edges: Vec<Edge> = (0..n - 1).map(|i| Edge::new(i, i + 1)).collect();
        g.add_edges(&edges);
        g
    }

    #[test]
    fn test_single_wave_chain() {
        let g = chain(6);
        let engine = MsBfs::with_threads(4).unwrap();
        let seen = engine.reach(&g, &[0]).unwrap();
        for node in 0..6 {
            assert!(seen.reached(0, node), "node {node} not reached");
        }
    }

    #[test]
    fn test_waves_are_independent() {
        // 0→1→2 and 3→4, disconnected.
        let g = Graph::new();
        g.add_edges(&[Edge::new(0, 1), Edge::new(1, 2), Edge::new(3, 4)]);
        let engine = MsBfs::with_threads(2).unwrap();
        let seen = engine.reach(&g, &[0, 3]).unwrap();
        assert!(seen.reached(0, 2));
        assert!(!seen.reached(0, 4));
        assert!(seen.reached(1, 4));
        assert!(!seen.reached(1, 2));
    }

    #[test]
    fn test_depth_pruning() {
        let g = chain(10);
        let engine = MsBfs::with_threads(4).unwrap();
        // Stop waves from propagating past depth 3.
        let visitor = |v: Visit<'_, ()>| if v.depth >= 3 { 0 } else { v.frontier };
        let seen = engine.search(&g, &[0], &visitor, None).unwrap();
        for node in 0..=3 {
            assert!(seen.reached(0, node));
        }
        for node in 4..10 {
            assert!(!seen.reached(0, node));
        }
    }

    #[test]
    fn test_too_many_sources_rejected() {
        let g = chain(2);
        let engine = MsBfs::with_threads(1).unwrap();
        let sources: Vec<u64> = vec![0; MAX_WAVES + 1];
        assert!(matches!(
            engine.reach(&g, &sources),
            Err(Error::TooManySources { .. })
        ));
    }

    #[test]
    fn test_worker_panic_is_surfaced() {
        let g = chain(4);
        let engine = MsBfs::with_threads(2).unwrap();
        let visitor = |v: Visit<'_, ()>| {
            if v.node == 2 {
                panic!("boom at node 2");
            }
            v.frontier
        };
        let err = engine.search(&g, &[0], &visitor, None).unwrap_err();
        assert!(matches!(err, Error::Traversal(_)));
        // The engine itself stays usable for a fresh invocation.
        assert!(engine.reach(&g, &[0]).is_ok());
    }
}
