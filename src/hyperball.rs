//! Non-incremental neighborhood-function pass.
//!
//! Classic ball expansion over probabilistic counters: every node's counter is
//! seeded with the node itself, then each iteration unions every successor's
//! previous-round counter, so after iteration `i` a node's counter holds its
//! `i`-hop out-ball. Runs `h` iterations and returns one dense counter array
//! per hop count. Used to seed the dynamic orchestrator at construction and as
//! the recompute-from-scratch baseline in tests.

use crate::graph::Graph;
use crate::sketch::CounterArray;
use rayon::prelude::*;
use rayon::ThreadPool;

/// Compute `h` dense history levels for `graph`: level `l` estimates every
/// node's `(l + 1)`-hop out-ball. All levels share `seed` and `log2m`, so
/// arrays produced with equal arguments are register-identical.
pub fn neighborhood_history(
    graph: &Graph,
    h: usize,
    log2m: u32,
    seed: u64,
    pool: &ThreadPool,
) -> Vec<CounterArray> {
    let n = graph.num_nodes() as usize;
    let current = CounterArray::new(n, log2m, seed);
    pool.install(|| {
        (0..n).into_par_iter().for_each(|node| {
            current.add(node, node as u64);
        });
    });

    let mut levels = Vec::with_capacity(h);
    let mut current = current;
    for _ in 0..h {
        let next = current.duplicate();
        pool.install(|| {
            (0..n).into_par_iter().for_each(|node| {
                for succ in graph.successors(node as u64).iter() {
                    if succ as usize != node {
                        next.union(node, &current, succ as usize);
                    }
                }
            });
        });
        current = next;
        levels.push(current.duplicate());
    }
    levels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Edge;
    use crate::msbfs::MsBfs;

    #[test]
    fn test_chain_ball_sizes() {
        // 0→1→2→3: node 0's k-hop ball has k+1 members.
        let g = Graph::new();
        g.add_edges(&[Edge::new(0, 1), Edge::new(1, 2), Edge::new(2, 3)]);
        let engine = MsBfs::with_threads(2).unwrap();
        let levels = neighborhood_history(&g, 3, 11, 0x5eed, engine.pool());
        assert_eq!(levels.len(), 3);
        for (l, expect) in [(0usize, 2.0f64), (1, 3.0), (2, 4.0)] {
            let c = levels[l].count(0);
            assert!((c - expect).abs() < 0.5, "level {l}: got {c}, want {expect}");
        }
        // Node 3 has no successors: every level is just itself.
        for level in &levels {
            let c = level.count(3);
            assert!((c - 1.0).abs() < 0.1, "got {c}");
        }
    }

    #[test]
    fn test_same_seed_is_deterministic() {
        let g = Graph::new();
        g.add_edges(&[Edge::new(0, 1), Edge::new(1, 0), Edge::new(1, 2)]);
        let engine = MsBfs::with_threads(4).unwrap();
        let a = neighborhood_history(&g, 2, 8, 7, engine.pool());
        let b = neighborhood_history(&g, 2, 8, 7, engine.pool());
        for (la, lb) in a.iter().zip(&b) {
            for node in 0..3 {
                assert!(la.counter_eq(node, lb, node));
            }
        }
    }
}
