//! Vertex-cover maintenance properties.
//!
//! The cover must stay valid (every arc keeps a covered endpoint) and small
//! (at most twice a maximal matching) for any insertion sequence, and must
//! refuse deletions.

use danf::{CoverChange, DynamicVertexCover, Edge, Error};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_edges(seed: u64, nodes: u64, count: usize) -> Vec<Edge> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut edges = Vec::with_capacity(count);
    while edges.len() < count {
        let from = rng.gen_range(0..nodes);
        let to = rng.gen_range(0..nodes);
        if from != to {
            edges.push(Edge::new(from, to));
        }
    }
    edges
}

mod validity {
    use super::*;

    #[test]
    fn test_every_arc_keeps_a_covered_endpoint() {
        for seed in [1u64, 7, 42, 1234] {
            let edges = random_edges(seed, 30, 80);
            let mut vc = DynamicVertexCover::new();
            for (i, &edge) in edges.iter().enumerate() {
                vc.insert_edge(edge);
                // Check the invariant over everything inserted so far.
                for &e in &edges[..=i] {
                    assert!(
                        vc.is_in_vertex_cover(e.from) || vc.is_in_vertex_cover(e.to),
                        "seed {seed}: arc {e:?} uncovered after {i} insertions"
                    );
                }
            }
        }
    }

    #[test]
    fn test_insertions_never_remove() {
        let edges = random_edges(99, 20, 60);
        let mut vc = DynamicVertexCover::new();
        for edge in edges {
            for (_, change) in vc.insert_edge(edge) {
                assert_eq!(change, CoverChange::Added);
            }
        }
    }

    #[test]
    fn test_membership_is_stable() {
        // Once added, a node never leaves the cover under insertions.
        let edges = random_edges(5, 25, 70);
        let mut vc = DynamicVertexCover::new();
        let mut members: Vec<u64> = Vec::new();
        for edge in edges {
            for (node, _) in vc.insert_edge(edge) {
                members.push(node);
            }
            for &node in &members {
                assert!(vc.is_in_vertex_cover(node));
            }
        }
    }
}

mod size_bound {
    use super::*;

    #[test]
    fn test_cover_is_a_two_approximation() {
        for seed in [3u64, 11, 77] {
            let edges = random_edges(seed, 40, 120);
            let mut vc = DynamicVertexCover::new();
            for edge in edges {
                vc.insert_edge(edge);
            }
            assert_eq!(vc.vertex_cover_size(), 2 * vc.matching_size());
            assert_eq!(vc.iter().count() as u64, vc.vertex_cover_size());
        }
    }

    #[test]
    fn test_dense_pair_block() {
        // Complete bipartite-ish burst on 4 nodes: cover stays bounded.
        let mut vc = DynamicVertexCover::new();
        for from in 0..4u64 {
            for to in 0..4u64 {
                if from != to {
                    vc.insert_edge(Edge::new(from, to));
                }
            }
        }
        assert!(vc.vertex_cover_size() <= 4);
    }
}

mod deletions {
    use super::*;

    #[test]
    fn test_delete_always_fails() {
        let mut vc = DynamicVertexCover::new();
        vc.insert_edge(Edge::new(0, 1));
        for edge in [Edge::new(0, 1), Edge::new(5, 6)] {
            assert!(matches!(vc.delete_edge(edge), Err(Error::Unsupported(_))));
        }
        // State untouched by the failed calls.
        assert_eq!(vc.vertex_cover_size(), 2);
    }
}
