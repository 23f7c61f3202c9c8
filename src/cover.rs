//! Incrementally maintained 2-approximate vertex cover.
//!
//! Backed by an implicit maximal matching: a node is in the cover iff it is an
//! endpoint of a matched edge (self-loops aside). Inserting an arc whose
//! endpoints are both uncovered matches them and adds both to the cover;
//! anything else is already covered. Every arc therefore keeps at least one
//! covered endpoint, and the cover is at most twice the size of a maximum
//! matching. Deletions are out of scope and rejected.

use crate::error::{Error, Result};
use crate::graph::Edge;
use ahash::AHashMap;
use roaring::RoaringTreemap;
use smallvec::SmallVec;

/// How one node's cover membership changed during a single mutation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CoverChange {
    Added,
    Removed,
}

/// Per-mutation change list. Insertions touch at most two nodes.
pub type CoverChanges = SmallVec<[(u64, CoverChange); 2]>;

pub struct DynamicVertexCover {
    /// node → its partner in the maximal matching
    matched_with: AHashMap<u64, u64>,
    cover: RoaringTreemap,
}

impl DynamicVertexCover {
    pub fn new() -> Self {
        Self {
            matched_with: AHashMap::new(),
            cover: RoaringTreemap::new(),
        }
    }

    /// Account for a newly inserted arc. Returns the nodes whose membership
    /// changed; insertion never produces [`CoverChange::Removed`].
    pub fn insert_edge(&mut self, edge: Edge) -> CoverChanges {
        let mut changes = CoverChanges::new();
        if self.cover.contains(edge.from) || self.cover.contains(edge.to) {
            return changes;
        }
        if edge.from == edge.to {
            // A self-loop cannot join the matching; its endpoint still must
            // be covered.
            self.cover.insert(edge.from);
            changes.push((edge.from, CoverChange::Added));
            return changes;
        }
        // Neither endpoint is covered, so neither is matched (matched nodes
        // are always covered): extend the matching.
        self.matched_with.insert(edge.from, edge.to);
        self.matched_with.insert(edge.to, edge.from);
        self.cover.insert(edge.from);
        self.cover.insert(edge.to);
        changes.push((edge.from, CoverChange::Added));
        changes.push((edge.to, CoverChange::Added));
        changes
    }

    /// Edge deletion is not supported by this cover.
    pub fn delete_edge(&mut self, _edge: Edge) -> Result<CoverChanges> {
        Err(Error::Unsupported("edge deletion from the vertex cover"))
    }

    pub fn is_in_vertex_cover(&self, node: u64) -> bool {
        self.cover.contains(node)
    }

    pub fn vertex_cover_size(&self) -> u64 {
        self.cover.len()
    }

    /// Matched edges currently backing the cover.
    pub fn matching_size(&self) -> u64 {
        (self.matched_with.len() / 2) as u64
    }

    /// Cover members in ascending node order.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.cover.iter()
    }

    pub fn memory_usage(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.matched_with.len() * 2 * std::mem::size_of::<u64>()
            + self.cover.serialized_size() as usize
    }
}

impl Default for DynamicVertexCover {
    fn default() -> Self {
        Self::new()
    }
}
