// danf - Dynamic Approximate Neighborhood Functions
// Per-hop reachable-set estimates for growing directed graphs, maintained
// incrementally under edge insertion.

pub mod error;
pub mod graph;
pub mod sketch;
pub mod cover;
pub mod msbfs;
pub mod hyperball;
pub mod danf;

// Re-export main types
pub use error::{Error, Result};
pub use graph::{Edge, Graph};
pub use sketch::CounterArray;
pub use cover::{CoverChange, DynamicVertexCover};
pub use msbfs::{MsBfs, SeenBits, Traveler, Visit, Visitor};
pub use danf::{Danf, MemoryStats, DEFAULT_PARTITION_SIZE};
