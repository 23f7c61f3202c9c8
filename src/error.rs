use thiserror::Error;

/// Errors surfaced by graph maintenance, traversal and queries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A maximum hop count of zero makes no history at all.
    #[error("h must be at least 1 (got {0})")]
    InvalidH(usize),
    /// Hop count outside `[1, h]`.
    #[error("hop count {got} out of range [1, {max}]")]
    InvalidHopCount { got: usize, max: usize },
    /// Node id beyond the current node space.
    #[error("node {0} does not exist")]
    UnknownNode(u64),
    /// Non-top-level query for a node outside the vertex cover.
    #[error("node {0} is not in the vertex cover; only the top level is stored for it")]
    NotInVertexCover(u64),
    /// More sources than wave bits in a single search.
    #[error("{got} sources exceed the {max}-wave capacity of one search")]
    TooManySources { got: usize, max: usize },
    /// Traveler list does not line up with the source list.
    #[error("{got} travelers for {want} sources")]
    TravelerMismatch { got: usize, want: usize },
    /// Operation rejected by design (e.g. edge deletion).
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
    /// A traversal worker died; counter state may be partially updated.
    #[error("traversal worker failed: {0}")]
    Traversal(String),
    /// Worker-pool or storage allocation failure.
    #[error("resource allocation failed: {0}")]
    Resource(String),
    /// The instance saw a traversal failure earlier and must be rebuilt.
    #[error("instance is inconsistent after a traversal failure; rebuild it")]
    Inconsistent,
}

pub type Result<T> = std::result::Result<T, Error>;
