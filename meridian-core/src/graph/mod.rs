//! Link graph over chunks.
//!
//! - [`LinkGraph`]: persisted forward/reverse adjacency for traversal
//! - [`AutoLinker`]: conversation, temporal, and tag linking on creation
//! - [`calculate_link_strength`]: per-type edge weighting

mod index;
mod linker;
mod proptest;

pub use index::{LinkGraph, LinkIndex};
pub use linker::{
    calculate_link_strength, AutoLinker, Contradiction, DEFAULT_TEMPORAL_WINDOW_MINUTES,
};
