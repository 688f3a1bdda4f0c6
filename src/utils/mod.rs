//! Shared data structures and graph algorithms.

mod bitset;
pub mod graph;

pub use bitset::BitSet;
