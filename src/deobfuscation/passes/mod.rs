//! Built-in deobfuscation passes.
//!
//! | Pass | Description |
//! |------|-------------|
//! | [`Unflattener`] | Recovers direct control flow from dispatcher-based flattening |
//!
//! The graph cleanups the unflattener relies on (goto collapsing, pruning,
//! deferred edge edits) are exported from [`crate::compiler`] because they
//! are not specific to any obfuscation.

pub mod unflattening;

pub use unflattening::{DispatchInfo, Unflattener};
