//! Graph rewriting primitives shared by the optimizers.
//!
//! - [`collapse_single_gotos`] - Shortcut goto-to-goto chains
//! - [`DeferredGraphModifier`] - Queue edge edits while iterating
//! - [`prune_unreachable`] - Drop and renumber blocks unreachable from the entry

mod gotos;
mod modifier;
mod prune;

pub use gotos::collapse_single_gotos;
pub use modifier::DeferredGraphModifier;
pub use prune::prune_unreachable;
