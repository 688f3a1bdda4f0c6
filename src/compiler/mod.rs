//! Graph rewriting infrastructure.
//!
//! This module sits between the microcode model and the deflattening logic:
//!
//! - [`crate::analysis`] - Microcode model and graph verification
//! - [`compiler`](self) - Pass trait, rewriting primitives, diagnostics, batch driver
//! - [`crate::deobfuscation`] - Dispatcher recognition and unflattening
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │  BlockOptimizer trait        One function at a time        │
//! │    └─ optimize()             Returns the change count      │
//! │                                                            │
//! │  Rewriting primitives                                      │
//! │    ├─ collapse_single_gotos  goto-to-goto shortcuts        │
//! │    ├─ DeferredGraphModifier  queued edge edits             │
//! │    └─ prune_unreachable      drop + renumber dead blocks   │
//! │                                                            │
//! │  PassScheduler               rayon batch, per-function     │
//! │                              rounds until stable           │
//! │                                                            │
//! │  EventLog                    Change tracking, diagnostics  │
//! └────────────────────────────────────────────────────────────┘
//! ```

mod events;
mod pass;
mod passes;
mod scheduler;

pub use events::{DerivedStats, Event, EventBuilder, EventKind, EventLog};
pub use pass::BlockOptimizer;
pub use passes::{collapse_single_gotos, prune_unreachable, DeferredGraphModifier};
pub use scheduler::PassScheduler;

pub(crate) use scheduler::run_batch;
