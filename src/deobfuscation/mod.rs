//! Deobfuscation passes and the session state they share.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐   optimize()   ┌──────────────────────────────┐
//! │    Host    │ ─────────────► │ Unflattener (BlockOptimizer) │
//! └────────────┘                └──────────────┬───────────────┘
//!       │                                      │
//!       │ owns                                 │ reads/updates
//!       ▼                                      ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Session: blacklist, whitelist, last maturity, event log      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! A host keeps one [`Session`] for as long as it keeps decompiling, calls
//! [`crate::BlockOptimizer::optimize`] on each function at every maturity
//! level (or hands a whole batch to [`Session::run_all`]), and reads
//! diagnostics back from [`Session::events`].
//!
//! # Key Types
//!
//! - [`Unflattener`] - The control flow unflattening pass
//! - [`UnflattenConfig`] - Thresholds and feature switches
//! - [`Session`] - Memo sets and event log shared across invocations
//! - [`DispatchInfo`] - The recognized dispatcher layout of one function

mod config;
mod context;
pub mod passes;

pub use config::UnflattenConfig;
pub use context::Session;
pub use passes::{DispatchInfo, Unflattener};
