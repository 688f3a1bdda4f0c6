//! Pass trait for block-level optimizers.
//!
//! A [`BlockOptimizer`] is invoked by the host once per optimization round
//! for each function. It mutates the function's graph in place and reports
//! how many changes it made; diagnostics go to the session's event log.

use crate::{analysis::ir::Function, deobfuscation::Session, Result};

/// A graph-level optimizer that runs on one function at a time.
///
/// Optimizers must be thread-safe (Send + Sync) so a [`Session`] can drive
/// one instance over many functions in parallel. Per-function state belongs
/// on the stack of [`BlockOptimizer::optimize`]; state that must survive
/// between rounds (blacklists, maturity markers) belongs in the session.
pub trait BlockOptimizer: Send + Sync {
    /// Unique name for logging and debugging.
    fn name(&self) -> &'static str;

    /// Runs the optimizer on a single function.
    ///
    /// # Arguments
    ///
    /// * `func` - The function to transform.
    /// * `session` - Memoization sets and the event log shared by all
    ///   invocations.
    ///
    /// # Returns
    ///
    /// The number of changes made; zero if the function was left untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if a rewrite left the graph inconsistent.
    fn optimize(&self, func: &mut Function, session: &Session) -> Result<usize>;

    /// Get a description of what this optimizer does.
    fn description(&self) -> &'static str {
        "No description available"
    }
}
