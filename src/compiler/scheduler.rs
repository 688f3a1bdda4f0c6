//! Parallel driver for block optimizers.
//!
//! Functions are independent of each other, so a batch is processed with
//! rayon: every worker owns one function at a time and shares only the
//! [`Session`], whose memo sets and event log are concurrent. A failing
//! function is logged and skipped; it never aborts the batch.

use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;

use crate::{
    analysis::ir::Function,
    compiler::{pass::BlockOptimizer, EventKind},
    deobfuscation::Session,
};

/// Runs a sequence of optimizers over a batch of functions.
///
/// Each function goes through every pass in order; the whole sequence is
/// repeated until a round makes no change or `max_rounds` is reached.
pub struct PassScheduler {
    /// Maximum rounds per function.
    max_rounds: usize,
    /// Passes in execution order.
    passes: Vec<Box<dyn BlockOptimizer>>,
}

impl Default for PassScheduler {
    fn default() -> Self {
        Self::new(4)
    }
}

impl PassScheduler {
    /// Creates an empty scheduler.
    ///
    /// # Arguments
    ///
    /// * `max_rounds` - Maximum number of rounds over the pass list per function.
    #[must_use]
    pub fn new(max_rounds: usize) -> Self {
        Self {
            max_rounds,
            passes: Vec::new(),
        }
    }

    /// Appends a pass.
    pub fn add_pass<P: BlockOptimizer + 'static>(&mut self, pass: P) -> &mut Self {
        self.passes.push(Box::new(pass));
        self
    }

    /// Returns the registered passes' names in execution order.
    #[must_use]
    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Runs every pass over every function in parallel.
    ///
    /// # Returns
    ///
    /// The total number of changes across the batch.
    pub fn run(&self, funcs: &mut [Function], session: &Session) -> usize {
        let total = AtomicUsize::new(0);
        funcs.par_iter_mut().for_each(|func| {
            for _ in 0..self.max_rounds {
                let changed: usize = self
                    .passes
                    .iter()
                    .map(|pass| run_guarded(pass.as_ref(), func, session))
                    .sum();
                if changed == 0 {
                    break;
                }
                total.fetch_add(changed, Ordering::Relaxed);
            }
        });
        total.into_inner()
    }
}

/// Runs one pass over every function in parallel.
pub(crate) fn run_batch(pass: &dyn BlockOptimizer, funcs: &mut [Function], session: &Session) -> usize {
    funcs
        .par_iter_mut()
        .map(|func| run_guarded(pass, func, session))
        .sum()
}

/// Runs `pass` on `func`, turning an error into an error event.
fn run_guarded(pass: &dyn BlockOptimizer, func: &mut Function, session: &Session) -> usize {
    match pass.optimize(func, session) {
        Ok(changed) => changed,
        Err(e) => {
            session
                .events
                .record(EventKind::Error)
                .function(func.entry_ea())
                .pass(pass.name())
                .message(e.to_string());
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{structure_error, Result};

    /// Changes every function once, then reports no further changes.
    struct OneShot;

    impl BlockOptimizer for OneShot {
        fn name(&self) -> &'static str {
            "one-shot"
        }

        fn optimize(&self, func: &mut Function, _session: &Session) -> Result<usize> {
            if func.chains_dirty() {
                return Ok(0);
            }
            func.mark_chains_dirty();
            Ok(1)
        }
    }

    struct Failing;

    impl BlockOptimizer for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn optimize(&self, _func: &mut Function, _session: &Session) -> Result<usize> {
            Err(structure_error!("broken"))
        }
    }

    #[test]
    fn test_scheduler_runs_to_fixpoint() {
        let mut scheduler = PassScheduler::default();
        scheduler.add_pass(OneShot);
        assert_eq!(scheduler.pass_names(), vec!["one-shot"]);

        let mut funcs: Vec<Function> = (0..8).map(Function::new).collect();
        let session = Session::default();
        assert_eq!(scheduler.run(&mut funcs, &session), 8);
        assert!(funcs.iter().all(Function::chains_dirty));
    }

    #[test]
    fn test_errors_do_not_abort_batch() {
        let mut funcs: Vec<Function> = (0..3).map(Function::new).collect();
        let session = Session::default();

        assert_eq!(run_batch(&Failing, &mut funcs, &session), 0);
        assert_eq!(session.events.count_kind(EventKind::Error), 3);
        assert!(session.events.errors().all(|e| e.pass.as_deref() == Some("failing")));
    }
}
