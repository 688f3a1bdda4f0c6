//! Analysis session shared across functions and optimization rounds.
//!
//! The [`Session`] holds everything the unflattener remembers between
//! invocations: which functions are known not to be flattened, which passed
//! the randomness check, and the last maturity each function was processed
//! at. All collections are concurrent so one session can serve a parallel
//! batch.

use dashmap::{DashMap, DashSet};

use crate::{
    analysis::ir::{Function, Maturity},
    compiler::{run_batch, BlockOptimizer, DerivedStats, EventKind, EventLog},
};

/// Memoization and diagnostics for a deflattening session.
///
/// Functions are identified by their entry address. A session lives as long
/// as the host keeps it; dropping it or calling [`Session::reset`] forgets
/// every decision.
#[derive(Debug, Default)]
pub struct Session {
    /// Functions known not to be flattened. Never analysed again.
    blacklist: DashSet<u64>,

    /// Functions whose state constants passed the randomness check.
    whitelist: DashSet<u64>,

    /// Last maturity each function was processed at.
    last_maturity: DashMap<u64, Maturity>,

    /// Events recorded by every pass run in this session.
    pub events: EventLog,
}

impl Session {
    /// Creates an empty session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks if a function was marked as not flattened.
    ///
    /// # Arguments
    ///
    /// * `entry_ea` - Entry address of the function.
    #[must_use]
    pub fn is_blacklisted(&self, entry_ea: u64) -> bool {
        self.blacklist.contains(&entry_ea)
    }

    /// Marks a function as not flattened.
    ///
    /// A whitelisted function is never blacklisted; the call is ignored.
    ///
    /// # Returns
    ///
    /// `true` if the function was newly blacklisted.
    pub fn blacklist(&self, entry_ea: u64) -> bool {
        if self.is_whitelisted(entry_ea) || !self.blacklist.insert(entry_ea) {
            return false;
        }
        self.events.record(EventKind::FunctionBlacklisted).function(entry_ea);
        true
    }

    /// Checks if a function passed the randomness check.
    #[must_use]
    pub fn is_whitelisted(&self, entry_ea: u64) -> bool {
        self.whitelist.contains(&entry_ea)
    }

    /// Marks a function as flattened, so later rounds skip the randomness
    /// check. Hosts may also call this to force analysis of a function whose
    /// state constants do not look random.
    ///
    /// # Returns
    ///
    /// `true` if the function was newly whitelisted.
    pub fn whitelist(&self, entry_ea: u64) -> bool {
        if !self.whitelist.insert(entry_ea) {
            return false;
        }
        self.events.record(EventKind::FunctionWhitelisted).function(entry_ea);
        true
    }

    /// Records that a function is being processed at `maturity`.
    ///
    /// # Returns
    ///
    /// `false` if the function was already processed at this maturity.
    pub fn claim_maturity(&self, entry_ea: u64, maturity: Maturity) -> bool {
        self.last_maturity.insert(entry_ea, maturity) != Some(maturity)
    }

    /// Returns the last maturity a function was processed at.
    #[must_use]
    pub fn last_maturity(&self, entry_ea: u64) -> Option<Maturity> {
        self.last_maturity.get(&entry_ea).map(|m| *m)
    }

    /// Forgets every blacklist, whitelist and maturity decision. The event
    /// log is kept.
    pub fn reset(&self) {
        self.blacklist.clear();
        self.whitelist.clear();
        self.last_maturity.clear();
    }

    /// Runs `pass` over every function in parallel.
    ///
    /// Errors from individual functions are recorded as
    /// [`EventKind::Error`] events and do not stop the batch.
    ///
    /// # Returns
    ///
    /// The total number of changes.
    pub fn run_all(&self, pass: &dyn BlockOptimizer, funcs: &mut [Function]) -> usize {
        run_batch(pass, funcs, self)
    }

    /// Returns statistics derived from the event log.
    #[must_use]
    pub fn stats(&self) -> DerivedStats {
        DerivedStats::from_log(&self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blacklist_respects_whitelist() {
        let session = Session::new();
        assert!(session.whitelist(0x10));
        assert!(!session.whitelist(0x10));
        assert!(!session.blacklist(0x10));
        assert!(!session.is_blacklisted(0x10));

        assert!(session.blacklist(0x20));
        assert!(session.is_blacklisted(0x20));
        assert_eq!(session.stats().blacklisted, 1);
    }

    #[test]
    fn test_claim_maturity_once() {
        let session = Session::new();
        assert!(session.claim_maturity(1, Maturity::LocalOpt));
        assert!(!session.claim_maturity(1, Maturity::LocalOpt));
        assert!(session.claim_maturity(1, Maturity::Calls));
        assert_eq!(session.last_maturity(1), Some(Maturity::Calls));
    }

    #[test]
    fn test_reset_forgets_decisions() {
        let session = Session::new();
        session.blacklist(1);
        session.claim_maturity(1, Maturity::LocalOpt);
        session.reset();

        assert!(!session.is_blacklisted(1));
        assert!(session.claim_maturity(1, Maturity::LocalOpt));
        assert!(!session.events.is_empty());
    }
}
