//! Configuration for the unflattening pass.
//!
//! The defaults match the behavior the pass was tuned for: run once at the
//! local optimization maturity, accept a dispatcher after two comparisons
//! whose constants look random (set-bit fraction between 0.4 and 0.6), and
//! tidy the graph afterwards.

use crate::{analysis::ir::Maturity, Error, Result};

/// Configuration for [`crate::Unflattener`].
#[derive(Debug, Clone, PartialEq)]
pub struct UnflattenConfig {
    /// Maturity at which the pass runs (default: [`Maturity::LocalOpt`]).
    pub maturity: Maturity,

    /// Minimum number of state comparisons for a dispatcher (default: 2).
    pub min_comparisons: usize,

    /// Lower bound of the accepted set-bit fraction (default: 0.4).
    pub entropy_min: f64,

    /// Upper bound of the accepted set-bit fraction (default: 0.6).
    pub entropy_max: f64,

    /// Width in bytes of state constants assigned in the first block (default: 4).
    pub key_size: u8,

    /// Collapse goto-to-goto chains before analysis (default: true).
    pub collapse_gotos: bool,

    /// Remove unreachable blocks after rewriting (default: true).
    pub prune_unreachable: bool,

    /// Verify graph consistency after each rewrite (default: true).
    pub verify: bool,

    /// Search forward from the cluster head when a state copy ends in a
    /// stack slot (default: true).
    pub stack_forward_fallback: bool,

    /// Recover two-way conditionals that share a dispatcher predecessor
    /// (default: true).
    pub conditional_recovery: bool,
}

impl Default for UnflattenConfig {
    fn default() -> Self {
        Self {
            maturity: Maturity::LocalOpt,
            min_comparisons: 2,
            entropy_min: 0.4,
            entropy_max: 0.6,
            key_size: 4,
            collapse_gotos: true,
            prune_unreachable: true,
            verify: true,
            stack_forward_fallback: true,
            conditional_recovery: true,
        }
    }
}

impl UnflattenConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fewer false positives: requires at least four state comparisons.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            min_comparisons: 4,
            ..Self::default()
        }
    }

    /// Accepts less random-looking state constants (band [0.25, 0.75]).
    #[must_use]
    pub fn permissive() -> Self {
        Self {
            entropy_min: 0.25,
            entropy_max: 0.75,
            ..Self::default()
        }
    }

    /// Sets the maturity the pass runs at.
    #[must_use]
    pub fn with_maturity(mut self, maturity: Maturity) -> Self {
        self.maturity = maturity;
        self
    }

    /// Sets the accepted set-bit fraction band.
    #[must_use]
    pub fn with_entropy_band(mut self, min: f64, max: f64) -> Self {
        self.entropy_min = min;
        self.entropy_max = max;
        self
    }

    /// Checks that the values are usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the entropy band is inverted or outside
    /// `[0, 1]`, or if the key size is zero or wider than 8 bytes.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.entropy_min) || !(0.0..=1.0).contains(&self.entropy_max) {
            return Err(Error::Config(format!(
                "entropy band [{}, {}] outside [0, 1]",
                self.entropy_min, self.entropy_max
            )));
        }
        if self.entropy_min > self.entropy_max {
            return Err(Error::Config(format!(
                "entropy band [{}, {}] is inverted",
                self.entropy_min, self.entropy_max
            )));
        }
        if self.key_size == 0 || self.key_size > 8 {
            return Err(Error::Config(format!("key size {} not in 1..=8", self.key_size)));
        }
        Ok(())
    }
}
