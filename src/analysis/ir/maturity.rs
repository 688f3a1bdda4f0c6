use strum::{Display, EnumIter, EnumString};

/// Microcode maturity levels, in the order the decompiler reaches them.
///
/// The deflattening pass is designed to run at a single maturity level, after
/// local optimization has folded the obfuscator's arithmetic on the state
/// variable into plain constant moves but before global optimization starts
/// merging the flattened regions.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumIter, EnumString,
)]
pub enum Maturity {
    /// Nothing generated yet.
    #[strum(serialize = "MMAT_ZERO")]
    Zero,
    /// Raw microcode straight from the instruction lifter.
    #[strum(serialize = "MMAT_GENERATED")]
    Generated,
    /// Preoptimized microcode.
    #[strum(serialize = "MMAT_PREOPTIMIZED")]
    PreOptimized,
    /// Local (per-block) optimization done; the graph is final enough to
    /// rewrite.
    #[strum(serialize = "MMAT_LOCOPT")]
    LocalOpt,
    /// Call arguments are resolved.
    #[strum(serialize = "MMAT_CALLS")]
    Calls,
    /// First global optimization round.
    #[strum(serialize = "MMAT_GLBOPT1")]
    GlobalOpt1,
    /// Second global optimization round.
    #[strum(serialize = "MMAT_GLBOPT2")]
    GlobalOpt2,
    /// Third global optimization round.
    #[strum(serialize = "MMAT_GLBOPT3")]
    GlobalOpt3,
    /// Local variables allocated.
    #[strum(serialize = "MMAT_LVARS")]
    LocalVars,
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_maturity_order() {
        let levels: Vec<_> = Maturity::iter().collect();
        assert_eq!(levels.first(), Some(&Maturity::Zero));
        assert_eq!(levels.last(), Some(&Maturity::LocalVars));
        assert!(levels.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_maturity_names() {
        assert_eq!(Maturity::LocalOpt.to_string(), "MMAT_LOCOPT");
        assert_eq!("MMAT_GLBOPT2".parse::<Maturity>().ok(), Some(Maturity::GlobalOpt2));
    }
}
