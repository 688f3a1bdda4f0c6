//! Two-way conditionals folded into a shared dispatcher predecessor.
//!
//! Flattening an `if` often produces this shape, where `mb` copies a
//! temporary into the state variable and each arm of the condition assigns
//! the temporary a different key:
//!
//! ```text
//!        jcc_block  (mov #K1, t ; jcc ... @mb)
//!         |      \
//!         |     non_jcc  (mov #K2, t)
//!         |      /
//!           mb      (mov t, state ; goto @dispatcher)
//! ```
//!
//! Neither key reaches `mb` on its own, so the backward trace from `mb`
//! fails. The recovery traces the copied temporary separately along both
//! incoming paths; if both resolve, `mb` can be pointed at one target and a
//! copy of `mb` appended to `non_jcc` can be pointed at the other.

use crate::{
    analysis::ir::{Function, Operand},
    compiler::EventLog,
    deobfuscation::passes::unflattening::{tracer::MovChain, DispatchInfo, Unflattener},
};

/// The two predecessors of a block, classified by their terminators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct JccSplit {
    /// The predecessor ending in a conditional jump.
    pub ends_with_jcc: usize,
    /// The other predecessor.
    pub non_jcc: usize,
}

/// Recovered targets for both paths into a shared predecessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct TwoWayTargets {
    /// The predecessor that receives a copy of the shared block.
    pub non_jcc: usize,
    /// Target for the path through the conditional jump block.
    pub goto_target: usize,
    /// Target for the path through `non_jcc`.
    pub jcc_target: usize,
}

/// Classifies two blocks by whether they end in a conditional jump to a
/// block.
///
/// # Returns
///
/// `None` unless both blocks have instructions and exactly one of them ends
/// in a conditional jump with a block target.
pub(super) fn split_by_jcc_ending(func: &Function, first: usize, second: usize) -> Option<JccSplit> {
    let ends_in_jcc = |serial: usize| -> Option<bool> {
        let tail = func.block(serial)?.tail()?;
        Some(tail.is_jcc() && tail.jump_target().is_some())
    };

    match (ends_in_jcc(first)?, ends_in_jcc(second)?) {
        (true, false) => Some(JccSplit {
            ends_with_jcc: first,
            non_jcc: second,
        }),
        (false, true) => Some(JccSplit {
            ends_with_jcc: second,
            non_jcc: first,
        }),
        _ => None,
    }
}

/// Resolves both paths into `mb`, a dispatcher predecessor with two
/// predecessors of its own.
///
/// # Arguments
///
/// * `pass` - Supplies the configured trace.
/// * `func` - The function being rewritten.
/// * `info` - The recognized dispatcher.
/// * `mb` - The shared predecessor.
/// * `cluster_head` - Bound for every backward trace.
/// * `op_copy` - The operand `mb` copies into the state variable.
/// * `erasures` - Receives the `mov`s crossed on both paths.
/// * `events` - Diagnostics.
///
/// # Returns
///
/// The two targets, or `None` if the shape does not match or either path
/// does not resolve to a known key.
#[allow(clippy::too_many_arguments)]
pub(super) fn handle_two_preds(
    pass: &Unflattener,
    func: &Function,
    info: &DispatchInfo,
    mb: usize,
    cluster_head: usize,
    op_copy: &Operand,
    erasures: &mut MovChain,
    events: &EventLog,
) -> Option<TwoWayTargets> {
    let block = func.block(mb)?;
    let split = split_by_jcc_ending(func, block.pred(0)?, block.pred(1)?)?;

    let non_jcc = func.block(split.non_jcc)?;
    if non_jcc.npred() != 1 || non_jcc.pred(0) != Some(split.ends_with_jcc) {
        return None;
    }

    let goto_target = pass.block_target_or_last_copy(
        func,
        info,
        split.ends_with_jcc,
        cluster_head,
        op_copy,
        false,
        erasures,
        events,
    )?;
    let jcc_target = pass.block_target_or_last_copy(
        func,
        info,
        split.non_jcc,
        cluster_head,
        op_copy,
        true,
        erasures,
        events,
    )?;

    Some(TwoWayTargets {
        non_jcc: split.non_jcc,
        goto_target,
        jcc_target,
    })
}
