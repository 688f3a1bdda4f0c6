//! Definition tracing for the state variable.
//!
//! Flattened code rarely assigns a case's successor key straight into the
//! state variable. More often the key is moved through one or two
//! temporaries first:
//!
//! ```text
//! mov #0x42424242.4, r12.4
//! ...
//! mov r12.4, %var_14.4
//! mov %var_14.4, r8.4      ; r8 is the state variable
//! goto @dispatcher
//! ```
//!
//! [`find_numeric_def_backwards`] walks such copy chains from the bottom of a
//! block upwards, optionally into single predecessors, and records every
//! `mov` it crosses so the caller can delete them once the edge is rewritten.
//! It gives up at the first definition that is not a plain `mov`: loads,
//! stores and calls may alias the tracked location, so following them would
//! be unsound.

use crate::{
    analysis::ir::{truncate, Function, Operand},
    utils::BitSet,
};

/// One `mov` crossed while tracing.
#[derive(Debug, Clone, PartialEq)]
pub struct MovInfo {
    /// Source operand of the `mov`.
    pub copied: Operand,
    /// Block containing the `mov`.
    pub block: usize,
    /// Index of the `mov` in its block.
    pub index: usize,
}

/// The `mov`s crossed by a trace, nearest to the start point first.
pub type MovChain = Vec<MovInfo>;

/// Controls how far a backward trace may go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceOptions {
    /// Continue into the sole predecessor when a block is exhausted.
    pub recursive: bool,
    /// Allow continuing into a predecessor with more than one successor.
    pub allow_multi_succ: bool,
    /// Never continue above this block.
    pub stop_block: Option<usize>,
}

impl TraceOptions {
    /// Options for a trace bounded by a cluster head.
    #[must_use]
    pub fn bounded(stop_block: usize, allow_multi_succ: bool) -> Self {
        Self {
            recursive: true,
            allow_multi_succ,
            stop_block: Some(stop_block),
        }
    }
}

/// Outcome of a backward trace.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TraceResult {
    /// The immediate that ends the chain, if one was reached.
    pub constant: Option<Operand>,
    /// Every `mov` crossed, including the one with the immediate.
    pub chain: MovChain,
}

impl TraceResult {
    /// Returns the constant truncated to its declared width.
    #[must_use]
    pub fn value(&self) -> Option<u64> {
        self.constant.as_ref().and_then(key_value)
    }

    /// Returns the source of the last `mov` crossed.
    #[must_use]
    pub fn last_copy(&self) -> Option<&Operand> {
        self.chain.last().map(|m| &m.copied)
    }
}

/// Returns an immediate's value truncated to its declared width.
pub(crate) fn key_value(operand: &Operand) -> Option<u64> {
    match operand {
        Operand::Number { value, size } => Some(truncate(*value, *size)),
        _ => None,
    }
}

/// Searches backwards from the end of `block` for an immediate that reaches
/// `operand` through a chain of `mov`s.
///
/// # Arguments
///
/// * `func` - The function to search.
/// * `block` - Block to start from; scanning begins at its last instruction.
/// * `operand` - The register or stack slot to trace.
/// * `options` - Whether and how far to continue into predecessors.
///
/// # Returns
///
/// The chain of `mov`s crossed and, on success, the immediate at its end.
/// A trace that fails keeps the partial chain, so callers can inspect the
/// last copied operand.
#[must_use]
pub fn find_numeric_def_backwards(
    func: &Function,
    block: usize,
    operand: &Operand,
    options: TraceOptions,
) -> TraceResult {
    let mut result = TraceResult::default();
    if !operand.is_trackable() {
        return result;
    }

    let mut tracked = operand.clone();
    let mut current = block;
    // Scan instructions strictly below this index.
    let mut limit: Option<usize> = None;
    let mut visited = BitSet::new(func.block_count());
    visited.insert(block);

    loop {
        let Some(mb) = func.block(current) else {
            return result;
        };
        let end = limit.unwrap_or(mb.len()).min(mb.len());
        let def = mb.instructions()[..end]
            .iter()
            .enumerate()
            .rev()
            .find(|(_, insn)| insn.defines(&tracked));

        if let Some((index, insn)) = def {
            if !insn.is_mov() {
                return result;
            }
            result.chain.push(MovInfo {
                copied: insn.left.clone(),
                block: current,
                index,
            });
            if insn.left.is_number() {
                result.constant = Some(insn.left.clone());
                return result;
            }
            if !insn.left.is_trackable() {
                return result;
            }
            tracked = insn.left.clone();
            limit = Some(index);
            continue;
        }

        if !options.recursive || options.stop_block == Some(current) || mb.npred() != 1 {
            return result;
        }
        let Some(pred) = mb.pred(0) else {
            return result;
        };
        let Some(pred_block) = func.block(pred) else {
            return result;
        };
        if !options.allow_multi_succ && pred_block.nsucc() != 1 {
            return result;
        }
        if !visited.insert(pred) {
            return result;
        }
        current = pred;
        limit = None;
    }
}

/// Searches forwards from the start of `block` for the first definition of
/// `operand`.
///
/// # Returns
///
/// The index of the defining instruction and its immediate source, if that
/// definition is a `mov` from an immediate.
#[must_use]
pub fn find_forward_numeric_def(
    func: &Function,
    block: usize,
    operand: &Operand,
) -> Option<(usize, Operand)> {
    if !operand.is_trackable() {
        return None;
    }
    let (index, insn) = func
        .block(block)?
        .instructions()
        .iter()
        .enumerate()
        .find(|(_, insn)| insn.defines(operand))?;
    insn.is_numeric_mov().then(|| (index, insn.left.clone()))
}

/// Forward search for a stack slot's value from the head of a cluster.
///
/// Used when a backward trace stops at a copy from a stack slot: stores in
/// between make the backward walk give up, but the cluster head usually
/// initializes the slot with a constant.
///
/// # Arguments
///
/// * `func` - The function to search.
/// * `cluster_head` - Block to search from.
/// * `operand` - The stack slot; any other operand kind fails.
/// * `chain` - Receives the defining `mov` on success.
///
/// # Returns
///
/// The immediate assigned to the slot.
pub fn find_forward_stack_var_def(
    func: &Function,
    cluster_head: usize,
    operand: &Operand,
    chain: &mut MovChain,
) -> Option<Operand> {
    if !operand.is_stack() {
        return None;
    }
    let (index, number) = find_forward_numeric_def(func, cluster_head, operand)?;
    chain.push(MovInfo {
        copied: number.clone(),
        block: cluster_head,
        index,
    });
    Some(number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::ir::{FunctionBuilder, Opcode};

    fn state() -> Operand {
        Operand::reg(8, 4)
    }

    #[test]
    fn test_trace_follows_copies() {
        let tmp = Operand::reg(12, 4);
        let slot = Operand::stack(-0x14, 4);
        let func = FunctionBuilder::new(0)
            .build_with(|f| {
                f.block(0, |b| {
                    b.mov_num(0x4242_4242, tmp.clone())
                        .mov(tmp.clone(), slot.clone())
                        .mov(slot.clone(), state())
                        .ret();
                });
            })
            .unwrap();

        let trace = find_numeric_def_backwards(&func, 0, &state(), TraceOptions::bounded(0, false));
        assert_eq!(trace.value(), Some(0x4242_4242));
        let indices: Vec<usize> = trace.chain.iter().map(|m| m.index).collect();
        assert_eq!(indices, vec![2, 1, 0]);
    }

    #[test]
    fn test_trace_stops_at_non_mov() {
        let func = FunctionBuilder::new(0)
            .build_with(|f| {
                f.block(0, |b| {
                    b.mov_num(5, state())
                        .binary(Opcode::Add, state(), Operand::number(1, 4), state())
                        .ret();
                });
            })
            .unwrap();

        let trace = find_numeric_def_backwards(&func, 0, &state(), TraceOptions::bounded(0, false));
        assert!(trace.constant.is_none());
        assert!(trace.chain.is_empty());
    }

    #[test]
    fn test_trace_stops_at_call_clobber() {
        let tmp = Operand::reg(12, 4);
        let func = FunctionBuilder::new(0)
            .build_with(|f| {
                f.block(0, |b| {
                    b.mov_num(5, tmp.clone())
                        .call("rand", Operand::reg(0, 4))
                        .mov(tmp.clone(), state())
                        .ret();
                });
            })
            .unwrap();

        let trace = find_numeric_def_backwards(&func, 0, &state(), TraceOptions::bounded(0, false));
        assert!(trace.constant.is_none());
        assert_eq!(trace.last_copy(), Some(&tmp));
    }

    #[test]
    fn test_trace_respects_multi_succ_policy() {
        let func = FunctionBuilder::new(0)
            .build_with(|f| {
                f.block(0, |b| {
                    b.mov_num(7, state())
                        .jcc(Opcode::Jnz, Operand::reg(0, 4), Operand::number(0, 4), 2);
                });
                f.block(1, |b| {
                    b.nop();
                });
                f.block(2, |b| {
                    b.ret();
                });
            })
            .unwrap();

        let denied = find_numeric_def_backwards(&func, 1, &state(), TraceOptions::bounded(0, false));
        assert!(denied.constant.is_none());

        let allowed = find_numeric_def_backwards(&func, 1, &state(), TraceOptions::bounded(0, true));
        assert_eq!(allowed.value(), Some(7));
        assert_eq!(allowed.chain[0].block, 0);
    }

    #[test]
    fn test_trace_respects_stop_block() {
        let func = FunctionBuilder::new(0)
            .build_with(|f| {
                f.block(0, |b| {
                    b.mov_num(7, state());
                });
                f.block(1, |b| {
                    b.nop();
                });
                f.block(2, |b| {
                    b.ret();
                });
            })
            .unwrap();

        let stopped = find_numeric_def_backwards(&func, 1, &state(), TraceOptions::bounded(1, false));
        assert!(stopped.chain.is_empty());

        let single = TraceOptions {
            recursive: false,
            allow_multi_succ: true,
            stop_block: None,
        };
        assert!(find_numeric_def_backwards(&func, 1, &state(), single).chain.is_empty());
        assert_eq!(
            find_numeric_def_backwards(&func, 1, &state(), TraceOptions::bounded(0, false)).value(),
            Some(7)
        );
    }

    #[test]
    fn test_forward_stack_def() {
        let slot = Operand::stack(-8, 4);
        let func = FunctionBuilder::new(0)
            .build_with(|f| {
                f.block(0, |b| {
                    b.nop().mov_num(0x1234, slot.clone()).ret();
                });
            })
            .unwrap();

        let mut chain = MovChain::new();
        let found = find_forward_stack_var_def(&func, 0, &slot, &mut chain);
        assert_eq!(found.as_ref().and_then(key_value), Some(0x1234));
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].index, 1);

        assert!(find_forward_stack_var_def(&func, 0, &state(), &mut chain).is_none());
    }

    #[test]
    fn test_forward_def_must_be_numeric() {
        let slot = Operand::stack(-8, 4);
        let func = FunctionBuilder::new(0)
            .build_with(|f| {
                f.block(0, |b| {
                    b.mov(state(), slot.clone()).mov_num(1, slot.clone()).ret();
                });
            })
            .unwrap();

        assert!(find_forward_numeric_def(&func, 0, &slot).is_none());
    }
}
