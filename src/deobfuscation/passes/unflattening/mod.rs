//! Control flow unflattening pass.
//!
//! This module undoes control flow flattening of the kind produced by
//! OLLVM-style obfuscators: every block of the original function is turned
//! into a case of a loop that compares a state variable against random
//! 32-bit keys, and every transfer between original blocks is replaced by
//! "assign the successor's key, jump to the dispatcher".
//!
//! # Algorithm Overview
//!
//! 1. **Recognition** ([`DispatchInfo::extract`]): find the state variable,
//!    the dispatcher, the key to case mapping and the cluster of blocks each
//!    case dominates.
//! 2. **Direct edges**: for every dispatcher predecessor, trace the key it
//!    assigns back to an immediate and jump straight to the selected case.
//! 3. **Conditional edges**: when a predecessor only copies a temporary
//!    that two incoming paths assign differently, split it so each path
//!    gets its own jump.
//! 4. **Cleanup**: apply the deferred edge edits, remove blocks that became
//!    unreachable (typically the whole dispatcher) and verify the graph.
//!
//! Every `mov` that fed a rewritten edge is turned into a `nop`; the
//! dispatcher's comparisons disappear with the dispatcher itself.
//!
//! # Limitations
//!
//! - A predecessor whose key is computed rather than assigned is left alone.
//! - Nested dispatchers and conditionals with more than two incoming paths
//!   are not recovered.

mod conditional;
mod dispatcher;
mod tracer;

pub use dispatcher::DispatchInfo;
pub use tracer::{
    find_forward_numeric_def, find_forward_stack_var_def, find_numeric_def_backwards, MovChain,
    MovInfo, TraceOptions, TraceResult,
};

use crate::{
    analysis::ir::{Function, Instruction, Operand},
    compiler::{
        collapse_single_gotos, prune_unreachable, BlockOptimizer, DeferredGraphModifier, EventKind,
        EventLog,
    },
    deobfuscation::{Session, UnflattenConfig},
    Error, Result,
};

use tracer::key_value;

const PASS_NAME: &str = "cff-unflattening";

/// What happened to one dispatcher predecessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Skipped,
    Direct,
    Conditional,
}

/// Control flow unflattening pass.
///
/// Runs once per function at the configured maturity. Functions rejected by
/// recognition are blacklisted in the [`Session`] and never analysed again.
///
/// # Example
///
/// ```rust
/// use deflatten::{BlockOptimizer, FunctionBuilder, Operand, Session, Unflattener};
///
/// let state = Operand::reg(8, 4);
/// let mut func = FunctionBuilder::new(0x401000).build_with(|f| {
///     f.block(0, |b| {
///         b.mov_num(0x3C5A_96F0, state.clone());
///     });
///     f.block(1, |b| {
///         b.jz(state.clone(), 0x3C5A_96F0, 3);
///     });
///     f.block(2, |b| {
///         b.jz(state.clone(), 0x5A0F_C3A5, 4);
///     });
///     f.block(3, |b| {
///         b.mov_num(0x5A0F_C3A5, state.clone()).goto(1);
///     });
///     f.block(4, |b| {
///         b.ret();
///     });
/// })?;
///
/// let session = Session::new();
/// let changed = Unflattener::new().optimize(&mut func, &session)?;
/// assert!(changed > 0);
/// # Ok::<(), deflatten::Error>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct Unflattener {
    config: UnflattenConfig,
}

impl Unflattener {
    /// Creates a pass with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a pass with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid.
    pub fn with_config(config: UnflattenConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &UnflattenConfig {
        &self.config
    }

    /// Runs recognition only, without rewriting anything.
    ///
    /// Ignores the maturity guard, but still updates the session's
    /// blacklist and whitelist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFlattened`] if no dispatcher was recognized.
    pub fn dispatch_info(&self, func: &Function, session: &Session) -> Result<DispatchInfo> {
        DispatchInfo::extract(func, session, &self.config, &session.events)
            .ok_or(Error::NotFlattened(func.entry_ea()))
    }

    fn run(&self, func: &mut Function, session: &Session, events: &EventLog) -> Result<usize> {
        let mut changed = 0;
        if self.config.collapse_gotos {
            changed = collapse_single_gotos(func, events)?;
            if changed > 0 && self.config.verify {
                func.verify()?;
            }
        }

        let Some(info) = DispatchInfo::extract(func, session, &self.config, events) else {
            return Ok(changed);
        };

        let mut modifier = DeferredGraphModifier::new();
        let mut dirty = false;
        let preds = func
            .block(info.dispatcher())
            .map(|b| b.preds().to_vec())
            .unwrap_or_default();

        for pred in preds {
            match self.unflatten_predecessor(func, &info, pred, &mut modifier, events)? {
                Outcome::Direct => changed += 1,
                Outcome::Conditional => dirty = true,
                Outcome::Skipped => {}
            }
        }

        changed += modifier.apply(func, events)?;
        if changed > 0 && self.config.prune_unreachable {
            changed += prune_unreachable(func, events)?;
        }
        if dirty {
            func.mark_chains_dirty();
            func.request_local_opt();
        }
        if changed > 0 && self.config.verify {
            func.verify()?;
        }
        Ok(changed)
    }

    fn unflatten_predecessor(
        &self,
        func: &mut Function,
        info: &DispatchInfo,
        pred: usize,
        modifier: &mut DeferredGraphModifier,
        events: &EventLog,
    ) -> Result<Outcome> {
        let ea = func.entry_ea();
        let Some(mb) = func.block(pred) else {
            return Ok(Outcome::Skipped);
        };
        if mb.nsucc() != 1 {
            return Ok(Outcome::Skipped);
        }
        let npred = mb.npred();
        let Some(head) = info.cluster_head(pred) else {
            return Ok(Outcome::Skipped);
        };

        let mut erasures = MovChain::new();
        let target = self.block_target_or_last_copy(
            func,
            info,
            pred,
            head,
            info.assign_var(),
            false,
            &mut erasures,
            events,
        );
        if erasures.is_empty() {
            return Ok(Outcome::Skipped);
        }

        if let Some(target) = target {
            modifier.change_goto(func, pred, info.dispatcher(), target)?;
            erase(func, &erasures, events);
            events
                .record(EventKind::ControlFlowRestructured)
                .at(ea, pred)
                .message(format!("block {pred} now jumps to case {target}"))
                .pass(PASS_NAME);
            return Ok(Outcome::Direct);
        }

        if !self.config.conditional_recovery || npred != 2 {
            return Ok(Outcome::Skipped);
        }
        let Some(op_copy) = erasures.last().map(|m| m.copied.clone()) else {
            return Ok(Outcome::Skipped);
        };
        let Some(targets) =
            conditional::handle_two_preds(self, func, info, pred, head, &op_copy, &mut erasures, events)
        else {
            return Ok(Outcome::Skipped);
        };

        erase(func, &erasures, events);

        set_exit(func, pred, targets.goto_target)?;
        modifier.replace(pred, info.dispatcher(), targets.goto_target);

        let copied: Vec<Instruction> = func
            .block(pred)
            .map(|b| b.instructions().to_vec())
            .unwrap_or_default();
        let non_jcc = func
            .block_mut(targets.non_jcc)
            .ok_or(Error::InvalidBlock(targets.non_jcc))?;
        if non_jcc.tail().is_some_and(|t| t.is_goto() && t.jump_target() == Some(pred)) {
            non_jcc.instructions_mut().pop();
        }
        for insn in copied {
            non_jcc.push(insn);
        }
        set_exit(func, targets.non_jcc, targets.jcc_target)?;
        modifier.replace(targets.non_jcc, pred, targets.jcc_target);

        events
            .record(EventKind::ConditionalRecovered)
            .at(ea, pred)
            .message(format!(
                "block {pred} -> {}, copy in {} -> {}",
                targets.goto_target, targets.non_jcc, targets.jcc_target
            ))
            .pass(PASS_NAME);
        Ok(Outcome::Conditional)
    }

    /// Traces `what` back from the end of `block` and maps the constant it
    /// ends in to a case block.
    ///
    /// Every `mov` crossed is appended to `erasures`, even when no target is
    /// found; callers use the last one to continue with the copied operand.
    #[allow(clippy::too_many_arguments)]
    pub(super) fn block_target_or_last_copy(
        &self,
        func: &Function,
        info: &DispatchInfo,
        block: usize,
        cluster_head: usize,
        what: &Operand,
        allow_multi_succ: bool,
        erasures: &mut MovChain,
        events: &EventLog,
    ) -> Option<usize> {
        let mut trace = find_numeric_def_backwards(
            func,
            block,
            what,
            TraceOptions::bounded(cluster_head, allow_multi_succ),
        );
        if trace.chain.is_empty() {
            return None;
        }
        erasures.extend(trace.chain.iter().cloned());

        let constant = match trace.constant.take() {
            Some(constant) => constant,
            None if self.config.stack_forward_fallback => {
                let last = trace.last_copy()?.clone();
                find_forward_stack_var_def(func, cluster_head, &last, &mut trace.chain)?
            }
            None => return None,
        };

        let key = key_value(&constant)?;
        let target = info.block_for_key(key);
        if target.is_none() {
            events
                .record(EventKind::Error)
                .at(func.entry_ea(), block)
                .message(format!("block {block} assigned unknown key {key:#x}"))
                .pass(PASS_NAME);
        }
        target
    }
}

impl BlockOptimizer for Unflattener {
    fn name(&self) -> &'static str {
        PASS_NAME
    }

    fn description(&self) -> &'static str {
        "Recovers direct control flow from dispatcher-based flattening"
    }

    fn optimize(&self, func: &mut Function, session: &Session) -> Result<usize> {
        let ea = func.entry_ea();
        if session.is_blacklisted(ea) {
            return Ok(0);
        }
        if !session.claim_maturity(ea, func.maturity()) || func.maturity() != self.config.maturity {
            return Ok(0);
        }

        let events = EventLog::new();
        let result = self.run(func, session, &events);
        session.events.merge(&events);
        result
    }
}

/// Turns every recorded `mov` into a `nop`.
fn erase(func: &mut Function, erasures: &MovChain, events: &EventLog) {
    let ea = func.entry_ea();
    for mov in erasures {
        let Some(insn) = func
            .block_mut(mov.block)
            .and_then(|b| b.instructions_mut().get_mut(mov.index))
        else {
            continue;
        };
        if insn.is_nop() {
            continue;
        }
        debug_assert!(insn.is_mov(), "erasing non-mov `{insn}`");
        let text = insn.to_string();
        insn.make_nop();
        events
            .record(EventKind::InstructionRemoved)
            .at(ea, mov.block)
            .message(text)
            .pass(PASS_NAME);
    }
}

/// Points the exit of `block` at `target`, appending a `goto` if the block
/// does not end in one.
fn set_exit(func: &mut Function, block: usize, target: usize) -> Result<()> {
    let mb = func.block_mut(block).ok_or(Error::InvalidBlock(block))?;
    if mb.ends_with_goto() {
        if let Some(tail) = mb.tail_mut() {
            tail.set_jump_target(target);
        }
    } else {
        let ea = mb.tail().map_or(0, |t| t.ea);
        mb.push(Instruction::goto(ea, target));
    }
    Ok(())
}
