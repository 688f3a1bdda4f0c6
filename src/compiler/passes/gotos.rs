//! Collapsing of goto-to-goto chains.
//!
//! A *forwarder* is a block whose first real instruction is a `goto`. Flattened
//! code is full of them: every case body ends by jumping to a shared block that
//! jumps back to the dispatcher. Collapsing them first gives the dispatcher its
//! real predecessors, which is what the unflattener inspects.
//!
//! ```text
//! B1: x = 1          B1: x = 1
//!     goto B2            goto B4
//! B2: goto B3   =>   B2: goto B3
//! B3: goto B4        B3: goto B4
//! ```
//!
//! The forwarders themselves are left in place; they become unreachable and
//! are removed by [`super::prune_unreachable`].

use crate::{
    analysis::ir::{Function, Instruction},
    compiler::{EventKind, EventLog},
    Result,
};

/// Rewrites every single-successor block whose target is a chain of
/// forwarders to jump straight to the end of the chain.
///
/// Blocks ending in a call are left alone, as are blocks whose chain runs
/// into a cycle. A block that fell through gets an explicit `goto`
/// appended. Running it twice in a row changes nothing the second time.
///
/// # Arguments
///
/// * `func` - The function to rewrite.
/// * `events` - Receives one [`EventKind::GotoCollapsed`] per rewritten block.
///
/// # Returns
///
/// The number of blocks whose target changed.
///
/// # Errors
///
/// Returns an error if a forwarder targets a block outside the function.
pub fn collapse_single_gotos(func: &mut Function, events: &EventLog) -> Result<usize> {
    let forwarders: Vec<Option<usize>> = func
        .blocks()
        .iter()
        .map(|block| {
            block
                .first_real()
                .filter(|insn| insn.is_goto())
                .and_then(Instruction::jump_target)
        })
        .collect();

    let mut changed = 0;
    for serial in 0..func.block_count() {
        let Some(block) = func.block(serial) else {
            continue;
        };
        if block.ends_with_call() || block.nsucc() != 1 {
            continue;
        }
        let Some(tail) = block.tail() else {
            continue;
        };

        let was_goto = tail.is_goto();
        let original = if was_goto {
            tail.jump_target()
        } else {
            block.succ(0)
        };
        let Some(original) = original else {
            continue;
        };
        let Some(target) = resolve_forwarders(&forwarders, original) else {
            continue;
        };

        let ea = tail.ea;
        let Some(block) = func.block_mut(serial) else {
            continue;
        };
        if was_goto {
            if let Some(tail) = block.tail_mut() {
                tail.set_jump_target(target);
            }
        } else {
            block.push(Instruction::goto(ea, target));
        }
        func.retarget_edge(serial, original, target)?;

        events
            .record(EventKind::GotoCollapsed)
            .at(func.entry_ea(), serial)
            .message(format!("block {serial} @{original} -> @{target}"));
        changed += 1;
    }
    Ok(changed)
}

/// Follows forwarders from `start` to the first block that is not one.
///
/// # Returns
///
/// The final target, or `None` if `start` is not a forwarder or the chain
/// loops back on itself.
fn resolve_forwarders(forwarders: &[Option<usize>], start: usize) -> Option<usize> {
    let mut visited = Vec::new();
    let mut current = start;
    let mut crossed = false;

    loop {
        if visited.contains(&current) {
            return None;
        }
        visited.push(current);
        match forwarders.get(current).copied().flatten() {
            Some(next) => {
                crossed = true;
                current = next;
            }
            None => break,
        }
    }
    crossed.then_some(current)
}
