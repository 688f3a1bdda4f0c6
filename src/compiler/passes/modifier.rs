//! Deferred edge edits.
//!
//! The unflattener walks the dispatcher's predecessor list while deciding
//! where each predecessor really goes. Changing edges during that walk would
//! change the list under its feet, so instruction-level edits happen
//! immediately while the matching edge edits are queued here and applied in
//! one go afterwards.

use crate::{
    analysis::ir::{Function, Instruction},
    compiler::{EventKind, EventLog},
    structure_error, Result,
};

/// Queue of edge removals and additions.
#[derive(Debug, Default)]
pub struct DeferredGraphModifier {
    removals: Vec<(usize, usize)>,
    additions: Vec<(usize, usize)>,
}

impl DeferredGraphModifier {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues removal of the edge `src -> dst`.
    pub fn remove(&mut self, src: usize, dst: usize) {
        self.removals.push((src, dst));
    }

    /// Queues addition of the edge `src -> dst`.
    pub fn add(&mut self, src: usize, dst: usize) {
        self.additions.push((src, dst));
    }

    /// Queues replacement of `src -> old` by `src -> new`.
    pub fn replace(&mut self, src: usize, old: usize, new: usize) {
        self.remove(src, old);
        self.add(src, new);
    }

    /// Returns `true` if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.removals.is_empty() && self.additions.is_empty()
    }

    /// Points the `goto` at the end of `block` to `new`, or appends one if
    /// the block does not end in a `goto`, and queues the edge replacement.
    ///
    /// # Arguments
    ///
    /// * `func` - The function being rewritten.
    /// * `block` - The block whose exit changes.
    /// * `old` - The successor being replaced.
    /// * `new` - The new successor.
    ///
    /// # Returns
    ///
    /// `false` if the block already ended in `goto @new`.
    ///
    /// # Errors
    ///
    /// Returns an error if `block` does not exist or has no instructions.
    pub fn change_goto(&mut self, func: &mut Function, block: usize, old: usize, new: usize) -> Result<bool> {
        let Some(mb) = func.block_mut(block) else {
            return Err(crate::Error::InvalidBlock(block));
        };
        let Some(tail) = mb.tail_mut() else {
            return Err(structure_error!("change_goto on empty block {}", block));
        };

        if tail.is_goto() {
            if tail.jump_target() == Some(new) {
                return Ok(false);
            }
            tail.set_jump_target(new);
        } else {
            let ea = tail.ea;
            mb.push(Instruction::goto(ea, new));
        }

        self.replace(block, old, new);
        Ok(true)
    }

    /// Applies every queued removal, then every queued addition, and empties
    /// the queue.
    ///
    /// # Returns
    ///
    /// The number of edge edits applied.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidBlock`] if a queued edge names a block
    /// outside the function.
    pub fn apply(&mut self, func: &mut Function, events: &EventLog) -> Result<usize> {
        let mut applied = 0;
        for (src, dst) in self.removals.drain(..) {
            func.remove_edge(src, dst)?;
            applied += 1;
        }
        for (src, dst) in self.additions.drain(..) {
            func.add_edge(src, dst)?;
            events
                .record(EventKind::EdgeRedirected)
                .at(func.entry_ea(), src)
                .message(format!("added edge {src}->{dst}"));
            applied += 1;
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::ir::{FunctionBuilder, Operand};

    fn sample() -> Function {
        FunctionBuilder::new(0)
            .build_with(|f| {
                f.block(0, |b| {
                    b.mov_num(7, Operand::reg(8, 4));
                });
                f.block(1, |b| {
                    b.goto(3);
                });
                f.block(2, |b| {
                    b.ret();
                });
                f.block(3, |b| {
                    b.ret();
                });
            })
            .unwrap()
    }

    #[test]
    fn test_change_goto_appends_and_defers() {
        let mut func = sample();
        let mut modifier = DeferredGraphModifier::new();

        assert!(modifier.change_goto(&mut func, 0, 1, 2).unwrap());
        // Edges are untouched until apply.
        assert_eq!(func.block(0).unwrap().succs(), &[1]);
        assert!(func.block(0).unwrap().ends_with_goto());

        assert_eq!(modifier.apply(&mut func, &EventLog::new()).unwrap(), 2);
        assert!(modifier.is_empty());
        assert_eq!(func.block(0).unwrap().succs(), &[2]);
        func.verify().unwrap();
    }

    #[test]
    fn test_change_goto_same_target_is_noop() {
        let mut func = sample();
        let mut modifier = DeferredGraphModifier::new();

        assert!(!modifier.change_goto(&mut func, 1, 3, 3).unwrap());
        assert!(modifier.is_empty());
    }

    #[test]
    fn test_change_goto_rejects_empty_block() {
        let mut func = FunctionBuilder::new(0)
            .build_with(|f| {
                f.block(0, |_| {});
                f.block(1, |b| {
                    b.ret();
                });
            })
            .unwrap();

        let mut modifier = DeferredGraphModifier::new();
        assert!(matches!(
            modifier.change_goto(&mut func, 0, 1, 1),
            Err(crate::Error::Structure { .. })
        ));
        assert!(matches!(
            modifier.change_goto(&mut func, 9, 1, 1),
            Err(crate::Error::InvalidBlock(9))
        ));
    }

    #[test]
    fn test_removals_before_additions() {
        let mut func = sample();
        let mut modifier = DeferredGraphModifier::new();
        modifier.add(1, 3);
        modifier.remove(1, 3);

        // Removal runs first, so the edge survives.
        assert_eq!(modifier.apply(&mut func, &EventLog::new()).unwrap(), 2);
        assert_eq!(func.block(1).unwrap().succs(), &[3]);
        assert!(func.block(3).unwrap().preds().contains(&1));
    }
}
