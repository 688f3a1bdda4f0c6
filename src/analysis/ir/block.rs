//! Basic blocks.
//!
//! A [`Block`] owns an ordered instruction list and the serial numbers of its
//! predecessors and successors. Edge lists are only changed through the
//! crate's graph rewriting code, which keeps both directions in sync.

use crate::analysis::ir::{Instruction, Opcode};

/// A basic block in a microcode function.
#[derive(Debug, Clone, Default)]
pub struct Block {
    /// Serial number, equal to the block's index in its function.
    serial: usize,
    /// Instructions in execution order.
    instructions: Vec<Instruction>,
    /// Serials of predecessor blocks.
    preds: Vec<usize>,
    /// Serials of successor blocks. For blocks ending in a conditional jump
    /// the fall-through successor comes first.
    succs: Vec<usize>,
}

impl Block {
    /// Creates an empty block with the given serial.
    #[must_use]
    pub fn new(serial: usize) -> Self {
        Self {
            serial,
            ..Self::default()
        }
    }

    /// Returns the block's serial number.
    #[must_use]
    pub const fn serial(&self) -> usize {
        self.serial
    }

    /// Returns the instructions.
    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Returns the instructions mutably.
    ///
    /// Callers may edit instructions in place, but changing a terminator
    /// without updating the edge lists leaves the graph inconsistent until
    /// the edges are rebuilt.
    pub fn instructions_mut(&mut self) -> &mut Vec<Instruction> {
        &mut self.instructions
    }

    /// Appends an instruction.
    pub fn push(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    /// Returns `true` if the block has no instructions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Returns the number of instructions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Returns the last instruction.
    #[must_use]
    pub fn tail(&self) -> Option<&Instruction> {
        self.instructions.last()
    }

    /// Returns the last instruction mutably.
    pub fn tail_mut(&mut self) -> Option<&mut Instruction> {
        self.instructions.last_mut()
    }

    /// Returns the first instruction that is not a `nop`.
    #[must_use]
    pub fn first_real(&self) -> Option<&Instruction> {
        self.instructions.iter().find(|insn| !insn.is_nop())
    }

    /// Returns `true` if the block ends in a call.
    #[must_use]
    pub fn ends_with_call(&self) -> bool {
        self.tail().is_some_and(Instruction::is_call)
    }

    /// Returns `true` if the block ends in a conditional jump.
    #[must_use]
    pub fn ends_with_jcc(&self) -> bool {
        self.tail().is_some_and(Instruction::is_jcc)
    }

    /// Returns `true` if the block ends in a `goto`.
    #[must_use]
    pub fn ends_with_goto(&self) -> bool {
        self.tail().is_some_and(|insn| insn.opcode == Opcode::Goto)
    }

    /// Returns the predecessor serials.
    #[must_use]
    pub fn preds(&self) -> &[usize] {
        &self.preds
    }

    /// Returns the successor serials.
    #[must_use]
    pub fn succs(&self) -> &[usize] {
        &self.succs
    }

    /// Returns the number of predecessors.
    #[must_use]
    pub fn npred(&self) -> usize {
        self.preds.len()
    }

    /// Returns the number of successors.
    #[must_use]
    pub fn nsucc(&self) -> usize {
        self.succs.len()
    }

    /// Returns the `n`-th predecessor.
    #[must_use]
    pub fn pred(&self, n: usize) -> Option<usize> {
        self.preds.get(n).copied()
    }

    /// Returns the `n`-th successor.
    #[must_use]
    pub fn succ(&self, n: usize) -> Option<usize> {
        self.succs.get(n).copied()
    }

    pub(crate) fn set_serial(&mut self, serial: usize) {
        self.serial = serial;
    }

    pub(crate) fn add_pred(&mut self, serial: usize) -> bool {
        add_unique(&mut self.preds, serial)
    }

    pub(crate) fn add_succ(&mut self, serial: usize) -> bool {
        add_unique(&mut self.succs, serial)
    }

    pub(crate) fn remove_pred(&mut self, serial: usize) -> bool {
        remove_value(&mut self.preds, serial)
    }

    pub(crate) fn remove_succ(&mut self, serial: usize) -> bool {
        remove_value(&mut self.succs, serial)
    }

    /// Replaces `old` by `new` in the successor list, keeping its position.
    pub(crate) fn replace_succ(&mut self, old: usize, new: usize) -> bool {
        if self.succs.contains(&new) {
            return self.remove_succ(old);
        }
        match self.succs.iter_mut().find(|s| **s == old) {
            Some(slot) => {
                *slot = new;
                true
            }
            None => false,
        }
    }

    pub(crate) fn set_edges(&mut self, preds: Vec<usize>, succs: Vec<usize>) {
        self.preds = preds;
        self.succs = succs;
    }

    pub(crate) fn clear_succs(&mut self) -> Vec<usize> {
        std::mem::take(&mut self.succs)
    }

    pub(crate) fn clear_instructions(&mut self) {
        self.instructions.clear();
    }

    pub(crate) fn remap_edges(&mut self, map: &dyn Fn(usize) -> usize) {
        for p in &mut self.preds {
            *p = map(*p);
        }
        for s in &mut self.succs {
            *s = map(*s);
        }
    }
}

fn add_unique(list: &mut Vec<usize>, value: usize) -> bool {
    if list.contains(&value) {
        return false;
    }
    list.push(value);
    true
}

fn remove_value(list: &mut Vec<usize>, value: usize) -> bool {
    match list.iter().position(|v| *v == value) {
        Some(pos) => {
            list.remove(pos);
            true
        }
        None => false,
    }
}
