//! Microcode functions.
//!
//! A [`Function`] is the control-flow graph the deflattening engine works on:
//! a vector of [`Block`]s indexed by serial number, with block 0 as the entry.
//!
//! # Successor convention
//!
//! Successors are derived from each block's last instruction:
//!
//! | Tail | Successors |
//! |------|------------|
//! | `goto @t` | `[t]` |
//! | conditional jump to `@t` | `[serial + 1, t]` |
//! | `ret` | `[]` |
//! | anything else, or empty | `[serial + 1]` if that block exists |
//!
//! [`Function::rebuild_edges`] recomputes every edge list from this table;
//! [`Function::verify`] checks the edge lists against it.

use crate::{
    analysis::ir::{Block, Instruction, Maturity, Opcode},
    Error, Result,
};

/// A function in microcode form.
#[derive(Debug, Clone)]
pub struct Function {
    /// Entry address; identifies the function across passes.
    entry_ea: u64,
    /// Current maturity of the microcode.
    maturity: Maturity,
    /// Blocks indexed by serial.
    blocks: Vec<Block>,
    /// Def-use chains are out of date.
    chains_dirty: bool,
    /// The host should run local optimization again.
    local_opt_requested: bool,
}

impl Function {
    /// Creates an empty function.
    #[must_use]
    pub fn new(entry_ea: u64) -> Self {
        Self {
            entry_ea,
            maturity: Maturity::Zero,
            blocks: Vec::new(),
            chains_dirty: false,
            local_opt_requested: false,
        }
    }

    /// Creates a function from per-block instruction lists and derives its
    /// edges.
    ///
    /// # Arguments
    ///
    /// * `entry_ea` - Entry address of the function.
    /// * `maturity` - Maturity level of the microcode.
    /// * `blocks` - Instructions of each block, in serial order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBlock`] if a branch targets a block that does
    /// not exist.
    pub fn from_blocks(
        entry_ea: u64,
        maturity: Maturity,
        blocks: Vec<Vec<Instruction>>,
    ) -> Result<Self> {
        let mut func = Self::new(entry_ea);
        func.maturity = maturity;
        for (serial, instructions) in blocks.into_iter().enumerate() {
            let mut block = Block::new(serial);
            for insn in instructions {
                block.push(insn);
            }
            func.blocks.push(block);
        }
        func.rebuild_edges()?;
        Ok(func)
    }

    /// Returns the entry address.
    #[must_use]
    pub const fn entry_ea(&self) -> u64 {
        self.entry_ea
    }

    /// Returns the maturity level.
    #[must_use]
    pub const fn maturity(&self) -> Maturity {
        self.maturity
    }

    /// Sets the maturity level. Called by the host as it advances the
    /// microcode through its optimization phases.
    pub fn set_maturity(&mut self, maturity: Maturity) {
        self.maturity = maturity;
    }

    /// Returns the number of blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Returns the block with the given serial.
    #[must_use]
    pub fn block(&self, serial: usize) -> Option<&Block> {
        self.blocks.get(serial)
    }

    /// Returns the block with the given serial mutably.
    pub fn block_mut(&mut self, serial: usize) -> Option<&mut Block> {
        self.blocks.get_mut(serial)
    }

    /// Returns all blocks.
    #[must_use]
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Iterates over `(serial, block)` pairs.
    pub fn iter_blocks(&self) -> impl Iterator<Item = (usize, &Block)> {
        self.blocks.iter().enumerate()
    }

    /// Iterates over every top-level instruction with the serial of the
    /// block containing it. Nested sub-instructions are not visited.
    pub fn top_instructions(&self) -> impl Iterator<Item = (usize, &Instruction)> {
        self.blocks
            .iter()
            .flat_map(|b| b.instructions().iter().map(move |insn| (b.serial(), insn)))
    }

    /// Returns the total number of instructions.
    #[must_use]
    pub fn instruction_count(&self) -> usize {
        self.blocks.iter().map(Block::len).sum()
    }

    /// Returns `true` if def-use chains were invalidated by a rewrite.
    #[must_use]
    pub const fn chains_dirty(&self) -> bool {
        self.chains_dirty
    }

    /// Marks def-use chains as out of date.
    pub fn mark_chains_dirty(&mut self) {
        self.chains_dirty = true;
    }

    /// Returns `true` if a pass asked the host to run local optimization
    /// again before advancing maturity.
    #[must_use]
    pub const fn local_opt_requested(&self) -> bool {
        self.local_opt_requested
    }

    /// Asks the host to run local optimization again.
    pub fn request_local_opt(&mut self) {
        self.local_opt_requested = true;
    }

    /// Clears the dirty-chain and re-optimization flags. Called by the host
    /// once it has rebuilt chains and re-optimized.
    pub fn clear_requests(&mut self) {
        self.chains_dirty = false;
        self.local_opt_requested = false;
    }

    /// Returns the successors implied by a block's terminator.
    ///
    /// # Arguments
    ///
    /// * `serial` - The block to inspect.
    ///
    /// # Returns
    ///
    /// The successor serials, fall-through first; empty for an unknown block.
    #[must_use]
    pub fn natural_successors(&self, serial: usize) -> Vec<usize> {
        let Some(block) = self.blocks.get(serial) else {
            return Vec::new();
        };
        let next = serial + 1;
        let fallthrough = (next < self.blocks.len()).then_some(next);

        match block.tail() {
            Some(tail) if tail.opcode == Opcode::Goto => tail.jump_target().into_iter().collect(),
            Some(tail) if tail.opcode == Opcode::Ret => Vec::new(),
            Some(tail) if tail.is_jcc() => {
                let mut succs: Vec<usize> = fallthrough.into_iter().collect();
                if let Some(target) = tail.jump_target() {
                    if !succs.contains(&target) {
                        succs.push(target);
                    }
                }
                succs
            }
            _ => fallthrough.into_iter().collect(),
        }
    }

    /// Recomputes every predecessor and successor list from the block
    /// terminators.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBlock`] if a branch targets a block that does
    /// not exist.
    pub fn rebuild_edges(&mut self) -> Result<()> {
        let count = self.blocks.len();
        let mut preds: Vec<Vec<usize>> = vec![Vec::new(); count];
        let mut succs: Vec<Vec<usize>> = Vec::with_capacity(count);

        for serial in 0..count {
            let block_succs = self.natural_successors(serial);
            for &succ in &block_succs {
                let Some(list) = preds.get_mut(succ) else {
                    return Err(Error::InvalidBlock(succ));
                };
                if !list.contains(&serial) {
                    list.push(serial);
                }
            }
            succs.push(block_succs);
        }

        for ((block, p), s) in self.blocks.iter_mut().zip(preds).zip(succs) {
            block.set_edges(p, s);
        }
        Ok(())
    }

    /// Checks that the graph is internally consistent.
    ///
    /// Verifies that:
    /// - every block's serial equals its index
    /// - predecessor and successor lists mirror each other and hold no duplicates
    /// - control transfers only appear as the last instruction of a block
    /// - every block's successor list matches its terminator
    ///
    /// # Errors
    ///
    /// Returns [`Error::GraphIntegrity`] describing the first violation found.
    pub fn verify(&self) -> Result<()> {
        let count = self.blocks.len();
        let fail = |block: usize, message: String| Err(Error::GraphIntegrity { block, message });

        for (index, block) in self.blocks.iter().enumerate() {
            if block.serial() != index {
                return fail(index, format!("serial {} at index {index}", block.serial()));
            }

            for (pos, &succ) in block.succs().iter().enumerate() {
                if succ >= count {
                    return fail(index, format!("successor {succ} out of range"));
                }
                if block.succs()[..pos].contains(&succ) {
                    return fail(index, format!("duplicate successor {succ}"));
                }
                if !self.blocks[succ].preds().contains(&index) {
                    return fail(index, format!("successor {succ} does not list it as predecessor"));
                }
            }

            for (pos, &pred) in block.preds().iter().enumerate() {
                if pred >= count {
                    return fail(index, format!("predecessor {pred} out of range"));
                }
                if block.preds()[..pos].contains(&pred) {
                    return fail(index, format!("duplicate predecessor {pred}"));
                }
                if !self.blocks[pred].succs().contains(&index) {
                    return fail(index, format!("predecessor {pred} does not list it as successor"));
                }
            }

            let body = block.len().saturating_sub(1);
            if let Some(insn) = block.instructions()[..body]
                .iter()
                .find(|insn| insn.is_goto() || insn.is_jcc() || insn.opcode == Opcode::Ret)
            {
                return fail(index, format!("control transfer `{insn}` before block end"));
            }

            let mut expected = self.natural_successors(index);
            let mut actual = block.succs().to_vec();
            expected.sort_unstable();
            actual.sort_unstable();
            if expected != actual {
                return fail(
                    index,
                    format!("successors {actual:?} disagree with terminator ({expected:?})"),
                );
            }
        }
        Ok(())
    }

    /// Adds the edge `src -> dst` in both directions.
    pub(crate) fn add_edge(&mut self, src: usize, dst: usize) -> Result<()> {
        self.check_block(src)?;
        self.check_block(dst)?;
        self.blocks[src].add_succ(dst);
        self.blocks[dst].add_pred(src);
        Ok(())
    }

    /// Removes the edge `src -> dst` in both directions.
    pub(crate) fn remove_edge(&mut self, src: usize, dst: usize) -> Result<()> {
        self.check_block(src)?;
        self.check_block(dst)?;
        self.blocks[src].remove_succ(dst);
        self.blocks[dst].remove_pred(src);
        Ok(())
    }

    /// Moves the single edge `src -> old` to `src -> new`, keeping the
    /// successor's position in `src`'s list.
    pub(crate) fn retarget_edge(&mut self, src: usize, old: usize, new: usize) -> Result<()> {
        self.check_block(src)?;
        self.check_block(old)?;
        self.check_block(new)?;
        self.blocks[src].replace_succ(old, new);
        self.blocks[old].remove_pred(src);
        self.blocks[new].add_pred(src);
        Ok(())
    }

    /// Discards a block's instructions and detaches its outgoing edges.
    pub(crate) fn delete_block(&mut self, serial: usize) -> Result<()> {
        self.check_block(serial)?;
        let succs = self.blocks[serial].clear_succs();
        for succ in succs {
            self.blocks[succ].remove_pred(serial);
        }
        self.blocks[serial].clear_instructions();
        Ok(())
    }

    /// Removes the given blocks and renumbers the survivors, rewriting every
    /// block reference in instructions and edge lists.
    ///
    /// The removed blocks must already be detached from the rest of the
    /// graph.
    pub(crate) fn remove_blocks(&mut self, removed: &[usize]) {
        if removed.is_empty() {
            return;
        }

        let mut mapping: Vec<Option<usize>> = Vec::with_capacity(self.blocks.len());
        let mut next = 0;
        for serial in 0..self.blocks.len() {
            if removed.contains(&serial) {
                mapping.push(None);
            } else {
                mapping.push(Some(next));
                next += 1;
            }
        }

        let old_blocks = std::mem::take(&mut self.blocks);
        self.blocks = old_blocks
            .into_iter()
            .enumerate()
            .filter(|(serial, _)| mapping[*serial].is_some())
            .map(|(_, block)| block)
            .collect();

        // Detached blocks are no longer referenced, so every lookup hits.
        let remap = |serial: usize| mapping.get(serial).copied().flatten().unwrap_or(serial);
        for (index, block) in self.blocks.iter_mut().enumerate() {
            block.set_serial(index);
            block.remap_edges(&remap);
            for insn in block.instructions_mut() {
                insn.remap_blocks(&remap);
            }
        }
    }

    fn check_block(&self, serial: usize) -> Result<()> {
        if serial < self.blocks.len() {
            Ok(())
        } else {
            Err(Error::InvalidBlock(serial))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::ir::Operand;

    fn diamond() -> Function {
        let state = Operand::reg(8, 4);
        Function::from_blocks(
            0x1000,
            Maturity::LocalOpt,
            vec![
                vec![Instruction::jcc(0x1000, Opcode::Jz, state.clone(), Operand::number(0, 4), 2)],
                vec![Instruction::goto(0x1004, 3)],
                vec![Instruction::mov(0x1008, Operand::number(1, 4), state)],
                vec![Instruction::ret(0x100c)],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_edges_from_terminators() {
        let func = diamond();
        assert_eq!(func.block(0).unwrap().succs(), &[1, 2]);
        assert_eq!(func.block(1).unwrap().succs(), &[3]);
        assert_eq!(func.block(2).unwrap().succs(), &[3]);
        assert!(func.block(3).unwrap().succs().is_empty());
        assert_eq!(func.block(3).unwrap().preds(), &[1, 2]);
        assert!(func.verify().is_ok());
    }

    #[test]
    fn test_invalid_target_rejected() {
        let result = Function::from_blocks(0, Maturity::LocalOpt, vec![vec![Instruction::goto(0, 9)]]);
        assert!(matches!(result, Err(Error::InvalidBlock(9))));
    }

    #[test]
    fn test_verify_catches_asymmetric_edge() {
        let mut func = diamond();
        func.blocks[3].remove_pred(1);
        assert!(matches!(
            func.verify(),
            Err(Error::GraphIntegrity { block: 1, .. })
        ));
    }

    #[test]
    fn test_verify_catches_stale_terminator() {
        let mut func = diamond();
        func.retarget_edge(1, 3, 2).unwrap();
        assert!(matches!(
            func.verify(),
            Err(Error::GraphIntegrity { block: 1, .. })
        ));
    }

    #[test]
    fn test_verify_catches_mid_block_branch() {
        let mut func = diamond();
        func.blocks[1].instructions_mut().push(Instruction::nop(0x1006));
        assert!(func.verify().is_err());
    }

    #[test]
    fn test_remove_blocks_renumbers() {
        let mut func = Function::from_blocks(
            0,
            Maturity::LocalOpt,
            vec![
                vec![Instruction::goto(0, 2)],
                vec![Instruction::goto(4, 2)],
                vec![Instruction::ret(8)],
            ],
        )
        .unwrap();

        func.delete_block(1).unwrap();
        func.remove_blocks(&[1]);

        assert_eq!(func.block_count(), 2);
        assert_eq!(func.block(0).unwrap().tail().unwrap().jump_target(), Some(1));
        assert_eq!(func.block(0).unwrap().succs(), &[1]);
        assert_eq!(func.block(1).unwrap().preds(), &[0]);
        assert_eq!(func.block(1).unwrap().serial(), 1);
        assert!(func.verify().is_ok());
    }
}
