//! Builder pattern for programmatic function construction.
//!
//! Useful for unit tests, fixtures and hosts that lift their own microcode.
//! All blocks are defined inside a single closure so the CFG shape is visible
//! at a glance:
//!
//! ```rust
//! use deflatten::{FunctionBuilder, Opcode, Operand};
//!
//! let state = Operand::reg(8, 4);
//! let func = FunctionBuilder::new(0x401000).build_with(|f| {
//!     f.block(0, |b| {
//!         b.mov_num(0x4141_4141, state.clone());
//!     });
//!     f.block(1, |b| {
//!         b.jz(state.clone(), 0x4141_4141, 3);
//!     });
//!     f.block(2, |b| {
//!         b.goto(1);
//!     });
//!     f.block(3, |b| {
//!         b.ret();
//!     });
//! })?;
//! assert_eq!(func.block_count(), 4);
//! # Ok::<(), deflatten::Error>(())
//! ```
//!
//! Instruction addresses are assigned automatically, four bytes apart,
//! starting at the entry address.

use std::collections::BTreeMap;

use crate::{
    analysis::ir::{Function, Instruction, Maturity, Opcode, Operand},
    Result,
};

/// Builder for constructing functions programmatically.
#[derive(Debug)]
pub struct FunctionBuilder {
    entry_ea: u64,
    maturity: Maturity,
    /// Next instruction address.
    next_ea: u64,
    /// Blocks indexed by serial (may have gaps).
    blocks: BTreeMap<usize, Vec<Instruction>>,
}

impl FunctionBuilder {
    /// Creates a builder for a function at `entry_ea`, at the local
    /// optimization maturity level.
    #[must_use]
    pub fn new(entry_ea: u64) -> Self {
        Self {
            entry_ea,
            maturity: Maturity::LocalOpt,
            next_ea: entry_ea,
            blocks: BTreeMap::new(),
        }
    }

    /// Sets the maturity of the built function.
    #[must_use]
    pub fn maturity(mut self, maturity: Maturity) -> Self {
        self.maturity = maturity;
        self
    }

    /// Builds the function using a closure that defines all blocks.
    ///
    /// Serials missing between defined blocks are filled with empty blocks.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidBlock`] if a branch targets a block
    /// that was never defined.
    pub fn build_with<F>(mut self, f: F) -> Result<Function>
    where
        F: FnOnce(&mut FunctionContext<'_>),
    {
        let mut ctx = FunctionContext { builder: &mut self };
        f(&mut ctx);
        self.build()
    }

    fn build(self) -> Result<Function> {
        let count = self.blocks.keys().next_back().map_or(0, |max| max + 1);
        let mut blocks = vec![Vec::new(); count];
        for (serial, instructions) in self.blocks {
            blocks[serial] = instructions;
        }
        Function::from_blocks(self.entry_ea, self.maturity, blocks)
    }
}

/// Context passed to the build closure for defining blocks.
pub struct FunctionContext<'a> {
    builder: &'a mut FunctionBuilder,
}

impl FunctionContext<'_> {
    /// Defines the block with the given serial.
    ///
    /// # Arguments
    ///
    /// * `serial` - The block serial (block 0 is the entry)
    /// * `f` - A closure that adds the block's instructions
    pub fn block<F>(&mut self, serial: usize, f: F)
    where
        F: FnOnce(&mut BlockBuilder<'_>),
    {
        let mut instructions = Vec::new();
        let mut block = BlockBuilder {
            next_ea: &mut self.builder.next_ea,
            instructions: &mut instructions,
        };
        f(&mut block);
        self.builder.blocks.insert(serial, instructions);
    }
}

/// Builder for the instructions of a single block.
pub struct BlockBuilder<'a> {
    next_ea: &'a mut u64,
    instructions: &'a mut Vec<Instruction>,
}

impl BlockBuilder<'_> {
    fn ea(&mut self) -> u64 {
        let ea = *self.next_ea;
        *self.next_ea += 4;
        ea
    }

    /// Appends an arbitrary instruction, overriding its address.
    pub fn push(&mut self, mut insn: Instruction) -> &mut Self {
        insn.ea = self.ea();
        self.instructions.push(insn);
        self
    }

    /// Appends `nop`.
    pub fn nop(&mut self) -> &mut Self {
        let ea = self.ea();
        self.instructions.push(Instruction::nop(ea));
        self
    }

    /// Appends `mov src, dest`.
    pub fn mov(&mut self, src: Operand, dest: Operand) -> &mut Self {
        let ea = self.ea();
        self.instructions.push(Instruction::mov(ea, src, dest));
        self
    }

    /// Appends `mov #value.4, dest`.
    pub fn mov_num(&mut self, value: u64, dest: Operand) -> &mut Self {
        self.mov(Operand::number(value, 4), dest)
    }

    /// Appends a two-source instruction.
    pub fn binary(&mut self, opcode: Opcode, left: Operand, right: Operand, dest: Operand) -> &mut Self {
        let ea = self.ea();
        self.instructions.push(Instruction::binary(ea, opcode, left, right, dest));
        self
    }

    /// Appends a store through `address`.
    pub fn store(&mut self, value: Operand, address: Operand) -> &mut Self {
        let ea = self.ea();
        self.instructions.push(Instruction::store(ea, value, address));
        self
    }

    /// Appends a call to a named helper.
    pub fn call(&mut self, helper: &str, dest: Operand) -> &mut Self {
        let ea = self.ea();
        self.instructions.push(Instruction::call(ea, Operand::Helper(helper.to_string()), dest));
        self
    }

    /// Appends `jz left, #key.4, @target`.
    pub fn jz(&mut self, left: Operand, key: u64, target: usize) -> &mut Self {
        self.jcc(Opcode::Jz, left, Operand::number(key, 4), target)
    }

    /// Appends a conditional jump.
    pub fn jcc(&mut self, opcode: Opcode, left: Operand, right: Operand, target: usize) -> &mut Self {
        let ea = self.ea();
        self.instructions.push(Instruction::jcc(ea, opcode, left, right, target));
        self
    }

    /// Appends `goto @target`.
    pub fn goto(&mut self, target: usize) -> &mut Self {
        let ea = self.ea();
        self.instructions.push(Instruction::goto(ea, target));
        self
    }

    /// Appends `ret`.
    pub fn ret(&mut self) -> &mut Self {
        let ea = self.ea();
        self.instructions.push(Instruction::ret(ea));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_fills_gaps_and_assigns_addresses() {
        let func = FunctionBuilder::new(0x1000)
            .build_with(|f| {
                f.block(0, |b| {
                    b.nop().goto(2);
                });
                f.block(2, |b| {
                    b.ret();
                });
            })
            .unwrap();

        assert_eq!(func.block_count(), 3);
        assert!(func.block(1).unwrap().is_empty());
        let eas: Vec<u64> = func.top_instructions().map(|(_, insn)| insn.ea).collect();
        assert_eq!(eas, vec![0x1000, 0x1004, 0x1008]);
        assert_eq!(func.maturity(), Maturity::LocalOpt);
    }

    #[test]
    fn test_builder_rejects_dangling_target() {
        let result = FunctionBuilder::new(0).build_with(|f| {
            f.block(0, |b| {
                b.goto(4);
            });
        });
        assert!(result.is_err());
    }
}
