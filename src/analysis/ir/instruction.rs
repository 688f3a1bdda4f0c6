//! Microcode instructions.
//!
//! Instructions use a fixed three-operand layout: `left`, `right`, and `dest`.
//! Branch targets follow the decompiler convention:
//!
//! - `goto` keeps its target block in `left`
//! - conditional jumps compare `left` against `right` and keep the taken
//!   target in `dest`; the fall-through successor is the next block
//!
//! Deleting an instruction means turning it into a [`Opcode::Nop`] in place,
//! so instruction indices inside a block stay stable while a rewrite is in
//! progress.

use std::fmt;

use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::analysis::ir::Operand;

/// Instruction opcodes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumString, IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum Opcode {
    /// No operation.
    Nop,
    /// `dest = left`
    Mov,
    /// Load from memory: `dest = [right]` in segment `left`.
    Ldx,
    /// Store to memory: `[dest] = left` in segment `right`.
    Stx,
    /// `dest = -left`
    Neg,
    /// `dest = !left` (logical)
    Lnot,
    /// `dest = ~left` (bitwise)
    Bnot,
    /// `dest = left + right`
    Add,
    /// `dest = left - right`
    Sub,
    /// `dest = left * right`
    Mul,
    /// `dest = left & right`
    And,
    /// `dest = left | right`
    Or,
    /// `dest = left ^ right`
    Xor,
    /// `dest = left << right`
    Shl,
    /// `dest = left >> right` (logical)
    Shr,
    /// `dest = left >> right` (arithmetic)
    Sar,
    /// `dest = left == right`
    Setz,
    /// `dest = left != right`
    Setnz,
    /// Jump if `left` is non-zero.
    Jcnd,
    /// Jump if `left == right`.
    Jz,
    /// Jump if `left != right`.
    Jnz,
    /// Jump if `left > right` (signed).
    Jg,
    /// Jump if `left >= right` (signed).
    Jge,
    /// Jump if `left < right` (signed).
    Jl,
    /// Jump if `left <= right` (signed).
    Jle,
    /// Jump if `left > right` (unsigned).
    Ja,
    /// Jump if `left >= right` (unsigned).
    Jae,
    /// Jump if `left < right` (unsigned).
    Jb,
    /// Jump if `left <= right` (unsigned).
    Jbe,
    /// Unconditional jump to the block in `left`.
    Goto,
    /// Direct call.
    Call,
    /// Indirect call.
    ICall,
    /// Return from the function.
    Ret,
}

impl Opcode {
    /// Returns `true` for conditional jumps.
    #[must_use]
    pub fn is_jcc(self) -> bool {
        matches!(
            self,
            Opcode::Jcnd
                | Opcode::Jz
                | Opcode::Jnz
                | Opcode::Jg
                | Opcode::Jge
                | Opcode::Jl
                | Opcode::Jle
                | Opcode::Ja
                | Opcode::Jae
                | Opcode::Jb
                | Opcode::Jbe
        )
    }

    /// Returns `true` for direct and indirect calls.
    #[must_use]
    pub fn is_call(self) -> bool {
        matches!(self, Opcode::Call | Opcode::ICall)
    }
}

/// A single microcode instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Address of the machine instruction this was generated from.
    pub ea: u64,
    /// The operation.
    pub opcode: Opcode,
    /// Left source operand.
    pub left: Operand,
    /// Right source operand.
    pub right: Operand,
    /// Destination operand.
    pub dest: Operand,
}

impl Instruction {
    /// Creates an instruction with all operands empty.
    #[must_use]
    pub fn new(ea: u64, opcode: Opcode) -> Self {
        Self {
            ea,
            opcode,
            left: Operand::Empty,
            right: Operand::Empty,
            dest: Operand::Empty,
        }
    }

    /// Creates a `nop`.
    #[must_use]
    pub fn nop(ea: u64) -> Self {
        Self::new(ea, Opcode::Nop)
    }

    /// Creates `mov src, dest`.
    #[must_use]
    pub fn mov(ea: u64, src: Operand, dest: Operand) -> Self {
        Self {
            left: src,
            dest,
            ..Self::new(ea, Opcode::Mov)
        }
    }

    /// Creates a two-source instruction such as `add`, `xor` or `setz`.
    #[must_use]
    pub fn binary(ea: u64, opcode: Opcode, left: Operand, right: Operand, dest: Operand) -> Self {
        Self {
            ea,
            opcode,
            left,
            right,
            dest,
        }
    }

    /// Creates `goto @target`.
    #[must_use]
    pub fn goto(ea: u64, target: usize) -> Self {
        Self {
            left: Operand::Block(target),
            ..Self::new(ea, Opcode::Goto)
        }
    }

    /// Creates a conditional jump `opcode left, right, @target`.
    #[must_use]
    pub fn jcc(ea: u64, opcode: Opcode, left: Operand, right: Operand, target: usize) -> Self {
        debug_assert!(opcode.is_jcc(), "{opcode} is not a conditional jump");
        Self {
            ea,
            opcode,
            left,
            right,
            dest: Operand::Block(target),
        }
    }

    /// Creates a store `stx value, [address]`.
    #[must_use]
    pub fn store(ea: u64, value: Operand, address: Operand) -> Self {
        Self {
            left: value,
            dest: address,
            ..Self::new(ea, Opcode::Stx)
        }
    }

    /// Creates a load `ldx [address], dest`.
    #[must_use]
    pub fn load(ea: u64, address: Operand, dest: Operand) -> Self {
        Self {
            right: address,
            dest,
            ..Self::new(ea, Opcode::Ldx)
        }
    }

    /// Creates a direct call to `callee` whose result lands in `dest`.
    #[must_use]
    pub fn call(ea: u64, callee: Operand, dest: Operand) -> Self {
        Self {
            left: callee,
            dest,
            ..Self::new(ea, Opcode::Call)
        }
    }

    /// Creates `ret`.
    #[must_use]
    pub fn ret(ea: u64) -> Self {
        Self::new(ea, Opcode::Ret)
    }

    /// Returns `true` if this is a `nop`.
    #[must_use]
    pub fn is_nop(&self) -> bool {
        self.opcode == Opcode::Nop
    }

    /// Returns `true` if this is a `goto`.
    #[must_use]
    pub fn is_goto(&self) -> bool {
        self.opcode == Opcode::Goto
    }

    /// Returns `true` if this is a conditional jump.
    #[must_use]
    pub fn is_jcc(&self) -> bool {
        self.opcode.is_jcc()
    }

    /// Returns `true` if this is a call.
    #[must_use]
    pub fn is_call(&self) -> bool {
        self.opcode.is_call()
    }

    /// Returns `true` if this is a `mov`.
    #[must_use]
    pub fn is_mov(&self) -> bool {
        self.opcode == Opcode::Mov
    }

    /// Returns `true` if this is a `mov` from an immediate.
    #[must_use]
    pub fn is_numeric_mov(&self) -> bool {
        self.is_mov() && self.left.is_number()
    }

    /// Turns this instruction into a `nop`, keeping its address.
    pub fn make_nop(&mut self) {
        self.opcode = Opcode::Nop;
        self.left = Operand::Empty;
        self.right = Operand::Empty;
        self.dest = Operand::Empty;
    }

    /// Returns the explicit branch target: the `goto` destination or the
    /// taken side of a conditional jump.
    #[must_use]
    pub fn jump_target(&self) -> Option<usize> {
        match self.opcode {
            Opcode::Goto => self.left.as_block(),
            op if op.is_jcc() => self.dest.as_block(),
            _ => None,
        }
    }

    /// Replaces the explicit branch target.
    ///
    /// # Returns
    ///
    /// `true` if this instruction is a branch with a block target and the
    /// target was updated.
    pub fn set_jump_target(&mut self, target: usize) -> bool {
        let slot = match self.opcode {
            Opcode::Goto => &mut self.left,
            op if op.is_jcc() => &mut self.dest,
            _ => return false,
        };
        if slot.as_block().is_none() {
            return false;
        }
        *slot = Operand::Block(target);
        true
    }

    /// Returns `true` if executing this instruction overwrites every byte of
    /// `location`.
    ///
    /// Calls may clobber any register or memory location and stores may
    /// write through any alias, so both are treated as defining every
    /// location in the address spaces they can reach. Branches, returns and
    /// `nop`s define nothing. Everything else defines its destination.
    #[must_use]
    pub fn defines(&self, location: &Operand) -> bool {
        match self.opcode {
            Opcode::Nop | Opcode::Goto | Opcode::Ret => false,
            op if op.is_jcc() => false,
            Opcode::Call | Opcode::ICall => location.is_trackable() || location.is_memory(),
            Opcode::Stx => location.is_memory(),
            _ => self.dest.covers(location),
        }
    }

    /// Compares two instructions by opcode and operands, ignoring operand
    /// widths and addresses.
    #[must_use]
    pub fn equal_ignore_size(&self, other: &Instruction) -> bool {
        self.opcode == other.opcode
            && self.left.equal_ignore_size(&other.left)
            && self.right.equal_ignore_size(&other.right)
            && self.dest.equal_ignore_size(&other.dest)
    }

    pub(crate) fn remap_blocks(&mut self, map: &dyn Fn(usize) -> usize) {
        self.left.remap_blocks(map);
        self.right.remap_blocks(map);
        self.dest.remap_blocks(map);
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode)?;
        let mut first = true;
        for op in [&self.left, &self.right, &self.dest] {
            if op.is_empty() {
                continue;
            }
            if first {
                write!(f, " {op}")?;
                first = false;
            } else {
                write!(f, ", {op}")?;
            }
        }
        Ok(())
    }
}
