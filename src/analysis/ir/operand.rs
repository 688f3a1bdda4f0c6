//! Microcode operands.
//!
//! An [`Operand`] is one of the three slots of an [`Instruction`]: left source,
//! right source, or destination. Operands are tagged by kind and most kinds
//! carry a declared size in bytes.
//!
//! # Width-insensitive equality
//!
//! Decompilers routinely access the same variable at different widths (a
//! 4-byte register read after an 8-byte write, an immediate zero-extended
//! into a wider comparison). The deflattening engine therefore compares
//! operands with [`Operand::equal_ignore_size`], which treats two operands
//! as the same variable when they name the same location regardless of the
//! width they are accessed with.

use std::fmt;

use crate::analysis::ir::Instruction;

/// A single instruction operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Unused operand slot.
    Empty,
    /// Integer immediate.
    Number {
        /// Raw value; only the low `size` bytes are significant.
        value: u64,
        /// Declared width in bytes.
        size: u8,
    },
    /// Floating point immediate, stored as raw bits.
    Float {
        /// IEEE-754 bit pattern.
        bits: u64,
        /// Declared width in bytes.
        size: u8,
    },
    /// Micro-register. Registers are byte addressed, so `reg` is the offset
    /// of the first byte in the register file.
    Register {
        /// Register file offset.
        reg: u32,
        /// Declared width in bytes.
        size: u8,
    },
    /// Stack slot at a frame offset.
    Stack {
        /// Frame offset of the first byte.
        offset: i64,
        /// Declared width in bytes.
        size: u8,
    },
    /// Global variable.
    Global {
        /// Address of the variable.
        address: u64,
        /// Declared width in bytes.
        size: u8,
    },
    /// Result of a nested instruction.
    Sub(Box<Instruction>),
    /// Reference to a block, used by branch targets.
    Block(usize),
    /// Call argument list.
    Args(Vec<Operand>),
    /// Address of another operand.
    Address(Box<Operand>),
    /// Named helper function.
    Helper(String),
    /// String literal.
    Str(String),
    /// Operand pair, low half then high half.
    Pair {
        /// Low half.
        low: Box<Operand>,
        /// High half.
        high: Box<Operand>,
    },
}

impl Operand {
    /// Creates an integer immediate of the given width.
    #[must_use]
    pub fn number(value: u64, size: u8) -> Self {
        Operand::Number { value, size }
    }

    /// Creates a register operand.
    #[must_use]
    pub fn reg(reg: u32, size: u8) -> Self {
        Operand::Register { reg, size }
    }

    /// Creates a stack slot operand.
    #[must_use]
    pub fn stack(offset: i64, size: u8) -> Self {
        Operand::Stack { offset, size }
    }

    /// Creates a global variable operand.
    #[must_use]
    pub fn global(address: u64, size: u8) -> Self {
        Operand::Global { address, size }
    }

    /// Creates a block reference.
    #[must_use]
    pub fn block(serial: usize) -> Self {
        Operand::Block(serial)
    }

    /// Returns `true` for the empty operand.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Operand::Empty)
    }

    /// Returns `true` for integer immediates.
    #[must_use]
    pub fn is_number(&self) -> bool {
        matches!(self, Operand::Number { .. })
    }

    /// Returns `true` for stack slots.
    #[must_use]
    pub fn is_stack(&self) -> bool {
        matches!(self, Operand::Stack { .. })
    }

    /// Returns `true` for memory locations (stack slots and globals).
    #[must_use]
    pub fn is_memory(&self) -> bool {
        matches!(self, Operand::Stack { .. } | Operand::Global { .. })
    }

    /// Returns `true` if this operand names a location whose definitions the
    /// tracer can follow: a register or a stack slot.
    #[must_use]
    pub fn is_trackable(&self) -> bool {
        matches!(self, Operand::Register { .. } | Operand::Stack { .. })
    }

    /// Returns the immediate value, if this is an integer immediate.
    #[must_use]
    pub fn as_number(&self) -> Option<u64> {
        match self {
            Operand::Number { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// Returns the referenced block, if this is a block reference.
    #[must_use]
    pub fn as_block(&self) -> Option<usize> {
        match self {
            Operand::Block(serial) => Some(*serial),
            _ => None,
        }
    }

    /// Returns the declared width in bytes, or `None` for kinds without one.
    #[must_use]
    pub fn size(&self) -> Option<u8> {
        match self {
            Operand::Number { size, .. }
            | Operand::Float { size, .. }
            | Operand::Register { size, .. }
            | Operand::Stack { size, .. }
            | Operand::Global { size, .. } => Some(*size),
            _ => None,
        }
    }

    /// Returns a short name for the operand kind, used in diagnostics.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Operand::Empty => "empty",
            Operand::Number { .. } => "number",
            Operand::Float { .. } => "float",
            Operand::Register { .. } => "register",
            Operand::Stack { .. } => "stack",
            Operand::Global { .. } => "global",
            Operand::Sub(_) => "sub-instruction",
            Operand::Block(_) => "block",
            Operand::Args(_) => "arglist",
            Operand::Address(_) => "address",
            Operand::Helper(_) => "helper",
            Operand::Str(_) => "string",
            Operand::Pair { .. } => "pair",
        }
    }

    /// Compares two operands structurally while ignoring their widths.
    ///
    /// Operands of different kinds never compare equal. Immediates are equal
    /// when their values agree at the smaller of the two widths. Nested
    /// instructions are compared by opcode and operands, again ignoring
    /// widths. Argument lists are never considered equal.
    ///
    /// # Arguments
    ///
    /// * `other` - The operand to compare against.
    ///
    /// # Returns
    ///
    /// `true` if both operands name the same value or location.
    #[must_use]
    pub fn equal_ignore_size(&self, other: &Operand) -> bool {
        match (self, other) {
            (Operand::Empty, Operand::Empty) => true,
            (
                Operand::Number {
                    value: lv,
                    size: ls,
                },
                Operand::Number {
                    value: rv,
                    size: rs,
                },
            ) => {
                let width = (*ls).min(*rs);
                sign_extend(*lv, width) == sign_extend(*rv, width)
            }
            (Operand::Float { bits: l, .. }, Operand::Float { bits: r, .. }) => l == r,
            (Operand::Register { reg: l, .. }, Operand::Register { reg: r, .. }) => l == r,
            (Operand::Stack { offset: l, .. }, Operand::Stack { offset: r, .. }) => l == r,
            (Operand::Global { address: l, .. }, Operand::Global { address: r, .. }) => l == r,
            (Operand::Sub(l), Operand::Sub(r)) => l.equal_ignore_size(r),
            (Operand::Block(l), Operand::Block(r)) => l == r,
            (Operand::Address(l), Operand::Address(r)) => l.equal_ignore_size(r),
            (Operand::Helper(l), Operand::Helper(r)) | (Operand::Str(l), Operand::Str(r)) => {
                l == r
            }
            (
                Operand::Pair {
                    low: ll,
                    high: lh,
                },
                Operand::Pair {
                    low: rl,
                    high: rh,
                },
            ) => ll.equal_ignore_size(rl) && lh.equal_ignore_size(rh),
            _ => false,
        }
    }

    /// Returns `true` if writing `self` fully overwrites the location `other`.
    ///
    /// Only registers and stack slots take part in definition tracking. A
    /// write covers a location when both live in the same address space and
    /// the written byte range contains every byte of `other`.
    #[must_use]
    pub fn covers(&self, other: &Operand) -> bool {
        match (self, other) {
            (
                Operand::Register { reg: dr, size: ds },
                Operand::Register { reg: or, size: os },
            ) => {
                let (dr, or) = (u64::from(*dr), u64::from(*or));
                dr <= or && or + u64::from(*os) <= dr + u64::from(*ds)
            }
            (
                Operand::Stack {
                    offset: d_off,
                    size: ds,
                },
                Operand::Stack {
                    offset: o_off,
                    size: os,
                },
            ) => *d_off <= *o_off && *o_off + i64::from(*os) <= *d_off + i64::from(*ds),
            _ => false,
        }
    }

    /// Rewrites every block reference through `map`, recursing into nested
    /// operands.
    pub(crate) fn remap_blocks(&mut self, map: &dyn Fn(usize) -> usize) {
        match self {
            Operand::Block(serial) => *serial = map(*serial),
            Operand::Sub(insn) => insn.remap_blocks(map),
            Operand::Args(args) => {
                for arg in args {
                    arg.remap_blocks(map);
                }
            }
            Operand::Address(inner) => inner.remap_blocks(map),
            Operand::Pair { low, high } => {
                low.remap_blocks(map);
                high.remap_blocks(map);
            }
            _ => {}
        }
    }
}

impl Default for Operand {
    fn default() -> Self {
        Operand::Empty
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Empty => Ok(()),
            Operand::Number { value, size } => write!(f, "#{:#x}.{size}", truncate(*value, *size)),
            Operand::Float { bits, size } => write!(f, "fp:{bits:#x}.{size}"),
            Operand::Register { reg, size } => write!(f, "r{reg}.{size}"),
            Operand::Stack { offset, size } => {
                if *offset < 0 {
                    write!(f, "%var_{:X}.{size}", offset.unsigned_abs())
                } else {
                    write!(f, "%arg_{offset:X}.{size}")
                }
            }
            Operand::Global { address, size } => write!(f, "${address:#x}.{size}"),
            Operand::Sub(insn) => write!(f, "({insn})"),
            Operand::Block(serial) => write!(f, "@{serial}"),
            Operand::Args(args) => {
                write!(f, "<")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ">")
            }
            Operand::Address(inner) => write!(f, "&({inner})"),
            Operand::Helper(name) => write!(f, "!{name}"),
            Operand::Str(s) => write!(f, "{s:?}"),
            Operand::Pair { low, high } => write!(f, "{high}:{low}"),
        }
    }
}

/// Truncates `value` to `size` bytes.
#[must_use]
pub fn truncate(value: u64, size: u8) -> u64 {
    if size == 0 || size >= 8 {
        value
    } else {
        value & ((1u64 << (u32::from(size) * 8)) - 1)
    }
}

/// Truncates `value` to `size` bytes and sign-extends the result to 64 bits.
#[must_use]
#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
pub fn sign_extend(value: u64, size: u8) -> u64 {
    if size == 0 || size >= 8 {
        return value;
    }
    let bits = u32::from(size) * 8;
    let shift = 64 - bits;
    (((value << shift) as i64) >> shift) as u64
}
