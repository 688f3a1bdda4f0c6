//! Program analysis infrastructure.
//!
//! This module holds the microcode model the deflattening engine works on.
//! Generic graph algorithms over it live in [`crate::utils::graph`].
//!
//! - [`ir`] - Functions, blocks, instructions and operands
//!
//! # Usage
//!
//! ```rust
//! use deflatten::analysis::ir::{FunctionBuilder, Operand};
//!
//! let func = FunctionBuilder::new(0x1000).build_with(|f| {
//!     f.block(0, |b| {
//!         b.mov_num(1, Operand::reg(8, 4)).ret();
//!     });
//! })?;
//! func.verify()?;
//! # Ok::<(), deflatten::Error>(())
//! ```

pub mod ir;

pub use ir::{Block, Function, FunctionBuilder, Instruction, Maturity, Opcode, Operand};
