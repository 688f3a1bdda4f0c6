//! In-memory microcode model.
//!
//! This is the boundary type between a decompiler host and the deflattening
//! engine: a [`Function`] made of [`Block`]s of three-operand
//! [`Instruction`]s over tagged [`Operand`]s. A host lifts its own IR into
//! this model (or builds it directly with [`FunctionBuilder`]), runs the
//! engine, and reads the rewritten graph back.
//!
//! # Key Types
//!
//! - [`Function`] - The control-flow graph, with edge verification
//! - [`Block`] - Instruction list plus predecessor/successor serials
//! - [`Instruction`] / [`Opcode`] - Three-operand microcode instructions
//! - [`Operand`] - Tagged operands with width-insensitive equality
//! - [`Maturity`] - Decompiler maturity levels

mod block;
mod builder;
mod function;
mod instruction;
mod maturity;
mod operand;

pub use block::Block;
pub use builder::{BlockBuilder, FunctionBuilder, FunctionContext};
pub use function::Function;
pub use instruction::{Instruction, Opcode};
pub use maturity::Maturity;
pub use operand::{sign_extend, truncate, Operand};
