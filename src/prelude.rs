//! # deflatten Prelude
//!
//! This module provides a convenient prelude for the most commonly used types
//! and traits. Import it to get quick access to everything a host needs to
//! run the unflattener.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all deflatten operations
pub use crate::Error;

/// The result type used throughout deflatten
pub use crate::Result;

// ================================================================================================
// Microcode Model
// ================================================================================================

/// Functions, blocks and instructions
pub use crate::analysis::ir::{Block, Function, Instruction, Opcode, Operand};

/// Programmatic construction of functions
pub use crate::analysis::ir::FunctionBuilder;

/// Decompiler maturity levels
pub use crate::analysis::ir::Maturity;

// ================================================================================================
// Passes and Sessions
// ================================================================================================

/// The optimizer trait every pass implements
pub use crate::compiler::BlockOptimizer;

/// Parallel multi-pass driver
pub use crate::compiler::PassScheduler;

/// The unflattening pass and its configuration
pub use crate::deobfuscation::{UnflattenConfig, Unflattener};

/// Recognized dispatcher layout
pub use crate::deobfuscation::DispatchInfo;

/// Memo sets and event log shared across invocations
pub use crate::deobfuscation::Session;

// ================================================================================================
// Diagnostics
// ================================================================================================

/// Event log and event types
pub use crate::compiler::{DerivedStats, Event, EventKind, EventLog};
