// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]

//! # deflatten
//!
//! A control flow deflattening engine for decompiler microcode.
//!
//! Control flow flattening rewrites a function into a loop around a
//! *dispatcher*: every original block becomes a case selected by comparing a
//! state variable against random-looking keys, and every jump between
//! original blocks becomes "store the next key, jump back to the
//! dispatcher". `deflatten` recognizes that structure, resolves which case
//! each block really continues with, and rewrites the graph so the blocks
//! jump to each other directly again.
//!
//! ## Features
//!
//! - **Dispatcher recognition** - State variable selection, a set-bit entropy
//!   check on the keys, key to case mapping and dominator clusters
//! - **Definition tracing** - Follows `mov` chains through temporaries and
//!   stack slots, across single-predecessor blocks
//! - **Conditional recovery** - Splits blocks shared by both arms of an `if`
//! - **Graph hygiene** - Goto collapsing, deferred edge edits, unreachable
//!   block pruning and consistency verification
//! - **Concurrent sessions** - Memo sets and the event log can be shared by
//!   a parallel batch
//!
//! ## Quick Start
//!
//! ```rust
//! use deflatten::prelude::*;
//!
//! let state = Operand::reg(8, 4);
//! let mut func = FunctionBuilder::new(0x401000).build_with(|f| {
//!     f.block(0, |b| {
//!         b.mov_num(0x3C5A_96F0, state.clone());
//!     });
//!     f.block(1, |b| {
//!         b.jz(state.clone(), 0x3C5A_96F0, 3);
//!     });
//!     f.block(2, |b| {
//!         b.jz(state.clone(), 0x5A0F_C3A5, 4);
//!     });
//!     f.block(3, |b| {
//!         b.mov_num(0x5A0F_C3A5, state.clone()).goto(1);
//!     });
//!     f.block(4, |b| {
//!         b.ret();
//!     });
//! })?;
//!
//! let session = Session::new();
//! Unflattener::new().optimize(&mut func, &session)?;
//!
//! // The dispatcher is gone: entry -> case -> exit.
//! assert_eq!(func.block_count(), 3);
//! println!("{}", session.stats());
//! # Ok::<(), deflatten::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`analysis`] - The microcode model: functions, blocks, instructions, operands
//! - [`compiler`] - The optimizer trait, generic graph passes, the event log and a parallel scheduler
//! - [`deobfuscation`] - The unflattening pass, its configuration and the shared session
//! - [`utils`] - Bit sets and graph algorithms (dominators, reachability)
//! - [`prelude`] - Convenient re-exports of the most commonly used types
//!
//! ## Error Handling
//!
//! A function that is not flattened, or whose transitions cannot be traced,
//! is not an error: the pass simply reports zero changes and records why in
//! the event log. [`Error`] is reserved for broken graphs and bad
//! configuration:
//!
//! ```rust
//! use deflatten::{Error, UnflattenConfig, Unflattener};
//!
//! let config = UnflattenConfig::default().with_entropy_band(0.9, 0.1);
//! match Unflattener::with_config(config) {
//!     Err(Error::Config(message)) => println!("rejected: {message}"),
//!     other => panic!("unexpected: {other:?}"),
//! }
//! ```

pub(crate) mod error;

pub(crate) use error::structure_error;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use deflatten::prelude::*;
///
/// let session = Session::new();
/// let pass = Unflattener::new();
/// assert_eq!(pass.name(), "cff-unflattening");
/// assert!(session.events.is_empty());
/// ```
pub mod prelude;

pub mod analysis;
pub mod compiler;
pub mod deobfuscation;
pub mod utils;

/// `deflatten` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is
/// always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `deflatten` Error type
///
/// The main error type for all operations in this crate.
pub use error::Error;

pub use analysis::ir::{
    Block, BlockBuilder, Function, FunctionBuilder, FunctionContext, Instruction, Maturity, Opcode,
    Operand,
};
pub use compiler::{
    BlockOptimizer, DerivedStats, Event, EventKind, EventLog, PassScheduler,
};
pub use deobfuscation::{DispatchInfo, Session, UnflattenConfig, Unflattener};
