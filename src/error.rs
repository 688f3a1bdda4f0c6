use thiserror::Error;

macro_rules! structure_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Structure {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Structure {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

pub(crate) use structure_error;

/// The generic Error type, which covers every error this library can return.
///
/// Most of the expected failure modes of deflattening (a function that is not
/// flattened, a state assignment that cannot be traced, a rejected entropy
/// check) are not errors at all: they are reported as `None`/`false` results
/// plus diagnostic events. The variants below are reserved for conditions that
/// indicate a broken graph, misuse of the rewriting API, or bad configuration.
///
/// # Error Categories
///
/// ## Structural Errors
/// - [`Error::Structure`] - A rewriting operation was asked to do something the graph does not allow
/// - [`Error::GraphIntegrity`] - [`crate::Function::verify`] found inconsistent edges or terminators
/// - [`Error::InvalidBlock`] - A block serial outside the function was referenced
///
/// ## Session Errors
/// - [`Error::NotFlattened`] - A function was expected to carry dispatch information but does not
///
/// ## Configuration Errors
/// - [`Error::Config`] - An [`crate::UnflattenConfig`] value is out of range
///
/// # Examples
///
/// ```rust
/// use deflatten::{Error, Function};
///
/// let func = Function::new(0x1000);
/// match func.verify() {
///     Ok(()) => println!("graph is consistent"),
///     Err(Error::GraphIntegrity { block, message }) => {
///         eprintln!("block {block}: {message}");
///     }
///     Err(e) => eprintln!("other error: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// A rewriting operation violated a structural precondition.
    ///
    /// Raised when the graph rewriter is asked to change the tail of an
    /// empty block, or to redirect an edge that does not exist. The error
    /// includes the source location where it was detected.
    ///
    /// # Fields
    ///
    /// * `message` - What was wrong with the request
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Structure - {file}:{line}: {message}")]
    Structure {
        /// The message to be printed for the Structure error
        message: String,
        /// The source file in which this error occurred
        file: &'static str,
        /// The source line in which this error occurred
        line: u32,
    },

    /// The control-flow graph failed verification.
    ///
    /// Predecessor and successor lists disagree, a block serial does not
    /// match its position, or a terminator targets a block that is not in
    /// the successor list.
    #[error("Graph integrity violated at block {block}: {message}")]
    GraphIntegrity {
        /// Serial of the offending block
        block: usize,
        /// Description of the inconsistency
        message: String,
    },

    /// A block serial outside the function was referenced.
    #[error("Block {0} does not exist")]
    InvalidBlock(usize),

    /// The function at the given entry address carries no dispatch pattern.
    #[error("Function at {0:#x} is not flattened")]
    NotFlattened(u64),

    /// Invalid configuration value.
    #[error("Invalid configuration - {0}")]
    Config(String),
}
