//! Shape errors reported when a circuit or sequence is assembled.
//!
//! Numerical invariant violations (NaN, negative probabilities, zero-norm
//! vectors) are not represented here: they abort with a panic, because they
//! mean every downstream value is already meaningless.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NtmError {
    #[error("memory bank must have at least one row and one column, got {rows}x{width}")]
    EmptyMemory { rows: usize, width: usize },

    #[error("at least one head is required")]
    NoHeads,

    #[error("expected {expected} heads, got {actual}")]
    HeadCount { expected: usize, actual: usize },

    #[error("head {head}: width {width} needs {expected} parameters, got {actual}")]
    HeadLayout {
        head: usize,
        width: usize,
        expected: usize,
        actual: usize,
    },

    /// A single head buffer with the wrong length, before it is placed in a
    /// circuit.
    #[error("head buffer for width {width} needs {expected} parameters, got {actual}")]
    HeadLength {
        width: usize,
        expected: usize,
        actual: usize,
    },

    #[error("{what}: expected length {expected}, got {actual}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
}

pub type Result<T> = std::result::Result<T, NtmError>;
