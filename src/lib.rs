//! # NTM-MEMORY
//!
//! **Differentiable external memory for recurrent controllers**: the
//! addressing and memory-update circuit of a Neural Turing Machine, with a
//! hand-written reverse-mode pass for every stage.
//!
//! ## Components
//!
//! 1. **Similarity**: cosine similarity of a head key against every memory row
//! 2. **Content addressing**: key-strength scaling + max-shifted softmax
//! 3. **Gating**: interpolation with the head's previous weighting
//! 4. **Shift**: continuous circular convolution with a two-tap kernel
//! 5. **Refocus**: softplus-parameterised power-law sharpening
//! 6. **Read / Write**: weighted row sums and erase-then-add memory updates
//! 7. **Circuit / Sequence**: one timestep across all heads, and the
//!    backpropagation-through-time chain of timesteps
//!
//! Every value touched by the backward pass is a (value, gradient) pair.
//! Gradients always accumulate, since a value may feed several consumers.

pub mod addressing;
pub mod circuit;
pub mod core;
pub mod error;
pub mod learning;
pub mod memory;

pub use crate::circuit::sequence::{InitialState, MemoryBias, Sequence, Timestep};
pub use crate::circuit::step::Circuit;
pub use crate::config::MemoryConfig;
pub use crate::core::head::{Head, HeadParam};
pub use crate::core::state::{MemoryBank, MemoryState};
pub use crate::core::unit::{Unit, UnitVec};
pub use crate::error::{NtmError, Result};

/// Numerical constants and the memory shape configuration.
pub mod config {
    use serde::{Deserialize, Serialize};

    use crate::error::{NtmError, Result};

    /// Double-precision machine epsilon (rounded).
    pub const MACHINE_EPSILON: f64 = 2.2e-16;

    /// `sqrt(MACHINE_EPSILON)`, the base step of finite differences.
    pub const MACHINE_EPSILON_SQRT: f64 = 1e-8;

    /// Below this magnitude a head's `(1 - w·e)` write factor is not divided
    /// out of the combined product; the other heads' product is recomputed.
    pub const ERASE_DIVISION_FLOOR: f64 = 1e-6;

    /// Absolute tolerance between analytic and finite-difference gradients.
    pub const GRADIENT_TOLERANCE: f64 = 1e-5;

    /// Tolerance on `Σ w = 1` for attention distributions.
    pub const DISTRIBUTION_TOLERANCE: f64 = 1e-9;

    /// Coefficient of every output in the gradient-check loss.
    pub const OUTPUT_GRADIENT: f64 = 1.234;

    /// Coefficient of the distinguished weight `weights[0][0]`.
    pub const DISTINGUISHED_OUTPUT_GRADIENT: f64 = 0.987;

    /// Number of scalars a head emits for memory width `m`:
    /// erase (m), add (m), key (m), beta, gate, shift, gamma.
    pub const fn head_param_len(m: usize) -> usize {
        3 * m + 4
    }

    /// Shape of the memory bank and the head set.
    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    pub struct MemoryConfig {
        /// Number of memory rows (N).
        pub rows: usize,

        /// Width of each memory row (M).
        pub width: usize,

        /// Number of read/write heads.
        pub heads: usize,

        /// Run the per-head addressing passes on the rayon pool.
        pub parallel_heads: bool,
    }

    impl Default for MemoryConfig {
        fn default() -> Self {
            Self {
                rows: 128,
                width: 20,
                heads: 1,
                parallel_heads: false,
            }
        }
    }

    impl MemoryConfig {
        pub fn new(rows: usize, width: usize, heads: usize) -> Self {
            Self {
                rows,
                width,
                heads,
                ..Default::default()
            }
        }

        pub fn validate(&self) -> Result<()> {
            if self.rows == 0 || self.width == 0 {
                return Err(NtmError::EmptyMemory {
                    rows: self.rows,
                    width: self.width,
                });
            }
            if self.heads == 0 {
                return Err(NtmError::NoHeads);
            }
            Ok(())
        }

        /// Length of one head's flat parameter buffer.
        pub fn head_len(&self) -> usize {
            head_param_len(self.width)
        }
    }

}
