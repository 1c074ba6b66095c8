//! Memory state carried across timesteps.
//!
//! Each timestep owns the bank it writes and the weightings its heads end on.
//! The next timestep only reads those values, and the backward pass adds into
//! their gradient buffers; the bank at `t` never mutates the bank at `t-1`.

use ndarray::{Array1, Array2};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::config::MemoryConfig;
use crate::core::unit::UnitVec;
use crate::error::{NtmError, Result};

/// An N×M memory matrix with its gradient buffer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemoryBank {
    /// Row vectors: `val[[row, column]]`.
    pub val: Array2<f64>,

    pub grad: Array2<f64>,
}

impl MemoryBank {
    pub fn zeros(rows: usize, width: usize) -> Self {
        Self {
            val: Array2::zeros((rows, width)),
            grad: Array2::zeros((rows, width)),
        }
    }

    pub fn from_vals(val: Array2<f64>) -> Self {
        let grad = Array2::zeros(val.raw_dim());
        Self { val, grad }
    }

    /// Standard-normal cell values.
    pub fn random<R: Rng + ?Sized>(rows: usize, width: usize, rng: &mut R) -> Self {
        let val = Array2::from_shape_fn((rows, width), |_| rng.sample::<f64, _>(StandardNormal));
        Self::from_vals(val)
    }

    pub fn rows(&self) -> usize {
        self.val.nrows()
    }

    pub fn width(&self) -> usize {
        self.val.ncols()
    }

    pub fn zero_grad(&mut self) {
        self.grad.fill(0.0);
    }

    /// Check the bank has not diverged (NaN or Inf).
    pub fn is_healthy(&self) -> bool {
        self.val.iter().all(|v| v.is_finite())
    }

    /// Frobenius norm of the bank (for monitoring divergence).
    pub fn norm(&self) -> f64 {
        self.val.mapv(|v| v * v).sum().sqrt()
    }
}

/// The memory bank plus every head's final weighting for one timestep.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemoryState {
    pub memory: MemoryBank,

    /// One distribution over rows per head.
    pub weights: Vec<UnitVec>,
}

impl MemoryState {
    pub fn new(memory: MemoryBank, weights: Vec<UnitVec>) -> Result<Self> {
        let state = Self { memory, weights };
        state.validate()?;
        Ok(state)
    }

    /// Random bank with random normalised weightings, for tests and diagnostics.
    pub fn random<R: Rng + ?Sized>(config: &MemoryConfig, rng: &mut R) -> Self {
        let memory = MemoryBank::random(config.rows, config.width, rng);
        let weights = (0..config.heads)
            .map(|_| {
                let raw = Array1::from_shape_fn(config.rows, |_| {
                    rng.sample::<f64, _>(StandardNormal).abs() + f64::MIN_POSITIVE
                });
                let sum = raw.sum();
                UnitVec::from_vals(raw / sum)
            })
            .collect();
        Self { memory, weights }
    }

    pub fn rows(&self) -> usize {
        self.memory.rows()
    }

    pub fn width(&self) -> usize {
        self.memory.width()
    }

    pub fn heads(&self) -> usize {
        self.weights.len()
    }

    /// Shape checks: non-empty bank, at least one head, one weight per row.
    pub fn validate(&self) -> Result<()> {
        if self.rows() == 0 || self.width() == 0 {
            return Err(NtmError::EmptyMemory {
                rows: self.rows(),
                width: self.width(),
            });
        }
        if self.weights.is_empty() {
            return Err(NtmError::NoHeads);
        }
        if self.memory.grad.dim() != self.memory.val.dim() {
            return Err(NtmError::LengthMismatch {
                what: "memory gradient",
                expected: self.memory.val.len(),
                actual: self.memory.grad.len(),
            });
        }
        for w in &self.weights {
            if w.val.len() != self.rows() || w.grad.len() != self.rows() {
                return Err(NtmError::LengthMismatch {
                    what: "previous weighting",
                    expected: self.rows(),
                    actual: w.val.len().min(w.grad.len()),
                });
            }
        }
        Ok(())
    }

    pub fn zero_grad(&mut self) {
        self.memory.zero_grad();
        for w in &mut self.weights {
            w.zero_grad();
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.memory.is_healthy() && self.weights.iter().all(|w| w.val.iter().all(|v| v.is_finite()))
    }

    /// Weightings as a heads × rows matrix of values.
    pub fn weight_vals(&self) -> Array2<f64> {
        let mut out = Array2::zeros((self.heads(), self.rows()));
        for (mut row, w) in out.outer_iter_mut().zip(&self.weights) {
            row.assign(&w.val);
        }
        out
    }
}
