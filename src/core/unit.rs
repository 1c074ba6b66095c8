//! Differentiable units and the scalar activations shared by every stage.
//!
//! A `Unit` is the smallest node of the computation graph: the value produced
//! in the forward pass and the gradient of the loss with respect to it, filled
//! in by the backward pass.  Bulk buffers keep values and gradients in two
//! parallel arrays so dot and outer products run over contiguous memory.

use ndarray::{Array1, ArrayView, ArrayView1, Dimension};
use serde::{Deserialize, Serialize};

/// A scalar node: forward value and accumulated gradient.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub val: f64,
    pub grad: f64,
}

impl Unit {
    pub fn new(val: f64) -> Self {
        Self { val, grad: 0.0 }
    }
}

/// A vector of nodes, stored as parallel value and gradient arrays.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnitVec {
    pub val: Array1<f64>,
    pub grad: Array1<f64>,
}

impl UnitVec {
    pub fn zeros(n: usize) -> Self {
        Self {
            val: Array1::zeros(n),
            grad: Array1::zeros(n),
        }
    }

    /// Wrap forward values with a zeroed gradient buffer.
    pub fn from_vals(val: Array1<f64>) -> Self {
        let grad = Array1::zeros(val.len());
        Self { val, grad }
    }

    /// The uniform distribution over `n` rows.
    pub fn uniform(n: usize) -> Self {
        Self::from_vals(Array1::from_elem(n, 1.0 / n as f64))
    }

    pub fn len(&self) -> usize {
        self.val.len()
    }

    pub fn is_empty(&self) -> bool {
        self.val.is_empty()
    }

    pub fn zero_grad(&mut self) {
        self.grad.fill(0.0);
    }
}

/// Logistic sigmoid: 1 / (1 + exp(-x)).
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Softplus `ln(1 + exp(x))`, evaluated without overflow for large `x`.
pub fn softplus(x: f64) -> f64 {
    x.max(0.0) + (-x.abs()).exp().ln_1p()
}

/// Abort if `w` holds a NaN or a negative entry.
///
/// Attention weights are probabilities by construction; anything else means
/// a caller fed the circuit corrupted parameters.
pub(crate) fn ensure_distribution(stage: &'static str, w: ArrayView1<f64>) {
    if let Some((index, &value)) = w
        .iter()
        .enumerate()
        .find(|(_, v)| v.is_nan() || **v < 0.0)
    {
        tracing::error!(stage, index, value, weights = ?w, "invalid attention weight");
        panic!("{stage}: weight[{index}] = {value} is not a probability");
    }
}

/// Abort if `value` is NaN or infinite.
pub(crate) fn ensure_finite(stage: &'static str, value: f64) {
    if !value.is_finite() {
        tracing::error!(stage, value, "non-finite value");
        panic!("{stage}: produced non-finite value {value}");
    }
}

/// Abort if any gradient in `grads` is NaN or infinite.
pub(crate) fn ensure_finite_grads<D: Dimension>(stage: &'static str, grads: ArrayView<f64, D>) {
    if let Some((index, &value)) = grads.indexed_iter().find(|(_, g)| !g.is_finite()) {
        let index = format!("{:?}", index);
        tracing::error!(stage, %index, value, "non-finite gradient");
        panic!("{stage}: non-finite gradient {value} at {index}");
    }
}
