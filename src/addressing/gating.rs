//! Interpolation gate between content addressing and the previous weighting.
//!
//! `w_g = σ(g) · w_c + (1 - σ(g)) · w_{t-1}`
//!
//! The `w_{t-1}` edge is the one that carries gradient backward in time.

use ndarray::Zip;

use crate::core::unit::{sigmoid, UnitVec};

#[derive(Clone, Debug)]
pub struct GatedWeighting {
    pub top: UnitVec,

    /// `σ(g)`
    gate: f64,
}

impl GatedWeighting {
    pub fn forward(gate_raw: f64, content: &UnitVec, previous: &UnitVec) -> Self {
        let gate = sigmoid(gate_raw);
        let val = &content.val * gate + &previous.val * (1.0 - gate);
        Self {
            top: UnitVec::from_vals(val),
            gate,
        }
    }

    pub fn backward(&self, content: &mut UnitVec, previous: &mut UnitVec, gate_grad: &mut f64) {
        let gate = self.gate;

        let mut grad = 0.0;
        Zip::from(&content.val)
            .and(&previous.val)
            .and(&self.top.grad)
            .for_each(|&c, &p, &g| grad += (c - p) * g);
        *gate_grad += grad * gate * (1.0 - gate);

        content.grad.scaled_add(gate, &self.top.grad);
        previous.grad.scaled_add(1.0 - gate, &self.top.grad);
    }
}
