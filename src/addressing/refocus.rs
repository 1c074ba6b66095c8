//! Refocus: sharpen the shifted weighting and renormalise.
//!
//! ```text
//! γ   = softplus(gamma) + 1          (γ ≥ 1, smooth in gamma)
//! w_i = x_i^γ / Σ_j x_j^γ
//! ```
//!
//! Inputs are divided by their maximum before exponentiation so a large γ
//! cannot underflow the whole normaliser to zero.
//!
//! Entries below machine epsilon are treated as exactly zero in both passes;
//! raising them to a power and dividing by them is where NaNs come from.

use ndarray::Array1;

use crate::config::MACHINE_EPSILON;
use crate::core::unit::{ensure_distribution, sigmoid, softplus, UnitVec};

#[derive(Clone, Debug)]
pub struct Refocus {
    /// Effective exponent γ.
    gamma: f64,

    /// `σ(gamma)`, the derivative of softplus.
    gamma_sig: f64,
}

impl Refocus {
    /// Returns the stage and the head's final weighting.
    pub fn forward(gamma_raw: f64, shifted: &UnitVec) -> (Self, UnitVec) {
        let gamma = softplus(gamma_raw) + 1.0;
        // (x / max)^γ cannot underflow at the largest entry, and the common
        // factor max^γ cancels in the normalisation.
        let top = shifted.val.fold(0.0_f64, |m, &x| m.max(x));
        let pow: Array1<f64> = shifted.val.mapv(|x| {
            if x < MACHINE_EPSILON {
                0.0
            } else {
                (x / top).powf(gamma)
            }
        });
        let sum = pow.sum();
        let val = pow / sum;
        if !sum.is_normal() {
            tracing::error!(gamma, sum, shifted = ?shifted.val, "refocus normaliser vanished");
        }
        ensure_distribution("refocus", val.view());

        let stage = Self {
            gamma,
            gamma_sig: sigmoid(gamma_raw),
        };
        (stage, UnitVec::from_vals(val))
    }

    /// The sharpening exponent actually applied.
    pub fn exponent(&self) -> f64 {
        self.gamma
    }

    /// Backward from the final weighting `out` into the shifted weighting and
    /// the raw gamma.
    pub fn backward(&self, out: &UnitVec, shifted: &mut UnitVec, gamma_grad: &mut f64) {
        let gw = out.grad.dot(&out.val);

        let mut mean_ln = 0.0;
        for (&x, &w) in shifted.val.iter().zip(out.val.iter()) {
            if x >= MACHINE_EPSILON {
                mean_ln += w * x.ln();
            }
        }

        let mut dgamma = 0.0;
        for i in 0..out.len() {
            let x = shifted.val[i];
            if x < MACHINE_EPSILON {
                continue;
            }
            let (w, g) = (out.val[i], out.grad[i]);
            shifted.grad[i] += (g - gw) * self.gamma * w / x;
            dgamma += g * w * (x.ln() - mean_ln);
        }
        *gamma_grad += dgamma * self.gamma_sig;
    }
}
