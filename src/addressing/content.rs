//! Content addressing: a softmax over per-row scores.
//!
//! The maximum score is subtracted before exponentiating, so large key
//! strengths cannot overflow.  The same stage turns bias logits into the
//! initial weightings of a sequence.

use ndarray::{ArrayView1, Zip};

use crate::core::unit::{ensure_distribution, UnitVec};

#[derive(Clone, Debug)]
pub struct ContentAddressing {
    /// `softmax(scores)`
    pub top: UnitVec,
}

impl ContentAddressing {
    pub fn forward(scores: ArrayView1<f64>) -> Self {
        let max = scores.fold(f64::NEG_INFINITY, |acc, &v| acc.max(v));
        let mut val = scores.mapv(|v| (v - max).exp());
        let sum = val.sum();
        val /= sum;
        ensure_distribution("content addressing", val.view());

        Self {
            top: UnitVec::from_vals(val),
        }
    }

    /// `∂L/∂s_i += w_i · (g_i - Σ_j w_j g_j)`
    pub fn backward(&self, scores: &mut UnitVec) {
        let gw = self.top.grad.dot(&self.top.val);
        Zip::from(&mut scores.grad)
            .and(&self.top.val)
            .and(&self.top.grad)
            .for_each(|sg, &w, &g| *sg += (g - gw) * w);
    }
}
