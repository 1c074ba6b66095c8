//! Cosine similarity between a head key and memory rows, and its scaling by
//! the key strength.
//!
//! ```text
//! K(k, m) = k·m / (‖k‖ ‖m‖)
//! score   = exp(beta) · K(k, m)
//! ```
//!
//! `beta` is unconstrained; `exp` keeps the strength positive with a smooth
//! gradient everywhere.

use ndarray::{Array1, ArrayView1, ArrayView2, ArrayViewMut1, ArrayViewMut2, Zip};

use crate::core::unit::{ensure_finite, Unit, UnitVec};

/// Cosine similarity of one key/row pair, with the norms saved for backward.
#[derive(Clone, Debug)]
pub struct Similarity {
    pub top: Unit,

    dot: f64,
    key_norm: f64,
    row_norm: f64,
}

impl Similarity {
    /// Panics when either vector has zero norm: the similarity is undefined,
    /// which means the key or the memory was initialised to exactly zero.
    pub fn forward(key: ArrayView1<f64>, row: ArrayView1<f64>) -> Self {
        let dot = key.dot(&row);
        let key_norm = key.dot(&key).sqrt();
        let row_norm = row.dot(&row).sqrt();
        let val = dot / (key_norm * row_norm);
        if val.is_nan() {
            tracing::error!(?key, ?row, "cosine similarity of a zero-norm vector");
        }
        ensure_finite("similarity", val);

        Self {
            top: Unit::new(val),
            dot,
            key_norm,
            row_norm,
        }
    }

    /// Accumulate `∂L/∂k` and `∂L/∂m` from `top.grad`.
    pub fn backward(
        &self,
        key: ArrayView1<f64>,
        row: ArrayView1<f64>,
        mut key_grad: ArrayViewMut1<f64>,
        mut row_grad: ArrayViewMut1<f64>,
    ) {
        let dot_kk = self.dot / (self.key_norm * self.key_norm);
        let dot_mm = self.dot / (self.row_norm * self.row_norm);
        let g = self.top.grad / (self.key_norm * self.row_norm);

        Zip::from(&mut key_grad)
            .and(&mut row_grad)
            .and(&key)
            .and(&row)
            .for_each(|kg, rg, &k, &m| {
                *kg += (m - k * dot_kk) * g;
                *rg += (k - m * dot_mm) * g;
            });
    }
}

/// A similarity scaled by `exp(beta)`.
#[derive(Clone, Debug)]
pub struct BetaSimilarity {
    pub top: Unit,
    pub similarity: Similarity,

    /// `exp(beta)`
    strength: f64,
}

impl BetaSimilarity {
    pub fn forward(beta: f64, similarity: Similarity) -> Self {
        let strength = beta.exp();
        let val = strength * similarity.top.val;
        ensure_finite("key strength", val);
        Self {
            top: Unit::new(val),
            similarity,
            strength,
        }
    }

    /// Push `top.grad` into the similarity and accumulate `∂L/∂beta`.
    pub fn backward(&mut self, beta_grad: &mut f64) {
        *beta_grad += self.similarity.top.val * self.strength * self.top.grad;
        self.similarity.top.grad += self.strength * self.top.grad;
    }
}

/// Scaled similarities of one key against every memory row.
#[derive(Clone, Debug)]
pub struct KeySimilarity {
    pub units: Vec<BetaSimilarity>,

    /// Scores handed to content addressing, one per row.
    pub top: UnitVec,
}

impl KeySimilarity {
    pub fn forward(key: ArrayView1<f64>, beta: f64, memory: ArrayView2<f64>) -> Self {
        let units: Vec<BetaSimilarity> = memory
            .outer_iter()
            .map(|row| BetaSimilarity::forward(beta, Similarity::forward(key, row)))
            .collect();
        let top = UnitVec::from_vals(units.iter().map(|u| u.top.val).collect::<Array1<f64>>());
        Self { units, top }
    }

    /// Backward through every row: gradients land in the key, in `beta` and in
    /// the memory gradient buffer `memory_grad`.
    pub fn backward(
        &mut self,
        key: ArrayView1<f64>,
        memory: ArrayView2<f64>,
        mut key_grad: ArrayViewMut1<f64>,
        beta_grad: &mut f64,
        mut memory_grad: ArrayViewMut2<f64>,
    ) {
        for (((unit, &g), row), row_grad) in self
            .units
            .iter_mut()
            .zip(self.top.grad.iter())
            .zip(memory.outer_iter())
            .zip(memory_grad.outer_iter_mut())
        {
            unit.top.grad += g;
            unit.backward(beta_grad);
            unit.similarity
                .backward(key, row, key_grad.view_mut(), row_grad);
        }
    }
}
