//! Write heads: erase, then add.
//!
//! With erase factors `e_k = σ(erase_k)` and add factors `a_k = σ(add_k)`:
//!
//! ```text
//! M_t[j] = M_{t-1}[j] · Π_k (1 - w_k[j] · e_k) + Σ_k w_k[j] · a_k
//! ```
//!
//! Heads compose by the product of their retain factors, so the result does
//! not depend on head order.  This is the recurrent state update of the
//! machine.

use ndarray::{s, Array2, Zip};

use crate::config::ERASE_DIVISION_FLOOR;
use crate::core::head::Head;
use crate::core::state::MemoryBank;
use crate::core::unit::{ensure_finite, sigmoid, UnitVec};

#[derive(Clone, Debug)]
pub struct WrittenMemory {
    /// Head weightings, heads × rows.
    weights: Array2<f64>,

    /// Erase factors in (0, 1), heads × width.
    erase: Array2<f64>,

    /// Add factors in (0, 1), heads × width.
    add: Array2<f64>,

    /// `Π_k (1 - w_k[j] · e_k[c])`, rows × width.
    retain: Array2<f64>,
}

impl WrittenMemory {
    /// Apply every head's erase and add vectors to `previous`.
    pub fn forward(heads: &[Head], weights: &[UnitVec], previous: &MemoryBank) -> (Self, MemoryBank) {
        let width = previous.width();
        let mut erase = Array2::<f64>::zeros((heads.len(), width));
        let mut add = Array2::<f64>::zeros((heads.len(), width));
        for (k, head) in heads.iter().enumerate() {
            erase.row_mut(k).assign(&head.erase().mapv(sigmoid));
            add.row_mut(k).assign(&head.add().mapv(sigmoid));
        }
        Self::from_factors(weights, erase, add, previous)
    }

    /// Write with already-activated erase and add factors (heads × width).
    pub fn from_factors(
        weights: &[UnitVec],
        erase: Array2<f64>,
        add: Array2<f64>,
        previous: &MemoryBank,
    ) -> (Self, MemoryBank) {
        let (rows, width) = previous.val.dim();
        let mut w = Array2::<f64>::zeros((weights.len(), rows));
        for (mut row, weighting) in w.outer_iter_mut().zip(weights) {
            row.assign(&weighting.val);
        }

        let mut retain = Array2::<f64>::ones((rows, width));
        let mut adds = Array2::<f64>::zeros((rows, width));
        for k in 0..weights.len() {
            for j in 0..rows {
                let wj = w[[k, j]];
                for c in 0..width {
                    retain[[j, c]] *= 1.0 - wj * erase[[k, c]];
                    adds[[j, c]] += wj * add[[k, c]];
                }
            }
        }

        let val = &previous.val * &retain + &adds;
        for &v in val.iter() {
            ensure_finite("written memory", v);
        }

        let stage = Self {
            weights: w,
            erase,
            add,
            retain,
        };
        (stage, MemoryBank::from_vals(val))
    }

    /// Erase factors actually applied, heads × width.
    pub fn erase_factors(&self) -> &Array2<f64> {
        &self.erase
    }

    /// Add factors actually applied, heads × width.
    pub fn add_factors(&self) -> &Array2<f64> {
        &self.add
    }

    /// Product of every head's retain factor except head `k`'s, at cell (j, c).
    ///
    /// Divides head `k`'s factor out of the saved product unless it is close to
    /// zero, in which case the other factors are multiplied again.
    fn retain_without(&self, k: usize, j: usize, c: usize) -> f64 {
        let factor = 1.0 - self.weights[[k, j]] * self.erase[[k, c]];
        if factor.abs() > ERASE_DIVISION_FLOOR {
            return self.retain[[j, c]] / factor;
        }
        (0..self.weights.nrows())
            .filter(|&q| q != k)
            .map(|q| 1.0 - self.weights[[q, j]] * self.erase[[q, c]])
            .product()
    }

    /// Backward from `out.grad` into the head weightings, the raw erase and add
    /// vectors, and the previous bank.
    pub fn backward(
        &self,
        out: &MemoryBank,
        weights: &mut [UnitVec],
        heads: &mut [Head],
        previous: &mut MemoryBank,
    ) {
        let (rows, width) = out.val.dim();
        let n_heads = self.weights.nrows();
        let mut erase_grad = Array2::<f64>::zeros((n_heads, width));
        let mut add_grad = Array2::<f64>::zeros((n_heads, width));

        for j in 0..rows {
            for c in 0..width {
                let g = out.grad[[j, c]];
                let old = previous.val[[j, c]];
                for k in 0..n_heads {
                    let w = self.weights[[k, j]];
                    // ∂M_t / ∂(1 - w_k e_k) = M_{t-1} · Π_{q≠k} (1 - w_q e_q)
                    let d_retain = old * self.retain_without(k, j, c) * g;
                    weights[k].grad[j] += -self.erase[[k, c]] * d_retain + self.add[[k, c]] * g;
                    erase_grad[[k, c]] -= w * d_retain;
                    add_grad[[k, c]] += w * g;
                }
            }
        }

        // Chain through the sigmoids.
        for (k, head) in heads.iter_mut().enumerate() {
            let e = self.erase.row(k);
            let a = self.add.row(k);
            let erase_range = head.erase_range();
            Zip::from(head.grad.slice_mut(s![erase_range]))
                .and(&erase_grad.row(k))
                .and(&e)
                .for_each(|hg, &g, &e| *hg += g * e * (1.0 - e));
            let add_range = head.add_range();
            Zip::from(head.grad.slice_mut(s![add_range]))
                .and(&add_grad.row(k))
                .and(&a)
                .for_each(|hg, &g, &a| *hg += g * a * (1.0 - a));
        }

        // ∂L/∂M_{t-1} = Π_k (1 - w_k e_k) · ∂L/∂M_t
        Zip::from(&mut previous.grad)
            .and(&self.retain)
            .and(&out.grad)
            .for_each(|pg, &r, &g| *pg += r * g);
    }
}
