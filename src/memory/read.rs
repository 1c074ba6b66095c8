//! Read head: `r = Σ_i w_i · M[i]`.

use ndarray::Zip;

use crate::core::state::MemoryBank;
use crate::core::unit::{ensure_finite, UnitVec};

#[derive(Clone, Debug)]
pub struct Read {
    /// The read vector, length M.  Its gradient is filled by the controller.
    pub top: UnitVec,
}

impl Read {
    pub fn forward(weights: &UnitVec, memory: &MemoryBank) -> Self {
        let val = weights.val.dot(&memory.val);
        for &v in val.iter() {
            ensure_finite("read", v);
        }
        Self {
            top: UnitVec::from_vals(val),
        }
    }

    pub fn backward(&self, weights: &mut UnitVec, memory: &mut MemoryBank) {
        // ∂L/∂w_i = ⟨∂L/∂r, M[i]⟩
        weights.grad += &memory.val.dot(&self.top.grad);

        // ∂L/∂M[i] = w_i · ∂L/∂r
        Zip::from(memory.grad.rows_mut())
            .and(&weights.val)
            .for_each(|mut row, &w| row.scaled_add(w, &self.top.grad));
    }
}
