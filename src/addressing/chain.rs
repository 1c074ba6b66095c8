//! One head's full addressing chain for one timestep.

use ndarray::{s, Array2, ArrayView2};

use crate::addressing::content::ContentAddressing;
use crate::addressing::gating::GatedWeighting;
use crate::addressing::refocus::Refocus;
use crate::addressing::shift::ShiftedWeighting;
use crate::addressing::similarity::KeySimilarity;
use crate::core::head::{Head, HeadParam};
use crate::core::state::MemoryBank;
use crate::core::unit::UnitVec;

/// Saved stages of one head's addressing, kept for the backward pass.
#[derive(Clone, Debug)]
pub struct AddressingChain {
    pub similarity: KeySimilarity,
    pub content: ContentAddressing,
    pub gated: GatedWeighting,
    pub shifted: ShiftedWeighting,
    pub refocus: Refocus,
}

impl AddressingChain {
    /// Address `memory` with `head`, gating against the head's weighting from
    /// the previous timestep.  Returns the chain and the final weighting.
    pub fn forward(head: &Head, memory: &MemoryBank, previous: &UnitVec) -> (Self, UnitVec) {
        let similarity = KeySimilarity::forward(head.key(), head.beta(), memory.val.view());
        let content = ContentAddressing::forward(similarity.top.val.view());
        let gated = GatedWeighting::forward(head.gate(), &content.top, previous);
        let shifted = ShiftedWeighting::forward(head.shift(), &gated.top);
        let (refocus, weights) = Refocus::forward(head.gamma(), &shifted.top);
        tracing::trace!(
            rotation = shifted.rotation(),
            gamma = refocus.exponent(),
            "head addressed"
        );

        let chain = Self {
            similarity,
            content,
            gated,
            shifted,
            refocus,
        };
        (chain, weights)
    }

    /// Backward from the final weighting (`weights.grad` already filled by the
    /// read and write stages) to the head parameters and the previous
    /// weighting.
    ///
    /// The memory gradient is returned as a head-local partial buffer so heads
    /// can run concurrently; the caller adds it into the shared bank gradient.
    pub fn backward(
        &mut self,
        weights: &UnitVec,
        head: &mut Head,
        memory: ArrayView2<f64>,
        previous: &mut UnitVec,
    ) -> Array2<f64> {
        let Self {
            similarity,
            content,
            gated,
            shifted,
            refocus,
        } = self;

        let gamma = head.index(HeadParam::Gamma);
        refocus.backward(weights, &mut shifted.top, &mut head.grad[gamma]);

        let shift = head.index(HeadParam::Shift);
        shifted.backward(&mut gated.top, &mut head.grad[shift]);

        let gate = head.index(HeadParam::Gate);
        gated.backward(&mut content.top, previous, &mut head.grad[gate]);

        content.backward(&mut similarity.top);

        let mut memory_grad = Array2::zeros(memory.raw_dim());
        let key_range = head.key_range();
        let beta = head.index(HeadParam::Beta);
        let mut beta_grad = 0.0;
        similarity.backward(
            head.val.slice(s![key_range.clone()]),
            memory,
            head.grad.slice_mut(s![key_range]),
            &mut beta_grad,
            memory_grad.view_mut(),
        );
        head.grad[beta] += beta_grad;

        memory_grad
    }

    /// Clear the intermediate gradients so the chain can be backpropagated
    /// again from scratch.
    pub fn zero_grad(&mut self) {
        self.similarity.top.zero_grad();
        for unit in &mut self.similarity.units {
            unit.top.grad = 0.0;
            unit.similarity.top.grad = 0.0;
        }
        self.content.top.zero_grad();
        self.gated.top.zero_grad();
        self.shifted.top.zero_grad();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    fn head_with(width: usize, key: &[f64], beta: f64, gate: f64, shift: f64, gamma: f64) -> Head {
        let mut head = Head::new(width);
        let r = head.key_range();
        head.val
            .slice_mut(s![r])
            .assign(&ndarray::Array1::from_vec(key.to_vec()));
        head.set(HeadParam::Beta, beta);
        head.set(HeadParam::Gate, gate);
        head.set(HeadParam::Shift, shift);
        head.set(HeadParam::Gamma, gamma);
        head
    }

    #[test]
    fn test_strong_key_focuses_on_matching_row() {
        let memory = MemoryBank::from_vals(
            Array2::from_shape_vec((3, 2), vec![1.0, 0.0, 0.0, 1.0, -1.0, 0.0]).unwrap(),
        );
        // Open gate, zero shift, strong key on row 1.
        let head = head_with(2, &[0.0, 1.0], 3.0, 20.0, 0.0, 2.0);
        let previous = UnitVec::uniform(3);
        let (_, w) = AddressingChain::forward(&head, &memory, &previous);

        assert!((w.val.sum() - 1.0).abs() < 1e-12);
        assert!(w.val[1] > 0.99, "weights = {:?}", w.val);
    }

    #[test]
    fn test_closed_gate_follows_previous_weighting() {
        let memory = MemoryBank::from_vals(array![[1.0, 2.0], [0.5, -1.0], [2.0, 0.1]]);
        let head = head_with(2, &[1.0, 1.0], 0.0, -40.0, 0.0, -40.0);
        let previous = UnitVec::from_vals(array![0.2, 0.5, 0.3]);
        let (_, w) = AddressingChain::forward(&head, &memory, &previous);

        // γ ≈ 1 and no shift: the weighting passes through unchanged.
        for i in 0..3 {
            assert!((w.val[i] - previous.val[i]).abs() < 1e-9);
        }
    }

    #[test]
    fn test_backward_touches_every_scalar_input() {
        let memory = MemoryBank::from_vals(array![[0.3, -0.7], [1.2, 0.4], [-0.5, 0.9]]);
        let mut head = head_with(2, &[0.6, -0.2], 0.4, 0.1, 0.7, 0.3);
        let mut previous = UnitVec::from_vals(array![0.3, 0.3, 0.4]);
        let (mut chain, mut w) = AddressingChain::forward(&head, &memory, &previous);
        w.grad.assign(&array![0.987, 1.234, -0.5]);

        let mem_grad = chain.backward(&w, &mut head, memory.val.view(), &mut previous);

        assert!(mem_grad.iter().any(|g| *g != 0.0));
        assert!(previous.grad.iter().any(|g| *g != 0.0));
        for p in HeadParam::ALL {
            assert!(head.grad_of(p) != 0.0, "{} gradient is zero", p.name());
        }
        // Erase/add do not take part in addressing.
        assert!(head.grad.slice(s![0..4]).iter().all(|g| *g == 0.0));
    }
}
