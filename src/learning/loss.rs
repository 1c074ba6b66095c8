//! A linear loss over the circuit outputs.
//!
//! Every output value (final weights, reads, new memory cells) is multiplied by
//! one coefficient, except `weights[0][0]` which carries its own.  Being linear,
//! its gradient with respect to each output is the coefficient itself, so
//! seeding and evaluating can never disagree.

use crate::circuit::sequence::Sequence;
use crate::circuit::step::Circuit;
use crate::config::{DISTINGUISHED_OUTPUT_GRADIENT, OUTPUT_GRADIENT};
use crate::core::state::MemoryState;
use crate::memory::read::Read;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WeightedLoss {
    pub coefficient: f64,

    /// Coefficient of the first head's first weight.
    pub distinguished: f64,
}

impl Default for WeightedLoss {
    fn default() -> Self {
        Self {
            coefficient: OUTPUT_GRADIENT,
            distinguished: DISTINGUISHED_OUTPUT_GRADIENT,
        }
    }
}

impl WeightedLoss {
    fn weight_coefficient(&self, head: usize, row: usize) -> f64 {
        if head == 0 && row == 0 {
            self.distinguished
        } else {
            self.coefficient
        }
    }

    pub fn evaluate_reads(&self, reads: &[Read]) -> f64 {
        reads.iter().map(|r| r.top.val.sum()).sum::<f64>() * self.coefficient
    }

    /// Weights and memory of a state.
    pub fn evaluate_state(&self, state: &MemoryState) -> f64 {
        let mut total = state.memory.val.sum() * self.coefficient;
        for (h, w) in state.weights.iter().enumerate() {
            for (j, &v) in w.val.iter().enumerate() {
                total += v * self.weight_coefficient(h, j);
            }
        }
        total
    }

    pub fn evaluate_circuit(&self, circuit: &Circuit) -> f64 {
        self.evaluate_state(&circuit.state) + self.evaluate_reads(&circuit.reads)
    }

    /// Reads of every step (initial reads included) plus the final state.
    pub fn evaluate_sequence(&self, sequence: &Sequence) -> f64 {
        let reads: f64 = (0..sequence.len())
            .filter_map(|t| sequence.reads(t))
            .map(|r| self.evaluate_reads(r))
            .sum();
        self.evaluate_reads(sequence.initial_reads()) + reads + self.evaluate_state(sequence.latest_state())
    }

    pub fn seed_reads(&self, reads: &mut [Read]) {
        for read in reads {
            read.top.grad += self.coefficient;
        }
    }

    pub fn seed_state(&self, state: &mut MemoryState) {
        state.memory.grad += self.coefficient;
        for (h, w) in state.weights.iter_mut().enumerate() {
            for (j, g) in w.grad.iter_mut().enumerate() {
                *g += self.weight_coefficient(h, j);
            }
        }
    }

    /// Add `∂loss/∂output` to every output gradient of `circuit`.
    pub fn seed_circuit(&self, circuit: &mut Circuit) {
        self.seed_reads(&mut circuit.reads);
        self.seed_state(&mut circuit.state);
    }

    /// Seed the gradients matching [`WeightedLoss::evaluate_sequence`].
    pub fn seed_sequence(&self, sequence: &mut Sequence) {
        self.seed_reads(sequence.initial_reads_mut());
        for t in 0..sequence.len() {
            if let Some(circuit) = sequence.circuit_mut(t) {
                self.seed_reads(&mut circuit.reads);
            }
        }
        self.seed_state(sequence.latest_state_mut());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::MemoryBank;
    use crate::core::unit::UnitVec;
    use ndarray::array;

    #[test]
    fn test_distinguished_weight_coefficient() {
        let loss = WeightedLoss::default();
        let mut state = MemoryState {
            memory: MemoryBank::from_vals(array![[1.0], [2.0]]),
            weights: vec![
                UnitVec::from_vals(array![0.5, 0.5]),
                UnitVec::from_vals(array![1.0, 0.0]),
            ],
        };
        let expected = 3.0 * 1.234 + 0.5 * 0.987 + 0.5 * 1.234 + 1.0 * 1.234;
        assert!((loss.evaluate_state(&state) - expected).abs() < 1e-12);

        loss.seed_state(&mut state);
        assert_eq!(state.weights[0].grad.to_vec(), vec![0.987, 1.234]);
        assert_eq!(state.weights[1].grad.to_vec(), vec![1.234, 1.234]);
        assert_eq!(state.memory.grad, array![[1.234], [1.234]]);
    }
}
