//! One timestep of the memory circuit.
//!
//! Forward: every head addresses the previous bank (optionally on the rayon
//! pool), reads from it, and then all heads write together to produce the new
//! bank.  Backward runs the same stages in reverse: reads, write, then each
//! head's addressing chain.

use ndarray::Array2;
use rayon::prelude::*;

use crate::addressing::chain::AddressingChain;
use crate::config::head_param_len;
use crate::core::head::Head;
use crate::core::state::MemoryState;
use crate::core::unit::{ensure_finite_grads, UnitVec};
use crate::error::{NtmError, Result};
use crate::memory::read::Read;
use crate::memory::write::WrittenMemory;

/// The saved forward pass of one timestep, and its outputs.
#[derive(Clone, Debug)]
pub struct Circuit {
    /// One addressing chain per head.
    pub addressing: Vec<AddressingChain>,

    /// One read per head, taken from the previous bank.
    pub reads: Vec<Read>,

    pub write: WrittenMemory,

    /// The new bank and every head's final weighting.  The next timestep
    /// gates against these weightings and writes on top of this bank.
    pub state: MemoryState,

    parallel: bool,
}

impl Circuit {
    /// Run one timestep with sequential heads.
    pub fn new(heads: &[Head], previous: &MemoryState) -> Result<Self> {
        Self::with_parallelism(heads, previous, false)
    }

    /// Run one timestep, addressing heads concurrently when `parallel` is set.
    pub fn with_parallelism(heads: &[Head], previous: &MemoryState, parallel: bool) -> Result<Self> {
        check_inputs(heads, previous)?;
        Ok(Self::forward_unchecked(heads, previous, parallel))
    }

    /// Forward pass without shape checks.  Used by finite differencing, which
    /// re-runs a circuit whose shapes were already validated.
    pub(crate) fn forward_unchecked(heads: &[Head], previous: &MemoryState, parallel: bool) -> Self {
        let memory = &previous.memory;

        let (addressing, weights): (Vec<AddressingChain>, Vec<UnitVec>) = if parallel {
            heads
                .par_iter()
                .zip(previous.weights.par_iter())
                .map(|(head, prev)| AddressingChain::forward(head, memory, prev))
                .unzip()
        } else {
            heads
                .iter()
                .zip(&previous.weights)
                .map(|(head, prev)| AddressingChain::forward(head, memory, prev))
                .unzip()
        };

        let reads = weights.iter().map(|w| Read::forward(w, memory)).collect();
        let (write, bank) = WrittenMemory::forward(heads, &weights, memory);

        tracing::debug!(
            heads = heads.len(),
            rows = bank.rows(),
            width = bank.width(),
            norm = bank.norm(),
            parallel,
            "circuit forward"
        );

        Self {
            addressing,
            reads,
            write,
            state: MemoryState {
                memory: bank,
                weights,
            },
            parallel,
        }
    }

    pub fn heads(&self) -> usize {
        self.addressing.len()
    }

    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    /// Backpropagate the gradients seeded on the outputs (read vectors, new
    /// bank, final weightings) into `heads` and the previous state.
    ///
    /// Gradients accumulate; call [`Circuit::zero_grad`] before running a
    /// second backward pass over the same circuit.
    ///
    /// # Panics
    ///
    /// If a NaN or infinite gradient comes out of the read, write or
    /// addressing stage.
    pub fn backward(&mut self, heads: &mut [Head], previous: &mut MemoryState) {
        let Self {
            addressing,
            reads,
            write,
            state,
            parallel,
        } = self;

        for (read, weights) in reads.iter().zip(state.weights.iter_mut()) {
            read.backward(weights, &mut previous.memory);
        }
        check_weight_grads("read backward", &state.weights);
        ensure_finite_grads("read backward", previous.memory.grad.view());

        write.backward(&state.memory, &mut state.weights, heads, &mut previous.memory);
        check_weight_grads("write backward", &state.weights);
        check_head_grads("write backward", heads);
        ensure_finite_grads("write backward", previous.memory.grad.view());

        let memory = previous.memory.val.view();
        let partials: Vec<Array2<f64>> = if *parallel {
            addressing
                .par_iter_mut()
                .zip(state.weights.par_iter())
                .zip(heads.par_iter_mut())
                .zip(previous.weights.par_iter_mut())
                .map(|(((chain, w), head), prev)| chain.backward(w, head, memory, prev))
                .collect()
        } else {
            addressing
                .iter_mut()
                .zip(state.weights.iter())
                .zip(heads.iter_mut())
                .zip(previous.weights.iter_mut())
                .map(|(((chain, w), head), prev)| chain.backward(w, head, memory, prev))
                .collect()
        };

        // Merged in head order so both paths sum identically.
        for partial in &partials {
            previous.memory.grad += partial;
        }
        check_head_grads("addressing backward", heads);
        check_weight_grads("addressing backward", &previous.weights);
        ensure_finite_grads("addressing backward", previous.memory.grad.view());
    }

    /// Clear every gradient the circuit owns: outputs and intermediates.
    pub fn zero_grad(&mut self) {
        for chain in &mut self.addressing {
            chain.zero_grad();
        }
        for read in &mut self.reads {
            read.top.zero_grad();
        }
        self.state.zero_grad();
    }

    /// Read vectors as a heads × width matrix.
    pub fn read_vals(&self) -> Array2<f64> {
        let width = self.state.width();
        let mut out = Array2::zeros((self.reads.len(), width));
        for (mut row, read) in out.outer_iter_mut().zip(&self.reads) {
            row.assign(&read.top.val);
        }
        out
    }

    pub fn memory_vals(&self) -> &Array2<f64> {
        &self.state.memory.val
    }

    /// Final weightings as a heads × rows matrix.
    pub fn weight_vals(&self) -> Array2<f64> {
        self.state.weight_vals()
    }
}

fn check_weight_grads(stage: &'static str, weights: &[UnitVec]) {
    for w in weights {
        ensure_finite_grads(stage, w.grad.view());
    }
}

fn check_head_grads(stage: &'static str, heads: &[Head]) {
    for head in heads {
        ensure_finite_grads(stage, head.grad.view());
    }
}

/// Every head must match the previous state's width and head count.
fn check_inputs(heads: &[Head], previous: &MemoryState) -> Result<()> {
    previous.validate()?;
    if heads.len() != previous.heads() {
        return Err(NtmError::HeadCount {
            expected: previous.heads(),
            actual: heads.len(),
        });
    }
    let width = previous.width();
    let expected = head_param_len(width);
    for (i, head) in heads.iter().enumerate() {
        if head.width() != width || head.val.len() != expected || head.grad.len() != expected {
            return Err(NtmError::HeadLayout {
                head: i,
                width,
                expected,
                actual: head.val.len().min(head.grad.len()),
            });
        }
    }
    Ok(())
}
