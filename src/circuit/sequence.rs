//! Backpropagation through time over a chain of circuits.
//!
//! A `Sequence` is the arena for one unrolled run.  Step `t` reads the state
//! owned by step `t - 1` (or the initial state for `t = 0`) and the backward
//! pass walks the steps in reverse, handing each circuit a mutable borrow of
//! its predecessor's state.  Dropping the sequence frees every saved
//! intermediate at once.

use ndarray::{Array1, Array2};
use rand::Rng;
use rand_distr::StandardNormal;

use crate::addressing::content::ContentAddressing;
use crate::circuit::step::Circuit;
use crate::config::MemoryConfig;
use crate::core::head::Head;
use crate::core::state::{MemoryBank, MemoryState};
use crate::core::unit::{ensure_finite_grads, UnitVec};
use crate::error::{NtmError, Result};
use crate::memory::read::Read;

/// Learned starting point of every sequence: the initial bank, and per head
/// the logits whose softmax is the initial weighting.
#[derive(Clone, Debug, PartialEq)]
pub struct MemoryBias {
    pub memory: MemoryBank,
    pub weight_logits: Vec<UnitVec>,
}

impl MemoryBias {
    pub fn from_vals(memory: Array2<f64>, weight_logits: Vec<Array1<f64>>) -> Result<Self> {
        let bias = Self {
            memory: MemoryBank::from_vals(memory),
            weight_logits: weight_logits.into_iter().map(UnitVec::from_vals).collect(),
        };
        bias.validate()?;
        Ok(bias)
    }

    /// Standard-normal bank and logits.
    pub fn random<R: Rng + ?Sized>(config: &MemoryConfig, rng: &mut R) -> Self {
        let memory = MemoryBank::random(config.rows, config.width, rng);
        let weight_logits = (0..config.heads)
            .map(|_| {
                UnitVec::from_vals(Array1::from_shape_fn(config.rows, |_| {
                    rng.sample::<f64, _>(StandardNormal)
                }))
            })
            .collect();
        Self {
            memory,
            weight_logits,
        }
    }

    pub fn rows(&self) -> usize {
        self.memory.rows()
    }

    pub fn width(&self) -> usize {
        self.memory.width()
    }

    pub fn heads(&self) -> usize {
        self.weight_logits.len()
    }

    pub fn validate(&self) -> Result<()> {
        if self.rows() == 0 || self.width() == 0 {
            return Err(NtmError::EmptyMemory {
                rows: self.rows(),
                width: self.width(),
            });
        }
        if self.weight_logits.is_empty() {
            return Err(NtmError::NoHeads);
        }
        for logits in &self.weight_logits {
            if logits.len() != self.rows() {
                return Err(NtmError::LengthMismatch {
                    what: "weight logits",
                    expected: self.rows(),
                    actual: logits.len(),
                });
            }
        }
        Ok(())
    }

    pub fn zero_grad(&mut self) {
        self.memory.zero_grad();
        for logits in &mut self.weight_logits {
            logits.zero_grad();
        }
    }
}

/// The state step 0 reads from, derived from a [`MemoryBias`].
#[derive(Clone, Debug)]
pub struct InitialState {
    content: Vec<ContentAddressing>,
    reads: Vec<Read>,
    pub state: MemoryState,
}

impl InitialState {
    /// Bank copied from the bias, weightings as the softmax of the logits,
    /// and one read per head from that bank.
    pub fn seed(bias: &MemoryBias) -> Self {
        let memory = MemoryBank::from_vals(bias.memory.val.clone());
        let content: Vec<ContentAddressing> = bias
            .weight_logits
            .iter()
            .map(|logits| ContentAddressing::forward(logits.val.view()))
            .collect();
        let weights: Vec<UnitVec> = content
            .iter()
            .map(|ca| UnitVec::from_vals(ca.top.val.clone()))
            .collect();
        let reads = weights.iter().map(|w| Read::forward(w, &memory)).collect();

        Self {
            content,
            reads,
            state: MemoryState { memory, weights },
        }
    }

    /// Reads the controller consumes before the first step.
    pub fn reads(&self) -> &[Read] {
        &self.reads
    }

    pub fn reads_mut(&mut self) -> &mut [Read] {
        &mut self.reads
    }

    /// Push the gradients gathered on the initial state (from step 0 and the
    /// initial reads) into the bias buffers.
    pub fn backward(&mut self, bias: &mut MemoryBias) {
        let Self {
            content,
            reads,
            state,
        } = self;

        for (((read, weights), ca), logits) in reads
            .iter()
            .zip(state.weights.iter_mut())
            .zip(content.iter_mut())
            .zip(bias.weight_logits.iter_mut())
        {
            read.backward(weights, &mut state.memory);
            ca.top.grad += &weights.grad;
            ca.backward(logits);
        }
        bias.memory.grad += &state.memory.grad;

        ensure_finite_grads("initial backward", bias.memory.grad.view());
        for logits in &bias.weight_logits {
            ensure_finite_grads("initial backward", logits.grad.view());
        }
    }

    pub fn zero_grad(&mut self) {
        for ca in &mut self.content {
            ca.top.zero_grad();
        }
        for read in &mut self.reads {
            read.top.zero_grad();
        }
        self.state.zero_grad();
    }
}

/// The heads that drove one step, and the circuit they produced.
#[derive(Clone, Debug)]
pub struct Timestep {
    pub heads: Vec<Head>,
    pub circuit: Circuit,
}

/// An unrolled run of the memory circuit.
///
/// The bias is owned and read-only: the initial state is derived from it once,
/// in [`Sequence::new`].  To apply an update, take it back with
/// [`Sequence::into_bias`] and start a new sequence.
#[derive(Clone, Debug)]
pub struct Sequence {
    config: MemoryConfig,
    bias: MemoryBias,
    initial: InitialState,
    steps: Vec<Timestep>,
}

impl Sequence {
    pub fn new(config: MemoryConfig, bias: MemoryBias) -> Result<Self> {
        config.validate()?;
        bias.validate()?;
        if bias.heads() != config.heads {
            return Err(NtmError::HeadCount {
                expected: config.heads,
                actual: bias.heads(),
            });
        }
        if bias.rows() != config.rows {
            return Err(NtmError::LengthMismatch {
                what: "bias rows",
                expected: config.rows,
                actual: bias.rows(),
            });
        }
        if bias.width() != config.width {
            return Err(NtmError::LengthMismatch {
                what: "bias width",
                expected: config.width,
                actual: bias.width(),
            });
        }

        let initial = InitialState::seed(&bias);
        Ok(Self {
            config,
            bias,
            initial,
            steps: Vec::new(),
        })
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// The bias this sequence started from, with the gradients accumulated by
    /// [`Sequence::backward`].
    pub fn bias(&self) -> &MemoryBias {
        &self.bias
    }

    /// `∂loss/∂` initial bank.
    pub fn bias_memory_grad(&self) -> &Array2<f64> {
        &self.bias.memory.grad
    }

    /// `∂loss/∂` initial weight logits of head `h`.
    pub fn bias_logit_grad(&self, h: usize) -> Option<&Array1<f64>> {
        self.bias.weight_logits.get(h).map(|l| &l.grad)
    }

    /// Give the bias back, gradients included, ending the run.
    pub fn into_bias(self) -> MemoryBias {
        self.bias
    }

    /// Run one step from the latest state.  The returned circuit is where the
    /// caller seeds output gradients before [`Sequence::backward`].
    pub fn step(&mut self, heads: Vec<Head>) -> Result<&mut Circuit> {
        let circuit = Circuit::with_parallelism(&heads, self.latest_state(), self.config.parallel_heads)?;
        tracing::trace!(t = self.steps.len(), "sequence step");
        self.steps.push(Timestep { heads, circuit });
        let t = self.steps.len() - 1;
        Ok(&mut self.steps[t].circuit)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The state the next step will read: the last circuit's, or the initial
    /// state before any step has run.
    pub fn latest_state(&self) -> &MemoryState {
        self.steps
            .last()
            .map(|s| &s.circuit.state)
            .unwrap_or(&self.initial.state)
    }

    /// Mutable access to the latest state, for seeding gradients on the final
    /// bank and weightings.
    pub fn latest_state_mut(&mut self) -> &mut MemoryState {
        match self.steps.last_mut() {
            Some(step) => &mut step.circuit.state,
            None => &mut self.initial.state,
        }
    }

    pub fn initial(&self) -> &InitialState {
        &self.initial
    }

    pub fn initial_reads(&self) -> &[Read] {
        self.initial.reads()
    }

    pub fn initial_reads_mut(&mut self) -> &mut [Read] {
        self.initial.reads_mut()
    }

    /// Reads produced at step `t`.
    pub fn reads(&self, t: usize) -> Option<&[Read]> {
        self.steps.get(t).map(|s| s.circuit.reads.as_slice())
    }

    /// Reads of the last step, or the initial reads.
    pub fn last_reads(&self) -> &[Read] {
        self.steps
            .last()
            .map(|s| s.circuit.reads.as_slice())
            .unwrap_or_else(|| self.initial.reads())
    }

    pub fn timestep(&self, t: usize) -> Option<&Timestep> {
        self.steps.get(t)
    }

    pub fn timesteps(&self) -> &[Timestep] {
        &self.steps
    }

    pub fn circuit(&self, t: usize) -> Option<&Circuit> {
        self.steps.get(t).map(|s| &s.circuit)
    }

    pub fn circuit_mut(&mut self, t: usize) -> Option<&mut Circuit> {
        self.steps.get_mut(t).map(|s| &mut s.circuit)
    }

    /// Backpropagate through every step, newest first, then into the initial
    /// state and the bias.  Head gradients land in each [`Timestep::heads`].
    pub fn backward(&mut self) {
        for t in (0..self.steps.len()).rev() {
            let (before, rest) = self.steps.split_at_mut(t);
            let previous = match before.last_mut() {
                Some(p) => &mut p.circuit.state,
                None => &mut self.initial.state,
            };
            let Timestep { heads, circuit } = &mut rest[0];
            circuit.backward(heads, previous);
        }
        self.initial.backward(&mut self.bias);

        tracing::debug!(
            steps = self.steps.len(),
            bias_grad_norm = self.bias.memory.grad.mapv(|g| g * g).sum().sqrt(),
            "sequence backward"
        );
    }

    /// Per head, the final weighting of every step in order.
    pub fn head_weights(&self) -> Vec<Vec<Array1<f64>>> {
        (0..self.config.heads)
            .map(|h| {
                self.steps
                    .iter()
                    .map(|s| s.circuit.state.weights[h].val.clone())
                    .collect()
            })
            .collect()
    }

    pub fn zero_grad(&mut self) {
        self.bias.zero_grad();
        self.initial.zero_grad();
        for step in &mut self.steps {
            step.circuit.zero_grad();
            for head in &mut step.heads {
                head.zero_grad();
            }
        }
    }
}
