//! Finite-difference verification of the backward pass.
//!
//! Every scalar input is nudged by `h = sqrt(ε) · max(|x|, 1)` in both
//! directions and the loss slope compared against the analytic gradient.

use std::fmt;

use crate::circuit::sequence::{InitialState, MemoryBias, Sequence};
use crate::circuit::step::Circuit;
use crate::config::{MemoryConfig, MACHINE_EPSILON_SQRT};
use crate::core::head::Head;
use crate::core::state::MemoryState;
use crate::error::Result;
use crate::learning::loss::WeightedLoss;

/// Perturbation used around `x`.
pub fn step_size(x: f64) -> f64 {
    MACHINE_EPSILON_SQRT * x.abs().max(1.0)
}

/// `(f(x + h) - f(x - h)) / 2h`, with `2h` taken as the representable
/// distance between the two evaluation points.
pub fn central_difference<F: FnMut(f64) -> f64>(x: f64, mut f: F) -> f64 {
    let h = step_size(x);
    let (hi, lo) = (x + h, x - h);
    (f(hi) - f(lo)) / (hi - lo)
}

/// One compared scalar.
#[derive(Clone, Debug, PartialEq)]
pub struct GradCheck {
    pub name: String,
    pub analytic: f64,
    pub numeric: f64,
}

impl GradCheck {
    /// Absolute difference; NaN counts as an infinite error.
    pub fn error(&self) -> f64 {
        let e = (self.analytic - self.numeric).abs();
        if e.is_nan() {
            f64::INFINITY
        } else {
            e
        }
    }
}

impl fmt::Display for GradCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: analytic {:.9}, numeric {:.9}, error {:.3e}",
            self.name,
            self.analytic,
            self.numeric,
            self.error()
        )
    }
}

#[derive(Clone, Debug, Default)]
pub struct GradCheckReport {
    pub checks: Vec<GradCheck>,
}

impl GradCheckReport {
    fn push(&mut self, name: String, analytic: f64, numeric: f64) {
        tracing::trace!(%name, analytic, numeric, "gradient check");
        self.checks.push(GradCheck {
            name,
            analytic,
            numeric,
        });
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    pub fn max_error(&self) -> f64 {
        self.checks.iter().map(GradCheck::error).fold(0.0, f64::max)
    }

    pub fn worst(&self) -> Option<&GradCheck> {
        self.checks
            .iter()
            .max_by(|a, b| a.error().total_cmp(&b.error()))
    }

    pub fn failures(&self, tolerance: f64) -> Vec<&GradCheck> {
        self.checks.iter().filter(|c| c.error() > tolerance).collect()
    }

    pub fn passed(&self, tolerance: f64) -> bool {
        self.checks.iter().all(|c| c.error() <= tolerance)
    }
}

/// Compare the analytic gradients of one circuit against finite differences,
/// for every head parameter, every cell of the previous bank and every entry
/// of the previous weightings.
///
/// The inputs are left untouched; the check runs on copies.
pub fn check_circuit(heads: &[Head], previous: &MemoryState, loss: &WeightedLoss) -> Result<GradCheckReport> {
    let mut heads_grad = heads.to_vec();
    heads_grad.iter_mut().for_each(Head::zero_grad);
    let mut previous_grad = previous.clone();
    previous_grad.zero_grad();

    let mut circuit = Circuit::new(&heads_grad, &previous_grad)?;
    loss.seed_circuit(&mut circuit);
    circuit.backward(&mut heads_grad, &mut previous_grad);

    let eval = |heads: &[Head], previous: &MemoryState| {
        loss.evaluate_circuit(&Circuit::forward_unchecked(heads, previous, false))
    };

    let mut report = GradCheckReport::default();

    let mut nudged = heads.to_vec();
    for h in 0..nudged.len() {
        for i in 0..nudged[h].len() {
            let x = nudged[h].val[i];
            let numeric = central_difference(x, |v| {
                nudged[h].val[i] = v;
                eval(&nudged, previous)
            });
            nudged[h].val[i] = x;
            let name = format!("head[{}].{}", h, nudged[h].param_name(i));
            report.push(name, heads_grad[h].grad[i], numeric);
        }
    }

    let mut state = previous.clone();
    let (rows, width) = state.memory.val.dim();
    for i in 0..rows {
        for j in 0..width {
            let x = state.memory.val[[i, j]];
            let numeric = central_difference(x, |v| {
                state.memory.val[[i, j]] = v;
                eval(heads, &state)
            });
            state.memory.val[[i, j]] = x;
            report.push(format!("memory[{}][{}]", i, j), previous_grad.memory.grad[[i, j]], numeric);
        }
    }

    for h in 0..state.heads() {
        for i in 0..rows {
            let x = state.weights[h].val[i];
            let numeric = central_difference(x, |v| {
                state.weights[h].val[i] = v;
                eval(heads, &state)
            });
            state.weights[h].val[i] = x;
            report.push(format!("wtm1[{}][{}]", h, i), previous_grad.weights[h].grad[i], numeric);
        }
    }

    tracing::debug!(checks = report.len(), max_error = report.max_error(), "circuit gradient check");
    Ok(report)
}

/// Loss of a full unroll, mirroring [`WeightedLoss::evaluate_sequence`]
/// without the shape checks of [`Sequence`].
fn unroll_loss(bias: &MemoryBias, steps: &[Vec<Head>], loss: &WeightedLoss) -> f64 {
    let initial = InitialState::seed(bias);
    let mut total = loss.evaluate_reads(initial.reads());
    let mut state = initial.state;
    for heads in steps {
        let circuit = Circuit::forward_unchecked(heads, &state, false);
        total += loss.evaluate_reads(&circuit.reads);
        state = circuit.state;
    }
    total + loss.evaluate_state(&state)
}

/// Backpropagation through time checked end to end: every head parameter of
/// every step, and every bias value.
pub fn check_sequence(
    config: &MemoryConfig,
    bias: &MemoryBias,
    steps: &[Vec<Head>],
    loss: &WeightedLoss,
) -> Result<GradCheckReport> {
    let mut sequence = Sequence::new(config.clone(), bias.clone())?;
    sequence.zero_grad();
    for heads in steps {
        let mut heads = heads.clone();
        heads.iter_mut().for_each(Head::zero_grad);
        sequence.step(heads)?;
    }
    loss.seed_sequence(&mut sequence);
    sequence.backward();

    let mut report = GradCheckReport::default();

    let mut nudged = steps.to_vec();
    for t in 0..nudged.len() {
        for h in 0..nudged[t].len() {
            for i in 0..nudged[t][h].len() {
                let x = nudged[t][h].val[i];
                let numeric = central_difference(x, |v| {
                    nudged[t][h].val[i] = v;
                    unroll_loss(bias, &nudged, loss)
                });
                nudged[t][h].val[i] = x;
                let analytic = sequence
                    .timestep(t)
                    .map(|s| s.heads[h].grad[i])
                    .unwrap_or(f64::NAN);
                let name = format!("step[{}].head[{}].{}", t, h, nudged[t][h].param_name(i));
                report.push(name, analytic, numeric);
            }
        }
    }

    let mut bias_nudged = bias.clone();
    let (rows, width) = bias_nudged.memory.val.dim();
    for i in 0..rows {
        for j in 0..width {
            let x = bias_nudged.memory.val[[i, j]];
            let numeric = central_difference(x, |v| {
                bias_nudged.memory.val[[i, j]] = v;
                unroll_loss(&bias_nudged, steps, loss)
            });
            bias_nudged.memory.val[[i, j]] = x;
            let analytic = sequence.bias_memory_grad()[[i, j]];
            report.push(format!("bias.memory[{}][{}]", i, j), analytic, numeric);
        }
    }

    for h in 0..bias_nudged.heads() {
        for i in 0..rows {
            let x = bias_nudged.weight_logits[h].val[i];
            let numeric = central_difference(x, |v| {
                bias_nudged.weight_logits[h].val[i] = v;
                unroll_loss(&bias_nudged, steps, loss)
            });
            bias_nudged.weight_logits[h].val[i] = x;
            let analytic = sequence
                .bias_logit_grad(h)
                .map(|g| g[i])
                .unwrap_or(f64::NAN);
            report.push(format!("bias.weights[{}][{}]", h, i), analytic, numeric);
        }
    }

    tracing::debug!(
        steps = steps.len(),
        checks = report.len(),
        max_error = report.max_error(),
        "sequence gradient check"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GRADIENT_TOLERANCE;

    #[test]
    fn test_step_size_scales_with_magnitude() {
        assert_eq!(step_size(0.5), 1e-8);
        assert!((step_size(-300.0) - 3e-6).abs() < 1e-18);
    }

    #[test]
    fn test_central_difference_of_cubic() {
        let d = central_difference(2.0, |x| x * x * x);
        assert!((d - 12.0).abs() < 1e-6);
    }

    #[test]
    fn test_report_flags_nan_and_large_errors() {
        let mut report = GradCheckReport::default();
        report.push("ok".into(), 1.0, 1.0 + 1e-7);
        report.push("nan".into(), f64::NAN, 0.5);
        report.push("off".into(), 2.0, 1.0);
        assert_eq!(report.len(), 3);
        assert!(!report.passed(GRADIENT_TOLERANCE));
        let names: Vec<_> = report.failures(GRADIENT_TOLERANCE).iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["nan", "off"]);
        assert_eq!(report.max_error(), f64::INFINITY);
        assert_eq!(report.worst().map(|c| c.name.as_str()), Some("nan"));
    }
}
