//! NTM-GRADCHECK
//!
//! Builds a random memory circuit, checks every analytic gradient against
//! finite differences, then does the same through a short unrolled sequence.
//!
//! This is the CLI binary entry point.

use anyhow::{bail, Context};
use clap::Parser;
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Normal;
use tracing_subscriber::EnvFilter;

use ntm_memory::config::{head_param_len, MemoryConfig};
use ntm_memory::learning::gradcheck::{check_circuit, check_sequence, GradCheckReport};
use ntm_memory::learning::loss::WeightedLoss;
use ntm_memory::{Head, HeadParam, MemoryBias, MemoryState, Sequence};

/// Gradient checker for the NTM memory circuit.
#[derive(Parser, Debug)]
#[command(
    name = "ntm-gradcheck",
    about = "Finite-difference check of the NTM memory circuit gradients",
    version
)]
struct Cli {
    /// Memory rows (N).
    #[arg(short = 'n', long, default_value_t = 3)]
    rows: usize,

    /// Memory row width (M).
    #[arg(short = 'm', long, default_value_t = 2)]
    width: usize,

    /// Number of heads.
    #[arg(long, default_value_t = 2)]
    heads: usize,

    /// Timesteps in the unrolled sequence check.
    #[arg(long, default_value_t = 4)]
    steps: usize,

    /// Standard deviation of the random head parameters.
    #[arg(long, default_value_t = 1.0)]
    scale: f64,

    /// RNG seed.
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Address heads on the rayon pool.
    #[arg(long, default_value_t = false)]
    parallel: bool,

    /// Maximum accepted |analytic - numeric|.
    #[arg(long, default_value_t = ntm_memory::config::GRADIENT_TOLERANCE)]
    tolerance: f64,

    /// Default log filter when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn random_heads(config: &MemoryConfig, normal: &Normal<f64>, rng: &mut StdRng) -> anyhow::Result<Vec<Head>> {
    (0..config.heads)
        .map(|_| {
            let val = Array1::from_shape_fn(head_param_len(config.width), |_| rng.sample(normal));
            Head::from_vals(config.width, val).context("building random head")
        })
        .collect()
}

fn summarise(label: &str, report: &GradCheckReport, tolerance: f64) -> bool {
    tracing::info!(
        "{}: {} gradients checked, max error {:.3e}",
        label,
        report.len(),
        report.max_error()
    );
    if let Some(worst) = report.worst() {
        tracing::debug!("{} worst: {}", label, worst);
    }
    let failures = report.failures(tolerance);
    for check in &failures {
        tracing::warn!("{} mismatch: {}", label, check);
    }
    failures.is_empty()
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_target(false)
        .init();

    tracing::info!("NTM-GRADCHECK v{}", env!("CARGO_PKG_VERSION"));

    let config = MemoryConfig {
        rows: cli.rows,
        width: cli.width,
        heads: cli.heads,
        parallel_heads: cli.parallel,
    };
    config.validate()?;
    tracing::info!(
        "Config: N={}, M={}, heads={}, parallel={}",
        config.rows,
        config.width,
        config.heads,
        config.parallel_heads
    );

    let mut rng = StdRng::seed_from_u64(cli.seed);
    let normal = Normal::new(0.0, cli.scale).context("invalid --scale")?;
    let loss = WeightedLoss::default();

    // Single circuit, with the first head in the beta > 0, gamma > 1 regime.
    let mut heads = random_heads(&config, &normal, &mut rng)?;
    heads[0].set(HeadParam::Beta, 0.137350);
    heads[0].set(HeadParam::Gamma, 1.9876);
    let previous = MemoryState::random(&config, &mut rng);
    let circuit_ok = summarise("circuit", &check_circuit(&heads, &previous, &loss)?, cli.tolerance);

    // Unrolled sequence.
    let bias = MemoryBias::random(&config, &mut rng);
    let steps = (0..cli.steps)
        .map(|_| random_heads(&config, &normal, &mut rng))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let sequence_ok = summarise(
        "sequence",
        &check_sequence(&config, &bias, &steps, &loss)?,
        cli.tolerance,
    );

    let mut sequence = Sequence::new(config.clone(), bias)?;
    for heads in steps {
        sequence.step(heads)?;
    }
    for (h, history) in sequence.head_weights().iter().enumerate() {
        for (t, w) in history.iter().enumerate() {
            tracing::info!("head {} t={} weights {:.4}", h, t, w);
        }
    }

    if !(circuit_ok && sequence_ok) {
        bail!("analytic gradients disagree with finite differences (tolerance {:e})", cli.tolerance);
    }
    tracing::info!("Done.");
    Ok(())
}
