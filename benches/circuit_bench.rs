//! Criterion benchmarks for the memory circuit.
//!
//! Measures one timestep forward, forward + backward, and a short unrolled
//! sequence across a sweep of memory sizes.
//!
//! Run: cargo bench --bench circuit_bench
//! Reports saved to: target/criterion/

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::SeedableRng;

use ntm_memory::learning::loss::WeightedLoss;
use ntm_memory::{Circuit, Head, MemoryBias, MemoryConfig, MemoryState, Sequence};

fn setup(config: &MemoryConfig, seed: u64) -> (Vec<Head>, MemoryState) {
    let mut rng = StdRng::seed_from_u64(seed);
    let heads = (0..config.heads)
        .map(|_| Head::random(config.width, &mut rng))
        .collect();
    (heads, MemoryState::random(config, &mut rng))
}

fn bench_forward(c: &mut Criterion) {
    let mut group = c.benchmark_group("forward");
    for rows in [32, 128, 512] {
        for parallel in [false, true] {
            let config = MemoryConfig::new(rows, 20, 4);
            let (heads, previous) = setup(&config, 42);
            group.bench_with_input(
                BenchmarkId::new(if parallel { "parallel" } else { "sequential" }, format!("N={rows}")),
                &rows,
                |b, _| b.iter(|| Circuit::with_parallelism(&heads, &previous, parallel)),
            );
        }
    }
    group.finish();
}

fn bench_forward_backward(c: &mut Criterion) {
    let mut group = c.benchmark_group("forward_backward");
    let loss = WeightedLoss::default();
    for rows in [32, 128, 512] {
        let config = MemoryConfig::new(rows, 20, 4);
        let (heads, previous) = setup(&config, 42);
        group.bench_with_input(BenchmarkId::new("step", format!("N={rows}")), &rows, |b, _| {
            b.iter(|| {
                let mut heads = heads.clone();
                let mut previous = previous.clone();
                if let Ok(mut circuit) = Circuit::new(&heads, &previous) {
                    loss.seed_circuit(&mut circuit);
                    circuit.backward(&mut heads, &mut previous);
                }
                previous
            })
        });
    }
    group.finish();
}

fn bench_sequence(c: &mut Criterion) {
    let config = MemoryConfig::new(128, 20, 1);
    let mut rng = StdRng::seed_from_u64(7);
    let bias = MemoryBias::random(&config, &mut rng);
    let steps: Vec<Vec<Head>> = (0..16)
        .map(|_| vec![Head::random(config.width, &mut rng)])
        .collect();
    let loss = WeightedLoss::default();

    c.bench_function("sequence_16_steps", |b| {
        b.iter(|| {
            let Ok(mut sequence) = Sequence::new(config.clone(), bias.clone()) else {
                return 0.0;
            };
            for heads in &steps {
                if sequence.step(heads.clone()).is_err() {
                    return 0.0;
                }
            }
            loss.seed_sequence(&mut sequence);
            sequence.backward();
            sequence.bias_memory_grad().sum()
        })
    });
}

criterion_group!(benches, bench_forward, bench_forward_backward, bench_sequence);
criterion_main!(benches);
