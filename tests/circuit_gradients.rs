//! End-to-end gradient checks of a single memory circuit.

use ndarray::{array, Array1};
use rand::rngs::StdRng;
use rand::SeedableRng;

use ntm_memory::config::GRADIENT_TOLERANCE;
use ntm_memory::learning::gradcheck::{check_circuit, GradCheckReport};
use ntm_memory::learning::loss::WeightedLoss;
use ntm_memory::{Circuit, Head, HeadParam, MemoryBank, MemoryConfig, MemoryState, UnitVec};

fn random_setup(config: &MemoryConfig, seed: u64) -> (Vec<Head>, MemoryState) {
    let mut rng = StdRng::seed_from_u64(seed);
    let heads = (0..config.heads)
        .map(|_| Head::random(config.width, &mut rng))
        .collect();
    let previous = MemoryState::random(config, &mut rng);
    (heads, previous)
}

fn assert_passes(report: &GradCheckReport) {
    let failures = report.failures(GRADIENT_TOLERANCE);
    assert!(
        failures.is_empty(),
        "{} of {} gradients off:\n{}",
        failures.len(),
        report.len(),
        failures.iter().map(|c| c.to_string()).collect::<Vec<_>>().join("\n")
    );
}

#[test]
fn test_two_heads_sharp_and_strong() {
    let config = MemoryConfig::new(3, 2, 2);
    for seed in 0..5 {
        let (mut heads, previous) = random_setup(&config, seed);
        heads[0].set(HeadParam::Beta, 0.137350);
        heads[0].set(HeadParam::Gamma, 1.9876);

        let report = check_circuit(&heads, &previous, &WeightedLoss::default()).unwrap();
        // 2 heads × 10 params + 6 memory cells + 2 × 3 previous weights.
        assert_eq!(report.len(), 32);
        assert_passes(&report);
    }
}

#[test]
fn test_wider_memory_more_heads() {
    let config = MemoryConfig::new(6, 4, 3);
    let (heads, previous) = random_setup(&config, 17);
    let report = check_circuit(&heads, &previous, &WeightedLoss::default()).unwrap();
    assert_passes(&report);
}

#[test]
fn test_custom_loss_coefficients() {
    let config = MemoryConfig::new(4, 3, 1);
    let (heads, previous) = random_setup(&config, 23);
    let loss = WeightedLoss {
        coefficient: -0.5,
        distinguished: 2.0,
    };
    assert_passes(&check_circuit(&heads, &previous, &loss).unwrap());
}

#[test]
fn test_single_row_collapses() {
    let config = MemoryConfig::new(1, 2, 2);
    let (heads, _) = random_setup(&config, 5);
    let previous = MemoryState::new(
        MemoryBank::from_vals(array![[0.7, -1.3]]),
        vec![UnitVec::from_vals(array![1.0]), UnitVec::from_vals(array![1.0])],
    )
    .unwrap();

    let circuit = Circuit::new(&heads, &previous).unwrap();
    for w in &circuit.state.weights {
        assert_eq!(w.val, array![1.0]);
    }
    for read in &circuit.reads {
        assert_eq!(read.top.val, previous.memory.val.row(0));
    }

    assert_passes(&check_circuit(&heads, &previous, &WeightedLoss::default()).unwrap());
}

#[test]
fn test_zero_erase_and_add_keep_memory() {
    let config = MemoryConfig::new(4, 3, 2);
    let (mut heads, previous) = random_setup(&config, 31);
    for head in &mut heads {
        let erase = head.erase_range();
        let add = head.add_range();
        for i in erase.chain(add) {
            head.val[i] = -1000.0;
        }
    }

    let circuit = Circuit::new(&heads, &previous).unwrap();
    assert_eq!(circuit.memory_vals(), &previous.memory.val);
}

#[test]
fn test_parallel_heads_match_sequential() {
    let config = MemoryConfig::new(8, 4, 4);
    let (mut heads, mut previous) = random_setup(&config, 99);
    let loss = WeightedLoss::default();

    let mut sequential = Circuit::new(&heads, &previous).unwrap();
    let mut parallel = Circuit::with_parallelism(&heads, &previous, true).unwrap();
    assert_eq!(sequential.weight_vals(), parallel.weight_vals());
    assert_eq!(sequential.read_vals(), parallel.read_vals());
    assert_eq!(sequential.memory_vals(), parallel.memory_vals());

    loss.seed_circuit(&mut sequential);
    sequential.backward(&mut heads, &mut previous);
    let head_grads: Vec<Array1<f64>> = heads.iter().map(|h| h.grad.clone()).collect();
    let memory_grad = previous.memory.grad.clone();
    let weight_grads: Vec<Array1<f64>> = previous.weights.iter().map(|w| w.grad.clone()).collect();

    heads.iter_mut().for_each(Head::zero_grad);
    previous.zero_grad();
    loss.seed_circuit(&mut parallel);
    parallel.backward(&mut heads, &mut previous);

    for (h, g) in heads.iter().zip(&head_grads) {
        assert_eq!(&h.grad, g);
    }
    assert_eq!(previous.memory.grad, memory_grad);
    for (w, g) in previous.weights.iter().zip(&weight_grads) {
        assert_eq!(&w.grad, g);
    }
}

#[test]
fn test_extreme_sharpening_on_default_bank() {
    let config = MemoryConfig::default();
    let previous = MemoryState {
        memory: MemoryBank::from_vals(ndarray::Array2::from_elem((config.rows, config.width), 0.5)),
        weights: vec![UnitVec::uniform(config.rows)],
    };
    // Identical rows and a uniform previous weighting leave the shifted
    // weighting flat, where every x^γ underflows for γ this large.
    let mut head = Head::new(config.width);
    for i in head.key_range() {
        head.val[i] = 1.0;
    }
    head.set(HeadParam::Gamma, 200.0);
    let mut heads = vec![head];

    let mut circuit = Circuit::new(&heads, &previous).unwrap();
    let w = &circuit.state.weights[0].val;
    assert!((w.sum() - 1.0).abs() < 1e-12);
    assert!(w.iter().all(|&v| (v - 1.0 / 128.0).abs() < 1e-12));

    let mut previous = previous;
    WeightedLoss::default().seed_circuit(&mut circuit);
    circuit.backward(&mut heads, &mut previous);
    assert!(heads[0].grad.iter().all(|g| g.is_finite()));
    assert!(previous.memory.grad.iter().all(|g| g.is_finite()));
}
