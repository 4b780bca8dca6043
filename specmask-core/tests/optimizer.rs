use ndarray::Array2;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use specmask_core::diagnostics::NullSink;
use specmask_core::model::{FrozenModel, Mlp};
use specmask_core::normalize::standardize;
use specmask_core::optimizer::{regularization_gradient, MaskOptimizer};
use specmask_core::projection::{compute_reference, project};
use specmask_core::sample::Sample;
use specmask_core::spectral::magnitude_forward;
use specmask_core::SearchSettings;

const BINS: usize = 3;
const FRAMES: usize = 4;
const CLASSES: usize = 8;

fn small_instance(seed: u64) -> (Sample, FrozenModel, SearchSettings) {
    let mut rng = SmallRng::seed_from_u64(seed);
    // slots bounded away from zero keep every pair magnitude
    // well-conditioned under small mask perturbations
    let spectral = Array2::from_shape_fn((2 * BINS, FRAMES), |_| {
        let v: f32 = rng.gen_range(0.5..2.0);
        if rng.gen_bool(0.5) {
            v
        } else {
            -v
        }
    });
    let (absinput, _) = magnitude_forward(&spectral);
    let feature = absinput.t().to_owned();
    let sample = Sample::new(spectral, feature, vec![2, 3]).unwrap();

    let mut mlp = Mlp::new(&[BINS, 6, CLASSES]).unwrap();
    mlp.init_weights([21u8; 32]);
    let model = FrozenModel::new(mlp);

    let settings = SearchSettings {
        iterations: 3,
        learning_rate: 0.5,
        lambda: 0.0,
        mask_init: 0.1,
        class_start: 2,
        class_end: 5,
        dump_every: 1,
        seed: [4u8; 32],
    };
    (sample, model, settings)
}

#[test]
fn zero_noise_leaves_mask_unchanged_without_regularization() {
    let (sample, model, settings) = small_instance(31);
    let range = settings.class_range();
    let reference = compute_reference(&sample, &model, range).unwrap();

    let mask_init = settings.mask_init;
    let mut optimizer = MaskOptimizer::new(settings, &sample);
    let epsilon = Array2::zeros(sample.spectral.raw_dim());
    let outcome = optimizer.step(&sample, &model, &reference, &epsilon).unwrap();

    // zero injected noise reproduces the reference bit for bit, so the
    // reconstruction gradient vanishes and the mask must not move
    assert_eq!(outcome.record.rec_loss, 0.0);
    assert!(optimizer.state().mask.iter().all(|v| *v == mask_init));
}

#[test]
fn single_step_matches_pipeline_finite_differences() {
    let (sample, model, settings) = small_instance(47);
    let range = settings.class_range();
    let reference = compute_reference(&sample, &model, range).unwrap();
    let learning_rate = settings.learning_rate;

    let mut rng = SmallRng::seed_from_u64(59);
    let epsilon = Array2::from_shape_fn(sample.spectral.raw_dim(), |_| rng.gen_range(-1.0f32..1.0));

    // the loss surface the closed-form mask gradient descends
    let rec_loss = |mask: &Array2<f32>| -> f32 {
        let rawinput = &sample.spectral + &(mask * &epsilon);
        let (absinput, _) = magnitude_forward(&rawinput);
        let (trueinput, _) = standardize(&absinput.t().to_owned());
        let (output, _) = model.forward(&trueinput);
        let (softmax, _) = project(&output, range);
        let diff = &reference - &softmax;
        (&diff * &diff).sum()
    };

    let mut optimizer = MaskOptimizer::new(settings, &sample);
    let mask_before = optimizer.state().mask.clone();
    optimizer.step(&sample, &model, &reference, &epsilon).unwrap();
    let applied = (&mask_before - &optimizer.state().mask) / learning_rate;

    let h = 1e-3f32;
    for j in 0..2 * BINS {
        for t in 0..FRAMES {
            let mut plus = mask_before.clone();
            plus[[j, t]] += h;
            let mut minus = mask_before.clone();
            minus[[j, t]] -= h;
            let fd = (rec_loss(&plus) - rec_loss(&minus)) / (2.0 * h);
            let a = applied[[j, t]];
            assert!(
                (a - fd).abs() <= 5e-3 + 5e-2 * a.abs(),
                "mask update mismatch at ({}, {}): applied {} vs fd {}",
                j,
                t,
                a,
                fd
            );
        }
    }
}

#[test]
fn regularization_gradient_is_two_m_over_norm() {
    let mask = Array2::from_elem((2, 2), 0.5f32);
    // ||m||^2 = 1, so the gradient is exactly 2m
    let grad = regularization_gradient(&mask);
    assert!(grad.iter().all(|v| *v == 1.0));

    let mut rng = SmallRng::seed_from_u64(71);
    let mask = Array2::from_shape_fn((4, 3), |_| rng.gen_range(0.1f32..1.0));
    let norm_sq: f32 = mask.iter().map(|v| v * v).sum();
    let grad = regularization_gradient(&mask);
    for (g, m) in grad.iter().zip(mask.iter()) {
        assert!((g - 2.0 * m / norm_sq).abs() <= 1e-6);
    }
}

#[test]
fn log_barrier_decreases_with_mask_norm() {
    let lambda = 0.3f32;
    let mask = Array2::from_elem((2, 3), 0.4f32);
    let reg_loss = |scale: f32| -> f32 {
        let scaled = &mask * scale;
        -lambda * scaled.mapv(|v| v * v).sum().ln()
    };
    assert!(reg_loss(2.0) < reg_loss(1.0));
    assert!(reg_loss(4.0) < reg_loss(2.0));
}

#[test]
fn full_run_leaves_frozen_model_untouched() {
    let (sample, mut model, mut settings) = small_instance(83);
    settings.lambda = 0.1;
    settings.learning_rate = 1e-3;
    let before = model.snapshot();

    let mut optimizer = MaskOptimizer::new(settings, &sample);
    let solution = optimizer
        .run(&sample, &mut model, &mut NullSink)
        .unwrap();
    assert_eq!(solution.iterations, 3);
    assert!(solution.total_loss.is_finite());

    let after = model.snapshot();
    for (a, b) in before.weights.iter().zip(after.weights.iter()) {
        assert!(a.iter().zip(b.iter()).all(|(x, y)| x.to_bits() == y.to_bits()));
    }
    for (a, b) in before.biases.iter().zip(after.biases.iter()) {
        assert!(a.iter().zip(b.iter()).all(|(x, y)| x.to_bits() == y.to_bits()));
    }
    assert!(model.verify_unchanged().is_ok());
}

#[test]
fn degenerate_two_bin_single_frame_sample() {
    // the 2-bin, 1-frame case: magnitude is exact, but a single-element
    // feature standardizes against a zero deviation and is pinned to zero
    let spectral = ndarray::arr2(&[[1.0f32], [0.0f32]]);
    let (mag, backproj) = magnitude_forward(&spectral);
    assert_eq!(mag[[0, 0]], 1.0);
    assert_eq!(backproj[[0, 0]], 1.0);
    assert_eq!(backproj[[1, 0]], 1.0);

    let (trueinput, stats) = standardize(&mag.t().to_owned());
    assert_eq!(stats.stdev, 0.0);
    assert_eq!(trueinput[[0, 0]], 0.0);
}

#[test]
fn non_finite_sample_aborts_the_run() {
    let (sample, mut model, settings) = small_instance(97);
    let mut spectral = sample.spectral.clone();
    spectral[[0, 0]] = f32::NAN;
    let bad = Sample {
        spectral,
        feature: sample.feature.clone(),
        target: sample.target.clone(),
    };

    let mut optimizer = MaskOptimizer::new(settings, &bad);
    let err = optimizer
        .run(&bad, &mut model, &mut NullSink)
        .unwrap_err();
    assert!(err.to_string().contains("non-finite"));
}

#[test]
fn settings_validation_fails_fast() {
    let (sample, model, settings) = small_instance(101);

    let mut bad = settings.clone();
    bad.iterations = 0;
    assert!(bad.validate(&sample, &model).is_err());

    let mut bad = settings.clone();
    bad.class_end = CLASSES;
    assert!(bad.validate(&sample, &model).is_err());

    let mut bad = settings.clone();
    bad.learning_rate = -1.0;
    assert!(bad.validate(&sample, &model).is_err());

    let other_model = {
        let mut mlp = Mlp::new(&[BINS + 1, 4, CLASSES]).unwrap();
        mlp.init_weights([5u8; 32]);
        FrozenModel::new(mlp)
    };
    assert!(settings.validate(&sample, &other_model).is_err());
}
