use ndarray::Array2;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use specmask_core::spectral::{magnitude_backward, magnitude_forward};

#[test]
fn magnitude_matches_pair_norm() {
    let mut rng = SmallRng::seed_from_u64(7);
    for _ in 0..10 {
        let k = rng.gen_range(1..6);
        let t = rng.gen_range(1..6);
        let raw = Array2::from_shape_fn((2 * k, t), |_| rng.gen_range(-5.0f32..5.0));
        let (mag, backproj) = magnitude_forward(&raw);
        assert_eq!(mag.dim(), (k, t));
        for kk in 0..k {
            for tt in 0..t {
                let re = raw[[2 * kk, tt]];
                let im = raw[[2 * kk + 1, tt]];
                let expected = (re * re + im * im).sqrt();
                assert!(mag[[kk, tt]] >= 0.0);
                assert!((mag[[kk, tt]] - expected).abs() <= 1e-5);
                assert_eq!(backproj[[2 * kk, tt]], mag[[kk, tt]]);
                assert_eq!(backproj[[2 * kk + 1, tt]], mag[[kk, tt]]);
            }
        }
    }
}

fn injection_loss(
    mask: &Array2<f32>,
    spectral: &Array2<f32>,
    epsilon: &Array2<f32>,
    xgrad: &Array2<f32>,
) -> f32 {
    let raw = spectral + &(mask * epsilon);
    let (mag, _) = magnitude_forward(&raw);
    (xgrad * &mag).sum()
}

#[test]
fn backward_matches_finite_differences() {
    let mut rng = SmallRng::seed_from_u64(13);
    let (k, t) = (2, 3);
    // magnitudes kept well away from the zero singularity
    let spectral = Array2::from_shape_fn((2 * k, t), |_| {
        let v: f32 = rng.gen_range(0.5..3.0);
        if rng.gen_bool(0.5) {
            v
        } else {
            -v
        }
    });
    let epsilon = Array2::from_shape_fn((2 * k, t), |_| rng.gen_range(-0.5f32..0.5));
    let mask = Array2::from_shape_fn((2 * k, t), |_| rng.gen_range(0.05f32..0.2));
    let xgrad = Array2::from_shape_fn((k, t), |_| rng.gen_range(-1.0f32..1.0));

    let raw = &spectral + &(&mask * &epsilon);
    let (_, backproj) = magnitude_forward(&raw);
    let analytic = magnitude_backward(&xgrad, &epsilon, &mask, &spectral, &backproj);

    let h = 1e-3f32;
    for j in 0..2 * k {
        for tt in 0..t {
            let mut plus = mask.clone();
            plus[[j, tt]] += h;
            let mut minus = mask.clone();
            minus[[j, tt]] -= h;
            let fd = (injection_loss(&plus, &spectral, &epsilon, &xgrad)
                - injection_loss(&minus, &spectral, &epsilon, &xgrad))
                / (2.0 * h);
            let a = analytic[[j, tt]];
            assert!(
                (a - fd).abs() <= 1e-2 * a.abs().max(1.0),
                "mask grad mismatch at ({}, {}): analytic {} vs fd {}",
                j,
                tt,
                a,
                fd
            );
        }
    }
}

#[test]
fn zero_magnitude_denominator_is_clamped() {
    // a pair that is exactly zero after injection has a zero numerator
    // too; the clamped denominator turns 0/0 into 0 instead of NaN
    let spectral = Array2::zeros((2, 2));
    let mask = Array2::zeros((2, 2));
    let epsilon = Array2::from_elem((2, 2), 0.7f32);
    let xgrad = Array2::from_elem((1, 2), 1.0f32);

    let raw = &spectral + &(&mask * &epsilon);
    let (_, backproj) = magnitude_forward(&raw);
    let mgrad = magnitude_backward(&xgrad, &epsilon, &mask, &spectral, &backproj);
    assert!(mgrad.iter().all(|v| v.is_finite()));
    assert!(mgrad.iter().all(|v| *v == 0.0));
}
