use ndarray::Array2;

/// Floor for the magnitude denominator in the backward pass. A pair with
/// exactly zero magnitude has no defined gradient direction; its numerator
/// is also zero, so the clamped quotient comes out as zero instead of NaN.
pub const MAG_FLOOR: f32 = 1e-12;

/// Collapses interleaved re/im pairs into magnitudes. Returns the
/// `K x T` magnitude tensor together with the `2K x T` back-projection
/// where both slots of a pair hold that pair's magnitude. The
/// back-projection is the denominator of the backward pass, not a feature.
pub fn magnitude_forward(rawinput: &Array2<f32>) -> (Array2<f32>, Array2<f32>) {
    let (two_k, num_frames) = rawinput.dim();
    debug_assert_eq!(two_k % 2, 0);
    let mut absinput = Array2::zeros((two_k / 2, num_frames));
    let mut backproj = Array2::zeros((two_k, num_frames));
    for j in (0..two_k).step_by(2) {
        for t in 0..num_frames {
            let re = rawinput[[j, t]];
            let im = rawinput[[j + 1, t]];
            let mag = (re * re + im * im).sqrt();
            absinput[[j / 2, t]] = mag;
            backproj[[j, t]] = mag;
            backproj[[j + 1, t]] = mag;
        }
    }
    (absinput, backproj)
}

/// Chains the per-pair upstream gradient `xgrad` (`K x T`, from the
/// normalizer backward) through the magnitude transform and the noise
/// injection `spectral + m * epsilon`, producing the gradient with respect
/// to the mask over the full `2K x T` layout. Per slot the factor is
/// `(epsilon^2 * m + epsilon * spectral) / magnitude`, accumulated
/// independently into the real and imaginary slots.
pub fn magnitude_backward(
    xgrad: &Array2<f32>,
    epsilon: &Array2<f32>,
    mask: &Array2<f32>,
    spectral: &Array2<f32>,
    backproj: &Array2<f32>,
) -> Array2<f32> {
    let (two_k, num_frames) = epsilon.dim();
    let mut mgrad = Array2::zeros((two_k, num_frames));
    for j in 0..two_k {
        for t in 0..num_frames {
            let eps = epsilon[[j, t]];
            let mid = eps * eps * mask[[j, t]] + eps * spectral[[j, t]];
            let denom = backproj[[j, t]].max(MAG_FLOOR);
            mgrad[[j, t]] = xgrad[[j / 2, t]] * mid / denom;
        }
    }
    mgrad
}
