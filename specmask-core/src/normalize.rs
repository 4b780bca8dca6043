use ndarray::Array2;

/// Scalar statistics shared by the forward and backward passes. The mean
/// and standard deviation are taken over the entire tensor; the axes are
/// never split into per-channel statistics.
#[derive(Debug, Clone, Copy)]
pub struct NormStats {
    pub mean: f32,
    pub stdev: f32,
}

/// Standardizes the whole tensor with one global mean and one global
/// standard deviation (population divisor; the closed-form backward below
/// is exact for it). A constant tensor has zero deviation and standardizes
/// to zero.
pub fn standardize(input: &Array2<f32>) -> (Array2<f32>, NormStats) {
    let mean = input.mean().unwrap_or(0.0);
    let stdev = input.std(0.0);
    let stats = NormStats { mean, stdev };
    if stdev == 0.0 {
        return (Array2::zeros(input.raw_dim()), stats);
    }
    ((input - mean) / stdev, stats)
}

/// Exact gradient of [`standardize`] with respect to its input, given the
/// upstream gradient `dy` returned by the model backward pass.
pub fn standardize_backward(
    dy: &Array2<f32>,
    input: &Array2<f32>,
    stats: &NormStats,
) -> Array2<f32> {
    let n = input.len() as f32;
    let sigma = stats.stdev;
    let sigma2 = sigma * sigma;
    let centered = input - stats.mean;
    let dsigma2 = (dy * &centered).sum() * -0.5 * sigma2.powf(-1.5);
    let dmu = dy.sum() * (-1.0 / sigma) + dsigma2 * (-2.0 * centered.sum()) / n;
    dy / sigma + centered * (2.0 * dsigma2 / n) + dmu / n
}
