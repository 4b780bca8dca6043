use crate::{
    model::{FrozenModel, Mlp},
    sample::Sample,
    spectral,
};
use anyhow::Result;
use ndarray::Array2;
use rand::{
    rngs::{SmallRng, StdRng},
    Rng, SeedableRng,
};
use rand_distr::{Distribution, Normal};

/// Amplitude of the synthetic spectrum, in the same ballpark as the raw
/// FFT magnitudes of a real 16 kHz utterance.
const SPECTRAL_SCALE: f32 = 4000.0;

/// Builds a synthetic observation from a seed: a Gaussian interleaved
/// spectral tensor plus the feature tensor derived from it the same way
/// the upstream featurization does (magnitude, transposed to `T x K`).
pub fn generate_sample(
    seed: &[u8; 32],
    num_bins: usize,
    num_frames: usize,
    num_classes: usize,
) -> Result<Sample> {
    let mut rng = SmallRng::from_seed(StdRng::from_seed(*seed).gen());
    let noise = Normal::new(0.0f32, SPECTRAL_SCALE).unwrap();
    let spectral = Array2::from_shape_fn((2 * num_bins, num_frames), |_| noise.sample(&mut rng));
    let (absinput, _) = spectral::magnitude_forward(&spectral);
    let feature = absinput.t().to_owned();
    let target_len = (num_frames / 8).max(1);
    let target = (0..target_len)
        .map(|_| rng.gen_range(0..num_classes))
        .collect();
    Sample::new(spectral, feature, target)
}

/// Builds a seeded frozen model: `num_bins` input features, a stack of
/// equally sized tanh hidden layers and a `num_classes` output layer.
pub fn generate_model(
    seed: &[u8; 32],
    num_bins: usize,
    hidden_dims: usize,
    num_hidden_layers: usize,
    num_classes: usize,
) -> Result<FrozenModel> {
    let mut layer_dims = vec![hidden_dims; num_hidden_layers];
    layer_dims.insert(0, num_bins);
    layer_dims.push(num_classes);

    let mut mlp = Mlp::new(&layer_dims)?;
    mlp.init_weights(StdRng::from_seed(*seed).gen());
    Ok(FrozenModel::new(mlp))
}
