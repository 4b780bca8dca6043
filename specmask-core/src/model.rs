use anyhow::{anyhow, Result};
use ndarray::{Array1, Array2, Axis};
use rand::{rngs::StdRng, Rng, SeedableRng};

pub struct Linear {
    pub in_features: usize,
    pub out_features: usize,
    pub weight: Array2<f32>,
    pub bias: Array1<f32>,
}

impl Linear {
    pub fn new(in_features: usize, out_features: usize) -> Self {
        Self {
            in_features,
            out_features,
            weight: Array2::zeros((out_features, in_features)),
            bias: Array1::zeros(out_features),
        }
    }

    pub fn init_weights(&mut self, seed: [u8; 32]) {
        let mut rng = StdRng::from_seed(seed);
        let bound = 1.0 / (self.in_features as f32).sqrt();
        self.weight.mapv_inplace(|_| rng.gen_range(-bound..bound));
        self.bias.mapv_inplace(|_| rng.gen_range(-bound..bound));
    }

    fn forward(&self, input: &Array2<f32>) -> Array2<f32> {
        input.dot(&self.weight.t()) + &self.bias
    }
}

/// Per-layer inputs and activated outputs captured during the forward
/// pass, consumed by the backward pass.
pub struct ForwardCache {
    pub inputs: Vec<Array2<f32>>,
    pub activated: Vec<Array2<f32>>,
}

/// Gradients for one layer's parameters. Computed for diagnostic
/// verification; nothing in this crate ever applies them.
pub struct LayerGrads {
    pub weight: Array2<f32>,
    pub bias: Array1<f32>,
}

/// Time-distributed multilayer perceptron with tanh hidden activations.
/// Consumes a `T x K` feature tensor and emits a `C x T` output, one class
/// vector per frame.
pub struct Mlp {
    pub layers: Vec<Linear>,
    training: bool,
}

impl Mlp {
    pub fn new(layer_dims: &[usize]) -> Result<Self> {
        if layer_dims.len() < 2 {
            return Err(anyhow!(
                "Invalid layer dims. Expected at least input and output, got {:?}",
                layer_dims
            ));
        }
        let layers = layer_dims
            .windows(2)
            .map(|w| Linear::new(w[0], w[1]))
            .collect();
        Ok(Self {
            layers,
            training: false,
        })
    }

    pub fn init_weights(&mut self, seed: [u8; 32]) {
        let mut rng = StdRng::from_seed(seed);
        for layer in &mut self.layers {
            layer.init_weights(rng.gen());
        }
    }

    /// No layer in this architecture is stochastic, so the flag changes
    /// nothing; it is kept so callers can mirror the usual eval/train
    /// toggling around reference computation.
    pub fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    pub fn input_features(&self) -> usize {
        self.layers[0].in_features
    }

    pub fn num_classes(&self) -> usize {
        self.layers[self.layers.len() - 1].out_features
    }

    pub fn forward(&self, input: &Array2<f32>) -> (Array2<f32>, ForwardCache) {
        let last = self.layers.len() - 1;
        let mut inputs = Vec::with_capacity(self.layers.len());
        let mut activated = Vec::with_capacity(last);
        let mut x = input.clone();
        for (l, layer) in self.layers.iter().enumerate() {
            inputs.push(x.clone());
            let z = layer.forward(&x);
            x = if l < last {
                let a = z.mapv(f32::tanh);
                activated.push(a.clone());
                a
            } else {
                z
            };
        }
        (x.t().to_owned(), ForwardCache { inputs, activated })
    }

    /// Back-propagates the `C x T` output gradient down to the `T x K`
    /// input gradient, collecting per-layer parameter gradients on the way.
    pub fn backward(
        &self,
        dout: &Array2<f32>,
        cache: &ForwardCache,
    ) -> (Array2<f32>, Vec<LayerGrads>) {
        let last = self.layers.len() - 1;
        let mut layer_grads = Vec::with_capacity(self.layers.len());
        let mut dx = dout.t().to_owned();
        for l in (0..self.layers.len()).rev() {
            if l < last {
                // tanh'(z) expressed through the cached activation
                dx = dx * cache.activated[l].mapv(|a| 1.0 - a * a);
            }
            layer_grads.push(LayerGrads {
                weight: dx.t().dot(&cache.inputs[l]),
                bias: dx.sum_axis(Axis(0)),
            });
            dx = dx.dot(&self.layers[l].weight);
        }
        layer_grads.reverse();
        (dx, layer_grads)
    }

    pub fn snapshot(&self) -> ModelSnapshot {
        let mut layer_dims = vec![self.input_features()];
        layer_dims.extend(self.layers.iter().map(|l| l.out_features));
        ModelSnapshot {
            layer_dims,
            weights: self.layers.iter().map(|l| l.weight.clone()).collect(),
            biases: self.layers.iter().map(|l| l.bias.clone()).collect(),
        }
    }

    pub fn from_snapshot(snapshot: &ModelSnapshot) -> Result<Self> {
        let mut mlp = Self::new(&snapshot.layer_dims)?;
        if snapshot.weights.len() != mlp.layers.len() || snapshot.biases.len() != mlp.layers.len() {
            return Err(anyhow!(
                "Invalid snapshot. Expected {} layers, got {} weight and {} bias tensors",
                mlp.layers.len(),
                snapshot.weights.len(),
                snapshot.biases.len()
            ));
        }
        for (l, layer) in mlp.layers.iter_mut().enumerate() {
            if snapshot.weights[l].dim() != (layer.out_features, layer.in_features)
                || snapshot.biases[l].len() != layer.out_features
            {
                return Err(anyhow!("Invalid snapshot. Layer {} shape mismatch", l));
            }
            layer.weight = snapshot.weights[l].clone();
            layer.bias = snapshot.biases[l].clone();
        }
        Ok(mlp)
    }
}

impl_blob_serde! {
    ModelSnapshot {
        layer_dims: Vec<usize>,
        weights: Vec<Array2<f32>>,
        biases: Vec<Array1<f32>>,
    }
}

/// Read-only-plus-forward/backward capability wrapper around the
/// pretrained network. No mutable parameter access escapes it, so the
/// loop cannot update the model even by accident; drift is still verified
/// against the pristine snapshot taken at construction.
pub struct FrozenModel {
    mlp: Mlp,
    pristine: ModelSnapshot,
}

impl FrozenModel {
    pub fn new(mlp: Mlp) -> Self {
        let pristine = mlp.snapshot();
        Self { mlp, pristine }
    }

    pub fn from_snapshot(snapshot: ModelSnapshot) -> Result<Self> {
        let mlp = Mlp::from_snapshot(&snapshot)?;
        Ok(Self {
            mlp,
            pristine: snapshot,
        })
    }

    pub fn set_training(&mut self, training: bool) {
        self.mlp.set_training(training);
    }

    pub fn input_features(&self) -> usize {
        self.mlp.input_features()
    }

    pub fn num_classes(&self) -> usize {
        self.mlp.num_classes()
    }

    pub fn snapshot(&self) -> ModelSnapshot {
        self.mlp.snapshot()
    }

    pub fn forward(&self, input: &Array2<f32>) -> (Array2<f32>, ForwardCache) {
        self.mlp.forward(input)
    }

    pub fn backward(
        &self,
        dout: &Array2<f32>,
        cache: &ForwardCache,
    ) -> (Array2<f32>, Vec<LayerGrads>) {
        self.mlp.backward(dout, cache)
    }

    /// Mean squared difference between the live parameters and the
    /// pretrained snapshot. Zero for the whole run is the expected value.
    pub fn param_drift(&self) -> f32 {
        let mut sum = 0.0f32;
        let mut count = 0usize;
        for (l, layer) in self.mlp.layers.iter().enumerate() {
            for (a, b) in layer.weight.iter().zip(self.pristine.weights[l].iter()) {
                sum += (a - b) * (a - b);
                count += 1;
            }
            for (a, b) in layer.bias.iter().zip(self.pristine.biases[l].iter()) {
                sum += (a - b) * (a - b);
                count += 1;
            }
        }
        sum / count as f32
    }

    /// Bit-exact comparison against the pretrained snapshot. Any drift is
    /// a correctness bug in the caller, not a recoverable condition.
    pub fn verify_unchanged(&self) -> Result<()> {
        for (l, layer) in self.mlp.layers.iter().enumerate() {
            let weights_equal = layer
                .weight
                .iter()
                .zip(self.pristine.weights[l].iter())
                .all(|(a, b)| a.to_bits() == b.to_bits());
            let biases_equal = layer
                .bias
                .iter()
                .zip(self.pristine.biases[l].iter())
                .all(|(a, b)| a.to_bits() == b.to_bits());
            if !weights_equal || !biases_equal {
                return Err(anyhow!(
                    "Frozen model parameters changed in layer {} (drift {})",
                    l,
                    self.param_drift()
                ));
            }
        }
        Ok(())
    }
}
