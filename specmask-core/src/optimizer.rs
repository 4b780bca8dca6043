use crate::{
    config::SearchSettings,
    diagnostics::{DiagnosticsSink, IterationRecord},
    model::FrozenModel,
    normalize,
    projection,
    sample::Sample,
    spectral,
};
use anyhow::{anyhow, Result};
use ndarray::Array2;
use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Distribution, Normal};

impl_blob_serde! {
    MaskSolution {
        mask: Array2<f32>,
        iterations: usize,
        rec_loss: f32,
        total_loss: f32,
    }
}

/// The learnable state of the search: the mask itself and how many
/// iterations have consumed it.
pub struct MaskState {
    pub mask: Array2<f32>,
    pub iteration: usize,
}

/// Everything one iteration produces: the scalar record for the
/// diagnostics stream plus the perturbed spectrum kept around for the
/// periodic tensor dump.
pub struct StepOutcome {
    pub record: IterationRecord,
    pub rawinput: Array2<f32>,
}

/// Gradient of `log(||m||^2)` scaled by the barrier's outer derivative:
/// exactly `2m / ||m||^2` elementwise.
pub fn regularization_gradient(mask: &Array2<f32>) -> Array2<f32> {
    let norm_sq = mask.mapv(|v| v * v).sum();
    mask * (2.0 / norm_sq)
}

pub struct MaskOptimizer {
    settings: SearchSettings,
    state: MaskState,
}

impl MaskOptimizer {
    pub fn new(settings: SearchSettings, sample: &Sample) -> Self {
        let mask = Array2::from_elem(sample.spectral.raw_dim(), settings.mask_init);
        Self {
            settings,
            state: MaskState { mask, iteration: 0 },
        }
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    pub fn state(&self) -> &MaskState {
        &self.state
    }

    /// One full iteration against a caller-supplied noise draw. Keeping
    /// the draw outside makes the iteration deterministic and directly
    /// testable against hand-computed gradients.
    pub fn step(
        &mut self,
        sample: &Sample,
        model: &FrozenModel,
        reference: &Array2<f32>,
        epsilon: &Array2<f32>,
    ) -> Result<StepOutcome> {
        sample.validate()?;

        let range = self.settings.class_range();
        let mask = &self.state.mask;

        let rawinput = &sample.spectral + &(mask * epsilon);
        let (absinput, backproj) = spectral::magnitude_forward(&rawinput);
        let trinput = absinput.t().to_owned();
        let (trueinput, norm_stats) = normalize::standardize(&trinput);

        let (output, cache) = model.forward(&trueinput);
        let (softmax, proj_cache) = projection::project(&output, range);

        let diff = reference - &softmax;
        let rec_loss = (&diff * &diff).sum();
        let mask_norm_sq = mask.mapv(|v| v * v).sum();
        let log_mask_norm = mask_norm_sq.ln();
        let total_loss = rec_loss - self.settings.lambda * log_mask_norm;
        if !total_loss.is_finite() {
            return Err(anyhow!(
                "Loss has non-finite values at iteration {}",
                self.state.iteration
            ));
        }

        // autodiff leg: loss -> projection -> model -> normalized input.
        // The model's parameter gradients exist for drift diagnostics
        // only; no optimizer ever applies them.
        let dsoftmax = (&softmax - reference) * 2.0;
        let dout = projection::project_backward(&dsoftmax, &output, range, &proj_cache);
        let (dy, layer_grads) = model.backward(&dout, &cache);
        let model_grad_norm = layer_grads
            .iter()
            .map(|g| g.weight.mapv(|v| v * v).sum() + g.bias.mapv(|v| v * v).sum())
            .sum::<f32>()
            .sqrt();

        // manual leg: normalized input -> magnitude -> mask
        let dx = normalize::standardize_backward(&dy, &trinput, &norm_stats);
        let xgrad = dx.t().to_owned();
        let mgrad =
            spectral::magnitude_backward(&xgrad, epsilon, mask, &sample.spectral, &backproj);

        let reg_grad = regularization_gradient(mask);
        let mgrad_total = &mgrad - &(&reg_grad * self.settings.lambda);

        let record = IterationRecord {
            iteration: self.state.iteration,
            total_loss,
            rec_loss,
            log_mask_norm,
            mask_mean: mask.mean().unwrap_or(0.0),
            mask_var: mask.var(1.0),
            epsilon_mean: epsilon.mean().unwrap_or(0.0),
            epsilon_stdev: epsilon.std(1.0),
            rec_grad_mean: mgrad.mean().unwrap_or(0.0),
            rec_grad_var: mgrad.var(1.0),
            reg_grad_mean: reg_grad.mean().unwrap_or(0.0),
            reg_grad_var: reg_grad.var(1.0),
            model_grad_norm,
            param_drift: model.param_drift(),
        };

        self.state.mask = &self.state.mask - &(mgrad_total * self.settings.learning_rate);
        self.state.iteration += 1;

        Ok(StepOutcome { record, rawinput })
    }

    /// Runs the whole search: reference computation under eval mode, then
    /// the fixed iteration budget, then the end-of-run verification that
    /// the frozen model never moved.
    pub fn run(
        &mut self,
        sample: &Sample,
        model: &mut FrozenModel,
        sink: &mut dyn DiagnosticsSink,
    ) -> Result<MaskSolution> {
        self.settings.validate(sample, model)?;
        sample.validate()?;

        model.set_training(false);
        let reference = projection::compute_reference(sample, model, self.settings.class_range())?;
        model.set_training(true);

        let result = self.run_iterations(sample, model, &reference, sink);
        // one flush covers the fatal-abort path as well
        sink.flush()?;
        let (rec_loss, total_loss) = result?;

        model.verify_unchanged()?;
        sink.dump_tensor("mask", self.settings.iterations - 1, &self.state.mask)?;
        sink.flush()?;

        Ok(MaskSolution {
            mask: self.state.mask.clone(),
            iterations: self.settings.iterations,
            rec_loss,
            total_loss,
        })
    }

    fn run_iterations(
        &mut self,
        sample: &Sample,
        model: &FrozenModel,
        reference: &Array2<f32>,
        sink: &mut dyn DiagnosticsSink,
    ) -> Result<(f32, f32)> {
        let stats = sample.spectral_stats();
        let noise = Normal::new(0.0f32, stats.stdev)
            .map_err(|e| anyhow!("Invalid noise distribution: {}", e))?;
        let mut rng = StdRng::from_seed(self.settings.seed);
        let dims = sample.spectral.raw_dim();

        let mut last_losses = (0.0, 0.0);
        for i in 0..self.settings.iterations {
            let epsilon = Array2::from_shape_fn(dims, |_| noise.sample(&mut rng));
            let outcome = self.step(sample, model, reference, &epsilon)?;
            sink.record(&outcome.record)?;
            if i % self.settings.dump_every == 0 {
                sink.dump_tensor("perturbed_spectral", i, &outcome.rawinput)?;
            }
            if i + 1 == self.settings.iterations {
                sink.dump_tensor("epsilon", i, &epsilon)?;
            }
            last_losses = (outcome.record.rec_loss, outcome.record.total_loss);
        }
        Ok(last_losses)
    }
}
