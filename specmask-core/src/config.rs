use crate::{model::FrozenModel, projection::ClassRange, sample::Sample};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Configuration surface of the optimization loop. Everything else
/// (device setup, dataset paths, model construction) is the caller's
/// concern.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SearchSettings {
    /// Fixed iteration budget; there is no early-stopping criterion.
    pub iterations: usize,
    /// Step size applied to the mask update.
    pub learning_rate: f32,
    /// Weight of the log-barrier regularization on the mask norm.
    pub lambda: f32,
    /// Constant the mask is initialized to.
    pub mask_init: f32,
    /// First class index kept for the softmax comparison (inclusive).
    pub class_start: usize,
    /// Last class index kept for the softmax comparison (inclusive).
    pub class_end: usize,
    /// Interval between perturbed-spectrum tensor dumps.
    pub dump_every: usize,
    pub seed: [u8; 32],
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            iterations: 1000,
            learning_rate: 1.0,
            lambda: 0.1,
            mask_init: 0.1,
            class_start: 2,
            class_end: 27,
            dump_every: 1000,
            seed: [0u8; 32],
        }
    }
}

impl SearchSettings {
    pub fn class_range(&self) -> ClassRange {
        ClassRange {
            start: self.class_start,
            end: self.class_end,
        }
    }

    /// Fails fast on any inconsistency between the settings, the sample
    /// and the frozen model, before the first iteration runs.
    pub fn validate(&self, sample: &Sample, model: &FrozenModel) -> Result<()> {
        if self.iterations == 0 {
            return Err(anyhow!("Invalid settings. iterations must be non-zero"));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(anyhow!(
                "Invalid settings. learning_rate must be finite and positive, got {}",
                self.learning_rate
            ));
        }
        if !self.lambda.is_finite() || self.lambda < 0.0 {
            return Err(anyhow!(
                "Invalid settings. lambda must be finite and non-negative, got {}",
                self.lambda
            ));
        }
        if !self.mask_init.is_finite() || self.mask_init == 0.0 {
            // the log-barrier on ||m||^2 is undefined for an all-zero mask
            return Err(anyhow!(
                "Invalid settings. mask_init must be finite and non-zero, got {}",
                self.mask_init
            ));
        }
        if self.dump_every == 0 {
            return Err(anyhow!("Invalid settings. dump_every must be non-zero"));
        }
        if model.num_classes() < 2 {
            // the per-frame variance normalization needs at least two classes
            return Err(anyhow!(
                "Model must emit at least 2 classes, got {}",
                model.num_classes()
            ));
        }
        if self.class_start > self.class_end || self.class_end >= model.num_classes() {
            return Err(anyhow!(
                "Invalid class range {}..={} for a model with {} classes",
                self.class_start,
                self.class_end,
                model.num_classes()
            ));
        }
        if model.input_features() != sample.num_bins() {
            return Err(anyhow!(
                "Model expects {} input features but the sample has {} frequency bins",
                model.input_features(),
                sample.num_bins()
            ));
        }
        Ok(())
    }
}
