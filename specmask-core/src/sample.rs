use anyhow::{anyhow, Result};
use ndarray::Array2;

impl_blob_serde! {
    Sample {
        spectral: Array2<f32>,
        feature: Array2<f32>,
        target: Vec<usize>,
    }
}

/// Global statistics of the unperturbed spectral tensor. The noise
/// distribution is parameterized from these, never from the perturbed
/// spectrum.
#[derive(Debug, Clone, Copy)]
pub struct SpectralStats {
    pub mean: f32,
    pub stdev: f32,
}

impl Sample {
    pub fn new(spectral: Array2<f32>, feature: Array2<f32>, target: Vec<usize>) -> Result<Self> {
        let sample = Self {
            spectral,
            feature,
            target,
        };
        sample.validate()?;
        Ok(sample)
    }

    /// Number of frequency bins K. The spectral tensor interleaves the
    /// real and imaginary parts of each bin along its first axis.
    pub fn num_bins(&self) -> usize {
        self.spectral.nrows() / 2
    }

    pub fn num_frames(&self) -> usize {
        self.spectral.ncols()
    }

    pub fn validate(&self) -> Result<()> {
        let (rows, cols) = self.spectral.dim();
        if rows == 0 || rows % 2 != 0 {
            return Err(anyhow!(
                "Invalid spectral tensor. First axis must interleave re/im pairs, got {} rows",
                rows
            ));
        }
        if cols == 0 {
            return Err(anyhow!("Invalid spectral tensor. No frames"));
        }
        if self.feature.dim() != (cols, rows / 2) {
            return Err(anyhow!(
                "Feature shape {:?} does not match spectral shape {:?}. Expected ({}, {})",
                self.feature.dim(),
                self.spectral.dim(),
                cols,
                rows / 2
            ));
        }
        if self.spectral.iter().any(|v| !v.is_finite()) {
            return Err(anyhow!("Sample spectral tensor has non-finite values"));
        }
        if self.feature.iter().any(|v| !v.is_finite()) {
            return Err(anyhow!("Sample feature tensor has non-finite values"));
        }
        Ok(())
    }

    pub fn spectral_stats(&self) -> SpectralStats {
        SpectralStats {
            mean: self.spectral.mean().unwrap_or(0.0),
            stdev: self.spectral.std(0.0),
        }
    }
}
