use crate::{model::FrozenModel, normalize, sample::Sample};
use anyhow::{anyhow, Result};
use ndarray::{s, Array1, Array2, Axis};

/// Inclusive range of class indices kept for the softmax comparison.
/// Boundary/special tokens outside the range are discarded.
#[derive(Debug, Clone, Copy)]
pub struct ClassRange {
    pub start: usize,
    pub end: usize,
}

impl ClassRange {
    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }
}

/// Per-frame statistics captured by [`project`] for the backward pass.
pub struct ProjectionCache {
    pub softmax: Array2<f32>,
    pub mean: Array1<f32>,
    pub inv_std: Array1<f32>,
}

/// Projects a raw `C x T` model output for comparison: divide each frame's
/// class vector by the square root of its own variance across the class
/// axis, restrict to the class sub-range, softmax over the remaining
/// classes. Applied identically to the reference and the current output.
pub fn project(output: &Array2<f32>, range: ClassRange) -> (Array2<f32>, ProjectionCache) {
    debug_assert!(output.nrows() >= 2);
    let mean = output.mean_axis(Axis(0)).unwrap();
    let inv_std = output
        .var_axis(Axis(0), 1.0)
        .mapv(|v| 1.0 / v.sqrt());
    let scaled = output * &inv_std;

    let mut softmax = scaled.slice(s![range.start..=range.end, ..]).to_owned();
    for mut col in softmax.columns_mut() {
        let max = col.fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
        col.mapv_inplace(|v| (v - max).exp());
        let sum = col.sum();
        col.mapv_inplace(|v| v / sum);
    }

    let cache = ProjectionCache {
        softmax: softmax.clone(),
        mean,
        inv_std,
    };
    (softmax, cache)
}

/// Gradient of [`project`] with respect to the raw model output, given the
/// upstream gradient on the softmax slice. Chains softmax, the sub-range
/// scatter and the per-frame variance normalization by hand.
pub fn project_backward(
    dsoftmax: &Array2<f32>,
    output: &Array2<f32>,
    range: ClassRange,
    cache: &ProjectionCache,
) -> Array2<f32> {
    let (num_classes, num_frames) = output.dim();
    let mut dout = Array2::zeros((num_classes, num_frames));
    for t in 0..num_frames {
        let p = cache.softmax.column(t);
        let g = dsoftmax.column(t);
        let dot: f32 = g.iter().zip(p.iter()).map(|(a, b)| a * b).sum();

        // softmax backward, scattered into the full class layout
        let mut dy = Array1::zeros(num_classes);
        for i in 0..range.len() {
            dy[range.start + i] = p[i] * (g[i] - dot);
        }

        // variance-normalization backward: y_j = o_j / s with
        // s = sqrt(var(o)), so do_j = dy_j/s - (sum_i dy_i o_i) *
        // (o_j - mean) / (s^3 * (C - 1))
        let o = output.column(t);
        let inv_s = cache.inv_std[t];
        let mu = cache.mean[t];
        let weighted: f32 = dy.iter().zip(o.iter()).map(|(a, b)| a * b).sum();
        let scale = weighted * inv_s.powi(3) / (num_classes as f32 - 1.0);
        for j in 0..num_classes {
            dout[[j, t]] = dy[j] * inv_s - scale * (o[j] - mu);
        }
    }
    dout
}

/// Runs the frozen model on the pristine feature tensor (standardized with
/// its own statistics) and projects the output. Computed once before the
/// loop begins and held as the fixed comparison target; never recomputed
/// mid-loop.
pub fn compute_reference(
    sample: &Sample,
    model: &FrozenModel,
    range: ClassRange,
) -> Result<Array2<f32>> {
    let (standardized, _) = normalize::standardize(&sample.feature);
    let (output, _) = model.forward(&standardized);
    if range.end >= output.nrows() {
        return Err(anyhow!(
            "Class range {}..={} exceeds model output classes ({})",
            range.start,
            range.end,
            output.nrows()
        ));
    }
    let (softmax, _) = project(&output, range);
    Ok(softmax)
}
