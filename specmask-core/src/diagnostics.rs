use anyhow::Result;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

/// Scalar metrics recorded once per iteration, keyed by iteration index.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct IterationRecord {
    pub iteration: usize,
    pub total_loss: f32,
    pub rec_loss: f32,
    pub log_mask_norm: f32,
    pub mask_mean: f32,
    pub mask_var: f32,
    pub epsilon_mean: f32,
    pub epsilon_stdev: f32,
    pub rec_grad_mean: f32,
    pub rec_grad_var: f32,
    pub reg_grad_mean: f32,
    pub reg_grad_var: f32,
    pub model_grad_norm: f32,
    pub param_drift: f32,
}

impl_blob_serde! {
    TensorBlob {
        tensor: Array2<f32>,
    }
}

#[derive(Serialize)]
struct TensorDump {
    tag: String,
    iteration: usize,
    tensor: TensorBlob,
}

/// Destination for the loop's scalar time series and occasional
/// full-tensor dumps. Implementations own their writers for the whole
/// run; the loop flushes on every exit path, including fatal aborts.
pub trait DiagnosticsSink {
    fn record(&mut self, record: &IterationRecord) -> Result<()>;
    fn dump_tensor(&mut self, tag: &str, iteration: usize, tensor: &Array2<f32>) -> Result<()>;
    fn flush(&mut self) -> Result<()>;
}

/// Appends newline-delimited JSON records to `scalars.jsonl` and
/// `tensors.jsonl` under the run directory. Both files are opened once at
/// loop entry and written in loop order.
pub struct JsonlSink {
    scalars: BufWriter<File>,
    tensors: BufWriter<File>,
}

impl JsonlSink {
    pub fn new(outdir: &Path) -> Result<Self> {
        fs::create_dir_all(outdir)?;
        Ok(Self {
            scalars: BufWriter::new(File::create(outdir.join("scalars.jsonl"))?),
            tensors: BufWriter::new(File::create(outdir.join("tensors.jsonl"))?),
        })
    }
}

impl DiagnosticsSink for JsonlSink {
    fn record(&mut self, record: &IterationRecord) -> Result<()> {
        writeln!(self.scalars, "{}", serde_json::to_string(record)?)?;
        Ok(())
    }

    fn dump_tensor(&mut self, tag: &str, iteration: usize, tensor: &Array2<f32>) -> Result<()> {
        let dump = TensorDump {
            tag: tag.to_string(),
            iteration,
            tensor: TensorBlob {
                tensor: tensor.clone(),
            },
        };
        writeln!(self.tensors, "{}", serde_json::to_string(&dump)?)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.scalars.flush()?;
        self.tensors.flush()?;
        Ok(())
    }
}

impl Drop for JsonlSink {
    fn drop(&mut self) {
        let _ = self.scalars.flush();
        let _ = self.tensors.flush();
    }
}

/// Discards everything. Used by tests that only care about the numerics.
pub struct NullSink;

impl DiagnosticsSink for NullSink {
    fn record(&mut self, _record: &IterationRecord) -> Result<()> {
        Ok(())
    }

    fn dump_tensor(&mut self, _tag: &str, _iteration: usize, _tensor: &Array2<f32>) -> Result<()> {
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
