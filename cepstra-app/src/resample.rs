//! Sample-rate conversion to the front-end rate using a rubato
//! `FastFixedIn` resampler.
//!
//! When the file rate already matches, `RateConverter` is a passthrough and
//! no rubato session is created.

use anyhow::{Context, Result};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};

/// Converts mono f32 audio from one fixed rate to another.
pub struct RateConverter {
    /// `None` in passthrough mode.
    resampler: Option<FastFixedIn<f32>>,
    input_buf: Vec<f32>,
    chunk_size: usize,
    output_buf: Vec<Vec<f32>>,
    ratio: f64,
}

impl RateConverter {
    pub fn new(source_rate: u32, target_rate: u32, chunk_size: usize) -> Result<Self> {
        let ratio = target_rate as f64 / source_rate as f64;
        if source_rate == target_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
                ratio,
            });
        }

        let resampler = FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, chunk_size, 1)
            .context("resampler init")?;
        let max_out = resampler.output_frames_max();

        tracing::info!(source_rate, target_rate, chunk_size, max_out, "resampling enabled");

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::new(),
            chunk_size,
            output_buf: vec![vec![0f32; max_out]; 1],
            ratio,
        })
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }

    /// Resample `samples`, keeping any partial chunk for the next call.
    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(samples.to_vec());
        };
        self.input_buf.extend_from_slice(samples);

        let mut result = Vec::new();
        while self.input_buf.len() >= self.chunk_size {
            let (_consumed, produced) = resampler
                .process_into_buffer(&[&self.input_buf[..self.chunk_size]], &mut self.output_buf, None)
                .context("resampler process")?;
            result.extend_from_slice(&self.output_buf[0][..produced]);
            self.input_buf.drain(..self.chunk_size);
        }
        Ok(result)
    }

    /// Zero-pad the held partial chunk and return its share of the output.
    pub fn flush(&mut self) -> Result<Vec<f32>> {
        if self.resampler.is_none() || self.input_buf.is_empty() {
            return Ok(Vec::new());
        }
        let pending = self.input_buf.len();
        let pad = vec![0.0; self.chunk_size - pending];
        let mut out = self.process(&pad)?;
        out.truncate((pending as f64 * self.ratio).round() as usize);
        Ok(out)
    }
}
