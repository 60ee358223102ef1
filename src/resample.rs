//! Sample-rate conversion between device and model rates.
//!
//! Hardware rarely runs at the endpoint's rates: capture devices commonly
//! deliver 44.1/48 kHz while the endpoint wants 16 kHz up and produces
//! 24 kHz down. `SampleRateConverter` bridges both directions on non-RT
//! threads, where allocation is allowed.
//!
//! When the two rates match the converter is a passthrough and no rubato
//! session is created.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::error;

use crate::error::{LiveQaError, Result};

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct SampleRateConverter {
    /// `None` in passthrough mode (source rate == target rate).
    resampler: Option<FastFixedIn<f32>>,
    /// Holds partial input between calls until a full rubato block exists.
    pending: Vec<f32>,
    /// Input frames rubato consumes per process call.
    block_size: usize,
    /// Pre-allocated rubato output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
}

impl SampleRateConverter {
    /// Create a converter from `source_rate` to `target_rate` Hz.
    ///
    /// # Errors
    /// `LiveQaError::AudioDevice` if rubato fails to initialise.
    pub fn new(source_rate: u32, target_rate: u32, block_size: usize) -> Result<Self> {
        if source_rate == target_rate {
            return Ok(Self {
                resampler: None,
                pending: Vec::new(),
                block_size,
                output_buf: Vec::new(),
            });
        }

        let ratio = target_rate as f64 / source_rate as f64;
        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio, no dynamic adjustment
            PolynomialDegree::Cubic,
            block_size,
            1, // mono
        )
        .map_err(|e| LiveQaError::AudioDevice(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();

        tracing::debug!(source_rate, target_rate, block_size, "resampling enabled");

        Ok(Self {
            resampler: Some(resampler),
            pending: Vec::new(),
            block_size,
            output_buf: vec![vec![0f32; max_out]],
        })
    }

    /// Feed samples in, get converted samples out (possibly empty while a
    /// partial block accumulates). Passthrough mode returns the input as-is.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.pending.extend_from_slice(samples);

        let mut converted = Vec::new();
        while self.pending.len() >= self.block_size {
            let block = &self.pending[..self.block_size];
            match resampler.process_into_buffer(&[block], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    converted.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => error!("resampler process error: {e}"),
            }
            self.pending.drain(..self.block_size);
        }

        converted
    }

    /// Discard any partially accumulated input (used when playback is
    /// halted on barge-in so stale tail samples never leak into the next
    /// utterance).
    pub fn reset(&mut self) {
        self.pending.clear();
    }

    /// `true` when no actual resampling occurs.
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}
