//! Pollable frequency-energy snapshots for the waveform display.
//!
//! A [`SpectrumTap`] sits next to an audio path (capture pump or playback
//! scheduler), keeps the most recent [`FFT_SIZE`] samples, and computes a
//! Hann-windowed magnitude spectrum on demand. Purely observational: taps
//! never touch scheduling or codec behavior, and polling is optional.

use std::sync::Arc;

use parking_lot::Mutex;
use rustfft::{num_complex::Complex, Fft, FftPlanner};

/// Transform window length in samples.
pub const FFT_SIZE: usize = 256;

/// Usable frequency bins per snapshot (half the window).
pub const BIN_COUNT: usize = FFT_SIZE / 2;

struct TapInner {
    /// Circular window of the most recent samples.
    window: [f32; FFT_SIZE],
    write_pos: usize,
    fft: Arc<dyn Fft<f32>>,
}

/// Shared handle to one direction's spectrum feed.
///
/// Cheap to clone; the writer side calls [`push`](Self::push), consumers
/// call [`snapshot`](Self::snapshot) at whatever rate the display wants.
#[derive(Clone)]
pub struct SpectrumTap {
    inner: Arc<Mutex<TapInner>>,
}

impl Default for SpectrumTap {
    fn default() -> Self {
        Self::new()
    }
}

impl SpectrumTap {
    pub fn new() -> Self {
        let fft = FftPlanner::new().plan_fft_forward(FFT_SIZE);
        Self {
            inner: Arc::new(Mutex::new(TapInner {
                window: [0.0; FFT_SIZE],
                write_pos: 0,
                fft,
            })),
        }
    }

    /// Append samples to the rolling window, overwriting the oldest.
    pub fn push(&self, samples: &[f32]) {
        let mut inner = self.inner.lock();
        for &s in samples {
            let pos = inner.write_pos;
            inner.window[pos] = s;
            inner.write_pos = (pos + 1) % FFT_SIZE;
        }
    }

    /// Zero the window (playback was halted; the display should go quiet).
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.window = [0.0; FFT_SIZE];
        inner.write_pos = 0;
    }

    /// Current per-bin magnitude spectrum, normalized to roughly [0, 1].
    ///
    /// Non-destructive: the window is unchanged and repeated polls over the
    /// same audio return the same values.
    pub fn snapshot(&self) -> Vec<f32> {
        let inner = self.inner.lock();

        // Unroll the circular window into time order, Hann-weighted.
        let mut buf: Vec<Complex<f32>> = (0..FFT_SIZE)
            .map(|i| {
                let sample = inner.window[(inner.write_pos + i) % FFT_SIZE];
                let hann = 0.5
                    * (1.0
                        - (2.0 * std::f32::consts::PI * i as f32 / (FFT_SIZE - 1) as f32).cos());
                Complex::new(sample * hann, 0.0)
            })
            .collect();

        inner.fft.process(&mut buf);

        buf[..BIN_COUNT]
            .iter()
            .map(|c| c.norm() / (FFT_SIZE as f32 / 2.0))
            .collect()
    }

    /// Root-mean-square level of the current window, in [0, 1].
    pub fn rms(&self) -> f32 {
        let inner = self.inner.lock();
        let sum_sq: f32 = inner.window.iter().map(|s| s * s).sum();
        (sum_sq / FFT_SIZE as f32).sqrt()
    }
}
