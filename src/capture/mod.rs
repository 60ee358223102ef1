//! Microphone capture.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority
//! and must not allocate, block on a lock, or perform I/O. The callback
//! downmixes to mono into a reused scratch buffer and writes through the
//! lock-free SPSC ring producer; everything heavier happens on the pump
//! thread (see [`pump`]).
//!
//! Capture is gated by a shared flag: the callback no-ops until the session
//! reaches Connected, and again after teardown. The flag makes stopping
//! idempotent — storing `false` twice is harmless, and the device handle is
//! released exactly once when the capture value drops on its owning thread.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms. The device returned by
//! [`CaptureBackend::open`] must be created and dropped on the same thread;
//! the session does both inside its `spawn_blocking` event loop.

pub mod pump;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::buffering::SampleProducer;
use crate::error::Result;

/// Handle to an opened microphone stream.
pub trait CaptureDevice {
    /// Actual capture sample rate reported by the hardware (Hz).
    fn sample_rate(&self) -> u32;

    /// Signal the callback to no-op. Safe to call repeatedly.
    fn stop(&self);
}

/// Factory seam for the capture path, so tests and headless builds inject
/// synthetic sources instead of opening hardware.
pub trait CaptureBackend: Send + Sync {
    /// Open a capture device pushing mono f32 frames into `producer`
    /// whenever `capturing` is true.
    ///
    /// # Errors
    /// `LiveQaError::NoDefaultInputDevice` when no microphone exists, or
    /// `LiveQaError::Permission` when the device cannot be opened.
    fn open(
        &self,
        producer: SampleProducer,
        capturing: Arc<AtomicBool>,
        preferred_device: Option<&str>,
    ) -> Result<Box<dyn CaptureDevice>>;
}

#[cfg(feature = "audio-cpal")]
mod mic {
    use super::*;
    use crate::buffering::Producer;
    use crate::error::LiveQaError;
    use cpal::{
        traits::{DeviceTrait, HostTrait, StreamTrait},
        SampleFormat, SampleRate, Stream, StreamConfig,
    };
    use tracing::{error, info, warn};

    /// Opens the system microphone via cpal.
    #[derive(Debug, Default)]
    pub struct MicBackend;

    struct MicDevice {
        /// Kept alive so the stream is not dropped prematurely.
        _stream: Stream,
        capturing: Arc<AtomicBool>,
        sample_rate: u32,
    }

    impl CaptureDevice for MicDevice {
        fn sample_rate(&self) -> u32 {
            self.sample_rate
        }

        fn stop(&self) {
            self.capturing.store(false, Ordering::Release);
        }
    }

    /// Downmix an interleaved buffer to mono and push it through the ring
    /// producer. `scratch` is reused across callbacks so the RT path never
    /// allocates once warmed up.
    fn downmix_push<T: Copy>(
        data: &[T],
        channels: usize,
        to_f32: impl Fn(T) -> f32,
        scratch: &mut Vec<f32>,
        producer: &mut SampleProducer,
    ) {
        let frames = data.len() / channels;
        scratch.resize(frames, 0.0);
        for (f, out) in scratch.iter_mut().enumerate() {
            let base = f * channels;
            let mut sum = 0f32;
            for c in 0..channels {
                sum += to_f32(data[base + c]);
            }
            *out = sum / channels as f32;
        }
        let written = producer.push_slice(scratch);
        if written < scratch.len() {
            warn!("capture ring full: dropped {} frames", scratch.len() - written);
        }
    }

    impl CaptureBackend for MicBackend {
        fn open(
            &self,
            mut producer: SampleProducer,
            capturing: Arc<AtomicBool>,
            preferred_device: Option<&str>,
        ) -> Result<Box<dyn CaptureDevice>> {
            let host = cpal::default_host();

            let mut selected = None;
            if let Some(name) = preferred_device {
                match host.input_devices() {
                    Ok(mut devices) => {
                        selected =
                            devices.find(|d| d.name().map(|n| n == name).unwrap_or(false));
                        if selected.is_none() {
                            warn!("preferred input device '{name}' not found, falling back");
                        }
                    }
                    Err(e) => warn!("failed to list input devices: {e}"),
                }
            }

            let device = match selected.or_else(|| host.default_input_device()) {
                Some(d) => d,
                None => return Err(LiveQaError::NoDefaultInputDevice),
            };

            info!(
                device = device.name().unwrap_or_default().as_str(),
                "opening input device"
            );

            let supported = device
                .default_input_config()
                .map_err(|e| LiveQaError::Permission(e.to_string()))?;

            let sample_rate = supported.sample_rate().0;
            let channels = supported.channels();
            let ch = channels as usize;

            info!(sample_rate, channels, "capture config selected");

            let config = StreamConfig {
                channels,
                sample_rate: SampleRate(sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };

            let gate_f32 = Arc::clone(&capturing);
            let gate_i16 = Arc::clone(&capturing);

            let stream = match supported.sample_format() {
                SampleFormat::F32 => {
                    let mut scratch: Vec<f32> = Vec::new();
                    device.build_input_stream(
                        &config,
                        move |data: &[f32], _info| {
                            if !gate_f32.load(Ordering::Relaxed) {
                                return;
                            }
                            if ch == 1 {
                                let written = producer.push_slice(data);
                                if written < data.len() {
                                    warn!(
                                        "capture ring full: dropped {} frames",
                                        data.len() - written
                                    );
                                }
                            } else {
                                downmix_push(data, ch, |s| s, &mut scratch, &mut producer);
                            }
                        },
                        |err| error!("capture stream error: {err}"),
                        None,
                    )
                }
                SampleFormat::I16 => {
                    let mut scratch: Vec<f32> = Vec::new();
                    device.build_input_stream(
                        &config,
                        move |data: &[i16], _info| {
                            if !gate_i16.load(Ordering::Relaxed) {
                                return;
                            }
                            downmix_push(
                                data,
                                ch,
                                |s| s as f32 / 32768.0,
                                &mut scratch,
                                &mut producer,
                            );
                        },
                        |err| error!("capture stream error: {err}"),
                        None,
                    )
                }
                fmt => {
                    return Err(LiveQaError::AudioStream(format!(
                        "unsupported capture sample format: {fmt:?}"
                    )))
                }
            }
            .map_err(|e| LiveQaError::Permission(e.to_string()))?;

            stream
                .play()
                .map_err(|e| LiveQaError::Permission(e.to_string()))?;

            Ok(Box::new(MicDevice {
                _stream: stream,
                capturing,
                sample_rate,
            }))
        }
    }
}

#[cfg(feature = "audio-cpal")]
pub use mic::MicBackend;
