//! Playback output path.
//!
//! # Design constraints
//!
//! The cpal output callback runs on an OS audio thread and must not block,
//! allocate, or perform I/O. The speaker backend therefore feeds the device
//! from a shared sample queue guarded by a `parking_lot` mutex taken with
//! `try_lock` only — on contention the callback emits one buffer of silence
//! rather than waiting.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio
//! on macOS). [`PlaybackOutput`] must be opened and dropped on the same
//! thread; the session does both inside its `spawn_blocking` event loop.

pub mod scheduler;

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use crate::codec::DecodedAudioUnit;
use crate::error::Result;

pub use scheduler::PlaybackScheduler;

/// Monotonic time source for the output timeline, in seconds.
pub trait OutputClock {
    fn now(&self) -> f64;
}

/// Receives scheduled audio from the scheduler.
///
/// `submit` must return promptly — it runs on the session event loop, and a
/// stalled sink would delay barge-in handling.
pub trait PlaybackSink {
    fn submit(&mut self, unit: &DecodedAudioUnit);

    /// Discard everything not yet played. Must silence the output
    /// immediately; called on barge-in and teardown.
    fn halt(&mut self);
}

/// Owns the physical output resource. `close` is idempotent.
pub trait OutputDevice {
    fn close(&mut self);
}

/// Everything the session needs from one opened output path.
pub struct PlaybackOutput {
    pub sink: Box<dyn PlaybackSink>,
    pub clock: Arc<dyn OutputClock>,
    pub device: Box<dyn OutputDevice>,
}

/// Factory seam for the output path, so tests and headless builds inject
/// fakes instead of touching hardware.
pub trait OutputBackend: Send + Sync {
    /// Open the output for units at `source_rate` Hz (24 kHz for endpoint
    /// audio). The returned value is bound to the calling thread.
    fn open(&self, source_rate: u32) -> Result<PlaybackOutput>;
}

/// Clock driven by the number of frames the output device has consumed.
pub struct StreamClock {
    frames_played: Arc<AtomicU64>,
    sample_rate: u32,
}

impl StreamClock {
    pub fn new(frames_played: Arc<AtomicU64>, sample_rate: u32) -> Self {
        Self {
            frames_played,
            sample_rate,
        }
    }
}

impl OutputClock for StreamClock {
    fn now(&self) -> f64 {
        self.frames_played.load(Ordering::Relaxed) as f64 / self.sample_rate as f64
    }
}

#[cfg(feature = "audio-cpal")]
mod speaker {
    use super::*;
    use crate::error::LiveQaError;
    use crate::resample::SampleRateConverter;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use cpal::{
        traits::{DeviceTrait, HostTrait, StreamTrait},
        SampleFormat, SampleRate, Stream, StreamConfig,
    };
    use tracing::{error, info, warn};

    /// Converter block size. Small enough that at most ~10 ms of tail audio
    /// waits for the next submit.
    const CONVERT_BLOCK: usize = 256;

    /// Opens the system default speaker.
    #[derive(Debug, Default)]
    pub struct SpeakerBackend;

    struct QueueSink {
        queue: Arc<Mutex<VecDeque<f32>>>,
        converter: SampleRateConverter,
    }

    impl PlaybackSink for QueueSink {
        fn submit(&mut self, unit: &DecodedAudioUnit) {
            let converted = self.converter.process(&unit.samples);
            if converted.is_empty() {
                return;
            }
            self.queue.lock().extend(converted);
        }

        fn halt(&mut self) {
            self.converter.reset();
            self.queue.lock().clear();
        }
    }

    struct SpeakerDevice {
        /// Kept alive so the stream is not dropped prematurely.
        _stream: Stream,
        queue: Arc<Mutex<VecDeque<f32>>>,
        closed: bool,
    }

    impl OutputDevice for SpeakerDevice {
        fn close(&mut self) {
            if self.closed {
                return;
            }
            self.closed = true;
            self.queue.lock().clear();
            if let Err(e) = self._stream.pause() {
                // Per-resource release failures are logged, never propagated.
                warn!("failed to pause output stream: {e}");
            }
        }
    }

    impl OutputBackend for SpeakerBackend {
        fn open(&self, source_rate: u32) -> Result<PlaybackOutput> {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or_else(|| LiveQaError::AudioDevice("no default output device".into()))?;

            let supported = device
                .default_output_config()
                .map_err(|e| LiveQaError::AudioDevice(e.to_string()))?;

            let device_rate = supported.sample_rate().0;
            let channels = supported.channels();

            info!(
                device = device.name().unwrap_or_default().as_str(),
                device_rate, channels, "opening output device"
            );

            let config = StreamConfig {
                channels,
                sample_rate: SampleRate(device_rate),
                buffer_size: cpal::BufferSize::Default,
            };

            let queue: Arc<Mutex<VecDeque<f32>>> = Arc::new(Mutex::new(VecDeque::new()));
            let frames_played = Arc::new(AtomicU64::new(0));

            let cb_queue = Arc::clone(&queue);
            let cb_frames = Arc::clone(&frames_played);
            let ch = channels as usize;

            let stream = match supported.sample_format() {
                SampleFormat::F32 => device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _info| {
                        let frames = data.len() / ch;
                        if let Some(mut q) = cb_queue.try_lock() {
                            for f in 0..frames {
                                let s = q.pop_front().unwrap_or(0.0);
                                let base = f * ch;
                                for c in 0..ch {
                                    data[base + c] = s;
                                }
                            }
                        } else {
                            data.fill(0.0);
                        }
                        cb_frames.fetch_add(frames as u64, Ordering::Relaxed);
                    },
                    |err| error!("output stream error: {err}"),
                    None,
                ),
                fmt => {
                    return Err(LiveQaError::AudioStream(format!(
                        "unsupported output sample format: {fmt:?}"
                    )))
                }
            }
            .map_err(|e| LiveQaError::AudioStream(e.to_string()))?;

            stream
                .play()
                .map_err(|e| LiveQaError::AudioStream(e.to_string()))?;

            let sink = QueueSink {
                queue: Arc::clone(&queue),
                converter: SampleRateConverter::new(source_rate, device_rate, CONVERT_BLOCK)?,
            };

            Ok(PlaybackOutput {
                sink: Box::new(sink),
                clock: Arc::new(StreamClock::new(frames_played, device_rate)),
                device: Box::new(SpeakerDevice {
                    _stream: stream,
                    queue,
                    closed: false,
                }),
            })
        }
    }
}

#[cfg(feature = "audio-cpal")]
pub use speaker::SpeakerBackend;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_clock_tracks_frames_played() {
        let frames = Arc::new(AtomicU64::new(0));
        let clock = StreamClock::new(Arc::clone(&frames), 24_000);
        assert_eq!(clock.now(), 0.0);

        frames.store(12_000, Ordering::Relaxed);
        assert!((clock.now() - 0.5).abs() < 1e-9);
    }
}
