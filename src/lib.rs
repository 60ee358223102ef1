//! # liveqa-core
//!
//! Real-time voice Q&A session engine.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → capture callback → SPSC ring → CapturePump
//!                                                 │ resample → 16 kHz,
//!                                                 │ frame, PCM-encode
//!                                                 ▼
//!                                        LiveTransport::send_audio
//!
//! endpoint events → ServerEvent queue → LiveSession event loop
//!                                                 │ decode 24 kHz PCM
//!                                                 ▼
//!                                        PlaybackScheduler → output device
//! ```
//!
//! One `spawn_blocking` event loop owns the session: lifecycle transitions,
//! chunk decoding, playback scheduling and interruption all happen there,
//! keeping a single writer over the playback cursor and active-unit set.
//! The capture callback is zero-alloc; heavy work happens off the RT
//! threads. Barge-in (the endpoint's interrupted signal) halts every
//! scheduled unit at once and pulls the scheduling cursor back to "now".

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod buffering;
pub mod capture;
pub mod codec;
pub mod error;
pub mod playback;
pub mod resample;
pub mod session;
pub mod spectrum;

// Convenience re-exports for downstream crates
pub use codec::{DecodedAudioUnit, EncodedChunk, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
pub use error::LiveQaError;
pub use playback::PlaybackScheduler;
pub use session::events::{ServerEvent, SessionState, SessionStatusEvent};
pub use session::transport::{ConnectConfig, LiveConnector, LiveTransport};
pub use session::{LiveSession, SessionConfig};
pub use spectrum::SpectrumTap;

#[cfg(feature = "audio-cpal")]
pub use capture::MicBackend;

#[cfg(feature = "audio-cpal")]
pub use playback::SpeakerBackend;
