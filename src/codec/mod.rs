//! PCM wire codec.
//!
//! The remote endpoint speaks 16-bit little-endian PCM in both directions:
//! microphone audio goes up at 16 kHz, synthesized speech comes down at
//! 24 kHz. Chunks cross the transport base64-wrapped, so the decoder first
//! unwraps the text-safe form and then reinterprets the raw bytes.
//!
//! Encoding is pure and never fails: out-of-range samples are clamped to
//! [-1, 1] rather than rejected, so an upstream capture glitch degrades the
//! audio instead of killing the session.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::error::{LiveQaError, Result};

/// Sample rate the endpoint expects for microphone audio (Hz).
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of synthesized speech received from the endpoint (Hz).
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// MIME tag attached to every outbound chunk.
pub const PCM_MIME_16K: &str = "audio/pcm;rate=16000";

/// An immutable encoded audio payload ready for transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    /// 16-bit little-endian PCM samples.
    pub data: Vec<u8>,
    /// Encoding + sample-rate tag, e.g. `audio/pcm;rate=16000`.
    pub mime_type: &'static str,
}

impl EncodedChunk {
    /// Transport-safe form of the payload (the endpoint takes base64 text).
    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.data)
    }

    /// Number of PCM samples in this chunk.
    pub fn sample_count(&self) -> usize {
        self.data.len() / 2
    }
}

/// A decoded playable buffer at the output rate.
///
/// Owned by the playback scheduler from creation until the unit finishes
/// or is halted by an interrupt.
#[derive(Debug, Clone)]
pub struct DecodedAudioUnit {
    /// Mono f32 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate in Hz (24 000 for endpoint audio).
    pub sample_rate: u32,
}

impl DecodedAudioUnit {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Duration of this unit in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Encode one capture frame as 16-bit LE PCM.
///
/// Each sample is clamped to [-1, 1], scaled to the signed 16-bit range and
/// truncated. Deterministic; allocates only the output buffer.
pub fn encode_frame(samples: &[f32]) -> EncodedChunk {
    let mut data = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let v = (s.clamp(-1.0, 1.0) * 32768.0) as i32;
        let v = v.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        data.extend_from_slice(&v.to_le_bytes());
    }
    EncodedChunk {
        data,
        mime_type: PCM_MIME_16K,
    }
}

/// Decode raw 16-bit LE PCM bytes into a playable unit at `sample_rate`.
///
/// # Errors
/// `LiveQaError::Decode` when the byte length is odd. Callers treat this as
/// one dropped chunk, not a session-fatal condition.
pub fn decode_pcm(bytes: &[u8], sample_rate: u32) -> Result<DecodedAudioUnit> {
    if bytes.len() % 2 != 0 {
        return Err(LiveQaError::Decode(format!(
            "odd PCM byte length: {}",
            bytes.len()
        )));
    }

    let samples = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect();

    Ok(DecodedAudioUnit::new(samples, sample_rate))
}

/// Unwrap a base64 payload back to raw bytes.
///
/// # Errors
/// `LiveQaError::Decode` on malformed base64.
pub fn decode_base64_payload(payload: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(payload)
        .map_err(|e| LiveQaError::Decode(format!("invalid base64 payload: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_within_quantization_error() {
        let original: Vec<f32> = (0..4096)
            .map(|i| ((i as f32) * 0.013).sin() * 0.8)
            .collect();

        let chunk = encode_frame(&original);
        assert_eq!(chunk.mime_type, PCM_MIME_16K);
        assert_eq!(chunk.sample_count(), original.len());

        let unit = decode_pcm(&chunk.data, INPUT_SAMPLE_RATE).unwrap();
        assert_eq!(unit.samples.len(), original.len());

        let max_err = 1.0 / 32768.0;
        for (a, b) in original.iter().zip(unit.samples.iter()) {
            assert!(
                (a - b).abs() <= max_err,
                "sample error {} exceeds quantization bound",
                (a - b).abs()
            );
        }
    }

    #[test]
    fn out_of_range_samples_are_clamped() {
        let chunk = encode_frame(&[2.0, -3.5, 1.0, -1.0]);
        let unit = decode_pcm(&chunk.data, INPUT_SAMPLE_RATE).unwrap();

        // +1.0 saturates at i16::MAX, everything ≤ -1.0 hits i16::MIN.
        assert!((unit.samples[0] - 32767.0 / 32768.0).abs() < 1e-6);
        assert!((unit.samples[1] + 1.0).abs() < 1e-6);
        assert!((unit.samples[2] - 32767.0 / 32768.0).abs() < 1e-6);
        assert!((unit.samples[3] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn odd_byte_length_is_a_decode_error() {
        let err = decode_pcm(&[0x01, 0x02, 0x03], OUTPUT_SAMPLE_RATE).unwrap_err();
        assert!(matches!(err, LiveQaError::Decode(_)));
    }

    #[test]
    fn decode_after_failed_chunk_still_works() {
        assert!(decode_pcm(&[0xff], OUTPUT_SAMPLE_RATE).is_err());

        let good = encode_frame(&[0.25, -0.25]);
        let unit = decode_pcm(&good.data, OUTPUT_SAMPLE_RATE).unwrap();
        assert_eq!(unit.samples.len(), 2);
        assert!((unit.samples[0] - 0.25).abs() <= 1.0 / 32768.0);
    }

    #[test]
    fn base64_wrapping_survives_transport() {
        let chunk = encode_frame(&[0.1, 0.2, -0.3]);
        let wire = chunk.to_base64();
        let bytes = decode_base64_payload(&wire).unwrap();
        assert_eq!(bytes, chunk.data);
    }

    #[test]
    fn malformed_base64_is_a_decode_error() {
        let err = decode_base64_payload("@@not base64@@").unwrap_err();
        assert!(matches!(err, LiveQaError::Decode(_)));
    }

    #[test]
    fn unit_duration_matches_sample_count() {
        let unit = DecodedAudioUnit::new(vec![0.0; 24_000], OUTPUT_SAMPLE_RATE);
        assert!((unit.duration_secs() - 1.0).abs() < 1e-9);
        assert!(!unit.is_empty());
    }
}
