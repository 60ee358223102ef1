//! Capture pump thread.
//!
//! Drains the capture ring, converts to the endpoint's 16 kHz input rate,
//! cuts fixed-size frames, encodes each and hands it to the transport.
//! Sends are fire-and-forget: a failed send logs and drops that frame, it
//! never blocks or reorders subsequent capture. Frame delivery order is
//! capture order because a single thread does all of it.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::buffering::{Consumer, SampleConsumer};
use crate::codec::{encode_frame, INPUT_SAMPLE_RATE};
use crate::resample::SampleRateConverter;
use crate::session::transport::LiveTransport;
use crate::session::SessionDiagnostics;
use crate::spectrum::SpectrumTap;

/// Samples drained from the ring per iteration (20 ms at 48 kHz).
const DRAIN_CHUNK: usize = 960;

/// Sleep when the ring is empty, to avoid busy-waiting.
const EMPTY_SLEEP: Duration = Duration::from_millis(5);

/// Everything the pump loop needs, passed as one struct so the thread
/// closure stays tidy.
pub struct PumpContext {
    pub consumer: SampleConsumer,
    /// Rate the device actually captures at (Hz).
    pub capture_rate: u32,
    /// Samples per encoded frame at 16 kHz.
    pub frame_size: usize,
    pub transport: Arc<dyn LiveTransport>,
    pub tap: SpectrumTap,
    pub running: Arc<AtomicBool>,
    pub diagnostics: Arc<SessionDiagnostics>,
}

/// Handle to the running pump thread.
pub struct CapturePump {
    handle: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl CapturePump {
    /// Spawn the pump. `ctx.running` is shared with the session; flipping
    /// it to false stops the loop.
    pub fn spawn(ctx: PumpContext) -> Self {
        let running = Arc::clone(&ctx.running);
        let handle = std::thread::spawn(move || run(ctx));

        Self {
            handle: Some(handle),
            running,
        }
    }

    /// Stop the loop and wait for the thread. Idempotent.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("capture pump thread panicked");
            }
        }
    }
}

impl Drop for CapturePump {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(mut ctx: PumpContext) {
    debug!(
        capture_rate = ctx.capture_rate,
        frame_size = ctx.frame_size,
        "capture pump started"
    );

    let mut converter =
        match SampleRateConverter::new(ctx.capture_rate, INPUT_SAMPLE_RATE, DRAIN_CHUNK) {
            Ok(c) => c,
            Err(e) => {
                error!("failed to create capture resampler: {e}");
                return;
            }
        };

    let mut raw = vec![0f32; DRAIN_CHUNK];
    let mut frame_buf: Vec<f32> = Vec::with_capacity(ctx.frame_size * 2);

    loop {
        if !ctx.running.load(Ordering::Relaxed) {
            break;
        }

        let n = ctx.consumer.pop_slice(&mut raw);
        if n == 0 {
            std::thread::sleep(EMPTY_SLEEP);
            continue;
        }

        let converted = converter.process(&raw[..n]);
        if converted.is_empty() {
            continue;
        }
        frame_buf.extend_from_slice(&converted);

        while frame_buf.len() >= ctx.frame_size {
            let frame: Vec<f32> = frame_buf.drain(..ctx.frame_size).collect();
            ctx.tap.push(&frame);

            let chunk = encode_frame(&frame);
            match ctx.transport.send_audio(&chunk) {
                Ok(()) => {
                    ctx.diagnostics.frames_sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    // Teardown races the last few frames; only sends that
                    // fail while the session is live are worth a warning.
                    if ctx.running.load(Ordering::Relaxed) {
                        warn!("dropping capture frame: {e}");
                    }
                }
            }
        }
    }

    debug!("capture pump stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::{create_capture_ring, Producer};
    use crate::codec::{decode_pcm, EncodedChunk, PCM_MIME_16K};
    use crate::error::Result;
    use parking_lot::Mutex;
    use std::time::Instant;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<EncodedChunk>>,
    }

    impl LiveTransport for RecordingTransport {
        fn send_audio(&self, chunk: &EncodedChunk) -> Result<()> {
            self.sent.lock().push(chunk.clone());
            Ok(())
        }

        fn close(&self) {}
    }

    fn wait_for_chunks(transport: &RecordingTransport, count: usize) {
        let start = Instant::now();
        while transport.sent.lock().len() < count {
            if start.elapsed() > Duration::from_secs(2) {
                panic!("timed out waiting for {count} sent chunks");
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn frames_are_encoded_and_sent_in_capture_order() {
        let (mut producer, consumer) = create_capture_ring();
        // Ramp so ordering is visible after the PCM round trip.
        let samples: Vec<f32> = (0..1200).map(|i| i as f32 / 2048.0).collect();
        producer.push_slice(&samples);

        let transport = Arc::new(RecordingTransport::default());
        let running = Arc::new(AtomicBool::new(true));
        let mut pump = CapturePump::spawn(PumpContext {
            consumer,
            capture_rate: INPUT_SAMPLE_RATE, // passthrough — no resampling here
            frame_size: 512,
            transport: Arc::clone(&transport) as Arc<dyn LiveTransport>,
            tap: SpectrumTap::new(),
            running: Arc::clone(&running),
            diagnostics: Arc::new(SessionDiagnostics::default()),
        });

        wait_for_chunks(&transport, 2);
        pump.shutdown();

        let sent = transport.sent.lock();
        // 1200 samples → two full 512-sample frames, 176 left unframed.
        assert_eq!(sent.len(), 2);
        for chunk in sent.iter() {
            assert_eq!(chunk.mime_type, PCM_MIME_16K);
            assert_eq!(chunk.sample_count(), 512);
        }

        let first = decode_pcm(&sent[0].data, INPUT_SAMPLE_RATE).unwrap();
        let second = decode_pcm(&sent[1].data, INPUT_SAMPLE_RATE).unwrap();
        assert!((first.samples[0] - 0.0).abs() <= 1.0 / 32768.0);
        assert!((second.samples[0] - 512.0 / 2048.0).abs() <= 1.0 / 32768.0);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let (_producer, consumer) = create_capture_ring();
        let transport = Arc::new(RecordingTransport::default());
        let running = Arc::new(AtomicBool::new(true));
        let mut pump = CapturePump::spawn(PumpContext {
            consumer,
            capture_rate: INPUT_SAMPLE_RATE,
            frame_size: 512,
            transport: transport as Arc<dyn LiveTransport>,
            tap: SpectrumTap::new(),
            running,
            diagnostics: Arc::new(SessionDiagnostics::default()),
        });

        pump.shutdown();
        pump.shutdown();
    }
}
