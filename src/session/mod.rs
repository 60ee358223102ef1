//! `LiveSession` — lifecycle controller for one live Q&A session.
//!
//! ## Lifecycle
//!
//! ```text
//! LiveSession::new()
//!     └─► start()   → mic + output opened, connect issued, state = Connecting
//!         │              └─ endpoint open event → capture pump spawned,
//!         │                 scheduler wired to the output clock, Connected
//!         └─► stop()    → running = false, full teardown, state = Idle
//! ```
//!
//! Endpoint error and close events land in the terminal `Error` / `Closed`
//! states; a terminal session is never resurrected — retrying means a fresh
//! `start()` after the previous instance tore down.
//!
//! ## Threading
//!
//! All session logic runs on one `spawn_blocking` event loop that consumes
//! validated [`ServerEvent`]s from the transport. cpal streams are `!Send`,
//! so both audio devices are opened and dropped inside that loop, never
//! crossing a thread boundary. A sync oneshot channel propagates resource
//! acquisition errors back to the `start()` caller.
//!
//! ## Teardown
//!
//! Every path out of Connecting/Connected runs the same teardown sequence:
//! stop capture, join the pump, close the transport, reset the scheduler,
//! close the output device. Each step is idempotent and per-resource
//! release failures are logged and swallowed, so one stubborn resource
//! never leaks the others.

pub mod events;
pub mod transport;

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::buffering::create_capture_ring;
use crate::capture::{pump::CapturePump, pump::PumpContext, CaptureBackend};
use crate::codec::{decode_pcm, OUTPUT_SAMPLE_RATE};
use crate::error::{LiveQaError, Result};
use crate::playback::{OutputBackend, PlaybackOutput, PlaybackScheduler};
use crate::spectrum::SpectrumTap;

use events::{ServerEvent, SessionState, SessionStatusEvent};
use transport::{ConnectConfig, LiveConnector};

/// Broadcast capacity for status events.
const BROADCAST_CAP: usize = 64;

/// Event-loop tick while no server event is pending. Also the cadence at
/// which naturally finished playback units are pruned.
const EVENT_POLL: Duration = Duration::from_millis(50);

/// How long `start()` waits for a previous loop to finish its teardown.
const RESTART_WAIT: Duration = Duration::from_secs(2);

/// Configuration for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Connect request parameters (model, persona, voice).
    pub connect: ConnectConfig,
    /// Samples per encoded capture frame at 16 kHz. Default: 4096.
    pub frame_size: usize,
    /// Input device name override; `None` uses the system default.
    pub preferred_input_device: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect: ConnectConfig::default(),
            frame_size: 4096,
            preferred_input_device: None,
        }
    }
}

/// Shared counters for observability.
#[derive(Debug, Default)]
pub struct SessionDiagnostics {
    pub frames_sent: AtomicUsize,
    pub chunks_received: AtomicUsize,
    pub chunks_dropped: AtomicUsize,
    pub interrupts: AtomicUsize,
}

impl SessionDiagnostics {
    /// Zero all counters. Called when a fresh session starts so a snapshot
    /// never mixes two sessions.
    pub fn reset(&self) {
        self.frames_sent.store(0, Ordering::Relaxed);
        self.chunks_received.store(0, Ordering::Relaxed);
        self.chunks_dropped.store(0, Ordering::Relaxed);
        self.interrupts.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            chunks_received: self.chunks_received.load(Ordering::Relaxed),
            chunks_dropped: self.chunks_dropped.load(Ordering::Relaxed),
            interrupts: self.interrupts.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    pub frames_sent: usize,
    pub chunks_received: usize,
    pub chunks_dropped: usize,
    pub interrupts: usize,
}

/// The session handle.
///
/// `Send + Sync` — all fields use interior mutability, so the handle can be
/// shared between UI state and event-forwarding tasks via `Arc`.
pub struct LiveSession {
    config: SessionConfig,
    connector: Arc<dyn LiveConnector>,
    capture_backend: Arc<dyn CaptureBackend>,
    output_backend: Arc<dyn OutputBackend>,
    /// Signals of the most recent event loop, if any was started.
    live: Mutex<Option<LoopHandle>>,
    state: Arc<Mutex<SessionState>>,
    status_tx: broadcast::Sender<SessionStatusEvent>,
    /// Mirror of "the playback active set is non-empty".
    speaking: Arc<AtomicBool>,
    capture_tap: SpectrumTap,
    playback_tap: SpectrumTap,
    diagnostics: Arc<SessionDiagnostics>,
}

/// Per-loop signal pair. Each `start()` creates a fresh pair, so a stale
/// loop can never observe or clobber its successor's flags.
struct LoopHandle {
    /// `true` until stop is requested or teardown begins.
    running: Arc<AtomicBool>,
    /// Set by the loop task as its very last action, after teardown.
    done: Arc<AtomicBool>,
}

impl LiveSession {
    /// Create a session with explicit audio backends (tests, headless).
    pub fn new(
        config: SessionConfig,
        connector: Arc<dyn LiveConnector>,
        capture_backend: Arc<dyn CaptureBackend>,
        output_backend: Arc<dyn OutputBackend>,
    ) -> Self {
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        Self {
            config,
            connector,
            capture_backend,
            output_backend,
            live: Mutex::new(None),
            state: Arc::new(Mutex::new(SessionState::Idle)),
            status_tx,
            speaking: Arc::new(AtomicBool::new(false)),
            capture_tap: SpectrumTap::new(),
            playback_tap: SpectrumTap::new(),
            diagnostics: Arc::new(SessionDiagnostics::default()),
        }
    }

    /// Create a session using the system microphone and speaker.
    #[cfg(feature = "audio-cpal")]
    pub fn with_default_audio(config: SessionConfig, connector: Arc<dyn LiveConnector>) -> Self {
        Self::new(
            config,
            connector,
            Arc::new(crate::capture::MicBackend),
            Arc::new(crate::playback::SpeakerBackend),
        )
    }

    /// Start the session: acquire the microphone and output device, issue
    /// the connect request, and run the event loop in the background.
    ///
    /// Blocks until resource acquisition is confirmed (or fails), i.e.
    /// returns with the session in Connecting. The Connected transition
    /// happens when the endpoint's open event arrives.
    ///
    /// # Errors
    /// - `LiveQaError::AlreadyActive` if a session is already live, or a
    ///   stopped one is still mid-teardown past the restart grace period.
    /// - `LiveQaError::Permission` / `NoDefaultInputDevice` on microphone
    ///   failure, `AudioDevice`/`AudioStream` on output failure,
    ///   `Connection` if the connect call is rejected. Resource errors
    ///   leave the session in the terminal Error state.
    pub fn start(&self) -> Result<()> {
        let mut live = self.live.lock();

        if let Some(previous) = live.as_ref() {
            if previous.running.load(Ordering::SeqCst) {
                return Err(LiveQaError::AlreadyActive);
            }
            // The previous loop was told to stop (or ended on its own) but
            // may still be mid-teardown; wait it out so two loops never
            // hold the audio devices at once.
            let deadline = Instant::now() + RESTART_WAIT;
            while !previous.done.load(Ordering::SeqCst) {
                if Instant::now() > deadline {
                    warn!("previous session loop still tearing down");
                    return Err(LiveQaError::AlreadyActive);
                }
                std::thread::sleep(Duration::from_millis(2));
            }
        }

        let running = Arc::new(AtomicBool::new(true));
        let done = Arc::new(AtomicBool::new(false));
        *live = Some(LoopHandle {
            running: Arc::clone(&running),
            done: Arc::clone(&done),
        });

        self.diagnostics.reset();
        self.set_state(SessionState::Connecting, None);

        let ctx = SessionContext {
            config: self.config.clone(),
            connector: Arc::clone(&self.connector),
            capture_backend: Arc::clone(&self.capture_backend),
            output_backend: Arc::clone(&self.output_backend),
            running: Arc::clone(&running),
            state: Arc::clone(&self.state),
            status_tx: self.status_tx.clone(),
            speaking: Arc::clone(&self.speaking),
            capture_tap: self.capture_tap.clone(),
            playback_tap: self.playback_tap.clone(),
            diagnostics: Arc::clone(&self.diagnostics),
        };

        // Sync oneshot: the event-loop thread confirms resource acquisition.
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<()>>();

        tokio::task::spawn_blocking(move || {
            run_session(ctx, open_tx);
            done.store(true, Ordering::SeqCst);
        });

        match open_rx.recv() {
            Ok(Ok(())) => {
                info!("session starting — connecting to endpoint");
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                // Channel closed without a message — the loop thread died.
                running.store(false, Ordering::SeqCst);
                self.set_state(SessionState::Error, Some("session task died".into()));
                Err(LiveQaError::Other(anyhow::anyhow!(
                    "session task died unexpectedly"
                )))
            }
        }
    }

    /// Request teardown. Returns once the stop is signalled; the event loop
    /// finishes teardown and moves the state to Idle.
    ///
    /// A no-op when no session is live, so redundant triggers (UI unmount
    /// plus explicit stop) are always safe.
    pub fn stop(&self) -> Result<()> {
        if let Some(live) = self.live.lock().as_ref() {
            if live.running.swap(false, Ordering::SeqCst) {
                info!("session stop requested");
            }
        }
        Ok(())
    }

    /// Current lifecycle state (snapshot).
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Subscribe to state-change events.
    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.status_tx.subscribe()
    }

    /// `true` while any synthesized audio is scheduled or playing.
    pub fn is_model_speaking(&self) -> bool {
        self.speaking.load(Ordering::Acquire)
    }

    /// Spectrum snapshot of the microphone path (128 bins).
    pub fn capture_spectrum(&self) -> Vec<f32> {
        self.capture_tap.snapshot()
    }

    /// Spectrum snapshot of the playback path (128 bins).
    pub fn playback_spectrum(&self) -> Vec<f32> {
        self.playback_tap.snapshot()
    }

    /// Counter snapshot for observability.
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    fn set_state(&self, state: SessionState, detail: Option<String>) {
        *self.state.lock() = state;
        let _ = self.status_tx.send(SessionStatusEvent { state, detail });
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Everything the event loop needs, cloned out of the handle.
struct SessionContext {
    config: SessionConfig,
    connector: Arc<dyn LiveConnector>,
    capture_backend: Arc<dyn CaptureBackend>,
    output_backend: Arc<dyn OutputBackend>,
    running: Arc<AtomicBool>,
    state: Arc<Mutex<SessionState>>,
    status_tx: broadcast::Sender<SessionStatusEvent>,
    speaking: Arc<AtomicBool>,
    capture_tap: SpectrumTap,
    playback_tap: SpectrumTap,
    diagnostics: Arc<SessionDiagnostics>,
}

impl SessionContext {
    fn set_state(&self, state: SessionState, detail: Option<String>) {
        *self.state.lock() = state;
        let _ = self.status_tx.send(SessionStatusEvent { state, detail });
    }
}

/// The blocking event loop. Owns every session resource from acquisition
/// to teardown.
fn run_session(ctx: SessionContext, open_tx: std::sync::mpsc::Sender<Result<()>>) {
    // ── Acquire resources (this thread owns the !Send audio streams) ──────
    let (producer, consumer) = create_capture_ring();
    let capturing = Arc::new(AtomicBool::new(false));

    let capture = match ctx.capture_backend.open(
        producer,
        Arc::clone(&capturing),
        ctx.config.preferred_input_device.as_deref(),
    ) {
        Ok(c) => c,
        Err(e) => {
            fail_start(&ctx, open_tx, e);
            return;
        }
    };

    let PlaybackOutput {
        sink,
        clock,
        mut device,
    } = match ctx.output_backend.open(OUTPUT_SAMPLE_RATE) {
        Ok(o) => o,
        Err(e) => {
            capture.stop();
            fail_start(&ctx, open_tx, e);
            return;
        }
    };

    let (transport, server_events) = match ctx.connector.connect(&ctx.config.connect) {
        Ok(pair) => pair,
        Err(e) => {
            capture.stop();
            device.close();
            fail_start(&ctx, open_tx, e);
            return;
        }
    };

    let _ = open_tx.send(Ok(()));

    let mut scheduler = PlaybackScheduler::new(
        sink,
        ctx.playback_tap.clone(),
        Arc::clone(&ctx.speaking),
    );

    let mut pump: Option<CapturePump> = None;
    let mut consumer = Some(consumer);
    let mut user_stop = false;

    // ── Event loop ────────────────────────────────────────────────────────
    loop {
        if !ctx.running.load(Ordering::Relaxed) {
            user_stop = true;
            break;
        }

        match server_events.recv_timeout(EVENT_POLL) {
            Ok(ServerEvent::Open) => {
                if pump.is_none() {
                    info!("endpoint open — session connected");
                    scheduler.attach_clock(Arc::clone(&clock));
                    capturing.store(true, Ordering::Release);
                    if let Some(consumer) = consumer.take() {
                        pump = Some(CapturePump::spawn(PumpContext {
                            consumer,
                            capture_rate: capture.sample_rate(),
                            frame_size: ctx.config.frame_size,
                            transport: Arc::clone(&transport),
                            tap: ctx.capture_tap.clone(),
                            running: Arc::clone(&ctx.running),
                            diagnostics: Arc::clone(&ctx.diagnostics),
                        }));
                    }
                    ctx.set_state(SessionState::Connected, None);
                }
            }
            Ok(ServerEvent::Audio { data }) => match decode_pcm(&data, OUTPUT_SAMPLE_RATE) {
                Ok(unit) => {
                    ctx.diagnostics.chunks_received.fetch_add(1, Ordering::Relaxed);
                    scheduler.enqueue(unit);
                }
                Err(e) => {
                    // Corrupt chunk: drop it, keep the session alive.
                    ctx.diagnostics.chunks_dropped.fetch_add(1, Ordering::Relaxed);
                    warn!("dropping audio chunk: {e}");
                }
            },
            Ok(ServerEvent::Interrupted) => {
                ctx.diagnostics.interrupts.fetch_add(1, Ordering::Relaxed);
                scheduler.interrupt();
            }
            Ok(ServerEvent::Error { reason }) => {
                error!("endpoint error: {reason}");
                ctx.set_state(SessionState::Error, Some(reason));
                break;
            }
            Ok(ServerEvent::Closed) => {
                info!("endpoint closed the session");
                ctx.set_state(SessionState::Closed, None);
                break;
            }
            Err(RecvTimeoutError::Timeout) => {
                scheduler.poll();
            }
            Err(RecvTimeoutError::Disconnected) => {
                warn!("transport event channel dropped without a close event");
                ctx.set_state(SessionState::Error, Some("connection lost".into()));
                break;
            }
        }
    }

    // ── Teardown (idempotent; every release failure is local) ─────────────
    ctx.running.store(false, Ordering::SeqCst);
    capturing.store(false, Ordering::Release);
    capture.stop();
    if let Some(mut p) = pump.take() {
        p.shutdown();
    }
    transport.close();
    scheduler.reset();
    device.close();

    if user_stop {
        ctx.set_state(SessionState::Idle, None);
    }
    debug!("session torn down");
}

/// Resource acquisition failed before the loop started: flag the terminal
/// state and hand the error back to `start()`.
fn fail_start(ctx: &SessionContext, open_tx: std::sync::mpsc::Sender<Result<()>>, e: LiveQaError) {
    error!("failed to start session: {e}");
    ctx.running.store(false, Ordering::SeqCst);
    ctx.set_state(SessionState::Error, Some(e.to_string()));
    let _ = open_tx.send(Err(e));
}
