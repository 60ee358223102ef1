//! Session state and event types.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a live session.
///
/// Exactly one per session instance. `Error` and `Closed` are terminal for
/// that instance; retrying means starting a fresh session, which begins
/// again from `Idle` → `Connecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No session active; ready to start.
    Idle,
    /// Resources acquired, waiting for the endpoint's open event.
    Connecting,
    /// Bidirectional audio flowing.
    Connected,
    /// Session-fatal failure (permission or connection). Terminal.
    Error,
    /// Endpoint closed the session. Terminal.
    Closed,
}

/// Broadcast whenever the session state changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusEvent {
    pub state: SessionState,
    /// Optional human-readable detail (e.g. error message for the UI).
    pub detail: Option<String>,
}

/// Validated event from the remote endpoint.
///
/// The endpoint's wire messages are loose JSON; the transport layer decodes
/// them into this tagged variant before anything enters the state machine
/// (see [`crate::session::transport::parse_server_message`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// Connection is ready; capture may begin.
    Open,
    /// One chunk of synthesized speech, raw 16-bit LE PCM at 24 kHz.
    Audio { data: Vec<u8> },
    /// The user started speaking over the model — halt playback now.
    Interrupted,
    /// Endpoint-reported failure; session-fatal.
    Error { reason: String },
    /// Endpoint closed the session normally.
    Closed,
}
