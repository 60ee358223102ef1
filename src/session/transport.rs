//! Remote endpoint boundary.
//!
//! The conversational endpoint is an injected collaborator: the session
//! only sees the [`LiveConnector`] / [`LiveTransport`] capability traits
//! plus a channel of validated [`ServerEvent`]s. Concrete transports
//! (websocket, test fakes) live behind this seam.
//!
//! The endpoint's wire messages are loosely shaped JSON; everything is
//! validated here, at the boundary, before it can reach the state machine.

use std::sync::Arc;

use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::codec::{decode_base64_payload, EncodedChunk};
use crate::error::{LiveQaError, Result};
use crate::session::events::ServerEvent;

/// Default conversational model.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

/// Default prebuilt voice for synthesized responses.
pub const DEFAULT_VOICE: &str = "Zephyr";

/// Response modality requested at connect time. Only audio is in scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseModality {
    Audio,
}

/// Parameters for the connect request.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Model identifier.
    pub model: String,
    /// System/persona instruction (built by the caller from its analysis
    /// context — content is out of scope here).
    pub system_instruction: String,
    /// Prebuilt voice name.
    pub voice: String,
    pub response_modality: ResponseModality,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.into(),
            system_instruction: String::new(),
            voice: DEFAULT_VOICE.into(),
            response_modality: ResponseModality::Audio,
        }
    }
}

impl ConnectConfig {
    /// The JSON setup payload a transport sends on connect.
    pub fn setup_payload(&self) -> serde_json::Value {
        json!({
            "model": self.model,
            "config": {
                "systemInstruction": self.system_instruction,
                "responseModalities": [self.response_modality],
                "speechConfig": {
                    "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": self.voice } }
                },
            },
        })
    }
}

/// Outbound half of a live connection.
pub trait LiveTransport: Send + Sync {
    /// Send one encoded microphone chunk. Fire-and-forget: must return
    /// promptly, and failures mean "this frame was dropped", nothing more.
    fn send_audio(&self, chunk: &EncodedChunk) -> Result<()>;

    /// Close the connection. Idempotent; sends after close fail.
    fn close(&self);
}

/// Establishes live connections.
///
/// `connect` returns the outbound handle plus the channel on which the
/// transport delivers validated server events. Dropping the sender half
/// (channel disconnect) without a prior [`ServerEvent::Closed`] is treated
/// by the session as an unexpected connection loss.
pub trait LiveConnector: Send + Sync {
    fn connect(&self, config: &ConnectConfig)
        -> Result<(Arc<dyn LiveTransport>, Receiver<ServerEvent>)>;
}

// ---------------------------------------------------------------------------
// Wire message validation
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    server_content: Option<ServerContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    model_turn: Option<ModelTurn>,
    #[serde(default)]
    interrupted: bool,
}

#[derive(Debug, Deserialize)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
struct InlineData {
    data: String,
}

/// Decode one wire message into zero or more validated events.
///
/// Audio parts come out before an `Interrupted` flag carried by the same
/// message, matching the endpoint's semantics (the interrupted flag cancels
/// everything scheduled so far, including audio in this message).
///
/// # Errors
/// `LiveQaError::Decode` on malformed JSON or malformed base64 audio. The
/// caller drops the message; this is never session-fatal.
pub fn parse_server_message(text: &str) -> Result<Vec<ServerEvent>> {
    let message: ServerMessage = serde_json::from_str(text)
        .map_err(|e| LiveQaError::Decode(format!("malformed server message: {e}")))?;

    let mut events = Vec::new();

    if let Some(content) = message.server_content {
        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                if let Some(inline) = part.inline_data {
                    events.push(ServerEvent::Audio {
                        data: decode_base64_payload(&inline.data)?,
                    });
                }
            }
        }
        if content.interrupted {
            events.push(ServerEvent::Interrupted);
        }
    }

    Ok(events)
}
