use thiserror::Error;

/// All errors produced by liveqa-core.
#[derive(Debug, Error)]
pub enum LiveQaError {
    #[error("microphone unavailable or access denied: {0}")]
    Permission(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("malformed audio chunk: {0}")]
    Decode(String),

    #[error("a session is already active")]
    AlreadyActive,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, LiveQaError>;
