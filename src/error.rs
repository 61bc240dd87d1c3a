//! Error types for Alma gateway

use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the gateway
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio conversion error
    #[error("audio error: {0}")]
    Audio(String),

    /// Inbound audio frame rejected
    #[error("invalid audio frame: {0}")]
    Frame(#[from] crate::audio::FrameError),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Chat completion error
    #[error("chat error: {0}")]
    Chat(String),

    /// Session lifecycle error (closed channels, torn-down peers)
    #[error("session error: {0}")]
    Session(String),

    /// Peer connection negotiation error
    #[error("signaling error: {0}")]
    Signaling(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
