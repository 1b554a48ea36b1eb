//! Error types for the Knik client

use thiserror::Error;

/// Result type alias for Knik client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the Knik client
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio payload could not be decoded
    #[error("decode error: {0}")]
    Decode(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Playback of a chunk failed after it was accepted
    #[error("playback error: {0}")]
    Playback(String),

    /// OS media transport controls error
    #[error("media session error: {0}")]
    MediaSession(String),

    /// A chat turn is already streaming
    #[error("a response is already streaming")]
    Busy,

    /// Chat input was blank
    #[error("message is empty")]
    EmptyMessage,

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

    /// Base64 payload error
    #[error("base64 error: {0}")]
    Base64(#[from] base64::DecodeError),
}
