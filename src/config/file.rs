//! TOML configuration file loading
//!
//! Supports `~/.config/knik/client.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ClientConfigFile {
    /// Backend connection
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Chat stream behavior
    #[serde(default)]
    pub stream: StreamFileConfig,

    /// Audio playback
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// OS media transport controls
    #[serde(default)]
    pub media_session: MediaSessionFileConfig,
}

/// Backend connection configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// Base URL of the assistant backend (e.g. `http://localhost:8000`)
    pub api_url: Option<String>,
}

/// Chat stream configuration
#[derive(Debug, Default, Deserialize)]
pub struct StreamFileConfig {
    /// Emit a synthetic completion when the body ends without a `done` frame
    pub complete_on_eof: Option<bool>,

    /// Connect timeout in seconds
    pub connect_timeout_secs: Option<u64>,
}

/// Audio playback configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    /// Enable spoken responses
    pub enabled: Option<bool>,

    /// Output volume (0.0 to 1.0)
    pub volume: Option<f32>,

    /// Sample rate assumed for payloads that carry none
    pub default_sample_rate: Option<u32>,

    /// Grace period before the playing indicator is cleared after a turn
    pub settle_delay_ms: Option<u64>,
}

/// Media session configuration
#[derive(Debug, Default, Deserialize)]
pub struct MediaSessionFileConfig {
    pub enabled: Option<bool>,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub artwork: Option<String>,
}

impl ClientConfigFile {
    /// Parse config file contents
    ///
    /// # Errors
    ///
    /// Returns error if the contents are not valid TOML for this schema
    pub fn parse(content: &str) -> crate::Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

/// Load the TOML config file from the standard path
///
/// Returns `ClientConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> ClientConfigFile {
    config_file_path().map_or_else(ClientConfigFile::default, |path| load_from(&path))
}

/// Load a config file from an explicit path, falling back to defaults
pub fn load_from(path: &Path) -> ClientConfigFile {
    if !path.exists() {
        return ClientConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match ClientConfigFile::parse(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                ClientConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            ClientConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/knik/client.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("knik").join("client.toml"))
}
