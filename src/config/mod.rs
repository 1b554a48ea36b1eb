//! Configuration management for the Knik client

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use crate::{Error, Result};

use self::file::ClientConfigFile;

/// Backend used when nothing else is configured
pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Path of the streaming chat endpoint, relative to the API base
pub const CHAT_STREAM_PATH: &str = "/api/chat/stream";

/// Sample rate of the backend's TTS voice
pub const DEFAULT_SAMPLE_RATE: u32 = 24000;

/// Grace period before clearing the playing indicator after a turn completes
const DEFAULT_SETTLE_DELAY_MS: u64 = 1000;

const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Knik client configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the assistant backend, without trailing slash
    pub api_url: String,

    /// Chat stream configuration
    pub stream: StreamConfig,

    /// Audio playback configuration
    pub audio: AudioConfig,

    /// Media session configuration
    pub media_session: MediaSessionConfig,
}

/// Chat stream configuration
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Dispatch a synthetic completion when the body ends without a `done` frame
    pub complete_on_eof: bool,

    /// TCP connect timeout for the stream request
    pub connect_timeout: Duration,
}

/// Audio playback configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Play spoken responses
    pub enabled: bool,

    /// Output volume (0.0 to 1.0)
    pub volume: f32,

    /// Sample rate assumed when a payload carries none
    pub default_sample_rate: u32,

    /// Delay after stream completion before the playing indicator may clear.
    /// Heuristic grace period, pending product confirmation.
    pub settle_delay: Duration,
}

/// Media session configuration
#[derive(Debug, Clone)]
pub struct MediaSessionConfig {
    /// Register OS transport controls when the host supports them
    pub enabled: bool,

    /// Now-playing title
    pub title: String,

    /// Now-playing artist line
    pub artist: String,

    /// Optional artwork image
    pub artwork: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            stream: StreamConfig::default(),
            audio: AudioConfig::default(),
            media_session: MediaSessionConfig::default(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            complete_on_eof: false,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            volume: 1.0,
            default_sample_rate: DEFAULT_SAMPLE_RATE,
            settle_delay: Duration::from_millis(DEFAULT_SETTLE_DELAY_MS),
        }
    }
}

impl Default for MediaSessionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            title: "Knik AI Assistant".to_string(),
            artist: "AI Response".to_string(),
            artwork: None,
        }
    }
}

impl Config {
    /// Load configuration from the config file and environment
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is invalid
    pub fn load() -> Result<Self> {
        Self::from_sources(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed config file and an environment lookup
    ///
    /// Environment variables take precedence over the file.
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is invalid
    pub fn from_sources<F>(fc: ClientConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let api_url = env("KNIK_API_URL")
            .or(fc.server.api_url)
            .unwrap_or(defaults.api_url);

        let stream = StreamConfig {
            complete_on_eof: parse_bool_env(&env, "KNIK_COMPLETE_ON_EOF")?
                .or(fc.stream.complete_on_eof)
                .unwrap_or(defaults.stream.complete_on_eof),
            connect_timeout: fc
                .stream
                .connect_timeout_secs
                .map_or(defaults.stream.connect_timeout, Duration::from_secs),
        };

        let settle_delay_ms = match env("KNIK_SETTLE_DELAY_MS") {
            Some(raw) => Some(raw.trim().parse::<u64>().map_err(|e| {
                Error::Config(format!("invalid KNIK_SETTLE_DELAY_MS '{raw}': {e}"))
            })?),
            None => fc.audio.settle_delay_ms,
        };

        let volume = match env("KNIK_VOLUME") {
            Some(raw) => Some(
                raw.trim()
                    .parse::<f32>()
                    .map_err(|e| Error::Config(format!("invalid KNIK_VOLUME '{raw}': {e}")))?,
            ),
            None => fc.audio.volume,
        };

        let audio = AudioConfig {
            enabled: fc.audio.enabled.unwrap_or(defaults.audio.enabled),
            volume: volume.map_or(defaults.audio.volume, |v| v.clamp(0.0, 1.0)),
            default_sample_rate: fc
                .audio
                .default_sample_rate
                .unwrap_or(defaults.audio.default_sample_rate),
            settle_delay: settle_delay_ms.map_or(defaults.audio.settle_delay, Duration::from_millis),
        };

        let media_session = MediaSessionConfig {
            enabled: parse_bool_env(&env, "KNIK_MEDIA_SESSION")?
                .or(fc.media_session.enabled)
                .unwrap_or(defaults.media_session.enabled),
            title: fc
                .media_session
                .title
                .unwrap_or(defaults.media_session.title),
            artist: fc
                .media_session
                .artist
                .unwrap_or(defaults.media_session.artist),
            artwork: fc.media_session.artwork.map(PathBuf::from),
        };

        let config = Self {
            api_url: normalize_api_url(&api_url)?,
            stream,
            audio,
            media_session,
        };
        config.validate()?;
        Ok(config)
    }

    /// Full URL of the streaming chat endpoint
    #[must_use]
    pub fn chat_stream_url(&self) -> String {
        format!("{}{CHAT_STREAM_PATH}", self.api_url)
    }

    fn validate(&self) -> Result<()> {
        if self.audio.default_sample_rate == 0 {
            return Err(Error::Config(
                "audio.default_sample_rate must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Check that the API base is an absolute http(s) URL and strip trailing slashes
///
/// # Errors
///
/// Returns error if the URL cannot be parsed or uses another scheme
pub fn normalize_api_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let parsed = url::Url::parse(trimmed)
        .map_err(|e| Error::Config(format!("invalid API URL '{trimmed}': {e}")))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::Config(format!(
            "API URL must use http or https, got '{}'",
            parsed.scheme()
        )));
    }

    Ok(trimmed.trim_end_matches('/').to_string())
}

fn parse_bool_env<F>(env: &F, key: &str) -> Result<Option<bool>>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = env(key) else {
        return Ok(None);
    };

    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        other => Err(Error::Config(format!("invalid {key} '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::file::{AudioFileConfig, ServerFileConfig};
    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_sources() {
        let config = Config::from_sources(ClientConfigFile::default(), env_from(&[])).unwrap();
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.chat_stream_url(), "http://localhost:8000/api/chat/stream");
        assert_eq!(config.audio.settle_delay, Duration::from_millis(1000));
        assert!(!config.stream.complete_on_eof);
        assert!(config.media_session.enabled);
    }

    #[test]
    fn env_overrides_file() {
        let fc = ClientConfigFile {
            server: ServerFileConfig {
                api_url: Some("http://file.test".to_string()),
            },
            audio: AudioFileConfig {
                settle_delay_ms: Some(200),
                ..AudioFileConfig::default()
            },
            ..ClientConfigFile::default()
        };

        let config = Config::from_sources(
            fc,
            env_from(&[
                ("KNIK_API_URL", "https://env.test/"),
                ("KNIK_COMPLETE_ON_EOF", "yes"),
            ]),
        )
        .unwrap();

        assert_eq!(config.api_url, "https://env.test");
        assert_eq!(config.audio.settle_delay, Duration::from_millis(200));
        assert!(config.stream.complete_on_eof);
    }

    #[test]
    fn volume_is_clamped() {
        let config =
            Config::from_sources(ClientConfigFile::default(), env_from(&[("KNIK_VOLUME", "3.5")]))
                .unwrap();
        assert!((config.audio.volume - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn rejects_non_http_url() {
        let err = Config::from_sources(
            ClientConfigFile::default(),
            env_from(&[("KNIK_API_URL", "ftp://example.test")]),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn rejects_bad_bool() {
        let err = Config::from_sources(
            ClientConfigFile::default(),
            env_from(&[("KNIK_MEDIA_SESSION", "maybe")]),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
