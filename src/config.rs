//! Configuration for the Lyra voice client
//!
//! Settings merge in three layers: built-in defaults, then an optional TOML
//! file, then environment variables. The endpoint API key is accepted from
//! the environment only; a key in the config file is ignored.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Client configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Remote speech endpoint
    pub endpoint: EndpointConfig,

    /// Microphone capture settings
    pub capture: CaptureConfig,

    /// Outbound batching settings
    pub batch: BatchConfig,

    /// Speaker playback settings
    pub playback: PlaybackConfig,
}

/// Remote speech endpoint settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// WebSocket URL of the speech-to-speech endpoint
    pub url: String,

    /// API key, sent as a bearer header during the handshake
    ///
    /// Environment only (`LYRA_API_KEY`). Never read from the config file.
    #[serde(skip)]
    pub api_key: Option<String>,

    /// Model identifier announced in the session setup frame
    pub model: Option<String>,

    /// Voice identifier announced in the session setup frame
    pub voice: Option<String>,
}

/// Microphone capture settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Target sample rate for outbound audio in Hz
    pub sample_rate: u32,

    /// Samples per capture frame handed to the session
    pub frame_len: usize,

    /// Request echo cancellation from the audio host where supported
    pub echo_cancellation: bool,

    /// Request noise suppression from the audio host where supported
    pub noise_suppression: bool,

    /// Request automatic gain control from the audio host where supported
    pub auto_gain: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            frame_len: 4096,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain: true,
        }
    }
}

/// Outbound batching settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Minimum samples before a flush is worthwhile (~100 ms at 16 kHz)
    pub min_flush_samples: usize,

    /// Hard cap on pending samples (~1 s at 16 kHz); overflow is discarded
    pub max_pending_samples: usize,

    /// Backstop flush interval in milliseconds
    pub flush_interval_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            min_flush_samples: 1600,
            max_pending_samples: 16_000,
            flush_interval_ms: 500,
        }
    }
}

/// Speaker playback settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Sample rate of the playback path in Hz; inbound audio at other rates
    /// is resampled to this
    pub sample_rate: u32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
        }
    }
}

/// Return the platform config directory, creating it if needed
///
/// Uses `~/.config/omni/lyra/` on Linux
pub fn config_dir() -> PathBuf {
    let dir = directories::ProjectDirs::from("dev", "omni", "omni").map_or_else(
        || PathBuf::from(".config/lyra"),
        |d| d.config_dir().join("lyra"),
    );

    if let Err(e) = std::fs::create_dir_all(&dir) {
        tracing::warn!(
            path = %dir.display(),
            error = %e,
            "failed to create config directory"
        );
    }

    dir
}

impl Config {
    /// Load configuration, merging defaults, the TOML file, and environment
    ///
    /// `path` overrides the default file location
    /// (`config.toml` under [`config_dir`]).
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read or
    /// parsed. A missing file is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = path.map_or_else(|| config_dir().join("config.toml"), Path::to_path_buf);

        let mut config = if file.exists() {
            let content = std::fs::read_to_string(&file)?;
            let config: Self = toml::from_str(&content)?;
            tracing::debug!(path = %file.display(), "loaded config file");
            config
        } else {
            tracing::debug!(path = %file.display(), "no config file, using defaults");
            Self::default()
        };

        config.apply_env();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("LYRA_ENDPOINT_URL") {
            self.endpoint.url = url;
        }
        if let Ok(model) = std::env::var("LYRA_MODEL") {
            self.endpoint.model = Some(model);
        }
        if let Ok(voice) = std::env::var("LYRA_VOICE") {
            self.endpoint.voice = Some(voice);
        }
        self.endpoint.api_key = std::env::var("LYRA_API_KEY").ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_streaming_contract() {
        let config = Config::default();
        assert_eq!(config.capture.sample_rate, 16_000);
        assert_eq!(config.capture.frame_len, 4096);
        assert_eq!(config.batch.min_flush_samples, 1600);
        assert_eq!(config.batch.max_pending_samples, 16_000);
        assert_eq!(config.batch.flush_interval_ms, 500);
        assert_eq!(config.playback.sample_rate, 24_000);
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let config: Config = toml::from_str(
            r#"
            [endpoint]
            url = "wss://example.test/v1/stream"
            model = "aria-2"

            [batch]
            flush_interval_ms = 250
            "#,
        )
        .expect("valid config");

        assert_eq!(config.endpoint.url, "wss://example.test/v1/stream");
        assert_eq!(config.endpoint.model.as_deref(), Some("aria-2"));
        assert_eq!(config.batch.flush_interval_ms, 250);
        assert_eq!(config.batch.min_flush_samples, 1600);
        assert_eq!(config.capture.frame_len, 4096);
    }

    #[test]
    fn api_key_in_file_is_ignored() {
        let config: Config = toml::from_str(
            r#"
            [endpoint]
            url = "wss://example.test/v1/stream"
            api_key = "should-not-load"
            "#,
        )
        .expect("valid config");

        assert_eq!(config.endpoint.api_key, None);
    }
}
