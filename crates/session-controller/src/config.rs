//! Session controller configuration.
//!
//! Service-level settings are loaded from environment variables in the
//! usual way; per-call settings (`RoomConfig`, `MediaConfig`) are built by
//! the caller for each session.

use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default room directory server.
pub const DEFAULT_ROOM_SERVER_URL: &str = "https://appr.tc";

/// Default HTTP request timeout in seconds (room resolution, relay posts).
pub const DEFAULT_HTTP_TIMEOUT_SECONDS: u64 = 10;

/// Default HTTP connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECONDS: u64 = 5;

/// Default bounded wait for the channel close acknowledgment, milliseconds.
pub const DEFAULT_CHANNEL_CLOSE_TIMEOUT_MS: u64 = 1000;

/// Supported video codec names as the caller writes them.
pub const VIDEO_CODEC_VP8: &str = "VP8";
pub const VIDEO_CODEC_VP9: &str = "VP9";
pub const VIDEO_CODEC_H264: &str = "H264";
pub const VIDEO_CODEC_H264_BASELINE: &str = "H264 Baseline";
pub const VIDEO_CODEC_H264_HIGH: &str = "H264 High";
pub const VIDEO_CODEC_AV1: &str = "AV1";

/// Supported audio codec names.
pub const AUDIO_CODEC_OPUS: &str = "OPUS";
pub const AUDIO_CODEC_ISAC: &str = "ISAC";

/// Service-level configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Room directory server base URL.
    pub room_server_url: String,

    /// HTTP request timeout.
    pub http_timeout: Duration,

    /// HTTP connect timeout.
    pub connect_timeout: Duration,

    /// Bounded wait for the channel close acknowledgment.
    pub channel_close_timeout: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error when a variable holds an unparseable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error when a variable holds an unparseable value.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let room_server_url = vars
            .get("PARLEY_ROOM_SERVER_URL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_ROOM_SERVER_URL.to_string());

        let http_timeout = Duration::from_secs(parse_or_default(
            vars,
            "PARLEY_HTTP_TIMEOUT_SECONDS",
            DEFAULT_HTTP_TIMEOUT_SECONDS,
        )?);

        let connect_timeout = Duration::from_secs(parse_or_default(
            vars,
            "PARLEY_CONNECT_TIMEOUT_SECONDS",
            DEFAULT_CONNECT_TIMEOUT_SECONDS,
        )?);

        let channel_close_timeout = Duration::from_millis(parse_or_default(
            vars,
            "PARLEY_CHANNEL_CLOSE_TIMEOUT_MS",
            DEFAULT_CHANNEL_CLOSE_TIMEOUT_MS,
        )?);

        Ok(Config {
            room_server_url,
            http_timeout,
            connect_timeout,
            channel_close_timeout,
        })
    }
}

fn parse_or_default(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    match vars.get(name) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{name}={raw}"))),
    }
}

/// Per-session room connection settings.
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// Room directory server base URL.
    pub room_url: String,
    /// Human-chosen room identifier.
    pub room_id: String,
    /// Test-harness mode: this peer talks to itself.
    pub loopback: bool,
}

/// Per-session media negotiation preferences.
///
/// These only shape SDP text; the engine does the actual media work.
#[derive(Debug, Clone)]
pub struct MediaConfig {
    /// Whether the session negotiates video at all.
    pub video_call_enabled: bool,
    /// Preferred video codec, one of the `VIDEO_CODEC_*` names.
    pub video_codec: String,
    /// Preferred audio codec, one of the `AUDIO_CODEC_*` names.
    pub audio_codec: String,
    /// Initial audio bitrate in kbit/s; 0 leaves the engine default.
    pub audio_start_bitrate_kbps: u32,
    /// Initial video bitrate in kbit/s; 0 leaves the engine default.
    pub video_start_bitrate_kbps: u32,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            video_call_enabled: true,
            video_codec: VIDEO_CODEC_VP8.to_string(),
            audio_codec: AUDIO_CODEC_OPUS.to_string(),
            audio_start_bitrate_kbps: 0,
            video_start_bitrate_kbps: 0,
        }
    }
}

impl MediaConfig {
    /// The codec name as it appears in SDP rtpmap lines.
    ///
    /// The H264 profile variants share one rtpmap name.
    #[must_use]
    pub fn sdp_video_codec_name(&self) -> &str {
        match self.video_codec.as_str() {
            VIDEO_CODEC_VP9 => VIDEO_CODEC_VP9,
            VIDEO_CODEC_AV1 => VIDEO_CODEC_AV1,
            VIDEO_CODEC_H264 | VIDEO_CODEC_H264_BASELINE | VIDEO_CODEC_H264_HIGH => {
                VIDEO_CODEC_H264
            }
            _ => VIDEO_CODEC_VP8,
        }
    }

    /// Whether the audio preference asks for ISAC over the default codec.
    #[must_use]
    pub fn prefers_isac(&self) -> bool {
        self.audio_codec == AUDIO_CODEC_ISAC
    }
}

/// Everything a single session needs at spawn time.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub room: RoomConfig,
    pub media: MediaConfig,
    /// Bounded wait for the channel close acknowledgment.
    pub channel_close_timeout: Duration,
}

impl SessionConfig {
    /// Build a session config from the service config and room choice.
    #[must_use]
    pub fn new(config: &Config, room_id: impl Into<String>, loopback: bool) -> Self {
        Self {
            room: RoomConfig {
                room_url: config.room_server_url.clone(),
                room_id: room_id.into(),
                loopback,
            },
            media: MediaConfig::default(),
            channel_close_timeout: config.channel_close_timeout,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vars_defaults() {
        let config = Config::from_vars(&HashMap::new()).expect("defaults should load");

        assert_eq!(config.room_server_url, DEFAULT_ROOM_SERVER_URL);
        assert_eq!(
            config.http_timeout,
            Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECONDS)
        );
        assert_eq!(
            config.connect_timeout,
            Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECONDS)
        );
        assert_eq!(
            config.channel_close_timeout,
            Duration::from_millis(DEFAULT_CHANNEL_CLOSE_TIMEOUT_MS)
        );
    }

    #[test]
    fn test_from_vars_custom_values() {
        let vars = HashMap::from([
            (
                "PARLEY_ROOM_SERVER_URL".to_string(),
                "https://rooms.example.org".to_string(),
            ),
            ("PARLEY_HTTP_TIMEOUT_SECONDS".to_string(), "3".to_string()),
            (
                "PARLEY_CHANNEL_CLOSE_TIMEOUT_MS".to_string(),
                "250".to_string(),
            ),
        ]);

        let config = Config::from_vars(&vars).expect("custom values should load");
        assert_eq!(config.room_server_url, "https://rooms.example.org");
        assert_eq!(config.http_timeout, Duration::from_secs(3));
        assert_eq!(config.channel_close_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_from_vars_invalid_value() {
        let vars = HashMap::from([(
            "PARLEY_HTTP_TIMEOUT_SECONDS".to_string(),
            "soon".to_string(),
        )]);

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(v)) if v.contains("soon")));
    }

    #[test]
    fn test_sdp_video_codec_name() {
        let mut media = MediaConfig::default();
        assert_eq!(media.sdp_video_codec_name(), VIDEO_CODEC_VP8);

        media.video_codec = VIDEO_CODEC_H264_HIGH.to_string();
        assert_eq!(media.sdp_video_codec_name(), VIDEO_CODEC_H264);

        media.video_codec = VIDEO_CODEC_H264_BASELINE.to_string();
        assert_eq!(media.sdp_video_codec_name(), VIDEO_CODEC_H264);

        media.video_codec = "something else".to_string();
        assert_eq!(media.sdp_video_codec_name(), VIDEO_CODEC_VP8);
    }

    #[test]
    fn test_prefers_isac() {
        let mut media = MediaConfig::default();
        assert!(!media.prefers_isac());
        media.audio_codec = AUDIO_CODEC_ISAC.to_string();
        assert!(media.prefers_isac());
    }
}
