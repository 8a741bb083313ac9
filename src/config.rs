//! Configuration management for Avatalk
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::error::{AvatalkError, Result};
use crate::renderer::RenderMode;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Smallest session duration the hosting service accepts (seconds)
pub const MIN_SESSION_DURATION_SECS: u32 = 1;
/// Largest session duration the hosting service accepts (seconds)
pub const MAX_SESSION_DURATION_SECS: u32 = 3600;

/// Main configuration structure for Avatalk
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Avatar and session settings
    #[serde(default)]
    pub avatar: AvatarConfig,
    /// Endpoints of the proxy and the streaming SDK server
    #[serde(default)]
    pub api: ApiConfig,
    /// Typing-effect settings
    #[serde(default)]
    pub renderer: RendererConfig,
    /// Session timer settings
    #[serde(default)]
    pub timer: TimerConfig,
    /// Stream proxy server settings
    #[serde(default)]
    pub proxy: ProxyConfig,
}

/// Avatar session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvatarConfig {
    /// Avatar to host
    #[serde(default)]
    pub avatar_id: String,

    /// Language code the avatar speaks and the user is transcribed in
    #[serde(default = "default_language")]
    pub language: String,

    /// Session duration in seconds (1..=3600)
    #[serde(default = "default_max_duration")]
    pub max_duration_secs: u32,

    /// Unmute the microphone as soon as the room is joined
    #[serde(default = "default_unmute_on_joined")]
    pub unmute_user_audio_on_joined: bool,

    /// Text the avatar speaks right after joining
    #[serde(default)]
    pub welcome_message: Option<String>,
}

fn default_language() -> String {
    "ko".to_string()
}

fn default_max_duration() -> u32 {
    300
}

fn default_unmute_on_joined() -> bool {
    true
}

impl Default for AvatarConfig {
    fn default() -> Self {
        Self {
            avatar_id: String::new(),
            language: default_language(),
            max_duration_secs: default_max_duration(),
            unmute_user_audio_on_joined: default_unmute_on_joined(),
            welcome_message: None,
        }
    }
}

/// Endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the stream proxy (serves `/api/streams`)
    #[serde(default = "default_proxy_url")]
    pub proxy_url: String,

    /// Streaming SDK server the room binds to
    #[serde(default)]
    pub server_url: String,

    /// Provisioning request timeout (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_proxy_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            proxy_url: default_proxy_url(),
            server_url: String::new(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Typing-effect variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderStyle {
    /// One character at a time
    #[default]
    Character,
    /// One sentence at a time
    Sentence,
}

impl std::str::FromStr for RenderStyle {
    type Err = AvatalkError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "character" | "char" => Ok(RenderStyle::Character),
            "sentence" => Ok(RenderStyle::Sentence),
            other => Err(AvatalkError::Config(format!(
                "Invalid render style: {}. Must be one of: character, sentence",
                other
            ))),
        }
    }
}

/// Renderer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendererConfig {
    /// Typing-effect variant
    #[serde(default)]
    pub style: RenderStyle,

    /// Per-character delay in character style (ms)
    #[serde(default = "default_character_interval")]
    pub character_interval_ms: u64,

    /// Per-character delay in sentence style (ms)
    #[serde(default = "default_sentence_interval")]
    pub sentence_interval_ms: u64,

    /// Pause between sentences in sentence style (ms)
    #[serde(default = "default_sentence_pause")]
    pub sentence_pause_ms: u64,
}

fn default_character_interval() -> u64 {
    40
}

fn default_sentence_interval() -> u64 {
    110
}

fn default_sentence_pause() -> u64 {
    500
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            style: RenderStyle::default(),
            character_interval_ms: default_character_interval(),
            sentence_interval_ms: default_sentence_interval(),
            sentence_pause_ms: default_sentence_pause(),
        }
    }
}

impl RendererConfig {
    /// Pacing mode for [`crate::renderer::Renderer`]
    pub fn render_mode(&self) -> RenderMode {
        match self.style {
            RenderStyle::Character => RenderMode::Character {
                interval: Duration::from_millis(self.character_interval_ms),
            },
            RenderStyle::Sentence => RenderMode::Sentence {
                interval: Duration::from_millis(self.sentence_interval_ms),
                pause: Duration::from_millis(self.sentence_pause_ms),
            },
        }
    }
}

/// Session timer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerConfig {
    /// How often the remaining time is recomputed (ms)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval() -> u64 {
    100
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
        }
    }
}

/// Stream proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Address the proxy listens on
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Avatar hosting service base URL (serves `/v1/streams`)
    #[serde(default)]
    pub upstream_url: String,

    /// API key injected as `x-api-key`; prefer `AVATALK_API_KEY` over the file
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

fn default_bind_address() -> String {
    "127.0.0.1:3000".to_string()
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            upstream_url: String::new(),
            api_key: None,
        }
    }
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Returns
    ///
    /// Returns the loaded and merged configuration
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| AvatalkError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| AvatalkError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(avatar_id) = std::env::var("AVATALK_AVATAR_ID") {
            self.avatar.avatar_id = avatar_id;
        }

        if let Ok(language) = std::env::var("AVATALK_LANGUAGE") {
            self.avatar.language = language;
        }

        if let Ok(duration) = std::env::var("AVATALK_MAX_DURATION_SECS") {
            if let Ok(value) = duration.parse() {
                self.avatar.max_duration_secs = value;
            } else {
                tracing::warn!("Invalid AVATALK_MAX_DURATION_SECS: {}", duration);
            }
        }

        if let Ok(proxy_url) = std::env::var("AVATALK_PROXY_URL") {
            self.api.proxy_url = proxy_url;
        }

        if let Ok(server_url) = std::env::var("AVATALK_SERVER_URL") {
            self.api.server_url = server_url;
        }

        if let Ok(upstream) = std::env::var("AVATALK_UPSTREAM_URL") {
            self.proxy.upstream_url = upstream;
        }

        if let Ok(api_key) = std::env::var("AVATALK_API_KEY") {
            self.proxy.api_key = Some(api_key);
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(avatar_id) = &cli.avatar_id {
            self.avatar.avatar_id = avatar_id.clone();
        }
        if let Some(language) = &cli.language {
            self.avatar.language = language.clone();
        }
        if let Some(style) = cli.render_style {
            self.renderer.style = style;
        }
        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }
    }

    /// Validate the configuration
    ///
    /// Ensures all configuration values are within acceptable ranges.
    /// The avatar id is not checked here because the proxy command does not
    /// need one; [`Config::require_avatar`] covers session commands.
    ///
    /// # Errors
    ///
    /// Returns error if any validation check fails
    pub fn validate(&self) -> Result<()> {
        if !(MIN_SESSION_DURATION_SECS..=MAX_SESSION_DURATION_SECS)
            .contains(&self.avatar.max_duration_secs)
        {
            return Err(AvatalkError::Config(format!(
                "avatar.max_duration_secs must be between {} and {}",
                MIN_SESSION_DURATION_SECS, MAX_SESSION_DURATION_SECS
            ))
            .into());
        }

        if self.avatar.language.trim().is_empty() {
            return Err(
                AvatalkError::Config("avatar.language cannot be empty".to_string()).into(),
            );
        }

        if self.api.request_timeout_secs == 0 {
            return Err(AvatalkError::Config(
                "api.request_timeout_secs must be greater than 0".to_string(),
            )
            .into());
        }

        if self.renderer.character_interval_ms == 0 || self.renderer.sentence_interval_ms == 0 {
            return Err(AvatalkError::Config(
                "renderer intervals must be greater than 0".to_string(),
            )
            .into());
        }

        if self.timer.poll_interval_ms == 0 {
            return Err(AvatalkError::Config(
                "timer.poll_interval_ms must be greater than 0".to_string(),
            )
            .into());
        }

        Ok(())
    }

    /// Ensure an avatar id is configured
    ///
    /// # Errors
    ///
    /// Returns [`AvatalkError::Config`] when `avatar.avatar_id` is empty
    pub fn require_avatar(&self) -> Result<&str> {
        if self.avatar.avatar_id.trim().is_empty() {
            return Err(AvatalkError::Config(
                "avatar.avatar_id is required (set it in the config file, AVATALK_AVATAR_ID or --avatar-id)"
                    .to_string(),
            )
            .into());
        }
        Ok(&self.avatar.avatar_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.avatar.language, "ko");
        assert_eq!(config.avatar.max_duration_secs, 300);
        assert!(config.avatar.unmute_user_audio_on_joined);
        assert_eq!(config.renderer.style, RenderStyle::Character);
        assert_eq!(config.timer.poll_interval_ms, 100);
    }

    #[test]
    fn test_config_validation_success() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_duration_bounds() {
        let mut config = Config::default();
        config.avatar.max_duration_secs = 0;
        assert!(config.validate().is_err());

        config.avatar.max_duration_secs = 3601;
        assert!(config.validate().is_err());

        config.avatar.max_duration_secs = 3600;
        assert!(config.validate().is_ok());

        config.avatar.max_duration_secs = 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_language_is_rejected() {
        let mut config = Config::default();
        config.avatar.language = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_intervals_are_rejected() {
        let mut config = Config::default();
        config.timer.poll_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.renderer.character_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_require_avatar() {
        let mut config = Config::default();
        assert!(config.require_avatar().is_err());

        config.avatar.avatar_id = "avatar-1".to_string();
        assert_eq!(config.require_avatar().unwrap(), "avatar-1");
    }

    #[test]
    fn test_config_from_yaml() {
        let yaml = r#"
avatar:
  avatar_id: avatar-42
  language: en
  max_duration_secs: 600
  unmute_user_audio_on_joined: false
  welcome_message: "Hello!"
api:
  proxy_url: http://proxy.local
  server_url: https://sdk.example.com
renderer:
  style: sentence
  sentence_pause_ms: 250
proxy:
  bind_address: 0.0.0.0:8080
  upstream_url: https://avatar.example.com
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.avatar.avatar_id, "avatar-42");
        assert_eq!(config.avatar.max_duration_secs, 600);
        assert!(!config.avatar.unmute_user_audio_on_joined);
        assert_eq!(config.avatar.welcome_message.as_deref(), Some("Hello!"));
        assert_eq!(config.renderer.style, RenderStyle::Sentence);
        assert_eq!(
            config.renderer.render_mode(),
            RenderMode::Sentence {
                interval: Duration::from_millis(110),
                pause: Duration::from_millis(250),
            }
        );
        assert_eq!(config.proxy.bind_address, "0.0.0.0:8080");
        assert_eq!(config.api.request_timeout_secs, 30);
    }

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.api.proxy_url, "http://localhost:3000");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_api_key_is_never_serialized() {
        let mut config = Config::default();
        config.proxy.api_key = Some("secret".to_string());
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(!yaml.contains("secret"));
    }

    #[test]
    fn test_render_style_from_str() {
        assert_eq!(
            "Sentence".parse::<RenderStyle>().unwrap(),
            RenderStyle::Sentence
        );
        assert_eq!("char".parse::<RenderStyle>().unwrap(), RenderStyle::Character);
        assert!("word".parse::<RenderStyle>().is_err());
    }
}
