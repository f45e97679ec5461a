//! Configuration file loading with environment variable overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::BotError;
use crate::render::RenderOptions;
use crate::streaming::StreamOptions;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// API key configuration.
    #[serde(default)]
    pub keys: KeysConfig,

    /// Remote API endpoints, models and timeouts.
    #[serde(default)]
    pub api: ApiConfig,

    /// File locations.
    #[serde(default)]
    pub paths: PathsConfig,

    /// Chat behavior.
    #[serde(default)]
    pub bot: BotConfig,

    /// Streamed answer editing.
    #[serde(default)]
    pub stream: StreamConfig,
}

/// API key configuration.
#[derive(Debug, Default, Deserialize)]
pub struct KeysConfig {
    /// Gemini API keys, used round-robin.
    #[serde(default)]
    pub gemini: Vec<String>,
}

/// Remote API settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// API base URL.
    pub base_url: String,
    /// Model used for images.
    pub image_model: String,
    /// Model used for text.
    pub text_model: String,
    /// Image call timeout, seconds.
    pub image_timeout_secs: u64,
    /// Single-shot text call timeout, seconds.
    pub text_timeout_secs: u64,
    /// Prompt enhancement timeout, seconds.
    pub enhance_timeout_secs: u64,
    /// Streamed text connect timeout, seconds.
    pub stream_connect_timeout_secs: u64,
    /// Streamed text per-chunk read timeout, seconds.
    pub stream_read_timeout_secs: u64,
    /// Longest prompt sent, in characters.
    pub max_prompt_chars: usize,
    /// Largest inline image sent, in bytes.
    pub max_image_bytes: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            image_model: "gemini-2.0-flash-exp-image-generation".to_string(),
            text_model: "gemini-2.5-flash".to_string(),
            image_timeout_secs: 240,
            text_timeout_secs: 90,
            enhance_timeout_secs: 60,
            stream_connect_timeout_secs: 10,
            stream_read_timeout_secs: 180,
            max_prompt_chars: 4000,
            max_image_bytes: 4 * 1024 * 1024,
        }
    }
}

/// File locations.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Type/style/artist catalog.
    pub styles: PathBuf,
    /// Prompt templates.
    pub prompts: PathBuf,
    /// Message state snapshot.
    pub state_file: PathBuf,
    /// Chat settings snapshot.
    pub chat_file: PathBuf,
    /// Where photos are stored.
    pub media_dir: PathBuf,
    /// Where fetched photos are cached.
    pub cache_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            styles: PathBuf::from("config/styles.yaml"),
            prompts: PathBuf::from("config/prompts.yaml"),
            state_file: PathBuf::from(".imagen-bot/state.json"),
            chat_file: PathBuf::from(".imagen-bot/chats.json"),
            media_dir: PathBuf::from(".imagen-bot/media"),
            cache_dir: PathBuf::from(".imagen-bot/cache"),
        }
    }
}

/// Chat behavior.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Show model text above captions.
    pub display_llm_text: bool,
    /// Caption limit, characters.
    pub caption_limit: usize,
    /// Text message limit, characters.
    pub text_limit: usize,
    /// Conversation turns kept per chat.
    pub history_length: usize,
    /// Inactivity window for albums, milliseconds.
    pub media_group_window_ms: u64,
    /// Most message states kept.
    pub state_capacity: usize,
    /// Hours an untouched message state lives.
    pub state_ttl_hours: i64,
    /// Fixed RNG seed, for reproducible runs.
    pub seed: Option<u64>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            display_llm_text: true,
            caption_limit: 1024,
            text_limit: 4096,
            history_length: 10,
            media_group_window_ms: 4000,
            state_capacity: 5000,
            state_ttl_hours: 48,
            seed: None,
        }
    }
}

impl BotConfig {
    /// Caption rendering options.
    #[must_use]
    pub fn render_options(&self) -> RenderOptions {
        RenderOptions { display_model_text: self.display_llm_text, caption_limit: self.caption_limit }
    }
}

/// Streamed answer editing.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Edit at least this often while text arrives, milliseconds.
    pub edit_interval_ms: u64,
    /// Edit early once this many new characters are pending.
    pub min_edit_chars: usize,
    /// Retries of a rate-limited edit.
    pub edit_retries: u32,
    /// First retry delay, milliseconds; doubles per attempt.
    pub backoff_base_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self { edit_interval_ms: 1700, min_edit_chars: 150, edit_retries: 3, backoff_base_ms: 1000 }
    }
}

impl Config {
    /// Load configuration from the given path, or return defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load(path: &Path) -> Result<Self, BotError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| BotError::Config(format!("Failed to read config {}: {e}", path.display())))?;
        toml::from_str(&contents)
            .map_err(|e| BotError::Config(format!("Failed to parse config {}: {e}", path.display())))
    }

    /// Gemini API keys, preferring the comma-separated environment variable.
    #[must_use]
    pub fn gemini_keys(&self) -> Vec<String> {
        let from_env = std::env::var("GEMINI_API_KEY").ok().map(|v| split_keys(&v));
        match from_env {
            Some(keys) if !keys.is_empty() => keys,
            _ => split_keys(&self.keys.gemini.join(",")),
        }
    }

    /// API base URL, preferring the environment variable.
    #[must_use]
    pub fn base_url(&self) -> String {
        std::env::var("GEMINI_API_BASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| self.api.base_url.clone())
            .trim_end_matches('/')
            .to_string()
    }

    /// Streamed answer options.
    #[must_use]
    pub fn stream_options(&self) -> StreamOptions {
        StreamOptions {
            edit_interval: Duration::from_millis(self.stream.edit_interval_ms),
            min_chars: self.stream.min_edit_chars,
            retry_attempts: self.stream.edit_retries,
            backoff_base: Duration::from_millis(self.stream.backoff_base_ms),
            text_limit: self.bot.text_limit,
        }
    }
}

fn split_keys(raw: &str) -> Vec<String> {
    raw.split(',').map(str::trim).filter(|k| !k.is_empty()).map(String::from).collect()
}

/// Discover the config file path using the resolution order:
/// 1. Explicit path (from `--config` flag)
/// 2. `IMAGEN_BOT_CONFIG` environment variable
/// 3. `~/.config/imagen-bot/config.toml`
#[must_use]
pub fn discover_config_path(explicit: Option<&str>) -> PathBuf {
    if let Some(p) = explicit {
        return PathBuf::from(p);
    }

    if let Ok(p) = std::env::var("IMAGEN_BOT_CONFIG") {
        return PathBuf::from(p);
    }

    default_config_path()
}

/// Default config path: `~/.config/imagen-bot/config.toml`.
fn default_config_path() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".config/imagen-bot/config.toml")
    } else {
        PathBuf::from("imagen-bot.toml")
    }
}
