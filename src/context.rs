//! Service context that bundles all port trait objects and stores.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use crate::adapters::live::gemini::GeminiApi;
use crate::adapters::recording::generation::RecordingGenerationApi;
use crate::adapters::replaying::generation::ReplayingGenerationApi;
use crate::cassette::config::load_cassette;
use crate::cassette::recorder::CassetteRecorder;
use crate::catalog::Catalog;
use crate::chat::ChatStore;
use crate::config::Config;
use crate::error::BotError;
use crate::ports::{GenerationApi, MediaFetcher, Transport};
use crate::prompt::PromptTemplates;
use crate::render::RenderOptions;
use crate::state::StateStore;
use crate::streaming::StreamOptions;

/// Behavior knobs the core reads on every request.
#[derive(Debug, Clone)]
pub struct BotOptions {
    /// Caption rendering.
    pub render: RenderOptions,
    /// Streamed answers.
    pub stream: StreamOptions,
    /// Text message limit, characters.
    pub text_limit: usize,
    /// Conversation turns kept per chat.
    pub history_length: usize,
    /// Album inactivity window.
    pub media_group_window: Duration,
    /// Limit on a prompt enhancement call.
    pub enhance_timeout: Duration,
}

impl BotOptions {
    /// Options from configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            render: config.bot.render_options(),
            stream: config.stream_options(),
            text_limit: config.bot.text_limit,
            history_length: config.bot.history_length,
            media_group_window: Duration::from_millis(config.bot.media_group_window_ms),
            enhance_timeout: Duration::from_secs(config.api.enhance_timeout_secs),
        }
    }
}

impl Default for BotOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Bundles all port trait objects, stores and static data into one context.
pub struct ServiceContext {
    /// Generation API port.
    pub api: Box<dyn GenerationApi>,
    /// Chat transport port.
    pub transport: Arc<dyn Transport>,
    /// Media fetch port.
    pub media: Box<dyn MediaFetcher>,
    /// Per-message state.
    pub states: Box<dyn StateStore>,
    /// Per-chat settings.
    pub chats: ChatStore,
    /// Type/style/artist catalog.
    pub catalog: Catalog,
    /// Prompt templates.
    pub templates: PromptTemplates,
    /// Behavior knobs.
    pub options: BotOptions,
    /// Randomness for settings resolution.
    pub rng: Mutex<StdRng>,
}

impl ServiceContext {
    /// Run `f` with the shared random source.
    ///
    /// The lock is released when `f` returns; never hold it across an await.
    pub fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut rng)
    }
}

/// Random source from an optional fixed seed.
#[must_use]
pub fn rng_from_seed(seed: Option<u64>) -> StdRng {
    seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64)
}

/// Shared random source for a [`ServiceContext`].
#[must_use]
pub fn seeded_rng(seed: Option<u64>) -> Mutex<StdRng> {
    Mutex::new(rng_from_seed(seed))
}

/// Handle to a recording session that must be finished after use.
pub struct RecordingSession {
    recorder: Arc<Mutex<CassetteRecorder>>,
}

impl RecordingSession {
    /// Finish the recording and write cassette files to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the cassette file cannot be written.
    pub fn finish(self) -> Result<PathBuf, BotError> {
        let recorder = Arc::try_unwrap(self.recorder)
            .map_err(|_| BotError::Config("Recording adapter still has references".into()))?
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        recorder.finish()
    }
}

/// Live Gemini API.
///
/// # Errors
///
/// Returns an error if no API key is configured.
pub fn live_api(config: &Config) -> Result<Box<dyn GenerationApi>, BotError> {
    let keys = config.gemini_keys();
    if keys.is_empty() {
        return Err(BotError::MissingApiKey {
            provider: "Gemini".into(),
            env_var: "GEMINI_API_KEY".into(),
        });
    }
    info!(keys = keys.len(), base_url = %config.base_url(), "using live Gemini API");
    Ok(Box::new(GeminiApi::new(keys, config.base_url(), &config.api)?))
}

/// Live API wrapped with a recorder.
///
/// # Errors
///
/// Returns an error if the live API cannot be created.
pub fn recording_api(
    config: &Config,
) -> Result<(Box<dyn GenerationApi>, RecordingSession), BotError> {
    let live = live_api(config)?;

    let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H-%M-%S").to_string();
    let output_dir = PathBuf::from(".imagen-bot/cassettes").join(&timestamp);

    let commit = get_commit_hash();
    let path = output_dir.join("generation_api.cassette.yaml");
    let recorder = Arc::new(Mutex::new(CassetteRecorder::new(
        path,
        format!("{timestamp}-generation_api"),
        &commit,
    )));

    let api = RecordingGenerationApi::new(live, Arc::clone(&recorder));
    Ok((Box::new(api), RecordingSession { recorder }))
}

/// API served from a cassette file.
///
/// # Errors
///
/// Returns an error if the cassette file cannot be loaded.
pub fn replaying_api(path: &Path) -> Result<Box<dyn GenerationApi>, BotError> {
    let replayer = load_cassette(path)
        .map_err(|e| BotError::Config(format!("Failed to load cassette: {e}")))?;
    let replayer = Arc::new(Mutex::new(replayer));
    Ok(Box::new(ReplayingGenerationApi::new(replayer)))
}

/// Get the current git commit hash, or "unknown" if unavailable.
fn get_commit_hash() -> String {
    std::process::Command::new("git")
        .args(["rev-parse", "HEAD"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map_or_else(|| "unknown".to_string(), |s| s.trim().to_string())
}
