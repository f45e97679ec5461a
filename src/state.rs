//! Per-message state: what a sent result was made from and what its
//! settings panel currently shows.
//!
//! Records are only changed through the named operations on
//! [`MessageState`]; the store hands out clones and takes whole records back.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::catalog::{CatalogEntry, EntityKind};
use crate::error::BotError;
use crate::settings::{AspectRatio, ResolvedSettings, SettingsIntent};

/// Identifies one sent message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateKey {
    /// Chat the message lives in.
    pub chat_id: i64,
    /// Message identifier within the chat.
    pub message_id: i64,
}

/// A selector panel of the inline keyboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Panel {
    /// Aspect-ratio buttons.
    Aspect,
    /// Paged type, style or artist list.
    Entity(EntityKind),
    /// Prompt actions (reset, enhance, change).
    Prompt,
}

/// Transient keyboard state; not persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UiState {
    /// Whether the settings row is shown.
    pub settings_visible: bool,
    /// The one open panel, if any.
    pub open_panel: Option<Panel>,
    type_page: usize,
    style_page: usize,
    artist_page: usize,
    /// User whose next reply replaces the prompt.
    pub awaiting_prompt_from: Option<i64>,
}

impl UiState {
    /// Current page of an entity panel.
    #[must_use]
    pub fn page(&self, kind: EntityKind) -> usize {
        match kind {
            EntityKind::Type => self.type_page,
            EntityKind::Style => self.style_page,
            EntityKind::Artist => self.artist_page,
        }
    }

    fn reset_pages(&mut self) {
        self.type_page = 0;
        self.style_page = 0;
        self.artist_page = 0;
    }
}

/// One difference between current selections and the baseline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// Aspect ratio changed (`None` means removed).
    AspectRatio(Option<AspectRatio>),
    /// Type, style or artist changed (`None` means removed).
    Entity(EntityKind, Option<CatalogEntry>),
    /// The prompt text changed.
    Prompt(String),
}

impl Change {
    /// Human-readable name of the changed parameter.
    #[must_use]
    pub fn parameter(&self) -> &'static str {
        match self {
            Self::AspectRatio(_) => "AspectRatio",
            Self::Entity(kind, _) => kind.label(),
            Self::Prompt(_) => "Prompt",
        }
    }

    /// Imperative phrase describing the change for an edit request.
    #[must_use]
    pub fn instruction(&self) -> String {
        match self {
            Self::AspectRatio(Some(ar)) => format!("Set aspect ratio to {ar}"),
            Self::AspectRatio(None) => "Remove aspect ratio constraint".to_string(),
            Self::Entity(EntityKind::Type, Some(e)) => format!("Change type to '{}'", e.name),
            Self::Entity(EntityKind::Type, None) => "Remove the image type".to_string(),
            Self::Entity(EntityKind::Style, Some(e)) => format!("Apply style '{}'", e.name),
            Self::Entity(EntityKind::Style, None) => "Remove the style".to_string(),
            Self::Entity(EntityKind::Artist, Some(e)) => format!("Apply artist style '{}'", e.name),
            Self::Entity(EntityKind::Artist, None) => "Remove the artist style".to_string(),
            Self::Prompt(text) => format!("Use description: '{text}'"),
        }
    }
}

/// Everything known about one sent result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageState {
    /// Chat id.
    pub chat_id: i64,
    /// Message id.
    pub message_id: i64,
    /// The first free text this message was made from.
    pub original_user_prompt: String,
    /// Prompt the next Apply will use.
    pub effective_prompt: String,
    /// Currently selected type.
    pub selected_type: Option<CatalogEntry>,
    /// Currently selected style.
    pub selected_style: Option<CatalogEntry>,
    /// Currently selected artist.
    pub selected_artist: Option<CatalogEntry>,
    /// Currently selected aspect ratio.
    pub selected_ar: Option<AspectRatio>,
    /// Settings used for the generation that produced this message.
    pub api_call_settings: ResolvedSettings,
    /// Exact prompt sent to the API.
    pub api_call_prompt: String,
    /// Intent that reproduces this message's random choices.
    pub original_parsed_settings: Option<SettingsIntent>,
    /// Handle of the single uploaded source image.
    pub base_image_file_id_for_regen: Option<String>,
    /// Handle of the first combined image.
    pub source_image_file_id_1_for_regen: Option<String>,
    /// Handle of the second combined image.
    pub source_image_file_id_2_for_regen: Option<String>,
    /// Whether this message is a two-image combination.
    pub is_combination_result: bool,
    /// Instruction the combination was made with.
    pub combine_instruction: Option<String>,
    /// Handle of the image this message shows.
    pub generated_file_id: Option<String>,
    /// Text returned alongside the image.
    pub last_api_text: Option<String>,
    /// Keyboard state; lost on restart.
    #[serde(skip)]
    pub ui: UiState,
}

impl MessageState {
    /// New record whose current selections equal the baseline.
    #[must_use]
    pub fn new(key: StateKey, prompt: &str, settings: ResolvedSettings, api_prompt: &str) -> Self {
        Self {
            chat_id: key.chat_id,
            message_id: key.message_id,
            original_user_prompt: prompt.to_string(),
            effective_prompt: prompt.to_string(),
            selected_type: settings.ty.clone(),
            selected_style: settings.style.clone(),
            selected_artist: settings.artist.clone(),
            selected_ar: settings.aspect_ratio,
            api_call_settings: settings,
            api_call_prompt: api_prompt.to_string(),
            original_parsed_settings: None,
            base_image_file_id_for_regen: None,
            source_image_file_id_1_for_regen: None,
            source_image_file_id_2_for_regen: None,
            is_combination_result: false,
            combine_instruction: None,
            generated_file_id: None,
            last_api_text: None,
            ui: UiState::default(),
        }
    }

    /// Store key of this record.
    #[must_use]
    pub fn key(&self) -> StateKey {
        StateKey { chat_id: self.chat_id, message_id: self.message_id }
    }

    /// Current selections as a settings record.
    #[must_use]
    pub fn selection(&self) -> ResolvedSettings {
        ResolvedSettings {
            ty: self.selected_type.clone(),
            style: self.selected_style.clone(),
            artist: self.selected_artist.clone(),
            aspect_ratio: self.selected_ar,
        }
    }

    /// Currently selected entry of a kind.
    #[must_use]
    pub fn selected(&self, kind: EntityKind) -> Option<&CatalogEntry> {
        match kind {
            EntityKind::Type => self.selected_type.as_ref(),
            EntityKind::Style => self.selected_style.as_ref(),
            EntityKind::Artist => self.selected_artist.as_ref(),
        }
    }

    /// Select a type.
    pub fn set_type(&mut self, entry: CatalogEntry) {
        self.selected_type = Some(entry);
    }

    /// Remove the type; the style goes with it.
    pub fn clear_type(&mut self) {
        self.selected_type = None;
        self.selected_style = None;
    }

    /// Select a style.
    pub fn set_style(&mut self, entry: CatalogEntry) {
        self.selected_style = Some(entry);
    }

    /// Remove the style.
    pub fn clear_style(&mut self) {
        self.selected_style = None;
    }

    /// Select an artist.
    pub fn set_artist(&mut self, entry: CatalogEntry) {
        self.selected_artist = Some(entry);
    }

    /// Remove the artist.
    pub fn clear_artist(&mut self) {
        self.selected_artist = None;
    }

    /// Select or remove an entry of any kind.
    pub fn set_entity(&mut self, kind: EntityKind, entry: Option<CatalogEntry>) {
        match (kind, entry) {
            (EntityKind::Type, Some(e)) => self.set_type(e),
            (EntityKind::Type, None) => self.clear_type(),
            (EntityKind::Style, Some(e)) => self.set_style(e),
            (EntityKind::Style, None) => self.clear_style(),
            (EntityKind::Artist, Some(e)) => self.set_artist(e),
            (EntityKind::Artist, None) => self.clear_artist(),
        }
    }

    /// Select or remove the aspect ratio.
    pub fn set_aspect_ratio(&mut self, ar: Option<AspectRatio>) {
        self.selected_ar = ar;
    }

    /// Show or hide the settings row. Hiding closes every panel.
    pub fn toggle_settings(&mut self) {
        let visible = !self.ui.settings_visible;
        self.clear_all_selectors();
        self.ui.settings_visible = visible;
    }

    /// Open one panel, closing the others and resetting pagination.
    pub fn open_panel(&mut self, panel: Panel) {
        self.clear_all_selectors();
        self.ui.settings_visible = true;
        self.ui.open_panel = Some(panel);
    }

    /// Close every panel, reset pagination and drop a pending prompt edit.
    pub fn clear_all_selectors(&mut self) {
        self.ui.open_panel = None;
        self.ui.reset_pages();
        self.ui.awaiting_prompt_from = None;
    }

    /// Move an entity panel to a page.
    pub fn set_page(&mut self, kind: EntityKind, page: usize) {
        match kind {
            EntityKind::Type => self.ui.type_page = page,
            EntityKind::Style => self.ui.style_page = page,
            EntityKind::Artist => self.ui.artist_page = page,
        }
    }

    /// Wait for `user_id` to reply with a replacement prompt.
    pub fn request_prompt_change(&mut self, user_id: i64) {
        self.ui.awaiting_prompt_from = Some(user_id);
    }

    /// Whether a reply from `user_id` should replace the prompt.
    #[must_use]
    pub fn is_awaiting_prompt_from(&self, user_id: i64) -> bool {
        self.ui.awaiting_prompt_from == Some(user_id)
    }

    /// Replace the effective prompt and stop waiting for one.
    pub fn replace_prompt(&mut self, text: &str) {
        self.effective_prompt = text.trim().to_string();
        self.ui.awaiting_prompt_from = None;
    }

    /// Put the original prompt back.
    pub fn reset_prompt(&mut self) {
        self.effective_prompt = self.original_user_prompt.clone();
    }

    /// Revert selections and prompt to the baseline and collapse the keyboard.
    pub fn reset_to_baseline(&mut self) {
        let baseline = self.api_call_settings.clone();
        self.selected_type = baseline.ty;
        self.selected_style = baseline.style;
        self.selected_artist = baseline.artist;
        self.selected_ar = baseline.aspect_ratio;
        self.effective_prompt = self.original_user_prompt.clone();
        self.clear_all_selectors();
        self.ui.settings_visible = false;
    }

    /// Differences between current selections and the baseline, in
    /// aspect ratio, type, style, artist, prompt order.
    #[must_use]
    pub fn changes(&self) -> Vec<Change> {
        let base = &self.api_call_settings;
        let mut out = Vec::new();
        if self.selected_ar != base.aspect_ratio {
            out.push(Change::AspectRatio(self.selected_ar));
        }
        for kind in EntityKind::ALL {
            let current = self.selected(kind);
            let before = base.entry(kind);
            if current.map(|e| &e.name) != before.map(|e| &e.name) {
                out.push(Change::Entity(kind, current.cloned()));
            }
        }
        if self.effective_prompt.trim() != self.original_user_prompt.trim() {
            out.push(Change::Prompt(self.effective_prompt.clone()));
        }
        out
    }

    /// Whether anything differs from the baseline.
    #[must_use]
    pub fn is_edited(&self) -> bool {
        !self.changes().is_empty()
    }
}

/// Keyed storage for [`MessageState`] records.
///
/// A missing record (never stored, expired or evicted) is `None`.
pub trait StateStore: Send + Sync {
    /// Fetch a copy of a record.
    fn get(&self, key: StateKey) -> Option<MessageState>;

    /// Insert or replace a record under its own key.
    fn put(&self, state: MessageState);

    /// Write every live record to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be written.
    fn save_all(&self, path: &Path) -> Result<usize, BotError>;

    /// Load records from `path`; a missing file loads nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot exists but cannot be read.
    fn load_all(&self, path: &Path) -> Result<usize, BotError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Slot {
    touched: DateTime<Utc>,
    state: MessageState,
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    saved_at: DateTime<Utc>,
    entries: Vec<Slot>,
}

/// In-memory store with a capacity bound and idle expiry.
#[derive(Debug)]
pub struct MemoryStateStore {
    slots: Mutex<HashMap<StateKey, Slot>>,
    capacity: usize,
    ttl: Duration,
}

impl MemoryStateStore {
    /// Create a store holding at most `capacity` records, each expiring after
    /// `ttl` without access.
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self { slots: Mutex::new(HashMap::new()), capacity: capacity.max(1), ttl }
    }

    /// Number of records held, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get_at(&self, key: StateKey, now: DateTime<Utc>) -> Option<MessageState> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let expired = slots.get(&key).map(|slot| now - slot.touched > self.ttl)?;
        if expired {
            debug!(chat_id = key.chat_id, message_id = key.message_id, "state expired");
            slots.remove(&key);
            return None;
        }
        let slot = slots.get_mut(&key)?;
        slot.touched = now;
        Some(slot.state.clone())
    }

    fn put_at(&self, state: MessageState, now: DateTime<Utc>) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.insert(state.key(), Slot { touched: now, state });
        while slots.len() > self.capacity {
            let Some(oldest) = slots.iter().min_by_key(|(_, s)| s.touched).map(|(k, _)| *k) else {
                break;
            };
            debug!(chat_id = oldest.chat_id, message_id = oldest.message_id, "state evicted");
            slots.remove(&oldest);
        }
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, key: StateKey) -> Option<MessageState> {
        self.get_at(key, Utc::now())
    }

    fn put(&self, state: MessageState) {
        self.put_at(state, Utc::now());
    }

    fn save_all(&self, path: &Path) -> Result<usize, BotError> {
        let now = Utc::now();
        let entries: Vec<Slot> = {
            let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.values().filter(|s| now - s.touched <= self.ttl).cloned().collect()
        };
        let count = entries.len();
        let snapshot = Snapshot { saved_at: now, entries };
        write_json_atomic(path, &snapshot)?;
        info!(count, path = %path.display(), "message state saved");
        Ok(count)
    }

    fn load_all(&self, path: &Path) -> Result<usize, BotError> {
        let Some(snapshot) = read_json::<Snapshot>(path)? else {
            return Ok(0);
        };
        let now = Utc::now();
        let mut loaded = 0;
        for slot in snapshot.entries {
            if now - slot.touched > self.ttl {
                continue;
            }
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.insert(slot.state.key(), slot);
            loaded += 1;
        }
        info!(loaded, saved_at = %snapshot.saved_at, "message state restored");
        Ok(loaded)
    }
}

/// Serialize `value` to `path` through a temporary file.
///
/// # Errors
///
/// Returns an error if the directory or file cannot be written.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), BotError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| BotError::Config(format!("Failed to encode {}: {e}", path.display())))?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Read JSON from `path`; a missing file is `Ok(None)`.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or decoded.
pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, BotError> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = std::fs::read(path)?;
    match serde_json::from_slice(&bytes) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "snapshot unreadable");
            Err(BotError::Config(format!("Failed to decode {}: {e}", path.display())))
        }
    }
}
