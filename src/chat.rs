//! Per-chat settings: prompt suffix, system instruction, conversation history.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::BotError;
use crate::ports::{Role, Turn};
use crate::state::{read_json, write_json_atomic};

/// Image prompt suffix choice for a chat.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Suffix {
    /// Use the configured default suffix.
    #[default]
    Default,
    /// Use this text.
    Custom(String),
    /// No suffix at all.
    Disabled,
}

/// Settings and memory of one chat.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    /// Image prompt suffix.
    pub suffix: Suffix,
    /// Custom text system instruction.
    pub system_prompt: Option<String>,
    /// Recent conversation, oldest first.
    pub history: Vec<Turn>,
    /// Last image message the bot produced here.
    pub last_generated: Option<i64>,
}

impl ChatSettings {
    /// Suffix to append to image prompts, if any.
    #[must_use]
    pub fn effective_suffix(&self, default: &str) -> Option<String> {
        let text = match &self.suffix {
            Suffix::Default => default,
            Suffix::Custom(text) => text.as_str(),
            Suffix::Disabled => return None,
        };
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }

    /// System instruction for text answers.
    #[must_use]
    pub fn effective_system<'a>(&'a self, default: &'a str) -> &'a str {
        self.system_prompt.as_deref().unwrap_or(default)
    }
}

/// In-memory chat settings keyed by chat id.
#[derive(Debug, Default)]
pub struct ChatStore {
    chats: Mutex<HashMap<i64, ChatSettings>>,
}

impl ChatStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of a chat's settings; unknown chats get defaults.
    #[must_use]
    pub fn get(&self, chat_id: i64) -> ChatSettings {
        let chats = self.chats.lock().unwrap_or_else(PoisonError::into_inner);
        chats.get(&chat_id).cloned().unwrap_or_default()
    }

    /// Mutate a chat's settings in place.
    pub fn update<F: FnOnce(&mut ChatSettings)>(&self, chat_id: i64, f: F) {
        let mut chats = self.chats.lock().unwrap_or_else(PoisonError::into_inner);
        f(chats.entry(chat_id).or_default());
    }

    /// Append a question and answer, keeping the newest `max_turns` turns.
    pub fn push_exchange(&self, chat_id: i64, question: &str, answer: &str, max_turns: usize) {
        self.update(chat_id, |chat| {
            chat.history.push(Turn { role: Role::User, text: question.to_string() });
            chat.history.push(Turn { role: Role::Model, text: answer.to_string() });
            let excess = chat.history.len().saturating_sub(max_turns);
            chat.history.drain(..excess);
        });
    }

    /// Write every chat to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be written.
    pub fn save_all(&self, path: &Path) -> Result<usize, BotError> {
        let chats = self.chats.lock().unwrap_or_else(PoisonError::into_inner).clone();
        let count = chats.len();
        write_json_atomic(path, &chats)?;
        info!(count, path = %path.display(), "chat settings saved");
        Ok(count)
    }

    /// Load chats from `path`; a missing file loads nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot exists but cannot be read.
    pub fn load_all(&self, path: &Path) -> Result<usize, BotError> {
        let Some(loaded) = read_json::<HashMap<i64, ChatSettings>>(path)? else {
            return Ok(0);
        };
        let count = loaded.len();
        self.chats.lock().unwrap_or_else(PoisonError::into_inner).extend(loaded);
        info!(count, "chat settings restored");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_variants() {
        let mut chat = ChatSettings::default();
        assert_eq!(chat.effective_suffix("cinematic").as_deref(), Some("cinematic"));
        assert_eq!(chat.effective_suffix("  "), None);
        chat.suffix = Suffix::Custom("film grain".into());
        assert_eq!(chat.effective_suffix("cinematic").as_deref(), Some("film grain"));
        chat.suffix = Suffix::Disabled;
        assert_eq!(chat.effective_suffix("cinematic"), None);
    }

    #[test]
    fn history_is_bounded() {
        let store = ChatStore::new();
        for i in 0..8 {
            store.push_exchange(1, &format!("q{i}"), &format!("a{i}"), 10);
        }
        let history = store.get(1).history;
        assert_eq!(history.len(), 10);
        assert_eq!(history[0].text, "q3");
        assert_eq!(history[9].text, "a7");
        assert_eq!(history[9].role, Role::Model);
    }

    #[test]
    fn system_prompt_falls_back_to_default() {
        let store = ChatStore::new();
        assert_eq!(store.get(5).effective_system("be nice"), "be nice");
        store.update(5, |c| c.system_prompt = Some("be brief".into()));
        assert_eq!(store.get(5).effective_system("be nice"), "be brief");
    }

    #[test]
    fn snapshot_round_trip() {
        let dir = std::env::temp_dir().join("imagen_bot_chat_test");
        let _ = std::fs::remove_dir_all(&dir);
        let path = dir.join("chats.json");

        let store = ChatStore::new();
        store.update(-100, |c| c.suffix = Suffix::Custom("4k".into()));
        store.push_exchange(-100, "hi", "hello", 10);
        assert_eq!(store.save_all(&path).unwrap(), 1);

        let restored = ChatStore::new();
        assert_eq!(restored.load_all(&path).unwrap(), 1);
        assert_eq!(restored.get(-100), store.get(-100));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
