//! Line-oriented console transport.
//!
//! Inbound events are read one per line:
//!
//! ```text
//! a cat -t1                          text message
//! :photo <path> [caption]            photo, optionally captioned
//! :reply <message_id> <text>         text replying to a message
//! :reply-photo <id> <path> [caption] photo replying to a message
//! :group <group_id> <path> [caption] photo in an album
//! :press <message_id> <data>         button press
//! :wait <milliseconds>               pause before the next line
//! ```
//!
//! Every outbound operation is written to the sink as one JSON object per line.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use super::media::LocalMediaStore;
use crate::error::BotError;
use crate::ports::transport::TransportFuture;
use crate::ports::{CallbackQuery, IncomingMessage, Keyboard, RepliedMessage, SentMessage, Transport, Update};

/// One parsed console line, before ids and files are resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleLine {
    /// Plain text.
    Text(String),
    /// A photo from disk.
    Photo {
        /// Image file.
        path: PathBuf,
        /// Caption.
        caption: Option<String>,
        /// Message replied to.
        reply_to: Option<i64>,
        /// Album id.
        group: Option<String>,
    },
    /// Text replying to a message.
    Reply {
        /// Message replied to.
        to: i64,
        /// Reply text.
        text: String,
    },
    /// A button press.
    Press {
        /// Message carrying the keyboard.
        message_id: i64,
        /// Callback data.
        data: String,
    },
    /// Pause.
    Wait(Duration),
}

/// What the console loop should do with a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleEvent {
    /// Hand an update to the router.
    Update(Update),
    /// Sleep before reading on.
    Wait(Duration),
}

/// Parse one input line. Blank lines give `None`.
///
/// # Errors
///
/// Returns [`BotError::InvalidArgument`] for a malformed `:` directive.
pub fn parse_line(line: &str) -> Result<Option<ConsoleLine>, BotError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(directive) = line.strip_prefix(':') else {
        return Ok(Some(ConsoleLine::Text(line.to_string())));
    };

    let (name, rest) = split_word(directive);
    let parsed = match name {
        "photo" => {
            let (path, caption) = required_word(rest, ":photo <path> [caption]")?;
            photo(path, caption, None, None)
        }
        "reply" => {
            let (id, text) = required_word(rest, ":reply <message_id> <text>")?;
            if text.is_empty() {
                return Err(usage(":reply <message_id> <text>"));
            }
            ConsoleLine::Reply { to: message_id(id)?, text: text.to_string() }
        }
        "reply-photo" => {
            let (id, rest) = required_word(rest, ":reply-photo <message_id> <path> [caption]")?;
            let (path, caption) = required_word(rest, ":reply-photo <message_id> <path> [caption]")?;
            photo(path, caption, Some(message_id(id)?), None)
        }
        "group" => {
            let (group, rest) = required_word(rest, ":group <group_id> <path> [caption]")?;
            let (path, caption) = required_word(rest, ":group <group_id> <path> [caption]")?;
            photo(path, caption, None, Some(group.to_string()))
        }
        "press" => {
            let (id, data) = required_word(rest, ":press <message_id> <data>")?;
            if data.is_empty() {
                return Err(usage(":press <message_id> <data>"));
            }
            ConsoleLine::Press { message_id: message_id(id)?, data: data.to_string() }
        }
        "wait" => {
            let ms = rest
                .parse::<u64>()
                .map_err(|_| BotError::InvalidArgument(format!("Invalid wait: {rest:?}")))?;
            ConsoleLine::Wait(Duration::from_millis(ms))
        }
        other => return Err(BotError::InvalidArgument(format!("Unknown directive :{other}"))),
    };
    Ok(Some(parsed))
}

fn photo(path: &str, caption: &str, reply_to: Option<i64>, group: Option<String>) -> ConsoleLine {
    ConsoleLine::Photo {
        path: PathBuf::from(path),
        caption: Some(caption.to_string()).filter(|c| !c.is_empty()),
        reply_to,
        group,
    }
}

fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (s, ""),
    }
}

fn required_word<'a>(s: &'a str, syntax: &str) -> Result<(&'a str, &'a str), BotError> {
    let (word, rest) = split_word(s);
    if word.is_empty() {
        return Err(usage(syntax));
    }
    Ok((word, rest))
}

fn usage(syntax: &str) -> BotError {
    BotError::InvalidArgument(format!("Usage: {syntax}"))
}

fn message_id(s: &str) -> Result<i64, BotError> {
    s.parse().map_err(|_| BotError::InvalidArgument(format!("Invalid message id: {s:?}")))
}

/// Everything the transport remembers about a message.
#[derive(Debug, Clone)]
struct Known {
    photo: Option<String>,
    text: Option<String>,
    from_bot: bool,
}

/// Outbound operation as written to the sink.
#[derive(Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Outbound<'a> {
    SendText {
        chat_id: i64,
        message_id: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        reply_to: Option<i64>,
        text: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        keyboard: Option<Vec<Vec<String>>>,
    },
    SendPhoto {
        chat_id: i64,
        message_id: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        reply_to: Option<i64>,
        file: &'a str,
        caption: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        keyboard: Option<Vec<Vec<String>>>,
    },
    EditCaption {
        chat_id: i64,
        message_id: i64,
        caption: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        keyboard: Option<Vec<Vec<String>>>,
    },
    EditText {
        chat_id: i64,
        message_id: i64,
        text: &'a str,
    },
    EditKeyboard {
        chat_id: i64,
        message_id: i64,
        keyboard: Option<Vec<Vec<String>>>,
    },
    DeleteMessage {
        chat_id: i64,
        message_id: i64,
    },
    Notice {
        chat_id: i64,
        text: &'a str,
    },
}

/// Keyboard rows as `"label => data"` strings.
fn keyboard_lines(keyboard: Option<&Keyboard>) -> Option<Vec<Vec<String>>> {
    keyboard.map(|k| {
        k.rows
            .iter()
            .map(|row| row.iter().map(|b| format!("{} => {}", b.text, b.data)).collect())
            .collect()
    })
}

/// Transport that talks to a terminal or a pipe.
pub struct ConsoleTransport {
    out: Mutex<Box<dyn Write + Send>>,
    media: Arc<LocalMediaStore>,
    next_id: AtomicI64,
    messages: Mutex<HashMap<i64, Known>>,
    chat_id: i64,
    user_id: i64,
}

impl ConsoleTransport {
    /// Transport for one chat and one user, writing operations to `out`.
    pub fn new(out: Box<dyn Write + Send>, media: Arc<LocalMediaStore>, chat_id: i64, user_id: i64) -> Self {
        Self {
            out: Mutex::new(out),
            media,
            next_id: AtomicI64::new(1),
            messages: Mutex::new(HashMap::new()),
            chat_id,
            user_id,
        }
    }

    /// Resolve a console line into an event, storing photos and allocating
    /// message ids.
    ///
    /// # Errors
    ///
    /// Returns an error if a photo file cannot be read or a reply names an
    /// unknown message.
    pub async fn resolve(&self, line: ConsoleLine) -> Result<ConsoleEvent, BotError> {
        let (text, photo, reply_to, group) = match line {
            ConsoleLine::Wait(d) => return Ok(ConsoleEvent::Wait(d)),
            ConsoleLine::Press { message_id, data } => {
                return Ok(ConsoleEvent::Update(Update::Callback(CallbackQuery {
                    chat_id: self.chat_id,
                    user_id: self.user_id,
                    message_id,
                    data,
                })));
            }
            ConsoleLine::Text(text) => (Some(text), None, None, None),
            ConsoleLine::Reply { to, text } => (Some(text), None, Some(to), None),
            ConsoleLine::Photo { path, caption, reply_to, group } => {
                let bytes = tokio::fs::read(&path).await.map_err(|e| {
                    BotError::InvalidArgument(format!("Cannot read {}: {e}", path.display()))
                })?;
                let handle = self.media.store(&bytes).await?;
                (caption, Some(handle), reply_to, group)
            }
        };

        let reply_to = match reply_to {
            Some(id) => Some(self.replied(id)?),
            None => None,
        };
        let message_id = self.next_id();
        self.remember(message_id, Known { photo: photo.clone(), text: text.clone(), from_bot: false });
        Ok(ConsoleEvent::Update(Update::Message(IncomingMessage {
            chat_id: self.chat_id,
            user_id: self.user_id,
            message_id,
            text,
            photo,
            media_group_id: group,
            reply_to,
        })))
    }

    fn replied(&self, id: i64) -> Result<RepliedMessage, BotError> {
        let messages = self.messages.lock().unwrap_or_else(PoisonError::into_inner);
        let known = messages
            .get(&id)
            .ok_or_else(|| BotError::InvalidArgument(format!("Unknown message {id}")))?;
        Ok(RepliedMessage {
            message_id: id,
            photo: known.photo.clone(),
            text: known.text.clone(),
            from_bot: known.from_bot,
        })
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn remember(&self, message_id: i64, known: Known) {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner).insert(message_id, known);
    }

    fn exists(&self, chat_id: i64, message_id: i64) -> Result<(), BotError> {
        let known = chat_id == self.chat_id
            && self.messages.lock().unwrap_or_else(PoisonError::into_inner).contains_key(&message_id);
        if known {
            Ok(())
        } else {
            Err(BotError::NotEditable(format!("message {message_id} not found")))
        }
    }

    fn update_text(&self, message_id: i64, text: &str) {
        if let Some(known) =
            self.messages.lock().unwrap_or_else(PoisonError::into_inner).get_mut(&message_id)
        {
            known.text = Some(text.to_string());
        }
    }

    fn emit(&self, op: &Outbound<'_>) -> Result<(), BotError> {
        let line = serde_json::to_string(op)
            .map_err(|e| BotError::Transport(format!("Failed to encode output: {e}")))?;
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(out, "{line}")?;
        out.flush()?;
        Ok(())
    }
}

impl Transport for ConsoleTransport {
    fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
        keyboard: Option<&Keyboard>,
    ) -> TransportFuture<'_, SentMessage> {
        let message_id = self.next_id();
        let lines = keyboard_lines(keyboard);
        let result = self
            .emit(&Outbound::SendText { chat_id, message_id, reply_to, text, keyboard: lines })
            .map(|()| {
                self.remember(message_id, Known { photo: None, text: Some(text.to_string()), from_bot: true });
                SentMessage { message_id, file_id: None }
            });
        Box::pin(async move { result })
    }

    fn send_photo(
        &self,
        chat_id: i64,
        image: &[u8],
        caption: &str,
        reply_to: Option<i64>,
        keyboard: Option<&Keyboard>,
    ) -> TransportFuture<'_, SentMessage> {
        let image = image.to_vec();
        let caption = caption.to_string();
        let lines = keyboard_lines(keyboard);
        Box::pin(async move {
            let handle = self.media.store(&image).await?;
            let message_id = self.next_id();
            let file = self.media.path_for(&handle).display().to_string();
            self.emit(&Outbound::SendPhoto {
                chat_id,
                message_id,
                reply_to,
                file: &file,
                caption: &caption,
                keyboard: lines,
            })?;
            debug!(chat_id, message_id, handle = %handle, "photo sent");
            self.remember(
                message_id,
                Known { photo: Some(handle.clone()), text: Some(caption.clone()), from_bot: true },
            );
            Ok(SentMessage { message_id, file_id: Some(handle) })
        })
    }

    fn edit_caption(
        &self,
        chat_id: i64,
        message_id: i64,
        caption: &str,
        keyboard: Option<&Keyboard>,
    ) -> TransportFuture<'_, ()> {
        let lines = keyboard_lines(keyboard);
        let result = self.exists(chat_id, message_id).and_then(|()| {
            self.update_text(message_id, caption);
            self.emit(&Outbound::EditCaption { chat_id, message_id, caption, keyboard: lines })
        });
        Box::pin(async move { result })
    }

    fn edit_text(&self, chat_id: i64, message_id: i64, text: &str) -> TransportFuture<'_, ()> {
        let result = self.exists(chat_id, message_id).and_then(|()| {
            self.update_text(message_id, text);
            self.emit(&Outbound::EditText { chat_id, message_id, text })
        });
        Box::pin(async move { result })
    }

    fn edit_keyboard(
        &self,
        chat_id: i64,
        message_id: i64,
        keyboard: Option<&Keyboard>,
    ) -> TransportFuture<'_, ()> {
        let lines = keyboard_lines(keyboard);
        let result = self.exists(chat_id, message_id).and_then(|()| {
            self.emit(&Outbound::EditKeyboard { chat_id, message_id, keyboard: lines })
        });
        Box::pin(async move { result })
    }

    fn delete_message(&self, chat_id: i64, message_id: i64) -> TransportFuture<'_, ()> {
        let result = self.exists(chat_id, message_id).and_then(|()| {
            self.messages.lock().unwrap_or_else(PoisonError::into_inner).remove(&message_id);
            self.emit(&Outbound::DeleteMessage { chat_id, message_id })
        });
        Box::pin(async move { result })
    }

    fn notice(&self, chat_id: i64, text: &str) -> TransportFuture<'_, ()> {
        let result = self.emit(&Outbound::Notice { chat_id, text });
        Box::pin(async move { result })
    }
}
