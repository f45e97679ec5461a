//! Chat transport port: inbound updates and the send/edit primitives.

use std::future::Future;
use std::pin::Pin;

use serde::Serialize;

use crate::error::BotError;

/// One inline keyboard button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Button {
    /// Visible label.
    pub text: String,
    /// Callback data sent back when pressed.
    pub data: String,
}

impl Button {
    /// Create a button.
    pub fn new(text: impl Into<String>, data: impl Into<String>) -> Self {
        Self { text: text.into(), data: data.into() }
    }
}

/// Rows of inline buttons.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Keyboard {
    /// Button rows, top to bottom.
    pub rows: Vec<Vec<Button>>,
}

impl Keyboard {
    /// Every callback data string, row by row.
    #[cfg(test)]
    #[must_use]
    pub fn callback_data(&self) -> Vec<&str> {
        self.rows.iter().flatten().map(|b| b.data.as_str()).collect()
    }
}

/// A message the transport delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SentMessage {
    /// Identifier of the new message.
    pub message_id: i64,
    /// Handle of the attached photo, for photo messages.
    pub file_id: Option<String>,
}

/// The message an inbound message replies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepliedMessage {
    /// Identifier of the replied message.
    pub message_id: i64,
    /// Photo handle, if it carries a photo.
    pub photo: Option<String>,
    /// Text or caption.
    pub text: Option<String>,
    /// Whether the bot sent it.
    pub from_bot: bool,
}

/// An inbound chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    /// Chat id; positive ids are private chats.
    pub chat_id: i64,
    /// Sender.
    pub user_id: i64,
    /// Identifier of this message.
    pub message_id: i64,
    /// Text, or the caption of a photo.
    pub text: Option<String>,
    /// Photo handle.
    pub photo: Option<String>,
    /// Album identifier shared by photos sent together.
    pub media_group_id: Option<String>,
    /// The message this one replies to.
    pub reply_to: Option<RepliedMessage>,
}

/// A button press.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackQuery {
    /// Chat of the pressed message.
    pub chat_id: i64,
    /// Who pressed.
    pub user_id: i64,
    /// The message carrying the keyboard.
    pub message_id: i64,
    /// Callback data of the button.
    pub data: String,
}

/// Anything the transport delivers to the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    /// A new message.
    Message(IncomingMessage),
    /// A button press.
    Callback(CallbackQuery),
}

/// Boxed future returned by [`Transport`] methods.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BotError>> + Send + 'a>>;

/// Sends and edits chat messages.
///
/// Edits and deletes of messages that are gone fail with
/// [`BotError::NotEditable`], which callers treat as non-fatal.
pub trait Transport: Send + Sync {
    /// Send a text message.
    fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
        keyboard: Option<&Keyboard>,
    ) -> TransportFuture<'_, SentMessage>;

    /// Send a photo with caption and keyboard.
    fn send_photo(
        &self,
        chat_id: i64,
        image: &[u8],
        caption: &str,
        reply_to: Option<i64>,
        keyboard: Option<&Keyboard>,
    ) -> TransportFuture<'_, SentMessage>;

    /// Replace a photo message's caption and keyboard.
    fn edit_caption(
        &self,
        chat_id: i64,
        message_id: i64,
        caption: &str,
        keyboard: Option<&Keyboard>,
    ) -> TransportFuture<'_, ()>;

    /// Replace a text message's text.
    fn edit_text(&self, chat_id: i64, message_id: i64, text: &str) -> TransportFuture<'_, ()>;

    /// Remove or replace only the keyboard of a message.
    fn edit_keyboard(
        &self,
        chat_id: i64,
        message_id: i64,
        keyboard: Option<&Keyboard>,
    ) -> TransportFuture<'_, ()>;

    /// Delete a message.
    fn delete_message(&self, chat_id: i64, message_id: i64) -> TransportFuture<'_, ()>;

    /// Show a short transient notice (a callback answer).
    fn notice(&self, chat_id: i64, text: &str) -> TransportFuture<'_, ()>;
}
