//! Incremental rendering of a streamed text answer into one message.
//!
//! Edits are batched: one goes out when the edit interval has passed or
//! enough new characters are pending. A rate-limited edit is retried with
//! bounded backoff; the stream itself is never restarted.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::BotError;
use crate::ports::{TextStream, Transport};
use crate::render::fit;

/// Marker appended while text is still arriving.
const TYPING_MARK: &str = " ✍️";

/// Batching and retry knobs.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Edit when this much time passed since the last edit.
    pub edit_interval: Duration,
    /// Edit when this many characters are pending.
    pub min_chars: usize,
    /// Retries of a rate-limited edit.
    pub retry_attempts: u32,
    /// Delay before the first retry; doubles per attempt.
    pub backoff_base: Duration,
    /// Transport text limit, characters.
    pub text_limit: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            edit_interval: Duration::from_millis(1700),
            min_chars: 150,
            retry_attempts: 3,
            backoff_base: Duration::from_secs(1),
            text_limit: 4096,
        }
    }
}

/// How a stream ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSummary {
    /// Everything received.
    pub text: String,
    /// Whether the stream ended without error and with content.
    pub complete: bool,
}

/// Render `stream` into the text message `message_id`.
///
/// An error item ends the stream and is shown after the partial text. If the
/// message becomes uneditable, editing stops and the rest is discarded.
pub async fn stream_to_message(
    transport: &dyn Transport,
    chat_id: i64,
    message_id: i64,
    mut stream: TextStream,
    options: &StreamOptions,
) -> StreamSummary {
    let mut full = String::new();
    let mut pending = 0usize;
    let mut last_edit = Instant::now();
    let mut failure: Option<BotError> = None;

    while let Some(item) = stream.next().await {
        match item {
            Ok(chunk) => {
                pending += chunk.chars().count();
                full.push_str(&chunk);
            }
            Err(e) => {
                warn!(chat_id, error = %e, "stream ended with error");
                failure = Some(e);
                break;
            }
        }

        if pending > 0 && (last_edit.elapsed() >= options.edit_interval || pending >= options.min_chars)
        {
            let shown = fit(&format!("{full}{TYPING_MARK}"), options.text_limit);
            match edit_with_retry(transport, chat_id, message_id, &shown, options).await {
                Ok(()) => {}
                Err(e) if e.is_not_editable() => {
                    debug!(chat_id, message_id, "answer message gone, stopping stream");
                    return StreamSummary { text: full, complete: false };
                }
                Err(e) => warn!(chat_id, error = %e, "intermediate edit failed"),
            }
            pending = 0;
            last_edit = Instant::now();
        }
    }

    let final_text = match &failure {
        Some(e) if full.trim().is_empty() => format!("⚠️ {}", e.user_message()),
        Some(e) => format!("⚠️ {}\n\n[ {} ]", full.trim(), e.user_message()),
        None if full.trim().is_empty() => "[Empty response]".to_string(),
        None => full.trim().to_string(),
    };
    if let Err(e) =
        edit_with_retry(transport, chat_id, message_id, &fit(&final_text, options.text_limit), options)
            .await
    {
        warn!(chat_id, error = %e, "final edit failed, partial text stays");
    }

    let complete = failure.is_none() && !full.trim().is_empty();
    StreamSummary { text: full, complete }
}

/// Edit a text message, retrying rate-limit refusals with backoff.
///
/// # Errors
///
/// Returns the last error once retries are exhausted or on any other failure.
pub async fn edit_with_retry(
    transport: &dyn Transport,
    chat_id: i64,
    message_id: i64,
    text: &str,
    options: &StreamOptions,
) -> Result<(), BotError> {
    let mut attempt = 0u32;
    loop {
        match transport.edit_text(chat_id, message_id, text).await {
            Err(BotError::RateLimited { retry_after_secs }) if attempt < options.retry_attempts => {
                let backoff = options.backoff_base * 2u32.saturating_pow(attempt);
                let wait = backoff.max(Duration::from_secs(retry_after_secs));
                attempt += 1;
                warn!(chat_id, attempt, wait_ms = wait.as_millis(), "edit rate limited, backing off");
                tokio::time::sleep(wait).await;
            }
            other => return other,
        }
    }
}
