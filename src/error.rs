//! Unified error type for imagen-bot.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest raw error text shown to a user.
const USER_ERROR_MAX_CHARS: usize = 200;

/// Errors that can occur while handling a chat request.
#[derive(Debug, Error)]
pub enum BotError {
    /// An API returned an error response.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message from the API.
        message: String,
    },

    /// A network error occurred.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// The type/style/artist catalog could not be loaded.
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The remote call did not finish in time.
    #[error("API timeout ({seconds}s)")]
    Timeout {
        /// The timeout that elapsed, in seconds.
        seconds: u64,
    },

    /// The remote model refused the request on safety grounds.
    #[error("Blocked by safety policy{}", category_suffix(.category))]
    SafetyBlocked {
        /// The triggering category, when the API names one.
        category: Option<String>,
    },

    /// The remote model stopped early for a reason other than safety.
    #[error("Generation stopped: {reason}")]
    Stopped {
        /// The finish reason reported by the API.
        reason: String,
    },

    /// The remote call returned neither text nor an image.
    #[error("The model returned an empty result")]
    EmptyResult,

    /// No API key configured for the provider.
    #[error("No API key for {provider}. Set {env_var} or add it to config file.")]
    MissingApiKey {
        /// The provider name.
        provider: String,
        /// The environment variable name.
        env_var: String,
    },

    /// The message can no longer be edited or deleted.
    #[error("Message can no longer be edited: {0}")]
    NotEditable(String),

    /// The transport asked us to slow down.
    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// Any other transport failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// An error served from a cassette.
    #[error("{message}")]
    Replayed {
        /// Category recorded with the error.
        kind: ErrorKind,
        /// Display text recorded with the error.
        message: String,
    },
}

/// Coarse error category, stable enough to store in cassettes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A remote call timed out.
    Timeout,
    /// A safety filter blocked the request or response.
    Safety,
    /// Generation stopped early.
    Stopped,
    /// Neither text nor image came back.
    Empty,
    /// The target message cannot be edited any more.
    NotEditable,
    /// Transport rate limit.
    RateLimited,
    /// Everything else.
    Other,
}

impl BotError {
    /// Category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::SafetyBlocked { .. } => ErrorKind::Safety,
            Self::Stopped { .. } => ErrorKind::Stopped,
            Self::EmptyResult => ErrorKind::Empty,
            Self::NotEditable(_) => ErrorKind::NotEditable,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Replayed { kind, .. } => *kind,
            Self::Network(e) if e.is_timeout() => ErrorKind::Timeout,
            _ => ErrorKind::Other,
        }
    }

    /// Whether the error means the target message is gone or frozen.
    #[must_use]
    pub fn is_not_editable(&self) -> bool {
        self.kind() == ErrorKind::NotEditable
    }

    /// Text shown to the chat user for this error.
    ///
    /// Timeouts and safety blocks keep their full text; everything else is
    /// cut to a short prefix so raw API bodies never flood the chat.
    #[must_use]
    pub fn user_message(&self) -> String {
        let text = self.to_string();
        match self.kind() {
            ErrorKind::Timeout | ErrorKind::Safety | ErrorKind::Empty => text,
            _ => truncate_chars(&text, USER_ERROR_MAX_CHARS),
        }
    }
}

fn category_suffix(category: &Option<String>) -> String {
    category.as_ref().map(|c| format!(": {c}")).unwrap_or_default()
}

/// Cut `text` to at most `max` characters, appending `...` when shortened.
#[must_use]
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(3)).collect();
    out.push_str("...");
    out
}
