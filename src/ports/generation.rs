//! Generation API port: image and text calls against a generative model.

use std::future::Future;
use std::pin::Pin;

use futures_util::Stream;
use serde::{Deserialize, Serialize};

use crate::error::BotError;

/// An image generation or edit request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageRequest {
    /// Prompt or edit instruction.
    pub prompt: String,
    /// Up to two source images, in order. Not written to cassettes.
    #[serde(skip_serializing, default)]
    pub images: Vec<Vec<u8>>,
    /// Number of attached images, kept for cassette readability.
    #[serde(default)]
    pub image_count: usize,
}

impl ImageRequest {
    /// Build a request with the given source images.
    #[must_use]
    pub fn new(prompt: impl Into<String>, images: Vec<Vec<u8>>) -> Self {
        let image_count = images.len();
        Self { prompt: prompt.into(), images, image_count }
    }
}

/// A single generated image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedImage {
    /// Raw image bytes (decoded from base64).
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    /// MIME type of the image (e.g., `"image/png"`).
    pub mime_type: String,
}

/// What an image call returned. At least one field is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationOutput {
    /// Text the model returned alongside (or instead of) the image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// The image, if one was produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<GeneratedImage>,
}

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The chat user.
    User,
    /// The model.
    Model,
}

/// One turn of conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Who said it.
    pub role: Role,
    /// What was said.
    pub text: String,
}

/// A single-shot or streamed text request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TextRequest {
    /// Earlier turns, oldest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<Turn>,
    /// The new user message.
    pub prompt: String,
    /// System instruction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
}

/// Boxed future returned by [`GenerationApi::generate_image`].
pub type ImageFuture<'a> =
    Pin<Box<dyn Future<Output = Result<GenerationOutput, BotError>> + Send + 'a>>;

/// Boxed future returned by [`GenerationApi::generate_text_once`].
pub type TextFuture<'a> = Pin<Box<dyn Future<Output = Result<String, BotError>> + Send + 'a>>;

/// Chunks of a streamed answer. An `Err` item ends the stream.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, BotError>> + Send>>;

/// Boxed future returned by [`GenerationApi::generate_text_stream`].
pub type StreamFuture<'a> = Pin<Box<dyn Future<Output = Result<TextStream, BotError>> + Send + 'a>>;

/// Generates images and text via an external model API.
///
/// Every method reports safety blocks as [`BotError::SafetyBlocked`] so
/// callers can tell them apart from generic failures.
pub trait GenerationApi: Send + Sync {
    /// Generate or edit an image.
    fn generate_image(&self, request: &ImageRequest) -> ImageFuture<'_>;

    /// Produce one complete text answer.
    fn generate_text_once(&self, request: &TextRequest) -> TextFuture<'_>;

    /// Stream a text answer chunk by chunk.
    fn generate_text_stream(&self, request: &TextRequest) -> StreamFuture<'_>;
}

/// Serde helper for serializing `Vec<u8>` as base64 strings in cassettes.
mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize bytes as base64 string.
    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(data);
        serializer.serialize_str(&encoded)
    }

    /// Deserialize base64 string to bytes.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}
