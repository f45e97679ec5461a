//! Live adapter for the Gemini generative language API.

use std::collections::VecDeque;
use std::io::Cursor;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use base64::Engine;
use futures_util::{stream, Stream, StreamExt};
use image::ImageFormat;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::ApiConfig;
use crate::error::{truncate_chars, BotError};
use crate::ports::generation::{ImageFuture, StreamFuture, TextFuture};
use crate::ports::{GeneratedImage, GenerationApi, GenerationOutput, ImageRequest, Role, TextRequest, TextStream};

/// Longest raw body quoted in an HTTP error.
const ERROR_BODY_CHARS: usize = 500;

/// Longest side of an image re-encoded to fit the size cap.
const REENCODE_MAX_SIDE: u32 = 2048;

/// Gemini API client with round-robin keys and per-call timeouts.
pub struct GeminiApi {
    client: Client,
    stream_client: Client,
    keys: Vec<String>,
    next_key: AtomicUsize,
    base_url: String,
    image_model: String,
    text_model: String,
    image_timeout: Duration,
    text_timeout: Duration,
    stream_connect_timeout: Duration,
    stream_read_timeout: Duration,
    max_prompt_chars: usize,
    max_image_bytes: usize,
}

impl GeminiApi {
    /// Create a client for `base_url` using `keys` in turn.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::MissingApiKey`] without keys, or a network error
    /// if the HTTP client cannot be built.
    pub fn new(keys: Vec<String>, base_url: String, config: &ApiConfig) -> Result<Self, BotError> {
        if keys.is_empty() {
            return Err(BotError::MissingApiKey {
                provider: "Gemini".into(),
                env_var: "GEMINI_API_KEY".into(),
            });
        }
        let stream_connect_timeout = Duration::from_secs(config.stream_connect_timeout_secs);
        Ok(Self {
            client: Client::builder().build()?,
            stream_client: Client::builder().connect_timeout(stream_connect_timeout).build()?,
            keys,
            next_key: AtomicUsize::new(0),
            base_url: base_url.trim_end_matches('/').to_string(),
            image_model: config.image_model.clone(),
            text_model: config.text_model.clone(),
            image_timeout: Duration::from_secs(config.image_timeout_secs),
            text_timeout: Duration::from_secs(config.text_timeout_secs),
            stream_connect_timeout,
            stream_read_timeout: Duration::from_secs(config.stream_read_timeout_secs),
            max_prompt_chars: config.max_prompt_chars,
            max_image_bytes: config.max_image_bytes,
        })
    }

    fn key(&self) -> &str {
        let i = self.next_key.fetch_add(1, Ordering::Relaxed) % self.keys.len();
        &self.keys[i]
    }

    fn url(&self, model: &str, method: &str) -> String {
        format!("{}/v1beta/models/{model}:{method}", self.base_url)
    }

    async fn post(&self, url: &str, body: &Value, timeout: Duration) -> Result<GeminiResponse, BotError> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", self.key())
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| request_error(e, timeout))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| request_error(e, timeout))?;
        if !status.is_success() {
            return Err(http_error(status.as_u16(), &text));
        }
        serde_json::from_str(&text).map_err(|e| BotError::Api {
            status: status.as_u16(),
            message: format!("Failed to parse response: {e}"),
        })
    }

    fn image_body(&self, request: &ImageRequest) -> Result<Value, BotError> {
        let mut parts = vec![json!({ "text": truncate_chars(&request.prompt, self.max_prompt_chars) })];
        for image in request.images.iter().take(2) {
            parts.push(inline_part(image, self.max_image_bytes)?);
        }
        Ok(json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": {
                "candidateCount": 1,
                "responseModalities": ["TEXT", "IMAGE"],
            },
        }))
    }

    fn text_body(&self, request: &TextRequest) -> Value {
        let mut contents: Vec<Value> = request
            .history
            .iter()
            .map(|turn| {
                let role = match turn.role {
                    Role::User => "user",
                    Role::Model => "model",
                };
                json!({ "role": role, "parts": [{ "text": turn.text }] })
            })
            .collect();
        contents.push(json!({
            "role": "user",
            "parts": [{ "text": truncate_chars(&request.prompt, self.max_prompt_chars) }],
        }));

        let mut body = json!({
            "contents": contents,
            "generationConfig": {
                "temperature": 0.7,
                "thinkingConfig": { "thinkingBudget": 0 },
            },
        });
        if let Some(system) = request.system.as_deref().filter(|s| !s.trim().is_empty()) {
            body["system_instruction"] = json!({ "parts": [{ "text": system }] });
        }
        body
    }
}

impl GenerationApi for GeminiApi {
    fn generate_image(&self, request: &ImageRequest) -> ImageFuture<'_> {
        let body = self.image_body(request);
        Box::pin(async move {
            let body = body?;
            let url = self.url(&self.image_model, "generateContent");
            debug!(model = %self.image_model, "image request");
            let response = self.post(&url, &body, self.image_timeout).await?;
            image_output(first_candidate(response)?)
        })
    }

    fn generate_text_once(&self, request: &TextRequest) -> TextFuture<'_> {
        let body = self.text_body(request);
        Box::pin(async move {
            let url = self.url(&self.text_model, "generateContent");
            debug!(model = %self.text_model, "text request");
            let response = self.post(&url, &body, self.text_timeout).await?;
            let candidate = first_candidate(response)?;
            let text = candidate_text(&candidate);
            if text.trim().is_empty() {
                return Err(BotError::EmptyResult);
            }
            Ok(text)
        })
    }

    fn generate_text_stream(&self, request: &TextRequest) -> StreamFuture<'_> {
        let body = self.text_body(request);
        Box::pin(async move {
            let url = format!("{}?alt=sse", self.url(&self.text_model, "streamGenerateContent"));
            debug!(model = %self.text_model, "text stream request");
            let response = self
                .stream_client
                .post(&url)
                .header("x-goog-api-key", self.key())
                .json(&body)
                .send()
                .await
                .map_err(|e| request_error(e, self.stream_connect_timeout))?;

            let status = response.status();
            if !status.is_success() {
                return Err(stream_start_error(status.as_u16(), response.text().await));
            }
            Ok(sse_text_stream(response.bytes_stream(), self.stream_read_timeout))
        })
    }
}

fn request_error(e: reqwest::Error, timeout: Duration) -> BotError {
    if e.is_timeout() {
        BotError::Timeout { seconds: timeout.as_secs() }
    } else {
        BotError::Network(e)
    }
}

/// Error for a non-success HTTP status, preferring the API's own message.
fn http_error(status: u16, body: &str) -> BotError {
    let message = serde_json::from_str::<GeminiResponse>(body)
        .ok()
        .and_then(|r| r.error)
        .map_or_else(|| truncate_chars(body.trim(), ERROR_BODY_CHARS), |e| e.message);
    BotError::Api { status, message }
}

/// Error for a rejected stream request; an unreadable body still keeps the status.
fn stream_start_error<E: std::fmt::Display>(status: u16, body: Result<String, E>) -> BotError {
    match body {
        Ok(text) => http_error(status, &text),
        Err(e) => BotError::Api { status, message: format!("Failed to read error response: {e}") },
    }
}

/// `inlineData` part for an input image, re-encoded as JPEG when over `max`.
fn inline_part(bytes: &[u8], max: usize) -> Result<Value, BotError> {
    let (data, mime) = if bytes.len() > max {
        let jpeg = reencode_jpeg(bytes)?;
        if jpeg.len() > max {
            return Err(BotError::InvalidArgument(format!(
                "Image too large: {} bytes after re-encoding, limit {max}",
                jpeg.len()
            )));
        }
        debug!(before = bytes.len(), after = jpeg.len(), "input image re-encoded");
        (jpeg, "image/jpeg")
    } else {
        (bytes.to_vec(), detect_mime(bytes))
    };
    let encoded = base64::engine::general_purpose::STANDARD.encode(data);
    Ok(json!({ "inlineData": { "mimeType": mime, "data": encoded } }))
}

/// MIME type from magic bytes; unknown content is treated as PNG.
#[must_use]
pub fn detect_mime(bytes: &[u8]) -> &'static str {
    match image::guess_format(bytes) {
        Ok(ImageFormat::Jpeg) => "image/jpeg",
        Ok(ImageFormat::Gif) => "image/gif",
        Ok(ImageFormat::WebP) => "image/webp",
        _ => "image/png",
    }
}

fn reencode_jpeg(bytes: &[u8]) -> Result<Vec<u8>, BotError> {
    let mut img = image::load_from_memory(bytes)
        .map_err(|e| BotError::InvalidArgument(format!("Unreadable image: {e}")))?;
    if img.width() > REENCODE_MAX_SIDE || img.height() > REENCODE_MAX_SIDE {
        img = img.thumbnail(REENCODE_MAX_SIDE, REENCODE_MAX_SIDE);
    }
    let rgb = image::DynamicImage::ImageRgb8(img.to_rgb8());
    let mut out = Cursor::new(Vec::new());
    rgb.write_to(&mut out, ImageFormat::Jpeg)
        .map_err(|e| BotError::InvalidArgument(format!("JPEG encoding failed: {e}")))?;
    Ok(out.into_inner())
}

/// The first candidate, after API-level error and safety checks.
fn first_candidate(response: GeminiResponse) -> Result<Candidate, BotError> {
    if let Some(error) = response.error {
        return Err(BotError::Api { status: error.code.unwrap_or(200), message: error.message });
    }
    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        warn!(reason = %reason, "prompt blocked");
        return Err(BotError::SafetyBlocked { category: Some(reason) });
    }
    let candidate = response.candidates.into_iter().next().ok_or_else(|| BotError::Api {
        status: 200,
        message: "Response has no candidates".into(),
    })?;
    check_finish(&candidate)?;
    Ok(candidate)
}

fn check_finish(candidate: &Candidate) -> Result<(), BotError> {
    match candidate.finish_reason.as_deref() {
        None | Some("STOP" | "MAX_TOKENS" | "FINISH_REASON_UNSPECIFIED") => Ok(()),
        Some("SAFETY" | "IMAGE_SAFETY" | "PROHIBITED_CONTENT") => {
            let category = candidate
                .safety_ratings
                .iter()
                .find(|r| r.blocked)
                .or_else(|| {
                    candidate
                        .safety_ratings
                        .iter()
                        .find(|r| matches!(r.probability.as_deref(), Some("HIGH" | "MEDIUM")))
                })
                .map(|r| r.category.clone());
            warn!(category = ?category, "response blocked by safety filter");
            Err(BotError::SafetyBlocked { category })
        }
        Some(other) => {
            warn!(reason = other, "generation stopped early");
            Err(BotError::Stopped { reason: other.to_string() })
        }
    }
}

/// Concatenated non-thought text parts.
fn candidate_text(candidate: &Candidate) -> String {
    candidate
        .content
        .iter()
        .flat_map(|c| c.parts.iter())
        .filter(|p| !p.thought)
        .filter_map(|p| p.text.as_deref())
        .collect()
}

fn image_output(candidate: Candidate) -> Result<GenerationOutput, BotError> {
    let text = candidate_text(&candidate);
    let inline = candidate
        .content
        .into_iter()
        .flat_map(|c| c.parts)
        .find_map(|p| p.inline_data);
    let image = match inline {
        Some(inline) => {
            let data = base64::engine::general_purpose::STANDARD.decode(&inline.data).map_err(|e| {
                BotError::Api { status: 200, message: format!("Failed to decode base64: {e}") }
            })?;
            Some(GeneratedImage { data, mime_type: inline.mime_type })
        }
        None => None,
    };
    let text = Some(text.trim().to_string()).filter(|t| !t.is_empty());
    if text.is_none() && image.is_none() {
        return Err(BotError::EmptyResult);
    }
    Ok(GenerationOutput { text, image })
}

/// Decoder state for a server-sent-events body.
struct SseState<S> {
    body: Pin<Box<S>>,
    buffer: Vec<u8>,
    pending: VecDeque<Result<String, BotError>>,
    finished: bool,
    read_timeout: Duration,
}

impl<S> SseState<S> {
    fn drain_lines(&mut self) {
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.decode_line(&String::from_utf8_lossy(&line));
        }
    }

    fn decode_line(&mut self, line: &str) {
        let Some(payload) = line.trim().strip_prefix("data:") else {
            return;
        };
        let payload = payload.trim();
        if payload.is_empty() || payload == "[DONE]" {
            return;
        }
        let response: GeminiResponse = match serde_json::from_str(payload) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "malformed stream chunk skipped");
                return;
            }
        };
        if let Some(error) = response.error {
            let status = error.code.unwrap_or(200);
            self.pending.push_back(Err(BotError::Api { status, message: error.message }));
            return;
        }
        if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
            self.pending.push_back(Err(BotError::SafetyBlocked { category: Some(reason) }));
            return;
        }
        let Some(candidate) = response.candidates.into_iter().next() else {
            return;
        };
        let text = candidate_text(&candidate);
        if !text.is_empty() {
            self.pending.push_back(Ok(text));
        }
        if let Err(e) = check_finish(&candidate) {
            self.pending.push_back(Err(e));
        }
    }
}

/// Turn an SSE body into a stream of text chunks.
///
/// Each read must complete within `read_timeout`. The first error item ends
/// the stream.
pub fn sse_text_stream<S, B, E>(body: S, read_timeout: Duration) -> TextStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]>,
    E: Into<BotError>,
{
    let state = SseState {
        body: Box::pin(body),
        buffer: Vec::new(),
        pending: VecDeque::new(),
        finished: false,
        read_timeout,
    };
    Box::pin(stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                if item.is_err() {
                    st.pending.clear();
                    st.finished = true;
                }
                return Some((item, st));
            }
            if st.finished {
                return None;
            }
            match tokio::time::timeout(st.read_timeout, st.body.next()).await {
                Err(_) => {
                    st.finished = true;
                    let seconds = st.read_timeout.as_secs();
                    return Some((Err(BotError::Timeout { seconds }), st));
                }
                Ok(None) => {
                    st.finished = true;
                    let rest = std::mem::take(&mut st.buffer);
                    st.decode_line(&String::from_utf8_lossy(&rest));
                }
                Ok(Some(Err(e))) => {
                    st.finished = true;
                    return Some((Err(e.into()), st));
                }
                Ok(Some(Ok(chunk))) => {
                    st.buffer.extend_from_slice(chunk.as_ref());
                    st.drain_lines();
                }
            }
        }
    }))
}

// --- Gemini API response types ---

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
    #[serde(default)]
    safety_ratings: Vec<SafetyRating>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    inline_data: Option<InlineData>,
    #[serde(default)]
    thought: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SafetyRating {
    category: String,
    #[serde(default)]
    blocked: bool,
    probability: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: Option<u16>,
    message: String,
}
