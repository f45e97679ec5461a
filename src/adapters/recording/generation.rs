//! Recording adapter for the generation API port.

use std::sync::{Arc, Mutex};

use futures_util::{stream, StreamExt};
use serde_json::{json, Value};

use super::{error_json, record_raw, record_result};
use crate::cassette::recorder::CassetteRecorder;
use crate::error::BotError;
use crate::ports::generation::{ImageFuture, StreamFuture, TextFuture};
use crate::ports::{GenerationApi, ImageRequest, TextRequest, TextStream};

const PORT: &str = "generation_api";

/// Delegates to an inner API and records every call.
pub struct RecordingGenerationApi {
    inner: Box<dyn GenerationApi>,
    recorder: Arc<Mutex<CassetteRecorder>>,
}

impl RecordingGenerationApi {
    /// Wrap `inner`, writing calls to `recorder`.
    pub fn new(inner: Box<dyn GenerationApi>, recorder: Arc<Mutex<CassetteRecorder>>) -> Self {
        Self { inner, recorder }
    }
}

impl GenerationApi for RecordingGenerationApi {
    fn generate_image(&self, request: &ImageRequest) -> ImageFuture<'_> {
        let request = request.clone();
        Box::pin(async move {
            let result = self.inner.generate_image(&request).await;
            record_result(&self.recorder, PORT, "generate_image", &request, &result);
            result
        })
    }

    fn generate_text_once(&self, request: &TextRequest) -> TextFuture<'_> {
        let request = request.clone();
        Box::pin(async move {
            let result = self.inner.generate_text_once(&request).await;
            record_result(&self.recorder, PORT, "generate_text_once", &request, &result);
            result
        })
    }

    fn generate_text_stream(&self, request: &TextRequest) -> StreamFuture<'_> {
        let request = request.clone();
        Box::pin(async move {
            let input = serde_json::to_value(&request).unwrap_or(Value::Null);
            match self.inner.generate_text_stream(&request).await {
                Ok(inner) => {
                    let tape = Tape {
                        recorder: Arc::clone(&self.recorder),
                        input,
                        chunks: Vec::new(),
                        error: None,
                    };
                    Ok(taped(inner, tape))
                }
                Err(e) => {
                    let output = json!({ "Err": error_json(&e) });
                    record_raw(&self.recorder, PORT, "generate_text_stream", input, output);
                    Err(e)
                }
            }
        })
    }
}

/// What a stream has yielded so far. Written to the cassette when dropped,
/// so streams abandoned part way are recorded too.
struct Tape {
    recorder: Arc<Mutex<CassetteRecorder>>,
    input: Value,
    chunks: Vec<String>,
    error: Option<Value>,
}

impl Drop for Tape {
    fn drop(&mut self) {
        let output = json!({ "Ok": { "chunks": self.chunks, "error": self.error } });
        record_raw(&self.recorder, PORT, "generate_text_stream", self.input.take(), output);
    }
}

fn taped(inner: TextStream, tape: Tape) -> TextStream {
    Box::pin(stream::unfold((inner, tape), |(mut inner, mut tape)| async move {
        let item = inner.next().await?;
        match &item {
            Ok(chunk) => tape.chunks.push(chunk.clone()),
            Err(e) => tape.error = Some(error_json(e)),
        }
        Some((item, (inner, tape)))
    }))
}
