//! Replaying adapter for the generation API port.

use std::sync::{Arc, Mutex};

use futures_util::stream;
use serde::Deserialize;
use serde_json::Value;

use super::{next_output, replay_error, replay_result};
use crate::cassette::replayer::CassetteReplayer;
use crate::error::BotError;
use crate::ports::generation::{ImageFuture, StreamFuture, TextFuture};
use crate::ports::{GenerationApi, GenerationOutput, ImageRequest, TextRequest, TextStream};

const PORT: &str = "generation_api";

/// Serves generation results recorded by
/// [`RecordingGenerationApi`](crate::adapters::recording::generation::RecordingGenerationApi).
pub struct ReplayingGenerationApi {
    replayer: Arc<Mutex<CassetteReplayer>>,
}

impl ReplayingGenerationApi {
    /// Replay from `replayer`.
    #[must_use]
    pub fn new(replayer: Arc<Mutex<CassetteReplayer>>) -> Self {
        Self { replayer }
    }
}

#[derive(Deserialize)]
struct RecordedStream {
    #[serde(default)]
    chunks: Vec<String>,
    #[serde(default)]
    error: Option<Value>,
}

impl GenerationApi for ReplayingGenerationApi {
    fn generate_image(&self, _request: &ImageRequest) -> ImageFuture<'_> {
        let result = next_output(&self.replayer, PORT, "generate_image")
            .and_then(replay_result::<GenerationOutput>);
        Box::pin(async move { result })
    }

    fn generate_text_once(&self, _request: &TextRequest) -> TextFuture<'_> {
        let result =
            next_output(&self.replayer, PORT, "generate_text_once").and_then(replay_result::<String>);
        Box::pin(async move { result })
    }

    fn generate_text_stream(&self, _request: &TextRequest) -> StreamFuture<'_> {
        let result = next_output(&self.replayer, PORT, "generate_text_stream")
            .and_then(replay_result::<RecordedStream>)
            .map(|recorded| {
                let mut items: Vec<Result<String, BotError>> =
                    recorded.chunks.into_iter().map(Ok).collect();
                if let Some(error) = recorded.error.filter(|e| !e.is_null()) {
                    items.push(Err(replay_error(&error)));
                }
                let stream: TextStream = Box::pin(stream::iter(items));
                stream
            });
        Box::pin(async move { result })
    }
}
