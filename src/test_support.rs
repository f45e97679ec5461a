//! In-memory fakes for the ports, shared by unit tests.

use std::collections::{HashMap, VecDeque};
use std::future::ready;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::stream;

use crate::catalog::tests::sample_catalog;
use crate::chat::ChatStore;
use crate::context::{seeded_rng, BotOptions, ServiceContext};
use crate::error::BotError;
use crate::ports::generation::{ImageFuture, StreamFuture, TextFuture};
use crate::ports::media::FetchFuture;
use crate::ports::transport::TransportFuture;
use crate::ports::{
    GeneratedImage, GenerationApi, GenerationOutput, ImageRequest, Keyboard, MediaFetcher,
    SentMessage, TextRequest, TextStream, Transport,
};
use crate::prompt::PromptTemplates;
use crate::state::MemoryStateStore;

/// One recorded transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    SendText { chat_id: i64, message_id: i64, text: String, keyboard: Option<Keyboard> },
    SendPhoto { chat_id: i64, message_id: i64, caption: String, keyboard: Option<Keyboard> },
    EditCaption { chat_id: i64, message_id: i64, caption: String, keyboard: Option<Keyboard> },
    EditText { chat_id: i64, message_id: i64, text: String },
    EditKeyboard { chat_id: i64, message_id: i64, keyboard: Option<Keyboard> },
    Delete { chat_id: i64, message_id: i64 },
    Notice { chat_id: i64, text: String },
}

/// Transport that records every call.
#[derive(Debug)]
pub struct FakeTransport {
    ops: Mutex<Vec<Op>>,
    next_id: AtomicI64,
    edit_failures: Mutex<VecDeque<BotError>>,
    photo_failures: Mutex<VecDeque<BotError>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            ops: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(100),
            edit_failures: Mutex::new(VecDeque::new()),
            photo_failures: Mutex::new(VecDeque::new()),
        }
    }

    pub fn ops(&self) -> Vec<Op> {
        self.ops.lock().unwrap().clone()
    }

    pub fn edited_texts(&self) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                Op::EditText { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                Op::SendText { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn notices(&self) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                Op::Notice { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn photos(&self) -> Vec<(i64, String)> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                Op::SendPhoto { message_id, caption, .. } => Some((message_id, caption)),
                _ => None,
            })
            .collect()
    }

    pub fn fail_next_edit(&self, error: BotError) {
        self.edit_failures.lock().unwrap().push_back(error);
    }

    pub fn fail_next_photo(&self, error: BotError) {
        self.photo_failures.lock().unwrap().push_back(error);
    }

    fn record(&self, op: Op) {
        self.ops.lock().unwrap().push(op);
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn edit_failure(&self) -> Option<BotError> {
        self.edit_failures.lock().unwrap().pop_front()
    }
}

impl Transport for FakeTransport {
    fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        _reply_to: Option<i64>,
        keyboard: Option<&Keyboard>,
    ) -> TransportFuture<'_, SentMessage> {
        let message_id = self.next_id();
        self.record(Op::SendText {
            chat_id,
            message_id,
            text: text.to_string(),
            keyboard: keyboard.cloned(),
        });
        Box::pin(ready(Ok(SentMessage { message_id, file_id: None })))
    }

    fn send_photo(
        &self,
        chat_id: i64,
        _image: &[u8],
        caption: &str,
        _reply_to: Option<i64>,
        keyboard: Option<&Keyboard>,
    ) -> TransportFuture<'_, SentMessage> {
        if let Some(e) = self.photo_failures.lock().unwrap().pop_front() {
            return Box::pin(ready(Err(e)));
        }
        let message_id = self.next_id();
        self.record(Op::SendPhoto {
            chat_id,
            message_id,
            caption: caption.to_string(),
            keyboard: keyboard.cloned(),
        });
        let file_id = Some(format!("photo-{message_id}"));
        Box::pin(ready(Ok(SentMessage { message_id, file_id })))
    }

    fn edit_caption(
        &self,
        chat_id: i64,
        message_id: i64,
        caption: &str,
        keyboard: Option<&Keyboard>,
    ) -> TransportFuture<'_, ()> {
        if let Some(e) = self.edit_failure() {
            return Box::pin(ready(Err(e)));
        }
        self.record(Op::EditCaption {
            chat_id,
            message_id,
            caption: caption.to_string(),
            keyboard: keyboard.cloned(),
        });
        Box::pin(ready(Ok(())))
    }

    fn edit_text(&self, chat_id: i64, message_id: i64, text: &str) -> TransportFuture<'_, ()> {
        if let Some(e) = self.edit_failure() {
            return Box::pin(ready(Err(e)));
        }
        self.record(Op::EditText { chat_id, message_id, text: text.to_string() });
        Box::pin(ready(Ok(())))
    }

    fn edit_keyboard(
        &self,
        chat_id: i64,
        message_id: i64,
        keyboard: Option<&Keyboard>,
    ) -> TransportFuture<'_, ()> {
        self.record(Op::EditKeyboard { chat_id, message_id, keyboard: keyboard.cloned() });
        Box::pin(ready(Ok(())))
    }

    fn delete_message(&self, chat_id: i64, message_id: i64) -> TransportFuture<'_, ()> {
        self.record(Op::Delete { chat_id, message_id });
        Box::pin(ready(Ok(())))
    }

    fn notice(&self, chat_id: i64, text: &str) -> TransportFuture<'_, ()> {
        self.record(Op::Notice { chat_id, text: text.to_string() });
        Box::pin(ready(Ok(())))
    }
}

#[derive(Default)]
struct FakeApiInner {
    images: Mutex<VecDeque<Result<GenerationOutput, BotError>>>,
    texts: Mutex<VecDeque<Result<String, BotError>>>,
    streams: Mutex<VecDeque<Vec<Result<String, BotError>>>>,
    image_requests: Mutex<Vec<ImageRequest>>,
    text_requests: Mutex<Vec<TextRequest>>,
    hang_text: AtomicBool,
}

/// Generation API answering from queues; unqueued image calls return a
/// small PNG-tagged image.
#[derive(Clone, Default)]
pub struct FakeApi {
    inner: Arc<FakeApiInner>,
}

impl FakeApi {
    pub fn push_image(&self, result: Result<GenerationOutput, BotError>) {
        self.inner.images.lock().unwrap().push_back(result);
    }

    pub fn push_text(&self, result: Result<String, BotError>) {
        self.inner.texts.lock().unwrap().push_back(result);
    }

    pub fn push_stream(&self, chunks: Vec<Result<String, BotError>>) {
        self.inner.streams.lock().unwrap().push_back(chunks);
    }

    /// Make every later single-shot text call wait forever.
    pub fn hang_text(&self) {
        self.inner.hang_text.store(true, Ordering::SeqCst);
    }

    pub fn image_requests(&self) -> Vec<ImageRequest> {
        self.inner.image_requests.lock().unwrap().clone()
    }

    pub fn text_requests(&self) -> Vec<TextRequest> {
        self.inner.text_requests.lock().unwrap().clone()
    }
}

pub fn image_output(text: Option<&str>) -> GenerationOutput {
    GenerationOutput {
        text: text.map(String::from),
        image: Some(GeneratedImage { data: vec![0x89, b'P', b'N', b'G'], mime_type: "image/png".into() }),
    }
}

impl GenerationApi for FakeApi {
    fn generate_image(&self, request: &ImageRequest) -> ImageFuture<'_> {
        self.inner.image_requests.lock().unwrap().push(request.clone());
        let result =
            self.inner.images.lock().unwrap().pop_front().unwrap_or_else(|| Ok(image_output(None)));
        Box::pin(ready(result))
    }

    fn generate_text_once(&self, request: &TextRequest) -> TextFuture<'_> {
        self.inner.text_requests.lock().unwrap().push(request.clone());
        if self.inner.hang_text.load(Ordering::SeqCst) {
            return Box::pin(std::future::pending());
        }
        let result =
            self.inner.texts.lock().unwrap().pop_front().unwrap_or_else(|| Ok("text".into()));
        Box::pin(ready(result))
    }

    fn generate_text_stream(&self, request: &TextRequest) -> StreamFuture<'_> {
        self.inner.text_requests.lock().unwrap().push(request.clone());
        let chunks = self.inner.streams.lock().unwrap().pop_front().unwrap_or_default();
        let stream: TextStream = Box::pin(stream::iter(chunks));
        Box::pin(ready(Ok(stream)))
    }
}

/// Media fetcher backed by a map.
#[derive(Clone, Default)]
pub struct FakeMedia {
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl FakeMedia {
    pub fn insert(&self, handle: &str, bytes: &[u8]) {
        self.files.lock().unwrap().insert(handle.to_string(), bytes.to_vec());
    }
}

impl MediaFetcher for FakeMedia {
    fn fetch_bytes(&self, _chat_id: i64, handle: &str) -> FetchFuture<'_> {
        let bytes = self.files.lock().unwrap().get(handle).cloned();
        Box::pin(ready(bytes))
    }
}

/// A context wired to fakes, plus handles to inspect them.
pub struct Harness {
    pub ctx: Arc<ServiceContext>,
    pub transport: Arc<FakeTransport>,
    pub api: FakeApi,
    pub media: FakeMedia,
}

pub fn harness() -> Harness {
    let transport = Arc::new(FakeTransport::new());
    let api = FakeApi::default();
    let media = FakeMedia::default();
    // Photos the bot sends come back with these handles.
    for id in 100..140 {
        media.insert(&format!("photo-{id}"), &[0x89, b'P', b'N', b'G', id as u8]);
    }
    let ctx = ServiceContext {
        api: Box::new(api.clone()),
        transport: transport.clone(),
        media: Box::new(media.clone()),
        states: Box::new(MemoryStateStore::new(100, chrono::Duration::hours(1))),
        chats: ChatStore::new(),
        catalog: sample_catalog(),
        templates: PromptTemplates::default(),
        options: BotOptions::default(),
        rng: seeded_rng(Some(7)),
    };
    Harness { ctx: Arc::new(ctx), transport, api, media }
}
