//! Routes inbound messages and button presses to the flows that handle them.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use tracing::{debug, error, info};

use crate::callbacks;
use crate::catalog::EntityKind;
use crate::chat::Suffix;
use crate::context::ServiceContext;
use crate::media_group::{GroupHandler, MediaGroupBuffer};
use crate::orchestrator::{self, Combination, NewGeneration};
use crate::parser::parse;
use crate::ports::{IncomingMessage, Update};
use crate::render::catalog_listing;
use crate::state::StateKey;

/// Usage text for `/start` and `/help`.
pub const HELP: &str = "\
Image generation:
  /img <prompt> [flags]   or   ! <prompt> [flags]
  !! <prompt>             random type, style and artist
Flags:
  -t <n|alias>  type      -s <n|alias|group>  style      -a <n|alias>  artist
  -t1s72a90     several indices at once
  -s(1,4,9)     random pick from a list
  -ts           random type and style      -r  random everything
  --ar 16:9     aspect ratio (1:1, 4:3, 16:9, 3:4, 9:16)
Photos:
  caption a photo with ! <prompt> to redraw it
  reply to a photo with a photo, or send two as an album, to combine them
Questions:
  /ask <question>   or   ? <question>
Settings:
  /types  /styles  /artists
  /suffix [set <text>|reset|clear]
  /system [set <text>|reset]";

const IMG_USAGE: &str = "Add a description: /img <prompt> [flags]. See /help for flags.";
const ASK_USAGE: &str = "Add a question: /ask <question>";
const ALBUM_NOTICE: &str = "Send exactly two photos to combine them.";
const FAILURE_NOTICE: &str = "Something went wrong while handling that. Please try again.";

/// One photo of an album.
#[derive(Debug, Clone)]
pub struct AlbumPhoto {
    /// Chat the album arrived in.
    pub chat_id: i64,
    /// Message carrying the photo.
    pub message_id: i64,
    /// Photo handle.
    pub handle: String,
    /// Caption, if any.
    pub caption: Option<String>,
}

/// Classified text command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command<'a> {
    Generate,
    Ask(&'a str),
    List(EntityKind),
    Suffix(&'a str),
    System(&'a str),
    Help,
    Plain,
}

/// Inbound update router.
pub struct Router {
    ctx: Arc<ServiceContext>,
    albums: MediaGroupBuffer<AlbumPhoto>,
}

impl Router {
    /// Router over a service context.
    #[must_use]
    pub fn new(ctx: Arc<ServiceContext>) -> Self {
        let album_ctx = Arc::clone(&ctx);
        let handler: GroupHandler<AlbumPhoto> =
            Arc::new(move |_group: String, photos: Vec<AlbumPhoto>| -> BoxFuture<'static, ()> {
                let ctx = Arc::clone(&album_ctx);
                Box::pin(async move { handle_album(&ctx, photos).await })
            });
        let albums = MediaGroupBuffer::new(ctx.options.media_group_window, handler);
        Self { ctx, albums }
    }

    /// The service context.
    #[must_use]
    pub fn context(&self) -> &Arc<ServiceContext> {
        &self.ctx
    }

    /// Handle one update.
    pub async fn handle(&self, update: Update) {
        match update {
            Update::Callback(query) => callbacks::dispatch(&self.ctx, &query).await,
            Update::Message(message) => self.handle_message(message).await,
        }
    }

    /// Handle one update on its own task, so a panic is logged and answered
    /// with a generic notice instead of ending the caller.
    pub async fn handle_isolated(self: &Arc<Self>, update: Update) {
        let chat_id = match &update {
            Update::Message(m) => m.chat_id,
            Update::Callback(q) => q.chat_id,
        };
        let router = Arc::clone(self);
        let task = tokio::spawn(async move { router.handle(update).await });
        if let Err(e) = task.await {
            error!(chat_id, error = %e, "update handler failed");
            orchestrator::notify(&self.ctx, chat_id, FAILURE_NOTICE).await;
        }
    }

    /// Wait for buffered albums to be handled.
    pub async fn settle(&self) {
        self.albums.settle().await;
    }

    async fn handle_message(&self, message: IncomingMessage) {
        let ctx = &*self.ctx;
        let chat_id = message.chat_id;
        let text = message.text.as_deref().map_or("", str::trim);

        if let Some(photo) = message.photo.clone() {
            self.handle_photo(&message, photo, text).await;
            return;
        }
        if text.is_empty() {
            return;
        }

        if let Some(replied) = &message.reply_to {
            let key = StateKey { chat_id, message_id: replied.message_id };
            if let Some(mut state) = ctx.states.get(key) {
                if state.is_awaiting_prompt_from(message.user_id) {
                    info!(chat_id, message_id = key.message_id, "prompt replaced by reply");
                    state.replace_prompt(text);
                    ctx.states.put(state.clone());
                    orchestrator::refresh(ctx, &state).await;
                    return;
                }
            }
        }

        match classify(text) {
            Command::Generate => generate_from_text(ctx, &message, text).await,
            Command::Ask(question) if question.is_empty() => {
                orchestrator::send_text(ctx, chat_id, ASK_USAGE, Some(message.message_id)).await;
            }
            Command::Ask(question) => {
                orchestrator::answer(ctx, chat_id, Some(message.message_id), question).await;
            }
            Command::List(kind) => {
                for chunk in catalog_listing(&ctx.catalog, kind, ctx.options.text_limit) {
                    orchestrator::send_text(ctx, chat_id, &chunk, None).await;
                }
            }
            Command::Suffix(args) => {
                let reply = suffix_command(ctx, chat_id, args);
                orchestrator::send_text(ctx, chat_id, &reply, Some(message.message_id)).await;
            }
            Command::System(args) => {
                let reply = system_command(ctx, chat_id, args);
                orchestrator::send_text(ctx, chat_id, &reply, Some(message.message_id)).await;
            }
            Command::Help => {
                orchestrator::send_text(ctx, chat_id, HELP, None).await;
            }
            Command::Plain => {
                let to_bot_text =
                    message.reply_to.as_ref().is_some_and(|r| r.from_bot && r.photo.is_none());
                if to_bot_text || chat_id > 0 {
                    orchestrator::answer(ctx, chat_id, Some(message.message_id), text).await;
                } else {
                    debug!(chat_id, "plain group message ignored");
                }
            }
        }
    }

    async fn handle_photo(&self, message: &IncomingMessage, photo: String, text: &str) {
        let ctx = &*self.ctx;
        let chat_id = message.chat_id;

        if let Some(group) = &message.media_group_id {
            let item = AlbumPhoto {
                chat_id,
                message_id: message.message_id,
                handle: photo,
                caption: message.text.clone(),
            };
            self.albums.push(&format!("{chat_id}:{group}"), item);
            return;
        }

        if let Some(replied_photo) = message.reply_to.as_ref().and_then(|r| r.photo.clone()) {
            let request = Combination {
                chat_id,
                reply_to: Some(message.message_id),
                first: replied_photo,
                second: photo,
                instruction: instruction_from_caption(text),
            };
            orchestrator::combine(ctx, request).await;
            return;
        }

        if classify(text) == Command::Generate {
            let mut intent = parse(text, &ctx.catalog);
            if intent.free_text.is_empty() {
                intent.free_text = ctx.templates.redraw_default.clone();
            }
            let request = NewGeneration {
                chat_id,
                reply_to: Some(message.message_id),
                intent,
                source: Some(photo),
            };
            orchestrator::new_generation(ctx, request).await;
            return;
        }

        debug!(chat_id, "photo without a command ignored");
    }
}

async fn generate_from_text(ctx: &ServiceContext, message: &IncomingMessage, text: &str) {
    let mut intent = parse(text, &ctx.catalog);
    if intent.free_text.is_empty() {
        if text.starts_with("!!") {
            intent.free_text = "random".to_string();
        } else {
            orchestrator::send_text(ctx, message.chat_id, IMG_USAGE, Some(message.message_id)).await;
            return;
        }
    }
    let request = NewGeneration {
        chat_id: message.chat_id,
        reply_to: Some(message.message_id),
        intent,
        source: None,
    };
    orchestrator::new_generation(ctx, request).await;
}

async fn handle_album(ctx: &ServiceContext, mut photos: Vec<AlbumPhoto>) {
    let Some(chat_id) = photos.first().map(|p| p.chat_id) else {
        return;
    };
    if photos.len() != 2 {
        info!(chat_id, count = photos.len(), "album is not a pair, skipped");
        orchestrator::notify(ctx, chat_id, ALBUM_NOTICE).await;
        return;
    }
    photos.sort_by_key(|p| p.message_id);
    let instruction = photos
        .iter()
        .find_map(|p| p.caption.as_deref().and_then(instruction_from_caption));
    let mut photos = photos.into_iter();
    let (Some(first), Some(second)) = (photos.next(), photos.next()) else {
        return;
    };
    let request = Combination {
        chat_id,
        reply_to: Some(first.message_id),
        first: first.handle,
        second: second.handle,
        instruction,
    };
    orchestrator::combine(ctx, request).await;
}

/// Combination instruction from a caption, without any trigger prefix.
fn instruction_from_caption(text: &str) -> Option<String> {
    let text = text.trim();
    let body = match split_command(text) {
        Some((name, rest)) if name.eq_ignore_ascii_case("img") => rest,
        _ => text.trim_start_matches('!'),
    };
    let body = body.trim();
    (!body.is_empty()).then(|| body.to_string())
}

/// Split `/command@bot rest` into the bare command and the rest.
fn split_command(text: &str) -> Option<(&str, &str)> {
    let body = text.strip_prefix('/')?;
    let (head, rest) = body.split_once(char::is_whitespace).unwrap_or((body, ""));
    let name = head.split('@').next().unwrap_or(head);
    Some((name, rest.trim()))
}

fn classify(text: &str) -> Command<'_> {
    if text.starts_with('!') {
        return Command::Generate;
    }
    if let Some(question) = text.strip_prefix('?') {
        return Command::Ask(question.trim());
    }
    let Some((name, rest)) = split_command(text) else {
        return Command::Plain;
    };
    match name.to_lowercase().as_str() {
        "img" => Command::Generate,
        "ask" => Command::Ask(rest),
        "types" => Command::List(EntityKind::Type),
        "styles" => Command::List(EntityKind::Style),
        "artists" => Command::List(EntityKind::Artist),
        "suffix" => Command::Suffix(rest),
        "system" => Command::System(rest),
        "start" | "help" => Command::Help,
        _ => Command::Plain,
    }
}

fn suffix_command(ctx: &ServiceContext, chat_id: i64, args: &str) -> String {
    let (verb, value) = args.split_once(char::is_whitespace).unwrap_or((args, ""));
    let value = value.trim();
    match verb.to_lowercase().as_str() {
        "" => {
            let chat = ctx.chats.get(chat_id);
            let current = chat.effective_suffix(&ctx.templates.default_image_suffix);
            match (&chat.suffix, current) {
                (Suffix::Disabled, _) => "Suffix is disabled.".to_string(),
                (Suffix::Default, Some(text)) => format!("Default suffix: {text}"),
                (Suffix::Default, None) => "No suffix is set.".to_string(),
                (Suffix::Custom(_), Some(text)) => format!("Current suffix: {text}"),
                (Suffix::Custom(_), None) => "No suffix is set.".to_string(),
            }
        }
        "set" if value.is_empty() => "Usage: /suffix set <text>".to_string(),
        "set" => {
            ctx.chats.update(chat_id, |c| c.suffix = Suffix::Custom(value.to_string()));
            info!(chat_id, "suffix set");
            format!("Suffix set: {value}")
        }
        "reset" => {
            ctx.chats.update(chat_id, |c| c.suffix = Suffix::Default);
            "Suffix reset to default.".to_string()
        }
        "clear" => {
            ctx.chats.update(chat_id, |c| c.suffix = Suffix::Disabled);
            "Suffix cleared.".to_string()
        }
        _ => "Usage: /suffix [set <text>|reset|clear]".to_string(),
    }
}

fn system_command(ctx: &ServiceContext, chat_id: i64, args: &str) -> String {
    let (verb, value) = args.split_once(char::is_whitespace).unwrap_or((args, ""));
    let value = value.trim();
    match verb.to_lowercase().as_str() {
        "" => {
            let chat = ctx.chats.get(chat_id);
            format!("System instruction: {}", chat.effective_system(&ctx.templates.default_system_prompt))
        }
        "set" if value.is_empty() => "Usage: /system set <text>".to_string(),
        "set" => {
            ctx.chats.update(chat_id, |c| c.system_prompt = Some(value.to_string()));
            info!(chat_id, "system instruction set");
            "System instruction updated.".to_string()
        }
        "reset" => {
            ctx.chats.update(chat_id, |c| c.system_prompt = None);
            "System instruction reset to default.".to_string()
        }
        _ => "Usage: /system [set <text>|reset]".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::RepliedMessage;
    use crate::state::tests::sample_state;
    use crate::test_support::{harness, Harness};

    fn text(chat_id: i64, body: &str) -> IncomingMessage {
        IncomingMessage {
            chat_id,
            user_id: 5,
            message_id: 1,
            text: Some(body.to_string()),
            photo: None,
            media_group_id: None,
            reply_to: None,
        }
    }

    fn photo(chat_id: i64, handle: &str, caption: Option<&str>) -> IncomingMessage {
        IncomingMessage {
            photo: Some(handle.to_string()),
            text: caption.map(String::from),
            ..text(chat_id, "")
        }
    }

    fn router(h: &Harness) -> Router {
        Router::new(Arc::clone(&h.ctx))
    }

    #[test]
    fn commands_are_classified() {
        assert_eq!(classify("!cat"), Command::Generate);
        assert_eq!(classify("!!"), Command::Generate);
        assert_eq!(classify("/img@imagen_bot cat"), Command::Generate);
        assert_eq!(classify("? why"), Command::Ask("why"));
        assert_eq!(classify("/ask@bot why not"), Command::Ask("why not"));
        assert_eq!(classify("/styles"), Command::List(EntityKind::Style));
        assert_eq!(classify("/suffix set grain"), Command::Suffix("set grain"));
        assert_eq!(classify("/start"), Command::Help);
        assert_eq!(classify("hello"), Command::Plain);
        assert_eq!(classify("/unknown"), Command::Plain);
    }

    #[test]
    fn caption_triggers_are_stripped() {
        assert_eq!(instruction_from_caption("! put them together"), Some("put them together".into()));
        assert_eq!(instruction_from_caption("/img merge"), Some("merge".into()));
        assert_eq!(instruction_from_caption("blend"), Some("blend".into()));
        assert_eq!(instruction_from_caption("  "), None);
    }

    #[tokio::test]
    async fn bang_generates() {
        let h = harness();
        router(&h).handle(Update::Message(text(-5, "!cat -t1"))).await;
        assert_eq!(h.api.image_requests()[0].prompt, "cat, a Photograph");
        assert_eq!(h.transport.photos().len(), 1);
    }

    #[tokio::test]
    async fn img_without_text_gets_usage() {
        let h = harness();
        let r = router(&h);
        r.handle(Update::Message(text(-5, "/img"))).await;
        r.handle(Update::Message(text(-5, "/img -t1"))).await;
        assert!(h.api.image_requests().is_empty());
        assert_eq!(h.transport.sent_texts(), vec![IMG_USAGE.to_string(), IMG_USAGE.to_string()]);
    }

    #[tokio::test]
    async fn double_bang_alone_is_random() {
        let h = harness();
        router(&h).handle(Update::Message(text(-5, "!!"))).await;
        let sent = &h.api.image_requests()[0];
        assert!(sent.prompt.starts_with("random, a "), "{}", sent.prompt);
    }

    #[tokio::test]
    async fn captioned_photo_is_redrawn() {
        let h = harness();
        h.media.insert("upload", &[7]);
        router(&h).handle(Update::Message(photo(-5, "upload", Some("! -s3")))).await;
        let sent = &h.api.image_requests()[0];
        assert!(sent.prompt.starts_with("Redraw the provided image in the specified style"));
        assert!(sent.prompt.contains("Origami"));
        assert_eq!(sent.images, vec![vec![7]]);
    }

    #[tokio::test]
    async fn uncaptioned_photo_is_ignored() {
        let h = harness();
        h.media.insert("upload", &[7]);
        router(&h).handle(Update::Message(photo(-5, "upload", None))).await;
        assert!(h.api.image_requests().is_empty());
        assert!(h.transport.ops().is_empty());
    }

    #[tokio::test]
    async fn photo_reply_to_photo_combines() {
        let h = harness();
        h.media.insert("old", &[1]);
        h.media.insert("new", &[2]);
        let mut message = photo(-5, "new", Some("make it one"));
        message.reply_to = Some(RepliedMessage {
            message_id: 9,
            photo: Some("old".into()),
            text: None,
            from_bot: false,
        });
        router(&h).handle(Update::Message(message)).await;

        let sent = &h.api.image_requests()[0];
        assert_eq!(sent.prompt, "make it one");
        assert_eq!(sent.images, vec![vec![1], vec![2]]);
    }

    #[tokio::test(start_paused = true)]
    async fn album_of_two_is_combined() {
        let h = harness();
        h.media.insert("p1", &[1]);
        h.media.insert("p2", &[2]);
        let r = router(&h);
        let mut first = photo(-5, "p1", None);
        first.media_group_id = Some("g".into());
        first.message_id = 20;
        let mut second = photo(-5, "p2", None);
        second.media_group_id = Some("g".into());
        second.message_id = 21;

        r.handle(Update::Message(second)).await;
        r.handle(Update::Message(first)).await;
        assert!(h.api.image_requests().is_empty());
        r.settle().await;

        let sent = h.api.image_requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].prompt, "Combine these images.");
        assert_eq!(sent[0].images, vec![vec![1], vec![2]]);
    }

    #[tokio::test(start_paused = true)]
    async fn album_of_three_is_refused() {
        let h = harness();
        let r = router(&h);
        for (i, handle) in ["a", "b", "c"].iter().enumerate() {
            let mut message = photo(-5, handle, None);
            message.media_group_id = Some("g".into());
            message.message_id = 30 + i64::try_from(i).unwrap();
            r.handle(Update::Message(message)).await;
        }
        r.settle().await;
        assert!(h.api.image_requests().is_empty());
        assert_eq!(h.transport.notices(), vec![ALBUM_NOTICE.to_string()]);
    }

    #[tokio::test]
    async fn awaited_reply_replaces_prompt() {
        let h = harness();
        let mut state = sample_state(40);
        state.request_prompt_change(5);
        h.ctx.states.put(state);

        let mut message = text(10, "a fox in snow");
        message.reply_to =
            Some(RepliedMessage { message_id: 40, photo: Some("x".into()), text: None, from_bot: true });
        router(&h).handle(Update::Message(message)).await;

        let stored = h.ctx.states.get(StateKey { chat_id: 10, message_id: 40 }).unwrap();
        assert_eq!(stored.effective_prompt, "a fox in snow");
        assert!(!stored.is_awaiting_prompt_from(5));
        assert!(h.api.text_requests().is_empty());
    }

    #[tokio::test]
    async fn reply_from_other_user_is_not_a_prompt() {
        let h = harness();
        let mut state = sample_state(41);
        state.request_prompt_change(6);
        h.ctx.states.put(state);

        let mut message = text(10, "a fox");
        message.reply_to =
            Some(RepliedMessage { message_id: 41, photo: Some("x".into()), text: None, from_bot: true });
        router(&h).handle(Update::Message(message)).await;

        let stored = h.ctx.states.get(StateKey { chat_id: 10, message_id: 41 }).unwrap();
        assert_eq!(stored.effective_prompt, "a cat");
    }

    #[tokio::test]
    async fn suffix_commands() {
        let h = harness();
        let r = router(&h);
        r.handle(Update::Message(text(-5, "/suffix set film grain"))).await;
        r.handle(Update::Message(text(-5, "/suffix"))).await;
        r.handle(Update::Message(text(-5, "/suffix clear"))).await;
        r.handle(Update::Message(text(-5, "/suffix"))).await;
        r.handle(Update::Message(text(-5, "/suffix reset"))).await;

        assert_eq!(
            h.transport.sent_texts(),
            vec![
                "Suffix set: film grain".to_string(),
                "Current suffix: film grain".to_string(),
                "Suffix cleared.".to_string(),
                "Suffix is disabled.".to_string(),
                "Suffix reset to default.".to_string(),
            ]
        );
        assert_eq!(h.ctx.chats.get(-5).suffix, Suffix::Default);
    }

    #[tokio::test]
    async fn system_commands() {
        let h = harness();
        let r = router(&h);
        r.handle(Update::Message(text(-5, "/system set Answer like a pirate."))).await;
        assert_eq!(h.ctx.chats.get(-5).system_prompt.as_deref(), Some("Answer like a pirate."));
        r.handle(Update::Message(text(-5, "/system reset"))).await;
        r.handle(Update::Message(text(-5, "/system"))).await;
        assert_eq!(
            h.transport.sent_texts().last().unwrap(),
            "System instruction: You are a helpful assistant."
        );
    }

    #[tokio::test]
    async fn listings_are_sent() {
        let h = harness();
        router(&h).handle(Update::Message(text(-5, "/types"))).await;
        let sent = h.transport.sent_texts();
        assert!(sent[0].starts_with("Types:\n[1] 📷 Photo"));
    }

    #[tokio::test]
    async fn question_shortcut_streams_answer() {
        let h = harness();
        h.api.push_stream(vec![Ok("42".into())]);
        router(&h).handle(Update::Message(text(-5, "? meaning of life"))).await;
        assert_eq!(h.api.text_requests()[0].prompt, "meaning of life");
        assert_eq!(h.transport.edited_texts().last().unwrap(), "42");
    }

    #[tokio::test]
    async fn plain_text_routes_by_chat_kind() {
        let h = harness();
        let r = router(&h);
        r.handle(Update::Message(text(-5, "hello group"))).await;
        assert!(h.api.text_requests().is_empty());

        r.handle(Update::Message(text(5, "hello private"))).await;
        assert_eq!(h.api.text_requests()[0].prompt, "hello private");

        let mut reply = text(-5, "and then?");
        reply.reply_to =
            Some(RepliedMessage { message_id: 3, photo: None, text: Some("42".into()), from_bot: true });
        r.handle(Update::Message(reply)).await;
        assert_eq!(h.api.text_requests().len(), 2);
    }

    #[tokio::test]
    async fn callbacks_are_dispatched() {
        let h = harness();
        h.ctx.states.put(sample_state(60));
        let query = crate::ports::CallbackQuery {
            chat_id: 10,
            user_id: 5,
            message_id: 60,
            data: "settings".into(),
        };
        let r = Arc::new(router(&h));
        r.handle_isolated(Update::Callback(query)).await;
        let stored = h.ctx.states.get(StateKey { chat_id: 10, message_id: 60 }).unwrap();
        assert!(stored.ui.settings_visible);
    }
}
