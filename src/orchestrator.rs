//! Generation flows: new generation, apply, combine, regenerate, prompt
//! enhancement and streamed answers.
//!
//! Every flow renders its own outcome. A flow that produces a photo returns
//! the stored [`MessageState`]; failures are shown to the user and yield
//! `None`. Source fetch failures abort before any state is touched, and the
//! triggering message is reset only after a successful result.

use tracing::{debug, error, info, warn};

use crate::context::ServiceContext;
use crate::error::BotError;
use crate::ports::{GenerationOutput, ImageRequest, SentMessage, TextRequest};
use crate::render;
use crate::resolver::resolve;
use crate::settings::{ResolvedSettings, SettingsIntent};
use crate::state::{Change, MessageState, StateKey};
use crate::streaming;

const EXPIRED_NOTICE: &str = "This selection has expired. Send the command again.";
const THINKING: &str = "⏳ Thinking...";

/// A request for a fresh image.
#[derive(Debug, Clone)]
pub struct NewGeneration {
    /// Target chat.
    pub chat_id: i64,
    /// Message to reply to.
    pub reply_to: Option<i64>,
    /// Parsed request, replayed by Regenerate.
    pub intent: SettingsIntent,
    /// Handle of a source photo.
    pub source: Option<String>,
}

/// A request to merge two photos.
#[derive(Debug, Clone)]
pub struct Combination {
    /// Target chat.
    pub chat_id: i64,
    /// Message to reply to.
    pub reply_to: Option<i64>,
    /// First photo handle.
    pub first: String,
    /// Second photo handle.
    pub second: String,
    /// User-supplied instruction; the default sentence when absent.
    pub instruction: Option<String>,
}

/// Result of a generation call, with what was asked for.
struct Draft {
    chat_id: i64,
    reply_to: Option<i64>,
    prompt: String,
    settings: ResolvedSettings,
    api_prompt: String,
    result: Result<GenerationOutput, BotError>,
}

/// Resolve, build the prompt, generate and send a new image.
pub async fn new_generation(ctx: &ServiceContext, request: NewGeneration) -> Option<MessageState> {
    let NewGeneration { chat_id, reply_to, intent, source } = request;

    let mut images = Vec::new();
    if let Some(handle) = &source {
        let Some(bytes) = ctx.media.fetch_bytes(chat_id, handle).await else {
            warn!(chat_id, handle, "source image fetch failed");
            notify(ctx, chat_id, "Failed to fetch the source image.").await;
            return None;
        };
        images.push(bytes);
    }

    let settings = ctx.with_rng(|rng| resolve(&intent, &ctx.catalog, rng));
    let api_prompt = build_prompt(ctx, chat_id, &intent.free_text, &settings);
    info!(chat_id, prompt = %api_prompt, images = images.len(), "new generation");

    let result = ctx.api.generate_image(&ImageRequest::new(api_prompt.clone(), images)).await;
    let draft = Draft {
        chat_id,
        reply_to,
        prompt: intent.free_text.clone(),
        settings,
        api_prompt,
        result,
    };
    deliver(ctx, draft, |state| {
        state.original_parsed_settings = Some(intent);
        state.base_image_file_id_for_regen = source;
    })
    .await
}

/// Edit the message's image with its currently selected settings.
///
/// The new result is a new message; the triggering message is reset.
pub async fn apply_edit(ctx: &ServiceContext, key: StateKey) -> Option<MessageState> {
    let Some(state) = ctx.states.get(key) else {
        expired(ctx, key).await;
        return None;
    };
    let Some(file_id) = state.generated_file_id.clone() else {
        notify(ctx, key.chat_id, "This message has no image to edit.").await;
        return None;
    };
    let Some(bytes) = ctx.media.fetch_bytes(key.chat_id, &file_id).await else {
        warn!(chat_id = key.chat_id, message_id = key.message_id, "image fetch failed");
        notify(ctx, key.chat_id, "Failed to fetch the image.").await;
        return None;
    };

    let changes = state.changes();
    let instruction = edit_instruction(&changes, &ctx.templates.edit_description_request);
    info!(
        chat_id = key.chat_id,
        message_id = key.message_id,
        changes = changes.len(),
        "applying edit"
    );

    let result = ctx.api.generate_image(&ImageRequest::new(instruction.clone(), vec![bytes])).await;
    let draft = Draft {
        chat_id: key.chat_id,
        reply_to: Some(key.message_id),
        prompt: state.effective_prompt.clone(),
        settings: state.selection(),
        api_prompt: instruction,
        result,
    };
    // An edit result has no originating upload, so Regenerate attaches nothing.
    let produced = deliver(ctx, draft, |_| {}).await?;

    reset_trigger(ctx, key).await;
    Some(produced)
}

/// Merge two photos into one result with no type, style or artist.
pub async fn combine(ctx: &ServiceContext, request: Combination) -> Option<MessageState> {
    let Combination { chat_id, reply_to, first, second, instruction } = request;

    let (a, b) = tokio::join!(
        ctx.media.fetch_bytes(chat_id, &first),
        ctx.media.fetch_bytes(chat_id, &second)
    );
    let (a, b) = match (a, b) {
        (Some(a), Some(b)) => (a, b),
        (a, b) => {
            let text = match (a.is_some(), b.is_some()) {
                (false, false) => "Failed to fetch both images.",
                (false, true) => "Failed to fetch the first image.",
                _ => "Failed to fetch the second image.",
            };
            warn!(chat_id, first, second, "combination fetch failed");
            notify(ctx, chat_id, text).await;
            return None;
        }
    };

    let default = &ctx.templates.combine_default;
    let instruction = instruction
        .map(|i| i.trim().to_string())
        .filter(|i| !i.is_empty())
        .unwrap_or_else(|| default.clone());
    // The default sentence is an API instruction, never the displayed prompt.
    let prompt = if instruction == *default { String::new() } else { instruction.clone() };
    info!(chat_id, instruction = %instruction, "combining images");

    let result = ctx.api.generate_image(&ImageRequest::new(instruction.clone(), vec![a, b])).await;
    let draft = Draft {
        chat_id,
        reply_to,
        prompt,
        settings: ResolvedSettings::default(),
        api_prompt: instruction.clone(),
        result,
    };
    deliver(ctx, draft, |state| {
        state.is_combination_result = true;
        state.source_image_file_id_1_for_regen = Some(first);
        state.source_image_file_id_2_for_regen = Some(second);
        state.combine_instruction = Some(instruction);
    })
    .await
}

/// Redo the message's original request, re-rolling random choices.
///
/// A message without a recorded intent replays its displayed settings as
/// fixed picks.
pub async fn regenerate(ctx: &ServiceContext, key: StateKey) -> Option<MessageState> {
    let Some(state) = ctx.states.get(key) else {
        expired(ctx, key).await;
        return None;
    };

    let produced = if state.is_combination_result {
        let (Some(first), Some(second)) = (
            state.source_image_file_id_1_for_regen.clone(),
            state.source_image_file_id_2_for_regen.clone(),
        ) else {
            notify(ctx, key.chat_id, "The source images are no longer available.").await;
            return None;
        };
        let request = Combination {
            chat_id: key.chat_id,
            reply_to: Some(key.message_id),
            first,
            second,
            instruction: state.combine_instruction.clone(),
        };
        combine(ctx, request).await
    } else {
        let intent = state.original_parsed_settings.clone().unwrap_or_else(|| {
            debug!(message_id = key.message_id, "no recorded intent, freezing displayed settings");
            SettingsIntent::fixed(&state.original_user_prompt, &state.api_call_settings)
        });
        let request = NewGeneration {
            chat_id: key.chat_id,
            reply_to: Some(key.message_id),
            intent,
            source: state.base_image_file_id_for_regen.clone(),
        };
        new_generation(ctx, request).await
    }?;

    reset_trigger(ctx, key).await;
    Some(produced)
}

/// Ask the text model to rewrite the message's effective prompt.
pub async fn enhance(ctx: &ServiceContext, key: StateKey) {
    let Some(state) = ctx.states.get(key) else {
        expired(ctx, key).await;
        return;
    };
    let request = TextRequest {
        prompt: ctx.templates.enhance_request(
            &state.effective_prompt,
            state.selected_type.as_ref(),
            state.selected_style.as_ref(),
        ),
        ..TextRequest::default()
    };

    let limit = ctx.options.enhance_timeout;
    let result = tokio::time::timeout(limit, ctx.api.generate_text_once(&request))
        .await
        .unwrap_or(Err(BotError::Timeout { seconds: limit.as_secs() }));
    let enhanced = match result {
        Ok(text) => clean_enhanced(&text),
        Err(e) => {
            warn!(chat_id = key.chat_id, error = %e, "prompt enhancement failed");
            notify(ctx, key.chat_id, &e.user_message()).await;
            return;
        }
    };
    if enhanced.is_empty() {
        notify(ctx, key.chat_id, "The model returned an empty prompt.").await;
        return;
    }

    // Re-read: the record may have changed while the call was in flight.
    let Some(mut current) = ctx.states.get(key) else {
        expired(ctx, key).await;
        return;
    };
    current.replace_prompt(&enhanced);
    ctx.states.put(current.clone());
    info!(chat_id = key.chat_id, message_id = key.message_id, "prompt enhanced");
    refresh(ctx, &current).await;
}

/// Stream a text answer, using and extending the chat's history.
pub async fn answer(ctx: &ServiceContext, chat_id: i64, reply_to: Option<i64>, question: &str) {
    let chat = ctx.chats.get(chat_id);
    let request = TextRequest {
        history: chat.history.clone(),
        prompt: question.to_string(),
        system: Some(chat.effective_system(&ctx.templates.default_system_prompt).to_string()),
    };

    let Some(placeholder) = send_text(ctx, chat_id, THINKING, reply_to).await else {
        return;
    };
    let stream = match ctx.api.generate_text_stream(&request).await {
        Ok(stream) => stream,
        Err(e) => {
            error!(chat_id, error = %e, "text stream failed to start");
            let text = format!("⚠️ {}", e.user_message());
            if let Err(e) = ctx.transport.edit_text(chat_id, placeholder.message_id, &text).await {
                warn!(chat_id, error = %e, "could not show stream error");
            }
            return;
        }
    };

    let summary = streaming::stream_to_message(
        ctx.transport.as_ref(),
        chat_id,
        placeholder.message_id,
        stream,
        &ctx.options.stream,
    )
    .await;
    if summary.complete {
        ctx.chats.push_exchange(chat_id, question, &summary.text, ctx.options.history_length);
    }
}

/// Edit instruction for a set of changes.
///
/// No changes asks for a plain redraw, one change is a single sentence and
/// several are listed. The description request is always appended.
#[must_use]
pub fn edit_instruction(changes: &[Change], description_request: &str) -> String {
    let body = match changes {
        [] => "Redraw the provided image.".to_string(),
        [only] => format!("Edit the provided image: {}.", only.instruction()),
        many => {
            let list: Vec<String> = many.iter().map(|c| format!(" - {}", c.instruction())).collect();
            format!("Edit the provided image with the following changes:\n{}", list.join("\n"))
        }
    };
    let request = description_request.trim();
    if request.is_empty() {
        body
    } else {
        format!("{body}\n{request}")
    }
}

/// Re-render a message's caption and keyboard in place.
pub async fn refresh(ctx: &ServiceContext, state: &MessageState) {
    let rendered =
        render::render(state, state.last_api_text.as_deref(), &ctx.catalog, &ctx.options.render);
    match ctx
        .transport
        .edit_caption(state.chat_id, state.message_id, &rendered.caption, Some(&rendered.keyboard))
        .await
    {
        Ok(()) => {}
        Err(e) if e.is_not_editable() => {
            debug!(chat_id = state.chat_id, message_id = state.message_id, "message not editable");
        }
        Err(e) => warn!(chat_id = state.chat_id, error = %e, "caption edit failed"),
    }
}

/// Tell the user a selection expired and drop its keyboard.
pub async fn expired(ctx: &ServiceContext, key: StateKey) {
    info!(chat_id = key.chat_id, message_id = key.message_id, "message state missing");
    notify(ctx, key.chat_id, EXPIRED_NOTICE).await;
    if let Err(e) = ctx.transport.edit_keyboard(key.chat_id, key.message_id, None).await {
        debug!(chat_id = key.chat_id, error = %e, "keyboard removal failed");
    }
}

/// Show a transient notice, logging failures.
pub async fn notify(ctx: &ServiceContext, chat_id: i64, text: &str) {
    if let Err(e) = ctx.transport.notice(chat_id, text).await {
        debug!(chat_id, error = %e, "notice failed");
    }
}

/// Send a text message, logging failures.
pub async fn send_text(
    ctx: &ServiceContext,
    chat_id: i64,
    text: &str,
    reply_to: Option<i64>,
) -> Option<SentMessage> {
    match ctx.transport.send_text(chat_id, text, reply_to, None).await {
        Ok(sent) => Some(sent),
        Err(e) => {
            warn!(chat_id, error = %e, "text send failed");
            None
        }
    }
}

fn build_prompt(
    ctx: &ServiceContext,
    chat_id: i64,
    base: &str,
    settings: &ResolvedSettings,
) -> String {
    let suffix = ctx.chats.get(chat_id).effective_suffix(&ctx.templates.default_image_suffix);
    ctx.templates.image_prompt(base, settings, suffix.as_deref())
}

/// Render a generation outcome. Photos get a stored state and a keyboard;
/// errors and text-only answers are sent as plain text.
async fn deliver(
    ctx: &ServiceContext,
    draft: Draft,
    tag: impl FnOnce(&mut MessageState),
) -> Option<MessageState> {
    let Draft { chat_id, reply_to, prompt, settings, api_prompt, result } = draft;
    let limit = ctx.options.text_limit;

    let output = match result {
        Ok(out) if out.image.is_none() && out.text.as_deref().is_none_or(|t| t.trim().is_empty()) => {
            Err(BotError::EmptyResult)
        }
        other => other,
    };
    let output = match output {
        Ok(output) => output,
        Err(e) => {
            error!(chat_id, error = %e, "generation failed");
            let text = render::failure_text(&e.user_message(), &prompt, &settings, limit);
            send_text(ctx, chat_id, &text, reply_to).await;
            return None;
        }
    };

    let Some(image) = output.image else {
        let text = output.text.unwrap_or_default();
        let body = format!("{}\n\n{}", text.trim(), render::command_line(&prompt, &settings));
        send_text(ctx, chat_id, &render::fit(&body, limit), reply_to).await;
        return None;
    };

    let mut state = MessageState::new(StateKey { chat_id, message_id: 0 }, &prompt, settings, &api_prompt);
    state.last_api_text = output.text;
    tag(&mut state);

    let rendered =
        render::render(&state, state.last_api_text.as_deref(), &ctx.catalog, &ctx.options.render);
    match ctx
        .transport
        .send_photo(chat_id, &image.data, &rendered.caption, reply_to, Some(&rendered.keyboard))
        .await
    {
        Ok(sent) => {
            state.message_id = sent.message_id;
            state.generated_file_id = sent.file_id;
            ctx.states.put(state.clone());
            ctx.chats.update(chat_id, |chat| chat.last_generated = Some(sent.message_id));
            info!(chat_id, message_id = sent.message_id, "result sent");
            Some(state)
        }
        Err(e) => {
            warn!(chat_id, error = %e, "photo send failed, falling back to text");
            send_text(ctx, chat_id, &rendered.caption, reply_to).await;
            None
        }
    }
}

async fn reset_trigger(ctx: &ServiceContext, key: StateKey) {
    let Some(mut state) = ctx.states.get(key) else {
        return;
    };
    state.reset_to_baseline();
    ctx.states.put(state.clone());
    refresh(ctx, &state).await;
}

fn clean_enhanced(text: &str) -> String {
    text.trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '«' | '»' | '`'))
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::EntityKind;
    use crate::parser::parse;
    use crate::ports::Role;
    use crate::state::UiState;
    use crate::test_support::{harness, image_output, Op};

    fn request(ctx: &ServiceContext, text: &str, source: Option<&str>) -> NewGeneration {
        NewGeneration {
            chat_id: -5,
            reply_to: Some(1),
            intent: parse(text, &ctx.catalog),
            source: source.map(String::from),
        }
    }

    #[tokio::test]
    async fn new_generation_stores_state() {
        let h = harness();
        let state = new_generation(&h.ctx, request(&h.ctx, "!cat -t1 -s3 --ar 16:9", None)).await.unwrap();

        assert_eq!(state.original_user_prompt, "cat");
        assert_eq!(state.api_call_prompt, "cat, a Photograph, in the style of Origami --ar 16:9");
        assert_eq!(state.generated_file_id.as_deref(), Some("photo-100"));
        assert!(state.original_parsed_settings.is_some());
        assert_eq!(h.ctx.states.get(state.key()), Some(state.clone()));
        assert_eq!(h.ctx.chats.get(-5).last_generated, Some(100));

        let photos = h.transport.photos();
        assert_eq!(photos.len(), 1);
        assert!(photos[0].1.contains("Style: [3] Origami"));
        assert_eq!(h.api.image_requests()[0].image_count, 0);
    }

    #[tokio::test]
    async fn chat_suffix_reaches_prompt() {
        let h = harness();
        h.ctx.chats.update(-5, |c| c.suffix = crate::chat::Suffix::Custom("film grain".into()));
        let state = new_generation(&h.ctx, request(&h.ctx, "!cat", None)).await.unwrap();
        assert_eq!(state.api_call_prompt, "cat, film grain");
    }

    #[tokio::test]
    async fn source_fetch_failure_aborts() {
        let h = harness();
        let result = new_generation(&h.ctx, request(&h.ctx, "!cat", Some("missing"))).await;
        assert!(result.is_none());
        assert!(h.api.image_requests().is_empty());
        assert_eq!(h.transport.notices(), vec!["Failed to fetch the source image.".to_string()]);
    }

    #[tokio::test]
    async fn combination_records_both_sources() {
        let h = harness();
        h.media.insert("a", &[1]);
        h.media.insert("b", &[2]);
        let state = combine(
            &h.ctx,
            Combination {
                chat_id: -5,
                reply_to: None,
                first: "a".into(),
                second: "b".into(),
                instruction: None,
            },
        )
        .await
        .unwrap();

        assert!(state.is_combination_result);
        assert_eq!(state.source_image_file_id_1_for_regen.as_deref(), Some("a"));
        assert_eq!(state.source_image_file_id_2_for_regen.as_deref(), Some("b"));
        assert!(state.selected_type.is_none());
        assert!(state.selected_style.is_none());
        assert!(state.selected_artist.is_none());
        let sent = &h.api.image_requests()[0];
        assert_eq!(sent.prompt, "Combine these images.");
        assert_eq!(sent.images, vec![vec![1], vec![2]]);

        assert_eq!(state.original_user_prompt, "");
        assert_eq!(state.combine_instruction.as_deref(), Some("Combine these images."));
        let (_, caption) = h.transport.photos().pop().unwrap();
        assert!(!caption.contains("Combine these images."), "{caption}");
    }

    #[tokio::test]
    async fn combination_reports_failed_side() {
        let h = harness();
        h.media.insert("a", &[1]);
        let request = Combination {
            chat_id: -5,
            reply_to: None,
            first: "a".into(),
            second: "gone".into(),
            instruction: Some("merge".into()),
        };
        assert!(combine(&h.ctx, request).await.is_none());
        assert_eq!(h.transport.notices(), vec!["Failed to fetch the second image.".to_string()]);
        assert!(h.api.image_requests().is_empty());
    }

    #[test]
    fn instruction_shapes() {
        let catalog = crate::catalog::tests::sample_catalog();
        let origami = catalog.by_index(EntityKind::Style, 3).unwrap().clone();
        let one = [Change::Entity(EntityKind::Style, Some(origami))];
        assert_eq!(
            edit_instruction(&one, "Describe it."),
            "Edit the provided image: Apply style 'Origami'.\nDescribe it."
        );
        assert_eq!(edit_instruction(&[], ""), "Redraw the provided image.");

        let two = [Change::AspectRatio(None), Change::Prompt("a dog".into())];
        assert_eq!(
            edit_instruction(&two, ""),
            "Edit the provided image with the following changes:\n - Remove aspect ratio \
             constraint\n - Use description: 'a dog'"
        );
    }

    #[tokio::test]
    async fn apply_edits_previous_image_and_resets_trigger() {
        let h = harness();
        let first = new_generation(&h.ctx, request(&h.ctx, "!cat -t1 -s2", None)).await.unwrap();

        let mut edited = first.clone();
        edited.set_style(h.ctx.catalog.by_index(EntityKind::Style, 3).unwrap().clone());
        edited.open_panel(crate::state::Panel::Entity(EntityKind::Style));
        h.ctx.states.put(edited);

        let produced = apply_edit(&h.ctx, first.key()).await.unwrap();
        let sent = &h.api.image_requests()[1];
        assert!(sent.prompt.starts_with("Edit the provided image: Apply style 'Origami'."));
        assert_eq!(sent.images.len(), 1);
        assert_eq!(sent.images[0][4], 100);
        assert_eq!(produced.api_call_settings.index(EntityKind::Style), Some(3));
        assert!(produced.original_parsed_settings.is_none());

        let trigger = h.ctx.states.get(first.key()).unwrap();
        assert_eq!(trigger.selection(), trigger.api_call_settings);
        assert_eq!(trigger.ui, UiState::default());
        assert!(h.transport.ops().iter().any(|op| matches!(
            op,
            Op::EditCaption { message_id, .. } if *message_id == first.message_id
        )));
    }

    #[tokio::test]
    async fn apply_without_changes_redraws() {
        let h = harness();
        let first = new_generation(&h.ctx, request(&h.ctx, "!cat", None)).await.unwrap();
        apply_edit(&h.ctx, first.key()).await.unwrap();
        assert!(h.api.image_requests()[1].prompt.starts_with("Redraw the provided image."));
    }

    #[tokio::test]
    async fn failed_apply_keeps_trigger_edits() {
        let h = harness();
        let first = new_generation(&h.ctx, request(&h.ctx, "!cat", None)).await.unwrap();
        let mut edited = first.clone();
        edited.set_aspect_ratio(Some(crate::settings::AspectRatio::Tall));
        h.ctx.states.put(edited);
        h.api.push_image(Err(BotError::Timeout { seconds: 240 }));

        assert!(apply_edit(&h.ctx, first.key()).await.is_none());
        let texts = h.transport.sent_texts();
        assert!(texts[0].starts_with("⚠️ API error: API timeout (240s)"));
        assert!(texts[0].contains("--ar 9:16"));
        let trigger = h.ctx.states.get(first.key()).unwrap();
        assert!(trigger.is_edited());
    }

    #[tokio::test]
    async fn regenerate_replays_intent_not_ui() {
        let h = harness();
        let first = new_generation(&h.ctx, request(&h.ctx, "!cat -t2", None)).await.unwrap();
        let mut edited = first.clone();
        edited.set_artist(h.ctx.catalog.by_index(EntityKind::Artist, 1).unwrap().clone());
        h.ctx.states.put(edited);

        let produced = regenerate(&h.ctx, first.key()).await.unwrap();
        assert!(produced.api_call_settings.artist.is_none());
        assert_eq!(produced.api_call_settings.index(EntityKind::Type), Some(2));
        let trigger = h.ctx.states.get(first.key()).unwrap();
        assert!(trigger.selected_artist.is_none());
    }

    #[tokio::test]
    async fn regenerate_without_intent_freezes_settings() {
        let h = harness();
        let first = new_generation(&h.ctx, request(&h.ctx, "!!cat", None)).await.unwrap();
        let mut frozen = first.clone();
        frozen.original_parsed_settings = None;
        h.ctx.states.put(frozen);

        let produced = regenerate(&h.ctx, first.key()).await.unwrap();
        assert_eq!(produced.api_call_settings, first.api_call_settings);
    }

    #[tokio::test]
    async fn regenerate_combination_refetches_both() {
        let h = harness();
        h.media.insert("a", &[1]);
        h.media.insert("b", &[2]);
        let request = Combination {
            chat_id: -5,
            reply_to: None,
            first: "a".into(),
            second: "b".into(),
            instruction: Some("blend them".into()),
        };
        let first = combine(&h.ctx, request).await.unwrap();
        let again = regenerate(&h.ctx, first.key()).await.unwrap();

        assert!(again.is_combination_result);
        let sent = &h.api.image_requests()[1];
        assert_eq!(sent.prompt, "blend them");
        assert_eq!(sent.images.len(), 2);
    }

    #[tokio::test]
    async fn regenerate_with_source_refetches_it() {
        let h = harness();
        h.media.insert("upload", &[9]);
        let first = new_generation(&h.ctx, request(&h.ctx, "!cat", Some("upload"))).await.unwrap();
        regenerate(&h.ctx, first.key()).await.unwrap();
        assert_eq!(h.api.image_requests()[1].images, vec![vec![9]]);
    }

    #[tokio::test]
    async fn regenerate_after_apply_attaches_no_image() {
        let h = harness();
        let first = new_generation(&h.ctx, request(&h.ctx, "!cat", None)).await.unwrap();
        let produced = apply_edit(&h.ctx, first.key()).await.unwrap();
        assert!(produced.base_image_file_id_for_regen.is_none());

        regenerate(&h.ctx, produced.key()).await.unwrap();
        let sent = &h.api.image_requests()[2];
        assert!(sent.images.is_empty(), "attached {} image(s)", sent.images.len());
    }

    #[tokio::test]
    async fn regenerate_after_apply_reuses_applied_settings() {
        let h = harness();
        let first = new_generation(&h.ctx, request(&h.ctx, "!cat -t1 -s2", None)).await.unwrap();
        let mut edited = first.clone();
        edited.set_style(h.ctx.catalog.by_index(EntityKind::Style, 3).unwrap().clone());
        h.ctx.states.put(edited);

        let produced = apply_edit(&h.ctx, first.key()).await.unwrap();
        assert!(produced.original_parsed_settings.is_none());

        let again = regenerate(&h.ctx, produced.key()).await.unwrap();
        assert_eq!(again.api_call_settings, produced.api_call_settings);
        assert_eq!(again.api_call_settings.index(EntityKind::Style), Some(3));
        assert!(h.api.image_requests()[2].prompt.starts_with("cat, a Photograph"));
    }

    #[tokio::test]
    async fn missing_state_is_reported() {
        let h = harness();
        let key = StateKey { chat_id: -5, message_id: 999 };
        assert!(regenerate(&h.ctx, key).await.is_none());
        assert_eq!(h.transport.notices(), vec![EXPIRED_NOTICE.to_string()]);
        assert!(h.transport.ops().contains(&Op::EditKeyboard {
            chat_id: -5,
            message_id: 999,
            keyboard: None
        }));
    }

    #[tokio::test]
    async fn empty_result_is_an_error() {
        let h = harness();
        h.api.push_image(Ok(GenerationOutput::default()));
        assert!(new_generation(&h.ctx, request(&h.ctx, "!cat", None)).await.is_none());
        assert!(h.transport.sent_texts()[0].contains("The model returned an empty result"));
    }

    #[tokio::test]
    async fn photo_send_failure_falls_back_to_text() {
        let h = harness();
        h.transport.fail_next_photo(BotError::Transport("bad caption".into()));
        h.api.push_image(Ok(image_output(Some("Here"))));
        assert!(new_generation(&h.ctx, request(&h.ctx, "!cat -t1", None)).await.is_none());
        let texts = h.transport.sent_texts();
        assert!(texts[0].starts_with("Here"));
        assert!(texts[0].contains("Type: [1] Photo"));
    }

    #[tokio::test]
    async fn enhance_replaces_prompt() {
        let h = harness();
        let first = new_generation(&h.ctx, request(&h.ctx, "!cat -t1", None)).await.unwrap();
        h.api.push_text(Ok("  \"a fluffy cat at dawn\" ".into()));
        enhance(&h.ctx, first.key()).await;

        let state = h.ctx.states.get(first.key()).unwrap();
        assert_eq!(state.effective_prompt, "a fluffy cat at dawn");
        assert!(state.is_edited());
        assert!(h.api.text_requests()[0].prompt.contains("Photograph"));
    }

    #[tokio::test(start_paused = true)]
    async fn enhance_gives_up_after_timeout() {
        let h = harness();
        let first = new_generation(&h.ctx, request(&h.ctx, "!cat", None)).await.unwrap();
        h.api.hang_text();
        enhance(&h.ctx, first.key()).await;

        let seconds = h.ctx.options.enhance_timeout.as_secs();
        assert_eq!(h.transport.notices(), vec![format!("API timeout ({seconds}s)")]);
        assert_eq!(h.ctx.states.get(first.key()).unwrap().effective_prompt, "cat");
    }

    #[tokio::test]
    async fn answer_streams_and_remembers() {
        let h = harness();
        h.api.push_stream(vec![Ok("Hello".into()), Ok(" there".into())]);
        answer(&h.ctx, 42, Some(3), "hi?").await;

        assert_eq!(h.transport.sent_texts(), vec![THINKING.to_string()]);
        assert_eq!(h.transport.edited_texts().last().unwrap(), "Hello there");
        let history = h.ctx.chats.get(42).history;
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].role, Role::Model);
        let sent = &h.api.text_requests()[0];
        assert_eq!(sent.system.as_deref(), Some("You are a helpful assistant."));
    }
}
