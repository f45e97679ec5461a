//! Inline keyboard actions: their wire encoding, how each one changes a
//! message's state, and the dispatcher that runs them.

use rand::Rng;
use tracing::{debug, warn};

use crate::catalog::{Catalog, CatalogEntry, EntityKind};
use crate::context::ServiceContext;
use crate::orchestrator;
use crate::ports::CallbackQuery;
use crate::render::page_count;
use crate::resolver::{pick_style_for_type, random_entry, random_style};
use crate::settings::AspectRatio;
use crate::state::{MessageState, Panel, StateKey};

/// A keyboard button's meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Show or hide the settings row.
    ToggleSettings,
    /// Open the aspect-ratio panel.
    ShowAspect,
    /// Close the aspect-ratio panel.
    HideAspect,
    /// Select (or with `None`, remove) an aspect ratio.
    SetAspect(Option<AspectRatio>),
    /// Open an entity panel.
    Show(EntityKind),
    /// Close an entity panel.
    Hide(EntityKind),
    /// Remove the selection of a kind.
    Clear(EntityKind),
    /// Select a random entry of a kind.
    Random(EntityKind),
    /// Select an entry by catalog index.
    Set(EntityKind, usize),
    /// Move an entity panel to a page.
    Page(EntityKind, usize),
    /// Open the prompt panel.
    ShowPrompt,
    /// Close the prompt panel.
    HidePrompt,
    /// Restore the original prompt.
    ResetPrompt,
    /// Wait for a reply carrying a new prompt.
    ChangePrompt,
    /// Rewrite the prompt with the text model.
    EnhancePrompt,
    /// Edit the image with the current selections.
    Apply,
    /// Redo the original request.
    Regenerate,
    /// Inert label button.
    Noop,
}

impl Action {
    /// Callback data for this action.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::ToggleSettings => "settings".into(),
            Self::ShowAspect => "ar_show".into(),
            Self::HideAspect => "ar_hide".into(),
            Self::SetAspect(Some(ar)) => format!("ar|{ar}"),
            Self::SetAspect(None) => "ar|reset".into(),
            Self::Show(kind) => format!("{}_show", kind.key()),
            Self::Hide(kind) => format!("{}_hide", kind.key()),
            Self::Clear(kind) => format!("{}_clear", kind.key()),
            Self::Random(kind) => format!("{}_random", kind.key()),
            Self::Set(kind, index) => format!("{}_set|{index}", kind.key()),
            Self::Page(kind, page) => format!("{}_page|{page}", kind.key()),
            Self::ShowPrompt => "prompt_show".into(),
            Self::HidePrompt => "prompt_hide".into(),
            Self::ResetPrompt => "prompt_reset".into(),
            Self::ChangePrompt => "prompt_change".into(),
            Self::EnhancePrompt => "prompt_enhance".into(),
            Self::Apply => "apply".into(),
            Self::Regenerate => "regen".into(),
            Self::Noop => "noop".into(),
        }
    }

    /// Decode callback data; unknown data is `None`.
    #[must_use]
    pub fn parse(data: &str) -> Option<Self> {
        let (head, arg) = match data.split_once('|') {
            Some((head, arg)) => (head, Some(arg)),
            None => (data, None),
        };
        let fixed = match (head, arg) {
            ("settings", None) => Some(Self::ToggleSettings),
            ("ar_show", None) => Some(Self::ShowAspect),
            ("ar_hide", None) => Some(Self::HideAspect),
            ("ar", Some("reset")) => Some(Self::SetAspect(None)),
            ("ar", Some(value)) => AspectRatio::parse(value).map(|ar| Self::SetAspect(Some(ar))),
            ("prompt_show", None) => Some(Self::ShowPrompt),
            ("prompt_hide", None) => Some(Self::HidePrompt),
            ("prompt_reset", None) => Some(Self::ResetPrompt),
            ("prompt_change", None) => Some(Self::ChangePrompt),
            ("prompt_enhance", None) => Some(Self::EnhancePrompt),
            ("apply", None) => Some(Self::Apply),
            ("regen", None) => Some(Self::Regenerate),
            ("noop", None) => Some(Self::Noop),
            _ => None,
        };
        if fixed.is_some() {
            return fixed;
        }

        let (key, verb) = head.split_once('_')?;
        let kind = EntityKind::from_key(key)?;
        let number = || arg.and_then(|a| a.parse::<usize>().ok());
        match (verb, arg) {
            ("show", None) => Some(Self::Show(kind)),
            ("hide", None) => Some(Self::Hide(kind)),
            ("clear", None) => Some(Self::Clear(kind)),
            ("random", None) => Some(Self::Random(kind)),
            ("set", Some(_)) => number().map(|n| Self::Set(kind, n)),
            ("page", Some(_)) => number().map(|n| Self::Page(kind, n)),
            _ => None,
        }
    }
}

/// What the dispatcher does after an action was applied to a state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Store the state and redraw the message.
    Rerender,
    /// Nothing changed.
    Nothing,
    /// Tell the user something; the state is unchanged.
    Notice(String),
    /// Run the Apply flow.
    Apply,
    /// Run the Regenerate flow.
    Regenerate,
    /// Run prompt enhancement.
    Enhance,
}

/// Apply a keyboard action to a state.
///
/// Only local edits happen here; long-running flows are returned as
/// effects for the caller to run.
pub fn apply<R: Rng + ?Sized>(
    state: &mut MessageState,
    action: &Action,
    user_id: i64,
    catalog: &Catalog,
    rng: &mut R,
) -> Effect {
    match *action {
        Action::ToggleSettings => state.toggle_settings(),
        Action::ShowAspect => state.open_panel(Panel::Aspect),
        Action::Show(kind) => state.open_panel(Panel::Entity(kind)),
        Action::ShowPrompt => state.open_panel(Panel::Prompt),
        Action::HideAspect | Action::Hide(_) | Action::HidePrompt => state.clear_all_selectors(),
        Action::SetAspect(ar) => state.set_aspect_ratio(ar),
        Action::Clear(kind) => state.set_entity(kind, None),
        Action::Set(kind, index) => {
            let Some(entry) = catalog.by_index(kind, index) else {
                return Effect::Notice(format!("{} [{index}] is not in the catalog.", kind.label()));
            };
            select(state, kind, entry.clone(), catalog, rng);
        }
        Action::Random(kind) => {
            let drawn = match kind {
                EntityKind::Style => random_style(state.selected_type.as_ref(), catalog, rng),
                other => random_entry(other, catalog, rng),
            };
            let Some(entry) = drawn else {
                return Effect::Notice(format!("No {} entries available.", kind.key()));
            };
            select(state, kind, entry, catalog, rng);
        }
        Action::Page(kind, page) => {
            if page >= page_count(catalog.entries(kind).len()) {
                debug!(kind = kind.label(), page, "page out of range");
                return Effect::Nothing;
            }
            state.set_page(kind, page);
        }
        Action::ResetPrompt => state.reset_prompt(),
        Action::ChangePrompt => state.request_prompt_change(user_id),
        Action::EnhancePrompt => return Effect::Enhance,
        Action::Apply => return Effect::Apply,
        Action::Regenerate => return Effect::Regenerate,
        Action::Noop => return Effect::Nothing,
    }
    Effect::Rerender
}

/// Select an entry; a type chosen while no style is set brings a matching
/// style along.
fn select<R: Rng + ?Sized>(
    state: &mut MessageState,
    kind: EntityKind,
    entry: CatalogEntry,
    catalog: &Catalog,
    rng: &mut R,
) {
    if kind == EntityKind::Type && state.selected_style.is_none() {
        if let Some(style) = pick_style_for_type(&entry, catalog, rng) {
            state.set_style(style);
        }
    }
    state.set_entity(kind, Some(entry));
}

/// Handle one button press.
pub async fn dispatch(ctx: &ServiceContext, query: &CallbackQuery) {
    let key = StateKey { chat_id: query.chat_id, message_id: query.message_id };
    let Some(action) = Action::parse(&query.data) else {
        warn!(data = %query.data, "unknown callback data");
        orchestrator::notify(ctx, query.chat_id, "Unknown action.").await;
        return;
    };
    debug!(chat_id = key.chat_id, message_id = key.message_id, ?action, "callback");
    if action == Action::Noop {
        return;
    }

    let Some(mut state) = ctx.states.get(key) else {
        orchestrator::expired(ctx, key).await;
        return;
    };

    let effect = ctx.with_rng(|rng| apply(&mut state, &action, query.user_id, &ctx.catalog, rng));
    match effect {
        Effect::Nothing => {}
        Effect::Rerender => {
            ctx.states.put(state.clone());
            orchestrator::refresh(ctx, &state).await;
        }
        Effect::Notice(text) => orchestrator::notify(ctx, key.chat_id, &text).await,
        Effect::Apply => {
            orchestrator::notify(ctx, key.chat_id, "⏳ Applying changes...").await;
            orchestrator::apply_edit(ctx, key).await;
        }
        Effect::Regenerate => {
            orchestrator::notify(ctx, key.chat_id, "⏳ Regenerating...").await;
            orchestrator::regenerate(ctx, key).await;
        }
        Effect::Enhance => {
            orchestrator::notify(ctx, key.chat_id, "✨ Enhancing the prompt...").await;
            orchestrator::enhance(ctx, key).await;
        }
    }
}
