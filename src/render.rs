//! Captions, keyboards and listings built from message state.

use crate::callbacks::Action;
use crate::catalog::{Catalog, CatalogEntry, EntityKind};
use crate::ports::{Button, Keyboard};
use crate::settings::{AspectRatio, ResolvedSettings};
use crate::state::{MessageState, Panel};

/// Entries per page of an entity panel.
pub const PAGE_SIZE: usize = 18;

/// Buttons per row of an entity panel.
pub const BUTTONS_PER_ROW: usize = 3;

/// Longest entity button label, in characters.
pub const MAX_LABEL_CHARS: usize = 25;

const EDITED_MARKER: &str = "(edited)";
const AWAITING_PROMPT: &str = "✏️ Reply to this message with the new prompt.";

/// Rendering knobs taken from configuration.
#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    /// Show text the model returned above the parameters.
    pub display_model_text: bool,
    /// Transport caption limit, in characters.
    pub caption_limit: usize,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self { display_model_text: true, caption_limit: 1024 }
    }
}

/// Caption and keyboard for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    /// Caption text.
    pub caption: String,
    /// Inline keyboard.
    pub keyboard: Keyboard,
}

/// Render a message's caption and keyboard.
#[must_use]
pub fn render(
    state: &MessageState,
    api_text: Option<&str>,
    catalog: &Catalog,
    options: &RenderOptions,
) -> Rendered {
    Rendered { caption: caption(state, api_text, options), keyboard: keyboard(state, catalog) }
}

/// Caption: model text, edited marker, parameters, command line.
#[must_use]
pub fn caption(state: &MessageState, api_text: Option<&str>, options: &RenderOptions) -> String {
    let mut sections = Vec::new();
    if options.display_model_text {
        if let Some(text) = api_text.map(str::trim).filter(|t| !t.is_empty()) {
            sections.push(text.to_string());
        }
    }

    let selection = state.selection();
    let mut block = Vec::new();
    if state.is_edited() {
        block.push(EDITED_MARKER.to_string());
    }
    block.extend(parameter_lines(&selection));
    if !block.is_empty() {
        sections.push(block.join("\n"));
    }

    if state.ui.awaiting_prompt_from.is_some() {
        sections.push(AWAITING_PROMPT.to_string());
    } else {
        sections.push(command_line(&state.effective_prompt, &selection));
    }

    fit(&sections.join("\n\n"), options.caption_limit)
}

/// Text shown when a generation failed: the error, then what was asked for.
#[must_use]
pub fn failure_text(
    message: &str,
    prompt: &str,
    settings: &ResolvedSettings,
    limit: usize,
) -> String {
    let mut sections = vec![format!("⚠️ API error: {message}")];
    let params = parameter_lines(settings);
    if !params.is_empty() {
        sections.push(params.join("\n"));
    }
    sections.push(command_line(prompt, settings));
    fit(&sections.join("\n\n"), limit)
}

/// `Type: [i] alias` lines for every selected entity.
#[must_use]
pub fn parameter_lines(settings: &ResolvedSettings) -> Vec<String> {
    EntityKind::ALL
        .into_iter()
        .filter_map(|kind| {
            settings.entry(kind).map(|e| format!("{}: [{}] {}", kind.label(), e.index, e.alias))
        })
        .collect()
}

/// Copy-pasteable command reproducing the settings.
#[must_use]
pub fn command_line(prompt: &str, settings: &ResolvedSettings) -> String {
    let mut parts = vec!["!".to_string()];
    if !prompt.trim().is_empty() {
        parts.push(prompt.trim().to_string());
    }
    for kind in EntityKind::ALL {
        if let Some(entry) = settings.entry(kind) {
            parts.push(flag_for(kind, entry));
        }
    }
    if let Some(ar) = settings.aspect_ratio {
        parts.push(format!("--ar {ar}"));
    }
    parts.join(" ")
}

fn flag_for(kind: EntityKind, entry: &CatalogEntry) -> String {
    let token = entry.command_token(kind);
    if token.chars().all(|c| c.is_ascii_digit()) {
        format!("-{}{token}", kind.letter())
    } else {
        format!("-{} {token}", kind.letter())
    }
}

/// Cut `text` to `limit` characters, at a word boundary near the end when
/// one exists.
#[must_use]
pub fn fit(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let keep = limit.saturating_sub(1);
    let cut: String = text.chars().take(keep).collect();
    let boundary = cut
        .char_indices()
        .rev()
        .take(40)
        .find(|(_, c)| c.is_whitespace())
        .map_or(cut.len(), |(i, _)| i);
    format!("{}…", cut[..boundary].trim_end())
}

/// Keyboard for the message's current panel.
#[must_use]
pub fn keyboard(state: &MessageState, catalog: &Catalog) -> Keyboard {
    let open = state.ui.open_panel;
    let ar_toggle = if open == Some(Panel::Aspect) { Action::HideAspect } else { Action::ShowAspect };
    let mut rows = vec![vec![
        button("✅ Apply", &Action::Apply),
        button("📐 AR", &ar_toggle),
        button("🔄 Regen", &Action::Regenerate),
        button("⚙️ Settings", &Action::ToggleSettings),
    ]];

    match open {
        None if state.ui.settings_visible => rows.push(settings_row(state)),
        None => {}
        Some(Panel::Aspect) => rows.extend(aspect_panel(state.selected_ar)),
        Some(Panel::Entity(kind)) => rows.extend(entity_panel(state, catalog, kind)),
        Some(Panel::Prompt) => rows.push(vec![
            button("↩️ Reset", &Action::ResetPrompt),
            button("✨ Enhance", &Action::EnhancePrompt),
            button("✏️ Change", &Action::ChangePrompt),
            button("OK", &Action::HidePrompt),
        ]),
    }
    Keyboard { rows }
}

fn settings_row(state: &MessageState) -> Vec<Button> {
    let mut row: Vec<Button> = EntityKind::ALL
        .into_iter()
        .map(|kind| {
            let mark = if state.selected(kind).is_some() { " ✅" } else { "" };
            button(&format!("{}{mark}", kind.label()), &Action::Show(kind))
        })
        .collect();
    row.push(button("Prompt", &Action::ShowPrompt));
    row
}

fn aspect_panel(selected: Option<AspectRatio>) -> Vec<Vec<Button>> {
    let ar_button = |ar: AspectRatio| {
        let label =
            if selected == Some(ar) { format!("✅ {ar}") } else { ar.as_str().to_string() };
        button(&label, &Action::SetAspect(Some(ar)))
    };
    vec![
        vec![
            button("Reset", &Action::SetAspect(None)),
            ar_button(AspectRatio::Landscape),
            ar_button(AspectRatio::Wide),
        ],
        vec![
            ar_button(AspectRatio::Square),
            ar_button(AspectRatio::Portrait),
            ar_button(AspectRatio::Tall),
        ],
        vec![button("OK", &Action::HideAspect)],
    ]
}

/// Number of pages for `len` entries.
#[must_use]
pub fn page_count(len: usize) -> usize {
    len.div_ceil(PAGE_SIZE).max(1)
}

fn entity_panel(state: &MessageState, catalog: &Catalog, kind: EntityKind) -> Vec<Vec<Button>> {
    let entries = catalog.entries(kind);
    let pages = page_count(entries.len());
    let page = state.ui.page(kind).min(pages - 1);
    let selected = state.selected(kind).map(|e| e.index);

    let mut rows: Vec<Vec<Button>> = entries
        .iter()
        .skip(page * PAGE_SIZE)
        .take(PAGE_SIZE)
        .collect::<Vec<_>>()
        .chunks(BUTTONS_PER_ROW)
        .map(|chunk| {
            chunk
                .iter()
                .map(|entry| {
                    let label = entry_label(entry, selected == Some(entry.index));
                    button(&label, &Action::Set(kind, entry.index))
                })
                .collect()
        })
        .collect();

    if pages > 1 {
        rows.push(vec![
            button("◀", &Action::Page(kind, (page + pages - 1) % pages)),
            button(&format!("{}/{pages}", page + 1), &Action::Noop),
            button("▶", &Action::Page(kind, (page + 1) % pages)),
        ]);
    }
    rows.push(vec![
        button("🗑 Clear", &Action::Clear(kind)),
        button("🎲 Random", &Action::Random(kind)),
        button("OK", &Action::Hide(kind)),
    ]);
    rows
}

fn entry_label(entry: &CatalogEntry, selected: bool) -> String {
    let label = entry.label();
    let label = if selected { format!("✅ {label}") } else { label };
    if label.chars().count() <= MAX_LABEL_CHARS {
        return label;
    }
    let mut cut: String = label.chars().take(MAX_LABEL_CHARS - 1).collect();
    cut.push('…');
    cut
}

fn button(text: &str, action: &Action) -> Button {
    Button::new(text, action.encode())
}

/// `/types`, `/styles` and `/artists` output, split into messages of at
/// most `limit` characters. Styles are grouped under their group key.
#[must_use]
pub fn catalog_listing(catalog: &Catalog, kind: EntityKind, limit: usize) -> Vec<String> {
    let mut lines = Vec::new();
    match kind {
        EntityKind::Style => {
            let mut listed = std::collections::HashSet::new();
            for group in catalog.groups() {
                lines.push(format!("{}:", group.key));
                for index in &group.style_indices {
                    if listed.insert(*index) {
                        if let Some(entry) = catalog.by_index(kind, *index) {
                            lines.push(entry.label());
                        }
                    }
                }
            }
        }
        EntityKind::Type | EntityKind::Artist => {
            let title = if kind == EntityKind::Type { "Types" } else { "Artists" };
            lines.push(format!("{title}:"));
            for entry in catalog.entries(kind) {
                match (&entry.short_alias, kind) {
                    (Some(short), EntityKind::Artist) => {
                        lines.push(format!("{} ({short})", entry.label()));
                    }
                    _ => lines.push(entry.label()),
                }
            }
        }
    }
    chunk_lines(&lines, limit)
}

/// Join lines into messages no longer than `limit` characters.
#[must_use]
pub fn chunk_lines(lines: &[String], limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for line in lines {
        let line = fit(line, limit);
        let needed = current.chars().count() + line.chars().count() + 1;
        if !current.is_empty() && needed > limit {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(&line);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::sample_catalog;
    use crate::state::tests::sample_state;

    #[test]
    fn caption_lists_parameters_and_command() {
        let state = sample_state(1);
        let text = caption(&state, None, &RenderOptions::default());
        assert!(text.contains("Type: [1] Photo"));
        assert!(text.contains("Style: [2] Bokeh"));
        assert!(!text.contains("Artist:"));
        assert!(text.ends_with("! a cat -t1 -s2 --ar 1:1"));
        assert!(!text.contains(EDITED_MARKER));
    }

    #[test]
    fn caption_marks_edits() {
        let mut state = sample_state(1);
        state.set_aspect_ratio(Some(AspectRatio::Wide));
        let text = caption(&state, None, &RenderOptions::default());
        assert!(text.contains(EDITED_MARKER));
        assert!(text.contains("--ar 16:9"));
    }

    #[test]
    fn artist_uses_short_alias() {
        let catalog = sample_catalog();
        let mut state = sample_state(1);
        state.set_artist(catalog.by_index(EntityKind::Artist, 1).unwrap().clone());
        let text = caption(&state, None, &RenderOptions::default());
        assert!(text.contains("-a monet"));
    }

    #[test]
    fn awaiting_prompt_replaces_command() {
        let mut state = sample_state(1);
        state.request_prompt_change(3);
        let text = caption(&state, None, &RenderOptions::default());
        assert!(text.contains(AWAITING_PROMPT));
        assert!(!text.contains("! a cat"));
    }

    #[test]
    fn model_text_respects_toggle() {
        let state = sample_state(1);
        let shown = caption(&state, Some("Here you go"), &RenderOptions::default());
        assert!(shown.starts_with("Here you go"));
        let hidden = RenderOptions { display_model_text: false, ..RenderOptions::default() };
        assert!(!caption(&state, Some("Here you go"), &hidden).contains("Here you go"));
    }

    #[test]
    fn long_caption_is_cut_at_word() {
        let text = format!("{} tail", "word ".repeat(300));
        let cut = fit(&text, 1024);
        assert!(cut.chars().count() <= 1024);
        assert!(cut.ends_with("word…"));
    }

    #[test]
    fn main_keyboard_without_settings() {
        let catalog = sample_catalog();
        let state = sample_state(1);
        let kb = keyboard(&state, &catalog);
        assert_eq!(kb.rows.len(), 1);
        assert_eq!(kb.callback_data(), vec!["apply", "ar_show", "regen", "settings"]);
    }

    #[test]
    fn settings_row_shows_when_visible() {
        let catalog = sample_catalog();
        let mut state = sample_state(1);
        state.toggle_settings();
        let kb = keyboard(&state, &catalog);
        assert_eq!(kb.rows.len(), 2);
        assert_eq!(
            kb.rows[1].iter().map(|b| b.data.as_str()).collect::<Vec<_>>(),
            vec!["type_show", "style_show", "artist_show", "prompt_show"]
        );
    }

    #[test]
    fn style_panel_paginates() {
        let catalog = sample_catalog();
        let mut state = sample_state(1);
        state.open_panel(Panel::Entity(EntityKind::Style));
        let kb = keyboard(&state, &catalog);
        // 80 styles: 6 rows of entries, pagination, controls, plus main row.
        assert_eq!(kb.rows.len(), 1 + 6 + 1 + 1);
        let pagination = &kb.rows[7];
        assert_eq!(pagination[0].data, "style_page|4");
        assert_eq!(pagination[1].text, "1/5");
        assert_eq!(pagination[2].data, "style_page|1");
        assert!(kb.rows[1][1].text.starts_with("✅ [2]"));
    }

    #[test]
    fn last_page_is_partial() {
        let catalog = sample_catalog();
        let mut state = sample_state(1);
        state.open_panel(Panel::Entity(EntityKind::Style));
        state.set_page(EntityKind::Style, 4);
        let kb = keyboard(&state, &catalog);
        // 80 - 72 = 8 entries in 3 rows.
        assert_eq!(kb.rows.len(), 1 + 3 + 1 + 1);
        assert_eq!(kb.rows[1][0].data, "style_set|73");
    }

    #[test]
    fn labels_are_truncated() {
        let entry = CatalogEntry {
            name: "x".into(),
            alias: "An extremely long alias that keeps going".into(),
            short_alias: None,
            emoji: None,
            index: 3,
            group_keys: vec![],
        };
        let label = entry_label(&entry, false);
        assert_eq!(label.chars().count(), MAX_LABEL_CHARS);
        assert!(label.ends_with('…'));
    }

    #[test]
    fn aspect_panel_marks_selection() {
        let catalog = sample_catalog();
        let mut state = sample_state(1);
        state.open_panel(Panel::Aspect);
        let kb = keyboard(&state, &catalog);
        assert_eq!(kb.rows[0][1].data, "ar_hide");
        assert_eq!(kb.rows[1][0].data, "ar|reset");
        assert_eq!(kb.rows[2][0].text, "✅ 1:1");
    }

    #[test]
    fn failure_text_shows_intended_settings() {
        let state = sample_state(1);
        let text = failure_text("API timeout (240s)", "a cat", &state.api_call_settings, 4096);
        assert!(text.starts_with("⚠️ API error: API timeout (240s)"));
        assert!(text.contains("Type: [1] Photo"));
    }

    #[test]
    fn listings_split_under_limit() {
        let catalog = sample_catalog();
        let chunks = catalog_listing(&catalog, EntityKind::Artist, 200);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= 200));
        assert!(chunks[0].contains("[1] 🎨 Monet (monet)"));

        let styles = catalog_listing(&catalog, EntityKind::Style, 4096).join("\n");
        assert!(styles.contains("\ncraft:\n"));
        assert_eq!(styles.matches("] Noir").count(), 1);
    }
}
