//! Final prompt text and the templates it is built from.

use std::path::Path;

use serde::Deserialize;
use tracing::warn;

use crate::catalog::CatalogEntry;
use crate::error::BotError;
use crate::settings::{AspectRatio, ResolvedSettings};

/// Default template: every component, in order, no separators.
pub const DEFAULT_TEMPLATE: &str =
    "{base_prompt}{type_phrase}{style_phrase}{artist_phrase}{ar_tag}{suffix_phrase}";

/// Text templates loaded from `prompts.yaml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PromptTemplates {
    /// Template for image prompts.
    pub image_prompt_template: String,
    /// Suffix appended to image prompts unless a chat overrides it.
    pub default_image_suffix: String,
    /// System instruction for text answers unless a chat overrides it.
    pub default_system_prompt: String,
    /// Instruction for rewriting a prompt. Receives `{prompt}` and `{context}`.
    pub enhance_instruction: String,
    /// Sentence appended to every edit instruction.
    pub edit_description_request: String,
    /// Instruction used when combining two images without a caption.
    pub combine_default: String,
    /// Prompt used when a photo arrives with flags but no text.
    pub redraw_default: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            image_prompt_template: DEFAULT_TEMPLATE.to_string(),
            default_image_suffix: String::new(),
            default_system_prompt: "You are a helpful assistant.".to_string(),
            enhance_instruction: "Rewrite this image generation prompt so it is vivid and \
                                  specific. Keep its language and intent.{context} Reply with \
                                  the prompt only.\n\nPrompt: {prompt}"
                .to_string(),
            edit_description_request: "Also describe the changes you made in one short sentence."
                .to_string(),
            combine_default: "Combine these images.".to_string(),
            redraw_default: "Redraw the provided image in the specified style".to_string(),
        }
    }
}

impl PromptTemplates {
    /// Load templates from YAML; a missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::Config`] if the file exists but cannot be parsed.
    pub fn load(path: &Path) -> Result<Self, BotError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| BotError::Config(format!("Failed to read {}: {e}", path.display())))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| BotError::Config(format!("Failed to parse {}: {e}", path.display())))
    }

    /// Image prompt for `base` with resolved settings and an optional suffix.
    #[must_use]
    pub fn image_prompt(&self, base: &str, settings: &ResolvedSettings, suffix: Option<&str>) -> String {
        let parts = PromptParts {
            base_prompt: base,
            ty: settings.ty.as_ref(),
            style: settings.style.as_ref(),
            artist: settings.artist.as_ref(),
            aspect_ratio: settings.aspect_ratio,
            suffix,
        };
        build(&self.image_prompt_template, &parts)
    }

    /// Enhancement request for a prompt, with optional type/style context.
    #[must_use]
    pub fn enhance_request(
        &self,
        prompt: &str,
        ty: Option<&CatalogEntry>,
        style: Option<&CatalogEntry>,
    ) -> String {
        let mut context = String::new();
        if let Some(t) = ty {
            context.push_str(&format!(" The picture is a {}.", t.name));
        }
        if let Some(s) = style {
            context.push_str(&format!(" Respect the style '{}'.", s.name));
        }
        self.enhance_instruction.replace("{context}", &context).replace("{prompt}", prompt)
    }
}

/// Inputs to [`build`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptParts<'a> {
    /// The user's text.
    pub base_prompt: &'a str,
    /// Resolved type.
    pub ty: Option<&'a CatalogEntry>,
    /// Resolved style.
    pub style: Option<&'a CatalogEntry>,
    /// Resolved artist.
    pub artist: Option<&'a CatalogEntry>,
    /// Resolved aspect ratio.
    pub aspect_ratio: Option<AspectRatio>,
    /// Chat suffix.
    pub suffix: Option<&'a str>,
}

/// Render the API prompt from `template`.
///
/// Absent components render as nothing. The type phrase is skipped when the
/// type name already occurs in the base prompt. A template with unknown or
/// unbalanced placeholders falls back to plain concatenation.
#[must_use]
pub fn build(template: &str, parts: &PromptParts<'_>) -> String {
    let base = parts.base_prompt.trim();
    let type_phrase = parts
        .ty
        .filter(|t| !base.to_lowercase().contains(&t.name.to_lowercase()))
        .map(|t| format!(", a {}", t.name))
        .unwrap_or_default();
    let style_phrase = parts.style.map(|s| format!(", in the style of {}", s.name)).unwrap_or_default();
    let artist_phrase = parts.artist.map(|a| format!(", by {}", a.name)).unwrap_or_default();
    let ar_tag = parts.aspect_ratio.map(|ar| format!(" --ar {ar}")).unwrap_or_default();
    let suffix_phrase = parts
        .suffix
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!(", {s}"))
        .unwrap_or_default();

    let values = [
        ("base_prompt", base),
        ("type_phrase", type_phrase.as_str()),
        ("style_phrase", style_phrase.as_str()),
        ("artist_phrase", artist_phrase.as_str()),
        ("ar_tag", ar_tag.as_str()),
        ("suffix_phrase", suffix_phrase.as_str()),
    ];

    let rendered = fill_template(template, &values).unwrap_or_else(|e| {
        warn!(error = %e, "prompt template failed, concatenating components");
        values.iter().map(|(_, v)| *v).collect()
    });
    tidy(&rendered)
}

/// Substitute `{name}` placeholders.
fn fill_template(template: &str, values: &[(&str, &str)]) -> Result<String, String> {
    let mut out = String::with_capacity(template.len() + 64);
    let mut rest = template;
    while let Some(open) = rest.find(&['{', '}'][..]) {
        if rest[open..].starts_with('}') {
            return Err("unmatched '}'".into());
        }
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after.find('}').ok_or("unclosed '{'")?;
        let name = &after[..close];
        let value = values
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, v)| *v)
            .ok_or_else(|| format!("unknown placeholder '{name}'"))?;
        out.push_str(value);
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Collapse whitespace and stray commas.
fn tidy(text: &str) -> String {
    let mut out = text.split_whitespace().collect::<Vec<_>>().join(" ");
    loop {
        let next = out.replace(" ,", ",").replace(",,", ",");
        if next == out {
            break;
        }
        out = next;
    }
    out.trim_matches(|c: char| c == ',' || c.is_whitespace()).to_string()
}
