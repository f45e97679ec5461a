//! Turns one line of chat text into a prompt plus a [`SettingsIntent`].
//!
//! Grammar, in the order it is applied to the text after the first flag:
//!
//! 1. fused index tokens: `-t1s72a90`, `-s4a2`;
//! 2. index lists: `-t(1,2,3)`, `-s (4, 5)`, `-a(7,9)`;
//! 3. everything else, left to right: `-t 3`, `--style oil`, `-a monet`,
//!    `--ar 16x9`, `-tsa` (randomize each named axis), `-r` (randomize all).
//!
//! Malformed pieces are logged and skipped; parsing never fails.

use tracing::warn;

use crate::catalog::{Catalog, EntityKind};
use crate::settings::{AspectRatio, SettingsIntent, StyleMarker};

const LONG_FLAGS: [(&str, Flag); 10] = [
    ("--type", Flag::Entity(EntityKind::Type)),
    ("--style", Flag::Entity(EntityKind::Style)),
    ("--artist", Flag::Entity(EntityKind::Artist)),
    ("--ar", Flag::Aspect),
    ("--random", Flag::Random),
    ("\u{2014}type", Flag::Entity(EntityKind::Type)),
    ("\u{2014}style", Flag::Entity(EntityKind::Style)),
    ("\u{2014}artist", Flag::Entity(EntityKind::Artist)),
    ("\u{2014}ar", Flag::Aspect),
    ("\u{2014}random", Flag::Random),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flag {
    Entity(EntityKind),
    Aspect,
    Random,
}

/// Classification of one whitespace-separated token.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Token<'a> {
    /// A flag, possibly with a value glued to it (`-t3`).
    Flag(Flag, Option<&'a str>),
    /// Several index picks in one token (`-t1s72a90`).
    Fused(Vec<(EntityKind, &'a str)>),
    /// Randomize several axes (`-tsa`).
    Combined(Vec<EntityKind>),
    /// Start of an index list that the list pass did not consume.
    List,
    /// Not a flag.
    Word,
}

/// Parse a raw chat line.
///
/// Leading `!`, `!!` or `/img` triggers are stripped; `!!` asks for a
/// random type, style and artist. Everything before the first flag is the
/// prompt text.
#[must_use]
pub fn parse(raw: &str, catalog: &Catalog) -> SettingsIntent {
    let (body, force_random) = strip_trigger(raw.trim());
    let mut intent = SettingsIntent::default();

    match find_first_flag(body) {
        None => intent.free_text = body.trim().to_string(),
        Some(pos) => {
            intent.free_text = body[..pos].trim().to_string();
            parse_args(&body[pos..], catalog, &mut intent);
        }
    }

    if force_random {
        intent.randomize_all();
    }
    intent.settle_conflicts();
    intent
}

/// Remove a leading trigger, reporting whether it was the random shortcut.
fn strip_trigger(text: &str) -> (&str, bool) {
    if let Some(rest) = text.strip_prefix("!!") {
        return (rest.trim_start(), true);
    }
    if let Some(rest) = text.strip_prefix('!') {
        return (rest.trim_start(), false);
    }
    if text.len() >= 4 && text.is_char_boundary(4) && text[..4].eq_ignore_ascii_case("/img") {
        let rest = &text[4..];
        if rest.is_empty() || rest.starts_with(char::is_whitespace) {
            return (rest.trim_start(), false);
        }
        if let Some(mention) = rest.strip_prefix('@') {
            let end = mention.find(char::is_whitespace).unwrap_or(mention.len());
            return (mention[end..].trim_start(), false);
        }
    }
    (text, false)
}

/// Byte offset of the first token that starts a flag.
///
/// A flag must sit at the start of the text or follow whitespace.
fn find_first_flag(text: &str) -> Option<usize> {
    let mut prev_is_space = true;
    for (i, c) in text.char_indices() {
        if prev_is_space && (c == '-' || c == '\u{2014}') {
            let end = text[i..].find(char::is_whitespace).map_or(text.len(), |e| i + e);
            if classify(&text[i..end]) != Token::Word {
                return Some(i);
            }
        }
        prev_is_space = c.is_whitespace();
    }
    None
}

fn classify(token: &str) -> Token<'_> {
    let lower = token.to_lowercase();

    for (form, flag) in LONG_FLAGS {
        if lower == form {
            return Token::Flag(flag, None);
        }
    }
    if lower == "-r" {
        return Token::Flag(Flag::Random, None);
    }
    if lower == "-ar" {
        return Token::Flag(Flag::Aspect, None);
    }
    if lower.starts_with("-ar") && token[3..].starts_with(|c: char| c.is_ascii_digit()) {
        return Token::Flag(Flag::Aspect, Some(&token[3..]));
    }

    let Some(rest) = token.strip_prefix('-') else {
        return Token::Word;
    };
    let Some(kind) = rest.chars().next().and_then(EntityKind::from_letter) else {
        return Token::Word;
    };
    let tail = &rest[1..];

    if tail.is_empty() {
        return Token::Flag(Flag::Entity(kind), None);
    }
    if tail.trim_start().starts_with('(') {
        return Token::List;
    }
    if tail.chars().all(|c| EntityKind::from_letter(c).is_some()) {
        let mut kinds = vec![kind];
        for c in tail.chars() {
            if let Some(k) = EntityKind::from_letter(c) {
                if !kinds.contains(&k) {
                    kinds.push(k);
                }
            }
        }
        return Token::Combined(kinds);
    }
    if tail.starts_with(|c: char| c.is_ascii_digit()) {
        if let Some(segments) = fused_segments(kind, tail) {
            if segments.len() > 1 {
                return Token::Fused(segments);
            }
        }
        return Token::Flag(Flag::Entity(kind), Some(value_word(tail)));
    }
    Token::Word
}

/// Split `1s72a90` (after the leading letter) into per-kind digit runs.
///
/// Each kind may appear once; the whole tail must be consumed.
fn fused_segments(first: EntityKind, tail: &str) -> Option<Vec<(EntityKind, &str)>> {
    let mut segments = Vec::new();
    let mut kind = first;
    let mut rest = tail;
    loop {
        let digits_end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits_end == 0 || segments.iter().any(|(k, _)| *k == kind) {
            return None;
        }
        segments.push((kind, &rest[..digits_end]));
        rest = &rest[digits_end..];
        let mut chars = rest.chars();
        match chars.next() {
            None => return Some(segments),
            Some(c) => {
                kind = EntityKind::from_letter(c)?;
                rest = chars.as_str();
            }
        }
    }
}

/// Leading run of word characters (letters, digits, `_`, `:`).
fn value_word(token: &str) -> &str {
    let end = token
        .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == ':'))
        .unwrap_or(token.len());
    &token[..end]
}

/// Pull `-t(1,2)` style lists out of `args`, returning them and the rest.
fn extract_lists(args: &str) -> (Vec<(EntityKind, Vec<usize>)>, String) {
    let mut lists = Vec::new();
    let mut remaining = String::with_capacity(args.len());
    let mut cursor = 0;
    let bytes = args.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        let at_token_start = i == 0 || bytes[i - 1].is_ascii_whitespace();
        if at_token_start && bytes[i] == b'-' && i + 1 < bytes.len() {
            if let Some(kind) = EntityKind::from_letter(bytes[i + 1] as char) {
                let after = &args[i + 2..];
                let open = after.len() - after.trim_start().len();
                if after[open..].starts_with('(') {
                    if let Some(close) = after[open..].find(')') {
                        let inner = &after[open + 1..open + close];
                        let span_end = i + 2 + open + close + 1;
                        match parse_index_list(inner) {
                            Some(indices) => {
                                lists.push((kind, indices));
                                remaining.push_str(&args[cursor..i]);
                                remaining.push(' ');
                                cursor = span_end;
                            }
                            None => warn!(list = inner, "ignoring malformed index list"),
                        }
                        i = span_end;
                        continue;
                    }
                }
            }
        }
        i += 1;
    }
    remaining.push_str(&args[cursor..]);
    (lists, remaining)
}

fn parse_index_list(inner: &str) -> Option<Vec<usize>> {
    let mut out = Vec::new();
    for part in inner.split(',') {
        let index = part.trim().parse::<usize>().ok()?;
        if !out.contains(&index) {
            out.push(index);
        }
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

#[derive(Default)]
struct Seen {
    kinds: Vec<EntityKind>,
    aspect: bool,
}

impl Seen {
    fn claim(&mut self, kind: EntityKind) -> bool {
        if self.kinds.contains(&kind) {
            return false;
        }
        self.kinds.push(kind);
        true
    }
}

fn parse_args(args: &str, catalog: &Catalog, intent: &mut SettingsIntent) {
    let (lists, rest) = extract_lists(args);
    let tokens: Vec<&str> = rest.split_whitespace().collect();
    let mut seen = Seen::default();

    for token in &tokens {
        if let Token::Fused(segments) = classify(token) {
            for (kind, digits) in segments {
                if seen.claim(kind) {
                    apply_value(kind, digits, catalog, intent);
                }
            }
        }
    }

    for (kind, indices) in lists {
        if seen.claim(kind) {
            intent.entity_mut(kind).choices = indices;
        } else {
            warn!(kind = kind.label(), "duplicate selection for axis ignored");
        }
    }

    let mut random_all = false;
    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i];
        i += 1;
        match classify(token) {
            Token::Fused(_) => {}
            Token::Word => warn!(token, "ignoring stray text after flags"),
            Token::List => warn!(token, "ignoring malformed index list"),
            Token::Combined(kinds) => {
                for kind in kinds {
                    randomize(kind, intent);
                }
            }
            Token::Flag(Flag::Random, _) => random_all = true,
            Token::Flag(Flag::Aspect, attached) => {
                let value = attached.or_else(|| take_value(&tokens, &mut i));
                if seen.aspect {
                    continue;
                }
                seen.aspect = true;
                match value.and_then(AspectRatio::parse) {
                    Some(ar) => intent.aspect_ratio = Some(ar),
                    None => warn!(value, "unsupported aspect ratio ignored"),
                }
            }
            Token::Flag(Flag::Entity(kind), attached) => {
                let value = attached.or_else(|| take_value(&tokens, &mut i));
                if !seen.claim(kind) {
                    continue;
                }
                match value {
                    Some(v) => apply_value(kind, v, catalog, intent),
                    None => randomize(kind, intent),
                }
            }
        }
    }

    if random_all {
        if EntityKind::ALL.iter().any(|&k| intent.entity(k).pick.is_some()) {
            warn!("random flag overrides specific picks");
        }
        intent.randomize_all();
    }
}

/// Consume the token at `*i` as a flag value when it is not a flag itself.
fn take_value<'a>(tokens: &[&'a str], i: &mut usize) -> Option<&'a str> {
    let next = tokens.get(*i)?;
    if classify(next) != Token::Word {
        return None;
    }
    *i += 1;
    let word = value_word(next);
    (!word.is_empty()).then_some(word)
}

fn randomize(kind: EntityKind, intent: &mut SettingsIntent) {
    intent.entity_mut(kind).randomize = true;
    if kind == EntityKind::Style && intent.style_marker.is_none() {
        intent.style_marker = Some(StyleMarker::Global);
    }
}

fn apply_value(kind: EntityKind, value: &str, catalog: &Catalog, intent: &mut SettingsIntent) {
    if kind == EntityKind::Style {
        if value == "0" {
            intent.style.randomize = true;
            intent.style_marker = Some(StyleMarker::Relative);
            return;
        }
        if value.parse::<usize>().is_err() {
            if let Some(key) = catalog.group_for_alias(value) {
                intent.style.randomize = true;
                intent.style_marker = Some(StyleMarker::Group(key.to_string()));
                return;
            }
        }
    }
    match catalog.lookup(kind, value) {
        Some(entry) => {
            intent.entity_mut(kind).pick = Some(entry.clone());
            if kind == EntityKind::Style {
                intent.style_marker = Some(StyleMarker::Specific);
            }
        }
        None => warn!(kind = kind.label(), value, "unknown catalog value ignored"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::sample_catalog;

    #[test]
    fn plain_text_is_all_free_text() {
        let catalog = sample_catalog();
        let intent = parse("  a cat on a roof  ", &catalog);
        assert_eq!(intent.free_text, "a cat on a roof");
        assert_eq!(intent, SettingsIntent { free_text: intent.free_text.clone(), ..Default::default() });
    }

    #[test]
    fn hyphenated_words_are_not_flags() {
        let catalog = sample_catalog();
        let intent = parse("a well-known cat -and friends", &catalog);
        assert_eq!(intent.free_text, "a well-known cat -and friends");
        assert!(!intent.is_random());
    }

    #[test]
    fn fused_and_spaced_forms_match() {
        let catalog = sample_catalog();
        assert_eq!(parse("cat -t1s72", &catalog), parse("cat -t 1 -s 72", &catalog));
        assert_eq!(parse("cat -t1s72a90", &catalog), parse("cat -t 1 -s 72 -a 90", &catalog));
    }

    #[test]
    fn shortcut_with_fused_indices() {
        let catalog = sample_catalog();
        let intent = parse("!кот -t1s72a90", &catalog);
        assert_eq!(intent.free_text, "кот");
        assert_eq!(intent.ty.pick.as_ref().unwrap().index, 1);
        assert_eq!(intent.style.pick.as_ref().unwrap().index, 72);
        assert_eq!(intent.artist.pick.as_ref().unwrap().index, 90);
        assert_eq!(intent.style_marker, Some(StyleMarker::Specific));
        assert!(!intent.is_random());
        assert!(intent.aspect_ratio.is_none());
    }

    #[test]
    fn double_bang_randomizes_everything() {
        let catalog = sample_catalog();
        let intent = parse("!!кот", &catalog);
        assert_eq!(intent.free_text, "кот");
        assert!(intent.ty.randomize);
        assert!(intent.style.randomize);
        assert!(intent.artist.randomize);
        assert_eq!(intent.style_marker, Some(StyleMarker::Global));
    }

    #[test]
    fn img_command_prefix_is_stripped() {
        let catalog = sample_catalog();
        assert_eq!(parse("/img a fox", &catalog).free_text, "a fox");
        assert_eq!(parse("/img@SomeBot a fox", &catalog).free_text, "a fox");
        assert_eq!(parse("/imagine a fox", &catalog).free_text, "/imagine a fox");
    }

    #[test]
    fn aspect_ratio_forms() {
        let catalog = sample_catalog();
        assert_eq!(parse("cat --ar 4x3", &catalog).aspect_ratio, Some(AspectRatio::Landscape));
        assert_eq!(parse("cat --ar 4:3", &catalog).aspect_ratio, Some(AspectRatio::Landscape));
        assert_eq!(parse("cat -ar16:9", &catalog).aspect_ratio, Some(AspectRatio::Wide));
        let bad = parse("cat --ar 7:5", &catalog);
        assert!(bad.aspect_ratio.is_none());
        assert_eq!(bad.free_text, "cat");
    }

    #[test]
    fn values_by_alias_and_name() {
        let catalog = sample_catalog();
        let intent = parse("dog --type photo -s Origami -a frida", &catalog);
        assert_eq!(intent.free_text, "dog");
        assert_eq!(intent.ty.pick.as_ref().unwrap().index, 1);
        assert_eq!(intent.style.pick.as_ref().unwrap().index, 3);
        assert_eq!(intent.artist.pick.as_ref().unwrap().index, 2);
    }

    #[test]
    fn flag_without_value_randomizes() {
        let catalog = sample_catalog();
        let intent = parse("dog -t -s -a", &catalog);
        assert!(intent.ty.randomize);
        assert!(intent.style.randomize);
        assert!(intent.artist.randomize);
        assert_eq!(intent.style_marker, Some(StyleMarker::Global));
    }

    #[test]
    fn style_zero_is_relative() {
        let catalog = sample_catalog();
        let intent = parse("dog -t 1 -s 0", &catalog);
        assert!(intent.style.randomize);
        assert_eq!(intent.style_marker, Some(StyleMarker::Relative));
        assert_eq!(intent.ty.pick.as_ref().unwrap().index, 1);
    }

    #[test]
    fn style_group_alias_selects_group() {
        let catalog = sample_catalog();
        let intent = parse("dog -s handmade", &catalog);
        assert!(intent.style.randomize);
        assert_eq!(intent.style_marker, Some(StyleMarker::Group("craft".into())));
        assert!(intent.style.pick.is_none());
    }

    #[test]
    fn combined_flags_toggle_random() {
        let catalog = sample_catalog();
        let intent = parse("dog -ta", &catalog);
        assert!(intent.ty.randomize);
        assert!(!intent.style.randomize);
        assert!(intent.artist.randomize);

        let intent = parse("dog -tsa", &catalog);
        assert!(intent.ty.randomize && intent.style.randomize && intent.artist.randomize);
    }

    #[test]
    fn random_flag_overrides_specific_picks() {
        let catalog = sample_catalog();
        let intent = parse("dog -t 2 -a 1 -r --ar 1:1", &catalog);
        assert!(intent.ty.pick.is_none());
        assert!(intent.artist.pick.is_none());
        assert!(intent.ty.randomize && intent.style.randomize && intent.artist.randomize);
        assert_eq!(intent.style_marker, Some(StyleMarker::Global));
        assert_eq!(intent.aspect_ratio, Some(AspectRatio::Square));
    }

    #[test]
    fn combined_after_specific_prefers_random() {
        let catalog = sample_catalog();
        let intent = parse("dog -t 2 -ts", &catalog);
        assert!(intent.ty.pick.is_none());
        assert!(intent.ty.randomize);
    }

    #[test]
    fn index_lists() {
        let catalog = sample_catalog();
        let intent = parse("dog -t(1, 2,3) -s (4,5) -a(9)", &catalog);
        assert_eq!(intent.free_text, "dog");
        assert_eq!(intent.ty.choices, vec![1, 2, 3]);
        assert_eq!(intent.style.choices, vec![4, 5]);
        assert_eq!(intent.artist.choices, vec![9]);
        assert!(intent.style_marker.is_none());
    }

    #[test]
    fn list_beats_later_random_flag() {
        let catalog = sample_catalog();
        let intent = parse("dog -s(1,2) -r", &catalog);
        assert_eq!(intent.style.choices, vec![1, 2]);
        assert!(!intent.style.randomize);
        assert!(intent.ty.randomize);
        assert!(intent.style_marker.is_none());
    }

    #[test]
    fn first_occurrence_wins() {
        let catalog = sample_catalog();
        let intent = parse("dog -t 1 --type 2", &catalog);
        assert_eq!(intent.ty.pick.as_ref().unwrap().index, 1);
    }

    #[test]
    fn unknown_values_are_ignored() {
        let catalog = sample_catalog();
        let intent = parse("dog -t nosuch -a 999", &catalog);
        assert!(intent.ty.is_empty());
        assert!(intent.artist.is_empty());
    }

    #[test]
    fn em_dash_long_flags() {
        let catalog = sample_catalog();
        let intent = parse("dog \u{2014}type 2 \u{2014}ar 9x16", &catalog);
        assert_eq!(intent.ty.pick.as_ref().unwrap().index, 2);
        assert_eq!(intent.aspect_ratio, Some(AspectRatio::Tall));
    }

    #[test]
    fn flag_at_start_leaves_empty_prompt() {
        let catalog = sample_catalog();
        let intent = parse("/img -t 1", &catalog);
        assert_eq!(intent.free_text, "");
        assert!(intent.ty.pick.is_some());
    }
}
