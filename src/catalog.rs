//! Type, style and artist lookup tables loaded from YAML.
//!
//! Every entry gets a 1-based absolute index in file order. Indices are the
//! stable handle used by inline flags (`-t3 -s41`), keyboards and captions.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::BotError;

/// Group key reserved for the artist list; never usable as a style group.
pub const RESERVED_ARTISTS_GROUP: &str = "artists";

/// The three catalog-backed axes of a generation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Kind of picture (photo, poster, sticker...).
    Type,
    /// Visual style.
    Style,
    /// Artist whose manner is imitated.
    Artist,
}

impl EntityKind {
    /// All kinds in display order.
    pub const ALL: [Self; 3] = [Self::Type, Self::Style, Self::Artist];

    /// Human label used in captions.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Type => "Type",
            Self::Style => "Style",
            Self::Artist => "Artist",
        }
    }

    /// Short flag letter (`t`, `s`, `a`).
    #[must_use]
    pub fn letter(self) -> char {
        match self {
            Self::Type => 't',
            Self::Style => 's',
            Self::Artist => 'a',
        }
    }

    /// Inverse of [`EntityKind::letter`].
    #[must_use]
    pub fn from_letter(c: char) -> Option<Self> {
        match c.to_ascii_lowercase() {
            't' => Some(Self::Type),
            's' => Some(Self::Style),
            'a' => Some(Self::Artist),
            _ => None,
        }
    }

    /// Name used in callback data (`type`, `style`, `artist`).
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Self::Type => "type",
            Self::Style => "style",
            Self::Artist => "artist",
        }
    }

    /// Inverse of [`EntityKind::key`].
    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "type" => Some(Self::Type),
            "style" => Some(Self::Style),
            "artist" => Some(Self::Artist),
            _ => None,
        }
    }
}

/// One type, style or artist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Full name, unique per kind (case-insensitive).
    pub name: String,
    /// Display alias.
    pub alias: String,
    /// Compact alias for commands (artists only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_alias: Option<String>,
    /// Optional emoji shown on buttons.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
    /// 1-based absolute index within its kind.
    pub index: usize,
    /// Style groups that apply to this entry (types only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_keys: Vec<String>,
}

impl CatalogEntry {
    /// Button label: `[N] emoji alias`.
    #[must_use]
    pub fn label(&self) -> String {
        match &self.emoji {
            Some(emoji) => format!("[{}] {emoji} {}", self.index, self.alias),
            None => format!("[{}] {}", self.index, self.alias),
        }
    }

    /// Token used when this entry is written back as a flag value.
    ///
    /// Artists prefer their short alias; everything else uses its index.
    #[must_use]
    pub fn command_token(&self, kind: EntityKind) -> String {
        match (kind, &self.short_alias) {
            (EntityKind::Artist, Some(short)) => short.clone(),
            _ => self.index.to_string(),
        }
    }
}

/// A named subset of styles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleGroup {
    /// Group key (`craft`, `painting`...).
    pub key: String,
    /// Absolute indices of member styles, in file order.
    pub style_indices: Vec<usize>,
}

/// Read-only lookup tables for types, styles, artists and style groups.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    types: Vec<CatalogEntry>,
    styles: Vec<CatalogEntry>,
    artists: Vec<CatalogEntry>,
    groups: Vec<StyleGroup>,
    group_aliases: HashMap<String, String>,
}

// --- YAML document shape ---

/// Raw catalog file contents.
#[derive(Debug, Default, Deserialize)]
pub struct CatalogDocument {
    /// Types in display order.
    #[serde(default)]
    pub types: Vec<TypeDoc>,
    /// Style groups in display order.
    #[serde(default)]
    pub style_groups: Vec<StyleGroupDoc>,
    /// Artists in display order.
    #[serde(default)]
    pub artists: Vec<ArtistDoc>,
}

/// One type as written in the catalog file.
#[derive(Debug, Deserialize)]
pub struct TypeDoc {
    /// Full name.
    pub name: String,
    /// Display alias.
    pub alias: String,
    /// Optional emoji.
    #[serde(default)]
    pub emoji: Option<String>,
    /// Keys of the style groups relevant to this type.
    #[serde(default)]
    pub style_groups: Vec<String>,
}

/// One style group as written in the catalog file.
#[derive(Debug, Deserialize)]
pub struct StyleGroupDoc {
    /// Group key.
    pub key: String,
    /// Extra names that select this group in a `-s` flag.
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Member styles.
    #[serde(default)]
    pub styles: Vec<StyleDoc>,
}

/// One style as written in the catalog file.
#[derive(Debug, Deserialize)]
pub struct StyleDoc {
    /// Full name.
    pub name: String,
    /// Display alias.
    pub alias: String,
    /// Optional emoji.
    #[serde(default)]
    pub emoji: Option<String>,
}

/// One artist as written in the catalog file.
#[derive(Debug, Deserialize)]
pub struct ArtistDoc {
    /// Full name.
    pub name: String,
    /// Display alias.
    pub alias: String,
    /// Compact alias for commands.
    #[serde(default)]
    pub short_alias: Option<String>,
    /// Optional emoji.
    #[serde(default)]
    pub emoji: Option<String>,
}

impl Catalog {
    /// Load and index a catalog file.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::Catalog`] if the file is missing, malformed, or
    /// defines no types, styles or artists at all.
    pub fn load(path: &Path) -> Result<Self, BotError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| BotError::Catalog(format!("Failed to read {}: {e}", path.display())))?;
        let doc: CatalogDocument = serde_yaml::from_str(&contents)
            .map_err(|e| BotError::Catalog(format!("Failed to parse {}: {e}", path.display())))?;
        let catalog = Self::from_document(doc)?;
        debug!(
            types = catalog.types.len(),
            styles = catalog.styles.len(),
            artists = catalog.artists.len(),
            groups = catalog.groups.len(),
            "catalog loaded"
        );
        Ok(catalog)
    }

    /// Index an already-parsed document.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::Catalog`] if the document has no entries.
    pub fn from_document(doc: CatalogDocument) -> Result<Self, BotError> {
        let mut catalog = Self::default();

        let mut seen = HashSet::new();
        for t in doc.types {
            if !seen.insert(t.name.to_lowercase()) {
                warn!(name = %t.name, "duplicate type skipped");
                continue;
            }
            let index = catalog.types.len() + 1;
            catalog.types.push(CatalogEntry {
                name: t.name,
                alias: t.alias,
                short_alias: None,
                emoji: t.emoji,
                index,
                group_keys: t.style_groups,
            });
        }

        let mut style_by_name: HashMap<String, usize> = HashMap::new();
        for group in doc.style_groups {
            if group.key.eq_ignore_ascii_case(RESERVED_ARTISTS_GROUP) {
                warn!("style group key '{RESERVED_ARTISTS_GROUP}' is reserved, skipped");
                continue;
            }
            let mut members = Vec::new();
            for style in group.styles {
                let lower = style.name.to_lowercase();
                let index = if let Some(&existing) = style_by_name.get(&lower) {
                    existing
                } else {
                    let index = catalog.styles.len() + 1;
                    catalog.styles.push(CatalogEntry {
                        name: style.name,
                        alias: style.alias,
                        short_alias: None,
                        emoji: style.emoji,
                        index,
                        group_keys: Vec::new(),
                    });
                    style_by_name.insert(lower, index);
                    index
                };
                if !members.contains(&index) {
                    members.push(index);
                }
            }
            for alias in group.aliases {
                catalog.group_aliases.entry(alias.to_lowercase()).or_insert_with(|| group.key.clone());
            }
            catalog.groups.push(StyleGroup { key: group.key, style_indices: members });
        }

        let mut seen_names = HashSet::new();
        let mut seen_short = HashSet::new();
        for a in doc.artists {
            if !seen_names.insert(a.name.to_lowercase()) {
                warn!(name = %a.name, "duplicate artist skipped");
                continue;
            }
            let short_alias = a.short_alias.filter(|s| {
                let fresh = seen_short.insert(s.to_lowercase());
                if !fresh {
                    warn!(short_alias = %s, artist = %a.name, "duplicate short alias ignored");
                }
                fresh
            });
            let index = catalog.artists.len() + 1;
            catalog.artists.push(CatalogEntry {
                name: a.name,
                alias: a.alias,
                short_alias,
                emoji: a.emoji,
                index,
                group_keys: Vec::new(),
            });
        }

        for t in &catalog.types {
            for key in &t.group_keys {
                if catalog.group(key).is_none() && !key.eq_ignore_ascii_case(RESERVED_ARTISTS_GROUP) {
                    warn!(type_name = %t.name, group = %key, "type references unknown style group");
                }
            }
        }

        if catalog.types.is_empty() && catalog.styles.is_empty() && catalog.artists.is_empty() {
            return Err(BotError::Catalog("catalog defines no types, styles or artists".into()));
        }
        Ok(catalog)
    }

    /// All entries of a kind, in index order.
    #[must_use]
    pub fn entries(&self, kind: EntityKind) -> &[CatalogEntry] {
        match kind {
            EntityKind::Type => &self.types,
            EntityKind::Style => &self.styles,
            EntityKind::Artist => &self.artists,
        }
    }

    /// Entry with the given absolute index.
    #[must_use]
    pub fn by_index(&self, kind: EntityKind, index: usize) -> Option<&CatalogEntry> {
        index.checked_sub(1).and_then(|i| self.entries(kind).get(i))
    }

    /// Resolve a flag value: integer index first, then aliases, then name.
    ///
    /// A numeric value only ever resolves by index. Artists also match their
    /// short alias before the full alias.
    #[must_use]
    pub fn lookup(&self, kind: EntityKind, value: &str) -> Option<&CatalogEntry> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }
        if let Ok(index) = value.parse::<usize>() {
            return self.by_index(kind, index);
        }
        let entries = self.entries(kind);
        if kind == EntityKind::Artist {
            if let Some(entry) = entries
                .iter()
                .find(|e| e.short_alias.as_deref().is_some_and(|s| same_text(s, value)))
            {
                return Some(entry);
            }
        }
        entries
            .iter()
            .find(|e| same_text(&e.alias, value))
            .or_else(|| entries.iter().find(|e| same_text(&e.name, value)))
    }

    /// Group key selected by a style-group alias, if any.
    #[must_use]
    pub fn group_for_alias(&self, alias: &str) -> Option<&str> {
        self.group_aliases.get(&alias.trim().to_lowercase()).map(String::as_str)
    }

    /// Style group by key (case-insensitive).
    #[must_use]
    pub fn group(&self, key: &str) -> Option<&StyleGroup> {
        self.groups.iter().find(|g| g.key.eq_ignore_ascii_case(key))
    }

    /// All style groups in file order.
    #[must_use]
    pub fn groups(&self) -> &[StyleGroup] {
        &self.groups
    }

    /// Styles of a group; empty for unknown groups.
    #[must_use]
    pub fn group_styles(&self, key: &str) -> Vec<&CatalogEntry> {
        self.group(key)
            .map(|g| {
                g.style_indices.iter().filter_map(|&i| self.by_index(EntityKind::Style, i)).collect()
            })
            .unwrap_or_default()
    }

    /// Union of the styles reachable through a type's group keys.
    #[must_use]
    pub fn styles_for_type(&self, type_entry: &CatalogEntry) -> Vec<&CatalogEntry> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for key in &type_entry.group_keys {
            if key.eq_ignore_ascii_case(RESERVED_ARTISTS_GROUP) {
                continue;
            }
            for style in self.group_styles(key) {
                if seen.insert(style.index) {
                    out.push(style);
                }
            }
        }
        out
    }
}

fn same_text(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b) || a.to_lowercase() == b.to_lowercase()
}
