//! Settings records shared by the parser, resolver and state store.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::catalog::{CatalogEntry, EntityKind};

/// Supported aspect ratios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AspectRatio {
    /// 1:1
    #[serde(rename = "1:1")]
    Square,
    /// 4:3
    #[serde(rename = "4:3")]
    Landscape,
    /// 16:9
    #[serde(rename = "16:9")]
    Wide,
    /// 3:4
    #[serde(rename = "3:4")]
    Portrait,
    /// 9:16
    #[serde(rename = "9:16")]
    Tall,
}

impl AspectRatio {
    /// All supported ratios.
    pub const ALL: [Self; 5] = [Self::Square, Self::Landscape, Self::Wide, Self::Portrait, Self::Tall];

    /// Colon form (`16:9`).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Square => "1:1",
            Self::Landscape => "4:3",
            Self::Wide => "16:9",
            Self::Portrait => "3:4",
            Self::Tall => "9:16",
        }
    }

    /// Parse a ratio, accepting `x` (latin or cyrillic) or `×` as separator.
    ///
    /// Returns `None` for anything outside the supported set.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let normalized: String = value
            .trim()
            .chars()
            .map(|c| match c {
                'x' | 'X' | 'х' | 'Х' | '×' => ':',
                other => other,
            })
            .collect();
        Self::ALL.into_iter().find(|ar| ar.as_str() == normalized)
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a random style should be drawn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StyleMarker {
    /// A specific style was picked.
    Specific,
    /// Any style from the whole catalog.
    Global,
    /// A style applicable to the resolved type.
    Relative,
    /// A style from the named group.
    Group(String),
}

impl fmt::Display for StyleMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Specific => f.write_str("SPECIFIC"),
            Self::Global => f.write_str("GLOBAL"),
            Self::Relative => f.write_str("RELATIVE"),
            Self::Group(key) => write!(f, "GROUP:{key}"),
        }
    }
}

/// What the user asked for on one axis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityIntent {
    /// A specific entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pick: Option<CatalogEntry>,
    /// Indices to choose from uniformly.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<usize>,
    /// Pick at random.
    #[serde(default)]
    pub randomize: bool,
}

impl EntityIntent {
    /// Whether nothing was requested on this axis.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pick.is_none() && self.choices.is_empty() && !self.randomize
    }
}

/// Parsed, not yet resolved, record of a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsIntent {
    /// Prompt text with flags and trigger characters removed.
    pub free_text: String,
    /// Type axis.
    #[serde(default)]
    pub ty: EntityIntent,
    /// Style axis.
    #[serde(default)]
    pub style: EntityIntent,
    /// Artist axis.
    #[serde(default)]
    pub artist: EntityIntent,
    /// Requested aspect ratio.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<AspectRatio>,
    /// How the style should be drawn when randomized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style_marker: Option<StyleMarker>,
}

impl SettingsIntent {
    /// Intent that reproduces fixed settings without any randomness.
    #[must_use]
    pub fn fixed(free_text: &str, settings: &ResolvedSettings) -> Self {
        let pick = |entry: &Option<CatalogEntry>| EntityIntent {
            pick: entry.clone(),
            ..EntityIntent::default()
        };
        Self {
            free_text: free_text.to_string(),
            ty: pick(&settings.ty),
            style: pick(&settings.style),
            artist: pick(&settings.artist),
            aspect_ratio: settings.aspect_ratio,
            style_marker: settings.style.as_ref().map(|_| StyleMarker::Specific),
        }
    }

    /// Axis for a kind.
    #[must_use]
    pub fn entity(&self, kind: EntityKind) -> &EntityIntent {
        match kind {
            EntityKind::Type => &self.ty,
            EntityKind::Style => &self.style,
            EntityKind::Artist => &self.artist,
        }
    }

    /// Mutable axis for a kind.
    pub fn entity_mut(&mut self, kind: EntityKind) -> &mut EntityIntent {
        match kind {
            EntityKind::Type => &mut self.ty,
            EntityKind::Style => &mut self.style,
            EntityKind::Artist => &mut self.artist,
        }
    }

    /// Request a random type, global style and artist, dropping specific picks.
    pub fn randomize_all(&mut self) {
        for kind in EntityKind::ALL {
            let axis = self.entity_mut(kind);
            axis.randomize = true;
            axis.pick = None;
        }
        self.style_marker = Some(StyleMarker::Global);
    }

    /// Whether resolving this intent consumes randomness.
    #[must_use]
    pub fn is_random(&self) -> bool {
        EntityKind::ALL.iter().any(|&k| {
            let axis = self.entity(k);
            axis.randomize || !axis.choices.is_empty()
        })
    }

    /// Enforce one winner per axis.
    ///
    /// A choice list beats a random flag (the flag counts as satisfied) and
    /// a specific pick. A random flag beats a specific pick.
    pub fn settle_conflicts(&mut self) {
        for kind in EntityKind::ALL {
            let axis = self.entity_mut(kind);
            if !axis.choices.is_empty() {
                if axis.pick.take().is_some() {
                    warn!(kind = kind.label(), "choice list overrides specific pick");
                }
                axis.randomize = false;
                if kind == EntityKind::Style {
                    self.style_marker = None;
                }
            } else if axis.randomize && axis.pick.is_some() {
                warn!(kind = kind.label(), "random request overrides specific pick");
                axis.pick = None;
                if kind == EntityKind::Style && self.style_marker == Some(StyleMarker::Specific) {
                    self.style_marker = Some(StyleMarker::Global);
                }
            }
        }
        if self.style.randomize && self.style_marker.is_none() {
            self.style_marker = Some(StyleMarker::Global);
        }
    }
}

/// Concrete settings used for one generation call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedSettings {
    /// Resolved type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ty: Option<CatalogEntry>,
    /// Resolved style.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<CatalogEntry>,
    /// Resolved artist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<CatalogEntry>,
    /// Resolved aspect ratio.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<AspectRatio>,
}

impl ResolvedSettings {
    /// Entry for a kind.
    #[must_use]
    pub fn entry(&self, kind: EntityKind) -> Option<&CatalogEntry> {
        match kind {
            EntityKind::Type => self.ty.as_ref(),
            EntityKind::Style => self.style.as_ref(),
            EntityKind::Artist => self.artist.as_ref(),
        }
    }

    /// Display index for a kind.
    #[must_use]
    pub fn index(&self, kind: EntityKind) -> Option<usize> {
        self.entry(kind).map(|e| e.index)
    }
}
