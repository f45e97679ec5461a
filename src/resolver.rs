//! Turns a [`SettingsIntent`] into concrete [`ResolvedSettings`].
//!
//! Each axis is resolved independently, by priority: choice list, specific
//! pick, random flag. Randomness comes from the caller so tests can seed it.

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;

use crate::catalog::{Catalog, CatalogEntry, EntityKind};
use crate::settings::{EntityIntent, ResolvedSettings, SettingsIntent, StyleMarker};

/// Resolve an intent against the catalog.
///
/// Intents without choice lists or random flags resolve identically on
/// every call; random ones may differ between calls.
pub fn resolve<R: Rng + ?Sized>(
    intent: &SettingsIntent,
    catalog: &Catalog,
    rng: &mut R,
) -> ResolvedSettings {
    let ty = resolve_axis(EntityKind::Type, &intent.ty, catalog, rng, |catalog, rng| {
        random_entry(EntityKind::Type, catalog, rng)
    });
    let style = resolve_axis(EntityKind::Style, &intent.style, catalog, rng, |catalog, rng| {
        let marker = intent.style_marker.clone().unwrap_or(StyleMarker::Global);
        random_style_for_marker(&marker, ty.as_ref(), catalog, rng)
    });
    let artist = resolve_axis(EntityKind::Artist, &intent.artist, catalog, rng, |catalog, rng| {
        random_entry(EntityKind::Artist, catalog, rng)
    });

    ResolvedSettings { ty, style, artist, aspect_ratio: intent.aspect_ratio }
}

fn resolve_axis<R, F>(
    kind: EntityKind,
    axis: &EntityIntent,
    catalog: &Catalog,
    rng: &mut R,
    draw: F,
) -> Option<CatalogEntry>
where
    R: Rng + ?Sized,
    F: FnOnce(&Catalog, &mut R) -> Option<CatalogEntry>,
{
    if let Some(&index) = axis.choices.choose(rng) {
        if let Some(entry) = catalog.by_index(kind, index) {
            return Some(entry.clone());
        }
        debug!(kind = kind.label(), index, "chosen index not in catalog, falling back");
    }
    if let Some(pick) = &axis.pick {
        return Some(pick.clone());
    }
    if axis.randomize {
        return draw(catalog, rng);
    }
    None
}

/// Uniform pick over every entry of a kind.
pub fn random_entry<R: Rng + ?Sized>(
    kind: EntityKind,
    catalog: &Catalog,
    rng: &mut R,
) -> Option<CatalogEntry> {
    catalog.entries(kind).choose(rng).cloned()
}

/// Random style drawn according to a marker.
///
/// `Relative` draws from the type's styles and `Group` from the group's
/// styles; both fall back to the whole catalog when their pool is empty.
pub fn random_style_for_marker<R: Rng + ?Sized>(
    marker: &StyleMarker,
    ty: Option<&CatalogEntry>,
    catalog: &Catalog,
    rng: &mut R,
) -> Option<CatalogEntry> {
    let pool = match marker {
        StyleMarker::Relative => ty.map(|t| catalog.styles_for_type(t)).unwrap_or_default(),
        StyleMarker::Group(key) => catalog.group_styles(key),
        StyleMarker::Global | StyleMarker::Specific => Vec::new(),
    };
    if let Some(style) = pool.choose(rng) {
        return Some((*style).clone());
    }
    if matches!(marker, StyleMarker::Relative | StyleMarker::Group(_)) {
        debug!(%marker, "style pool empty, using global styles");
    }
    random_entry(EntityKind::Style, catalog, rng)
}

/// Random style for the style panel's "random" button.
///
/// Prefers styles relevant to the selected type.
pub fn random_style<R: Rng + ?Sized>(
    ty: Option<&CatalogEntry>,
    catalog: &Catalog,
    rng: &mut R,
) -> Option<CatalogEntry> {
    random_style_for_marker(&StyleMarker::Relative, ty, catalog, rng)
}

/// Style auto-picked when a type is chosen interactively with no style set.
///
/// Only styles relevant to the type qualify; a type without styles gets none.
pub fn pick_style_for_type<R: Rng + ?Sized>(
    ty: &CatalogEntry,
    catalog: &Catalog,
    rng: &mut R,
) -> Option<CatalogEntry> {
    catalog.styles_for_type(ty).choose(rng).map(|s| (*s).clone())
}
