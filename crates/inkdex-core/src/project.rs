//! The canonical-record → index-document projection.
//!
//! Forward sync and reconciliation both build documents through [`project`];
//! there is no other definition of what a record looks like in the index.
//!
//! Composite keys are derived from the city and the styles:
//!
//! | Key | Shape | Example |
//! |-----|-------|---------|
//! | `style_keys` | `{city}\|{style}` per style | `austin\|blackwork` |
//! | `group_key` | `{entity_type}\|{city}` | `artist\|austin` |
//! | `sort_key` | `{city}\|{primary style}\|{title}` | `austin\|blackwork\|mara ink` |
//!
//! A missing city is keyed as `unknown`; an artist without styles sorts
//! under `~` so it lands after styled artists of the same city.

use crate::models::{doc_id, ArtistRecord, Entity, EntityType, IndexDocument, StudioRecord};
use crate::normalize::slug;

const UNKNOWN_CITY: &str = "unknown";
const NO_STYLE: &str = "~";

/// Extra context an artist projection pulls from outside its own record.
#[derive(Debug, Clone, Default)]
pub struct ProjectionContext {
    /// City of the artist's attributed studio, if the studio is known.
    pub studio_city: Option<String>,
}

/// Project a canonical entity at `version` into its index document.
pub fn project(entity: &Entity, version: u64, ctx: &ProjectionContext) -> IndexDocument {
    match entity {
        Entity::Artist(a) => project_artist(a, version, ctx),
        Entity::Studio(s) => project_studio(s, version),
    }
}

fn project_artist(artist: &ArtistRecord, version: u64, ctx: &ProjectionContext) -> IndexDocument {
    let city = ctx
        .studio_city
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string);
    let mut styles = artist.styles.clone();
    styles.sort();
    styles.dedup();

    let keys = Keys::new(EntityType::Artist, city.as_deref(), &styles, &artist.display_name);

    IndexDocument {
        doc_id: doc_id(EntityType::Artist, &artist.artist_id),
        entity_type: EntityType::Artist,
        entity_id: artist.artist_id.clone(),
        version,
        title: artist.display_name.clone(),
        body: artist.bio.clone(),
        url: artist.portfolio_url.clone(),
        city,
        styles,
        style_keys: keys.style_keys,
        group_key: keys.group_key,
        sort_key: keys.sort_key,
        artist_ids: vec![artist.artist_id.clone()],
        studio_id: Some(artist.source_studio_id.clone()),
        delisted: artist.delisted,
    }
}

fn project_studio(studio: &StudioRecord, version: u64) -> IndexDocument {
    let city = studio
        .address
        .as_ref()
        .and_then(|a| a.city.as_deref())
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string);
    let mut artist_ids = studio.artist_ids.clone();
    artist_ids.sort();
    artist_ids.dedup();

    let keys = Keys::new(EntityType::Studio, city.as_deref(), &[], &studio.display_name);

    IndexDocument {
        doc_id: doc_id(EntityType::Studio, &studio.studio_id),
        entity_type: EntityType::Studio,
        entity_id: studio.studio_id.clone(),
        version,
        title: studio.display_name.clone(),
        body: studio
            .address
            .as_ref()
            .map(|a| a.one_line())
            .unwrap_or_default(),
        url: studio.website_url.clone(),
        city,
        styles: Vec::new(),
        style_keys: keys.style_keys,
        group_key: keys.group_key,
        sort_key: keys.sort_key,
        artist_ids,
        studio_id: Some(studio.studio_id.clone()),
        delisted: studio.delisted,
    }
}

/// Everything a document says apart from its version and the curation
/// flag. Two projections of the same record agree on it exactly when they
/// were built from the same context.
pub fn content_fingerprint(doc: &IndexDocument) -> String {
    let mut doc = doc.clone();
    doc.version = 0;
    doc.delisted = false;
    serde_json::to_string(&doc).unwrap_or_default()
}

struct Keys {
    style_keys: Vec<String>,
    group_key: String,
    sort_key: String,
}

impl Keys {
    fn new(entity_type: EntityType, city: Option<&str>, styles: &[String], title: &str) -> Self {
        let city_key = city_key(city);
        let style_keys = styles
            .iter()
            .map(|s| format!("{}|{}", city_key, s))
            .collect();
        let primary = styles.first().map(String::as_str).unwrap_or(NO_STYLE);
        Self {
            style_keys,
            group_key: format!("{}|{}", entity_type.as_str(), city_key),
            sort_key: format!("{}|{}|{}", city_key, primary, title.trim().to_lowercase()),
        }
    }
}

/// Normalized city component of the composite keys.
pub fn city_key(city: Option<&str>) -> String {
    city.map(slug)
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| UNKNOWN_CITY.to_string())
}
