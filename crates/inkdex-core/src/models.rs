//! Core data models shared by the pipeline, the stores, and the sync engine.
//!
//! Records flow through the system in this order:
//!
//! ```text
//! Source ──▶ ProfileCandidate ──▶ ArtistRecord / StudioRecord ──▶ ChangeEvent ──▶ IndexDocument
//! (discovery)   (extractor)          (scrape + ingest)              (store feed)     (sync engine)
//! ```

use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ErrorKind;

/// Postal address of a studio, as reported by discovery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    #[serde(default)]
    pub line1: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

impl Address {
    /// Single-line rendering, skipping missing parts.
    pub fn one_line(&self) -> String {
        [
            &self.line1,
            &self.city,
            &self.region,
            &self.postal_code,
            &self.country,
        ]
        .iter()
        .filter_map(|p| p.as_deref())
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
    }
}

/// A discovery candidate: one studio and its website.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub source_id: String,
    pub display_name: String,
    pub website_url: String,
    #[serde(default)]
    pub address: Option<Address>,
}

/// A portfolio link found on a studio website. Lives for one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileCandidate {
    pub candidate_id: String,
    pub source_id: String,
    pub portfolio_url: String,
    pub display_name_hint: Option<String>,
}

/// How complete a scraped profile was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeStatus {
    /// Display name, bio, and at least one image were found.
    Complete,
    /// Required fields were found but bio or images were missing.
    Partial,
}

impl ScrapeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScrapeStatus::Complete => "complete",
            ScrapeStatus::Partial => "partial",
        }
    }
}

/// Canonical artist entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistRecord {
    /// Pure function of the normalized portfolio URL.
    pub artist_id: String,
    pub display_name: String,
    pub bio: String,
    pub portfolio_url: String,
    pub handle: Option<String>,
    pub images: Vec<String>,
    pub source_studio_id: String,
    pub styles: Vec<String>,
    pub last_scraped_at: DateTime<Utc>,
    pub scrape_status: ScrapeStatus,
    /// Curation soft-delete flag. Never set by the pipeline itself.
    #[serde(default)]
    pub delisted: bool,
}

/// Canonical studio entity. `studio_id` is the discovery `source_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudioRecord {
    pub studio_id: String,
    pub display_name: String,
    pub website_url: String,
    #[serde(default)]
    pub address: Option<Address>,
    pub artist_ids: Vec<String>,
    #[serde(default)]
    pub delisted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Artist,
    Studio,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Artist => "artist",
            EntityType::Studio => "studio",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "artist" | "artists" => Ok(EntityType::Artist),
            "studio" | "studios" => Ok(EntityType::Studio),
            other => bail!("unknown entity type: '{}' (expected artist or studio)", other),
        }
    }
}

/// Any record the canonical store holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Entity {
    Artist(ArtistRecord),
    Studio(StudioRecord),
}

impl Entity {
    pub fn entity_type(&self) -> EntityType {
        match self {
            Entity::Artist(_) => EntityType::Artist,
            Entity::Studio(_) => EntityType::Studio,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Entity::Artist(a) => &a.artist_id,
            Entity::Studio(s) => &s.studio_id,
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            Entity::Artist(a) => &a.display_name,
            Entity::Studio(s) => &s.display_name,
        }
    }

    pub fn delisted(&self) -> bool {
        match self {
            Entity::Artist(a) => a.delisted,
            Entity::Studio(s) => s.delisted,
        }
    }

    pub fn set_delisted(&mut self, delisted: bool) {
        match self {
            Entity::Artist(a) => a.delisted = delisted,
            Entity::Studio(s) => s.delisted = delisted,
        }
    }

    /// Index document id for this entity.
    pub fn doc_id(&self) -> String {
        doc_id(self.entity_type(), self.id())
    }
}

/// Index document ids are namespaced by entity type so artist and studio
/// ids can never collide.
pub fn doc_id(entity_type: EntityType, entity_id: &str) -> String {
    format!("{}:{}", entity_type.as_str(), entity_id)
}

/// Split a document id produced by [`doc_id`] back into its parts.
pub fn parse_doc_id(doc_id: &str) -> Option<(EntityType, &str)> {
    let (ty, id) = doc_id.split_once(':')?;
    let ty = ty.parse().ok()?;
    if id.is_empty() {
        return None;
    }
    Some((ty, id))
}

/// An entity as stored, with its current version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedEntity {
    pub entity: Entity,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Upsert,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Upsert => "upsert",
            Operation::Delete => "delete",
        }
    }
}

impl FromStr for Operation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "upsert" => Ok(Operation::Upsert),
            "delete" => Ok(Operation::Delete),
            other => bail!("unknown change operation: '{}'", other),
        }
    }
}

/// One mutation of the canonical store.
///
/// `sequence` is the store-wide feed position; `version` is the per-entity
/// version the mutation produced. Upserts carry the full entity snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub sequence: u64,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub operation: Operation,
    pub version: u64,
    pub payload: Option<Entity>,
    pub recorded_at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn doc_id(&self) -> String {
        doc_id(self.entity_type, &self.entity_id)
    }
}

/// Denormalized search-index projection of an artist or studio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub doc_id: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub version: u64,
    pub title: String,
    pub body: String,
    pub url: String,
    pub city: Option<String>,
    pub styles: Vec<String>,
    /// `"{city}|{style}"` for every style, used for filtered lookups.
    pub style_keys: Vec<String>,
    /// `"{entity_type}|{city}"`.
    pub group_key: String,
    /// `"{city}|{primary style}|{title}"`, lowercased.
    pub sort_key: String,
    pub artist_ids: Vec<String>,
    pub studio_id: Option<String>,
    pub delisted: bool,
}

/// Drift categories found by reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftClass {
    MissingInIndex,
    StaleInIndex,
    MissingInStore,
    OrphanInIndex,
}

impl DriftClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriftClass::MissingInIndex => "missing_in_index",
            DriftClass::StaleInIndex => "stale_in_index",
            DriftClass::MissingInStore => "missing_in_store",
            DriftClass::OrphanInIndex => "orphan_in_index",
        }
    }
}

impl fmt::Display for DriftClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftRecord {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub store_version: Option<u64>,
    pub index_version: Option<u64>,
    pub classification: DriftClass,
}

/// A change event that exhausted its retries during forward sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub dead_letter_id: String,
    pub event: ChangeEvent,
    pub error: String,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Pipeline stage an item failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Discovery,
    Extraction,
    Scrape,
    Ingestion,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Discovery => "discovery",
            Stage::Extraction => "extraction",
            Stage::Scrape => "scrape",
            Stage::Ingestion => "ingestion",
        }
    }
}

/// One failed item in a run summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub stage: Stage,
    pub item_id: String,
    pub reason: String,
    pub kind: ErrorKind,
}

/// Reason recorded for work the run deadline cut off.
pub const CANCELLED: &str = "cancelled: run deadline reached";

impl ItemFailure {
    /// An item left unfinished because the run deadline passed.
    pub fn cancelled(stage: Stage, item_id: impl Into<String>) -> Self {
        Self {
            stage,
            item_id: item_id.into(),
            reason: CANCELLED.to_string(),
            kind: ErrorKind::TransientNetwork,
        }
    }
}

/// Stable shard assignment for an entity id.
///
/// Events for one entity always land on the same shard, which is what keeps
/// per-entity ordering intact when forward sync runs shards in parallel.
pub fn shard_for(entity_id: &str, shards: u32) -> u32 {
    if shards <= 1 {
        return 0;
    }
    let digest = Sha256::digest(entity_id.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_le_bytes(prefix) % shards as u64) as u32
}
