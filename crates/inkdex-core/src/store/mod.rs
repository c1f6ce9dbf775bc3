//! Storage abstractions for the canonical store and the search index.
//!
//! The pipeline and the sync engine are written against these traits only;
//! the application crate provides SQLite implementations and [`memory`]
//! provides in-memory ones for tests.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{ChangeEvent, DeadLetter, Entity, EntityType, IndexDocument, VersionedEntity};

/// The single source of truth for artist and studio records.
///
/// Every successful mutation bumps the entity's version and appends exactly
/// one [`ChangeEvent`] to the change feed, atomically with the write.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](CanonicalStore::upsert) | Whole-record replace, returns the new version |
/// | [`get`](CanonicalStore::get) | Current record and version |
/// | [`delete`](CanonicalStore::delete) | Explicit takedown, emits a delete event |
/// | [`stream_changes`](CanonicalStore::stream_changes) | Feed events after a sequence |
/// | [`head_sequence`](CanonicalStore::head_sequence) | Latest feed sequence |
/// | [`scan`](CanonicalStore::scan) | All live records, for reconciliation |
#[async_trait]
pub trait CanonicalStore: Send + Sync {
    /// Insert or fully replace an entity. Returns the version written.
    async fn upsert(&self, entity: &Entity) -> Result<u64>;

    async fn get(&self, entity_type: EntityType, entity_id: &str)
        -> Result<Option<VersionedEntity>>;

    /// Remove an entity. Returns the delete's version, or `None` if absent.
    async fn delete(&self, entity_type: EntityType, entity_id: &str) -> Result<Option<u64>>;

    /// Change events with `sequence > from_sequence`, in sequence order.
    async fn stream_changes(&self, from_sequence: u64, limit: usize) -> Result<Vec<ChangeEvent>>;

    /// Sequence of the newest change event, `0` when the feed is empty.
    async fn head_sequence(&self) -> Result<u64>;

    /// All live entities, optionally restricted to one type.
    async fn scan(&self, entity_type: Option<EntityType>) -> Result<Vec<VersionedEntity>>;
}

/// Durable forward-sync state: per-shard feed offsets and dead letters.
#[async_trait]
pub trait SyncStateStore: Send + Sync {
    /// Saved `shard → last applied sequence` offsets.
    async fn load_offsets(&self) -> Result<BTreeMap<u32, u64>>;

    async fn save_offset(&self, shard: u32, sequence: u64) -> Result<()>;

    /// Insert or replace a dead letter by id.
    async fn put_dead_letter(&self, dead_letter: &DeadLetter) -> Result<()>;

    async fn get_dead_letter(&self, dead_letter_id: &str) -> Result<Option<DeadLetter>>;

    async fn list_dead_letters(&self) -> Result<Vec<DeadLetter>>;

    async fn remove_dead_letter(&self, dead_letter_id: &str) -> Result<bool>;
}

/// How an index write compares against the version already held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Apply only if strictly newer. Forward sync uses this, which makes
    /// redelivery of an applied event a no-op.
    IfNewer,
    /// Apply if newer or equal. Reconciliation uses this to rewrite a
    /// same-version document whose content drifted; it still never regresses.
    IfNotOlder,
}

impl WriteMode {
    pub fn accepts(&self, incoming: u64, current: Option<u64>) -> bool {
        match (self, current) {
            (_, None) => true,
            (WriteMode::IfNewer, Some(c)) => incoming > c,
            (WriteMode::IfNotOlder, Some(c)) => incoming >= c,
        }
    }
}

/// Result of a version-checked index write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// The index already holds this or a newer version. Not an error.
    Stale,
    /// Delete of a document the index does not hold. Not an error.
    NotFound,
}

/// Filter for [`SearchIndex::find`]. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct DocumentFilter {
    pub entity_type: Option<EntityType>,
    pub city: Option<String>,
    pub style: Option<String>,
    pub include_delisted: bool,
    pub limit: Option<usize>,
}

impl DocumentFilter {
    pub fn matches(&self, doc: &IndexDocument) -> bool {
        if !self.include_delisted && doc.delisted {
            return false;
        }
        if let Some(ty) = self.entity_type {
            if doc.entity_type != ty {
                return false;
            }
        }
        let city_key = crate::project::city_key(self.city.as_deref());
        match (&self.city, &self.style) {
            (Some(_), Some(style)) => doc.style_keys.contains(&format!("{}|{}", city_key, style)),
            (Some(_), None) => doc.group_key.ends_with(&format!("|{}", city_key)),
            (None, Some(style)) => doc.styles.iter().any(|s| s == style),
            (None, None) => true,
        }
    }
}

/// Secondary, denormalized index kept eventually consistent with the store.
///
/// Every write is version-checked against the highest version the index has
/// seen for the document, including versions of deleted documents (kept as
/// tombstones), so late or duplicate deliveries can never regress it.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn upsert_document(&self, doc: &IndexDocument, mode: WriteMode) -> Result<WriteOutcome>;

    /// Delete a document as of `version`. A live document newer than
    /// `version` is left alone ([`WriteOutcome::Stale`]).
    async fn delete_document(&self, doc_id: &str, version: u64) -> Result<WriteOutcome>;

    async fn get_document(&self, doc_id: &str) -> Result<Option<IndexDocument>>;

    /// All live documents.
    async fn scan(&self) -> Result<Vec<IndexDocument>>;

    /// Index-side curation: set the `delisted` flag without a version bump.
    /// Returns `false` when the document does not exist.
    async fn set_delisted(&self, doc_id: &str, delisted: bool) -> Result<bool>;

    /// Live documents matching `filter`, ordered by `sort_key`.
    async fn find(&self, filter: &DocumentFilter) -> Result<Vec<IndexDocument>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_mode_never_accepts_older_versions() {
        assert!(WriteMode::IfNewer.accepts(1, None));
        assert!(WriteMode::IfNewer.accepts(3, Some(2)));
        assert!(!WriteMode::IfNewer.accepts(2, Some(2)));
        assert!(!WriteMode::IfNewer.accepts(1, Some(2)));
        assert!(WriteMode::IfNotOlder.accepts(2, Some(2)));
        assert!(!WriteMode::IfNotOlder.accepts(1, Some(2)));
    }
}
