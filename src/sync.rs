//! Forward sync: canonical change feed → search index.
//!
//! ```text
//! change feed ──▶ batch (from min shard offset) ──┬─▶ shard 0: apply in feed order ──▶ offset[0]
//!                                                 ├─▶ shard 1: apply in feed order ──▶ offset[1]
//!                                                 └─▶ shard N: ...
//! ```
//!
//! Events are partitioned by a stable hash of the entity id, so all events
//! for one entity are applied by one shard in feed order while shards run
//! in parallel. Each shard remembers the last sequence it applied; the
//! offset is saved after every event, so a restarted sync resumes where it
//! stopped and redelivers at most the event that was in flight.
//!
//! Index writes are version-checked ([`WriteMode::IfNewer`]): a redelivered
//! or out-of-order event older than what the index holds is a no-op, not an
//! error. An event that still fails after `sync.max_attempts` tries goes to
//! the dead-letter store and the shard moves on.
//!
//! A studio upsert also rewrites the documents of the artists it lists,
//! since an artist document carries its studio's city and may have been
//! projected before the studio reached the store.
//!
//! If `sync.shards` changes between runs, every shard resumes from the
//! lowest saved offset. Events in between are redelivered and dropped by the
//! version check.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::Utc;
use inkdex_core::error::PipelineError;
use inkdex_core::models::{
    shard_for, ChangeEvent, DeadLetter, Entity, EntityType, IndexDocument, Operation,
};
use inkdex_core::project::{project, ProjectionContext};
use inkdex_core::store::{CanonicalStore, SearchIndex, SyncStateStore, WriteMode, WriteOutcome};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{Config, SyncConfig};
use crate::db;
use crate::retry::RetryPolicy;
use crate::sqlite_store::{SqliteIndex, SqliteStore};

/// Counters for one or more sync passes.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub events_read: usize,
    pub applied: usize,
    /// Events the index already had at this or a newer version.
    pub stale: usize,
    pub dead_lettered: usize,
    /// Feed head when the pass finished.
    pub head: u64,
}

impl SyncReport {
    fn absorb(&mut self, other: &SyncReport) {
        self.events_read += other.events_read;
        self.applied += other.applied;
        self.stale += other.stale;
        self.dead_lettered += other.dead_lettered;
        self.head = self.head.max(other.head);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ReplayOutcome {
    /// The event went through (or was already superseded); the dead letter is gone.
    Resolved { applied: bool },
    /// Still failing; the dead letter was updated with the new error.
    StillFailing { attempts: u32, error: String },
}

fn index_error(err: anyhow::Error) -> PipelineError {
    PipelineError::TransientNetwork(format!("index write failed: {:#}", err))
}

fn store_error(err: anyhow::Error) -> PipelineError {
    PipelineError::TransientNetwork(format!("store read failed: {:#}", err))
}

/// Project `entity` at `version`, looking up the context an artist
/// document needs (its studio's city) in `store`.
pub async fn project_entity(
    store: &dyn CanonicalStore,
    entity: &Entity,
    version: u64,
) -> Result<IndexDocument> {
    let mut ctx = ProjectionContext::default();
    if let Entity::Artist(artist) = entity {
        if let Some(studio) = store.get(EntityType::Studio, &artist.source_studio_id).await? {
            if let Entity::Studio(s) = studio.entity {
                ctx.studio_city = s.address.and_then(|a| a.city);
            }
        }
    }
    Ok(project(entity, version, &ctx))
}

pub struct SyncEngine {
    store: Arc<dyn CanonicalStore>,
    state: Arc<dyn SyncStateStore>,
    index: Arc<dyn SearchIndex>,
    shards: u32,
    batch_size: usize,
    retry: RetryPolicy,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn CanonicalStore>,
        state: Arc<dyn SyncStateStore>,
        index: Arc<dyn SearchIndex>,
        config: &SyncConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            state,
            index,
            shards: config.shards.max(1),
            batch_size: config.batch_size.max(1),
            retry: retry.with_max_attempts(config.max_attempts),
        }
    }

    /// Apply one change event to the index.
    pub async fn apply_event(&self, event: &ChangeEvent) -> Result<WriteOutcome, PipelineError> {
        match event.operation {
            Operation::Upsert => {
                let entity = event.payload.as_ref().ok_or_else(|| {
                    PipelineError::Validation(format!(
                        "upsert event {} for {} has no payload",
                        event.sequence,
                        event.doc_id()
                    ))
                })?;
                let doc = project_entity(self.store.as_ref(), entity, event.version)
                    .await
                    .map_err(store_error)?;
                let outcome = self
                    .index
                    .upsert_document(&doc, WriteMode::IfNewer)
                    .await
                    .map_err(index_error)?;
                if let Entity::Studio(studio) = entity {
                    self.reproject_artists(&studio.studio_id, &studio.artist_ids).await?;
                }
                Ok(outcome)
            }
            Operation::Delete => self
                .index
                .delete_document(&event.doc_id(), event.version)
                .await
                .map_err(index_error),
        }
    }

    /// Rewrite the documents of a studio's artists so they pick up the
    /// studio's current city. Runs on every studio upsert, including
    /// redeliveries, and leaves newer or unchanged documents alone.
    async fn reproject_artists(&self, studio_id: &str, artist_ids: &[String]) -> Result<(), PipelineError> {
        for artist_id in artist_ids {
            let Some(current) = self
                .store
                .get(EntityType::Artist, artist_id)
                .await
                .map_err(store_error)?
            else {
                continue;
            };
            match &current.entity {
                Entity::Artist(a) if a.source_studio_id == studio_id => {}
                _ => continue,
            }
            let mut doc = project_entity(self.store.as_ref(), &current.entity, current.version)
                .await
                .map_err(store_error)?;
            let existing = self.index.get_document(&doc.doc_id).await.map_err(index_error)?;
            if let Some(existing) = existing {
                if existing.version > doc.version {
                    continue;
                }
                if existing.version == doc.version {
                    doc.delisted |= existing.delisted;
                    if existing == doc {
                        continue;
                    }
                }
            }
            let outcome = self
                .index
                .upsert_document(&doc, WriteMode::IfNotOlder)
                .await
                .map_err(index_error)?;
            debug!(studio_id, artist_id = %artist_id, ?outcome, "artist reprojected");
        }
        Ok(())
    }

    /// Per-shard start offsets for the configured shard count, plus saved
    /// shards beyond that count (left over from a larger layout).
    async fn start_offsets(&self) -> Result<(Vec<u64>, Vec<u32>)> {
        let saved = self.state.load_offsets().await?;
        let retired: Vec<u32> = saved.keys().copied().filter(|s| *s >= self.shards).collect();
        let complete = retired.is_empty() && (0..self.shards).all(|s| saved.contains_key(&s));
        let floor = saved.values().copied().min().unwrap_or(0);
        let offsets = (0..self.shards)
            .map(|shard| {
                if complete {
                    saved.get(&shard).copied().unwrap_or(0)
                } else {
                    floor
                }
            })
            .collect();
        Ok((offsets, retired))
    }

    /// Current saved offsets, keyed by shard.
    pub async fn offsets(&self) -> Result<BTreeMap<u32, u64>> {
        self.state.load_offsets().await
    }

    /// Drain the feed up to its current head.
    pub async fn sync_once(&self) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        loop {
            let (offsets, retired) = self.start_offsets().await?;
            let from = offsets.iter().copied().min().unwrap_or(0);
            let batch = self.store.stream_changes(from, self.batch_size).await?;
            let Some(batch_end) = batch.last().map(|e| e.sequence) else {
                break;
            };

            let mut per_shard: Vec<Vec<&ChangeEvent>> = vec![Vec::new(); self.shards as usize];
            for event in &batch {
                let shard = shard_for(&event.entity_id, self.shards) as usize;
                if event.sequence > offsets[shard] {
                    per_shard[shard].push(event);
                }
            }

            let shard_reports = futures::future::try_join_all(
                per_shard
                    .iter()
                    .enumerate()
                    .map(|(shard, events)| self.sync_shard(shard as u32, events, offsets[shard], batch_end)),
            )
            .await?;
            for r in &shard_reports {
                report.absorb(r);
            }
            for shard in retired {
                self.state.save_offset(shard, batch_end).await?;
            }
            report.events_read += batch.len();
            debug!(from, to = batch_end, events = batch.len(), "sync batch applied");

            if batch.len() < self.batch_size {
                break;
            }
        }
        report.head = self.store.head_sequence().await?;
        if report.events_read > 0 {
            info!(
                events = report.events_read,
                applied = report.applied,
                stale = report.stale,
                dead_lettered = report.dead_lettered,
                head = report.head,
                "sync pass finished"
            );
        }
        Ok(report)
    }

    async fn sync_shard(
        &self,
        shard: u32,
        events: &[&ChangeEvent],
        offset: u64,
        batch_end: u64,
    ) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        for event in events {
            let (result, attempts) = self.retry.run("sync", |_| self.apply_event(event)).await;
            match result {
                Ok(WriteOutcome::Applied) => report.applied += 1,
                Ok(outcome) => {
                    debug!(doc_id = %event.doc_id(), version = event.version, ?outcome, "event superseded");
                    report.stale += 1;
                }
                Err(err) => {
                    warn!(
                        shard,
                        sequence = event.sequence,
                        doc_id = %event.doc_id(),
                        attempts,
                        error = %err,
                        "event dead-lettered"
                    );
                    let now = Utc::now();
                    self.state
                        .put_dead_letter(&DeadLetter {
                            dead_letter_id: uuid::Uuid::new_v4().to_string(),
                            event: (*event).clone(),
                            error: err.to_string(),
                            attempts,
                            created_at: now,
                            updated_at: now,
                        })
                        .await?;
                    report.dead_lettered += 1;
                }
            }
            self.state.save_offset(shard, event.sequence).await?;
        }
        if batch_end > offset {
            self.state.save_offset(shard, batch_end).await?;
        }
        Ok(report)
    }

    /// Keep syncing every `poll_interval` until `shutdown` resolves.
    pub async fn follow<F>(&self, poll_interval: Duration, shutdown: F) -> Result<SyncReport>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut total = SyncReport::default();
        loop {
            match self.sync_once().await {
                Ok(pass) => total.absorb(&pass),
                Err(e) => warn!(error = %format!("{:#}", e), "sync pass failed; retrying next poll"),
            }
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
        info!(applied = total.applied, dead_lettered = total.dead_lettered, "follow stopped");
        Ok(total)
    }

    pub async fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        self.state.list_dead_letters().await
    }

    /// Re-apply a dead-lettered event. Safe at any time: the version check
    /// drops it if the index has moved past it.
    pub async fn replay_dead_letter(&self, dead_letter_id: &str) -> Result<ReplayOutcome> {
        let Some(mut dead) = self.state.get_dead_letter(dead_letter_id).await? else {
            bail!("dead letter not found: {}", dead_letter_id);
        };
        let (result, attempts) = self
            .retry
            .run("replay", |_| self.apply_event(&dead.event))
            .await;
        match result {
            Ok(outcome) => {
                self.state.remove_dead_letter(dead_letter_id).await?;
                info!(dead_letter_id, ?outcome, "dead letter replayed");
                Ok(ReplayOutcome::Resolved {
                    applied: outcome == WriteOutcome::Applied,
                })
            }
            Err(err) => {
                dead.attempts += attempts;
                dead.error = err.to_string();
                dead.updated_at = Utc::now();
                self.state.put_dead_letter(&dead).await?;
                Ok(ReplayOutcome::StillFailing {
                    attempts: dead.attempts,
                    error: dead.error,
                })
            }
        }
    }
}

fn engine_for(config: &Config, store: Arc<SqliteStore>, index: Arc<SqliteIndex>) -> SyncEngine {
    SyncEngine::new(
        store.clone(),
        store,
        index,
        &config.sync,
        RetryPolicy::from_config(&config.retry),
    )
}

/// CLI entry point for `inkdex sync [--follow]`. Prints the report as JSON.
pub async fn run_sync(config: &Config, follow: bool) -> Result<()> {
    let store = Arc::new(db::open_store(config).await?);
    let index = Arc::new(db::open_index(config).await?);
    let engine = engine_for(config, store.clone(), index.clone());

    let report = if follow {
        info!(poll_ms = config.sync.poll_interval_ms, "following change feed; Ctrl-C to stop");
        engine
            .follow(Duration::from_millis(config.sync.poll_interval_ms), async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await
    } else {
        engine.sync_once().await
    };
    store.pool().close().await;
    index.pool().close().await;

    println!("{}", serde_json::to_string_pretty(&report?)?);
    Ok(())
}

pub async fn run_dead_letters_list(config: &Config) -> Result<()> {
    let store = db::open_store(config).await?;
    let dead = store.list_dead_letters().await;
    store.pool().close().await;
    let dead = dead?;

    if dead.is_empty() {
        println!("No dead letters.");
        return Ok(());
    }
    for d in &dead {
        println!(
            "{}  seq={}  {} {} v{}  attempts={}",
            d.dead_letter_id,
            d.event.sequence,
            d.event.operation.as_str(),
            d.event.doc_id(),
            d.event.version,
            d.attempts
        );
        println!("    error: {}", d.error);
    }
    Ok(())
}

pub async fn run_dead_letters_replay(config: &Config, dead_letter_id: &str) -> Result<()> {
    let store = Arc::new(db::open_store(config).await?);
    let index = Arc::new(db::open_index(config).await?);
    let outcome = engine_for(config, store.clone(), index.clone())
        .replay_dead_letter(dead_letter_id)
        .await;
    store.pool().close().await;
    index.pool().close().await;

    println!("{}", serde_json::to_string_pretty(&outcome?)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use inkdex_core::models::{doc_id, Address, ArtistRecord, ScrapeStatus, StudioRecord};
    use inkdex_core::store::memory::{InMemoryIndex, InMemoryStore};
    use inkdex_core::store::DocumentFilter;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn artist(id: &str, name: &str) -> Entity {
        Entity::Artist(ArtistRecord {
            artist_id: id.into(),
            display_name: name.into(),
            bio: "blackwork".into(),
            portfolio_url: format!("https://instagram.com/{}", id),
            handle: Some(id.into()),
            images: vec![],
            source_studio_id: "s1".into(),
            styles: vec!["blackwork".into()],
            last_scraped_at: Utc::now(),
            scrape_status: ScrapeStatus::Partial,
            delisted: false,
        })
    }

    fn studio() -> Entity {
        Entity::Studio(StudioRecord {
            studio_id: "s1".into(),
            display_name: "Black Anchor".into(),
            website_url: "https://blackanchor.example".into(),
            address: Some(Address {
                city: Some("Austin".into()),
                ..Default::default()
            }),
            artist_ids: vec!["a1".into()],
            delisted: false,
        })
    }

    fn event(sequence: u64, version: u64, entity: Entity) -> ChangeEvent {
        ChangeEvent {
            sequence,
            entity_type: entity.entity_type(),
            entity_id: entity.id().to_string(),
            operation: Operation::Upsert,
            version,
            payload: Some(entity),
            recorded_at: Utc::now(),
        }
    }

    fn config(shards: u32) -> SyncConfig {
        SyncConfig {
            shards,
            batch_size: 2,
            poll_interval_ms: 10,
            max_attempts: 2,
        }
    }

    fn build(
        store: Arc<InMemoryStore>,
        index: Arc<dyn SearchIndex>,
        shards: u32,
    ) -> SyncEngine {
        SyncEngine::new(store.clone(), store, index, &config(shards), RetryPolicy::immediate(3))
    }

    #[tokio::test]
    async fn out_of_order_delivery_converges_to_newest() {
        let store = Arc::new(InMemoryStore::new());
        let index = Arc::new(InMemoryIndex::new());
        let engine = build(store, index.clone(), 1);

        let v1 = event(1, 1, artist("a1", "One"));
        let v2 = event(2, 2, artist("a1", "Two"));
        let v3 = event(3, 3, artist("a1", "Three"));

        assert_eq!(engine.apply_event(&v1).await.unwrap(), WriteOutcome::Applied);
        assert_eq!(engine.apply_event(&v3).await.unwrap(), WriteOutcome::Applied);
        assert_eq!(engine.apply_event(&v2).await.unwrap(), WriteOutcome::Stale);
        assert_eq!(engine.apply_event(&v3).await.unwrap(), WriteOutcome::Stale);

        let doc = index.get_document("artist:a1").await.unwrap().unwrap();
        assert_eq!(doc.version, 3);
        assert_eq!(doc.title, "Three");
    }

    #[tokio::test]
    async fn delete_of_absent_document_is_a_noop() {
        let store = Arc::new(InMemoryStore::new());
        let index = Arc::new(InMemoryIndex::new());
        let engine = build(store, index.clone(), 1);
        let delete = ChangeEvent {
            sequence: 1,
            entity_type: EntityType::Artist,
            entity_id: "ghost".into(),
            operation: Operation::Delete,
            version: 4,
            payload: None,
            recorded_at: Utc::now(),
        };
        assert_eq!(engine.apply_event(&delete).await.unwrap(), WriteOutcome::NotFound);

        // The tombstone keeps a late upsert from resurrecting it.
        let late = event(2, 3, artist("ghost", "Late"));
        assert_eq!(engine.apply_event(&late).await.unwrap(), WriteOutcome::Stale);
        assert!(index.get_document("artist:ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sync_once_drains_feed_and_saves_offsets() {
        let store = Arc::new(InMemoryStore::new());
        let index = Arc::new(InMemoryIndex::new());
        store.upsert(&studio()).await.unwrap();
        store.upsert(&artist("a1", "Mara")).await.unwrap();
        store.upsert(&artist("a2", "Sol")).await.unwrap();
        store.upsert(&artist("a1", "Mara O.")).await.unwrap();
        store.delete(EntityType::Artist, "a2").await.unwrap();

        let engine = build(store.clone(), index.clone(), 3);
        let report = engine.sync_once().await.unwrap();
        assert_eq!(report.events_read, 5);
        assert_eq!(report.dead_lettered, 0);
        assert_eq!(report.head, 5);

        let a1 = index.get_document(&doc_id(EntityType::Artist, "a1")).await.unwrap().unwrap();
        assert_eq!(a1.version, 2);
        assert_eq!(a1.title, "Mara O.");
        assert_eq!(a1.city.as_deref(), Some("Austin"));
        assert!(index.get_document("artist:a2").await.unwrap().is_none());

        let offsets = engine.offsets().await.unwrap();
        assert_eq!(offsets.len(), 3);
        assert!(offsets.values().all(|o| *o == 5));

        // Nothing new: a second pass reads nothing.
        let again = engine.sync_once().await.unwrap();
        assert_eq!(again.events_read, 0);
    }

    #[tokio::test]
    async fn studio_arriving_after_its_artist_fills_in_the_city() {
        let store = Arc::new(InMemoryStore::new());
        let index = Arc::new(InMemoryIndex::new());
        let engine = build(store.clone(), index.clone(), 2);

        store.upsert(&artist("a1", "Mara")).await.unwrap();
        engine.sync_once().await.unwrap();
        let before = index.get_document("artist:a1").await.unwrap().unwrap();
        assert_eq!(before.city, None);

        store.upsert(&studio()).await.unwrap();
        engine.sync_once().await.unwrap();

        let after = index.get_document("artist:a1").await.unwrap().unwrap();
        assert_eq!(after.version, 1);
        assert_eq!(after.city.as_deref(), Some("Austin"));
        let found = index
            .find(&DocumentFilter {
                entity_type: Some(EntityType::Artist),
                city: Some("Austin".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].entity_id, "a1");

        // A redelivered studio event leaves the rewritten document as is.
        let redelivered = event(2, 1, studio());
        assert_eq!(engine.apply_event(&redelivered).await.unwrap(), WriteOutcome::Stale);
        assert_eq!(index.get_document("artist:a1").await.unwrap().unwrap(), after);
    }

    #[tokio::test]
    async fn shard_count_change_resumes_from_lowest_offset() {
        let store = Arc::new(InMemoryStore::new());
        let index = Arc::new(InMemoryIndex::new());
        store.upsert(&artist("a1", "Mara")).await.unwrap();
        store.upsert(&artist("a2", "Sol")).await.unwrap();
        build(store.clone(), index.clone(), 2).sync_once().await.unwrap();

        store.upsert(&artist("a3", "Kai")).await.unwrap();
        let resized = build(store.clone(), index.clone(), 4);
        let report = resized.sync_once().await.unwrap();
        assert_eq!(report.events_read, 1);
        assert_eq!(report.applied, 1);
        assert_eq!(
            index.find(&DocumentFilter::default()).await.unwrap().len(),
            3
        );
    }

    /// Index whose writes fail while `failing` is set.
    struct FlakyIndex {
        inner: InMemoryIndex,
        failing: AtomicBool,
    }

    #[async_trait]
    impl SearchIndex for FlakyIndex {
        async fn upsert_document(&self, doc: &IndexDocument, mode: WriteMode) -> Result<WriteOutcome> {
            if self.failing.load(Ordering::SeqCst) {
                bail!("index unavailable");
            }
            self.inner.upsert_document(doc, mode).await
        }
        async fn delete_document(&self, doc_id: &str, version: u64) -> Result<WriteOutcome> {
            self.inner.delete_document(doc_id, version).await
        }
        async fn get_document(&self, doc_id: &str) -> Result<Option<IndexDocument>> {
            self.inner.get_document(doc_id).await
        }
        async fn scan(&self) -> Result<Vec<IndexDocument>> {
            self.inner.scan().await
        }
        async fn set_delisted(&self, doc_id: &str, delisted: bool) -> Result<bool> {
            self.inner.set_delisted(doc_id, delisted).await
        }
        async fn find(&self, filter: &DocumentFilter) -> Result<Vec<IndexDocument>> {
            self.inner.find(filter).await
        }
    }

    #[tokio::test]
    async fn exhausted_event_is_dead_lettered_then_replayed() {
        let store = Arc::new(InMemoryStore::new());
        let index = Arc::new(FlakyIndex {
            inner: InMemoryIndex::new(),
            failing: AtomicBool::new(true),
        });
        store.upsert(&artist("a1", "Mara")).await.unwrap();

        let engine = build(store.clone(), index.clone(), 1);
        let report = engine.sync_once().await.unwrap();
        assert_eq!(report.dead_lettered, 1);
        assert_eq!(engine.offsets().await.unwrap().get(&0), Some(&1));

        let dead = engine.dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempts, 2);
        assert!(dead[0].error.contains("index unavailable"));

        let still = engine.replay_dead_letter(&dead[0].dead_letter_id).await.unwrap();
        assert!(matches!(still, ReplayOutcome::StillFailing { attempts: 4, .. }));

        index.failing.store(false, Ordering::SeqCst);
        let replayed = engine.replay_dead_letter(&dead[0].dead_letter_id).await.unwrap();
        assert_eq!(replayed, ReplayOutcome::Resolved { applied: true });
        assert!(engine.dead_letters().await.unwrap().is_empty());
        assert!(index.get_document("artist:a1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn replay_of_unknown_dead_letter_errors() {
        let store = Arc::new(InMemoryStore::new());
        let engine = build(store, Arc::new(InMemoryIndex::new()), 1);
        assert!(engine.replay_dead_letter("nope").await.is_err());
    }

    #[tokio::test]
    async fn follow_stops_on_shutdown() {
        let store = Arc::new(InMemoryStore::new());
        let index = Arc::new(InMemoryIndex::new());
        store.upsert(&artist("a1", "Mara")).await.unwrap();
        let engine = build(store, index.clone(), 2);
        let report = engine
            .follow(Duration::from_millis(5), tokio::time::sleep(Duration::from_millis(30)))
            .await
            .unwrap();
        assert_eq!(report.applied, 1);
        assert!(index.get_document("artist:a1").await.unwrap().is_some());
    }
}
