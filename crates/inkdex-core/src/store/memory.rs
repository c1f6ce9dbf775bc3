//! In-memory [`CanonicalStore`], [`SyncStateStore`], and [`SearchIndex`]
//! implementations for testing and embedding.
//!
//! Uses `HashMap`/`BTreeMap` and `Vec` behind `std::sync::RwLock`. Each
//! store mutation takes a single write lock over records and feed together,
//! so the version bump and its change event are atomic.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;

use crate::models::{
    ChangeEvent, DeadLetter, Entity, EntityType, IndexDocument, Operation, VersionedEntity,
};

use super::{CanonicalStore, DocumentFilter, SearchIndex, SyncStateStore, WriteMode, WriteOutcome};

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

#[derive(Default)]
struct StoreState {
    records: HashMap<(EntityType, String), VersionedEntity>,
    /// Last version per entity, surviving deletes so a re-created entity
    /// continues from where it left off.
    versions: HashMap<(EntityType, String), u64>,
    feed: Vec<ChangeEvent>,
}

impl StoreState {
    fn next_version(&mut self, key: &(EntityType, String)) -> u64 {
        let v = self.versions.get(key).copied().unwrap_or(0) + 1;
        self.versions.insert(key.clone(), v);
        v
    }

    fn append(
        &mut self,
        key: &(EntityType, String),
        operation: Operation,
        version: u64,
        payload: Option<Entity>,
    ) {
        let sequence = self.feed.len() as u64 + 1;
        self.feed.push(ChangeEvent {
            sequence,
            entity_type: key.0,
            entity_id: key.1.clone(),
            operation,
            version,
            payload,
            recorded_at: Utc::now(),
        });
    }
}

/// In-memory canonical store with its change feed and sync state.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<StoreState>,
    offsets: RwLock<BTreeMap<u32, u64>>,
    dead_letters: RwLock<BTreeMap<String, DeadLetter>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CanonicalStore for InMemoryStore {
    async fn upsert(&self, entity: &Entity) -> Result<u64> {
        let key = (entity.entity_type(), entity.id().to_string());
        let mut state = write(&self.state)?;
        let version = state.next_version(&key);
        state.records.insert(
            key.clone(),
            VersionedEntity {
                entity: entity.clone(),
                version,
                updated_at: Utc::now(),
            },
        );
        state.append(&key, Operation::Upsert, version, Some(entity.clone()));
        Ok(version)
    }

    async fn get(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Option<VersionedEntity>> {
        let state = read(&self.state)?;
        Ok(state
            .records
            .get(&(entity_type, entity_id.to_string()))
            .cloned())
    }

    async fn delete(&self, entity_type: EntityType, entity_id: &str) -> Result<Option<u64>> {
        let key = (entity_type, entity_id.to_string());
        let mut state = write(&self.state)?;
        if state.records.remove(&key).is_none() {
            return Ok(None);
        }
        let version = state.next_version(&key);
        state.append(&key, Operation::Delete, version, None);
        Ok(Some(version))
    }

    async fn stream_changes(&self, from_sequence: u64, limit: usize) -> Result<Vec<ChangeEvent>> {
        let state = read(&self.state)?;
        Ok(state
            .feed
            .iter()
            .filter(|e| e.sequence > from_sequence)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn head_sequence(&self) -> Result<u64> {
        Ok(read(&self.state)?.feed.len() as u64)
    }

    async fn scan(&self, entity_type: Option<EntityType>) -> Result<Vec<VersionedEntity>> {
        let state = read(&self.state)?;
        let mut out: Vec<VersionedEntity> = state
            .records
            .iter()
            .filter(|((ty, _), _)| entity_type.map_or(true, |want| *ty == want))
            .map(|(_, v)| v.clone())
            .collect();
        out.sort_by(|a, b| {
            (a.entity.entity_type(), a.entity.id()).cmp(&(b.entity.entity_type(), b.entity.id()))
        });
        Ok(out)
    }
}

#[async_trait]
impl SyncStateStore for InMemoryStore {
    async fn load_offsets(&self) -> Result<BTreeMap<u32, u64>> {
        Ok(read(&self.offsets)?.clone())
    }

    async fn save_offset(&self, shard: u32, sequence: u64) -> Result<()> {
        write(&self.offsets)?.insert(shard, sequence);
        Ok(())
    }

    async fn put_dead_letter(&self, dead_letter: &DeadLetter) -> Result<()> {
        write(&self.dead_letters)?.insert(dead_letter.dead_letter_id.clone(), dead_letter.clone());
        Ok(())
    }

    async fn get_dead_letter(&self, dead_letter_id: &str) -> Result<Option<DeadLetter>> {
        Ok(read(&self.dead_letters)?.get(dead_letter_id).cloned())
    }

    async fn list_dead_letters(&self) -> Result<Vec<DeadLetter>> {
        let mut out: Vec<DeadLetter> = read(&self.dead_letters)?.values().cloned().collect();
        out.sort_by_key(|d| d.event.sequence);
        Ok(out)
    }

    async fn remove_dead_letter(&self, dead_letter_id: &str) -> Result<bool> {
        Ok(write(&self.dead_letters)?.remove(dead_letter_id).is_some())
    }
}

#[derive(Default)]
struct IndexState {
    docs: HashMap<String, IndexDocument>,
    tombstones: HashMap<String, u64>,
}

impl IndexState {
    /// Highest version seen for a document, live or deleted.
    fn seen_version(&self, doc_id: &str) -> Option<u64> {
        let live = self.docs.get(doc_id).map(|d| d.version);
        let dead = self.tombstones.get(doc_id).copied();
        live.max(dead)
    }
}

/// In-memory search index with version tombstones.
#[derive(Default)]
pub struct InMemoryIndex {
    state: RwLock<IndexState>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a document unconditionally. Simulates out-of-band index
    /// corruption or manual edits in tests.
    pub fn force_put(&self, doc: IndexDocument) -> Result<()> {
        let mut state = write(&self.state)?;
        state.tombstones.remove(&doc.doc_id);
        state.docs.insert(doc.doc_id.clone(), doc);
        Ok(())
    }

    /// Drop a document and its tombstone unconditionally.
    pub fn force_remove(&self, doc_id: &str) -> Result<()> {
        let mut state = write(&self.state)?;
        state.docs.remove(doc_id);
        state.tombstones.remove(doc_id);
        Ok(())
    }
}

#[async_trait]
impl SearchIndex for InMemoryIndex {
    async fn upsert_document(&self, doc: &IndexDocument, mode: WriteMode) -> Result<WriteOutcome> {
        let mut state = write(&self.state)?;
        if !mode.accepts(doc.version, state.seen_version(&doc.doc_id)) {
            return Ok(WriteOutcome::Stale);
        }
        state.tombstones.remove(&doc.doc_id);
        state.docs.insert(doc.doc_id.clone(), doc.clone());
        Ok(WriteOutcome::Applied)
    }

    async fn delete_document(&self, doc_id: &str, version: u64) -> Result<WriteOutcome> {
        let mut state = write(&self.state)?;
        let live = state.docs.get(doc_id).map(|d| d.version);
        match live {
            Some(v) if v > version => Ok(WriteOutcome::Stale),
            Some(_) => {
                state.docs.remove(doc_id);
                state.tombstones.insert(doc_id.to_string(), version);
                Ok(WriteOutcome::Applied)
            }
            None => {
                let entry = state.tombstones.entry(doc_id.to_string()).or_insert(version);
                *entry = (*entry).max(version);
                Ok(WriteOutcome::NotFound)
            }
        }
    }

    async fn get_document(&self, doc_id: &str) -> Result<Option<IndexDocument>> {
        Ok(read(&self.state)?.docs.get(doc_id).cloned())
    }

    async fn scan(&self) -> Result<Vec<IndexDocument>> {
        let mut out: Vec<IndexDocument> = read(&self.state)?.docs.values().cloned().collect();
        out.sort_by(|a, b| a.doc_id.cmp(&b.doc_id));
        Ok(out)
    }

    async fn set_delisted(&self, doc_id: &str, delisted: bool) -> Result<bool> {
        let mut state = write(&self.state)?;
        match state.docs.get_mut(doc_id) {
            Some(doc) => {
                doc.delisted = delisted;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find(&self, filter: &DocumentFilter) -> Result<Vec<IndexDocument>> {
        let mut out: Vec<IndexDocument> = read(&self.state)?
            .docs
            .values()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.sort_key.cmp(&b.sort_key).then(a.doc_id.cmp(&b.doc_id)));
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        Ok(out)
    }
}
