//! Ingestion writer: validated upserts into the canonical store.
//!
//! Records are grouped by studio in the order they arrive. Each studio is
//! upserted first, with its artist id list unioned with the stored record,
//! and then its artists, one upsert each. The studio is in the store before
//! any of its artists, so their documents can carry its city. A record
//! failing validation is rejected and reported; the rest of the batch
//! continues.
//!
//! An artist re-ingested under a different studio is dropped from the old
//! studio's artist id list.
//!
//! Re-ingesting an unchanged record still upserts it (new version, fresh
//! `last_scraped_at`). The curation `delisted` flag of an existing record is
//! carried over, never reset by the pipeline.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use inkdex_core::error::{ErrorKind, PipelineError};
use inkdex_core::models::{
    ArtistRecord, Entity, EntityType, ItemFailure, Source, Stage, StudioRecord,
};
use inkdex_core::store::CanonicalStore;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
pub struct IngestReport {
    /// `(artist_id, version)` of every artist written.
    pub artists: Vec<(String, u64)>,
    /// `(studio_id, version)` of every studio written.
    pub studios: Vec<(String, u64)>,
    pub failures: Vec<ItemFailure>,
    /// Records left unwritten because the run deadline passed.
    pub skipped_for_deadline: usize,
}

pub fn validate_artist(record: &ArtistRecord) -> Result<(), PipelineError> {
    if record.artist_id.trim().is_empty() {
        return Err(PipelineError::Validation("artist_id is empty".into()));
    }
    if record.display_name.trim().is_empty() {
        return Err(PipelineError::Validation(format!(
            "artist {} has no display_name",
            record.artist_id
        )));
    }
    if record.portfolio_url.trim().is_empty() {
        return Err(PipelineError::Validation(format!(
            "artist {} has no portfolio_url",
            record.artist_id
        )));
    }
    if record.source_studio_id.trim().is_empty() {
        return Err(PipelineError::Validation(format!(
            "artist {} has no source_studio_id",
            record.artist_id
        )));
    }
    Ok(())
}

pub fn validate_studio(record: &StudioRecord) -> Result<(), PipelineError> {
    if record.studio_id.trim().is_empty() {
        return Err(PipelineError::Validation("studio_id is empty".into()));
    }
    if record.display_name.trim().is_empty() {
        return Err(PipelineError::Validation(format!(
            "studio {} has no display_name",
            record.studio_id
        )));
    }
    Ok(())
}

fn failure(item_id: &str, err: PipelineError) -> ItemFailure {
    ItemFailure {
        stage: Stage::Ingestion,
        item_id: item_id.to_string(),
        reason: err.to_string(),
        kind: err.kind(),
    }
}

fn store_failure(item_id: &str, err: anyhow::Error) -> ItemFailure {
    ItemFailure {
        stage: Stage::Ingestion,
        item_id: item_id.to_string(),
        reason: format!("store write failed: {:#}", err),
        kind: ErrorKind::TransientNetwork,
    }
}

pub struct IngestionWriter {
    store: Arc<dyn CanonicalStore>,
}

impl IngestionWriter {
    pub fn new(store: Arc<dyn CanonicalStore>) -> Self {
        Self { store }
    }

    /// Validate and upsert one artist. Returns the version written.
    pub async fn write_artist(&self, mut record: ArtistRecord) -> Result<u64, ItemFailure> {
        validate_artist(&record).map_err(|e| failure(&record.artist_id, e))?;
        let existing = self
            .store
            .get(EntityType::Artist, &record.artist_id)
            .await
            .map_err(|e| store_failure(&record.artist_id, e))?;
        let mut moved_from = None;
        if let Some(existing) = existing {
            record.delisted = existing.entity.delisted();
            if let Entity::Artist(prev) = existing.entity {
                if prev.source_studio_id != record.source_studio_id {
                    moved_from = Some(prev.source_studio_id);
                }
            }
        }
        let id = record.artist_id.clone();
        let version = self
            .store
            .upsert(&Entity::Artist(record))
            .await
            .map_err(|e| store_failure(&id, e))?;
        if let Some(old_studio) = moved_from {
            self.detach(&old_studio, &id).await;
        }
        Ok(version)
    }

    /// Drop `artist_id` from a studio it no longer belongs to.
    async fn detach(&self, studio_id: &str, artist_id: &str) {
        let result: anyhow::Result<Option<u64>> = async {
            let Some(current) = self.store.get(EntityType::Studio, studio_id).await? else {
                return Ok(None);
            };
            let Entity::Studio(mut studio) = current.entity else {
                return Ok(None);
            };
            if !studio.artist_ids.iter().any(|a| a == artist_id) {
                return Ok(None);
            }
            studio.artist_ids.retain(|a| a != artist_id);
            self.store.upsert(&Entity::Studio(studio)).await.map(Some)
        }
        .await;
        match result {
            Ok(Some(version)) => debug!(studio_id, artist_id, version, "moved artist detached"),
            Ok(None) => {}
            Err(e) => warn!(
                studio_id,
                artist_id,
                error = %format!("{:#}", e),
                "could not detach moved artist"
            ),
        }
    }

    /// Upsert `source` as a studio, unioning `artist_ids` with the stored record.
    pub async fn write_studio(
        &self,
        source: &Source,
        artist_ids: &BTreeSet<String>,
    ) -> Result<u64, ItemFailure> {
        let existing = self
            .store
            .get(EntityType::Studio, &source.source_id)
            .await
            .map_err(|e| store_failure(&source.source_id, e))?;

        let mut ids: BTreeSet<String> = artist_ids.clone();
        let mut address = source.address.clone();
        let mut delisted = false;
        if let Some(Entity::Studio(prev)) = existing.map(|v| v.entity) {
            ids.extend(prev.artist_ids);
            delisted = prev.delisted;
            if address.is_none() {
                address = prev.address;
            }
        }

        let record = StudioRecord {
            studio_id: source.source_id.clone(),
            display_name: source.display_name.trim().to_string(),
            website_url: source.website_url.trim().to_string(),
            address,
            artist_ids: ids.into_iter().collect(),
            delisted,
        };
        validate_studio(&record).map_err(|e| failure(&record.studio_id, e))?;
        self.store
            .upsert(&Entity::Studio(record))
            .await
            .map_err(|e| store_failure(&source.source_id, e))
    }

    /// Write a batch grouped by studio, each studio before its artists.
    /// Stops writing when `deadline` passes; every record not yet written
    /// is reported as cancelled.
    pub async fn ingest(
        &self,
        records: Vec<ArtistRecord>,
        sources: &[Source],
        deadline: Instant,
    ) -> IngestReport {
        let mut report = IngestReport::default();

        let mut groups: Vec<(String, Vec<ArtistRecord>)> = Vec::new();
        let mut slot: HashMap<String, usize> = HashMap::new();
        for record in records {
            if let Err(e) = validate_artist(&record) {
                let f = failure(&record.artist_id, e);
                warn!(item = %f.item_id, reason = %f.reason, "artist rejected");
                report.failures.push(f);
                continue;
            }
            let i = *slot.entry(record.source_studio_id.clone()).or_insert_with(|| {
                groups.push((record.source_studio_id.clone(), Vec::new()));
                groups.len() - 1
            });
            groups[i].1.push(record);
        }

        let by_id: BTreeMap<&str, &Source> =
            sources.iter().map(|s| (s.source_id.as_str(), s)).collect();
        let mut groups = groups.into_iter();
        while let Some((studio_id, artists)) = groups.next() {
            if Instant::now() >= deadline {
                self.cancel(&mut report, &studio_id, &artists);
                for (studio_id, artists) in groups.by_ref() {
                    self.cancel(&mut report, &studio_id, &artists);
                }
                break;
            }

            let ids: BTreeSet<String> = artists.iter().map(|a| a.artist_id.clone()).collect();
            let written = match by_id.get(studio_id.as_str()) {
                Some(source) => self.write_studio(source, &ids).await,
                None => Err(failure(
                    &studio_id,
                    PipelineError::Validation(format!("unknown source {}", studio_id)),
                )),
            };
            match written {
                Ok(version) => {
                    debug!(studio_id = %studio_id, version, "studio ingested");
                    report.studios.push((studio_id.clone(), version));
                }
                Err(f) => {
                    warn!(item = %f.item_id, reason = %f.reason, "studio rejected");
                    let kind = f.kind;
                    report.failures.push(f);
                    for artist in &artists {
                        report.failures.push(ItemFailure {
                            stage: Stage::Ingestion,
                            item_id: artist.artist_id.clone(),
                            reason: format!("studio {} was not written", studio_id),
                            kind,
                        });
                    }
                    continue;
                }
            }

            let mut artists = artists.into_iter();
            while let Some(record) = artists.next() {
                if Instant::now() >= deadline {
                    let rest: Vec<ArtistRecord> = std::iter::once(record).chain(artists.by_ref()).collect();
                    self.cancel_artists(&mut report, &rest);
                    for (studio_id, artists) in groups.by_ref() {
                        self.cancel(&mut report, &studio_id, &artists);
                    }
                    break;
                }
                let id = record.artist_id.clone();
                match self.write_artist(record).await {
                    Ok(version) => {
                        debug!(artist_id = %id, version, "artist ingested");
                        report.artists.push((id, version));
                    }
                    Err(f) => {
                        warn!(item = %f.item_id, reason = %f.reason, "artist rejected");
                        report.failures.push(f);
                    }
                }
            }
        }

        if report.skipped_for_deadline > 0 {
            warn!(remaining = report.skipped_for_deadline, "deadline reached during ingestion");
        }
        info!(
            artists = report.artists.len(),
            studios = report.studios.len(),
            rejected = report.failures.len() - report.skipped_for_deadline,
            cancelled = report.skipped_for_deadline,
            "ingestion finished"
        );
        report
    }

    fn cancel(&self, report: &mut IngestReport, studio_id: &str, artists: &[ArtistRecord]) {
        report.failures.push(ItemFailure::cancelled(Stage::Ingestion, studio_id));
        report.skipped_for_deadline += 1;
        self.cancel_artists(report, artists);
    }

    fn cancel_artists(&self, report: &mut IngestReport, artists: &[ArtistRecord]) {
        for artist in artists {
            report
                .failures
                .push(ItemFailure::cancelled(Stage::Ingestion, &artist.artist_id));
            report.skipped_for_deadline += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use inkdex_core::models::{Address, ChangeEvent, ScrapeStatus, VersionedEntity, CANCELLED};
    use inkdex_core::store::memory::InMemoryStore;
    use std::time::Duration;

    fn artist(id: &str, studio: &str, name: &str) -> ArtistRecord {
        ArtistRecord {
            artist_id: id.into(),
            display_name: name.into(),
            bio: String::new(),
            portfolio_url: format!("https://instagram.com/{}", id),
            handle: Some(id.into()),
            images: vec![],
            source_studio_id: studio.into(),
            styles: vec![],
            last_scraped_at: Utc::now(),
            scrape_status: ScrapeStatus::Partial,
            delisted: false,
        }
    }

    fn source(id: &str) -> Source {
        Source {
            source_id: id.into(),
            display_name: format!("Studio {}", id),
            website_url: format!("https://{}.example", id),
            address: Some(Address {
                city: Some("Austin".into()),
                ..Default::default()
            }),
        }
    }

    fn later() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[tokio::test]
    async fn invalid_records_do_not_abort_batch() {
        let store = Arc::new(InMemoryStore::new());
        let writer = IngestionWriter::new(store.clone());
        let report = writer
            .ingest(
                vec![artist("a1", "s1", "Mara"), artist("a2", "s1", "  "), artist("a3", "s1", "Sol")],
                &[source("s1")],
                later(),
            )
            .await;
        assert_eq!(report.artists.len(), 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].kind, ErrorKind::Validation);
        assert_eq!(report.failures[0].item_id, "a2");
        assert!(store.get(EntityType::Artist, "a2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn studio_artist_ids_are_unioned() {
        let store = Arc::new(InMemoryStore::new());
        let writer = IngestionWriter::new(store.clone());
        writer
            .ingest(vec![artist("a1", "s1", "Mara")], &[source("s1")], later())
            .await;
        writer
            .ingest(vec![artist("a2", "s1", "Sol")], &[source("s1")], later())
            .await;

        let studio = store.get(EntityType::Studio, "s1").await.unwrap().unwrap();
        match studio.entity {
            Entity::Studio(s) => assert_eq!(s.artist_ids, vec!["a1", "a2"]),
            other => panic!("unexpected entity {:?}", other),
        }
        assert_eq!(studio.version, 2);
    }

    #[tokio::test]
    async fn reingestion_bumps_version_and_keeps_delisted() {
        let store = Arc::new(InMemoryStore::new());
        let writer = IngestionWriter::new(store.clone());
        assert_eq!(writer.write_artist(artist("a1", "s1", "Mara")).await.unwrap(), 1);

        let mut delisted = artist("a1", "s1", "Mara");
        delisted.delisted = true;
        store.upsert(&Entity::Artist(delisted)).await.unwrap();

        assert_eq!(writer.write_artist(artist("a1", "s1", "Mara")).await.unwrap(), 3);
        let got = store.get(EntityType::Artist, "a1").await.unwrap().unwrap();
        assert!(got.entity.delisted());
    }

    #[tokio::test]
    async fn passed_deadline_writes_nothing() {
        let store = Arc::new(InMemoryStore::new());
        let writer = IngestionWriter::new(store.clone());
        let report = writer
            .ingest(vec![artist("a1", "s1", "Mara")], &[source("s1")], Instant::now())
            .await;
        assert!(report.artists.is_empty());
        assert_eq!(report.skipped_for_deadline, 2);
        let cancelled: Vec<&str> = report.failures.iter().map(|f| f.item_id.as_str()).collect();
        assert_eq!(cancelled, vec!["s1", "a1"]);
        assert!(report
            .failures
            .iter()
            .all(|f| f.stage == Stage::Ingestion && f.reason == CANCELLED));
        assert_eq!(store.head_sequence().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn studio_is_written_before_its_artists() {
        let store = Arc::new(InMemoryStore::new());
        let writer = IngestionWriter::new(store.clone());
        let report = writer
            .ingest(
                vec![artist("a1", "s2", "Mara"), artist("a2", "s1", "Sol"), artist("a3", "s2", "Ivy")],
                &[source("s1"), source("s2")],
                later(),
            )
            .await;
        assert!(report.failures.is_empty());

        let feed: Vec<String> = store
            .stream_changes(0, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.entity_id)
            .collect();
        assert_eq!(feed, vec!["s2", "a1", "a3", "s1", "a2"]);
    }

    #[tokio::test]
    async fn artists_of_an_unknown_studio_are_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let writer = IngestionWriter::new(store.clone());
        let report = writer
            .ingest(vec![artist("a1", "ghost", "Mara")], &[source("s1")], later())
            .await;
        let failed: Vec<&str> = report.failures.iter().map(|f| f.item_id.as_str()).collect();
        assert_eq!(failed, vec!["ghost", "a1"]);
        assert!(report.failures.iter().all(|f| f.kind == ErrorKind::Validation));
        assert_eq!(store.head_sequence().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn moved_artist_leaves_its_old_studio() {
        let store = Arc::new(InMemoryStore::new());
        let writer = IngestionWriter::new(store.clone());
        writer
            .ingest(vec![artist("a1", "s1", "Mara")], &[source("s1")], later())
            .await;
        writer
            .ingest(vec![artist("a1", "s2", "Mara")], &[source("s2")], later())
            .await;

        let ids = |entity: Entity| match entity {
            Entity::Studio(s) => s.artist_ids,
            other => panic!("unexpected entity {:?}", other),
        };
        let old = store.get(EntityType::Studio, "s1").await.unwrap().unwrap();
        let new = store.get(EntityType::Studio, "s2").await.unwrap().unwrap();
        assert!(ids(old.entity).is_empty());
        assert_eq!(ids(new.entity), vec!["a1"]);
    }

    /// Sleeps before every upsert.
    struct SlowStore {
        inner: InMemoryStore,
        delay: Duration,
    }

    #[async_trait]
    impl CanonicalStore for SlowStore {
        async fn upsert(&self, entity: &Entity) -> anyhow::Result<u64> {
            tokio::time::sleep(self.delay).await;
            self.inner.upsert(entity).await
        }
        async fn get(&self, entity_type: EntityType, entity_id: &str) -> anyhow::Result<Option<VersionedEntity>> {
            self.inner.get(entity_type, entity_id).await
        }
        async fn delete(&self, entity_type: EntityType, entity_id: &str) -> anyhow::Result<Option<u64>> {
            self.inner.delete(entity_type, entity_id).await
        }
        async fn stream_changes(&self, from_sequence: u64, limit: usize) -> anyhow::Result<Vec<ChangeEvent>> {
            self.inner.stream_changes(from_sequence, limit).await
        }
        async fn head_sequence(&self) -> anyhow::Result<u64> {
            self.inner.head_sequence().await
        }
        async fn scan(&self, entity_type: Option<EntityType>) -> anyhow::Result<Vec<VersionedEntity>> {
            self.inner.scan(entity_type).await
        }
    }

    #[tokio::test]
    async fn deadline_mid_batch_cancels_the_rest() {
        let store = Arc::new(SlowStore {
            inner: InMemoryStore::new(),
            delay: Duration::from_millis(100),
        });
        let writer = IngestionWriter::new(store.clone());
        let report = writer
            .ingest(
                vec![artist("a1", "s1", "Mara"), artist("a2", "s2", "Sol")],
                &[source("s1"), source("s2")],
                Instant::now() + Duration::from_millis(150),
            )
            .await;

        // s1 and a1 land; s2 and a2 are cancelled.
        assert_eq!(report.studios.len(), 1);
        assert_eq!(report.artists.len(), 1);
        assert_eq!(report.skipped_for_deadline, 2);
        let cancelled: Vec<&str> = report
            .failures
            .iter()
            .filter(|f| f.reason == CANCELLED)
            .map(|f| f.item_id.as_str())
            .collect();
        assert_eq!(cancelled, vec!["s2", "a2"]);
        assert!(store.get(EntityType::Studio, "s2").await.unwrap().is_none());
    }
}
