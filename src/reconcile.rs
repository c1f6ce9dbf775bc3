//! Reconciliation: detect and repair drift between store and index.
//!
//! Forward sync keeps the index eventually consistent, but events can be
//! dead-lettered, the index can be edited by curation tools, or a store
//! restore can move versions around. A reconcile pass compares both sides
//! in full (within a scope), classifies each disagreement with
//! [`classify_drift`], and repairs it according to the chosen direction.
//!
//! | Drift | `store-to-index` | `index-to-store` |
//! |-------|------------------|------------------|
//! | `missing_in_index` | project and write the record | same |
//! | `stale_in_index` | rewrite the document | same |
//! | `orphan_in_index` | delete the document | same |
//! | `missing_in_store`, index-authored delisting | restore the store's flag in the index | write the flag back to the store |
//! | `missing_in_store`, index version ahead | reported, skipped | reported, skipped |
//!
//! Only the curation `delisted` flag ever flows index → store; everything
//! else is store-wins in both directions. Repairs use
//! [`WriteMode::IfNotOlder`], so a concurrent forward sync that already wrote
//! a newer version wins, and the repair counts as skipped.
//!
//! Running a second pass right after a successful one finds no drift except
//! entries it reported as errors.

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};
use inkdex_core::drift::{classify_drift, SideEntry};
use inkdex_core::models::{doc_id, DriftClass, DriftRecord, Entity, EntityType};
use inkdex_core::project::content_fingerprint;
use inkdex_core::store::{CanonicalStore, SearchIndex, WriteMode, WriteOutcome};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::db;
use crate::sync::project_entity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    StoreToIndex,
    IndexToStore,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::StoreToIndex => "store-to-index",
            Direction::IndexToStore => "index-to-store",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "store-to-index" => Ok(Direction::StoreToIndex),
            "index-to-store" => Ok(Direction::IndexToStore),
            other => bail!(
                "Unknown direction '{}' (expected store-to-index or index-to-store)",
                other
            ),
        }
    }
}

/// Which entities a pass looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    All,
    Type(EntityType),
    /// Explicit entity ids or doc ids (`artist:<id>`).
    Ids(Vec<String>),
}

impl Scope {
    fn entity_type(&self) -> Option<EntityType> {
        match self {
            Scope::Type(t) => Some(*t),
            _ => None,
        }
    }

    fn includes(&self, entity_type: EntityType, entity_id: &str) -> bool {
        match self {
            Scope::All => true,
            Scope::Type(t) => *t == entity_type,
            Scope::Ids(ids) => {
                let full = doc_id(entity_type, entity_id);
                ids.iter().any(|id| id == entity_id || *id == full)
            }
        }
    }
}

impl FromStr for Scope {
    type Err = anyhow::Error;

    /// `all`, `artists`, `studios`, or `ids:<id>,<id>,...`.
    fn from_str(s: &str) -> Result<Self> {
        if let Some(ids) = s.strip_prefix("ids:") {
            let ids: Vec<String> = ids
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect();
            if ids.is_empty() {
                bail!("Scope 'ids:' needs at least one id");
            }
            return Ok(Scope::Ids(ids));
        }
        match s {
            "all" => Ok(Scope::All),
            other => Ok(Scope::Type(other.parse()?)),
        }
    }
}

/// A drift entry that could not be repaired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriftError {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub examined: usize,
    pub drift: Vec<DriftRecord>,
    pub repaired: usize,
    /// Drift left alone: dry runs, index-ahead entries, repairs overtaken
    /// by a newer concurrent write.
    pub skipped: usize,
    pub failed: usize,
    pub errors: Vec<DriftError>,
}

enum Repair {
    Repaired,
    Skipped,
}

pub struct Reconciler<'a> {
    store: &'a dyn CanonicalStore,
    index: &'a dyn SearchIndex,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a dyn CanonicalStore, index: &'a dyn SearchIndex) -> Self {
        Self { store, index }
    }

    /// Classify drift within `scope` without touching either side.
    ///
    /// Besides versions, each live record is projected and compared with
    /// its document, so a same-version document built from stale context
    /// (an artist synced before its studio) shows up as stale.
    pub async fn detect(&self, scope: &Scope) -> Result<(usize, Vec<DriftRecord>)> {
        let mut store_side: Vec<SideEntry> = Vec::new();
        for v in self.store.scan(scope.entity_type()).await? {
            if !scope.includes(v.entity.entity_type(), v.entity.id()) {
                continue;
            }
            let projected = project_entity(self.store, &v.entity, v.version).await?;
            store_side.push(SideEntry {
                entity_type: v.entity.entity_type(),
                entity_id: v.entity.id().to_string(),
                version: v.version,
                delisted: v.entity.delisted(),
                content: Some(content_fingerprint(&projected)),
            });
        }
        let index_side: Vec<SideEntry> = self
            .index
            .scan()
            .await?
            .into_iter()
            .filter(|d| scope.includes(d.entity_type, &d.entity_id))
            .map(|d| SideEntry {
                content: Some(content_fingerprint(&d)),
                entity_type: d.entity_type,
                entity_id: d.entity_id,
                version: d.version,
                delisted: d.delisted,
            })
            .collect();

        let mut keys: Vec<(EntityType, &str)> = store_side
            .iter()
            .chain(index_side.iter())
            .map(|e| (e.entity_type, e.entity_id.as_str()))
            .collect();
        keys.sort();
        keys.dedup();

        Ok((keys.len(), classify_drift(&store_side, &index_side)))
    }

    /// Detect and, unless `dry_run`, repair drift within `scope`.
    pub async fn run(&self, direction: Direction, scope: &Scope, dry_run: bool) -> Result<ReconcileReport> {
        let (examined, drift) = self.detect(scope).await?;
        let mut report = ReconcileReport {
            examined,
            ..Default::default()
        };

        for record in &drift {
            if record.classification == DriftClass::MissingInStore
                && record.index_version > record.store_version
            {
                warn!(
                    entity_type = record.entity_type.as_str(),
                    entity_id = %record.entity_id,
                    store_version = ?record.store_version,
                    index_version = ?record.index_version,
                    "index ahead of store"
                );
                report.errors.push(DriftError {
                    entity_type: record.entity_type,
                    entity_id: record.entity_id.clone(),
                    reason: "index version is ahead of the store".to_string(),
                });
                report.skipped += 1;
                continue;
            }
            if dry_run {
                report.skipped += 1;
                continue;
            }
            match self.repair(record, direction).await {
                Ok(Repair::Repaired) => report.repaired += 1,
                Ok(Repair::Skipped) => report.skipped += 1,
                Err(e) => {
                    warn!(entity_id = %record.entity_id, error = %format!("{:#}", e), "repair failed");
                    report.failed += 1;
                    report.errors.push(DriftError {
                        entity_type: record.entity_type,
                        entity_id: record.entity_id.clone(),
                        reason: format!("{:#}", e),
                    });
                }
            }
        }
        report.drift = drift;

        info!(
            direction = direction.as_str(),
            dry_run,
            examined = report.examined,
            drift = report.drift.len(),
            repaired = report.repaired,
            skipped = report.skipped,
            failed = report.failed,
            "reconcile finished"
        );
        Ok(report)
    }

    async fn repair(&self, record: &DriftRecord, direction: Direction) -> Result<Repair> {
        let current = self.store.get(record.entity_type, &record.entity_id).await?;
        let Some(current) = current else {
            // Store has nothing (or no longer has it): the document is an orphan.
            let id = doc_id(record.entity_type, &record.entity_id);
            let version = record.index_version.unwrap_or(0);
            return Ok(match self.index.delete_document(&id, version).await? {
                WriteOutcome::Stale => Repair::Skipped,
                _ => Repair::Repaired,
            });
        };

        let mut entity: Entity = current.entity;
        let mut version = current.version;
        if record.classification == DriftClass::MissingInStore && direction == Direction::IndexToStore {
            entity.set_delisted(true);
            version = self.store.upsert(&entity).await?;
            debug!(entity_id = %record.entity_id, version, "delisting written back to store");
        }

        let doc = project_entity(self.store, &entity, version).await?;
        Ok(match self.index.upsert_document(&doc, WriteMode::IfNotOlder).await? {
            WriteOutcome::Applied => Repair::Repaired,
            _ => Repair::Skipped,
        })
    }
}

/// CLI entry point for `inkdex reconcile`. Prints the report as JSON.
pub async fn run_reconcile(config: &Config, direction: Direction, scope: &Scope, dry_run: bool) -> Result<()> {
    let store = db::open_store(config).await?;
    let index = db::open_index(config).await?;
    let report = Reconciler::new(&store, &index).run(direction, scope, dry_run).await;
    store.pool().close().await;
    index.pool().close().await;

    println!("{}", serde_json::to_string_pretty(&report?)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use inkdex_core::models::{Address, ArtistRecord, ScrapeStatus, StudioRecord};
    use inkdex_core::store::memory::{InMemoryIndex, InMemoryStore};

    fn artist(id: &str, name: &str) -> Entity {
        Entity::Artist(ArtistRecord {
            artist_id: id.into(),
            display_name: name.into(),
            bio: String::new(),
            portfolio_url: format!("https://instagram.com/{}", id),
            handle: Some(id.into()),
            images: vec![],
            source_studio_id: "s1".into(),
            styles: vec![],
            last_scraped_at: Utc::now(),
            scrape_status: ScrapeStatus::Partial,
            delisted: false,
        })
    }

    async fn synced(store: &InMemoryStore, index: &InMemoryIndex) {
        for v in store.scan(None).await.unwrap() {
            let doc = project_entity(store, &v.entity, v.version).await.unwrap();
            index.upsert_document(&doc, WriteMode::IfNewer).await.unwrap();
        }
    }

    #[test]
    fn parses_direction_and_scope() {
        assert_eq!("index-to-store".parse::<Direction>().unwrap(), Direction::IndexToStore);
        assert!("sideways".parse::<Direction>().is_err());
        assert_eq!("all".parse::<Scope>().unwrap(), Scope::All);
        assert_eq!("studios".parse::<Scope>().unwrap(), Scope::Type(EntityType::Studio));
        assert_eq!(
            "ids:a1, artist:a2".parse::<Scope>().unwrap(),
            Scope::Ids(vec!["a1".into(), "artist:a2".into()])
        );
        assert!("ids:".parse::<Scope>().is_err());
    }

    #[tokio::test]
    async fn repairs_every_drift_class_and_converges() {
        let store = InMemoryStore::new();
        let index = InMemoryIndex::new();
        for id in ["a1", "a2", "a3", "a4"] {
            store.upsert(&artist(id, id)).await.unwrap();
        }
        synced(&store, &index).await;

        // a1 missing from index, a2 stale, a5 orphan, a4 delisted in the index only.
        index.force_remove("artist:a1").unwrap();
        store.upsert(&artist("a2", "renamed")).await.unwrap();
        let orphan = project_entity(&store, &artist("a5", "gone"), 1).await.unwrap();
        index.force_put(orphan).unwrap();
        assert!(index.set_delisted("artist:a4", true).await.unwrap());

        let r = Reconciler::new(&store, &index);
        let report = r.run(Direction::StoreToIndex, &Scope::All, false).await.unwrap();
        assert_eq!(report.examined, 5);
        let classes: Vec<(String, DriftClass)> = report
            .drift
            .iter()
            .map(|d| (d.entity_id.clone(), d.classification))
            .collect();
        assert_eq!(
            classes,
            vec![
                ("a1".to_string(), DriftClass::MissingInIndex),
                ("a2".to_string(), DriftClass::StaleInIndex),
                ("a4".to_string(), DriftClass::MissingInStore),
                ("a5".to_string(), DriftClass::OrphanInIndex),
            ]
        );
        assert_eq!(report.repaired, 4);
        assert_eq!(report.failed, 0);

        // Store wins: the index-only delisting is reverted.
        let a4 = index.get_document("artist:a4").await.unwrap().unwrap();
        assert!(!a4.delisted);
        assert_eq!(
            index.get_document("artist:a2").await.unwrap().unwrap().title,
            "renamed"
        );
        assert!(index.get_document("artist:a5").await.unwrap().is_none());

        let second = r.run(Direction::StoreToIndex, &Scope::All, false).await.unwrap();
        assert!(second.drift.is_empty());
        assert_eq!(second.repaired, 0);
    }

    #[tokio::test]
    async fn index_to_store_writes_delisting_back() {
        let store = InMemoryStore::new();
        let index = InMemoryIndex::new();
        store.upsert(&artist("a1", "Mara")).await.unwrap();
        synced(&store, &index).await;
        index.set_delisted("artist:a1", true).await.unwrap();

        let r = Reconciler::new(&store, &index);
        let report = r.run(Direction::IndexToStore, &Scope::All, false).await.unwrap();
        assert_eq!(report.repaired, 1);

        let rec = store.get(EntityType::Artist, "a1").await.unwrap().unwrap();
        assert!(rec.entity.delisted());
        assert_eq!(rec.version, 2);
        let doc = index.get_document("artist:a1").await.unwrap().unwrap();
        assert_eq!(doc.version, 2);
        assert!(doc.delisted);

        assert!(r.run(Direction::IndexToStore, &Scope::All, false).await.unwrap().drift.is_empty());
    }

    #[tokio::test]
    async fn dry_run_reports_without_writing() {
        let store = InMemoryStore::new();
        let index = InMemoryIndex::new();
        store.upsert(&artist("a1", "Mara")).await.unwrap();

        let r = Reconciler::new(&store, &index);
        let report = r.run(Direction::StoreToIndex, &Scope::All, true).await.unwrap();
        assert_eq!(report.drift.len(), 1);
        assert_eq!(report.repaired, 0);
        assert_eq!(report.skipped, 1);
        assert!(index.get_document("artist:a1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn index_ahead_is_reported_not_repaired() {
        let store = InMemoryStore::new();
        let index = InMemoryIndex::new();
        store.upsert(&artist("a1", "Mara")).await.unwrap();
        let ahead = project_entity(&store, &artist("a1", "Future"), 7).await.unwrap();
        index.force_put(ahead).unwrap();

        let report = Reconciler::new(&store, &index)
            .run(Direction::StoreToIndex, &Scope::All, false)
            .await
            .unwrap();
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.repaired, 0);
        assert_eq!(index.get_document("artist:a1").await.unwrap().unwrap().version, 7);
    }

    #[tokio::test]
    async fn same_version_document_missing_studio_city_is_rewritten() {
        let store = InMemoryStore::new();
        let index = InMemoryIndex::new();
        let version = store.upsert(&artist("a1", "Mara")).await.unwrap();
        // Projected before the studio existed, so it carries no city.
        let cityless = project_entity(&store, &artist("a1", "Mara"), version).await.unwrap();
        assert_eq!(cityless.city, None);
        index.force_put(cityless).unwrap();
        store
            .upsert(&Entity::Studio(StudioRecord {
                studio_id: "s1".into(),
                display_name: "Black Anchor".into(),
                website_url: "https://blackanchor.example".into(),
                address: Some(Address {
                    city: Some("Austin".into()),
                    ..Default::default()
                }),
                artist_ids: vec!["a1".into()],
                delisted: false,
            }))
            .await
            .unwrap();
        synced(&store, &index).await;
        assert_eq!(
            index.get_document("artist:a1").await.unwrap().unwrap().city,
            None,
            "same-version upsert must not replace the document"
        );

        let r = Reconciler::new(&store, &index);
        let report = r.run(Direction::StoreToIndex, &Scope::All, false).await.unwrap();
        assert_eq!(report.drift.len(), 1);
        assert_eq!(report.drift[0].entity_id, "a1");
        assert_eq!(report.drift[0].classification, DriftClass::StaleInIndex);
        assert_eq!(report.repaired, 1);

        let doc = index.get_document("artist:a1").await.unwrap().unwrap();
        assert_eq!(doc.city.as_deref(), Some("Austin"));
        assert_eq!(doc.version, version);
        assert!(r.run(Direction::StoreToIndex, &Scope::All, false).await.unwrap().drift.is_empty());
    }

    #[tokio::test]
    async fn scope_limits_what_is_examined() {
        let store = InMemoryStore::new();
        let index = InMemoryIndex::new();
        store.upsert(&artist("a1", "Mara")).await.unwrap();
        store.upsert(&artist("a2", "Sol")).await.unwrap();

        let r = Reconciler::new(&store, &index);
        let report = r
            .run(Direction::StoreToIndex, &Scope::Ids(vec!["artist:a2".into()]), false)
            .await
            .unwrap();
        assert_eq!(report.examined, 1);
        assert_eq!(report.repaired, 1);
        assert!(index.get_document("artist:a1").await.unwrap().is_none());

        let studios = r
            .run(Direction::StoreToIndex, &Scope::Type(EntityType::Studio), true)
            .await
            .unwrap();
        assert_eq!(studios.examined, 0);
    }
}
