//! Record retrieval by id.
//!
//! Fetches a canonical record together with its index document, so an
//! operator can see both sides of an entity at once. Used by `inkdex get`.

use anyhow::{bail, Result};
use inkdex_core::models::{doc_id, parse_doc_id, EntityType, IndexDocument, VersionedEntity};
use inkdex_core::store::{CanonicalStore, SearchIndex};
use serde::Serialize;

use crate::config::Config;
use crate::db;

#[derive(Debug, Clone, Serialize)]
pub struct EntityView {
    pub doc_id: String,
    /// Canonical record, absent if it was taken down.
    pub record: Option<VersionedEntity>,
    pub document: Option<IndexDocument>,
    /// Whether both sides agree on version and `delisted`.
    pub in_sync: bool,
}

/// Look up `id`, either a doc id (`artist:<id>`) or a bare entity id.
pub async fn get_entity(
    store: &dyn CanonicalStore,
    index: &dyn SearchIndex,
    id: &str,
) -> Result<EntityView> {
    let candidates: Vec<(EntityType, String)> = match parse_doc_id(id) {
        Some((ty, entity_id)) => vec![(ty, entity_id.to_string())],
        None => vec![
            (EntityType::Artist, id.to_string()),
            (EntityType::Studio, id.to_string()),
        ],
    };

    for (ty, entity_id) in candidates {
        let key = doc_id(ty, &entity_id);
        let record = store.get(ty, &entity_id).await?;
        let document = index.get_document(&key).await?;
        if record.is_none() && document.is_none() {
            continue;
        }
        let in_sync = match (&record, &document) {
            (Some(r), Some(d)) => r.version == d.version && r.entity.delisted() == d.delisted,
            _ => false,
        };
        return Ok(EntityView {
            doc_id: key,
            record,
            document,
            in_sync,
        });
    }
    bail!("record not found: {}", id)
}

/// CLI entry point: print the view as JSON on stdout.
pub async fn run_get(config: &Config, id: &str) -> Result<()> {
    let store = db::open_store(config).await?;
    let index = db::open_index(config).await?;
    let view = get_entity(&store, &index, id).await;
    store.pool().close().await;
    index.pool().close().await;

    println!("{}", serde_json::to_string_pretty(&view?)?);
    Ok(())
}
