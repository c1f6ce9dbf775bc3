//! Operator curation: takedowns in the store, delisting in the index.
//!
//! A takedown deletes the canonical record; the delete event reaches the
//! index through forward sync. Delisting is index-side curation: it flips
//! the document's `delisted` flag without a version bump, and a later
//! `reconcile --direction index-to-store` carries it back to the store.

use anyhow::{bail, Result};
use inkdex_core::models::{doc_id, parse_doc_id, EntityType};
use inkdex_core::store::{CanonicalStore, SearchIndex};
use tracing::info;

use crate::config::Config;
use crate::db;

fn resolve(id: &str) -> Vec<(EntityType, String)> {
    match parse_doc_id(id) {
        Some((ty, entity_id)) => vec![(ty, entity_id.to_string())],
        None => vec![
            (EntityType::Artist, id.to_string()),
            (EntityType::Studio, id.to_string()),
        ],
    }
}

/// Delete a record from the canonical store. Returns the delete's version.
pub async fn takedown(store: &dyn CanonicalStore, id: &str) -> Result<(String, u64)> {
    for (ty, entity_id) in resolve(id) {
        if let Some(version) = store.delete(ty, &entity_id).await? {
            info!(entity_type = ty.as_str(), entity_id = %entity_id, version, "taken down");
            return Ok((doc_id(ty, &entity_id), version));
        }
    }
    bail!("record not found: {}", id)
}

/// Set or clear the index-side `delisted` flag. Returns the doc id.
pub async fn delist(index: &dyn SearchIndex, id: &str, delisted: bool) -> Result<String> {
    for (ty, entity_id) in resolve(id) {
        let key = doc_id(ty, &entity_id);
        if index.set_delisted(&key, delisted).await? {
            info!(doc_id = %key, delisted, "index curation applied");
            return Ok(key);
        }
    }
    bail!("document not found in index: {}", id)
}

pub async fn run_takedown(config: &Config, id: &str) -> Result<()> {
    let store = db::open_store(config).await?;
    let result = takedown(&store, id).await;
    store.pool().close().await;
    let (key, version) = result?;
    println!("{} deleted at version {}", key, version);
    Ok(())
}

pub async fn run_delist(config: &Config, id: &str, undo: bool) -> Result<()> {
    let index = db::open_index(config).await?;
    let result = delist(&index, id, !undo).await;
    index.pool().close().await;
    let key = result?;
    println!("{} {}", key, if undo { "relisted" } else { "delisted" });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use inkdex_core::models::{Entity, StudioRecord};
    use inkdex_core::project::{project, ProjectionContext};
    use inkdex_core::store::memory::{InMemoryIndex, InMemoryStore};
    use inkdex_core::store::WriteMode;

    fn studio() -> Entity {
        Entity::Studio(StudioRecord {
            studio_id: "s1".into(),
            display_name: "Black Anchor".into(),
            website_url: "https://blackanchor.example".into(),
            address: None,
            artist_ids: vec![],
            delisted: false,
        })
    }

    #[tokio::test]
    async fn takedown_emits_delete_event() {
        let store = InMemoryStore::new();
        store.upsert(&studio()).await.unwrap();
        let (key, version) = takedown(&store, "s1").await.unwrap();
        assert_eq!(key, "studio:s1");
        assert_eq!(version, 2);
        assert_eq!(store.head_sequence().await.unwrap(), 2);
        assert!(takedown(&store, "s1").await.is_err());
    }

    #[tokio::test]
    async fn delist_flips_flag_without_version_bump() {
        let index = InMemoryIndex::new();
        let doc = project(&studio(), 3, &ProjectionContext::default());
        index.upsert_document(&doc, WriteMode::IfNewer).await.unwrap();

        assert_eq!(delist(&index, "studio:s1", true).await.unwrap(), "studio:s1");
        let got = index.get_document("studio:s1").await.unwrap().unwrap();
        assert!(got.delisted);
        assert_eq!(got.version, 3);
        assert!(delist(&index, "missing", true).await.is_err());
    }
}
