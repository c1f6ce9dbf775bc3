//! Forward sync status: per-shard offsets, feed head, and lag.
//!
//! `lag_seconds` is the age of the oldest change event no shard has applied
//! yet, or `0` when every shard is at the head.

use anyhow::Result;
use chrono::Utc;
use inkdex_core::store::{CanonicalStore, SyncStateStore};
use serde::Serialize;

use crate::config::Config;
use crate::db;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShardStatus {
    pub shard: u32,
    pub last_applied: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub shards: Vec<ShardStatus>,
    pub head: u64,
    /// Feed positions between the slowest shard and the head.
    pub behind: u64,
    pub lag_seconds: i64,
    pub dead_letters: usize,
}

pub async fn sync_status(
    store: &dyn CanonicalStore,
    state: &dyn SyncStateStore,
    shards: u32,
) -> Result<SyncStatus> {
    let saved = state.load_offsets().await?;
    let shards: Vec<ShardStatus> = (0..shards.max(1))
        .map(|shard| ShardStatus {
            shard,
            last_applied: saved.get(&shard).copied().unwrap_or(0),
        })
        .collect();
    let slowest = shards.iter().map(|s| s.last_applied).min().unwrap_or(0);
    let head = store.head_sequence().await?;

    let lag_seconds = match store.stream_changes(slowest, 1).await?.first() {
        Some(oldest) => (Utc::now() - oldest.recorded_at).num_seconds().max(0),
        None => 0,
    };

    Ok(SyncStatus {
        shards,
        head,
        behind: head.saturating_sub(slowest),
        lag_seconds,
        dead_letters: state.list_dead_letters().await?.len(),
    })
}

/// CLI entry point: print sync status as JSON on stdout.
pub async fn run_status(config: &Config) -> Result<()> {
    let store = db::open_store(config).await?;
    let status = sync_status(&store, &store, config.sync.shards).await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    store.pool().close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use inkdex_core::models::{Entity, StudioRecord};
    use inkdex_core::store::memory::InMemoryStore;

    fn studio(id: &str) -> Entity {
        Entity::Studio(StudioRecord {
            studio_id: id.into(),
            display_name: id.into(),
            website_url: format!("https://{}.example", id),
            address: None,
            artist_ids: vec![],
            delisted: false,
        })
    }

    #[tokio::test]
    async fn reports_lag_until_all_shards_catch_up() {
        let store = InMemoryStore::new();
        store.upsert(&studio("s1")).await.unwrap();
        store.upsert(&studio("s2")).await.unwrap();

        let status = sync_status(&store, &store, 2).await.unwrap();
        assert_eq!(status.head, 2);
        assert_eq!(status.behind, 2);
        assert_eq!(status.shards.len(), 2);
        assert!(status.lag_seconds >= 0);

        store.save_offset(0, 2).await.unwrap();
        store.save_offset(1, 2).await.unwrap();
        let status = sync_status(&store, &store, 2).await.unwrap();
        assert_eq!(status.behind, 0);
        assert_eq!(status.lag_seconds, 0);
    }
}
