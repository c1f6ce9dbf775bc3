//! Idempotent schema creation for both databases.
//!
//! | Database | Tables |
//! |----------|--------|
//! | canonical | `artists`, `studios`, `entity_versions`, `change_log`, `sync_offsets`, `dead_letters`, `pipeline_runs` |
//! | index | `index_documents`, `index_tombstones` |

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_store(&pool).await?;
    pool.close().await;

    let index = db::connect_index(config).await?;
    migrate_index(&index).await?;
    index.close().await;
    Ok(())
}

pub async fn migrate_store(pool: &SqlitePool) -> Result<()> {
    // Entity bodies are stored as JSON; the columns next to them exist for
    // lookups and the stats command.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS artists (
            artist_id TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            portfolio_url TEXT NOT NULL,
            source_studio_id TEXT NOT NULL,
            scrape_status TEXT NOT NULL,
            delisted INTEGER NOT NULL DEFAULT 0,
            version INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            record_json TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS studios (
            studio_id TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            website_url TEXT NOT NULL,
            city TEXT,
            delisted INTEGER NOT NULL DEFAULT 0,
            version INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            record_json TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Last version per entity. Survives deletes so versions never restart.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entity_versions (
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            version INTEGER NOT NULL,
            PRIMARY KEY (entity_type, entity_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS change_log (
            sequence INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            operation TEXT NOT NULL,
            version INTEGER NOT NULL,
            payload_json TEXT,
            recorded_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_offsets (
            shard INTEGER PRIMARY KEY,
            sequence INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dead_letters (
            dead_letter_id TEXT PRIMARY KEY,
            sequence INTEGER NOT NULL,
            event_json TEXT NOT NULL,
            error TEXT NOT NULL,
            attempts INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_runs (
            run_id TEXT PRIMARY KEY,
            query TEXT NOT NULL,
            state TEXT NOT NULL,
            started_at INTEGER NOT NULL,
            finished_at INTEGER NOT NULL,
            summary_json TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_change_log_entity ON change_log(entity_type, entity_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_artists_studio ON artists(source_studio_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_pipeline_runs_started ON pipeline_runs(started_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn migrate_index(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_documents (
            doc_id TEXT PRIMARY KEY,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            version INTEGER NOT NULL,
            group_key TEXT NOT NULL,
            sort_key TEXT NOT NULL,
            delisted INTEGER NOT NULL DEFAULT 0,
            doc_json TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_tombstones (
            doc_id TEXT PRIMARY KEY,
            version INTEGER NOT NULL,
            deleted_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_index_documents_group ON index_documents(group_key)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_index_documents_sort ON index_documents(sort_key)")
        .execute(pool)
        .await?;

    Ok(())
}
