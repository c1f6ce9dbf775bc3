//! SQLite connection pools for the canonical store and the search index.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use crate::config::Config;
use crate::migrate;
use crate::sqlite_store::{SqliteIndex, SqliteStore};

/// Pool for the canonical store database.
pub async fn connect(config: &Config) -> Result<SqlitePool> {
    open(&config.db.path).await
}

/// Pool for the search index database.
pub async fn connect_index(config: &Config) -> Result<SqlitePool> {
    open(&config.index.path).await
}

async fn open(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    Ok(pool)
}

/// Canonical store over [`connect`], with its schema in place.
pub async fn open_store(config: &Config) -> Result<SqliteStore> {
    let pool = connect(config).await?;
    migrate::migrate_store(&pool).await?;
    Ok(SqliteStore::new(pool))
}

/// Search index over [`connect_index`], with its schema in place.
pub async fn open_index(config: &Config) -> Result<SqliteIndex> {
    let pool = connect_index(config).await?;
    migrate::migrate_index(&pool).await?;
    Ok(SqliteIndex::new(pool))
}
