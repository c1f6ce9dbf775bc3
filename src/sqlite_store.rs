//! SQLite-backed [`CanonicalStore`], [`SyncStateStore`], and [`SearchIndex`].
//!
//! The canonical store and the index live in separate databases (see
//! [`crate::migrate`]). Entities and documents are stored as JSON next to
//! the columns needed for lookups.
//!
//! Version bumps start with a write (`INSERT .. ON CONFLICT .. RETURNING`),
//! so concurrent upserts queue on SQLite's writer lock instead of failing
//! a deferred transaction's lock upgrade.

use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use inkdex_core::models::{
    ChangeEvent, DeadLetter, Entity, EntityType, IndexDocument, Operation, VersionedEntity,
};
use inkdex_core::store::{
    CanonicalStore, DocumentFilter, SearchIndex, SyncStateStore, WriteMode, WriteOutcome,
};

fn millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn table_for(entity_type: EntityType) -> (&'static str, &'static str) {
    match entity_type {
        EntityType::Artist => ("artists", "artist_id"),
        EntityType::Studio => ("studios", "studio_id"),
    }
}

/// SQLite implementation of the canonical store and its sync state.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn bump_version(
        tx: &mut Transaction<'_, Sqlite>,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<u64> {
        let version: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO entity_versions (entity_type, entity_id, version)
            VALUES (?, ?, 1)
            ON CONFLICT(entity_type, entity_id) DO UPDATE SET version = version + 1
            RETURNING version
            "#,
        )
        .bind(entity_type.as_str())
        .bind(entity_id)
        .fetch_one(&mut **tx)
        .await?;
        Ok(version as u64)
    }

    async fn append_change(
        tx: &mut Transaction<'_, Sqlite>,
        entity_type: EntityType,
        entity_id: &str,
        operation: Operation,
        version: u64,
        payload: Option<&Entity>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let payload_json = payload.map(serde_json::to_string).transpose()?;
        sqlx::query(
            r#"
            INSERT INTO change_log (entity_type, entity_id, operation, version, payload_json, recorded_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entity_type.as_str())
        .bind(entity_id)
        .bind(operation.as_str())
        .bind(version as i64)
        .bind(payload_json)
        .bind(millis(now))
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

fn versioned_from_row(row: &SqliteRow) -> Result<VersionedEntity> {
    let json: String = row.get("record_json");
    let entity: Entity = serde_json::from_str(&json).context("corrupt record_json")?;
    let version: i64 = row.get("version");
    Ok(VersionedEntity {
        entity,
        version: version as u64,
        updated_at: from_millis(row.get("updated_at")),
    })
}

fn change_from_row(row: &SqliteRow) -> Result<ChangeEvent> {
    let entity_type: String = row.get("entity_type");
    let operation: String = row.get("operation");
    let payload_json: Option<String> = row.get("payload_json");
    let payload = payload_json
        .map(|p| serde_json::from_str::<Entity>(&p))
        .transpose()
        .context("corrupt change_log payload")?;
    let sequence: i64 = row.get("sequence");
    let version: i64 = row.get("version");
    Ok(ChangeEvent {
        sequence: sequence as u64,
        entity_type: entity_type.parse()?,
        entity_id: row.get("entity_id"),
        operation: operation.parse()?,
        version: version as u64,
        payload,
        recorded_at: from_millis(row.get("recorded_at")),
    })
}

#[async_trait]
impl CanonicalStore for SqliteStore {
    async fn upsert(&self, entity: &Entity) -> Result<u64> {
        let now = Utc::now();
        let record_json = serde_json::to_string(entity)?;
        let mut tx = self.pool.begin().await?;
        let version = Self::bump_version(&mut tx, entity.entity_type(), entity.id()).await?;

        match entity {
            Entity::Artist(a) => {
                sqlx::query(
                    r#"
                    INSERT INTO artists (artist_id, display_name, portfolio_url, source_studio_id,
                                         scrape_status, delisted, version, updated_at, record_json)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(artist_id) DO UPDATE SET
                        display_name = excluded.display_name,
                        portfolio_url = excluded.portfolio_url,
                        source_studio_id = excluded.source_studio_id,
                        scrape_status = excluded.scrape_status,
                        delisted = excluded.delisted,
                        version = excluded.version,
                        updated_at = excluded.updated_at,
                        record_json = excluded.record_json
                    "#,
                )
                .bind(&a.artist_id)
                .bind(&a.display_name)
                .bind(&a.portfolio_url)
                .bind(&a.source_studio_id)
                .bind(a.scrape_status.as_str())
                .bind(a.delisted)
                .bind(version as i64)
                .bind(millis(now))
                .bind(&record_json)
                .execute(&mut *tx)
                .await?;
            }
            Entity::Studio(s) => {
                let city = s.address.as_ref().and_then(|a| a.city.clone());
                sqlx::query(
                    r#"
                    INSERT INTO studios (studio_id, display_name, website_url, city,
                                         delisted, version, updated_at, record_json)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(studio_id) DO UPDATE SET
                        display_name = excluded.display_name,
                        website_url = excluded.website_url,
                        city = excluded.city,
                        delisted = excluded.delisted,
                        version = excluded.version,
                        updated_at = excluded.updated_at,
                        record_json = excluded.record_json
                    "#,
                )
                .bind(&s.studio_id)
                .bind(&s.display_name)
                .bind(&s.website_url)
                .bind(city)
                .bind(s.delisted)
                .bind(version as i64)
                .bind(millis(now))
                .bind(&record_json)
                .execute(&mut *tx)
                .await?;
            }
        }

        Self::append_change(
            &mut tx,
            entity.entity_type(),
            entity.id(),
            Operation::Upsert,
            version,
            Some(entity),
            now,
        )
        .await?;
        tx.commit().await?;
        Ok(version)
    }

    async fn get(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Option<VersionedEntity>> {
        let (table, key) = table_for(entity_type);
        let row = sqlx::query(&format!(
            "SELECT version, updated_at, record_json FROM {} WHERE {} = ?",
            table, key
        ))
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(versioned_from_row).transpose()
    }

    async fn delete(&self, entity_type: EntityType, entity_id: &str) -> Result<Option<u64>> {
        let (table, key) = table_for(entity_type);
        let mut tx = self.pool.begin().await?;
        let removed = sqlx::query(&format!("DELETE FROM {} WHERE {} = ?", table, key))
            .bind(entity_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if removed == 0 {
            tx.rollback().await?;
            return Ok(None);
        }
        let version = Self::bump_version(&mut tx, entity_type, entity_id).await?;
        Self::append_change(
            &mut tx,
            entity_type,
            entity_id,
            Operation::Delete,
            version,
            None,
            Utc::now(),
        )
        .await?;
        tx.commit().await?;
        Ok(Some(version))
    }

    async fn stream_changes(&self, from_sequence: u64, limit: usize) -> Result<Vec<ChangeEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT sequence, entity_type, entity_id, operation, version, payload_json, recorded_at
            FROM change_log
            WHERE sequence > ?
            ORDER BY sequence ASC
            LIMIT ?
            "#,
        )
        .bind(from_sequence as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(change_from_row).collect()
    }

    async fn head_sequence(&self) -> Result<u64> {
        let head: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(sequence), 0) FROM change_log")
            .fetch_one(&self.pool)
            .await?;
        Ok(head as u64)
    }

    async fn scan(&self, entity_type: Option<EntityType>) -> Result<Vec<VersionedEntity>> {
        let types = match entity_type {
            Some(t) => vec![t],
            None => vec![EntityType::Artist, EntityType::Studio],
        };
        let mut out = Vec::new();
        for ty in types {
            let (table, key) = table_for(ty);
            let rows = sqlx::query(&format!(
                "SELECT version, updated_at, record_json FROM {} ORDER BY {} ASC",
                table, key
            ))
            .fetch_all(&self.pool)
            .await?;
            for row in &rows {
                out.push(versioned_from_row(row)?);
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl SyncStateStore for SqliteStore {
    async fn load_offsets(&self) -> Result<BTreeMap<u32, u64>> {
        let rows = sqlx::query("SELECT shard, sequence FROM sync_offsets")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|r| {
                let shard: i64 = r.get("shard");
                let seq: i64 = r.get("sequence");
                (shard as u32, seq as u64)
            })
            .collect())
    }

    async fn save_offset(&self, shard: u32, sequence: u64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_offsets (shard, sequence, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(shard) DO UPDATE SET
                sequence = excluded.sequence,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(shard as i64)
        .bind(sequence as i64)
        .bind(millis(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn put_dead_letter(&self, dl: &DeadLetter) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO dead_letters (dead_letter_id, sequence, event_json, error, attempts, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(dead_letter_id) DO UPDATE SET
                error = excluded.error,
                attempts = excluded.attempts,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&dl.dead_letter_id)
        .bind(dl.event.sequence as i64)
        .bind(serde_json::to_string(&dl.event)?)
        .bind(&dl.error)
        .bind(dl.attempts as i64)
        .bind(millis(dl.created_at))
        .bind(millis(dl.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_dead_letter(&self, dead_letter_id: &str) -> Result<Option<DeadLetter>> {
        let row = sqlx::query(
            "SELECT dead_letter_id, event_json, error, attempts, created_at, updated_at FROM dead_letters WHERE dead_letter_id = ?",
        )
        .bind(dead_letter_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(dead_letter_from_row).transpose()
    }

    async fn list_dead_letters(&self) -> Result<Vec<DeadLetter>> {
        let rows = sqlx::query(
            "SELECT dead_letter_id, event_json, error, attempts, created_at, updated_at FROM dead_letters ORDER BY sequence ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(dead_letter_from_row).collect()
    }

    async fn remove_dead_letter(&self, dead_letter_id: &str) -> Result<bool> {
        let removed = sqlx::query("DELETE FROM dead_letters WHERE dead_letter_id = ?")
            .bind(dead_letter_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(removed > 0)
    }
}

fn dead_letter_from_row(row: &SqliteRow) -> Result<DeadLetter> {
    let event_json: String = row.get("event_json");
    let attempts: i64 = row.get("attempts");
    Ok(DeadLetter {
        dead_letter_id: row.get("dead_letter_id"),
        event: serde_json::from_str(&event_json).context("corrupt dead letter event")?,
        error: row.get("error"),
        attempts: attempts as u32,
        created_at: from_millis(row.get("created_at")),
        updated_at: from_millis(row.get("updated_at")),
    })
}

/// SQLite implementation of the search index.
///
/// Every write runs its version check and its write inside one
/// `BEGIN IMMEDIATE` transaction, so the check holds across processes
/// sharing the database file (`sync --follow` next to `reconcile`).
pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// A pooled connection holding SQLite's writer lock.
    async fn begin_immediate(&self) -> Result<PoolConnection<Sqlite>> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        Ok(conn)
    }
}

/// Commit on success, roll back on failure.
async fn finish_immediate<T>(conn: &mut SqliteConnection, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => match sqlx::query("COMMIT").execute(&mut *conn).await {
            Ok(_) => Ok(value),
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(e.into())
            }
        },
        Err(e) => {
            let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
            Err(e)
        }
    }
}

/// `(live version, tombstone version)` of a document.
async fn seen_version(
    conn: &mut SqliteConnection,
    doc_id: &str,
) -> Result<(Option<u64>, Option<u64>)> {
    let live: Option<i64> =
        sqlx::query_scalar("SELECT version FROM index_documents WHERE doc_id = ?")
            .bind(doc_id)
            .fetch_optional(&mut *conn)
            .await?;
    let dead: Option<i64> =
        sqlx::query_scalar("SELECT version FROM index_tombstones WHERE doc_id = ?")
            .bind(doc_id)
            .fetch_optional(&mut *conn)
            .await?;
    Ok((live.map(|v| v as u64), dead.map(|v| v as u64)))
}

async fn upsert_locked(
    conn: &mut SqliteConnection,
    doc: &IndexDocument,
    mode: WriteMode,
) -> Result<WriteOutcome> {
    let (live, dead) = seen_version(conn, &doc.doc_id).await?;
    if !mode.accepts(doc.version, live.max(dead)) {
        return Ok(WriteOutcome::Stale);
    }
    sqlx::query(
        r#"
        INSERT INTO index_documents (doc_id, entity_type, entity_id, version, group_key, sort_key, delisted, doc_json)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(doc_id) DO UPDATE SET
            version = excluded.version,
            group_key = excluded.group_key,
            sort_key = excluded.sort_key,
            delisted = excluded.delisted,
            doc_json = excluded.doc_json
        "#,
    )
    .bind(&doc.doc_id)
    .bind(doc.entity_type.as_str())
    .bind(&doc.entity_id)
    .bind(doc.version as i64)
    .bind(&doc.group_key)
    .bind(&doc.sort_key)
    .bind(doc.delisted)
    .bind(serde_json::to_string(doc)?)
    .execute(&mut *conn)
    .await?;
    sqlx::query("DELETE FROM index_tombstones WHERE doc_id = ?")
        .bind(&doc.doc_id)
        .execute(&mut *conn)
        .await?;
    Ok(WriteOutcome::Applied)
}

async fn delete_locked(
    conn: &mut SqliteConnection,
    doc_id: &str,
    version: u64,
) -> Result<WriteOutcome> {
    let (live, dead) = seen_version(conn, doc_id).await?;
    if matches!(live, Some(v) if v > version) {
        return Ok(WriteOutcome::Stale);
    }
    sqlx::query("DELETE FROM index_documents WHERE doc_id = ?")
        .bind(doc_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query(
        r#"
        INSERT INTO index_tombstones (doc_id, version, deleted_at)
        VALUES (?, ?, ?)
        ON CONFLICT(doc_id) DO UPDATE SET
            version = MAX(version, excluded.version),
            deleted_at = excluded.deleted_at
        "#,
    )
    .bind(doc_id)
    .bind(version.max(dead.unwrap_or(0)) as i64)
    .bind(millis(Utc::now()))
    .execute(&mut *conn)
    .await?;
    Ok(if live.is_some() {
        WriteOutcome::Applied
    } else {
        WriteOutcome::NotFound
    })
}

async fn set_delisted_locked(
    conn: &mut SqliteConnection,
    doc_id: &str,
    delisted: bool,
) -> Result<bool> {
    let row = sqlx::query("SELECT doc_json FROM index_documents WHERE doc_id = ?")
        .bind(doc_id)
        .fetch_optional(&mut *conn)
        .await?;
    let Some(mut doc) = row.as_ref().map(document_from_row).transpose()? else {
        return Ok(false);
    };
    doc.delisted = delisted;
    sqlx::query("UPDATE index_documents SET delisted = ?, doc_json = ? WHERE doc_id = ?")
        .bind(delisted)
        .bind(serde_json::to_string(&doc)?)
        .bind(doc_id)
        .execute(&mut *conn)
        .await?;
    Ok(true)
}

fn document_from_row(row: &SqliteRow) -> Result<IndexDocument> {
    let json: String = row.get("doc_json");
    serde_json::from_str(&json).map_err(|e| anyhow!("corrupt index document: {}", e))
}

#[async_trait]
impl SearchIndex for SqliteIndex {
    async fn upsert_document(&self, doc: &IndexDocument, mode: WriteMode) -> Result<WriteOutcome> {
        let mut conn = self.begin_immediate().await?;
        let result = upsert_locked(&mut conn, doc, mode).await;
        finish_immediate(&mut conn, result).await
    }

    async fn delete_document(&self, doc_id: &str, version: u64) -> Result<WriteOutcome> {
        let mut conn = self.begin_immediate().await?;
        let result = delete_locked(&mut conn, doc_id, version).await;
        finish_immediate(&mut conn, result).await
    }

    async fn get_document(&self, doc_id: &str) -> Result<Option<IndexDocument>> {
        let row = sqlx::query("SELECT doc_json FROM index_documents WHERE doc_id = ?")
            .bind(doc_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(document_from_row).transpose()
    }

    async fn scan(&self) -> Result<Vec<IndexDocument>> {
        let rows = sqlx::query("SELECT doc_json FROM index_documents ORDER BY doc_id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(document_from_row).collect()
    }

    async fn set_delisted(&self, doc_id: &str, delisted: bool) -> Result<bool> {
        let mut conn = self.begin_immediate().await?;
        let result = set_delisted_locked(&mut conn, doc_id, delisted).await;
        finish_immediate(&mut conn, result).await
    }

    async fn find(&self, filter: &DocumentFilter) -> Result<Vec<IndexDocument>> {
        let entity_type = filter.entity_type.map(|t| t.as_str());
        let rows = sqlx::query(
            r#"
            SELECT doc_json FROM index_documents
            WHERE (?1 IS NULL OR entity_type = ?1)
              AND (?2 OR delisted = 0)
            ORDER BY sort_key ASC, doc_id ASC
            "#,
        )
        .bind(entity_type)
        .bind(filter.include_delisted)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::new();
        for row in &rows {
            let doc = document_from_row(row)?;
            if filter.matches(&doc) {
                out.push(doc);
                if filter.limit.is_some_and(|l| out.len() >= l) {
                    break;
                }
            }
        }
        Ok(out)
    }
}
