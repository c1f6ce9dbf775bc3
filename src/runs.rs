//! Persisted pipeline run history (`pipeline_runs`).

use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};

use crate::orchestrator::RunSummary;

/// Insert or replace a run's summary.
pub async fn save_run(pool: &SqlitePool, summary: &RunSummary) -> Result<()> {
    let json = serde_json::to_string(summary)?;
    sqlx::query(
        r#"
        INSERT INTO pipeline_runs (run_id, query, state, started_at, finished_at, summary_json)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(run_id) DO UPDATE SET
            state = excluded.state,
            finished_at = excluded.finished_at,
            summary_json = excluded.summary_json
        "#,
    )
    .bind(&summary.run_id)
    .bind(&summary.query)
    .bind(summary.state.as_str())
    .bind(summary.started_at.timestamp_millis())
    .bind(summary.finished_at.timestamp_millis())
    .bind(json)
    .execute(pool)
    .await?;
    Ok(())
}

/// Most recent runs first.
pub async fn recent_runs(pool: &SqlitePool, limit: i64) -> Result<Vec<RunSummary>> {
    let rows = sqlx::query(
        "SELECT run_id, summary_json FROM pipeline_runs ORDER BY started_at DESC, run_id LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let run_id: String = row.get("run_id");
            let json: String = row.get("summary_json");
            serde_json::from_str(&json)
                .with_context(|| format!("corrupt summary for run {}", run_id))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::migrate_store;
    use crate::orchestrator::RunState;
    use chrono::{Duration, Utc};
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

    async fn pool(dir: &tempfile::TempDir) -> SqlitePool {
        let options = SqliteConnectOptions::new()
            .filename(dir.path().join("runs.db"))
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await.unwrap();
        migrate_store(&pool).await.unwrap();
        pool
    }

    fn summary(run_id: &str, offset_mins: i64) -> RunSummary {
        let started = Utc::now() - Duration::minutes(offset_mins);
        RunSummary {
            run_id: run_id.into(),
            query: "austin".into(),
            state: RunState::Completed,
            started_at: started,
            finished_at: started,
            discovered: 2,
            extracted: 2,
            deduplicated: 3,
            duplicates_dropped: 1,
            scraped: 3,
            ingested: 3,
            studios_upserted: 2,
            failed: vec![],
        }
    }

    #[tokio::test]
    async fn saves_and_lists_newest_first() {
        let tmp = tempfile::TempDir::new().unwrap();
        let pool = pool(&tmp).await;
        save_run(&pool, &summary("old", 30)).await.unwrap();
        save_run(&pool, &summary("new", 1)).await.unwrap();

        let mut replaced = summary("old", 30);
        replaced.state = RunState::Failed { partial: true };
        save_run(&pool, &replaced).await.unwrap();

        let runs = recent_runs(&pool, 10).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].run_id, "new");
        assert_eq!(runs[1].state, RunState::Failed { partial: true });
    }
}
