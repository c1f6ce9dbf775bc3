//! Catalog statistics and health overview.
//!
//! A quick summary of what the store and the index hold: record counts,
//! delisted records, feed size, dead letters, and the latest runs. Used by
//! `inkdex stats` to give confidence that discovery and sync are working.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;
use crate::runs;

/// Run the stats command: query both databases and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let store = db::open_store(config).await?;
    let index = db::open_index(config).await?;
    let pool = store.pool();

    let artists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM artists")
        .fetch_one(pool)
        .await?;
    let studios: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM studios")
        .fetch_one(pool)
        .await?;
    let delisted: i64 = sqlx::query_scalar(
        "SELECT (SELECT COUNT(*) FROM artists WHERE delisted = 1) + (SELECT COUNT(*) FROM studios WHERE delisted = 1)",
    )
    .fetch_one(pool)
    .await?;
    let events: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM change_log")
        .fetch_one(pool)
        .await?;
    let dead_letters: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dead_letters")
        .fetch_one(pool)
        .await?;
    let documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM index_documents")
        .fetch_one(index.pool())
        .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);
    let index_size = std::fs::metadata(&config.index.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("inkdex catalog stats");
    println!("====================");
    println!();
    println!("  Store:        {} ({})", config.db.path.display(), format_bytes(db_size));
    println!("  Index:        {} ({})", config.index.path.display(), format_bytes(index_size));
    println!();
    println!("  Artists:      {}", artists);
    println!("  Studios:      {}", studios);
    println!("  Delisted:     {}", delisted);
    println!("  Index docs:   {}", documents);
    println!("  Feed events:  {}", events);
    println!("  Dead letters: {}", dead_letters);

    // Per-city breakdown of indexed artists
    let city_rows = sqlx::query(
        r#"
        SELECT group_key, COUNT(*) AS n
        FROM index_documents
        WHERE group_key LIKE 'artist|%' AND delisted = 0
        GROUP BY group_key
        ORDER BY n DESC, group_key ASC
        LIMIT 10
        "#,
    )
    .fetch_all(index.pool())
    .await?;
    if !city_rows.is_empty() {
        println!();
        println!("  Artists by city:");
        for row in &city_rows {
            let key: String = row.get("group_key");
            let n: i64 = row.get("n");
            let city = key.split_once('|').map(|(_, c)| c).unwrap_or(&key);
            println!("  {:<24} {:>6}", city, n);
        }
    }

    let recent = runs::recent_runs(pool, 5).await?;
    if !recent.is_empty() {
        println!();
        println!("  Recent runs:");
        println!(
            "  {:<16} {:<16} {:>6} {:>8} {:>7}   {}",
            "QUERY", "STATE", "FOUND", "INGESTED", "FAILED", "STARTED"
        );
        println!("  {}", "-".repeat(76));
        for run in &recent {
            println!(
                "  {:<16} {:<16} {:>6} {:>8} {:>7}   {}",
                truncate(&run.query, 16),
                run.state.as_str(),
                run.discovered,
                run.ingested,
                run.failed.len(),
                format_ts_relative(run.started_at.timestamp())
            );
        }
    }
    println!();

    store.pool().close().await;
    index.pool().close().await;
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }
    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_and_relative_times() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 7200), "2 hours ago");
        assert_eq!(truncate("black anchor austin", 8), "black a…");
    }
}
