//! Pipeline orchestrator: one discovery run from query to canonical store.
//!
//! ```text
//! Discovering ─▶ Extracting ─▶ Deduplicating ─▶ Scraping ─▶ Ingesting ─▶ Completed
//!      │              │                             │            │
//!      ▼              └──────── deadline ───────────┴────────────┴─▶ Failed { partial }
//!    error
//! ```
//!
//! Each stage produces its own result; the orchestrator folds them into one
//! [`RunSummary`] at the end. Item-level failures are collected into
//! `RunSummary::failed` and never stop the run. Only a failing first
//! discovery page is a run-level error.
//!
//! When the run deadline passes, in-flight work is dropped and the run ends
//! as `Failed { partial: true }`. Records already ingested stay committed;
//! every item the deadline cut off is listed in `failed` as cancelled.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use inkdex_core::dedup::deduplicate;
use inkdex_core::error::ErrorKind;
use inkdex_core::models::{ItemFailure, ProfileCandidate, Source, Stage};
use inkdex_core::store::CanonicalStore;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::Config;
use crate::db;
use crate::discovery::{self, DiscoverySource};
use crate::extractor::{Extraction, ExtractionFailure, Extractor, LinkRules};
use crate::fetch::{Fetcher, HttpFetcher};
use crate::ingest::IngestionWriter;
use crate::progress::{NoProgress, ProgressMode, RunProgressEvent, RunProgressReporter};
use crate::ratelimit::HostRateLimiter;
use crate::retry::RetryPolicy;
use crate::runs;
use crate::scrape::ScrapePool;

/// Where a run is, or how it ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Discovering,
    Extracting,
    Deduplicating,
    Scraping,
    Ingesting,
    Completed,
    Failed { partial: bool },
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Discovering => "discovering",
            RunState::Extracting => "extracting",
            RunState::Deduplicating => "deduplicating",
            RunState::Scraping => "scraping",
            RunState::Ingesting => "ingesting",
            RunState::Completed => "completed",
            RunState::Failed { partial: true } => "failed_partial",
            RunState::Failed { partial: false } => "failed",
        }
    }
}

/// Result of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub query: String,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub discovered: usize,
    pub extracted: usize,
    /// Unique candidates left after deduplication.
    pub deduplicated: usize,
    pub duplicates_dropped: usize,
    pub scraped: usize,
    pub ingested: usize,
    pub studios_upserted: usize,
    pub failed: Vec<ItemFailure>,
}

/// Output of the extraction stage.
#[derive(Debug, Default)]
struct ExtractStage {
    extractions: Vec<Extraction>,
    failures: Vec<ItemFailure>,
    deadline_hit: bool,
}

pub struct Pipeline {
    discovery: Arc<dyn DiscoverySource>,
    extractor: Extractor,
    scraper: ScrapePool,
    writer: IngestionWriter,
    extract_concurrency: usize,
    extract_task_timeout: Duration,
    deadline: Duration,
    progress: Box<dyn RunProgressReporter>,
}

impl Pipeline {
    pub fn new(
        discovery: Arc<dyn DiscoverySource>,
        extractor: Extractor,
        scraper: ScrapePool,
        writer: IngestionWriter,
        config: &Config,
    ) -> Self {
        let retry = RetryPolicy::from_config(&config.retry);
        let attempts = retry.max_attempts.max(1);
        let extract_task_timeout =
            config.extract.timeout() * attempts + retry.max_delay * attempts;
        Self {
            discovery,
            extractor,
            scraper,
            writer,
            extract_concurrency: config.extract.concurrency.max(1),
            extract_task_timeout,
            deadline: config.run.deadline(),
            progress: Box::new(NoProgress),
        }
    }

    /// Wire the production pipeline: configured discovery, HTTP fetcher,
    /// shared per-host rate limiter.
    pub fn from_config(config: &Config, store: Arc<dyn CanonicalStore>) -> Result<Self> {
        let discovery: Arc<dyn DiscoverySource> = Arc::from(discovery::from_config(config)?);
        let fetcher: Arc<dyn Fetcher> = Arc::new(
            HttpFetcher::new(&config.scrape.user_agent).context("Failed to build HTTP client")?,
        );
        let limiter = Arc::new(HostRateLimiter::new(&config.rate_limit));
        let retry = RetryPolicy::from_config(&config.retry);

        let extractor = Extractor::new(
            fetcher.clone(),
            limiter.clone(),
            retry.clone(),
            config.extract.timeout(),
            LinkRules::from_config(&config.extract),
        );
        let scraper = ScrapePool::new(
            fetcher,
            limiter,
            retry,
            config.scrape.timeout(),
            config.scrape.concurrency,
        );
        Ok(Self::new(
            discovery,
            extractor,
            scraper,
            IngestionWriter::new(store),
            config,
        ))
    }

    pub fn with_progress(mut self, progress: Box<dyn RunProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_extract_task_timeout(mut self, timeout: Duration) -> Self {
        self.extract_task_timeout = timeout;
        self
    }

    /// Run the whole pipeline for `query`.
    ///
    /// Returns `Err` only when discovery itself fails.
    pub async fn run(&self, query: &str) -> Result<RunSummary> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let deadline = Instant::now() + self.deadline;
        info!(%run_id, query, discovery = self.discovery.name(), "run started");

        // Discovering
        self.progress.report(RunProgressEvent::StageStarted {
            stage: Stage::Discovery,
            total: None,
        });
        let discovered = tokio::time::timeout_at(deadline, self.discovery.search(query))
            .await
            .map_err(|_| anyhow::anyhow!("discovery did not finish before the run deadline"))?
            .with_context(|| format!("discovery via '{}' failed", self.discovery.name()))?;
        let sources = discovered.sources;
        self.progress.report(RunProgressEvent::StageFinished {
            stage: Stage::Discovery,
            ok: sources.len() as u64,
            failed: discovered.failures.len() as u64,
        });

        let mut summary = RunSummary {
            run_id,
            query: query.to_string(),
            state: RunState::Discovering,
            started_at,
            finished_at: started_at,
            discovered: sources.len(),
            extracted: 0,
            deduplicated: 0,
            duplicates_dropped: 0,
            scraped: 0,
            ingested: 0,
            studios_upserted: 0,
            failed: discovered.failures,
        };
        if sources.is_empty() {
            info!(run_id = %summary.run_id, "discovery returned no studios");
            return Ok(finish(summary, RunState::Completed));
        }

        // Extracting
        summary.state = RunState::Extracting;
        let extract = self.extract_all(&sources, deadline).await;
        summary.extracted = extract.extractions.len();
        summary.failed.extend(extract.failures);
        if extract.deadline_hit {
            return Ok(finish(summary, RunState::Failed { partial: true }));
        }

        // Deduplicating
        summary.state = RunState::Deduplicating;
        let candidates: Vec<ProfileCandidate> = extract
            .extractions
            .into_iter()
            .flat_map(|e| e.candidates)
            .collect();
        let dedup = deduplicate(candidates);
        summary.deduplicated = dedup.unique.len();
        summary.duplicates_dropped = dedup.duplicates_dropped;

        // Scraping
        summary.state = RunState::Scraping;
        self.progress.report(RunProgressEvent::StageStarted {
            stage: Stage::Scrape,
            total: Some(dedup.unique.len() as u64),
        });
        let scraped = self
            .scraper
            .run_with_progress(dedup.unique, deadline, self.progress.as_ref())
            .await;
        summary.scraped = scraped.records.len();
        summary
            .failed
            .extend(scraped.failures.into_iter().map(|f| ItemFailure {
                stage: Stage::Scrape,
                item_id: f.portfolio_url,
                reason: f.reason,
                kind: f.kind,
            }));
        self.progress.report(RunProgressEvent::StageFinished {
            stage: Stage::Scrape,
            ok: summary.scraped as u64,
            failed: count_stage(&summary.failed, Stage::Scrape),
        });
        if scraped.deadline_hit {
            summary
                .failed
                .extend(
                    scraped
                        .cancelled
                        .into_iter()
                        .map(|c| ItemFailure::cancelled(Stage::Scrape, c.portfolio_url)),
                );
            return Ok(finish(summary, RunState::Failed { partial: true }));
        }

        // Ingesting
        summary.state = RunState::Ingesting;
        let records = scraped.records.into_iter().map(|(_, r)| r).collect::<Vec<_>>();
        self.progress.report(RunProgressEvent::StageStarted {
            stage: Stage::Ingestion,
            total: Some(records.len() as u64),
        });
        let ingest = self.writer.ingest(records, &sources, deadline).await;
        summary.ingested = ingest.artists.len();
        summary.studios_upserted = ingest.studios.len();
        summary.failed.extend(ingest.failures);
        self.progress.report(RunProgressEvent::StageFinished {
            stage: Stage::Ingestion,
            ok: summary.ingested as u64,
            failed: count_stage(&summary.failed, Stage::Ingestion),
        });
        if ingest.skipped_for_deadline > 0 {
            return Ok(finish(summary, RunState::Failed { partial: true }));
        }

        Ok(finish(summary, RunState::Completed))
    }

    /// Fan extraction out over `sources` with bounded concurrency.
    ///
    /// Results are put back in discovery order so deduplication keeps the
    /// same first occurrence no matter which fetch finished first.
    async fn extract_all(&self, sources: &[Source], deadline: Instant) -> ExtractStage {
        let total = sources.len() as u64;
        self.progress.report(RunProgressEvent::StageStarted {
            stage: Stage::Extraction,
            total: Some(total),
        });

        let extractor = &self.extractor;
        let task_timeout = self.extract_task_timeout;
        let mut tasks = futures::stream::iter(sources.iter().enumerate())
            .map(|(i, source)| async move {
                let result = tokio::time::timeout(task_timeout, extractor.extract(source)).await;
                (i, result)
            })
            .buffer_unordered(self.extract_concurrency);

        let mut done: Vec<Option<Result<Extraction, ExtractionFailure>>> =
            sources.iter().map(|_| None).collect();
        let mut finished = 0u64;
        let mut deadline_hit = false;
        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);

        while finished < total {
            tokio::select! {
                next = tasks.next() => {
                    let Some((i, result)) = next else { break };
                    let outcome = result.unwrap_or_else(|_| {
                        Err(ExtractionFailure {
                            source_id: sources[i].source_id.clone(),
                            reason: format!("extraction timed out after {:?}", task_timeout),
                            kind: ErrorKind::TransientNetwork,
                            attempts: 0,
                        })
                    });
                    done[i] = Some(outcome);
                    finished += 1;
                    self.progress.report(RunProgressEvent::Advanced {
                        stage: Stage::Extraction,
                        done: finished,
                        total,
                    });
                }
                _ = &mut sleep => {
                    deadline_hit = true;
                    break;
                }
            }
        }
        drop(tasks);

        let mut stage = ExtractStage {
            deadline_hit,
            ..Default::default()
        };
        for (source, outcome) in sources.iter().zip(done) {
            match outcome {
                Some(Ok(extraction)) => stage.extractions.push(extraction),
                Some(Err(failure)) => stage.failures.push(ItemFailure {
                    stage: Stage::Extraction,
                    item_id: failure.source_id,
                    reason: failure.reason,
                    kind: failure.kind,
                }),
                None => stage
                    .failures
                    .push(ItemFailure::cancelled(Stage::Extraction, &source.source_id)),
            }
        }
        if deadline_hit {
            warn!(
                finished = stage.extractions.len(),
                total, "extraction deadline reached; in-flight fetches cancelled"
            );
        }
        self.progress.report(RunProgressEvent::StageFinished {
            stage: Stage::Extraction,
            ok: stage.extractions.len() as u64,
            failed: stage.failures.len() as u64,
        });
        stage
    }
}

/// CLI entry point: run the pipeline, record the run, print its summary.
pub async fn run_discover(config: &Config, query: &str, progress: ProgressMode) -> Result<RunSummary> {
    let store = Arc::new(db::open_store(config).await?);
    let pipeline = Pipeline::from_config(config, store.clone())?.with_progress(progress.reporter());
    let summary = pipeline.run(query).await;
    let summary = match summary {
        Ok(s) => s,
        Err(e) => {
            store.pool().close().await;
            return Err(e);
        }
    };
    runs::save_run(store.pool(), &summary).await?;
    store.pool().close().await;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(summary)
}

fn count_stage(failures: &[ItemFailure], stage: Stage) -> u64 {
    failures.iter().filter(|f| f.stage == stage).count() as u64
}

fn finish(mut summary: RunSummary, state: RunState) -> RunSummary {
    summary.state = state;
    summary.finished_at = Utc::now();
    info!(
        run_id = %summary.run_id,
        state = state.as_str(),
        discovered = summary.discovered,
        extracted = summary.extracted,
        deduplicated = summary.deduplicated,
        scraped = summary.scraped,
        ingested = summary.ingested,
        failed = summary.failed.len(),
        "run finished"
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_state_labels() {
        assert_eq!(RunState::Completed.as_str(), "completed");
        assert_eq!(RunState::Failed { partial: true }.as_str(), "failed_partial");
        let json = serde_json::to_string(&RunState::Failed { partial: true }).unwrap();
        assert_eq!(json, r#"{"failed":{"partial":true}}"#);
    }
}
