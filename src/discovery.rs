//! Discovery sources: where studios come from.
//!
//! The discovery service is opaque to the pipeline; it only needs
//! [`DiscoverySource::search`]. Two implementations ship:
//!
//! - [`HttpDiscovery`]: a paginated JSON search API. Follows
//!   `next_page_token` up to `discovery.max_pages` pages. A failing first
//!   page fails the search; a failing later page ends it early, keeping the
//!   studios found so far and reporting the page as a discovery failure.
//! - [`SeedDiscovery`]: a TOML file of studios, filtered by query. Used for
//!   offline runs and tests.
//!
//! Seed file format:
//!
//! ```toml
//! [[studios]]
//! source_id = "black-anchor"
//! display_name = "Black Anchor Tattoo"
//! website_url = "https://blackanchor.example"
//! address = { city = "Austin", region = "TX" }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use inkdex_core::error::PipelineError;
use inkdex_core::models::{ItemFailure, Source, Stage};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::{Config, DiscoveryConfig};
use crate::fetch::check_status;
use crate::retry::RetryPolicy;

/// Studios found by one search, plus the parts of the search that failed
/// without sinking it.
#[derive(Debug, Default)]
pub struct Discovered {
    pub sources: Vec<Source>,
    pub failures: Vec<ItemFailure>,
}

impl From<Vec<Source>> for Discovered {
    fn from(sources: Vec<Source>) -> Self {
        Self {
            sources,
            failures: Vec::new(),
        }
    }
}

#[async_trait]
pub trait DiscoverySource: Send + Sync {
    /// Human-readable name for logs and summaries.
    fn name(&self) -> &str;

    /// Studios matching `query`. An error here fails the whole run.
    async fn search(&self, query: &str) -> Result<Discovered>;
}

/// Build the discovery source selected by `[discovery].provider`.
pub fn from_config(config: &Config) -> Result<Box<dyn DiscoverySource>> {
    match config.discovery.provider.as_str() {
        "seed" => {
            let path = config
                .discovery
                .seed_file
                .clone()
                .context("discovery.seed_file is not set")?;
            Ok(Box::new(SeedDiscovery::new(path)))
        }
        "http" => Ok(Box::new(HttpDiscovery::new(
            &config.discovery,
            &config.scrape.user_agent,
            RetryPolicy::from_config(&config.retry),
        )?)),
        other => bail!("Unknown discovery provider: '{}'", other),
    }
}

#[derive(Debug, Deserialize)]
struct SeedFile {
    #[serde(default)]
    studios: Vec<Source>,
}

pub struct SeedDiscovery {
    path: PathBuf,
}

impl SeedDiscovery {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(path: &Path) -> Result<Vec<Source>> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read seed file: {}", path.display()))?;
        let seed: SeedFile = toml::from_str(&content)
            .with_context(|| format!("Failed to parse seed file: {}", path.display()))?;
        Ok(seed.studios)
    }
}

/// Case-insensitive match of `query` against a studio's name and location.
/// An empty query or `*` matches everything.
pub fn matches_query(source: &Source, query: &str) -> bool {
    let q = query.trim().to_lowercase();
    if q.is_empty() || q == "*" {
        return true;
    }
    let mut haystack = vec![source.display_name.to_lowercase()];
    if let Some(addr) = &source.address {
        haystack.push(addr.one_line().to_lowercase());
    }
    q.split_whitespace()
        .all(|term| haystack.iter().any(|h| h.contains(term)))
}

#[async_trait]
impl DiscoverySource for SeedDiscovery {
    fn name(&self) -> &str {
        "seed"
    }

    async fn search(&self, query: &str) -> Result<Discovered> {
        let all = Self::load(&self.path)?;
        let total = all.len();
        let found: Vec<Source> = all.into_iter().filter(|s| matches_query(s, query)).collect();
        debug!(seed = %self.path.display(), total, matched = found.len(), "seed discovery");
        Ok(found.into())
    }
}

/// One page of the discovery API response.
#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    results: Vec<Source>,
    #[serde(default)]
    next_page_token: Option<String>,
}

pub struct HttpDiscovery {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    max_pages: u32,
    retry: RetryPolicy,
}

impl HttpDiscovery {
    pub fn new(config: &DiscoveryConfig, user_agent: &str, retry: RetryPolicy) -> Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .context("discovery.endpoint is not set")?;
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint,
            api_key: std::env::var(&config.api_key_env).ok(),
            max_pages: config.max_pages,
            retry,
        })
    }

    async fn fetch_page(
        &self,
        query: &str,
        page_token: Option<&str>,
    ) -> Result<SearchPage, PipelineError> {
        let mut request = self.client.get(&self.endpoint).query(&[("query", query)]);
        if let Some(token) = page_token {
            request = request.query(&[("page_token", token)]);
        }
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PipelineError::TransientNetwork(format!("discovery request failed: {}", e)))?;
        check_status(&self.endpoint, response.status().as_u16())?;
        response
            .json::<SearchPage>()
            .await
            .map_err(|e| PipelineError::TerminalSource(format!("malformed discovery response: {}", e)))
    }
}

#[async_trait]
impl DiscoverySource for HttpDiscovery {
    fn name(&self) -> &str {
        "http"
    }

    async fn search(&self, query: &str) -> Result<Discovered> {
        let mut found = Discovered::default();
        let mut token: Option<String> = None;

        for page in 1..=self.max_pages {
            let (result, attempts) = self
                .retry
                .run("discovery", |_| self.fetch_page(query, token.as_deref()))
                .await;
            let body = match result {
                Ok(body) => body,
                Err(e) if page == 1 => {
                    return Err(e)
                        .with_context(|| format!("discovery page 1 failed after {} attempts", attempts));
                }
                Err(e) => {
                    warn!(page, attempts, error = %e, kept = found.sources.len(), "discovery page failed; keeping earlier pages");
                    found.failures.push(ItemFailure {
                        stage: Stage::Discovery,
                        item_id: format!("page {}", page),
                        reason: e.to_string(),
                        kind: e.kind(),
                    });
                    break;
                }
            };
            debug!(page, results = body.results.len(), "discovery page");
            found.sources.extend(body.results);

            match body.next_page_token.filter(|t| !t.is_empty()) {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        info!(
            endpoint = %self.endpoint,
            found = found.sources.len(),
            failed_pages = found.failures.len(),
            "discovery finished"
        );
        Ok(found)
    }
}

/// Discovery over a fixed list, for tests and embedders.
pub struct StaticDiscovery {
    sources: Vec<Source>,
}

impl StaticDiscovery {
    pub fn new(sources: Vec<Source>) -> Self {
        Self { sources }
    }
}

#[async_trait]
impl DiscoverySource for StaticDiscovery {
    fn name(&self) -> &str {
        "static"
    }

    async fn search(&self, query: &str) -> Result<Discovered> {
        let found: Vec<Source> = self
            .sources
            .iter()
            .filter(|s| matches_query(s, query))
            .cloned()
            .collect();
        Ok(found.into())
    }
}
