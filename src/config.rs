//! TOML configuration.
//!
//! Every section except `[db]` and `[index]` is optional and falls back to
//! the defaults below. [`load_config`] parses and validates the file.
//!
//! ```toml
//! [db]
//! path = "./data/inkdex.sqlite"
//!
//! [index]
//! path = "./data/index.sqlite"
//!
//! [discovery]
//! provider = "seed"            # seed | http
//! seed_file = "./config/studios.toml"
//!
//! [extract]
//! concurrency = 8
//! portfolio_hosts = ["instagram.com"]
//!
//! [sync]
//! shards = 4
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub index: IndexConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub extract: ExtractConfig,
    #[serde(default)]
    pub scrape: ScrapeConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub run: RunConfig,
}

/// Canonical store database.
#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Search index database.
#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiscoveryConfig {
    #[serde(default = "default_discovery_provider")]
    pub provider: String,
    /// Seed file for the `seed` provider.
    #[serde(default)]
    pub seed_file: Option<PathBuf>,
    /// Search endpoint for the `http` provider.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_discovery_timeout")]
    pub timeout_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            provider: default_discovery_provider(),
            seed_file: None,
            endpoint: None,
            api_key_env: default_api_key_env(),
            max_pages: default_max_pages(),
            timeout_secs: default_discovery_timeout(),
        }
    }
}

fn default_discovery_provider() -> String {
    "seed".to_string()
}
fn default_api_key_env() -> String {
    "INKDEX_DISCOVERY_API_KEY".to_string()
}
fn default_max_pages() -> u32 {
    5
}
fn default_discovery_timeout() -> u64 {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
    /// Hosts whose links count as artist portfolios.
    #[serde(default = "default_portfolio_hosts")]
    pub portfolio_hosts: Vec<String>,
    /// Handles never treated as artists (agencies, suppliers, ...).
    #[serde(default)]
    pub deny_handles: Vec<String>,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            timeout_secs: default_fetch_timeout(),
            portfolio_hosts: default_portfolio_hosts(),
            deny_handles: Vec::new(),
        }
    }
}

impl ExtractConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_concurrency() -> usize {
    8
}
fn default_fetch_timeout() -> u64 {
    15
}
fn default_portfolio_hosts() -> Vec<String> {
    vec!["instagram.com".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScrapeConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            timeout_secs: default_fetch_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl ScrapeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_user_agent() -> String {
    format!("inkdex/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Fraction of the computed delay added as uniform random jitter.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    10_000
}
fn default_jitter() -> f64 {
    0.2
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default = "default_rps")]
    pub requests_per_second: u32,
    #[serde(default = "default_burst")]
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rps(),
            burst: default_burst(),
        }
    }
}

fn default_rps() -> u32 {
    2
}
fn default_burst() -> u32 {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_shards")]
    pub shards: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_sync_max_attempts")]
    pub max_attempts: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            shards: default_shards(),
            batch_size: default_batch_size(),
            poll_interval_ms: default_poll_interval_ms(),
            max_attempts: default_sync_max_attempts(),
        }
    }
}

fn default_shards() -> u32 {
    4
}
fn default_batch_size() -> usize {
    500
}
fn default_poll_interval_ms() -> u64 {
    2_000
}
fn default_sync_max_attempts() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct RunConfig {
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            deadline_secs: default_deadline_secs(),
        }
    }
}

impl RunConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }
}

fn default_deadline_secs() -> u64 {
    1_800
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Relative seed paths are resolved against the config file's directory.
    if let Some(seed) = &config.discovery.seed_file {
        if seed.is_relative() {
            if let Some(dir) = path.parent() {
                config.discovery.seed_file = Some(dir.join(seed));
            }
        }
    }

    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    match config.discovery.provider.as_str() {
        "seed" => {
            if config.discovery.seed_file.is_none() {
                bail!("discovery.seed_file must be set when provider is 'seed'");
            }
        }
        "http" => {
            if config.discovery.endpoint.is_none() {
                bail!("discovery.endpoint must be set when provider is 'http'");
            }
        }
        other => bail!(
            "Unknown discovery provider: '{}'. Must be seed or http.",
            other
        ),
    }
    if config.discovery.max_pages == 0 {
        bail!("discovery.max_pages must be >= 1");
    }

    if config.extract.concurrency == 0 {
        bail!("extract.concurrency must be > 0");
    }
    if config.extract.portfolio_hosts.is_empty() {
        bail!("extract.portfolio_hosts must list at least one host");
    }
    if config.scrape.concurrency == 0 {
        bail!("scrape.concurrency must be > 0");
    }
    if config.extract.timeout_secs == 0 || config.scrape.timeout_secs == 0 {
        bail!("fetch timeouts must be > 0");
    }

    if config.retry.max_attempts == 0 {
        bail!("retry.max_attempts must be >= 1");
    }
    if config.retry.base_delay_ms > config.retry.max_delay_ms {
        bail!("retry.base_delay_ms must be <= retry.max_delay_ms");
    }
    if !(0.0..=1.0).contains(&config.retry.jitter) {
        bail!("retry.jitter must be in [0.0, 1.0]");
    }

    if config.rate_limit.requests_per_second == 0 || config.rate_limit.burst == 0 {
        bail!("rate_limit.requests_per_second and rate_limit.burst must be > 0");
    }

    if config.sync.shards == 0 {
        bail!("sync.shards must be >= 1");
    }
    if config.sync.batch_size == 0 {
        bail!("sync.batch_size must be > 0");
    }
    if config.sync.max_attempts == 0 {
        bail!("sync.max_attempts must be >= 1");
    }

    if config.run.deadline_secs == 0 {
        bail!("run.deadline_secs must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[db]
path = "./data/inkdex.sqlite"

[index]
path = "./data/index.sqlite"

[discovery]
seed_file = "studios.toml"
"#;

    fn write_config(body: &str) -> (tempfile::TempDir, PathBuf) {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("inkdex.toml");
        std::fs::write(&path, body).unwrap();
        (tmp, path)
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let (tmp, path) = write_config(MINIMAL);
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.extract.portfolio_hosts, vec!["instagram.com"]);
        assert_eq!(cfg.sync.shards, 4);
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(
            cfg.discovery.seed_file.as_deref(),
            Some(tmp.path().join("studios.toml").as_path())
        );
    }

    #[test]
    fn rejects_zero_shards() {
        let (_tmp, path) = write_config(&format!("{}\n[sync]\nshards = 0\n", MINIMAL));
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("sync.shards"));
    }

    #[test]
    fn http_provider_requires_endpoint() {
        let body = MINIMAL.replace("seed_file = \"studios.toml\"", "provider = \"http\"");
        let (_tmp, path) = write_config(&body);
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("discovery.endpoint"));
    }

    #[test]
    fn rejects_jitter_out_of_range() {
        let (_tmp, path) = write_config(&format!("{}\n[retry]\njitter = 1.5\n", MINIMAL));
        assert!(load_config(&path).is_err());
    }
}
