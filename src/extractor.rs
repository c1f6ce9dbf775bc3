//! Studio website → portfolio candidates.
//!
//! [`Extractor::extract`] fetches one studio page (rate limited, retried
//! under the shared [`RetryPolicy`]) and hands the markup to
//! [`extract_candidates`], a pure best-effort link scan:
//!
//! 1. every `href` value is collected, quoted or not, so unbalanced or
//!    unclosed tags do not hide later links;
//! 2. links whose host is one of `extract.portfolio_hosts` (or a subdomain)
//!    are reduced to `host/handle`;
//! 3. non-profile paths (`/p/`, `/explore/`, `/reel/`, `/stories/`, ...),
//!    the studio's own account, and configured deny handles are dropped;
//! 4. short link text becomes the display-name hint.
//!
//! Output is ordered by first appearance and ids are derived from
//! `(source_id, normalized url)`, so identical markup always yields
//! identical candidates.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use inkdex_core::error::{ErrorKind, PipelineError};
use inkdex_core::models::{ProfileCandidate, Source};
use inkdex_core::normalize::{
    canonical_portfolio_url, candidate_id, host_of, normalize_portfolio_url,
};
use regex::Regex;
use tracing::{debug, warn};

use crate::config::ExtractConfig;
use crate::fetch::Fetcher;
use crate::ratelimit::HostRateLimiter;
use crate::retry::RetryPolicy;

/// First path segments that never name an account.
const NON_PROFILE_PATHS: &[&str] = &[
    "p", "explore", "reel", "reels", "stories", "tv", "accounts", "about", "legal", "developer",
    "direct", "privacy", "web", "share", "tags",
];

/// Link text longer than this is page copy, not a name.
const MAX_HINT_CHARS: usize = 60;

/// Successful extraction of one source.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub source_id: String,
    pub candidates: Vec<ProfileCandidate>,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionFailure {
    pub source_id: String,
    pub reason: String,
    pub kind: ErrorKind,
    pub attempts: u32,
}

/// Which links count as portfolios, and which accounts to skip.
#[derive(Debug, Clone)]
pub struct LinkRules {
    hosts: Vec<String>,
    deny_handles: HashSet<String>,
}

impl LinkRules {
    pub fn new(hosts: &[String], deny_handles: &[String]) -> Self {
        Self {
            hosts: hosts
                .iter()
                .filter_map(|h| normalize_portfolio_url(h))
                .map(|h| host_of(&h).to_string())
                .collect(),
            deny_handles: deny_handles.iter().map(|h| compact(h)).collect(),
        }
    }

    pub fn from_config(config: &ExtractConfig) -> Self {
        Self::new(&config.portfolio_hosts, &config.deny_handles)
    }

    fn is_portfolio_host(&self, host: &str) -> bool {
        self.hosts
            .iter()
            .any(|h| host == h || host.ends_with(&format!(".{}", h)))
    }
}

impl Default for LinkRules {
    fn default() -> Self {
        Self::new(&["instagram.com".to_string()], &[])
    }
}

fn href_regex() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)\bhref\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
            .unwrap_or_else(|e| panic!("invalid href pattern: {}", e))
    })
}

fn tag_regex() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"<[^>]*>").unwrap_or_else(|e| panic!("invalid tag pattern: {}", e))
    })
}

/// Lowercase alphanumerics only: `"Black Anchor_Tattoo"` → `"blackanchortattoo"`.
fn compact(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Handles a studio is likely to use for its own account.
fn studio_handles(source: &Source) -> HashSet<String> {
    let mut own = HashSet::new();
    let name = compact(&source.display_name);
    if !name.is_empty() {
        own.insert(name);
    }
    if let Some(site) = normalize_portfolio_url(&source.website_url) {
        let host = host_of(&site);
        if let Some(label) = host.split('.').next() {
            let label = compact(label);
            if !label.is_empty() {
                own.insert(label);
            }
        }
    }
    own
}

fn is_valid_handle(handle: &str) -> bool {
    !handle.is_empty()
        && handle.len() <= 30
        && handle
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_')
}

/// Text between the end of the anchor's opening tag and the next `</a`.
fn link_text(html: &str, after_href: usize) -> Option<String> {
    let rest = &html[after_href..];
    let open_end = rest.find('>')?;
    let rest = &rest[open_end + 1..];
    let close = rest
        .to_ascii_lowercase()
        .find("</a")
        .unwrap_or_else(|| rest.len().min(200));
    let inner = rest.get(..close)?;
    let text = tag_regex().replace_all(inner, " ");
    let text = decode_entities(&text);
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let text = text.trim_start_matches('@').trim().to_string();
    if text.is_empty() || text.chars().count() > MAX_HINT_CHARS {
        None
    } else {
        Some(text)
    }
}

pub(crate) fn decode_entities(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
}

/// Scan `html` for portfolio links of `source`. Pure and deterministic.
pub fn extract_candidates(source: &Source, html: &str, rules: &LinkRules) -> Vec<ProfileCandidate> {
    let own = studio_handles(source);
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<ProfileCandidate> = Vec::new();

    for caps in href_regex().captures_iter(html) {
        let Some(m) = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)) else {
            continue;
        };
        let href = decode_entities(m.as_str());
        let Some(normalized) = normalize_portfolio_url(&href) else {
            continue;
        };
        let host = host_of(&normalized);
        if !rules.is_portfolio_host(host) {
            continue;
        }
        let Some(first) = normalized.split('/').nth(1) else {
            continue;
        };
        let handle = first.trim_start_matches('@');
        if NON_PROFILE_PATHS.contains(&handle) || !is_valid_handle(handle) {
            continue;
        }
        let key = compact(handle);
        if own.contains(&key) || rules.deny_handles.contains(&key) {
            debug!(source_id = %source.source_id, handle, "skipping studio/denied handle");
            continue;
        }

        // Keep the `@`: on hosts that use it, the profile path needs it.
        let profile = format!("{}/{}", host, first);
        let hint = link_text(html, m.end());
        match seen.get(&profile) {
            Some(&i) => {
                if out[i].display_name_hint.is_none() {
                    out[i].display_name_hint = hint;
                }
            }
            None => {
                seen.insert(profile.clone(), out.len());
                out.push(ProfileCandidate {
                    candidate_id: candidate_id(&source.source_id, &profile),
                    source_id: source.source_id.clone(),
                    portfolio_url: canonical_portfolio_url(&profile),
                    display_name_hint: hint,
                });
            }
        }
    }
    out
}

/// Fetches studio pages and extracts candidates.
pub struct Extractor {
    fetcher: Arc<dyn Fetcher>,
    limiter: Arc<HostRateLimiter>,
    retry: RetryPolicy,
    timeout: Duration,
    rules: LinkRules,
}

impl Extractor {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        limiter: Arc<HostRateLimiter>,
        retry: RetryPolicy,
        timeout: Duration,
        rules: LinkRules,
    ) -> Self {
        Self {
            fetcher,
            limiter,
            retry,
            timeout,
            rules,
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<String, PipelineError> {
        self.limiter.until_ready(url).await;
        match tokio::time::timeout(self.timeout, self.fetcher.get(url, self.timeout)).await {
            Ok(Ok(resp)) => Ok(resp.body),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(PipelineError::TransientNetwork(format!(
                "timed out after {:?} fetching {}",
                self.timeout, url
            ))),
        }
    }

    /// Extract one source. Never panics; every failure is returned.
    pub async fn extract(&self, source: &Source) -> Result<Extraction, ExtractionFailure> {
        let url = source.website_url.trim();
        if normalize_portfolio_url(url).is_none() {
            return Err(ExtractionFailure {
                source_id: source.source_id.clone(),
                reason: format!("invalid website url: '{}'", source.website_url),
                kind: ErrorKind::TerminalSource,
                attempts: 0,
            });
        }

        let (result, attempts) = self.retry.run("extract", |_| self.fetch_once(url)).await;
        match result {
            Ok(html) => {
                let candidates = extract_candidates(source, &html, &self.rules);
                debug!(
                    source_id = %source.source_id,
                    candidates = candidates.len(),
                    attempts,
                    "extracted"
                );
                Ok(Extraction {
                    source_id: source.source_id.clone(),
                    candidates,
                    attempts,
                })
            }
            Err(err) => {
                warn!(source_id = %source.source_id, attempts, error = %err, "extraction failed");
                let reason = if err.is_retryable() {
                    format!("{} (gave up after {} attempts)", err, attempts)
                } else {
                    err.to_string()
                };
                Err(ExtractionFailure {
                    source_id: source.source_id.clone(),
                    reason,
                    kind: err.kind(),
                    attempts,
                })
            }
        }
    }
}
