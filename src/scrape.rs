//! Scrape worker pool: portfolio candidates → normalized artist records.
//!
//! ```text
//!             ┌───────────── requeue (backoff) ─────────────┐
//!             ▼                                             │
//! candidates ─▶ WorkQueue ─▶ worker 1..N ─▶ fetch ─▶ parse ─┴─▶ outcomes
//!                              (rate limit, timeout)
//! ```
//!
//! The [`WorkQueue`] is the only structure the workers share. Dequeue is a
//! single locked `pop_front`, so no two workers ever hold the same job.
//! A retryable failure puts the job back with its attempt count and a
//! not-before instant from the [`RetryPolicy`]; exhausting `max_attempts`
//! turns it into a terminal failure.
//!
//! Profile pages are normalized strictly right after the fetch by
//! [`parse_profile`]: OpenGraph/meta tags and `<img>` sources are mapped into
//! the fixed [`ArtistRecord`] shape. A page without a usable display name is
//! a terminal "unparseable profile" failure.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use inkdex_core::error::{ErrorKind, PipelineError};
use inkdex_core::models::{ArtistRecord, ProfileCandidate, ScrapeStatus, Stage};
use inkdex_core::normalize::{artist_id, canonical_portfolio_url, handle_of, normalize_portfolio_url};
use inkdex_core::styles::detect_styles;
use regex::Regex;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::extractor::decode_entities;
use crate::fetch::Fetcher;
use crate::progress::{NoProgress, RunProgressEvent, RunProgressReporter};
use crate::ratelimit::HostRateLimiter;
use crate::retry::RetryPolicy;

const MAX_IMAGES: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeFailure {
    pub candidate_id: String,
    pub portfolio_url: String,
    pub reason: String,
    pub kind: ErrorKind,
    pub retryable: bool,
    pub attempts: u32,
}

#[derive(Debug, Clone)]
pub enum ScrapeOutcome {
    Scraped {
        candidate: ProfileCandidate,
        record: ArtistRecord,
        attempts: u32,
    },
    Failed(ScrapeFailure),
}

/// Everything a pool run produced. `cancelled` lists candidates that never
/// reached a terminal outcome because the deadline passed.
#[derive(Debug, Default)]
pub struct ScrapeReport {
    pub records: Vec<(ProfileCandidate, ArtistRecord)>,
    pub failures: Vec<ScrapeFailure>,
    pub cancelled: Vec<ProfileCandidate>,
    pub deadline_hit: bool,
}

#[derive(Debug, Clone)]
struct ScrapeJob {
    candidate: ProfileCandidate,
    attempts: u32,
    not_before: Option<Instant>,
}

/// Shared FIFO of scrape jobs.
pub struct WorkQueue {
    jobs: Mutex<VecDeque<ScrapeJob>>,
    /// Jobs not yet at a terminal outcome, queued or in flight.
    unfinished: AtomicUsize,
    requeued: Notify,
}

impl WorkQueue {
    fn new(candidates: Vec<ProfileCandidate>) -> Self {
        let jobs: VecDeque<ScrapeJob> = candidates
            .into_iter()
            .map(|candidate| ScrapeJob {
                candidate,
                attempts: 0,
                not_before: None,
            })
            .collect();
        Self {
            unfinished: AtomicUsize::new(jobs.len()),
            jobs: Mutex::new(jobs),
            requeued: Notify::new(),
        }
    }

    fn pop(&self) -> Option<ScrapeJob> {
        self.jobs.lock().ok()?.pop_front()
    }

    fn requeue(&self, job: ScrapeJob) {
        if let Ok(mut jobs) = self.jobs.lock() {
            jobs.push_back(job);
        }
        self.requeued.notify_waiters();
    }

    fn finish(&self) {
        if self.unfinished.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.requeued.notify_waiters();
        }
    }

    fn is_drained(&self) -> bool {
        self.unfinished.load(Ordering::SeqCst) == 0
    }
}

/// Bounded pool of scrape workers.
pub struct ScrapePool {
    fetcher: Arc<dyn Fetcher>,
    limiter: Arc<HostRateLimiter>,
    retry: RetryPolicy,
    timeout: Duration,
    concurrency: usize,
}

impl ScrapePool {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        limiter: Arc<HostRateLimiter>,
        retry: RetryPolicy,
        timeout: Duration,
        concurrency: usize,
    ) -> Self {
        Self {
            fetcher,
            limiter,
            retry,
            timeout,
            concurrency: concurrency.max(1),
        }
    }

    /// Scrape every candidate, stopping at `deadline`.
    pub async fn run(&self, candidates: Vec<ProfileCandidate>, deadline: Instant) -> ScrapeReport {
        self.run_with_progress(candidates, deadline, &NoProgress).await
    }

    /// Like [`ScrapePool::run`], reporting each finished candidate to `progress`.
    pub async fn run_with_progress(
        &self,
        candidates: Vec<ProfileCandidate>,
        deadline: Instant,
        progress: &dyn RunProgressReporter,
    ) -> ScrapeReport {
        let total = candidates.len();
        let mut report = ScrapeReport::default();
        if total == 0 {
            return report;
        }

        let all = candidates.clone();
        let queue = Arc::new(WorkQueue::new(candidates));
        let (tx, mut rx) = mpsc::unbounded_channel::<ScrapeOutcome>();
        let mut workers = JoinSet::new();

        for worker_id in 0..self.concurrency.min(total) {
            let worker = Worker {
                id: worker_id,
                queue: queue.clone(),
                fetcher: self.fetcher.clone(),
                limiter: self.limiter.clone(),
                retry: self.retry.clone(),
                timeout: self.timeout,
                tx: tx.clone(),
            };
            workers.spawn(worker.run());
        }
        drop(tx);

        let mut received = 0usize;
        while received < total {
            tokio::select! {
                outcome = rx.recv() => {
                    let Some(outcome) = outcome else { break };
                    received += 1;
                    match outcome {
                        ScrapeOutcome::Scraped { candidate, record, .. } => {
                            report.records.push((candidate, record));
                        }
                        ScrapeOutcome::Failed(failure) => {
                            report.failures.push(failure);
                        }
                    }
                    progress.report(RunProgressEvent::Advanced {
                        stage: Stage::Scrape,
                        done: received as u64,
                        total: total as u64,
                    });
                }
                _ = tokio::time::sleep_until(deadline) => {
                    report.deadline_hit = true;
                    break;
                }
            }
        }

        if report.deadline_hit {
            workers.abort_all();
            let done: HashSet<String> = report
                .records
                .iter()
                .map(|(c, _)| c.candidate_id.clone())
                .chain(report.failures.iter().map(|f| f.candidate_id.clone()))
                .collect();
            report.cancelled = all
                .into_iter()
                .filter(|c| !done.contains(&c.candidate_id))
                .collect();
            warn!(
                scraped = report.records.len(),
                failed = report.failures.len(),
                "scrape deadline reached; in-flight work cancelled"
            );
        }
        while workers.join_next().await.is_some() {}

        info!(
            total,
            scraped = report.records.len(),
            failed = report.failures.len(),
            "scrape stage finished"
        );
        report
    }
}

struct Worker {
    id: usize,
    queue: Arc<WorkQueue>,
    fetcher: Arc<dyn Fetcher>,
    limiter: Arc<HostRateLimiter>,
    retry: RetryPolicy,
    timeout: Duration,
    tx: mpsc::UnboundedSender<ScrapeOutcome>,
}

impl Worker {
    async fn run(self) {
        loop {
            let Some(mut job) = self.queue.pop() else {
                if self.queue.is_drained() {
                    break;
                }
                // Another worker may still requeue a retry.
                let _ = tokio::time::timeout(
                    Duration::from_millis(50),
                    self.queue.requeued.notified(),
                )
                .await;
                continue;
            };

            if let Some(at) = job.not_before {
                tokio::time::sleep_until(at).await;
            }
            job.attempts += 1;

            match self.scrape_once(&job.candidate).await {
                Ok(record) => {
                    self.queue.finish();
                    let _ = self.tx.send(ScrapeOutcome::Scraped {
                        candidate: job.candidate,
                        record,
                        attempts: job.attempts,
                    });
                }
                Err(err) if self.retry.should_retry(&err, job.attempts) => {
                    let delay = self.retry.backoff(job.attempts);
                    debug!(
                        worker = self.id,
                        candidate = %job.candidate.portfolio_url,
                        attempt = job.attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "requeueing scrape"
                    );
                    job.not_before = Some(Instant::now() + delay);
                    self.queue.requeue(job);
                }
                Err(err) => {
                    let exhausted = err.is_retryable();
                    let reason = if exhausted {
                        format!("{} (retries exhausted after {} attempts)", err, job.attempts)
                    } else {
                        err.to_string()
                    };
                    warn!(
                        worker = self.id,
                        candidate = %job.candidate.portfolio_url,
                        attempts = job.attempts,
                        %reason,
                        "scrape failed"
                    );
                    self.queue.finish();
                    let _ = self.tx.send(ScrapeOutcome::Failed(ScrapeFailure {
                        candidate_id: job.candidate.candidate_id.clone(),
                        portfolio_url: job.candidate.portfolio_url.clone(),
                        reason,
                        kind: err.kind(),
                        retryable: false,
                        attempts: job.attempts,
                    }));
                }
            }
        }
    }

    async fn scrape_once(&self, candidate: &ProfileCandidate) -> Result<ArtistRecord, PipelineError> {
        let url = &candidate.portfolio_url;
        self.limiter.until_ready(url).await;
        let body = match tokio::time::timeout(self.timeout, self.fetcher.get(url, self.timeout)).await {
            Ok(Ok(resp)) => resp.body,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(PipelineError::TransientNetwork(format!(
                    "timed out after {:?} fetching {}",
                    self.timeout, url
                )))
            }
        };
        parse_profile(candidate, &body)
    }
}

/// Fields pulled out of a profile page before validation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProfilePage {
    pub title: Option<String>,
    pub description: Option<String>,
    pub images: Vec<String>,
}

fn meta_regex() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<meta\b[^>]*>").unwrap_or_else(|e| panic!("invalid meta pattern: {}", e))
    })
}

fn attr_regex() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)([a-z_:-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
            .unwrap_or_else(|e| panic!("invalid attribute pattern: {}", e))
    })
}

fn title_regex() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<title[^>]*>(.*?)</title>")
            .unwrap_or_else(|e| panic!("invalid title pattern: {}", e))
    })
}

fn img_regex() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)<img\b[^>]*?\bsrc\s*=\s*["']([^"']+)["']"#)
            .unwrap_or_else(|e| panic!("invalid img pattern: {}", e))
    })
}

fn follower_prefix_regex() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^[\d.,km]+\s+followers?,.*?\s-\s")
            .unwrap_or_else(|e| panic!("invalid follower pattern: {}", e))
    })
}

fn clean(s: &str) -> Option<String> {
    let s = decode_entities(s);
    let s = s.split_whitespace().collect::<Vec<_>>().join(" ");
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Collect OpenGraph/meta fields, the `<title>`, and image sources.
pub fn read_profile_page(html: &str) -> ProfilePage {
    let mut meta: HashMap<String, String> = HashMap::new();
    let mut og_images: Vec<String> = Vec::new();

    for tag in meta_regex().find_iter(html) {
        let mut key = None;
        let mut content = None;
        for caps in attr_regex().captures_iter(tag.as_str()) {
            let name = caps[1].to_ascii_lowercase();
            let value = caps.get(2).or_else(|| caps.get(3)).map(|m| m.as_str());
            match name.as_str() {
                "property" | "name" => key = value.map(|v| v.to_ascii_lowercase()),
                "content" => content = value.map(str::to_string),
                _ => {}
            }
        }
        if let (Some(k), Some(c)) = (key, content) {
            if k == "og:image" {
                og_images.push(c);
            } else {
                meta.entry(k).or_insert(c);
            }
        }
    }

    let title = ["og:title", "twitter:title"]
        .iter()
        .find_map(|k| meta.get(*k).and_then(|v| clean(v)))
        .or_else(|| {
            title_regex()
                .captures(html)
                .and_then(|c| clean(&c[1]))
        });

    let description = ["og:description", "description", "twitter:description"]
        .iter()
        .find_map(|k| meta.get(*k).and_then(|v| clean(v)));

    let mut images: Vec<String> = Vec::new();
    let img_srcs = img_regex()
        .captures_iter(html)
        .map(|c| c[1].to_string())
        .collect::<Vec<_>>();
    for src in og_images.into_iter().chain(img_srcs) {
        let src = decode_entities(src.trim());
        if !(src.starts_with("https://") || src.starts_with("http://")) {
            continue;
        }
        if !images.contains(&src) {
            images.push(src);
        }
        if images.len() >= MAX_IMAGES {
            break;
        }
    }

    ProfilePage {
        title,
        description,
        images,
    }
}

/// `"Mara Ortega (@mara.ink) • Instagram photos and videos"` → `"Mara Ortega"`.
fn display_name_from_title(title: &str) -> Option<String> {
    let mut name = title;
    for sep in [" (@", " • ", " | ", " - ", " on Instagram"] {
        if let Some(i) = name.find(sep) {
            name = &name[..i];
        }
    }
    let name = name.trim().trim_start_matches('@').trim();
    if name.is_empty() || name.eq_ignore_ascii_case("instagram") || name.eq_ignore_ascii_case("login") {
        None
    } else {
        Some(name.to_string())
    }
}

/// Drop platform boilerplate such as `"1,234 Followers, ... - See Instagram photos ..."`.
fn bio_from_description(description: &str) -> String {
    let stripped = follower_prefix_regex().replace(description, "");
    let stripped = stripped.trim();
    if stripped.to_lowercase().starts_with("see instagram photos and videos from") {
        String::new()
    } else {
        stripped.to_string()
    }
}

/// Normalize a fetched profile page into an [`ArtistRecord`].
pub fn parse_profile(candidate: &ProfileCandidate, html: &str) -> Result<ArtistRecord, PipelineError> {
    let normalized = normalize_portfolio_url(&candidate.portfolio_url).ok_or_else(|| {
        PipelineError::Validation(format!("invalid portfolio url: {}", candidate.portfolio_url))
    })?;
    let page = read_profile_page(html);

    if page.title.is_none() && page.description.is_none() {
        return Err(PipelineError::TerminalSource(format!(
            "unparseable profile: no title or description at {}",
            candidate.portfolio_url
        )));
    }

    let display_name = page
        .title
        .as_deref()
        .and_then(display_name_from_title)
        .or_else(|| candidate.display_name_hint.clone())
        .ok_or_else(|| {
            PipelineError::TerminalSource(format!(
                "unparseable profile: no display name at {}",
                candidate.portfolio_url
            ))
        })?;

    let bio = page
        .description
        .as_deref()
        .map(bio_from_description)
        .unwrap_or_default();

    let scrape_status = if !bio.is_empty() && !page.images.is_empty() {
        ScrapeStatus::Complete
    } else {
        ScrapeStatus::Partial
    };
    let styles = detect_styles(&format!("{} {}", display_name, bio));

    Ok(ArtistRecord {
        artist_id: artist_id(&normalized),
        display_name,
        bio,
        portfolio_url: canonical_portfolio_url(&normalized),
        handle: handle_of(&normalized),
        images: page.images,
        source_studio_id: candidate.source_id.clone(),
        styles,
        last_scraped_at: Utc::now(),
        scrape_status,
        delisted: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchResponse;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    fn candidate(handle: &str) -> ProfileCandidate {
        ProfileCandidate {
            candidate_id: format!("c-{}", handle),
            source_id: "black-anchor".into(),
            portfolio_url: format!("https://instagram.com/{}", handle),
            display_name_hint: None,
        }
    }

    const PROFILE: &str = r#"
<html><head>
<title>Mara Ortega (@mara.ink) &bull; Instagram</title>
<meta property="og:title" content="Mara Ortega (@mara.ink) • Instagram photos and videos" />
<meta property="og:description" content="2,345 Followers, 120 Following, 310 Posts - Fine line &amp; blackwork. Books open." />
<meta property="og:image" content="https://cdn.example/mara/1.jpg" />
</head><body>
<img src="https://cdn.example/mara/2.jpg"><img src="/relative.png"><img src='https://cdn.example/mara/1.jpg'>
</body></html>
"#;

    #[test]
    fn parses_opengraph_profile() {
        let rec = parse_profile(&candidate("mara.ink"), PROFILE).unwrap();
        assert_eq!(rec.display_name, "Mara Ortega");
        assert_eq!(rec.bio, "Fine line & blackwork. Books open.");
        assert_eq!(
            rec.images,
            vec!["https://cdn.example/mara/1.jpg", "https://cdn.example/mara/2.jpg"]
        );
        assert_eq!(rec.handle.as_deref(), Some("mara.ink"));
        assert_eq!(rec.styles, vec!["blackwork", "fineline"]);
        assert_eq!(rec.scrape_status, ScrapeStatus::Complete);
        assert_eq!(rec.artist_id, artist_id("instagram.com/mara.ink"));
        assert_eq!(rec.source_studio_id, "black-anchor");
    }

    #[test]
    fn boilerplate_only_description_gives_partial_record() {
        let html = r#"<meta property="og:title" content="Sol (@sol_lines) • Instagram photos and videos">
<meta property="og:description" content="10 Followers, 2 Following, 1 Posts - See Instagram photos and videos from Sol (@sol_lines)">"#;
        let rec = parse_profile(&candidate("sol_lines"), html).unwrap();
        assert_eq!(rec.display_name, "Sol");
        assert_eq!(rec.bio, "");
        assert_eq!(rec.scrape_status, ScrapeStatus::Partial);
    }

    #[test]
    fn page_without_profile_fields_is_terminal() {
        let err = parse_profile(&candidate("ghost"), "<html><body>nothing</body></html>").unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("unparseable profile"));
    }

    #[test]
    fn hint_fills_missing_display_name() {
        let mut c = candidate("kai");
        c.display_name_hint = Some("Kai".into());
        let html = r#"<meta name="description" content="Japanese style, Denver">"#;
        let rec = parse_profile(&c, html).unwrap();
        assert_eq!(rec.display_name, "Kai");
        assert_eq!(rec.styles, vec!["japanese"]);
    }

    /// Fails each URL a scripted number of times, then serves a profile.
    struct FlakyFetcher {
        failures: StdMutex<HashMap<String, Vec<PipelineError>>>,
    }

    #[async_trait]
    impl Fetcher for FlakyFetcher {
        async fn get(&self, url: &str, _timeout: Duration) -> Result<FetchResponse, PipelineError> {
            let next = self
                .failures
                .lock()
                .unwrap()
                .get_mut(url)
                .and_then(|v| if v.is_empty() { None } else { Some(v.remove(0)) });
            match next {
                Some(err) => Err(err),
                None => Ok(FetchResponse {
                    url: url.to_string(),
                    status: 200,
                    body: r#"<meta property="og:title" content="Someone (@x)">"#.to_string(),
                }),
            }
        }
    }

    fn pool(fetcher: FlakyFetcher) -> ScrapePool {
        ScrapePool::new(
            Arc::new(fetcher),
            Arc::new(HostRateLimiter::new(&crate::config::RateLimitConfig {
                requests_per_second: 1000,
                burst: 1000,
            })),
            RetryPolicy::immediate(3),
            Duration::from_secs(5),
            2,
        )
    }

    #[tokio::test]
    async fn retries_transient_and_reports_terminal() {
        let mut failures = HashMap::new();
        failures.insert(
            "https://instagram.com/flaky".to_string(),
            vec![
                PipelineError::TransientNetwork("timeout".into()),
                PipelineError::TransientNetwork("HTTP 503".into()),
            ],
        );
        failures.insert(
            "https://instagram.com/gone".to_string(),
            vec![PipelineError::TerminalSource("not found (HTTP 404)".into())],
        );
        failures.insert(
            "https://instagram.com/down".to_string(),
            vec![PipelineError::TransientNetwork("HTTP 500".into()); 5],
        );
        let pool = pool(FlakyFetcher {
            failures: StdMutex::new(failures),
        });

        let report = pool
            .run(
                vec![candidate("flaky"), candidate("gone"), candidate("down"), candidate("ok")],
                Instant::now() + Duration::from_secs(10),
            )
            .await;

        assert!(!report.deadline_hit);
        let mut scraped: Vec<&str> = report
            .records
            .iter()
            .map(|(c, _)| c.candidate_id.as_str())
            .collect();
        scraped.sort();
        assert_eq!(scraped, vec!["c-flaky", "c-ok"]);

        let gone = report.failures.iter().find(|f| f.candidate_id == "c-gone").unwrap();
        assert_eq!(gone.attempts, 1);
        assert!(!gone.retryable);
        let down = report.failures.iter().find(|f| f.candidate_id == "c-down").unwrap();
        assert_eq!(down.attempts, 3);
        assert!(!down.retryable);
        assert!(down.reason.contains("retries exhausted"));
    }

    #[tokio::test]
    async fn empty_input_returns_immediately() {
        let pool = pool(FlakyFetcher {
            failures: StdMutex::new(HashMap::new()),
        });
        let report = pool.run(Vec::new(), Instant::now()).await;
        assert!(report.records.is_empty());
        assert!(report.failures.is_empty());
    }

    #[test]
    fn queue_dequeue_is_exclusive() {
        let q = WorkQueue::new(vec![candidate("a"), candidate("b")]);
        let first = q.pop().unwrap();
        let second = q.pop().unwrap();
        assert_ne!(first.candidate.candidate_id, second.candidate.candidate_id);
        assert!(q.pop().is_none());
        assert!(!q.is_drained());
        q.finish();
        q.finish();
        assert!(q.is_drained());
    }
}
