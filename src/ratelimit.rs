//! Per-host token-bucket rate limiting.
//!
//! One keyed governor limiter is shared by the extractor and every scrape
//! worker, so the per-host budget holds no matter how many workers run.

use std::num::NonZeroU32;

use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use inkdex_core::normalize::{host_of, normalize_portfolio_url};

use crate::config::RateLimitConfig;

pub struct HostRateLimiter {
    limiter: DefaultKeyedRateLimiter<String>,
}

impl HostRateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let rps = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(config.burst).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: RateLimiter::keyed(Quota::per_second(rps).allow_burst(burst)),
        }
    }

    /// Wait until a request to `url`'s host is allowed.
    pub async fn until_ready(&self, url: &str) {
        let key = host_key(url);
        self.limiter.until_key_ready(&key).await;
    }
}

/// Lowercase host of `url`; unparseable URLs share one bucket.
pub fn host_key(url: &str) -> String {
    normalize_portfolio_url(url)
        .map(|n| host_of(&n).to_string())
        .unwrap_or_else(|| "_".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hosts_are_keyed_case_insensitively() {
        assert_eq!(host_key("https://WWW.Instagram.com/mara"), "instagram.com");
        assert_eq!(host_key("http://blackanchor.example/artists"), "blackanchor.example");
        assert_eq!(host_key("not a url"), "_");
    }

    #[test]
    fn burst_is_per_host() {
        let limiter = HostRateLimiter::new(&RateLimitConfig {
            requests_per_second: 1,
            burst: 2,
        });
        let take = |url: &str| limiter.limiter.check_key(&host_key(url)).is_ok();
        assert!(take("https://a.example/1"));
        assert!(take("https://a.example/2"));
        assert!(!take("https://a.example/3"));
        assert!(take("https://b.example/1"));
    }

    #[tokio::test]
    async fn until_ready_returns_within_burst() {
        let limiter = HostRateLimiter::new(&RateLimitConfig::default());
        limiter.until_ready("https://a.example").await;
        limiter.until_ready("https://a.example").await;
    }
}
