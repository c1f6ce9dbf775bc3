//! HTTP fetching behind the [`Fetcher`] trait.
//!
//! The extractor and the scrape workers only ever see a [`FetchResponse`] or
//! a classified [`PipelineError`]. Transport failures (timeout, connect,
//! body read) are always [`PipelineError::TransientNetwork`]; HTTP statuses
//! are classified by [`check_status`]:
//!
//! | Status | Classification |
//! |--------|----------------|
//! | 2xx | success |
//! | 429, 5xx | transient (retried) |
//! | 404, 410 | terminal: not found |
//! | 401, 403, 451 | terminal: blocked |
//! | other 4xx / 3xx | terminal |

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use inkdex_core::error::PipelineError;

/// A successful fetch.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub url: String,
    pub status: u16,
    pub body: String,
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// GET `url` with a hard `timeout`. Non-2xx statuses are returned as
    /// classified errors, never as responses.
    async fn get(&self, url: &str, timeout: Duration) -> Result<FetchResponse, PipelineError>;
}

/// Map an HTTP status to `Ok` or a classified failure.
pub fn check_status(url: &str, status: u16) -> Result<(), PipelineError> {
    match status {
        200..=299 => Ok(()),
        429 => Err(PipelineError::TransientNetwork(format!(
            "rate limited (HTTP 429) fetching {}",
            url
        ))),
        500..=599 => Err(PipelineError::TransientNetwork(format!(
            "server error (HTTP {}) fetching {}",
            status, url
        ))),
        404 | 410 => Err(PipelineError::TerminalSource(format!(
            "not found (HTTP {}): {}",
            status, url
        ))),
        401 | 403 | 451 => Err(PipelineError::TerminalSource(format!(
            "blocked (HTTP {}): {}",
            status, url
        ))),
        other => Err(PipelineError::TerminalSource(format!(
            "unexpected HTTP {} fetching {}",
            other, url
        ))),
    }
}

/// [`Fetcher`] over a shared `reqwest::Client`.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client })
    }
}

fn transport_error(url: &str, err: reqwest::Error) -> PipelineError {
    let what = if err.is_timeout() {
        "timed out"
    } else if err.is_connect() {
        "connection failed"
    } else {
        "request failed"
    };
    PipelineError::TransientNetwork(format!("{} fetching {}: {}", what, url, err))
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn get(&self, url: &str, timeout: Duration) -> Result<FetchResponse, PipelineError> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| transport_error(url, e))?;

        let status = response.status().as_u16();
        check_status(url, status)?;

        let body = response
            .text()
            .await
            .map_err(|e| transport_error(url, e))?;

        Ok(FetchResponse {
            url: url.to_string(),
            status,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inkdex_core::error::ErrorKind;

    #[test]
    fn status_classification() {
        assert!(check_status("u", 200).is_ok());
        assert!(check_status("u", 204).is_ok());
        for s in [429, 500, 502, 503] {
            assert_eq!(
                check_status("u", s).unwrap_err().kind(),
                ErrorKind::TransientNetwork,
                "status {}",
                s
            );
        }
        for s in [301, 400, 401, 403, 404, 410, 418, 451] {
            assert_eq!(
                check_status("u", s).unwrap_err().kind(),
                ErrorKind::TerminalSource,
                "status {}",
                s
            );
        }
        assert!(check_status("u", 404).unwrap_err().to_string().contains("not found"));
        assert!(check_status("u", 451).unwrap_err().to_string().contains("blocked"));
    }
}
