//! Error taxonomy for per-item pipeline and sync failures.
//!
//! Plumbing errors (config, database, CLI) travel as `anyhow::Error`.
//! Failures that decide control flow, whether to retry, skip, or record,
//! are [`PipelineError`]s and carry an [`ErrorKind`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Timeouts, connection failures, rate limiting, 5xx. Retried with backoff.
    TransientNetwork,
    /// The source or profile is unusable for this run. Logged and excluded.
    TerminalSource,
    /// Malformed record, rejected before it reaches the store.
    Validation,
    /// Stale write. Index writes report it as `WriteOutcome::Stale` and
    /// it never surfaces as a failure.
    VersionConflict,
    /// Reconciliation-only. Recorded, not retried automatically.
    Drift,
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::TransientNetwork)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::TransientNetwork => "transient_network",
            ErrorKind::TerminalSource => "terminal_source",
            ErrorKind::Validation => "validation",
            ErrorKind::VersionConflict => "version_conflict",
            ErrorKind::Drift => "drift",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("transient network error: {0}")]
    TransientNetwork(String),
    #[error("terminal source error: {0}")]
    TerminalSource(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("drift: {0}")]
    Drift(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::TransientNetwork(_) => ErrorKind::TransientNetwork,
            PipelineError::TerminalSource(_) => ErrorKind::TerminalSource,
            PipelineError::Validation(_) => ErrorKind::Validation,
            PipelineError::Drift(_) => ErrorKind::Drift,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}
