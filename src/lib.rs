//! # inkdex
//!
//! A tattoo artist discovery pipeline with an eventually consistent search
//! index.
//!
//! A run turns a search query into canonical artist and studio records:
//! discovery finds studios, extraction pulls portfolio links from their
//! websites, scraping normalizes each portfolio page, and ingestion writes
//! versioned records to the canonical store. Forward sync projects the
//! store's change feed into the search index; reconciliation finds and
//! repairs any drift between the two.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────┐   ┌──────────┐   ┌──────────┐
//! │ Discovery │──▶│ Extract  │──▶│  Scrape  │──▶│  Ingest  │
//! │ seed/HTTP │   │ (fanout) │   │  (pool)  │   │          │
//! └───────────┘   └──────────┘   └──────────┘   └────┬─────┘
//!                                                    ▼
//!                                           ┌─────────────────┐
//!                                           │ Canonical store │
//!                                           │  + change feed  │
//!                                           └───┬─────────▲───┘
//!                                  forward sync │         │ reconcile
//!                                               ▼         │
//!                                           ┌─────────────┴───┐
//!                                           │  Search index   │
//!                                           └─────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! inkdex init                       # create both databases
//! inkdex discover "austin"          # run the pipeline
//! inkdex sync                       # project the change feed into the index
//! inkdex find --city austin --style blackwork
//! inkdex reconcile --dry-run        # look for drift
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connections |
//! | [`migrate`] | Schema creation |
//! | [`sqlite_store`] | SQLite store, sync state, and index |
//! | [`discovery`] | Studio discovery sources |
//! | [`fetch`] | HTTP fetching and status classification |
//! | [`retry`] | Retry policy with backoff |
//! | [`ratelimit`] | Per-host rate limiting |
//! | [`extractor`] | Portfolio link extraction |
//! | [`scrape`] | Scrape worker pool and profile parsing |
//! | [`ingest`] | Validated writes to the canonical store |
//! | [`orchestrator`] | Run state machine and summary |
//! | [`runs`] | Run history |
//! | [`sync`] | Forward sync and dead letters |
//! | [`reconcile`] | Drift detection and repair |
//! | [`status`], [`stats`], [`get`], [`find`], [`curate`] | Operator commands |
//! | [`progress`] | Run progress on stderr |

pub mod config;
pub mod curate;
pub mod db;
pub mod discovery;
pub mod extractor;
pub mod fetch;
pub mod find;
pub mod get;
pub mod ingest;
pub mod migrate;
pub mod orchestrator;
pub mod progress;
pub mod ratelimit;
pub mod reconcile;
pub mod retry;
pub mod runs;
pub mod scrape;
pub mod sqlite_store;
pub mod stats;
pub mod status;
pub mod sync;
