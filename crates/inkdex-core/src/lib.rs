//! # inkdex core
//!
//! Shared, I/O-free logic for inkdex: the studio/artist data model, portfolio
//! URL normalization and deterministic id derivation, candidate
//! deduplication, style tagging, the index projection, drift classification,
//! and the storage traits the pipeline and sync engine are written against.
//!
//! This crate contains no tokio, sqlx, or network dependencies. The
//! [`store::memory`] backends are used by tests and by embedders that want
//! the pipeline without SQLite.

pub mod dedup;
pub mod drift;
pub mod error;
pub mod models;
pub mod normalize;
pub mod project;
pub mod store;
pub mod styles;
