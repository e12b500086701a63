//! `PostgreSQL` persistence for the engine.
//!
//! Implements the event log, snapshot and key storage traits of
//! `ledgerline-core` on top of `sqlx`. All SQL is checked at runtime
//! (`sqlx::query`, not `sqlx::query!`) so building needs no database.

pub mod pg_event_repository;
pub mod pg_key_manager;
pub mod pg_projection;
pub mod pg_snapshot_repository;
pub mod schema;

use ledgerline_core::error::DomainError;

/// Maps a driver error to the domain's storage failure.
pub(crate) fn storage_error(err: sqlx::Error) -> DomainError {
    DomainError::StorageUnavailable(err.to_string())
}

/// Converts a page size to a SQL `LIMIT`.
pub(crate) fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}
