//! Event store database schema.
//!
//! The SQL lives in the workspace `migrations/` directory and is embedded at
//! build time.

use sqlx::migrate::Migrator;

/// Migrations for every table the engine and the budget read models use.
pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

/// Append-only event log.
pub const EVENT_STORE_TABLE: &str = "event_store";

/// Aggregate snapshots.
pub const SNAPSHOTS_TABLE: &str = "snapshots";

/// Per-owner data keys.
pub const ENCRYPTION_KEYS_TABLE: &str = "encryption_keys";

/// Name of the unique constraint that rejects a second writer at the same
/// stream version.
pub const STREAM_VERSION_CONSTRAINT: &str = "uq_event_store_stream_version";
