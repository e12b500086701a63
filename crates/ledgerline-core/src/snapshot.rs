//! Snapshot storage abstraction.
//!
//! Snapshots only shortcut replay: loading with or without them must yield
//! the same state for the same target version.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::AggregateRoot;
use crate::error::DomainError;

/// Default number of events between snapshots.
pub const DEFAULT_SNAPSHOT_FREQUENCY: i64 = 50;

/// Serialized aggregate state at a stream version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Aggregate (stream) identifier.
    pub aggregate_id: Uuid,
    /// Aggregate type name.
    pub aggregate_type: String,
    /// Stream version the state was taken at.
    pub version: i64,
    /// Aggregate-specific state.
    pub data: serde_json::Value,
    /// When the snapshot was written.
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    /// Captures the current state of `aggregate`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the state cannot be encoded.
    pub fn capture<A: AggregateRoot>(
        aggregate: &A,
        created_at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        Ok(Self {
            aggregate_id: aggregate.aggregate_id(),
            aggregate_type: A::AGGREGATE_TYPE.to_owned(),
            version: aggregate.version(),
            data: aggregate.snapshot_state()?,
            created_at,
        })
    }

    /// Rebuilds the aggregate this snapshot was taken from.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for a snapshot of another aggregate
    /// type, or the aggregate's restore error.
    pub fn restore<A: AggregateRoot>(&self) -> Result<A, DomainError> {
        if self.aggregate_type != A::AGGREGATE_TYPE {
            return Err(DomainError::Validation(format!(
                "snapshot of '{}' cannot restore '{}'",
                self.aggregate_type,
                A::AGGREGATE_TYPE
            )));
        }
        A::restore(self.aggregate_id, self.version, self.data.clone())
    }
}

/// When to take a snapshot. Amortizes replay cost; never affects semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotPolicy {
    /// Snapshot every `frequency` versions; `0` disables snapshotting.
    pub frequency: i64,
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self {
            frequency: DEFAULT_SNAPSHOT_FREQUENCY,
        }
    }
}

impl SnapshotPolicy {
    /// A policy that never snapshots.
    #[must_use]
    pub fn disabled() -> Self {
        Self { frequency: 0 }
    }

    /// True when `version` is a positive multiple of the frequency.
    #[must_use]
    pub fn should_snapshot(&self, version: i64) -> bool {
        self.frequency > 0 && version > 0 && version % self.frequency == 0
    }

    /// True when a save moving the stream from `from` to `to` crossed a
    /// snapshot boundary. A multi-event save can step over the exact multiple.
    #[must_use]
    pub fn crossed(&self, from: i64, to: i64) -> bool {
        self.frequency > 0 && to > from && to / self.frequency > from / self.frequency
    }
}

/// Persistence for snapshots.
#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    /// Stores a snapshot; saving the same (id, type, version) twice is a no-op.
    async fn save(&self, snapshot: &Snapshot) -> Result<(), DomainError>;

    /// The newest snapshot with `version <= max_version` (or the newest at all).
    async fn load_latest(
        &self,
        aggregate_id: Uuid,
        aggregate_type: &str,
        max_version: Option<i64>,
    ) -> Result<Option<Snapshot>, DomainError>;
}
