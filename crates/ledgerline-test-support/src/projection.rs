//! In-memory read model.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledgerline_core::error::DomainError;
use ledgerline_core::projection::{HandlerFailure, Projection, ProjectionStatus};
use ledgerline_core::repository::StoredEvent;
use uuid::Uuid;

/// One row of an [`InMemoryProjection`], keyed by stream id.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedRow {
    pub last_event: String,
    pub stream_version: i64,
    pub payload: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

/// A projection that upserts one row per stream, keeping a row's newest
/// stream version. Batches are applied atomically, and a failure can be
/// injected on the n-th batch.
#[derive(Debug)]
pub struct InMemoryProjection {
    name: &'static str,
    handles: &'static [&'static str],
    rows: Mutex<BTreeMap<Uuid, ProjectedRow>>,
    batches_seen: Mutex<u64>,
    fail_on_batch: Option<u64>,
}

impl InMemoryProjection {
    /// A projection named `name` over `handles`.
    #[must_use]
    pub fn new(name: &'static str, handles: &'static [&'static str]) -> Self {
        Self {
            name,
            handles,
            rows: Mutex::new(BTreeMap::new()),
            batches_seen: Mutex::new(0),
            fail_on_batch: None,
        }
    }

    /// Makes the `batch`-th call to `apply_batch` (one-based) fail.
    #[must_use]
    pub fn failing_on_batch(mut self, batch: u64) -> Self {
        self.fail_on_batch = Some(batch);
        self
    }

    /// The current rows.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn rows(&self) -> BTreeMap<Uuid, ProjectedRow> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl Projection for InMemoryProjection {
    fn name(&self) -> &str {
        self.name
    }

    fn handles(&self) -> &[&'static str] {
        self.handles
    }

    async fn apply_batch(&self, events: &[StoredEvent]) -> Result<(), HandlerFailure> {
        let batch = {
            let mut seen = self.batches_seen.lock().unwrap();
            *seen += 1;
            *seen
        };

        let mut staged = self.rows.lock().unwrap().clone();
        for (index, event) in events.iter().enumerate() {
            if self.fail_on_batch == Some(batch) && index + 1 == events.len() {
                return Err(HandlerFailure::at(
                    event.event_id,
                    DomainError::StorageUnavailable("injected failure".into()),
                ));
            }
            let stale = staged
                .get(&event.stream_id)
                .is_some_and(|row| row.stream_version >= event.stream_version);
            if stale {
                continue;
            }
            staged.insert(
                event.stream_id,
                ProjectedRow {
                    last_event: event.event_name.clone(),
                    stream_version: event.stream_version,
                    payload: event.payload.clone(),
                    updated_at: event.occurred_on,
                },
            );
        }
        *self.rows.lock().unwrap() = staged;
        Ok(())
    }

    async fn truncate(&self) -> Result<(), DomainError> {
        self.rows.lock().unwrap().clear();
        Ok(())
    }

    async fn status(&self) -> Result<ProjectionStatus, DomainError> {
        let rows = self.rows.lock().unwrap();
        Ok(ProjectionStatus {
            name: self.name.to_owned(),
            rows: i64::try_from(rows.len())
                .map_err(|e| DomainError::Validation(e.to_string()))?,
            last_updated: rows.values().map(|r| r.updated_at).max(),
        })
    }
}
