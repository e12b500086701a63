//! Read-model projections: live dispatch, replay, reset and status.
//!
//! A projection declares the event names it handles and applies a batch of
//! decrypted events in one transaction. Handlers are idempotent upserts keyed
//! by the target id, so delivering the same event twice changes nothing.
//!
//! Events whose owner key has been deleted are skipped, never applied: the
//! subject exercised erasure and the projection must keep working.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::crypto::{FieldEncryptor, KeyManager, KeyRing};
use crate::error::DomainError;
use crate::repository::{EventConsumer, GlobalEventLog, LogQuery, StoredEvent};

/// Default number of events per replay batch.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Why a batch could not be applied.
#[derive(Debug)]
pub struct HandlerFailure {
    /// The event being handled when the batch failed, if known.
    pub event_id: Option<Uuid>,
    /// The underlying error.
    pub error: DomainError,
}

impl HandlerFailure {
    /// A failure attributed to one event.
    #[must_use]
    pub fn at(event_id: Uuid, error: DomainError) -> Self {
        Self {
            event_id: Some(event_id),
            error,
        }
    }
}

impl HandlerFailure {
    /// Converts the failure of live dispatch into the error that aborts the
    /// append, naming the projection and event when known.
    #[must_use]
    pub fn into_error(self, projection: &str) -> DomainError {
        match self.event_id {
            Some(event_id) => DomainError::StorageUnavailable(format!(
                "projection '{projection}' failed on event {event_id}: {}",
                self.error
            )),
            None => self.error,
        }
    }
}

impl From<DomainError> for HandlerFailure {
    fn from(error: DomainError) -> Self {
        Self {
            event_id: None,
            error,
        }
    }
}

/// Health of one read model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectionStatus {
    /// Projection name.
    pub name: String,
    /// Rows currently in the read model.
    pub rows: i64,
    /// Newest `updated_at` among the rows; `None` when empty.
    pub last_updated: Option<DateTime<Utc>>,
}

/// A denormalized read model fed from the event log.
#[async_trait]
pub trait Projection: Send + Sync {
    /// Stable name used by operators.
    fn name(&self) -> &str;

    /// Event names this projection reacts to.
    fn handles(&self) -> &[&'static str];

    /// Applies decrypted events in one transaction; on error nothing of the
    /// batch is kept.
    async fn apply_batch(&self, events: &[StoredEvent]) -> Result<(), HandlerFailure>;

    /// Removes every row of the read model.
    async fn truncate(&self) -> Result<(), DomainError>;

    /// Row count and last update.
    async fn status(&self) -> Result<ProjectionStatus, DomainError>;
}

/// How a replay runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayOptions {
    /// Replay only events that occurred at or after this moment. Without it
    /// the read model is truncated and rebuilt from the start of the log.
    pub from_date: Option<DateTime<Utc>>,
    /// Resume after this global position, as reported by a failed batch.
    /// A resumed replay does not truncate.
    pub after_position: i64,
    /// Truncate before replaying even when resuming or `from_date` is set.
    pub reset_first: bool,
    /// Events per batch (and per transaction).
    pub batch_size: usize,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            from_date: None,
            after_position: 0,
            reset_first: false,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Outcome of a completed replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayReport {
    /// Projection that was replayed.
    pub projection: String,
    /// Batches committed.
    pub batches: u64,
    /// Events applied to the read model.
    pub applied: u64,
    /// Events skipped because their owner's key is erased.
    pub skipped_erased: u64,
    /// Global position of the last event read, or the resume point if none.
    pub last_position: i64,
}

/// Decrypts events for a projection, dropping those of erased subjects.
/// Returns the readable events and how many were dropped.
///
/// # Errors
///
/// Returns a `HandlerFailure` naming the event whose decryption failed for
/// any reason other than an erased key.
pub async fn decrypt_for_projection(
    encryptor: &FieldEncryptor,
    keys: &KeyRing<'_>,
    projection: &str,
    events: Vec<StoredEvent>,
) -> Result<(Vec<StoredEvent>, u64), HandlerFailure> {
    let mut readable = Vec::new();
    let mut skipped = 0;
    for mut event in events {
        match encryptor.decrypt(&mut event, keys).await {
            Ok(()) => readable.push(event),
            Err(DomainError::KeyErased(owner_id)) => {
                skipped += 1;
                tracing::warn!(
                    projection,
                    event_id = %event.event_id,
                    %owner_id,
                    "skipping event of erased subject"
                );
            }
            Err(e) => return Err(HandlerFailure::at(event.event_id, e)),
        }
    }
    Ok((readable, skipped))
}

/// Registry of projections plus the operator actions on them.
pub struct ProjectionManager {
    log: Arc<dyn GlobalEventLog>,
    keys: Arc<dyn KeyManager>,
    encryptor: FieldEncryptor,
    projections: Vec<Arc<dyn Projection>>,
}

impl std::fmt::Debug for ProjectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectionManager")
            .field("projections", &self.names())
            .finish_non_exhaustive()
    }
}

impl ProjectionManager {
    /// A manager with no projections registered.
    #[must_use]
    pub fn new(
        log: Arc<dyn GlobalEventLog>,
        keys: Arc<dyn KeyManager>,
        encryptor: FieldEncryptor,
    ) -> Self {
        Self {
            log,
            keys,
            encryptor,
            projections: Vec::new(),
        }
    }

    /// Registers a projection.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the name is already taken.
    pub fn register(&mut self, projection: Arc<dyn Projection>) -> Result<(), DomainError> {
        if self.find(projection.name()).is_ok() {
            return Err(DomainError::Validation(format!(
                "projection '{}' is registered twice",
                projection.name()
            )));
        }
        self.projections.push(projection);
        Ok(())
    }

    /// Names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.projections.iter().map(|p| p.name()).collect()
    }

    fn find(&self, name: &str) -> Result<&Arc<dyn Projection>, DomainError> {
        self.projections
            .iter()
            .find(|p| p.name() == name)
            .ok_or_else(|| DomainError::Validation(format!("unknown projection '{name}'")))
    }

    /// A consumer that feeds newly appended events to every projection.
    ///
    /// Each projection commits through its own `apply_batch`, so this suits
    /// read models outside the event database. Read models in the same
    /// `PostgreSQL` database are fed inside the append transaction instead
    /// (`ledgerline_event_store::pg_projection`).
    #[must_use]
    pub fn dispatcher(&self) -> ProjectionDispatcher {
        ProjectionDispatcher {
            keys: Arc::clone(&self.keys),
            encryptor: self.encryptor.clone(),
            projections: self.projections.clone(),
        }
    }

    /// Replays the log into one projection.
    ///
    /// Batches are read in global insertion order and each is applied in its
    /// own transaction. A failing batch is rolled back alone; the error
    /// carries the position it started after, which is where a resumed
    /// replay picks up.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for an unknown projection or a zero
    /// batch size, `DomainError::ReplayBatchFailure` when a batch fails, or
    /// truncation and log read errors.
    pub async fn replay(&self, name: &str, options: &ReplayOptions) -> Result<ReplayReport, DomainError> {
        let projection = self.find(name)?;
        if options.batch_size == 0 {
            return Err(DomainError::Validation("batch size must be at least 1".into()));
        }
        let full_rebuild = options.from_date.is_none() && options.after_position == 0;
        if full_rebuild || options.reset_first {
            projection.truncate().await?;
            tracing::info!(projection = name, "read model truncated");
        }

        let mut report = ReplayReport {
            projection: name.to_owned(),
            batches: 0,
            applied: 0,
            skipped_erased: 0,
            last_position: options.after_position,
        };
        let event_names: Vec<String> = projection.handles().iter().map(|&n| n.to_owned()).collect();

        loop {
            let started_after = report.last_position;
            let query = LogQuery {
                event_names: event_names.clone(),
                after_position: started_after,
                from: options.from_date,
                limit: options.batch_size,
            };
            let page = self.log.read_log(&query).await?;
            let Some(last) = page.last() else {
                break;
            };
            let last_position = last.position;
            let full_page = page.len() >= options.batch_size;
            report.batches += 1;

            let fail = |failure: HandlerFailure| DomainError::ReplayBatchFailure {
                projection: name.to_owned(),
                batch: report.batches,
                offset: started_after,
                event_id: failure.event_id,
                reason: failure.error.to_string(),
            };

            let keys = KeyRing::new(self.keys.as_ref());
            let (events, skipped) = decrypt_for_projection(
                &self.encryptor,
                &keys,
                name,
                page.into_iter().map(|p| p.event).collect(),
            )
            .await
            .map_err(fail)?;
            projection.apply_batch(&events).await.map_err(fail)?;

            report.applied += events.len() as u64;
            report.skipped_erased += skipped;
            report.last_position = last_position;
            tracing::info!(
                projection = name,
                batch = report.batches,
                applied = events.len(),
                skipped,
                position = last_position,
                "replay batch committed"
            );
            if !full_page {
                break;
            }
        }

        tracing::info!(
            projection = name,
            batches = report.batches,
            applied = report.applied,
            skipped_erased = report.skipped_erased,
            "replay finished"
        );
        Ok(report)
    }

    /// Replays every projection in registration order, stopping at the first
    /// failure. Projections after the failing one have not run at all, so
    /// only the failing one resumes from the reported offset.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if `options.after_position` is set,
    /// since a log position only means something to one projection. See
    /// [`ProjectionManager::replay`] for the rest.
    pub async fn replay_all(&self, options: &ReplayOptions) -> Result<Vec<ReplayReport>, DomainError> {
        if options.after_position != 0 {
            return Err(DomainError::Validation(
                "a resume position applies to a single projection; replay it by name".into(),
            ));
        }
        let mut reports = Vec::with_capacity(self.projections.len());
        for projection in &self.projections {
            reports.push(self.replay(projection.name(), options).await?);
        }
        Ok(reports)
    }

    /// Truncates one read model.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for an unknown projection, or the
    /// truncation error.
    pub async fn reset(&self, name: &str) -> Result<(), DomainError> {
        self.find(name)?.truncate().await?;
        tracing::info!(projection = name, "read model reset");
        Ok(())
    }

    /// Truncates every read model.
    ///
    /// # Errors
    ///
    /// Returns the first truncation error.
    pub async fn reset_all(&self) -> Result<(), DomainError> {
        for projection in &self.projections {
            self.reset(projection.name()).await?;
        }
        Ok(())
    }

    /// Status of one read model.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for an unknown projection, or a
    /// storage error.
    pub async fn status(&self, name: &str) -> Result<ProjectionStatus, DomainError> {
        self.find(name)?.status().await
    }

    /// Status of every read model, in registration order.
    ///
    /// # Errors
    ///
    /// Returns the first storage error.
    pub async fn status_all(&self) -> Result<Vec<ProjectionStatus>, DomainError> {
        let mut statuses = Vec::with_capacity(self.projections.len());
        for projection in &self.projections {
            statuses.push(projection.status().await?);
        }
        Ok(statuses)
    }
}

/// Live delivery of appended events to projections.
pub struct ProjectionDispatcher {
    keys: Arc<dyn KeyManager>,
    encryptor: FieldEncryptor,
    projections: Vec<Arc<dyn Projection>>,
}

impl std::fmt::Debug for ProjectionDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectionDispatcher")
            .field("projections", &self.projections.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl EventConsumer for ProjectionDispatcher {
    fn name(&self) -> &str {
        "projections"
    }

    async fn consume(&self, events: &[StoredEvent]) -> Result<(), DomainError> {
        let keys = KeyRing::new(self.keys.as_ref());
        for projection in &self.projections {
            let handles = projection.handles();
            let relevant: Vec<StoredEvent> = events
                .iter()
                .filter(|e| handles.contains(&e.event_name.as_str()))
                .cloned()
                .collect();
            let to_error = |failure: HandlerFailure| failure.into_error(projection.name());
            let (readable, _) =
                decrypt_for_projection(&self.encryptor, &keys, projection.name(), relevant)
                    .await
                    .map_err(to_error)?;
            if readable.is_empty() {
                continue;
            }
            projection.apply_batch(&readable).await.map_err(to_error)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use chrono::TimeZone;
    use serde_json::json;

    use super::*;
    use crate::crypto::key::tests::CountingKeyManager;
    use crate::repository::PositionedEvent;

    struct VecLog(Vec<PositionedEvent>);

    #[async_trait]
    impl GlobalEventLog for VecLog {
        async fn read_log(&self, query: &LogQuery) -> Result<Vec<PositionedEvent>, DomainError> {
            Ok(self
                .0
                .iter()
                .filter(|p| p.position > query.after_position)
                .filter(|p| query.event_names.is_empty() || query.event_names.contains(&p.event.event_name))
                .filter(|p| query.from.is_none_or(|from| p.event.occurred_on >= from))
                .take(query.limit)
                .cloned()
                .collect())
        }
    }

    /// Counts totals per stream; fails on a chosen batch.
    #[derive(Default)]
    struct TotalsProjection {
        rows: Mutex<BTreeMap<Uuid, i64>>,
        batches: Mutex<u64>,
        fail_on_batch: Option<u64>,
    }

    #[async_trait]
    impl Projection for TotalsProjection {
        fn name(&self) -> &str {
            "totals"
        }

        fn handles(&self) -> &[&'static str] {
            &["counter.deposited"]
        }

        async fn apply_batch(&self, events: &[StoredEvent]) -> Result<(), HandlerFailure> {
            let mut batches = self.batches.lock().unwrap();
            *batches += 1;
            if self.fail_on_batch == Some(*batches) {
                return Err(HandlerFailure::at(
                    events[0].event_id,
                    DomainError::StorageUnavailable("disk full".into()),
                ));
            }
            let mut rows = self.rows.lock().unwrap();
            for event in events {
                rows.insert(event.stream_id, event.stream_version);
            }
            Ok(())
        }

        async fn truncate(&self) -> Result<(), DomainError> {
            self.rows.lock().unwrap().clear();
            Ok(())
        }

        async fn status(&self) -> Result<ProjectionStatus, DomainError> {
            Ok(ProjectionStatus {
                name: "totals".into(),
                rows: self.rows.lock().unwrap().len() as i64,
                last_updated: None,
            })
        }
    }

    fn log(count: i64) -> VecLog {
        let base = Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap();
        VecLog(
            (1..=count)
                .map(|position| PositionedEvent {
                    position,
                    event: StoredEvent {
                        event_id: Uuid::new_v4(),
                        stream_id: Uuid::new_v4(),
                        stream_version: 1,
                        event_name: "counter.deposited".into(),
                        event_version: 1,
                        payload: json!({ "amount": position }),
                        occurred_on: base + chrono::Duration::minutes(position),
                        request_id: Uuid::new_v4(),
                        owner_id: None,
                        meta_data: json!({}),
                    },
                })
                .collect(),
        )
    }

    fn manager(log: VecLog, projection: Arc<TotalsProjection>) -> ProjectionManager {
        let mut manager = ProjectionManager::new(
            Arc::new(log),
            Arc::new(CountingKeyManager::default()),
            FieldEncryptor::default(),
        );
        manager.register(projection).unwrap();
        manager
    }

    #[tokio::test]
    async fn test_replay_applies_all_batches() {
        // Arrange
        let projection = Arc::new(TotalsProjection::default());
        let manager = manager(log(5), Arc::clone(&projection));
        let options = ReplayOptions {
            batch_size: 2,
            ..ReplayOptions::default()
        };

        // Act
        let report = manager.replay("totals", &options).await.unwrap();

        // Assert
        assert_eq!(report.batches, 3);
        assert_eq!(report.applied, 5);
        assert_eq!(report.last_position, 5);
        assert_eq!(projection.rows.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_failed_batch_reports_offset_and_keeps_earlier_batches() {
        let projection = Arc::new(TotalsProjection {
            fail_on_batch: Some(2),
            ..TotalsProjection::default()
        });
        let manager = manager(log(5), Arc::clone(&projection));
        let options = ReplayOptions {
            batch_size: 2,
            ..ReplayOptions::default()
        };

        let result = manager.replay("totals", &options).await;

        match result {
            Err(DomainError::ReplayBatchFailure {
                batch,
                offset,
                event_id,
                ..
            }) => {
                assert_eq!(batch, 2);
                assert_eq!(offset, 2);
                assert!(event_id.is_some());
            }
            other => panic!("expected ReplayBatchFailure, got {other:?}"),
        }
        assert_eq!(projection.rows.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_projection_and_zero_batch_are_rejected() {
        let manager = manager(log(1), Arc::new(TotalsProjection::default()));

        let unknown = manager.replay("missing", &ReplayOptions::default()).await;
        let zero = manager
            .replay(
                "totals",
                &ReplayOptions {
                    batch_size: 0,
                    ..ReplayOptions::default()
                },
            )
            .await;

        assert!(matches!(unknown, Err(DomainError::Validation(_))));
        assert!(matches!(zero, Err(DomainError::Validation(_))));
    }

    #[tokio::test]
    async fn test_replay_all_refuses_a_resume_position() {
        let projection = Arc::new(TotalsProjection::default());
        let manager = manager(log(3), Arc::clone(&projection));
        let options = ReplayOptions {
            after_position: 2,
            ..ReplayOptions::default()
        };

        let result = manager.replay_all(&options).await;

        assert!(matches!(result, Err(DomainError::Validation(_))));
        assert_eq!(*projection.batches.lock().unwrap(), 0);
    }

    #[test]
    fn test_register_rejects_duplicate_name() {
        let mut manager = manager(log(0), Arc::new(TotalsProjection::default()));

        let result = manager.register(Arc::new(TotalsProjection::default()));

        assert!(matches!(result, Err(DomainError::Validation(_))));
        assert_eq!(manager.names(), vec!["totals"]);
    }
}
