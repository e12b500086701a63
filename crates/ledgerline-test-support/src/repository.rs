//! `EventRepository` doubles for tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledgerline_core::error::DomainError;
use ledgerline_core::repository::{
    EventConsumer, EventRepository, GlobalEventLog, LogQuery, PositionedEvent, StoredEvent,
    StreamAppend, StreamFilter, validate_commit,
};
use uuid::Uuid;

/// An event log held in memory with the same guarantees as the database one:
/// per-stream version checks, all-or-nothing commits, a global position, and
/// consumers that see each commit before it becomes visible (a consumer
/// failure discards the commit).
///
/// Commits are serialized by an async mutex held across consumer delivery.
#[derive(Default)]
pub struct InMemoryEventStore {
    log: tokio::sync::Mutex<Vec<PositionedEvent>>,
    consumers: Mutex<Vec<Arc<dyn EventConsumer>>>,
}

impl std::fmt::Debug for InMemoryEventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryEventStore").finish_non_exhaustive()
    }
}

impl InMemoryEventStore {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a consumer notified on every commit.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn subscribe(&self, consumer: Arc<dyn EventConsumer>) {
        self.consumers.lock().unwrap().push(consumer);
    }

    /// Every event in global order.
    pub async fn all_events(&self) -> Vec<StoredEvent> {
        self.log.lock().await.iter().map(|p| p.event.clone()).collect()
    }

    /// Every event of one stream in version order.
    pub async fn stream_events(&self, stream_id: Uuid) -> Vec<StoredEvent> {
        self.log
            .lock()
            .await
            .iter()
            .filter(|p| p.event.stream_id == stream_id)
            .map(|p| p.event.clone())
            .collect()
    }

    /// Total number of events.
    pub async fn event_count(&self) -> usize {
        self.log.lock().await.len()
    }
}

fn stream_version(log: &[PositionedEvent], stream_id: Uuid) -> i64 {
    log.iter()
        .filter(|p| p.event.stream_id == stream_id)
        .map(|p| p.event.stream_version)
        .max()
        .unwrap_or(0)
}

#[async_trait]
impl EventRepository for InMemoryEventStore {
    async fn load_page(
        &self,
        stream_id: Uuid,
        filter: &StreamFilter,
        after_version: i64,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        Ok(self
            .log
            .lock()
            .await
            .iter()
            .map(|p| &p.event)
            .filter(|e| e.stream_id == stream_id && e.stream_version > after_version)
            .filter(|e| filter.matches(e))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn current_version(
        &self,
        stream_id: Uuid,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<i64, DomainError> {
        Ok(self
            .log
            .lock()
            .await
            .iter()
            .map(|p| &p.event)
            .filter(|e| e.stream_id == stream_id)
            .filter(|e| as_of.is_none_or(|t| e.occurred_on <= t))
            .map(|e| e.stream_version)
            .max()
            .unwrap_or(0))
    }

    async fn commit(&self, appends: &[StreamAppend]) -> Result<(), DomainError> {
        validate_commit(appends)?;
        let mut log = self.log.lock().await;

        let mut committed = Vec::new();
        for append in appends.iter().filter(|a| !a.events.is_empty()) {
            let actual = stream_version(&log, append.stream_id);
            if actual != append.expected_version {
                return Err(DomainError::ConcurrencyConflict {
                    stream_id: append.stream_id,
                    expected: append.expected_version,
                    actual,
                });
            }
            let last = log
                .iter()
                .filter(|p| p.event.stream_id == append.stream_id)
                .map(|p| p.event.occurred_on)
                .max();
            committed.extend(append.numbered_events(last));
        }

        let consumers = self.consumers.lock().unwrap().clone();
        for consumer in consumers {
            consumer.consume(&committed).await?;
        }

        let mut position = log.last().map_or(0, |p| p.position);
        for event in committed {
            position += 1;
            log.push(PositionedEvent { position, event });
        }
        Ok(())
    }
}

#[async_trait]
impl GlobalEventLog for InMemoryEventStore {
    async fn read_log(&self, query: &LogQuery) -> Result<Vec<PositionedEvent>, DomainError> {
        Ok(self
            .log
            .lock()
            .await
            .iter()
            .filter(|p| p.position > query.after_position)
            .filter(|p| {
                query.event_names.is_empty() || query.event_names.contains(&p.event.event_name)
            })
            .filter(|p| query.from.is_none_or(|from| p.event.occurred_on >= from))
            .take(query.limit)
            .cloned()
            .collect())
    }
}

/// An event repository that always returns a storage error. Useful for
/// testing error-handling paths.
#[derive(Debug)]
pub struct FailingEventRepository;

#[async_trait]
impl EventRepository for FailingEventRepository {
    async fn load_page(
        &self,
        _stream_id: Uuid,
        _filter: &StreamFilter,
        _after_version: i64,
        _limit: usize,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        Err(DomainError::StorageUnavailable("connection refused".into()))
    }

    async fn current_version(
        &self,
        _stream_id: Uuid,
        _as_of: Option<DateTime<Utc>>,
    ) -> Result<i64, DomainError> {
        Err(DomainError::StorageUnavailable("connection refused".into()))
    }

    async fn commit(&self, _appends: &[StreamAppend]) -> Result<(), DomainError> {
        Err(DomainError::StorageUnavailable("connection refused".into()))
    }
}

/// Records every delivered batch.
#[derive(Debug, Default)]
pub struct RecordingConsumer {
    delivered: Mutex<Vec<Vec<StoredEvent>>>,
}

impl RecordingConsumer {
    /// Creates a consumer with nothing delivered.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Batches in delivery order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn delivered(&self) -> Vec<Vec<StoredEvent>> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventConsumer for RecordingConsumer {
    fn name(&self) -> &str {
        "recording"
    }

    async fn consume(&self, events: &[StoredEvent]) -> Result<(), DomainError> {
        self.delivered.lock().unwrap().push(events.to_vec());
        Ok(())
    }
}

/// Rejects every delivery, forcing the append to roll back.
#[derive(Debug)]
pub struct FailingConsumer;

#[async_trait]
impl EventConsumer for FailingConsumer {
    fn name(&self) -> &str {
        "failing"
    }

    async fn consume(&self, _events: &[StoredEvent]) -> Result<(), DomainError> {
        Err(DomainError::StorageUnavailable("read model offline".into()))
    }
}
