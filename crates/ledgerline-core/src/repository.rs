//! Event repository abstraction.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Stored representation of a domain event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Stream (aggregate) this event belongs to.
    pub stream_id: Uuid,
    /// Version within the stream; assigned by the store on append.
    pub stream_version: i64,
    /// Logical event type tag.
    pub event_name: String,
    /// Payload schema version.
    pub event_version: i32,
    /// Serialized payload; personal-data fields are ciphertext at rest.
    pub payload: serde_json::Value,
    /// Timestamp of event creation.
    pub occurred_on: DateTime<Utc>,
    /// Request that produced the event.
    pub request_id: Uuid,
    /// Entity the event is attributed to.
    pub owner_id: Option<Uuid>,
    /// Free-form metadata.
    pub meta_data: serde_json::Value,
}

/// A stored event with its global insertion position.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionedEvent {
    /// Global, strictly increasing insertion order across all streams.
    pub position: i64,
    /// The event itself.
    pub event: StoredEvent,
}

/// Restricts which events of a stream are loaded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamFilter {
    /// Only events with `occurred_on <= as_of`.
    pub as_of: Option<DateTime<Utc>>,
    /// Only events with one of these names; `None` means all.
    pub event_names: Option<Vec<String>>,
}

impl StreamFilter {
    /// Every event in the stream.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Every event that had occurred at `as_of`.
    #[must_use]
    pub fn as_of(as_of: Option<DateTime<Utc>>) -> Self {
        Self {
            as_of,
            event_names: None,
        }
    }

    /// Narrows the filter to the given event names.
    #[must_use]
    pub fn with_types<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.event_names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Whether `event` passes this filter.
    #[must_use]
    pub fn matches(&self, event: &StoredEvent) -> bool {
        if self.as_of.is_some_and(|as_of| event.occurred_on > as_of) {
            return false;
        }
        match &self.event_names {
            Some(names) => names.iter().any(|n| *n == event.event_name),
            None => true,
        }
    }
}

/// Events to append to one stream, guarded by the version the writer last saw.
#[derive(Debug, Clone)]
pub struct StreamAppend {
    /// Target stream.
    pub stream_id: Uuid,
    /// The stream version the writer loaded; the first event becomes `expected_version + 1`.
    pub expected_version: i64,
    /// Events in order.
    pub events: Vec<StoredEvent>,
}

impl StreamAppend {
    /// Returns the events renumbered from `expected_version + 1`.
    ///
    /// `occurred_on` never decreases along a stream: an event stamped before
    /// its predecessor (`not_before` is the stream's last stored event) is
    /// moved up to the predecessor's time. Point-in-time loads rely on this.
    #[must_use]
    pub fn numbered_events(&self, not_before: Option<DateTime<Utc>>) -> Vec<StoredEvent> {
        let mut floor = not_before;
        self.events
            .iter()
            .zip(self.expected_version + 1..)
            .map(|(event, version)| {
                let occurred_on = match floor {
                    Some(previous) if event.occurred_on < previous => {
                        tracing::warn!(
                            stream_id = %self.stream_id,
                            stream_version = version,
                            stamped = %event.occurred_on,
                            %previous,
                            "event stamped before its predecessor, moved up"
                        );
                        previous
                    }
                    _ => event.occurred_on,
                };
                floor = Some(occurred_on);
                StoredEvent {
                    stream_id: self.stream_id,
                    stream_version: version,
                    occurred_on,
                    ..event.clone()
                }
            })
            .collect()
    }
}

/// Rejects a unit of work that names the same stream twice; the second
/// append could never pass its own version check.
///
/// # Errors
///
/// Returns `DomainError::Validation` on a duplicate stream.
pub fn validate_commit(appends: &[StreamAppend]) -> Result<(), DomainError> {
    let mut seen = HashSet::new();
    for append in appends.iter().filter(|a| !a.events.is_empty()) {
        if !seen.insert(append.stream_id) {
            return Err(DomainError::Validation(format!(
                "stream {} appears twice in one commit",
                append.stream_id
            )));
        }
    }
    Ok(())
}

/// Repository trait for loading and appending domain events.
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Loads up to `limit` events of a stream with `stream_version > after_version`,
    /// ascending by version, restricted by `filter`.
    async fn load_page(
        &self,
        stream_id: Uuid,
        filter: &StreamFilter,
        after_version: i64,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, DomainError>;

    /// Highest stream version, or the highest one that had occurred at `as_of`.
    /// Zero for a stream without events.
    async fn current_version(
        &self,
        stream_id: Uuid,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<i64, DomainError>;

    /// Appends to several streams in one transaction. Each stream's events are
    /// numbered from its `expected_version + 1`; if any stream moved on, nothing
    /// is written and `ConcurrencyConflict` is returned. Registered consumers
    /// see the events before the transaction commits; a consumer failure rolls
    /// the append back.
    async fn commit(&self, appends: &[StreamAppend]) -> Result<(), DomainError>;

    /// Appends to a single stream with optimistic concurrency.
    /// `expected_version` is the last known stream version.
    async fn append(
        &self,
        stream_id: Uuid,
        expected_version: i64,
        events: &[StoredEvent],
    ) -> Result<(), DomainError> {
        self.commit(&[StreamAppend {
            stream_id,
            expected_version,
            events: events.to_vec(),
        }])
        .await
    }
}

/// A read over the whole log in global insertion order.
#[derive(Debug, Clone, Default)]
pub struct LogQuery {
    /// Only these event names; empty means all.
    pub event_names: Vec<String>,
    /// Exclusive lower bound on `position`.
    pub after_position: i64,
    /// Only events with `occurred_on >= from`.
    pub from: Option<DateTime<Utc>>,
    /// Maximum number of events.
    pub limit: usize,
}

/// Global, cross-stream read access used by projection replay.
#[async_trait]
pub trait GlobalEventLog: Send + Sync {
    /// Reads one page of the log, ascending by position.
    async fn read_log(&self, query: &LogQuery) -> Result<Vec<PositionedEvent>, DomainError>;
}

/// Downstream receiver of freshly appended events.
#[async_trait]
pub trait EventConsumer: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Handles events of one commit. Must be idempotent: delivery is
    /// at-least-once.
    async fn consume(&self, events: &[StoredEvent]) -> Result<(), DomainError>;
}
