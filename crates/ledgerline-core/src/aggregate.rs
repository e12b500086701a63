//! Aggregate root abstraction.
//!
//! Aggregates own an [`EventRecorder`] for the events they raise but have not
//! persisted yet. Raising an event applies it immediately, so a domain
//! operation can check invariants against the post-mutation state before it
//! raises anything further.

use uuid::Uuid;

use crate::clock::Clock;
use crate::error::DomainError;
use crate::event::{DomainEvent, Envelope, EventMetadata};
use crate::repository::StoredEvent;

/// Raised-but-unsaved events of one aggregate instance.
#[derive(Debug, Clone)]
pub struct EventRecorder<E: DomainEvent> {
    raised: Vec<Envelope<E>>,
}

impl<E: DomainEvent> Default for EventRecorder<E> {
    fn default() -> Self {
        Self { raised: Vec::new() }
    }
}

impl<E: DomainEvent> EventRecorder<E> {
    /// Records an already-applied event.
    pub fn raise(&mut self, event: Envelope<E>) {
        self.raised.push(event);
    }

    /// Events raised since the last save.
    #[must_use]
    pub fn events(&self) -> &[Envelope<E>] {
        &self.raised
    }

    /// Takes all raised events, leaving the recorder empty.
    pub fn drain(&mut self) -> Vec<Envelope<E>> {
        std::mem::take(&mut self.raised)
    }

    /// Number of raised events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.raised.len()
    }

    /// Whether nothing has been raised.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.raised.is_empty()
    }
}

/// Trait for aggregate roots that reconstitute from event history.
pub trait AggregateRoot: Send + Sync + Sized {
    /// The event type this aggregate produces and consumes.
    type Event: DomainEvent;

    /// Type name used to key snapshots.
    const AGGREGATE_TYPE: &'static str;

    /// A blank aggregate at version 0.
    fn empty(id: Uuid) -> Self;

    /// Rebuilds an aggregate from snapshot state taken at `version`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if `state` does not match.
    fn restore(id: Uuid, version: i64, state: serde_json::Value) -> Result<Self, DomainError>;

    /// Serializes the aggregate-specific state for a snapshot.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if encoding fails.
    fn snapshot_state(&self) -> Result<serde_json::Value, DomainError>;

    /// Data subject whose personal data the snapshot state holds, if any.
    /// Such snapshots are sealed under that subject's key.
    fn personal_data_owner(&self) -> Option<Uuid> {
        None
    }

    /// Returns the aggregate identifier.
    fn aggregate_id(&self) -> Uuid;

    /// Stream version of the last applied event.
    fn version(&self) -> i64;

    /// Applies an event to mutate internal state and sets the version to the
    /// event's stream version. Must be deterministic.
    fn apply(&mut self, event: &Envelope<Self::Event>);

    /// Raised-but-unsaved events.
    fn recorder(&self) -> &EventRecorder<Self::Event>;

    /// Mutable access to the raised-but-unsaved events.
    fn recorder_mut(&mut self) -> &mut EventRecorder<Self::Event>;

    /// Returns uncommitted events produced by command handling.
    fn uncommitted_events(&self) -> &[Envelope<Self::Event>] {
        self.recorder().events()
    }

    /// Clears uncommitted events after persistence.
    fn clear_uncommitted_events(&mut self) {
        self.recorder_mut().drain();
    }

    /// The stream version the log holds for this aggregate; the expected
    /// version for the next append.
    #[allow(clippy::cast_possible_wrap)]
    fn persisted_version(&self) -> i64 {
        self.version() - self.recorder().len() as i64
    }

    /// Metadata for the next event this aggregate raises.
    fn next_metadata(&self, request_id: Uuid, clock: &dyn Clock) -> EventMetadata {
        EventMetadata::new(
            self.aggregate_id(),
            self.version() + 1,
            request_id,
            clock.now(),
        )
    }

    /// Applies a new event and records it for persistence.
    fn raise(&mut self, metadata: EventMetadata, kind: Self::Event) {
        let event = Envelope { metadata, kind };
        self.apply(&event);
        self.recorder_mut().raise(event);
    }

    /// Decodes and applies one stored event during reconstitution.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::UnknownEventType` if the event is not one this
    /// aggregate understands.
    fn replay(&mut self, stored: &StoredEvent) -> Result<(), DomainError> {
        let event = Envelope::<Self::Event>::from_stored(stored)?;
        self.apply(&event);
        Ok(())
    }
}

/// Folds already-loaded (and decrypted) events into a fresh aggregate.
///
/// # Errors
///
/// Propagates decoding errors from [`AggregateRoot::replay`].
pub fn reconstitute<A: AggregateRoot>(id: Uuid, events: &[StoredEvent]) -> Result<A, DomainError> {
    let mut aggregate = A::empty(id);
    for stored in events {
        aggregate.replay(stored)?;
    }
    Ok(aggregate)
}

#[cfg(test)]
pub(crate) mod tests {
    use chrono::{DateTime, TimeZone, Utc};
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::event::{decode_payload, encode_payload, unknown_event};

    #[derive(Debug)]
    pub(crate) struct FixedClock(pub DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub(crate) struct Deposited {
        pub amount: i64,
    }

    #[derive(Debug, Clone)]
    pub(crate) enum CounterEvent {
        Deposited(Deposited),
    }

    impl DomainEvent for CounterEvent {
        fn event_name(&self) -> &'static str {
            "counter.deposited"
        }

        fn encode(&self) -> Result<serde_json::Value, DomainError> {
            match self {
                Self::Deposited(p) => encode_payload(p),
            }
        }

        fn decode(
            event_name: &str,
            event_version: i32,
            payload: serde_json::Value,
        ) -> Result<Self, DomainError> {
            match (event_name, event_version) {
                ("counter.deposited", 1) => Ok(Self::Deposited(decode_payload(payload)?)),
                _ => Err(unknown_event(event_name, event_version)),
            }
        }
    }

    /// Minimal aggregate used by the core unit tests.
    #[derive(Debug)]
    pub(crate) struct Counter {
        pub id: Uuid,
        pub version: i64,
        pub total: i64,
        recorder: EventRecorder<CounterEvent>,
    }

    impl Counter {
        pub fn deposit(&mut self, amount: i64, request_id: Uuid, clock: &dyn Clock) {
            let metadata = self.next_metadata(request_id, clock);
            self.raise(metadata, CounterEvent::Deposited(Deposited { amount }));
        }
    }

    impl AggregateRoot for Counter {
        type Event = CounterEvent;
        const AGGREGATE_TYPE: &'static str = "counter";

        fn empty(id: Uuid) -> Self {
            Self {
                id,
                version: 0,
                total: 0,
                recorder: EventRecorder::default(),
            }
        }

        fn restore(id: Uuid, version: i64, state: serde_json::Value) -> Result<Self, DomainError> {
            let mut counter = Self::empty(id);
            counter.version = version;
            counter.total = decode_payload(state)?;
            Ok(counter)
        }

        fn snapshot_state(&self) -> Result<serde_json::Value, DomainError> {
            encode_payload(&self.total)
        }

        fn aggregate_id(&self) -> Uuid {
            self.id
        }

        fn version(&self) -> i64 {
            self.version
        }

        fn apply(&mut self, event: &Envelope<CounterEvent>) {
            match &event.kind {
                CounterEvent::Deposited(p) => self.total += p.amount,
            }
            self.version = event.metadata.stream_version;
        }

        fn recorder(&self) -> &EventRecorder<CounterEvent> {
            &self.recorder
        }

        fn recorder_mut(&mut self) -> &mut EventRecorder<CounterEvent> {
            &mut self.recorder
        }
    }

    #[test]
    fn test_raise_applies_immediately_and_records() {
        // Arrange
        let clock = FixedClock(Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap());
        let mut counter = Counter::empty(Uuid::new_v4());

        // Act
        counter.deposit(5, Uuid::new_v4(), &clock);
        counter.deposit(7, Uuid::new_v4(), &clock);

        // Assert
        assert_eq!(counter.total, 12);
        assert_eq!(counter.version(), 2);
        assert_eq!(counter.persisted_version(), 0);
        let versions: Vec<i64> = counter
            .uncommitted_events()
            .iter()
            .map(|e| e.metadata.stream_version)
            .collect();
        assert_eq!(versions, vec![1, 2]);
    }

    #[test]
    fn test_clear_uncommitted_events_keeps_version() {
        let clock = FixedClock(Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap());
        let mut counter = Counter::empty(Uuid::new_v4());
        counter.deposit(5, Uuid::new_v4(), &clock);

        counter.clear_uncommitted_events();

        assert!(counter.uncommitted_events().is_empty());
        assert_eq!(counter.version(), 1);
        assert_eq!(counter.persisted_version(), 1);
    }

    #[test]
    fn test_reconstitute_rejects_unknown_event_type() {
        let clock = FixedClock(Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap());
        let id = Uuid::new_v4();
        let mut counter = Counter::empty(id);
        counter.deposit(5, Uuid::new_v4(), &clock);
        let mut stored = counter.uncommitted_events()[0].to_stored().unwrap();
        stored.event_name = "counter.withdrawn".to_owned();

        let result = reconstitute::<Counter>(id, &[stored]);

        match result {
            Err(DomainError::UnknownEventType { event_name, .. }) => {
                assert_eq!(event_name, "counter.withdrawn");
            }
            other => panic!("expected UnknownEventType, got {other:?}"),
        }
    }

    #[test]
    fn test_reconstitute_matches_live_state() {
        let clock = FixedClock(Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap());
        let id = Uuid::new_v4();
        let mut live = Counter::empty(id);
        live.deposit(3, Uuid::new_v4(), &clock);
        live.deposit(4, Uuid::new_v4(), &clock);
        let stored: Vec<StoredEvent> = live
            .uncommitted_events()
            .iter()
            .map(|e| e.to_stored().unwrap())
            .collect();

        let rebuilt = reconstitute::<Counter>(id, &stored).unwrap();

        assert_eq!(rebuilt.total, live.total);
        assert_eq!(rebuilt.version(), live.version());
        assert!(rebuilt.uncommitted_events().is_empty());
    }
}
