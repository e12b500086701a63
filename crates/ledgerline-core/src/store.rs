//! Loading and saving aggregates.
//!
//! [`AggregateStore`] ties together the event log, the optional snapshot
//! store and the optional field encryption. One store is built per request:
//! it borrows a request-scoped [`KeyRing`].

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::aggregate::AggregateRoot;
use crate::clock::Clock;
use crate::crypto::cipher::{EncryptedField, decrypt_value, encrypt_value};
use crate::crypto::{FieldEncryptor, KeyRing};
use crate::error::DomainError;
use crate::repository::{EventRepository, StoredEvent, StreamAppend, StreamFilter};
use crate::snapshot::{Snapshot, SnapshotPolicy, SnapshotRepository};
use crate::stream::EventStream;

/// Events and snapshots of several aggregates, persisted together.
#[derive(Debug, Default)]
pub struct UnitOfWork {
    appends: Vec<StreamAppend>,
    snapshots: Vec<Snapshot>,
}

impl UnitOfWork {
    /// An empty unit of work.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.appends.iter().all(|a| a.events.is_empty())
    }

    /// Streams with pending events, in tracking order.
    #[must_use]
    pub fn streams(&self) -> Vec<Uuid> {
        self.appends
            .iter()
            .filter(|a| !a.events.is_empty())
            .map(|a| a.stream_id)
            .collect()
    }

    /// Number of pending events across all streams.
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.appends.iter().map(|a| a.events.len()).sum()
    }
}

#[derive(Clone, Copy)]
struct Encryption<'a> {
    encryptor: &'a FieldEncryptor,
    keys: &'a KeyRing<'a>,
}

/// Event-sourced repository for aggregates of any type.
pub struct AggregateStore<'a> {
    events: &'a dyn EventRepository,
    clock: &'a dyn Clock,
    snapshots: Option<&'a dyn SnapshotRepository>,
    policy: SnapshotPolicy,
    encryption: Option<Encryption<'a>>,
}

impl std::fmt::Debug for AggregateStore<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateStore")
            .field("snapshots", &self.snapshots.is_some())
            .field("policy", &self.policy)
            .field("encryption", &self.encryption.is_some())
            .finish_non_exhaustive()
    }
}

impl<'a> AggregateStore<'a> {
    /// A store without snapshots or encryption.
    #[must_use]
    pub fn new(events: &'a dyn EventRepository, clock: &'a dyn Clock) -> Self {
        Self {
            events,
            clock,
            snapshots: None,
            policy: SnapshotPolicy::disabled(),
            encryption: None,
        }
    }

    /// Enables snapshotting under `policy`.
    #[must_use]
    pub fn with_snapshots(mut self, snapshots: &'a dyn SnapshotRepository, policy: SnapshotPolicy) -> Self {
        self.snapshots = Some(snapshots);
        self.policy = policy;
        self
    }

    /// Enables personal-data encryption with a request-scoped key ring.
    #[must_use]
    pub fn with_encryption(mut self, encryptor: &'a FieldEncryptor, keys: &'a KeyRing<'a>) -> Self {
        self.encryption = Some(Encryption { encryptor, keys });
        self
    }

    /// The underlying event log.
    #[must_use]
    pub fn events(&self) -> &'a dyn EventRepository {
        self.events
    }

    /// The clock stamped on new events.
    #[must_use]
    pub fn clock(&self) -> &'a dyn Clock {
        self.clock
    }

    /// Decrypts the personal-data fields of a loaded event in place.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::KeyErased` or `DomainError::Decryption`.
    pub async fn decrypt(&self, event: &mut StoredEvent) -> Result<(), DomainError> {
        match self.encryption {
            Some(enc) => enc.encryptor.decrypt(event, enc.keys).await,
            None => Ok(()),
        }
    }

    /// Opens a lazy reader over a stream; pair with [`AggregateStore::decrypt`].
    #[must_use]
    pub fn stream(&self, stream_id: Uuid, filter: StreamFilter) -> EventStream<'a> {
        EventStream::new(self.events, stream_id, filter)
    }

    /// Reconstructs an aggregate, as of now or as of a past moment.
    ///
    /// Starts from the newest snapshot at or below the last version visible at
    /// `as_of`, then folds only the events after it. Picking the snapshot by
    /// version is exact because `occurred_on` never decreases along a stream
    /// (see [`StreamAppend::numbered_events`]), so the events visible at
    /// `as_of` are always a prefix of the stream.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::StreamNotFound` if nothing was appended (or
    /// nothing had been appended at `as_of`), `DomainError::StreamEmpty` if a
    /// snapshot exists for a stream without events, and propagates decoding,
    /// decryption and storage errors.
    pub async fn load<A: AggregateRoot>(
        &self,
        id: Uuid,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<A, DomainError> {
        let target = self.events.current_version(id, as_of).await?;
        if target == 0 {
            return Err(self.missing::<A>(id).await?);
        }

        let (mut aggregate, after) = match self.snapshot_at::<A>(id, target).await? {
            Some(snapshot) => (snapshot.restore::<A>()?, snapshot.version),
            None => (A::empty(id), 0),
        };

        let mut stream = self
            .stream(id, StreamFilter::as_of(as_of))
            .after_version(after);
        while let Some(mut stored) = stream.next_event().await? {
            if stored.stream_version > target {
                break;
            }
            self.decrypt(&mut stored).await?;
            aggregate.replay(&stored)?;
        }

        tracing::debug!(
            stream_id = %id,
            aggregate_type = A::AGGREGATE_TYPE,
            from_snapshot = after,
            version = aggregate.version(),
            "aggregate loaded"
        );
        Ok(aggregate)
    }

    async fn missing<A: AggregateRoot>(&self, id: Uuid) -> Result<DomainError, DomainError> {
        if self.events.current_version(id, None).await? > 0 {
            return Ok(DomainError::StreamNotFound(id));
        }
        if let Some(snapshots) = self.snapshots {
            if snapshots
                .load_latest(id, A::AGGREGATE_TYPE, None)
                .await?
                .is_some()
            {
                return Ok(DomainError::StreamEmpty(id));
            }
        }
        Ok(DomainError::StreamNotFound(id))
    }

    async fn snapshot_at<A: AggregateRoot>(
        &self,
        id: Uuid,
        target: i64,
    ) -> Result<Option<Snapshot>, DomainError> {
        let Some(snapshots) = self.snapshots else {
            return Ok(None);
        };
        let Some(mut snapshot) = snapshots
            .load_latest(id, A::AGGREGATE_TYPE, Some(target))
            .await?
        else {
            return Ok(None);
        };
        if let Some(owner_id) = snapshot_owner(&snapshot) {
            let Some(enc) = self.encryption else {
                return Ok(None);
            };
            match enc.keys.key_for_read(owner_id).await {
                Ok(key) => {
                    let sealed: EncryptedField = serde_json::from_value(snapshot.data["sealed"].clone())?;
                    snapshot.data = decrypt_value(&sealed, &key, A::AGGREGATE_TYPE)?;
                }
                Err(DomainError::KeyErased(_)) => return Ok(None),
                Err(e) => return Err(e),
            }
        }
        Ok(Some(snapshot))
    }

    /// Adds the aggregate's raised events (encrypted) to `unit`, plus a
    /// snapshot if this save crosses a snapshot boundary.
    ///
    /// # Errors
    ///
    /// Returns encryption or serialization errors; nothing is added then.
    pub async fn track<A: AggregateRoot>(
        &self,
        unit: &mut UnitOfWork,
        aggregate: &A,
    ) -> Result<(), DomainError> {
        let raised = aggregate.uncommitted_events();
        if raised.is_empty() {
            return Ok(());
        }

        let mut events = Vec::with_capacity(raised.len());
        for event in raised {
            let mut stored = event.to_stored()?;
            if let Some(enc) = self.encryption {
                enc.encryptor.encrypt(&mut stored, enc.keys).await?;
            }
            events.push(stored);
        }

        let expected_version = aggregate.persisted_version();
        let snapshot = if self.snapshots.is_some()
            && self.policy.crossed(expected_version, aggregate.version())
        {
            Some(self.capture(aggregate).await?)
        } else {
            None
        };

        unit.appends.push(StreamAppend {
            stream_id: aggregate.aggregate_id(),
            expected_version,
            events,
        });
        unit.snapshots.extend(snapshot);
        Ok(())
    }

    async fn capture<A: AggregateRoot>(&self, aggregate: &A) -> Result<Snapshot, DomainError> {
        let mut snapshot = Snapshot::capture(aggregate, self.clock.now())?;
        if let Some(owner_id) = aggregate.personal_data_owner() {
            let enc = self.encryption.ok_or_else(|| {
                DomainError::Encryption(format!(
                    "{} snapshot holds personal data but encryption is not configured",
                    A::AGGREGATE_TYPE
                ))
            })?;
            let key = enc.keys.key_for_write(owner_id).await?;
            let sealed = encrypt_value(&snapshot.data, &key, A::AGGREGATE_TYPE)?;
            snapshot.data = serde_json::json!({
                "owner_id": owner_id,
                "sealed": serde_json::to_value(sealed)?,
            });
        }
        Ok(snapshot)
    }

    /// Persists every tracked stream in one transaction, then writes pending
    /// snapshots. A snapshot failure is logged, never surfaced: the events are
    /// already committed and snapshots are only an optimization.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::ConcurrencyConflict` if any stream moved on since
    /// it was loaded (nothing is written), or storage errors.
    pub async fn commit(&self, unit: UnitOfWork) -> Result<(), DomainError> {
        if unit.is_empty() {
            return Ok(());
        }
        let appends: Vec<StreamAppend> = unit
            .appends
            .into_iter()
            .filter(|a| !a.events.is_empty())
            .collect();
        self.events.commit(&appends).await?;
        tracing::debug!(streams = appends.len(), "unit of work committed");

        if let Some(snapshots) = self.snapshots {
            for snapshot in &unit.snapshots {
                if let Err(e) = snapshots.save(snapshot).await {
                    tracing::warn!(
                        aggregate_id = %snapshot.aggregate_id,
                        version = snapshot.version,
                        error = %e,
                        "snapshot save failed"
                    );
                }
            }
        }
        Ok(())
    }

    /// Saves a single aggregate and clears its raised events.
    ///
    /// # Errors
    ///
    /// See [`AggregateStore::commit`].
    pub async fn save<A: AggregateRoot>(&self, aggregate: &mut A) -> Result<(), DomainError> {
        let mut unit = UnitOfWork::new();
        self.track(&mut unit, aggregate).await?;
        self.commit(unit).await?;
        aggregate.clear_uncommitted_events();
        Ok(())
    }
}

fn snapshot_owner(snapshot: &Snapshot) -> Option<Uuid> {
    snapshot
        .data
        .get("sealed")
        .and(snapshot.data.get("owner_id"))
        .and_then(|v| serde_json::from_value(v.clone()).ok())
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::TimeZone;

    use super::*;
    use crate::aggregate::tests::{Counter, FixedClock};
    use crate::repository::validate_commit;

    /// Single-process event log with real version checks.
    #[derive(Default)]
    pub(crate) struct VecEventRepository {
        events: Mutex<Vec<StoredEvent>>,
    }

    #[async_trait]
    impl EventRepository for VecEventRepository {
        async fn load_page(
            &self,
            stream_id: Uuid,
            filter: &StreamFilter,
            after_version: i64,
            limit: usize,
        ) -> Result<Vec<StoredEvent>, DomainError> {
            Ok(self
                .events
                .lock()
                .unwrap()
                .iter()
                .filter(|e| {
                    e.stream_id == stream_id && e.stream_version > after_version && filter.matches(e)
                })
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
                .events
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.stream_id == stream_id && as_of.is_none_or(|t| e.occurred_on <= t))
                .map(|e| e.stream_version)
                .max()
                .unwrap_or(0))
        }

        async fn commit(&self, appends: &[StreamAppend]) -> Result<(), DomainError> {
            validate_commit(appends)?;
            let mut events = self.events.lock().unwrap();
            for append in appends {
                let actual = events
                    .iter()
                    .filter(|e| e.stream_id == append.stream_id)
                    .count() as i64;
                if actual != append.expected_version {
                    return Err(DomainError::ConcurrencyConflict {
                        stream_id: append.stream_id,
                        expected: append.expected_version,
                        actual,
                    });
                }
            }
            for append in appends {
                let last = events
                    .iter()
                    .filter(|e| e.stream_id == append.stream_id)
                    .map(|e| e.occurred_on)
                    .max();
                let numbered = append.numbered_events(last);
                events.extend(numbered);
            }
            Ok(())
        }
    }

    pub(crate) fn clock() -> FixedClock {
        FixedClock(Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap())
    }

    #[tokio::test]
    async fn test_save_then_load_round_trips_state() {
        // Arrange
        let repo = VecEventRepository::default();
        let clock = clock();
        let store = AggregateStore::new(&repo, &clock);
        let id = Uuid::new_v4();
        let mut counter = Counter::empty(id);
        counter.deposit(10, Uuid::new_v4(), &clock);
        counter.deposit(5, Uuid::new_v4(), &clock);

        // Act
        store.save(&mut counter).await.unwrap();
        let loaded: Counter = store.load(id, None).await.unwrap();

        // Assert
        assert!(counter.uncommitted_events().is_empty());
        assert_eq!(loaded.total, 15);
        assert_eq!(loaded.version, 2);
    }

    #[tokio::test]
    async fn test_load_missing_stream_returns_stream_not_found() {
        let repo = VecEventRepository::default();
        let clock = clock();
        let store = AggregateStore::new(&repo, &clock);
        let id = Uuid::new_v4();

        let result = store.load::<Counter>(id, None).await;

        match result {
            Err(DomainError::StreamNotFound(missing)) => assert_eq!(missing, id),
            other => panic!("expected StreamNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stale_save_is_rejected() {
        let repo = VecEventRepository::default();
        let clock = clock();
        let store = AggregateStore::new(&repo, &clock);
        let id = Uuid::new_v4();
        let mut counter = Counter::empty(id);
        counter.deposit(1, Uuid::new_v4(), &clock);
        store.save(&mut counter).await.unwrap();

        let mut first: Counter = store.load(id, None).await.unwrap();
        let mut second: Counter = store.load(id, None).await.unwrap();
        first.deposit(2, Uuid::new_v4(), &clock);
        second.deposit(3, Uuid::new_v4(), &clock);
        store.save(&mut first).await.unwrap();
        let result = store.save(&mut second).await;

        assert!(matches!(
            result,
            Err(DomainError::ConcurrencyConflict {
                expected: 1,
                actual: 2,
                ..
            })
        ));
        assert_eq!(second.uncommitted_events().len(), 1);
    }

    #[tokio::test]
    async fn test_unit_of_work_reports_tracked_streams() {
        let repo = VecEventRepository::default();
        let clock = clock();
        let store = AggregateStore::new(&repo, &clock);
        let mut a = Counter::empty(Uuid::new_v4());
        let b = Counter::empty(Uuid::new_v4());
        a.deposit(1, Uuid::new_v4(), &clock);

        let mut unit = UnitOfWork::new();
        store.track(&mut unit, &a).await.unwrap();
        store.track(&mut unit, &b).await.unwrap();

        assert_eq!(unit.streams(), vec![a.id]);
        assert_eq!(unit.event_count(), 1);
    }
}
