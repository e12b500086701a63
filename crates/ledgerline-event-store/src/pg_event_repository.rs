//! `PostgreSQL` implementation of the `EventRepository` trait.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use uuid::Uuid;

use ledgerline_core::error::DomainError;
use ledgerline_core::repository::{
    EventRepository, GlobalEventLog, LogQuery, PositionedEvent, StoredEvent,
    StreamAppend, StreamFilter, validate_commit,
};

use crate::schema::STREAM_VERSION_CONSTRAINT;
use crate::{sql_limit, storage_error};

#[derive(sqlx::FromRow)]
struct EventRow {
    position: i64,
    event_id: Uuid,
    stream_id: Uuid,
    stream_version: i64,
    event_name: String,
    event_version: i32,
    payload: serde_json::Value,
    occurred_on: DateTime<Utc>,
    request_id: Uuid,
    owner_id: Option<Uuid>,
    meta_data: serde_json::Value,
}

impl EventRow {
    fn into_positioned(self) -> PositionedEvent {
        PositionedEvent {
            position: self.position,
            event: StoredEvent {
                event_id: self.event_id,
                stream_id: self.stream_id,
                stream_version: self.stream_version,
                event_name: self.event_name,
                event_version: self.event_version,
                payload: self.payload,
                occurred_on: self.occurred_on,
                request_id: self.request_id,
                owner_id: self.owner_id,
                meta_data: self.meta_data,
            },
        }
    }
}

/// Receiver of each commit's events on the append transaction's own
/// connection. Whatever it writes through `conn` commits or rolls back with
/// the events.
#[async_trait]
pub trait PgEventConsumer: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Handles the events of one commit before it is made durable.
    async fn consume(
        &self,
        conn: &mut PgConnection,
        events: &[StoredEvent],
    ) -> Result<(), DomainError>;
}

const SELECT_COLUMNS: &str = "position, event_id, stream_id, stream_version, event_name, \
     event_version, payload, occurred_on, request_id, owner_id, meta_data";

/// PostgreSQL-backed event repository.
///
/// Registered consumers receive each commit's events on the open transaction;
/// if any consumer fails the transaction is rolled back, so the log never
/// holds events a consumer has rejected and a consumer's writes never
/// outlive a rejected append.
#[derive(Clone)]
pub struct PgEventRepository {
    pool: PgPool,
    consumers: Vec<Arc<dyn PgEventConsumer>>,
}

impl std::fmt::Debug for PgEventRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let consumers: Vec<&str> = self.consumers.iter().map(|c| c.name()).collect();
        f.debug_struct("PgEventRepository")
            .field("consumers", &consumers)
            .finish_non_exhaustive()
    }
}

impl PgEventRepository {
    /// Creates a new `PgEventRepository`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            consumers: Vec::new(),
        }
    }

    /// Adds a consumer notified on every commit.
    #[must_use]
    pub fn with_consumer(mut self, consumer: Arc<dyn PgEventConsumer>) -> Self {
        self.consumers.push(consumer);
        self
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Current version of the stream and when its last event occurred.
    async fn head_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        stream_id: Uuid,
    ) -> Result<(i64, Option<DateTime<Utc>>), DomainError> {
        sqlx::query_as::<_, (i64, Option<DateTime<Utc>>)>(
            r"
            SELECT COALESCE(MAX(stream_version), 0), MAX(occurred_on)
            FROM event_store
            WHERE stream_id = $1
            ",
        )
        .bind(stream_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(storage_error)
    }

    async fn insert(
        tx: &mut Transaction<'_, Postgres>,
        event: &StoredEvent,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r"
            INSERT INTO event_store
                (event_id, stream_id, stream_version, event_name, event_version,
                 payload, occurred_on, request_id, owner_id, meta_data)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ",
        )
        .bind(event.event_id)
        .bind(event.stream_id)
        .bind(event.stream_version)
        .bind(&event.event_name)
        .bind(event.event_version)
        .bind(&event.payload)
        .bind(event.occurred_on)
        .bind(event.request_id)
        .bind(event.owner_id)
        .bind(&event.meta_data)
        .execute(&mut **tx)
        .await
        .map(|_| ())
    }

    /// Translates an insert failure. Losing the race on the stream version
    /// constraint is a concurrency conflict; the winner's version is read
    /// back outside the aborted transaction.
    async fn insert_error(&self, err: sqlx::Error, append: &StreamAppend) -> DomainError {
        let lost_race = matches!(
            &err,
            sqlx::Error::Database(db)
                if db.is_unique_violation() && db.constraint() == Some(STREAM_VERSION_CONSTRAINT)
        );
        if !lost_race {
            return storage_error(err);
        }
        let actual = self
            .current_version(append.stream_id, None)
            .await
            .unwrap_or(append.expected_version + 1);
        DomainError::ConcurrencyConflict {
            stream_id: append.stream_id,
            expected: append.expected_version,
            actual,
        }
    }
}

#[async_trait]
impl EventRepository for PgEventRepository {
    async fn load_page(
        &self,
        stream_id: Uuid,
        filter: &StreamFilter,
        after_version: i64,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        let sql = format!(
            r"
            SELECT {SELECT_COLUMNS}
            FROM event_store
            WHERE stream_id = $1
              AND stream_version > $2
              AND ($3::timestamptz IS NULL OR occurred_on <= $3)
              AND ($4::text[] IS NULL OR event_name = ANY($4))
            ORDER BY stream_version ASC
            LIMIT $5
            "
        );
        let rows = sqlx::query_as::<_, EventRow>(&sql)
            .bind(stream_id)
            .bind(after_version)
            .bind(filter.as_of)
            .bind(filter.event_names.as_deref())
            .bind(sql_limit(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(rows
            .into_iter()
            .map(|row| row.into_positioned().event)
            .collect())
    }

    async fn current_version(
        &self,
        stream_id: Uuid,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<i64, DomainError> {
        sqlx::query_scalar::<_, i64>(
            r"
            SELECT COALESCE(MAX(stream_version), 0)
            FROM event_store
            WHERE stream_id = $1
              AND ($2::timestamptz IS NULL OR occurred_on <= $2)
            ",
        )
        .bind(stream_id)
        .bind(as_of)
        .fetch_one(&self.pool)
        .await
        .map_err(storage_error)
    }

    async fn commit(&self, appends: &[StreamAppend]) -> Result<(), DomainError> {
        validate_commit(appends)?;
        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        let mut committed = Vec::new();

        for append in appends.iter().filter(|a| !a.events.is_empty()) {
            let (actual, last_occurred_on) = Self::head_in_tx(&mut tx, append.stream_id).await?;
            if actual != append.expected_version {
                return Err(DomainError::ConcurrencyConflict {
                    stream_id: append.stream_id,
                    expected: append.expected_version,
                    actual,
                });
            }
            for event in append.numbered_events(last_occurred_on) {
                if let Err(e) = Self::insert(&mut tx, &event).await {
                    drop(tx);
                    return Err(self.insert_error(e, append).await);
                }
                committed.push(event);
            }
        }

        for consumer in &self.consumers {
            if let Err(e) = consumer.consume(&mut *tx, &committed).await {
                tracing::error!(
                    consumer = consumer.name(),
                    events = committed.len(),
                    error = %e,
                    "event consumer failed, rolling back append"
                );
                tx.rollback().await.map_err(storage_error)?;
                return Err(e);
            }
        }

        tx.commit().await.map_err(storage_error)?;
        tracing::debug!(
            streams = appends.len(),
            events = committed.len(),
            "events appended"
        );
        Ok(())
    }
}

#[async_trait]
impl GlobalEventLog for PgEventRepository {
    async fn read_log(&self, query: &LogQuery) -> Result<Vec<PositionedEvent>, DomainError> {
        let sql = format!(
            r"
            SELECT {SELECT_COLUMNS}
            FROM event_store
            WHERE position > $1
              AND (cardinality($2::text[]) = 0 OR event_name = ANY($2))
              AND ($3::timestamptz IS NULL OR occurred_on >= $3)
            ORDER BY position ASC
            LIMIT $4
            "
        );
        let rows = sqlx::query_as::<_, EventRow>(&sql)
            .bind(query.after_position)
            .bind(&query.event_names)
            .bind(query.from)
            .bind(sql_limit(query.limit))
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(rows.into_iter().map(EventRow::into_positioned).collect())
    }
}
