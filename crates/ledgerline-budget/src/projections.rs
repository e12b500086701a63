//! PostgreSQL read models fed by the projection manager.
//!
//! Live delivery writes them inside the append transaction through
//! `PgProjection`; replay writes each batch in a transaction of its own.
//! Every write is an upsert guarded by the stream version, so a batch that is
//! delivered twice (live dispatch followed by a replay, or a resumed replay)
//! leaves the rows unchanged.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledgerline_core::error::DomainError;
use ledgerline_core::event::DomainEvent;
use ledgerline_core::projection::{HandlerFailure, Projection, ProjectionStatus};
use ledgerline_core::repository::StoredEvent;
use ledgerline_event_store::pg_projection::PgProjection;
use sqlx::{PgConnection, PgPool};

use crate::domain::events::{
    CATEGORY_ARCHIVED, CATEGORY_CREATED, CATEGORY_RENAMED, CategoryEvent, MEMBER_EMAIL_CHANGED,
    MEMBER_ERASED, MEMBER_REGISTERED, MemberEvent,
};

/// Name of the category list projection.
pub const CATEGORY_LIST: &str = "category_list";
/// Name of the member directory projection.
pub const MEMBER_DIRECTORY: &str = "member_directory";

const CATEGORY_EVENTS: &[&str] = &[CATEGORY_CREATED, CATEGORY_RENAMED, CATEGORY_ARCHIVED];
const MEMBER_EVENTS: &[&str] = &[MEMBER_REGISTERED, MEMBER_EMAIL_CHANGED, MEMBER_ERASED];

fn storage_error(err: sqlx::Error) -> DomainError {
    DomainError::StorageUnavailable(err.to_string())
}

fn failure_at(event: &StoredEvent) -> impl FnOnce(sqlx::Error) -> HandlerFailure {
    let event_id = event.event_id;
    move |err| HandlerFailure::at(event_id, storage_error(err))
}

fn decode<E: DomainEvent>(event: &StoredEvent) -> Result<E, HandlerFailure> {
    E::decode(&event.event_name, event.event_version, event.payload.clone())
        .map_err(|e| HandlerFailure::at(event.event_id, e))
}

async fn table_status(
    pool: &PgPool,
    name: &str,
    table: &str,
) -> Result<ProjectionStatus, DomainError> {
    let (rows, last_updated): (i64, Option<DateTime<Utc>>) =
        sqlx::query_as(&format!("SELECT COUNT(*), MAX(updated_at) FROM {table}"))
            .fetch_one(pool)
            .await
            .map_err(storage_error)?;
    Ok(ProjectionStatus {
        name: name.to_owned(),
        rows,
        last_updated,
    })
}

/// Categories per owner, for listing screens.
#[derive(Debug, Clone)]
pub struct CategoryListProjection {
    pool: PgPool,
}

impl CategoryListProjection {
    /// Creates the projection over `pool`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn apply(
        conn: &mut PgConnection,
        event: &StoredEvent,
    ) -> Result<(), HandlerFailure> {
        match decode::<CategoryEvent>(event)? {
            CategoryEvent::Created(p) => {
                sqlx::query(
                    r"
                    INSERT INTO category_read_model
                        (category_id, owner_id, name, category_group, archived, version, updated_at)
                    VALUES ($1, $2, $3, $4, FALSE, $5, $6)
                    ON CONFLICT (category_id) DO UPDATE
                    SET owner_id = EXCLUDED.owner_id,
                        name = EXCLUDED.name,
                        category_group = EXCLUDED.category_group,
                        version = EXCLUDED.version,
                        updated_at = EXCLUDED.updated_at
                    WHERE category_read_model.version < EXCLUDED.version
                    ",
                )
                .bind(p.category_id)
                .bind(p.owner_id)
                .bind(&p.name)
                .bind(&p.group)
                .bind(event.stream_version)
                .bind(event.occurred_on)
                .execute(&mut *conn)
                .await
                .map_err(failure_at(event))?;
            }
            CategoryEvent::Renamed(p) => {
                sqlx::query(
                    r"
                    UPDATE category_read_model
                    SET name = $2, version = $3, updated_at = $4
                    WHERE category_id = $1 AND version < $3
                    ",
                )
                .bind(p.category_id)
                .bind(&p.name)
                .bind(event.stream_version)
                .bind(event.occurred_on)
                .execute(&mut *conn)
                .await
                .map_err(failure_at(event))?;
            }
            CategoryEvent::Archived(p) => {
                sqlx::query(
                    r"
                    UPDATE category_read_model
                    SET archived = TRUE, version = $2, updated_at = $3
                    WHERE category_id = $1 AND version < $2
                    ",
                )
                .bind(p.category_id)
                .bind(event.stream_version)
                .bind(event.occurred_on)
                .execute(&mut *conn)
                .await
                .map_err(failure_at(event))?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PgProjection for CategoryListProjection {
    fn name(&self) -> &str {
        CATEGORY_LIST
    }

    fn handles(&self) -> &[&'static str] {
        CATEGORY_EVENTS
    }

    async fn apply_in(
        &self,
        conn: &mut PgConnection,
        events: &[StoredEvent],
    ) -> Result<(), HandlerFailure> {
        for event in events {
            Self::apply(conn, event).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Projection for CategoryListProjection {
    fn name(&self) -> &str {
        CATEGORY_LIST
    }

    fn handles(&self) -> &[&'static str] {
        CATEGORY_EVENTS
    }

    async fn apply_batch(&self, events: &[StoredEvent]) -> Result<(), HandlerFailure> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        self.apply_in(&mut *tx, events).await?;
        tx.commit().await.map_err(storage_error)?;
        Ok(())
    }

    async fn truncate(&self) -> Result<(), DomainError> {
        sqlx::query("TRUNCATE category_read_model")
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(())
    }

    async fn status(&self) -> Result<ProjectionStatus, DomainError> {
        table_status(&self.pool, CATEGORY_LIST, "category_read_model").await
    }
}

/// Member contact details. Erased members keep a row with the personal
/// columns cleared.
#[derive(Debug, Clone)]
pub struct MemberDirectoryProjection {
    pool: PgPool,
}

impl MemberDirectoryProjection {
    /// Creates the projection over `pool`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn apply(
        conn: &mut PgConnection,
        event: &StoredEvent,
    ) -> Result<(), HandlerFailure> {
        match decode::<MemberEvent>(event)? {
            MemberEvent::Registered(p) => {
                sqlx::query(
                    r"
                    INSERT INTO member_directory
                        (member_id, email, display_name, erased, version, updated_at)
                    VALUES ($1, $2, $3, FALSE, $4, $5)
                    ON CONFLICT (member_id) DO UPDATE
                    SET email = EXCLUDED.email,
                        display_name = EXCLUDED.display_name,
                        version = EXCLUDED.version,
                        updated_at = EXCLUDED.updated_at
                    WHERE member_directory.version < EXCLUDED.version
                    ",
                )
                .bind(p.member_id)
                .bind(&p.email)
                .bind(&p.display_name)
                .bind(event.stream_version)
                .bind(event.occurred_on)
                .execute(&mut *conn)
                .await
                .map_err(failure_at(event))?;
            }
            MemberEvent::EmailChanged(p) => {
                sqlx::query(
                    r"
                    UPDATE member_directory
                    SET email = $2, version = $3, updated_at = $4
                    WHERE member_id = $1 AND version < $3
                    ",
                )
                .bind(p.member_id)
                .bind(&p.email)
                .bind(event.stream_version)
                .bind(event.occurred_on)
                .execute(&mut *conn)
                .await
                .map_err(failure_at(event))?;
            }
            // The registration may have been skipped as unreadable, so the
            // row is created if missing.
            MemberEvent::Erased(p) => {
                sqlx::query(
                    r"
                    INSERT INTO member_directory
                        (member_id, email, display_name, erased, version, updated_at)
                    VALUES ($1, NULL, NULL, TRUE, $2, $3)
                    ON CONFLICT (member_id) DO UPDATE
                    SET email = NULL,
                        display_name = NULL,
                        erased = TRUE,
                        version = EXCLUDED.version,
                        updated_at = EXCLUDED.updated_at
                    WHERE member_directory.version < EXCLUDED.version
                    ",
                )
                .bind(p.member_id)
                .bind(event.stream_version)
                .bind(event.occurred_on)
                .execute(&mut *conn)
                .await
                .map_err(failure_at(event))?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PgProjection for MemberDirectoryProjection {
    fn name(&self) -> &str {
        MEMBER_DIRECTORY
    }

    fn handles(&self) -> &[&'static str] {
        MEMBER_EVENTS
    }

    async fn apply_in(
        &self,
        conn: &mut PgConnection,
        events: &[StoredEvent],
    ) -> Result<(), HandlerFailure> {
        for event in events {
            Self::apply(conn, event).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Projection for MemberDirectoryProjection {
    fn name(&self) -> &str {
        MEMBER_DIRECTORY
    }

    fn handles(&self) -> &[&'static str] {
        MEMBER_EVENTS
    }

    async fn apply_batch(&self, events: &[StoredEvent]) -> Result<(), HandlerFailure> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        self.apply_in(&mut *tx, events).await?;
        tx.commit().await.map_err(storage_error)?;
        Ok(())
    }

    async fn truncate(&self) -> Result<(), DomainError> {
        sqlx::query("TRUNCATE member_directory")
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(())
    }

    async fn status(&self) -> Result<ProjectionStatus, DomainError> {
        table_status(&self.pool, MEMBER_DIRECTORY, "member_directory").await
    }
}
