//! `PostgreSQL` implementation of the `SnapshotRepository` trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use ledgerline_core::error::DomainError;
use ledgerline_core::snapshot::{Snapshot, SnapshotRepository};

use crate::storage_error;

#[derive(sqlx::FromRow)]
struct SnapshotRow {
    aggregate_id: Uuid,
    aggregate_type: String,
    version: i64,
    data: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl From<SnapshotRow> for Snapshot {
    fn from(row: SnapshotRow) -> Self {
        Self {
            aggregate_id: row.aggregate_id,
            aggregate_type: row.aggregate_type,
            version: row.version,
            data: row.data,
            created_at: row.created_at,
        }
    }
}

/// PostgreSQL-backed snapshot store.
#[derive(Debug, Clone)]
pub struct PgSnapshotRepository {
    pool: PgPool,
}

impl PgSnapshotRepository {
    /// Creates a new `PgSnapshotRepository`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SnapshotRepository for PgSnapshotRepository {
    async fn save(&self, snapshot: &Snapshot) -> Result<(), DomainError> {
        sqlx::query(
            r"
            INSERT INTO snapshots (aggregate_id, aggregate_type, version, data, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (aggregate_id, aggregate_type, version) DO NOTHING
            ",
        )
        .bind(snapshot.aggregate_id)
        .bind(&snapshot.aggregate_type)
        .bind(snapshot.version)
        .bind(&snapshot.data)
        .bind(snapshot.created_at)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        tracing::debug!(
            aggregate_id = %snapshot.aggregate_id,
            aggregate_type = %snapshot.aggregate_type,
            version = snapshot.version,
            "snapshot saved"
        );
        Ok(())
    }

    async fn load_latest(
        &self,
        aggregate_id: Uuid,
        aggregate_type: &str,
        max_version: Option<i64>,
    ) -> Result<Option<Snapshot>, DomainError> {
        let row = sqlx::query_as::<_, SnapshotRow>(
            r"
            SELECT aggregate_id, aggregate_type, version, data, created_at
            FROM snapshots
            WHERE aggregate_id = $1
              AND aggregate_type = $2
              AND ($3::bigint IS NULL OR version <= $3)
            ORDER BY version DESC
            LIMIT 1
            ",
        )
        .bind(aggregate_id)
        .bind(aggregate_type)
        .bind(max_version)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(row.map(Snapshot::from))
    }
}
