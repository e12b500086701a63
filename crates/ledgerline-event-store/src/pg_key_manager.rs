//! `PostgreSQL` implementation of the `KeyManager` trait.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use ledgerline_core::crypto::{EncryptionKey, KeyManager};
use ledgerline_core::error::DomainError;

use crate::storage_error;

/// PostgreSQL-backed store of per-owner data keys.
///
/// Deleting a key leaves a tombstone row with no material, which also
/// blocks the owner's key from ever being generated again.
#[derive(Debug, Clone)]
pub struct PgKeyManager {
    pool: PgPool,
}

impl PgKeyManager {
    /// Creates a new `PgKeyManager`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Reads the live keys of `owners` on `conn`. Erased and unknown owners are
/// absent from the result.
pub(crate) async fn load_keys(
    conn: &mut PgConnection,
    owners: &[Uuid],
) -> Result<HashMap<Uuid, EncryptionKey>, DomainError> {
    if owners.is_empty() {
        return Ok(HashMap::new());
    }
    let rows = sqlx::query_as::<_, (Uuid, Vec<u8>)>(
        r"
        SELECT owner_id, key_material
        FROM encryption_keys
        WHERE owner_id = ANY($1) AND key_material IS NOT NULL
        ",
    )
    .bind(owners)
    .fetch_all(&mut *conn)
    .await
    .map_err(storage_error)?;
    rows.into_iter()
        .map(|(owner_id, material)| {
            EncryptionKey::from_bytes(&material).map(|key| (owner_id, key))
        })
        .collect()
}

#[async_trait]
impl KeyManager for PgKeyManager {
    async fn get_key(&self, owner_id: Uuid) -> Result<Option<EncryptionKey>, DomainError> {
        let material = sqlx::query_scalar::<_, Option<Vec<u8>>>(
            "SELECT key_material FROM encryption_keys WHERE owner_id = $1",
        )
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?
        .flatten();
        material.as_deref().map(EncryptionKey::from_bytes).transpose()
    }

    async fn generate_key(&self, owner_id: Uuid) -> Result<EncryptionKey, DomainError> {
        let candidate = EncryptionKey::generate();
        // A concurrent first write may have stored a key already; keep theirs.
        // A tombstone also conflicts, and reads back as erased.
        let inserted = sqlx::query(
            r"
            INSERT INTO encryption_keys (owner_id, key_material)
            VALUES ($1, $2)
            ON CONFLICT (owner_id) DO NOTHING
            ",
        )
        .bind(owner_id)
        .bind(candidate.as_bytes())
        .execute(&self.pool)
        .await
        .map_err(storage_error)?
        .rows_affected();

        if inserted == 1 {
            tracing::debug!(%owner_id, "encryption key stored");
            return Ok(candidate);
        }
        self.get_key(owner_id)
            .await?
            .ok_or(DomainError::KeyErased(owner_id))
    }

    async fn delete_key(&self, owner_id: Uuid) -> Result<(), DomainError> {
        sqlx::query(
            r"
            INSERT INTO encryption_keys (owner_id, key_material, erased_at)
            VALUES ($1, NULL, NOW())
            ON CONFLICT (owner_id) DO UPDATE
            SET key_material = NULL,
                erased_at = COALESCE(encryption_keys.erased_at, EXCLUDED.erased_at)
            ",
        )
        .bind(owner_id)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(())
    }
}
