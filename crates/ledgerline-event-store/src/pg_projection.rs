//! Live projection dispatch inside the append transaction.
//!
//! Read models stored next to the event log are written on the same
//! connection as the events, so a rejected append leaves them untouched and a
//! writer holds a single connection.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgConnection;
use uuid::Uuid;

use ledgerline_core::crypto::{EncryptionKey, FieldEncryptor, KeyManager, KeyRing};
use ledgerline_core::error::DomainError;
use ledgerline_core::projection::{HandlerFailure, decrypt_for_projection};
use ledgerline_core::repository::StoredEvent;

use crate::pg_event_repository::PgEventConsumer;
use crate::pg_key_manager::load_keys;

/// A read model in the event database that can be written through a
/// borrowed connection.
#[async_trait]
pub trait PgProjection: Send + Sync {
    /// Stable name used by operators.
    fn name(&self) -> &str;

    /// Event names this projection reacts to.
    fn handles(&self) -> &[&'static str];

    /// Applies decrypted events on `conn` without committing.
    async fn apply_in(
        &self,
        conn: &mut PgConnection,
        events: &[StoredEvent],
    ) -> Result<(), HandlerFailure>;
}

/// Keys read on the append connection. Dispatch only decrypts, so it never
/// creates or deletes keys.
struct LoadedKeys(HashMap<Uuid, EncryptionKey>);

#[async_trait]
impl KeyManager for LoadedKeys {
    async fn get_key(&self, owner_id: Uuid) -> Result<Option<EncryptionKey>, DomainError> {
        Ok(self.0.get(&owner_id).cloned())
    }

    async fn generate_key(&self, owner_id: Uuid) -> Result<EncryptionKey, DomainError> {
        Err(DomainError::Encryption(format!(
            "projection dispatch cannot create a key for owner {owner_id}"
        )))
    }

    async fn delete_key(&self, owner_id: Uuid) -> Result<(), DomainError> {
        Err(DomainError::Encryption(format!(
            "projection dispatch cannot delete the key of owner {owner_id}"
        )))
    }
}

/// Feeds each commit to the registered `PgProjection`s on the append
/// transaction. Events of erased subjects are skipped.
#[derive(Default)]
pub struct PgProjectionDispatcher {
    encryptor: FieldEncryptor,
    projections: Vec<Arc<dyn PgProjection>>,
}

impl std::fmt::Debug for PgProjectionDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let projections: Vec<&str> = self.projections.iter().map(|p| p.name()).collect();
        f.debug_struct("PgProjectionDispatcher")
            .field("projections", &projections)
            .finish_non_exhaustive()
    }
}

impl PgProjectionDispatcher {
    /// A dispatcher decrypting with `encryptor` and no projections yet.
    #[must_use]
    pub fn new(encryptor: FieldEncryptor) -> Self {
        Self {
            encryptor,
            projections: Vec::new(),
        }
    }

    /// Adds a projection; projections are fed in the order added.
    #[must_use]
    pub fn with_projection(mut self, projection: Arc<dyn PgProjection>) -> Self {
        self.projections.push(projection);
        self
    }
}

#[async_trait]
impl PgEventConsumer for PgProjectionDispatcher {
    fn name(&self) -> &str {
        "projections"
    }

    async fn consume(
        &self,
        conn: &mut PgConnection,
        events: &[StoredEvent],
    ) -> Result<(), DomainError> {
        let mut owners: Vec<Uuid> = events.iter().filter_map(|e| e.owner_id).collect();
        owners.sort_unstable();
        owners.dedup();
        let keys = LoadedKeys(load_keys(conn, &owners).await?);
        let ring = KeyRing::new(&keys);

        for projection in &self.projections {
            let handles = projection.handles();
            let relevant: Vec<StoredEvent> = events
                .iter()
                .filter(|e| handles.contains(&e.event_name.as_str()))
                .cloned()
                .collect();
            if relevant.is_empty() {
                continue;
            }
            let (readable, _) =
                decrypt_for_projection(&self.encryptor, &ring, projection.name(), relevant)
                    .await
                    .map_err(|f| f.into_error(projection.name()))?;
            if readable.is_empty() {
                continue;
            }
            projection
                .apply_in(conn, &readable)
                .await
                .map_err(|f| f.into_error(projection.name()))?;
            tracing::debug!(
                projection = projection.name(),
                events = readable.len(),
                "projection updated in append transaction"
            );
        }
        Ok(())
    }
}
