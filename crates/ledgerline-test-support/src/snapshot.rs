//! Snapshot store doubles.

use std::sync::Mutex;

use async_trait::async_trait;
use ledgerline_core::error::DomainError;
use ledgerline_core::snapshot::{Snapshot, SnapshotRepository};
use uuid::Uuid;

/// Keeps snapshots in memory.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    snapshots: Mutex<Vec<Snapshot>>,
}

impl InMemorySnapshotStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored snapshot, in save order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn saved(&self) -> Vec<Snapshot> {
        self.snapshots.lock().unwrap().clone()
    }
}

#[async_trait]
impl SnapshotRepository for InMemorySnapshotStore {
    async fn save(&self, snapshot: &Snapshot) -> Result<(), DomainError> {
        let mut snapshots = self.snapshots.lock().unwrap();
        let exists = snapshots.iter().any(|s| {
            s.aggregate_id == snapshot.aggregate_id
                && s.aggregate_type == snapshot.aggregate_type
                && s.version == snapshot.version
        });
        if !exists {
            snapshots.push(snapshot.clone());
        }
        Ok(())
    }

    async fn load_latest(
        &self,
        aggregate_id: Uuid,
        aggregate_type: &str,
        max_version: Option<i64>,
    ) -> Result<Option<Snapshot>, DomainError> {
        Ok(self
            .snapshots
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.aggregate_id == aggregate_id && s.aggregate_type == aggregate_type)
            .filter(|s| max_version.is_none_or(|max| s.version <= max))
            .max_by_key(|s| s.version)
            .cloned())
    }
}

/// Rejects every save and never has a snapshot to load.
#[derive(Debug)]
pub struct FailingSnapshotStore;

#[async_trait]
impl SnapshotRepository for FailingSnapshotStore {
    async fn save(&self, _snapshot: &Snapshot) -> Result<(), DomainError> {
        Err(DomainError::StorageUnavailable("snapshot store offline".into()))
    }

    async fn load_latest(
        &self,
        _aggregate_id: Uuid,
        _aggregate_type: &str,
        _max_version: Option<i64>,
    ) -> Result<Option<Snapshot>, DomainError> {
        Ok(None)
    }
}
