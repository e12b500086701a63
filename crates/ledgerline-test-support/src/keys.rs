//! In-memory key store.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use ledgerline_core::crypto::{EncryptionKey, KeyManager};
use ledgerline_core::error::DomainError;
use uuid::Uuid;

/// A `KeyManager` backed by a map. Counts generated keys so tests can check
/// that a key is created only on an owner's first personal-data write.
/// Deleted owners are remembered and never get a new key.
#[derive(Debug, Default)]
pub struct InMemoryKeyManager {
    keys: Mutex<HashMap<Uuid, EncryptionKey>>,
    erased: Mutex<HashSet<Uuid>>,
    generated: Mutex<usize>,
}

impl InMemoryKeyManager {
    /// Creates an empty key store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `owner_id` currently has a key.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn has_key(&self, owner_id: Uuid) -> bool {
        self.keys.lock().unwrap().contains_key(&owner_id)
    }

    /// Number of keys ever generated.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn generated(&self) -> usize {
        *self.generated.lock().unwrap()
    }
}

#[async_trait]
impl KeyManager for InMemoryKeyManager {
    async fn get_key(&self, owner_id: Uuid) -> Result<Option<EncryptionKey>, DomainError> {
        Ok(self.keys.lock().unwrap().get(&owner_id).cloned())
    }

    async fn generate_key(&self, owner_id: Uuid) -> Result<EncryptionKey, DomainError> {
        if self.erased.lock().unwrap().contains(&owner_id) {
            return Err(DomainError::KeyErased(owner_id));
        }
        let mut keys = self.keys.lock().unwrap();
        if let Some(existing) = keys.get(&owner_id) {
            return Ok(existing.clone());
        }
        let key = EncryptionKey::generate();
        keys.insert(owner_id, key.clone());
        *self.generated.lock().unwrap() += 1;
        Ok(key)
    }

    async fn delete_key(&self, owner_id: Uuid) -> Result<(), DomainError> {
        self.keys.lock().unwrap().remove(&owner_id);
        self.erased.lock().unwrap().insert(owner_id);
        Ok(())
    }
}
