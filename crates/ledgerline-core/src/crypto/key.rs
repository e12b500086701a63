//! Per-owner keys and the request-scoped key ring.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use aes_gcm::aead::OsRng;
use aes_gcm::aead::rand_core::RngCore;
use async_trait::async_trait;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::DomainError;

/// Size of an AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;

/// Symmetric key material; zeroed on drop and never printed.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; KEY_SIZE]);

impl EncryptionKey {
    /// Generates a fresh random key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wraps stored key material.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Encryption` if `bytes` is not 32 bytes long.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DomainError> {
        let material: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            DomainError::Encryption(format!(
                "invalid key length: expected {KEY_SIZE}, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(material))
    }

    /// Raw key material.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

/// Storage of per-owner keys.
#[async_trait]
pub trait KeyManager: Send + Sync {
    /// The owner's key, or `None` if it was never created or has been deleted.
    async fn get_key(&self, owner_id: Uuid) -> Result<Option<EncryptionKey>, DomainError>;

    /// Creates and stores the owner's key. If a concurrent writer created one
    /// first, that key is returned instead. An owner whose key was deleted
    /// never gets a new one: this returns `DomainError::KeyErased`.
    async fn generate_key(&self, owner_id: Uuid) -> Result<EncryptionKey, DomainError>;

    /// Deletes the owner's key and remembers that the owner was erased.
    /// Deleting twice is a no-op.
    async fn delete_key(&self, owner_id: Uuid) -> Result<(), DomainError>;
}

/// Key cache for a single operation or request.
///
/// Create one per unit of work and drop it afterwards; it must not outlive
/// the request, or a key deleted elsewhere could still decrypt from cache.
/// Deleting through the ring evicts the cached key at once.
pub struct KeyRing<'a> {
    manager: &'a dyn KeyManager,
    cache: Mutex<HashMap<Uuid, Option<EncryptionKey>>>,
}

impl fmt::Debug for KeyRing<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cached = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("KeyRing").field("cached", &cached).finish()
    }
}

impl<'a> KeyRing<'a> {
    /// Opens an empty ring over `manager`.
    #[must_use]
    pub fn new(manager: &'a dyn KeyManager) -> Self {
        Self {
            manager,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, owner_id: Uuid) -> Option<Option<EncryptionKey>> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&owner_id)
            .cloned()
    }

    fn remember(&self, owner_id: Uuid, key: Option<EncryptionKey>) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(owner_id, key);
    }

    async fn lookup(&self, owner_id: Uuid) -> Result<Option<EncryptionKey>, DomainError> {
        if let Some(hit) = self.cached(owner_id) {
            return Ok(hit);
        }
        let key = self.manager.get_key(owner_id).await?;
        self.remember(owner_id, key.clone());
        Ok(key)
    }

    /// The key needed to decrypt the owner's data.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::KeyErased` if the owner has no key.
    pub async fn key_for_read(&self, owner_id: Uuid) -> Result<EncryptionKey, DomainError> {
        self.lookup(owner_id)
            .await?
            .ok_or(DomainError::KeyErased(owner_id))
    }

    /// The key to encrypt the owner's data with, created on first use.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::KeyErased` if the owner's key was shredded, and
    /// propagates key store failures.
    pub async fn key_for_write(&self, owner_id: Uuid) -> Result<EncryptionKey, DomainError> {
        if let Some(key) = self.lookup(owner_id).await? {
            return Ok(key);
        }
        tracing::debug!(%owner_id, "generating encryption key");
        let key = self.manager.generate_key(owner_id).await?;
        self.remember(owner_id, Some(key.clone()));
        Ok(key)
    }

    /// Deletes the owner's key, crypto-shredding their personal data.
    ///
    /// # Errors
    ///
    /// Propagates key store failures; the cache entry is evicted regardless.
    pub async fn shred(&self, owner_id: Uuid) -> Result<(), DomainError> {
        self.remember(owner_id, None);
        self.manager.delete_key(owner_id).await?;
        tracing::info!(%owner_id, "encryption key deleted");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashSet;

    use super::*;

    /// Counts lookups so cache behaviour is observable.
    #[derive(Default)]
    pub(crate) struct CountingKeyManager {
        pub keys: Mutex<HashMap<Uuid, EncryptionKey>>,
        pub erased: Mutex<HashSet<Uuid>>,
        pub lookups: Mutex<usize>,
    }

    #[async_trait]
    impl KeyManager for CountingKeyManager {
        async fn get_key(&self, owner_id: Uuid) -> Result<Option<EncryptionKey>, DomainError> {
            *self.lookups.lock().unwrap() += 1;
            Ok(self.keys.lock().unwrap().get(&owner_id).cloned())
        }

        async fn generate_key(&self, owner_id: Uuid) -> Result<EncryptionKey, DomainError> {
            if self.erased.lock().unwrap().contains(&owner_id) {
                return Err(DomainError::KeyErased(owner_id));
            }
            Ok(self
                .keys
                .lock()
                .unwrap()
                .entry(owner_id)
                .or_insert_with(EncryptionKey::generate)
                .clone())
        }

        async fn delete_key(&self, owner_id: Uuid) -> Result<(), DomainError> {
            self.keys.lock().unwrap().remove(&owner_id);
            self.erased.lock().unwrap().insert(owner_id);
            Ok(())
        }
    }

    #[test]
    fn test_from_bytes_rejects_wrong_length() {
        let result = EncryptionKey::from_bytes(&[1, 2, 3]);

        assert!(matches!(result, Err(DomainError::Encryption(_))));
    }

    #[test]
    fn test_debug_does_not_print_material() {
        let key = EncryptionKey::from_bytes(&[7u8; KEY_SIZE]).unwrap();

        assert_eq!(format!("{key:?}"), "EncryptionKey(..)");
    }

    #[tokio::test]
    async fn test_key_for_write_generates_once_and_caches() {
        // Arrange
        let manager = CountingKeyManager::default();
        let ring = KeyRing::new(&manager);
        let owner = Uuid::new_v4();

        // Act
        let first = ring.key_for_write(owner).await.unwrap();
        let second = ring.key_for_write(owner).await.unwrap();
        let read = ring.key_for_read(owner).await.unwrap();

        // Assert
        assert_eq!(first, second);
        assert_eq!(first, read);
        assert_eq!(*manager.lookups.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_shred_evicts_cached_key() {
        let manager = CountingKeyManager::default();
        let ring = KeyRing::new(&manager);
        let owner = Uuid::new_v4();
        ring.key_for_write(owner).await.unwrap();

        ring.shred(owner).await.unwrap();

        match ring.key_for_read(owner).await {
            Err(DomainError::KeyErased(id)) => assert_eq!(id, owner),
            other => panic!("expected KeyErased, got {other:?}"),
        }
        assert!(manager.keys.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_key_for_write_after_shred_is_refused() {
        // Arrange
        let manager = CountingKeyManager::default();
        let owner = Uuid::new_v4();
        let ring = KeyRing::new(&manager);
        ring.key_for_write(owner).await.unwrap();
        ring.shred(owner).await.unwrap();

        // Act
        let same_ring = ring.key_for_write(owner).await;
        let fresh_ring = KeyRing::new(&manager).key_for_write(owner).await;

        // Assert
        assert!(matches!(same_ring, Err(DomainError::KeyErased(id)) if id == owner));
        assert!(matches!(fresh_ring, Err(DomainError::KeyErased(id)) if id == owner));
        assert!(manager.keys.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fresh_ring_sees_deletion_made_elsewhere() {
        let manager = CountingKeyManager::default();
        let owner = Uuid::new_v4();
        let first_request = KeyRing::new(&manager);
        first_request.key_for_write(owner).await.unwrap();

        manager.delete_key(owner).await.unwrap();
        let second_request = KeyRing::new(&manager);

        assert!(matches!(
            second_request.key_for_read(owner).await,
            Err(DomainError::KeyErased(_))
        ));
    }
}
