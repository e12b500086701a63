//! Integration tests for `PgKeyManager`.

use ledgerline_core::crypto::{KeyManager, KeyRing};
use ledgerline_core::error::DomainError;
use ledgerline_event_store::pg_key_manager::PgKeyManager;
use sqlx::PgPool;
use uuid::Uuid;

#[sqlx::test(migrations = "../../migrations")]
async fn test_generate_is_idempotent_per_owner(pool: PgPool) {
    // Arrange
    let keys = PgKeyManager::new(pool);
    let owner = Uuid::new_v4();

    // Act
    let first = keys.generate_key(owner).await.unwrap();
    let second = keys.generate_key(owner).await.unwrap();
    let stored = keys.get_key(owner).await.unwrap();

    // Assert
    assert_eq!(first, second);
    assert_eq!(stored, Some(first));
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_deleted_key_reads_as_erased(pool: PgPool) {
    let keys = PgKeyManager::new(pool);
    let owner = Uuid::new_v4();
    keys.generate_key(owner).await.unwrap();

    keys.delete_key(owner).await.unwrap();
    keys.delete_key(owner).await.unwrap();

    assert!(keys.get_key(owner).await.unwrap().is_none());
    assert!(matches!(
        KeyRing::new(&keys).key_for_read(owner).await,
        Err(DomainError::KeyErased(id)) if id == owner
    ));
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_erased_owner_never_gets_a_new_key(pool: PgPool) {
    // Arrange
    let keys = PgKeyManager::new(pool.clone());
    let owner = Uuid::new_v4();
    let never_keyed = Uuid::new_v4();
    keys.generate_key(owner).await.unwrap();
    keys.delete_key(owner).await.unwrap();
    keys.delete_key(never_keyed).await.unwrap();

    // Act
    let regenerated = keys.generate_key(owner).await;
    let first_write = KeyRing::new(&keys).key_for_write(never_keyed).await;

    // Assert
    assert!(matches!(regenerated, Err(DomainError::KeyErased(id)) if id == owner));
    assert!(matches!(first_write, Err(DomainError::KeyErased(id)) if id == never_keyed));
    let material: Option<Vec<u8>> =
        sqlx::query_scalar("SELECT key_material FROM encryption_keys WHERE owner_id = $1")
            .bind(owner)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert!(material.is_none());
}
