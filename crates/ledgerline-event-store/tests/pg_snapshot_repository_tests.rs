//! Integration tests for `PgSnapshotRepository`.

use chrono::Utc;
use ledgerline_core::snapshot::{Snapshot, SnapshotRepository};
use ledgerline_event_store::pg_snapshot_repository::PgSnapshotRepository;
use sqlx::PgPool;
use uuid::Uuid;

fn snapshot(aggregate_id: Uuid, version: i64) -> Snapshot {
    Snapshot {
        aggregate_id,
        aggregate_type: "category".into(),
        version,
        data: serde_json::json!({ "version": version }),
        created_at: Utc::now(),
    }
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_load_latest_respects_max_version(pool: PgPool) {
    // Arrange
    let repo = PgSnapshotRepository::new(pool);
    let id = Uuid::new_v4();
    for version in [50, 100, 150] {
        repo.save(&snapshot(id, version)).await.unwrap();
    }

    // Act
    let newest = repo.load_latest(id, "category", None).await.unwrap();
    let bounded = repo.load_latest(id, "category", Some(120)).await.unwrap();
    let none = repo.load_latest(id, "category", Some(10)).await.unwrap();

    // Assert
    assert_eq!(newest.map(|s| s.version), Some(150));
    assert_eq!(bounded.map(|s| s.version), Some(100));
    assert!(none.is_none());
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_saving_same_version_twice_is_a_no_op(pool: PgPool) {
    let repo = PgSnapshotRepository::new(pool);
    let id = Uuid::new_v4();
    let first = snapshot(id, 50);
    let mut second = snapshot(id, 50);
    second.data = serde_json::json!({ "other": true });

    repo.save(&first).await.unwrap();
    repo.save(&second).await.unwrap();

    let loaded = repo.load_latest(id, "category", None).await.unwrap().unwrap();
    assert_eq!(loaded.data, first.data);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_snapshots_are_keyed_by_aggregate_type(pool: PgPool) {
    let repo = PgSnapshotRepository::new(pool);
    let id = Uuid::new_v4();
    repo.save(&snapshot(id, 50)).await.unwrap();

    let other_type = repo.load_latest(id, "member", None).await.unwrap();

    assert!(other_type.is_none());
}
