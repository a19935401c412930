use jobforge_core::process_tracker::{is_process_active, ProcessTracker};
use jobforge_core::types::LockType;
use sqlx::PgPool;

#[sqlx::test(migrations = "./migrations")]
async fn ensure_registered_is_idempotent(db: PgPool) {
    let tracker = ProcessTracker::new(db.clone(), LockType::Heartbeat);
    let state = serde_json::json!({"worker_id": "w1"});

    tracker.ensure_registered(&state).await.unwrap();
    tracker.ensure_registered(&state).await.unwrap();

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobforge_processes WHERE id = $1")
        .bind(tracker.process_id())
        .fetch_one(&db)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[sqlx::test(migrations = "./migrations")]
async fn deregister_removes_the_row(db: PgPool) {
    let tracker = ProcessTracker::new(db.clone(), LockType::Heartbeat);
    tracker.ensure_registered(&serde_json::json!({})).await.unwrap();

    tracker.deregister().await.unwrap();

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobforge_processes WHERE id = $1")
        .bind(tracker.process_id())
        .fetch_one(&db)
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[sqlx::test(migrations = "./migrations")]
async fn heartbeat_mode_is_active_only_when_recently_touched(db: PgPool) {
    let tracker = ProcessTracker::new(db.clone(), LockType::Heartbeat);
    tracker.ensure_registered(&serde_json::json!({})).await.unwrap();

    assert!(is_process_active(&db, tracker.process_id(), LockType::Heartbeat)
        .await
        .unwrap());

    sqlx::query("UPDATE jobforge_processes SET updated_at = NOW() - INTERVAL '10 minutes' WHERE id = $1")
        .bind(tracker.process_id())
        .execute(&db)
        .await
        .unwrap();

    assert!(!is_process_active(&db, tracker.process_id(), LockType::Heartbeat)
        .await
        .unwrap());
}

#[sqlx::test(migrations = "./migrations")]
async fn unknown_process_id_is_not_active(db: PgPool) {
    assert!(!is_process_active(&db, uuid::Uuid::now_v7(), LockType::Heartbeat)
        .await
        .unwrap());
}
