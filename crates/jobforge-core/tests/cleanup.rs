use chrono::{Duration, Utc};
use jobforge_core::cleanup;
use jobforge_core::job_store::{enqueue, queries, retry};
use jobforge_core::types::{ErrorEvent, JobInit};
use sqlx::PgPool;

fn job() -> JobInit {
    JobInit::new("SendEmail", "default", serde_json::json!([]))
}

#[sqlx::test(migrations = "./migrations")]
async fn deletes_old_finished_jobs_but_not_recent_ones(db: PgPool) {
    let old = enqueue::create_job(&db, job()).await.unwrap();
    let recent = enqueue::create_job(&db, job()).await.unwrap();

    retry::finish_job(&db, old, None, None).await.unwrap();
    retry::finish_job(&db, recent, None, None).await.unwrap();

    sqlx::query("UPDATE jobforge_jobs SET finished_at = NOW() - INTERVAL '30 days' WHERE id = $1")
        .bind(old)
        .execute(&db)
        .await
        .unwrap();

    let horizon = Utc::now() - Duration::days(14);
    let report = cleanup::run(&db, horizon, 100, false).await.unwrap();

    assert_eq!(report.jobs_deleted, 1);
    assert!(queries::find_by_id(&db, old).await.unwrap().is_none());
    assert!(queries::find_by_id(&db, recent).await.unwrap().is_some());
}

#[sqlx::test(migrations = "./migrations")]
async fn discarded_rows_survive_unless_included(db: PgPool) {
    let id = enqueue::create_job(&db, job()).await.unwrap();
    retry::finish_job(&db, id, Some("boom"), Some(ErrorEvent::Discarded))
        .await
        .unwrap();
    sqlx::query("UPDATE jobforge_jobs SET finished_at = NOW() - INTERVAL '30 days' WHERE id = $1")
        .bind(id)
        .execute(&db)
        .await
        .unwrap();

    let horizon = Utc::now() - Duration::days(14);

    let report = cleanup::run(&db, horizon, 100, false).await.unwrap();
    assert_eq!(report.jobs_deleted, 0, "discarded rows are kept for forensics by default");
    assert!(queries::find_by_id(&db, id).await.unwrap().is_some());

    let report = cleanup::run(&db, horizon, 100, true).await.unwrap();
    assert_eq!(report.jobs_deleted, 1);
    assert!(queries::find_by_id(&db, id).await.unwrap().is_none());
}

#[sqlx::test(migrations = "./migrations")]
async fn batch_size_caps_rows_deleted_per_round(db: PgPool) {
    for _ in 0..5 {
        let id = enqueue::create_job(&db, job()).await.unwrap();
        retry::finish_job(&db, id, None, None).await.unwrap();
        sqlx::query("UPDATE jobforge_jobs SET finished_at = NOW() - INTERVAL '30 days' WHERE id = $1")
            .bind(id)
            .execute(&db)
            .await
            .unwrap();
    }

    let horizon = Utc::now() - Duration::days(14);
    let report = cleanup::run(&db, horizon, 2, false).await.unwrap();
    assert_eq!(report.jobs_deleted, 2);

    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobforge_jobs")
        .fetch_one(&db)
        .await
        .unwrap();
    assert_eq!(remaining, 3);
}
