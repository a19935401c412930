use jobforge_core::concurrency::{check_enqueue, check_perform, ConcurrencyConfig, LimiterOutcome};
use jobforge_core::job_store::enqueue;
use jobforge_core::types::JobInit;
use sqlx::PgPool;
use uuid::Uuid;

fn job_with_key(key: &str) -> JobInit {
    JobInit::new("SendEmail", "default", serde_json::json!([])).with_concurrency_key(key)
}

#[sqlx::test(migrations = "./migrations")]
async fn enqueue_limit_blocks_once_reached(db: PgPool) {
    let config = ConcurrencyConfig {
        enqueue_limit: Some(1),
        ..Default::default()
    };

    let mut tx = db.begin().await.unwrap();
    let outcome = check_enqueue(&mut tx, "customer-1", &config).await.unwrap();
    assert_eq!(outcome, LimiterOutcome::Ok);
    enqueue::create_job(&mut *tx, job_with_key("customer-1")).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = db.begin().await.unwrap();
    let outcome = check_enqueue(&mut tx, "customer-1", &config).await.unwrap();
    assert_eq!(outcome, LimiterOutcome::LimitExceeded);
}

#[sqlx::test(migrations = "./migrations")]
async fn enqueue_limit_is_scoped_per_key(db: PgPool) {
    let config = ConcurrencyConfig {
        enqueue_limit: Some(1),
        ..Default::default()
    };

    let mut tx = db.begin().await.unwrap();
    enqueue::create_job(&mut *tx, job_with_key("customer-1")).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = db.begin().await.unwrap();
    let outcome = check_enqueue(&mut tx, "customer-2", &config).await.unwrap();
    assert_eq!(outcome, LimiterOutcome::Ok, "a different key has its own budget");
}

#[sqlx::test(migrations = "./migrations")]
async fn perform_limit_overrides_total_limit(db: PgPool) {
    let config = ConcurrencyConfig {
        perform_limit: Some(0),
        total_limit: Some(100),
        ..Default::default()
    };

    let mut tx = db.begin().await.unwrap();
    let outcome = check_perform(&mut tx, "customer-1", Uuid::now_v7(), Uuid::now_v7(), &config)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        LimiterOutcome::LimitExceeded,
        "perform_limit must win even though total_limit is far from exhausted"
    );
}

#[sqlx::test(migrations = "./migrations")]
async fn perform_check_excludes_the_job_itself_under_total_limit(db: PgPool) {
    let config = ConcurrencyConfig {
        total_limit: Some(1),
        ..Default::default()
    };

    let job_id = enqueue::create_job(&db, job_with_key("customer-1")).await.unwrap();
    let job = jobforge_core::job_store::queries::find_by_id(&db, job_id)
        .await
        .unwrap()
        .unwrap();

    let mut tx = db.begin().await.unwrap();
    let outcome = check_perform(&mut tx, "customer-1", job.id, job.active_job_id, &config)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        LimiterOutcome::Ok,
        "the job's own unfinished row must not count against its own total_limit check"
    );
}

#[sqlx::test(migrations = "./migrations")]
async fn enqueue_throttle_counts_recent_rows(db: PgPool) {
    let config = ConcurrencyConfig {
        enqueue_throttle: Some((1, 60)),
        ..Default::default()
    };

    let mut tx = db.begin().await.unwrap();
    let outcome = check_enqueue(&mut tx, "customer-1", &config).await.unwrap();
    assert_eq!(outcome, LimiterOutcome::Ok);
    enqueue::create_job(&mut *tx, job_with_key("customer-1")).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = db.begin().await.unwrap();
    let outcome = check_enqueue(&mut tx, "customer-1", &config).await.unwrap();
    assert_eq!(outcome, LimiterOutcome::ThrottleExceeded);
}
