use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use jobforge_core::concurrency::ConcurrencyConfig;
use jobforge_core::executor::{Executor, Handler, HandlerRegistry};
use jobforge_core::job_store::{dequeue, enqueue, queries};
use jobforge_core::queue_expr::QueueExpr;
use jobforge_core::types::{JobInit, JobStatus};
use jobforge_core::wire::HandlerOutcome;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

struct AlwaysSucceeds;

#[async_trait]
impl Handler for AlwaysSucceeds {
    async fn perform(&self, _arguments: &[Value]) -> HandlerOutcome {
        HandlerOutcome::Success
    }
}

struct AlwaysFails;

#[async_trait]
impl Handler for AlwaysFails {
    async fn perform(&self, _arguments: &[Value]) -> HandlerOutcome {
        HandlerOutcome::error("boom")
    }

    fn max_attempts(&self) -> i32 {
        1
    }
}

struct CountingHandler(Arc<AtomicUsize>);

#[async_trait]
impl Handler for CountingHandler {
    async fn perform(&self, _arguments: &[Value]) -> HandlerOutcome {
        self.0.fetch_add(1, Ordering::SeqCst);
        HandlerOutcome::error("still failing")
    }

    fn max_attempts(&self) -> i32 {
        3
    }
}

struct RaisesArgumentError;

#[async_trait]
impl Handler for RaisesArgumentError {
    async fn perform(&self, _arguments: &[Value]) -> HandlerOutcome {
        HandlerOutcome::Error {
            class: "ArgumentError".to_string(),
            message: "missing required field".to_string(),
            backtrace: vec!["handler.rs:10".to_string(), "executor.rs:240".to_string()],
        }
    }
}

async fn claim_one(db: &PgPool) -> jobforge_core::types::Job {
    let all = "*".parse::<QueueExpr>().unwrap();
    dequeue::select_and_claim(db, &all, Uuid::now_v7(), 10, 60, true)
        .await
        .unwrap()
        .expect("a candidate should be ready to claim")
}

#[sqlx::test(migrations = "./migrations")]
async fn successful_job_finishes_with_no_error(db: PgPool) {
    let mut registry = HandlerRegistry::new();
    registry.register("Ok", Arc::new(AlwaysSucceeds));
    let executor = Executor::new(db.clone(), Arc::new(registry), Uuid::now_v7());

    enqueue::create_job(&db, JobInit::new("Ok", "default", serde_json::json!([])))
        .await
        .unwrap();

    let job = claim_one(&db).await;
    executor.execute(job.clone(), &ConcurrencyConfig::default()).await.unwrap();

    let finished = queries::find_by_id(&db, job.id).await.unwrap().unwrap();
    assert_eq!(finished.status(chrono::Utc::now()), JobStatus::Succeeded);
}

#[sqlx::test(migrations = "./migrations")]
async fn failure_past_max_attempts_discards(db: PgPool) {
    let mut registry = HandlerRegistry::new();
    registry.register("AlwaysFails", Arc::new(AlwaysFails));
    let executor = Executor::new(db.clone(), Arc::new(registry), Uuid::now_v7());

    enqueue::create_job(&db, JobInit::new("AlwaysFails", "default", serde_json::json!([])))
        .await
        .unwrap();

    let job = claim_one(&db).await;
    // executions_count is 1 after this claim; max_attempts() == 1, so the
    // very first failure already exhausts the budget.
    executor.execute(job.clone(), &ConcurrencyConfig::default()).await.unwrap();

    let finished = queries::find_by_id(&db, job.id).await.unwrap().unwrap();
    assert_eq!(finished.status(chrono::Utc::now()), JobStatus::Discarded);
}

#[sqlx::test(migrations = "./migrations")]
async fn failure_under_max_attempts_reschedules_for_retry(db: PgPool) {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = HandlerRegistry::new();
    registry.register("Counting", Arc::new(CountingHandler(calls.clone())));
    let executor = Executor::new(db.clone(), Arc::new(registry), Uuid::now_v7());

    enqueue::create_job(&db, JobInit::new("Counting", "default", serde_json::json!([])))
        .await
        .unwrap();

    let job = claim_one(&db).await;
    executor.execute(job.clone(), &ConcurrencyConfig::default()).await.unwrap();

    let reloaded = queries::find_by_id(&db, job.id).await.unwrap().unwrap();
    assert!(!reloaded.is_finished(), "one failure under max_attempts=3 must not finish the job");
    assert!(reloaded.scheduled_at.is_some(), "a retryable failure reschedules for a future attempt");
    assert!(reloaded.locked_by_id.is_none(), "the claim must be released so the next poll can reselect it");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[sqlx::test(migrations = "./migrations")]
async fn argument_error_discards_after_one_attempt(db: PgPool) {
    let mut registry = HandlerRegistry::new();
    registry.register("RaisesArgumentError", Arc::new(RaisesArgumentError));
    let executor = Executor::new(db.clone(), Arc::new(registry), Uuid::now_v7());

    enqueue::create_job(&db, JobInit::new("RaisesArgumentError", "default", serde_json::json!([])))
        .await
        .unwrap();

    let job = claim_one(&db).await;
    executor.execute(job.clone(), &ConcurrencyConfig::default()).await.unwrap();

    let finished = queries::find_by_id(&db, job.id).await.unwrap().unwrap();
    assert_eq!(finished.status(chrono::Utc::now()), JobStatus::Discarded);
    assert_eq!(finished.executions_count, 1);

    let execution: (Vec<String>,) =
        sqlx::query_as("SELECT error_backtrace FROM jobforge_executions WHERE active_job_id = $1")
            .bind(job.active_job_id)
            .fetch_one(&db)
            .await
            .unwrap();
    assert_eq!(execution.0, vec!["handler.rs:10".to_string(), "executor.rs:240".to_string()]);
}

#[sqlx::test(migrations = "./migrations")]
async fn missing_handler_is_retried_not_immediately_discarded(db: PgPool) {
    let registry = HandlerRegistry::new();
    let executor = Executor::new(db.clone(), Arc::new(registry), Uuid::now_v7());

    enqueue::create_job(&db, JobInit::new("NoSuchClass", "default", serde_json::json!([])))
        .await
        .unwrap();

    let job = claim_one(&db).await;
    executor.execute(job.clone(), &ConcurrencyConfig::default()).await.unwrap();

    let reloaded = queries::find_by_id(&db, job.id).await.unwrap().unwrap();
    assert!(!reloaded.is_finished(), "a missing handler retries under the default max_attempts budget");
}
