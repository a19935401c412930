use std::sync::Arc;
use std::time::Duration;

use jobforge_core::concurrency::ConcurrencyConfig;
use jobforge_core::executor::HandlerRegistry;
use jobforge_core::scheduler::{Scheduler, ShutdownOutcome};
use sqlx::PgPool;

/// A pool that never actually connects; fine for exercising shutdown, which
/// only touches the in-process semaphore and never issues a query.
fn lazy_pool() -> PgPool {
    PgPool::connect_lazy("postgres://localhost/jobforge-scheduler-shutdown-test")
        .expect("connect_lazy should not need a live connection")
}

#[tokio::test]
async fn shutdown_with_no_running_jobs_completes_immediately() {
    let scheduler = Scheduler::new(
        lazy_pool(),
        "*".parse().unwrap(),
        4,
        Arc::new(HandlerRegistry::new()),
        10,
        60,
        true,
        ConcurrencyConfig::default(),
    );

    let outcome = scheduler.shutdown(Some(Duration::from_millis(50))).await;
    assert_eq!(outcome, ShutdownOutcome::Ok);
}

#[tokio::test]
async fn zero_timeout_shutdown_succeeds_when_already_idle() {
    let scheduler = Scheduler::new(
        lazy_pool(),
        "*".parse().unwrap(),
        2,
        Arc::new(HandlerRegistry::new()),
        10,
        60,
        true,
        ConcurrencyConfig::default(),
    );

    let outcome = scheduler.shutdown(Some(Duration::ZERO)).await;
    assert_eq!(outcome, ShutdownOutcome::Ok);
}

#[tokio::test]
async fn worker_id_is_stable_across_calls() {
    let scheduler = Scheduler::new(
        lazy_pool(),
        "*".parse().unwrap(),
        1,
        Arc::new(HandlerRegistry::new()),
        10,
        60,
        true,
        ConcurrencyConfig::default(),
    );

    let a = scheduler.worker_id();
    let b = scheduler.worker_id();
    assert_eq!(a, b);
}

#[tokio::test]
async fn queue_expr_accessor_round_trips_the_configured_expression() {
    let scheduler = Scheduler::new(
        lazy_pool(),
        "emails,default".parse().unwrap(),
        1,
        Arc::new(HandlerRegistry::new()),
        10,
        60,
        true,
        ConcurrencyConfig::default(),
    );

    assert_eq!(scheduler.queue_expr().to_string(), "emails,default");
}
