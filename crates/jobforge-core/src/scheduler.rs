//! Owns a queue expression, a worker-slot budget, and a set of running
//! tasks. Selects, locks, runs, and finalizes jobs under a per-pool
//! concurrency cap, draining immediately under load and falling back to the
//! poller's wake signal when idle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::{mpsc, Notify, Semaphore};
use uuid::Uuid;

use crate::concurrency::ConcurrencyConfig;
use crate::error::QueueError;
use crate::executor::{Executor, HandlerRegistry};
use crate::queue_expr::QueueExpr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    Ok,
    Timeout,
}

pub struct Scheduler {
    pool: PgPool,
    queue_expr: QueueExpr,
    max_processes: u32,
    semaphore: Arc<Semaphore>,
    worker_id: Uuid,
    queue_select_limit: i64,
    stale_claim_seconds: i64,
    enable_pauses: bool,
    executor: Arc<Executor>,
    concurrency: ConcurrencyConfig,
    shutting_down: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: PgPool,
        queue_expr: QueueExpr,
        max_processes: u32,
        registry: Arc<HandlerRegistry>,
        queue_select_limit: i64,
        stale_claim_seconds: i64,
        enable_pauses: bool,
        concurrency: ConcurrencyConfig,
    ) -> Self {
        let worker_id = Uuid::now_v7();
        let executor = Arc::new(Executor::new(pool.clone(), registry, worker_id));

        Self {
            pool,
            queue_expr,
            max_processes,
            semaphore: Arc::new(Semaphore::new(max_processes as usize)),
            worker_id,
            queue_select_limit,
            stale_claim_seconds,
            enable_pauses,
            executor,
            concurrency,
            shutting_down: Arc::new(AtomicBool::new(false)),
            shutdown_notify: Arc::new(Notify::new()),
        }
    }

    pub fn worker_id(&self) -> Uuid {
        self.worker_id
    }

    pub fn queue_expr(&self) -> QueueExpr {
        self.queue_expr.clone()
    }

    /// Drives the selection loop until shut down. `poll_rx` is the wake
    /// channel handed back by `Poller::register`.
    pub async fn run(&self, mut poll_rx: mpsc::Receiver<()>) {
        loop {
            if self.shutting_down.load(Ordering::Acquire) {
                return;
            }

            let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
                // All slots busy; wait for either a poll signal or shutdown.
                tokio::select! {
                    _ = poll_rx.recv() => continue,
                    _ = self.shutdown_notify.notified() => return,
                }
            };

            match self.try_claim_and_dispatch(permit).await {
                ClaimOutcome::Dispatched => continue, // drain immediately
                ClaimOutcome::Empty => {
                    tokio::select! {
                        _ = poll_rx.recv() => continue,
                        _ = self.shutdown_notify.notified() => return,
                    }
                }
                ClaimOutcome::Error(err) => {
                    tracing::warn!(error = %err, queue_expr = %self.queue_expr, "selection round failed");
                    tokio::select! {
                        _ = poll_rx.recv() => continue,
                        _ = self.shutdown_notify.notified() => return,
                    }
                }
            }
        }
    }

    async fn try_claim_and_dispatch(&self, permit: tokio::sync::OwnedSemaphorePermit) -> ClaimOutcome {
        let claimed = crate::job_store::dequeue::select_and_claim(
            &self.pool,
            &self.queue_expr,
            self.worker_id,
            self.queue_select_limit,
            self.stale_claim_seconds,
            self.enable_pauses,
        )
        .await;

        match claimed {
            Ok(Some(job)) => {
                let executor = self.executor.clone();
                let concurrency = self.concurrency.clone();
                tokio::spawn(async move {
                    let _permit = permit; // held for the task's lifetime, releases on drop
                    if let Err(err) = executor.execute(job, &concurrency).await {
                        tracing::warn!(error = %err, "job execution failed");
                    }
                });
                ClaimOutcome::Dispatched
            }
            Ok(None) => ClaimOutcome::Empty,
            Err(err) => ClaimOutcome::Error(err),
        }
    }

    /// Marks the scheduler shutting down (refuses new polls), then waits up
    /// to `timeout` for running tasks to finish. `None` waits forever;
    /// `Some(Duration::ZERO)` returns immediately without waiting.
    pub async fn shutdown(&self, timeout: Option<Duration>) -> ShutdownOutcome {
        self.shutting_down.store(true, Ordering::Release);
        self.shutdown_notify.notify_waiters();

        let wait_for_idle = self.semaphore.clone().acquire_many_owned(self.max_processes);

        match timeout {
            Some(d) if d.is_zero() => match futures::FutureExt::now_or_never(wait_for_idle) {
                Some(Ok(_)) => ShutdownOutcome::Ok,
                _ => ShutdownOutcome::Timeout,
            },
            Some(d) => match tokio::time::timeout(d, wait_for_idle).await {
                Ok(Ok(_)) => ShutdownOutcome::Ok,
                _ => ShutdownOutcome::Timeout,
            },
            None => {
                let _ = wait_for_idle.await;
                ShutdownOutcome::Ok
            }
        }
    }
}

enum ClaimOutcome {
    Dispatched,
    Empty,
    Error(QueueError),
}
