//! Deserializes a claimed job, invokes the registered handler with a timeout,
//! normalizes the outcome, classifies failures, and writes back the
//! execution record and job transition.
//!
//! `executions_count` and the claim stamps (`performed_at`, `locked_by_id`,
//! `locked_at`) are bumped once, by the scheduler's claim (`job_store::dequeue::claim`)
//! when the job was first selected. This step reloads the row and inserts the
//! Execution record, but does not bump the counter again — the scheduler's
//! stamp and this step's reload are the same logical "job started running"
//! event, not two.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::backoff::Backoff;
use crate::batch;
use crate::classify::{classify_exception_name, ErrorClass};
use crate::concurrency::{check_perform, ConcurrencyConfig, LimiterOutcome};
use crate::error::{JobError, JobResult};
use crate::job_store::retry;
use crate::types::{ErrorEvent, Job};
use crate::wire::HandlerOutcome;

/// Implemented once per job class. Handlers receive the full arguments array
/// from the wire payload and return the tagged outcome the executor normalizes.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn perform(&self, arguments: &[Value]) -> HandlerOutcome;

    /// Exception classes that discard instead of retry, overriding the
    /// executor's default-to-retry policy for this class.
    fn discard_on(&self) -> &[String] {
        &[]
    }

    /// `None` disables the timeout for this class.
    fn timeout(&self) -> Option<StdDuration> {
        Some(StdDuration::from_secs(30))
    }

    fn max_attempts(&self) -> i32 {
        crate::config::DEFAULT_MAX_ATTEMPTS
    }

    fn backoff(&self) -> Backoff {
        Backoff::default()
    }
}

pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, job_class: impl Into<String>, handler: Arc<dyn Handler>) {
        self.handlers.insert(job_class.into(), handler);
    }

    pub fn get(&self, job_class: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(job_class).cloned()
    }
}

pub struct Executor {
    pool: PgPool,
    registry: Arc<HandlerRegistry>,
    process_id: Uuid,
}

const INTERRUPTED_SENTINEL: &str = "Interrupted";

impl Executor {
    pub fn new(pool: PgPool, registry: Arc<HandlerRegistry>, process_id: Uuid) -> Self {
        Self {
            pool,
            registry,
            process_id,
        }
    }

    /// Runs a claimed job end to end. Database errors here are structural
    /// failures of the executor itself (not handler errors), so they
    /// propagate to the caller rather than being folded into the retry path.
    pub async fn execute(&self, job: Job, concurrency: &ConcurrencyConfig) -> JobResult<()> {
        if job.is_finished() {
            return Err(JobError::AlreadyFinished(job.id));
        }

        tracing::info!(job_id = %job.id, job_class = %job.job_class, queue = %job.queue_name, "job started");
        common_metrics::inc("jobforge_job_started", &[("queue".to_string(), job.queue_name.clone())], 1);

        if let Some(key) = &job.concurrency_key {
            let mut conn = self.pool.acquire().await.map_err(crate::error::QueueError::from)?;
            let outcome = check_perform(&mut *conn, key, job.id, job.active_job_id, concurrency)
                .await
                .map_err(JobError::from)?;

            match outcome {
                LimiterOutcome::Ok => {}
                LimiterOutcome::LimitExceeded => {
                    return Err(JobError::from(crate::error::QueueError::ConcurrencyLimitExceeded(
                        key.clone(),
                    )));
                }
                LimiterOutcome::ThrottleExceeded => {
                    crate::concurrency::record_throttled_execution(
                        &self.pool,
                        job.active_job_id,
                        &job.job_class,
                        &job.queue_name,
                        &job.serialized_params,
                    )
                    .await
                    .map_err(JobError::from)?;
                    return Err(JobError::from(crate::error::QueueError::ThrottleExceeded(key.clone())));
                }
                LimiterOutcome::LockFailed => {
                    return Err(JobError::from(crate::error::QueueError::LockNotAcquired(key.clone())));
                }
            }
        }

        if job.performed_at.is_some() {
            self.close_dangling_execution(job.active_job_id).await?;
        }

        let execution_id = self.start_execution(&job).await?;

        let handler = self.registry.get(&job.job_class);
        let arguments = job
            .serialized_params
            .as_array()
            .cloned()
            .unwrap_or_else(|| vec![job.serialized_params.clone()]);

        let started = std::time::Instant::now();

        let outcome = match handler {
            Some(handler) => self.invoke_with_timeout(handler.as_ref(), &arguments).await,
            None => {
                tracing::warn!(job_class = %job.job_class, "no handler registered for job class");
                Outcome::Failed {
                    error: format!("no handler registered for job class {}", job.job_class),
                    exception_type: "HandlerNotFound".to_string(),
                    backtrace: Vec::new(),
                }
            }
        };

        let duration_ms = started.elapsed().as_millis() as i64;

        self.finish_execution(execution_id, &job, outcome, duration_ms).await?;

        if let Some(batch_id) = job.batch_id {
            let mut tx = self.pool.begin().await.map_err(crate::error::QueueError::from)?;
            let finished: Job = sqlx::query_as("SELECT * FROM jobforge_jobs WHERE id = $1")
                .bind(job.id)
                .fetch_one(&mut *tx)
                .await
                .map_err(crate::error::QueueError::from)?;
            let failed = finished.error.is_some() && finished.error_event != Some(ErrorEvent::Snoozed);
            batch::check_completion(&mut tx, batch_id, failed)
                .await
                .map_err(JobError::from)?;
            tx.commit().await.map_err(crate::error::QueueError::from)?;
        }

        Ok(())
    }

    async fn close_dangling_execution(&self, active_job_id: Uuid) -> JobResult<()> {
        let elapsed_ms: Option<i64> = sqlx::query_scalar(
            "SELECT EXTRACT(EPOCH FROM (NOW() - created_at))::bigint * 1000
             FROM jobforge_executions WHERE active_job_id = $1 AND finished_at IS NULL
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(active_job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(crate::error::QueueError::from)?;

        if elapsed_ms.is_none() {
            return Ok(());
        }

        sqlx::query(
            "UPDATE jobforge_executions
             SET finished_at = NOW(), error = $2, error_event = 'unhandled', duration_ms = $3
             WHERE active_job_id = $1 AND finished_at IS NULL",
        )
        .bind(active_job_id)
        .bind(INTERRUPTED_SENTINEL)
        .bind(elapsed_ms)
        .execute(&self.pool)
        .await
        .map_err(crate::error::QueueError::from)?;

        Ok(())
    }

    async fn start_execution(&self, job: &Job) -> JobResult<Uuid> {
        let id = Uuid::now_v7();
        sqlx::query(
            "INSERT INTO jobforge_executions
                (id, active_job_id, job_class, queue_name, serialized_params, scheduled_at, process_id, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())",
        )
        .bind(id)
        .bind(job.active_job_id)
        .bind(&job.job_class)
        .bind(&job.queue_name)
        .bind(&job.serialized_params)
        .bind(job.scheduled_at)
        .bind(self.process_id)
        .execute(&self.pool)
        .await
        .map_err(crate::error::QueueError::from)?;

        Ok(id)
    }

    async fn invoke_with_timeout(&self, handler: &dyn Handler, arguments: &[Value]) -> Outcome {
        let fut = handler.perform(arguments);

        let outcome = match handler.timeout() {
            Some(timeout) => match tokio::time::timeout(timeout, fut).await {
                Ok(outcome) => outcome,
                Err(_) => return Outcome::Timeout(timeout),
            },
            None => fut.await,
        };

        match outcome {
            HandlerOutcome::Success | HandlerOutcome::SuccessValue(_) => Outcome::Success,
            HandlerOutcome::Error { class, message, backtrace } => Outcome::Failed {
                error: message,
                exception_type: class,
                backtrace,
            },
            HandlerOutcome::Cancel(reason) => Outcome::Cancelled(reason),
            HandlerOutcome::Discard => Outcome::Discarded("discarded by handler".to_string()),
            HandlerOutcome::DiscardReason(reason) => Outcome::Discarded(reason),
            HandlerOutcome::Snooze(seconds) => Outcome::Snoozed(seconds),
        }
    }

    async fn finish_execution(
        &self,
        execution_id: Uuid,
        job: &Job,
        outcome: Outcome,
        duration_ms: i64,
    ) -> JobResult<()> {
        let mut conn = self.pool.acquire().await.map_err(crate::error::QueueError::from)?;

        match outcome {
            Outcome::Success => {
                finish_execution_row(&mut *conn, execution_id, None, None, &[], duration_ms).await?;
                retry::finish_job(&mut *conn, job.id, None, None)
                    .await
                    .map_err(JobError::from)?;
                common_metrics::inc("jobforge_job_succeeded", &[], 1);
            }
            Outcome::Snoozed(seconds) => {
                finish_execution_row(&mut *conn, execution_id, None, Some(ErrorEvent::Snoozed), &[], duration_ms)
                    .await?;
                let reschedule_at = Utc::now() + chrono::Duration::seconds(seconds);
                retry::snooze_job(&mut *conn, job.id, reschedule_at)
                    .await
                    .map_err(JobError::from)?;
            }
            Outcome::Cancelled(reason) => {
                finish_execution_row(
                    &mut *conn,
                    execution_id,
                    Some(&reason),
                    Some(ErrorEvent::Cancelled),
                    &[],
                    duration_ms,
                )
                .await?;
                retry::finish_job(&mut *conn, job.id, Some(&reason), Some(ErrorEvent::Cancelled))
                    .await
                    .map_err(JobError::from)?;
                common_metrics::inc("jobforge_job_cancelled", &[], 1);
            }
            Outcome::Discarded(reason) => {
                finish_execution_row(
                    &mut *conn,
                    execution_id,
                    Some(&reason),
                    Some(ErrorEvent::Discarded),
                    &[],
                    duration_ms,
                )
                .await?;
                retry::finish_job(&mut *conn, job.id, Some(&reason), Some(ErrorEvent::Discarded))
                    .await
                    .map_err(JobError::from)?;
                common_metrics::inc("jobforge_job_discarded", &[], 1);
            }
            Outcome::Timeout(timeout) => {
                let error = format!("handler timed out after {timeout:?}");
                self.finish_retryable(&mut *conn, execution_id, job, &error, "TimeoutError", &[], duration_ms)
                    .await?;
            }
            Outcome::Failed { error, exception_type, backtrace } => {
                self.finish_retryable(
                    &mut *conn,
                    execution_id,
                    job,
                    &error,
                    &exception_type,
                    &backtrace,
                    duration_ms,
                )
                .await?;
            }
        }

        Ok(())
    }

    async fn finish_retryable(
        &self,
        conn: &mut PgConnection,
        execution_id: Uuid,
        job: &Job,
        error: &str,
        exception_type: &str,
        backtrace: &[String],
        duration_ms: i64,
    ) -> JobResult<()> {
        let handler = self.registry.get(&job.job_class);
        let discard_on: Vec<String> = handler
            .as_ref()
            .map(|h| h.discard_on().to_vec())
            .unwrap_or_default();
        let max_attempts = handler
            .as_ref()
            .map(|h| h.max_attempts())
            .unwrap_or(crate::config::DEFAULT_MAX_ATTEMPTS);
        let backoff = handler.as_ref().map(|h| h.backoff()).unwrap_or_default();

        let class = classify_exception_name(exception_type, &discard_on);

        let exhausted = job.executions_count >= max_attempts;

        if class == ErrorClass::Discard || exhausted {
            finish_execution_row(
                conn,
                execution_id,
                Some(error),
                Some(ErrorEvent::Discarded),
                backtrace,
                duration_ms,
            )
            .await?;
            retry::finish_job(&mut *conn, job.id, Some(error), Some(ErrorEvent::Discarded))
                .await
                .map_err(JobError::from)?;
            common_metrics::inc("jobforge_job_discarded", &[], 1);
        } else {
            finish_execution_row(
                conn,
                execution_id,
                Some(error),
                Some(ErrorEvent::Handled),
                backtrace,
                duration_ms,
            )
            .await?;
            let delay = backoff.delay(job.executions_count as u32);
            let reschedule_at = Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(1));
            retry::fail_and_reschedule(&mut *conn, job.id, error, reschedule_at)
                .await
                .map_err(JobError::from)?;
            common_metrics::inc("jobforge_job_retried", &[], 1);
        }

        Ok(())
    }
}

async fn finish_execution_row(
    conn: &mut PgConnection,
    execution_id: Uuid,
    error: Option<&str>,
    error_event: Option<ErrorEvent>,
    error_backtrace: &[String],
    duration_ms: i64,
) -> JobResult<()> {
    sqlx::query(
        "UPDATE jobforge_executions
         SET finished_at = NOW(), error = $2, error_event = $3, error_backtrace = $4, duration_ms = $5
         WHERE id = $1",
    )
    .bind(execution_id)
    .bind(error)
    .bind(error_event.map(|e| e.to_string()))
    .bind(error_backtrace)
    .bind(duration_ms)
    .execute(conn)
    .await
    .map_err(crate::error::QueueError::from)?;

    Ok(())
}

enum Outcome {
    Success,
    Snoozed(i64),
    Cancelled(String),
    Discarded(String),
    Timeout(StdDuration),
    Failed {
        error: String,
        exception_type: String,
        backtrace: Vec<String>,
    },
}
