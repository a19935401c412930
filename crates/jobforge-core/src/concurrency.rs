//! Per-concurrency-key enqueue/perform limits and sliding-window throttles,
//! backed by transactional advisory locks and counting queries rather than
//! any in-process semaphore (so limits hold across every worker process
//! sharing the database, not just within one).

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::advisory_lock::try_xact_lock;
use crate::error::QueueError;

/// Sentinel error string recorded on an execution row that was skipped for
/// throttling, so it doesn't itself occupy a throttle-window slot.
pub const THROTTLE_SENTINEL: &str = "__jobforge_throttled__";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimiterOutcome {
    Ok,
    LockFailed,
    LimitExceeded,
    ThrottleExceeded,
}

#[derive(Debug, Clone, Default)]
pub struct ConcurrencyConfig {
    pub enqueue_limit: Option<i64>,
    pub perform_limit: Option<i64>,
    pub total_limit: Option<i64>,
    pub enqueue_throttle: Option<(i64, i64)>, // (count, seconds)
    pub perform_throttle: Option<(i64, i64)>,
}

/// Enqueue-side check (§4.6). Must run inside the same transaction the
/// enqueue insert itself will use, so the advisory lock and the count it
/// guards are consistent.
pub async fn check_enqueue(
    tx: &mut sqlx::PgConnection,
    key: &str,
    config: &ConcurrencyConfig,
) -> Result<LimiterOutcome, QueueError> {
    if !try_xact_lock(tx, key).await {
        return Ok(LimiterOutcome::LockFailed);
    }

    if let Some(limit) = config.enqueue_limit {
        // Unfinished AND unclaimed: locked_by_id IS NULL.
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobforge_jobs
             WHERE concurrency_key = $1 AND finished_at IS NULL AND locked_by_id IS NULL",
        )
        .bind(key)
        .fetch_one(&mut *tx)
        .await?;

        if count + 1 > limit {
            return Ok(LimiterOutcome::LimitExceeded);
        }
    }

    if let Some((throttle_limit, seconds)) = config.enqueue_throttle {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobforge_jobs
             WHERE concurrency_key = $1 AND created_at >= NOW() - make_interval(secs => $2)",
        )
        .bind(key)
        .bind(seconds as f64)
        .fetch_one(&mut *tx)
        .await?;

        if count + 1 > throttle_limit {
            return Ok(LimiterOutcome::ThrottleExceeded);
        }
    }

    Ok(LimiterOutcome::Ok)
}

/// Perform-side check (§4.6), run by the executor immediately before it
/// actually invokes the handler. `job_id` and `active_job_id` identify the
/// job under consideration so it can exclude itself from the "other
/// unfinished rows" count and find itself in the throttle window.
pub async fn check_perform(
    tx: &mut sqlx::PgConnection,
    key: &str,
    job_id: Uuid,
    active_job_id: Uuid,
    config: &ConcurrencyConfig,
) -> Result<LimiterOutcome, QueueError> {
    if !try_xact_lock(tx, key).await {
        return Ok(LimiterOutcome::LockFailed);
    }

    let limit = config.perform_limit.or(config.total_limit);
    if let Some(limit) = limit {
        let count: i64 = if config.perform_limit.is_some() {
            sqlx::query_scalar(
                "SELECT COUNT(*) FROM jobforge_jobs
                 WHERE concurrency_key = $1 AND finished_at IS NULL AND locked_by_id IS NOT NULL",
            )
            .bind(key)
            .fetch_one(&mut *tx)
            .await?
        } else {
            sqlx::query_scalar(
                "SELECT COUNT(*) FROM jobforge_jobs
                 WHERE concurrency_key = $1 AND finished_at IS NULL AND id != $2",
            )
            .bind(key)
            .bind(job_id)
            .fetch_one(&mut *tx)
            .await?
        };

        if count >= limit {
            return Ok(LimiterOutcome::LimitExceeded);
        }
    }

    if let Some((throttle_limit, seconds)) = config.perform_throttle {
        let active_ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT e.active_job_id FROM jobforge_executions e
             JOIN jobforge_jobs j ON j.active_job_id = e.active_job_id
             WHERE j.concurrency_key = $1
               AND e.created_at >= NOW() - make_interval(secs => $2)
               AND COALESCE(e.error, '') != $3
             ORDER BY e.created_at ASC
             LIMIT $4",
        )
        .bind(key)
        .bind(seconds as f64)
        .bind(THROTTLE_SENTINEL)
        .bind(throttle_limit)
        .fetch_all(&mut *tx)
        .await?;

        if !active_ids.contains(&active_job_id) {
            return Ok(LimiterOutcome::ThrottleExceeded);
        }
    }

    Ok(LimiterOutcome::Ok)
}

pub async fn record_throttled_execution(
    pool: &PgPool,
    active_job_id: Uuid,
    job_class: &str,
    queue_name: &str,
    serialized_params: &serde_json::Value,
) -> Result<(), QueueError> {
    sqlx::query(
        "INSERT INTO jobforge_executions
            (id, active_job_id, job_class, queue_name, serialized_params, finished_at, error, error_event, created_at)
         VALUES ($1, $2, $3, $4, $5, NOW(), $6, 'handled', NOW())",
    )
    .bind(Uuid::now_v7())
    .bind(active_job_id)
    .bind(job_class)
    .bind(queue_name)
    .bind(serialized_params)
    .bind(THROTTLE_SENTINEL)
    .execute(pool)
    .await?;

    Ok(())
}

#[derive(Debug)]
pub struct ThrottleWindow {
    pub since: DateTime<Utc>,
}

impl ThrottleWindow {
    pub fn new(seconds: i64) -> Self {
        Self {
            since: Utc::now() - chrono::Duration::seconds(seconds),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_window_is_in_the_past() {
        let window = ThrottleWindow::new(30);
        assert!(window.since < Utc::now());
    }
}
