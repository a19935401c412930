use chrono::{DateTime, Utc};
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::error::QueueError;
use crate::types::ErrorEvent;

/// Clears `finished_at`, `error`, `performed_at`, `locked_by_id`, `locked_at`
/// and sets `scheduled_at = now`, atomically. Used both for manual retry of a
/// finished (discarded/cancelled) job and for retrying a discarded batch member.
pub async fn retry_job<'c, E>(executor: E, job_id: Uuid) -> Result<u64, QueueError>
where
    E: PgExecutor<'c>,
{
    let result = sqlx::query(
        r#"
UPDATE jobforge_jobs
SET finished_at = NULL,
    error = NULL,
    error_event = NULL,
    performed_at = NULL,
    locked_by_id = NULL,
    locked_at = NULL,
    scheduled_at = NOW()
WHERE id = $1
"#,
    )
    .bind(job_id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

pub async fn delete_job<'c, E>(executor: E, job_id: Uuid) -> Result<u64, QueueError>
where
    E: PgExecutor<'c>,
{
    let result = sqlx::query("DELETE FROM jobforge_jobs WHERE id = $1")
        .bind(job_id)
        .execute(executor)
        .await?;

    Ok(result.rows_affected())
}

/// Reschedules a job without consuming a retry attempt (the `snooze(seconds)`
/// handler outcome). Claim markers are cleared so the next poll can re-select it.
pub async fn snooze_job<'c, E>(
    executor: E,
    job_id: Uuid,
    reschedule_at: DateTime<Utc>,
) -> Result<u64, QueueError>
where
    E: PgExecutor<'c>,
{
    let result = sqlx::query(
        r#"
UPDATE jobforge_jobs
SET scheduled_at = $2, performed_at = NULL, locked_by_id = NULL, locked_at = NULL
WHERE id = $1 AND finished_at IS NULL
"#,
    )
    .bind(job_id)
    .bind(reschedule_at)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

/// Reschedules a retryable failure: clears the claim and sets a future
/// `scheduled_at`, leaving `finished_at` null so the next poll picks it back up.
pub async fn reschedule_retry<'c, E>(
    executor: E,
    job_id: Uuid,
    reschedule_at: DateTime<Utc>,
) -> Result<u64, QueueError>
where
    E: PgExecutor<'c>,
{
    let result = sqlx::query(
        r#"
UPDATE jobforge_jobs
SET scheduled_at = $2, performed_at = NULL, locked_by_id = NULL, locked_at = NULL
WHERE id = $1 AND finished_at IS NULL
"#,
    )
    .bind(job_id)
    .bind(reschedule_at)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

/// Records a retryable failure without finishing the job: sets `error` and
/// `error_event=handled`, clears the claim, and reschedules. `finished_at`
/// stays null since attempts remain; only an exhausted retry budget finishes
/// the row (as discarded, via `finish_job`).
pub async fn fail_and_reschedule<'c, E>(
    executor: E,
    job_id: Uuid,
    error: &str,
    reschedule_at: DateTime<Utc>,
) -> Result<u64, QueueError>
where
    E: PgExecutor<'c>,
{
    let result = sqlx::query(
        r#"
UPDATE jobforge_jobs
SET error = $2,
    error_event = 'handled',
    scheduled_at = $3,
    performed_at = NULL,
    locked_by_id = NULL,
    locked_at = NULL
WHERE id = $1 AND finished_at IS NULL
"#,
    )
    .bind(job_id)
    .bind(error)
    .bind(reschedule_at)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

/// Finishes a job row in a terminal state: success (`error = NULL`), or
/// retryable-exhausted/cancelled/discarded (`error` set, tagged by `error_event`).
pub async fn finish_job<'c, E>(
    executor: E,
    job_id: Uuid,
    error: Option<&str>,
    error_event: Option<ErrorEvent>,
) -> Result<u64, QueueError>
where
    E: PgExecutor<'c>,
{
    let result = sqlx::query(
        r#"
UPDATE jobforge_jobs
SET finished_at = NOW(), error = $2, error_event = $3
WHERE id = $1 AND finished_at IS NULL
"#,
    )
    .bind(job_id)
    .bind(error)
    .bind(error_event.map(|e| e.to_string()))
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}
