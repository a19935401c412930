//! Periodic deletion of finished rows older than a horizon, in bounded
//! batches so a large backlog never holds one long-running transaction.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::QueueError;

#[derive(Debug, Clone, Copy)]
pub struct CleanupReport {
    pub jobs_deleted: u64,
    pub executions_deleted: u64,
    pub batches_deleted: u64,
}

/// Deletes finished jobs, their executions, and finished batches older than
/// `horizon`, oldest first, at most `batch_size` rows per table per round.
/// `include_discarded=false` preserves rows whose `error` is non-null, for
/// forensic inspection.
pub async fn run(
    pool: &PgPool,
    horizon: DateTime<Utc>,
    batch_size: i64,
    include_discarded: bool,
) -> Result<CleanupReport, QueueError> {
    let jobs_deleted = delete_finished_jobs(pool, horizon, batch_size, include_discarded).await?;
    let executions_deleted = delete_orphaned_executions(pool, horizon, batch_size).await?;
    let batches_deleted = delete_finished_batches(pool, horizon, batch_size).await?;

    Ok(CleanupReport {
        jobs_deleted,
        executions_deleted,
        batches_deleted,
    })
}

async fn delete_finished_jobs(
    pool: &PgPool,
    horizon: DateTime<Utc>,
    batch_size: i64,
    include_discarded: bool,
) -> Result<u64, QueueError> {
    let query = if include_discarded {
        r#"
WITH victims AS (
    SELECT id FROM jobforge_jobs
    WHERE finished_at IS NOT NULL AND finished_at < $1
    ORDER BY finished_at ASC
    LIMIT $2
    FOR UPDATE SKIP LOCKED
)
DELETE FROM jobforge_jobs USING victims WHERE jobforge_jobs.id = victims.id
"#
    } else {
        r#"
WITH victims AS (
    SELECT id FROM jobforge_jobs
    WHERE finished_at IS NOT NULL AND finished_at < $1 AND error IS NULL
    ORDER BY finished_at ASC
    LIMIT $2
    FOR UPDATE SKIP LOCKED
)
DELETE FROM jobforge_jobs USING victims WHERE jobforge_jobs.id = victims.id
"#
    };

    let result = sqlx::query(query)
        .bind(horizon)
        .bind(batch_size)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

/// Execution rows are audit trail for a job, so they're cleaned up once the
/// job itself is gone, keyed on `active_job_id` having no surviving job row.
async fn delete_orphaned_executions(
    pool: &PgPool,
    horizon: DateTime<Utc>,
    batch_size: i64,
) -> Result<u64, QueueError> {
    let result = sqlx::query(
        r#"
WITH victims AS (
    SELECT e.id FROM jobforge_executions e
    WHERE e.finished_at IS NOT NULL AND e.finished_at < $1
      AND NOT EXISTS (SELECT 1 FROM jobforge_jobs j WHERE j.active_job_id = e.active_job_id)
    ORDER BY e.finished_at ASC
    LIMIT $2
    FOR UPDATE SKIP LOCKED
)
DELETE FROM jobforge_executions USING victims WHERE jobforge_executions.id = victims.id
"#,
    )
    .bind(horizon)
    .bind(batch_size)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

async fn delete_finished_batches(
    pool: &PgPool,
    horizon: DateTime<Utc>,
    batch_size: i64,
) -> Result<u64, QueueError> {
    let result = sqlx::query(
        r#"
WITH victims AS (
    SELECT id FROM jobforge_batches
    WHERE finished_at IS NOT NULL AND finished_at < $1
    ORDER BY finished_at ASC
    LIMIT $2
    FOR UPDATE SKIP LOCKED
)
DELETE FROM jobforge_batches USING victims WHERE jobforge_batches.id = victims.id
"#,
    )
    .bind(horizon)
    .bind(batch_size)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}
