use chrono::Utc;
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::error::QueueError;
use crate::types::JobInit;

pub async fn create_job<'c, E>(executor: E, data: JobInit) -> Result<Uuid, QueueError>
where
    E: PgExecutor<'c>,
{
    let id = Uuid::now_v7();
    let active_job_id = data.active_job_id.unwrap_or(id);

    sqlx::query(
        r#"
INSERT INTO jobforge_jobs
    (
        id,
        active_job_id,
        job_class,
        queue_name,
        priority,
        serialized_params,
        scheduled_at,
        concurrency_key,
        cron_key,
        cron_at,
        batch_id,
        batch_callback_id,
        labels,
        created_at
    )
VALUES
    ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, NOW())
"#,
    )
    .bind(id)
    .bind(active_job_id)
    .bind(&data.job_class)
    .bind(&data.queue_name)
    .bind(data.priority)
    .bind(&data.serialized_params)
    .bind(data.scheduled_at)
    .bind(&data.concurrency_key)
    .bind(&data.cron_key)
    .bind(data.cron_at)
    .bind(data.batch_id)
    .bind(data.batch_callback_id)
    .bind(&data.labels)
    .execute(executor)
    .await?;

    Ok(id)
}

/// Bulk-insert jobs using `UNNEST` over parallel column arrays, the
/// low-round-trip way to insert many independent jobs in one statement.
///
/// Labels are intentionally left out of the parallel-array set: a per-job
/// `text[]` column doesn't `UNNEST` sensibly alongside scalar columns (it
/// would be flattened into extra rows, not kept as one array per row), so
/// bulk-inserted jobs start with an empty label set; callers that need
/// per-job labels should insert those jobs individually via `create_job`.
pub async fn bulk_create_jobs<'c, E>(executor: E, jobs: &[JobInit]) -> Result<Vec<Uuid>, QueueError>
where
    E: PgExecutor<'c>,
{
    let now = Utc::now();

    let mut ids = Vec::with_capacity(jobs.len());
    let mut active_job_ids = Vec::with_capacity(jobs.len());
    let mut job_classes = Vec::with_capacity(jobs.len());
    let mut queue_names = Vec::with_capacity(jobs.len());
    let mut priorities = Vec::with_capacity(jobs.len());
    let mut params = Vec::with_capacity(jobs.len());
    let mut scheduled_ats = Vec::with_capacity(jobs.len());
    let mut concurrency_keys = Vec::with_capacity(jobs.len());
    let mut cron_keys = Vec::with_capacity(jobs.len());
    let mut cron_ats = Vec::with_capacity(jobs.len());
    let mut batch_ids = Vec::with_capacity(jobs.len());
    let mut batch_callback_ids = Vec::with_capacity(jobs.len());
    let mut created_ats = Vec::with_capacity(jobs.len());

    for job in jobs {
        let id = Uuid::now_v7();
        ids.push(id);
        active_job_ids.push(job.active_job_id.unwrap_or(id));
        job_classes.push(job.job_class.clone());
        queue_names.push(job.queue_name.clone());
        priorities.push(job.priority);
        params.push(job.serialized_params.clone());
        scheduled_ats.push(job.scheduled_at);
        concurrency_keys.push(job.concurrency_key.clone());
        cron_keys.push(job.cron_key.clone());
        cron_ats.push(job.cron_at);
        batch_ids.push(job.batch_id);
        batch_callback_ids.push(job.batch_callback_id);
        created_ats.push(now);
    }

    sqlx::query(
        r#"
INSERT INTO jobforge_jobs
    (
        id,
        active_job_id,
        job_class,
        queue_name,
        priority,
        serialized_params,
        scheduled_at,
        concurrency_key,
        cron_key,
        cron_at,
        batch_id,
        batch_callback_id,
        created_at
    )
SELECT *
FROM UNNEST(
        $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13
    )
"#,
    )
    .bind(&ids)
    .bind(&active_job_ids)
    .bind(&job_classes)
    .bind(&queue_names)
    .bind(&priorities)
    .bind(&params)
    .bind(&scheduled_ats)
    .bind(&concurrency_keys)
    .bind(&cron_keys)
    .bind(&cron_ats)
    .bind(&batch_ids)
    .bind(&batch_callback_ids)
    .bind(&created_ats)
    .execute(executor)
    .await?;

    Ok(ids)
}
