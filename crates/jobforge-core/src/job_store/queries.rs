use sqlx::PgExecutor;
use uuid::Uuid;

use crate::error::QueueError;
use crate::types::Job;

pub async fn find_by_id<'c, E>(executor: E, job_id: Uuid) -> Result<Option<Job>, QueueError>
where
    E: PgExecutor<'c>,
{
    let job = sqlx::query_as::<_, Job>("SELECT * FROM jobforge_jobs WHERE id = $1")
        .bind(job_id)
        .fetch_optional(executor)
        .await?;

    Ok(job)
}

/// Count of rows that are unfinished and eligible to run right now (the
/// "available" state): `finished_at IS NULL AND performed_at IS NULL AND
/// (scheduled_at IS NULL OR scheduled_at <= now)`.
pub async fn count_total_waiting_jobs<'c, E>(executor: E) -> Result<u64, QueueError>
where
    E: PgExecutor<'c>,
{
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM jobforge_jobs
         WHERE finished_at IS NULL AND performed_at IS NULL
           AND (scheduled_at IS NULL OR scheduled_at <= NOW())",
    )
    .fetch_one(executor)
    .await?;

    Ok(count as u64)
}

/// `true` if the named queue is paused via the settings key `queue_paused:<name>`.
pub async fn is_queue_paused<'c, E>(executor: E, queue_name: &str) -> Result<bool, QueueError>
where
    E: PgExecutor<'c>,
{
    let key = format!("queue_paused:{queue_name}");
    let paused: Option<bool> = sqlx::query_scalar(
        "SELECT (value->>'paused')::boolean FROM jobforge_settings WHERE key = $1",
    )
    .bind(key)
    .fetch_optional(executor)
    .await?;

    Ok(paused.unwrap_or(false))
}

/// `true` if the named job class is paused via the settings key `class_paused:<name>`.
pub async fn is_job_class_paused<'c, E>(executor: E, job_class: &str) -> Result<bool, QueueError>
where
    E: PgExecutor<'c>,
{
    let key = format!("class_paused:{job_class}");
    let paused: Option<bool> = sqlx::query_scalar(
        "SELECT (value->>'paused')::boolean FROM jobforge_settings WHERE key = $1",
    )
    .bind(key)
    .fetch_optional(executor)
    .await?;

    Ok(paused.unwrap_or(false))
}

pub async fn set_paused<'c, E>(
    executor: E,
    key: &str,
    paused: bool,
) -> Result<(), QueueError>
where
    E: PgExecutor<'c>,
{
    sqlx::query(
        "INSERT INTO jobforge_settings (key, value) VALUES ($1, jsonb_build_object('paused', $2))
         ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
    )
    .bind(key)
    .bind(paused)
    .execute(executor)
    .await?;

    Ok(())
}

/// Cron keys currently disabled via the settings row `cron_disabled_keys`.
pub async fn disabled_cron_keys<'c, E>(executor: E) -> Result<Vec<String>, QueueError>
where
    E: PgExecutor<'c>,
{
    let value: Option<serde_json::Value> =
        sqlx::query_scalar("SELECT value FROM jobforge_settings WHERE key = 'cron_disabled_keys'")
            .fetch_optional(executor)
            .await?;

    let keys = value
        .and_then(|v| v.as_array().cloned())
        .unwrap_or_default()
        .into_iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();

    Ok(keys)
}
