//! Fires aggregate callbacks exactly once each when every member of a batch
//! has reached a terminal state. Each callback is gated by the nullness of
//! its corresponding timestamp, set in the same transaction as the fire, so
//! a retrying transaction never double-fires.

use chrono::Utc;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::QueueError;
use crate::job_store::enqueue;
use crate::types::{Batch, JobInit};

/// Called by the executor, in the same transaction that finished a batch
/// member, whenever that member reaches a terminal state.
pub async fn check_completion(
    tx: &mut PgConnection,
    batch_id: Uuid,
    member_failed: bool,
) -> Result<(), QueueError> {
    let batch = sqlx::query_as::<_, Batch>("SELECT * FROM jobforge_batches WHERE id = $1 FOR UPDATE")
        .bind(batch_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(QueueError::BatchNotFound(batch_id))?;

    if member_failed && batch.discarded_at.is_none() {
        sqlx::query("UPDATE jobforge_batches SET discarded_at = NOW() WHERE id = $1")
            .bind(batch_id)
            .execute(&mut *tx)
            .await?;

        if let Some(on_discard) = &batch.on_discard {
            fire_callback(tx, &batch, on_discard).await?;
        }
    }

    if batch.jobs_finished_at.is_none() {
        let unfinished: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobforge_jobs WHERE batch_id = $1 AND finished_at IS NULL",
        )
        .bind(batch_id)
        .fetch_one(&mut *tx)
        .await?;

        if unfinished == 0 {
            sqlx::query("UPDATE jobforge_batches SET jobs_finished_at = NOW() WHERE id = $1")
                .bind(batch_id)
                .execute(&mut *tx)
                .await?;

            // Re-read discarded_at: the update above in this same transaction
            // may have just set it for this very completion.
            let discarded_now: bool =
                sqlx::query_scalar("SELECT discarded_at IS NOT NULL FROM jobforge_batches WHERE id = $1")
                    .bind(batch_id)
                    .fetch_one(&mut *tx)
                    .await?;

            if !discarded_now {
                if let Some(on_success) = &batch.on_success {
                    fire_callback(tx, &batch, on_success).await?;
                }
            }
            if let Some(on_finish) = &batch.on_finish {
                fire_callback(tx, &batch, on_finish).await?;
            }
        }
    }

    if batch.finished_at.is_none() {
        let jobs_finished_at: Option<chrono::DateTime<Utc>> =
            sqlx::query_scalar("SELECT jobs_finished_at FROM jobforge_batches WHERE id = $1")
                .bind(batch_id)
                .fetch_one(&mut *tx)
                .await?;

        if jobs_finished_at.is_some() {
            let unfinished_callbacks: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM jobforge_jobs WHERE batch_callback_id = $1 AND finished_at IS NULL",
            )
            .bind(batch_id)
            .fetch_one(&mut *tx)
            .await?;

            if unfinished_callbacks == 0 {
                sqlx::query("UPDATE jobforge_batches SET finished_at = NOW() WHERE id = $1")
                    .bind(batch_id)
                    .execute(&mut *tx)
                    .await?;
            }
        }
    }

    Ok(())
}

async fn fire_callback(tx: &mut PgConnection, batch: &Batch, job_class: &str) -> Result<(), QueueError> {
    let job = JobInit {
        active_job_id: None,
        job_class: job_class.to_string(),
        queue_name: batch.callback_queue_name.clone(),
        priority: batch.callback_priority,
        serialized_params: serde_json::json!([{"batch_id": batch.id}]),
        scheduled_at: None,
        concurrency_key: None,
        cron_key: None,
        cron_at: None,
        batch_id: None,
        batch_callback_id: Some(batch.id),
        labels: Vec::new(),
    };

    enqueue::create_job(&mut *tx, job).await?;
    Ok(())
}

/// Clears `discarded_at` and retries every discarded member of the batch.
pub async fn retry_discarded_batch(tx: &mut PgConnection, batch_id: Uuid) -> Result<u64, QueueError> {
    sqlx::query("UPDATE jobforge_batches SET discarded_at = NULL WHERE id = $1")
        .bind(batch_id)
        .execute(&mut *tx)
        .await?;

    let result = sqlx::query(
        "UPDATE jobforge_jobs
         SET finished_at = NULL, error = NULL, error_event = NULL,
             performed_at = NULL, locked_by_id = NULL, locked_at = NULL,
             scheduled_at = NOW()
         WHERE batch_id = $1 AND error_event = 'discarded'",
    )
    .bind(batch_id)
    .execute(&mut *tx)
    .await?;

    Ok(result.rows_affected())
}

pub async fn create_batch(
    tx: &mut PgConnection,
    description: Option<String>,
    on_finish: Option<String>,
    on_success: Option<String>,
    on_discard: Option<String>,
    callback_queue_name: &str,
    callback_priority: i32,
) -> Result<Uuid, QueueError> {
    let id = Uuid::now_v7();

    sqlx::query(
        "INSERT INTO jobforge_batches
            (id, description, on_finish, on_success, on_discard, callback_queue_name, callback_priority, enqueued_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())",
    )
    .bind(id)
    .bind(description)
    .bind(on_finish)
    .bind(on_success)
    .bind(on_discard)
    .bind(callback_queue_name)
    .bind(callback_priority)
    .execute(&mut *tx)
    .await?;

    Ok(id)
}
