//! The store is a query surface on the `Job` entity: composable predicates,
//! the two ordering disciplines (candidate-lookup, dequeue), and the
//! transactional operations (enqueue, claim, retry, finish) that keep the
//! job table correct under concurrent workers.

pub mod dequeue;
pub mod enqueue;
pub mod queries;
pub mod retry;

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::DEFAULT_NOTIFIER_CHANNEL;
use crate::error::QueueError;
use crate::queue_expr::QueueExpr;
use crate::types::{ErrorEvent, Job, JobInit};
use crate::wire::NotificationPayload;

#[derive(Clone)]
pub struct JobStore {
    pool: PgPool,
    notify_channel: String,
}

impl JobStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            notify_channel: DEFAULT_NOTIFIER_CHANNEL.to_string(),
        }
    }

    /// Overrides the channel `NOTIFY` is issued on; must match the channel
    /// `Notifier::spawn` is listening on for newly-enqueued jobs to be seen.
    pub fn with_notify_channel(mut self, channel: impl Into<String>) -> Self {
        self.notify_channel = channel.into();
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Enqueues one job and, if it's immediately eligible to run (no future
    /// `scheduled_at`), issues a `pg_notify` on the configured channel so a
    /// listening `Notifier` can wake a waiting scheduler without waiting for
    /// the next poll.
    pub async fn enqueue(&self, job: JobInit) -> Result<Uuid, QueueError> {
        let immediately_eligible = job
            .scheduled_at
            .map(|at| at <= Utc::now())
            .unwrap_or(true);
        let queue_name = job.queue_name.clone();

        let id = enqueue::create_job(&self.pool, job).await?;

        if immediately_eligible {
            common_metrics::inc("jobforge_jobs_enqueued", &[], 1);
            self.notify_queue(&queue_name).await?;
        }

        Ok(id)
    }

    pub async fn bulk_enqueue(&self, jobs: &[JobInit]) -> Result<Vec<Uuid>, QueueError> {
        let ids = enqueue::bulk_create_jobs(&self.pool, jobs).await?;
        common_metrics::inc("jobforge_jobs_enqueued", &[], ids.len() as u64);

        let now = Utc::now();
        let mut notified_queues = HashSet::new();
        for job in jobs {
            let immediately_eligible = job.scheduled_at.map(|at| at <= now).unwrap_or(true);
            if immediately_eligible && notified_queues.insert(job.queue_name.clone()) {
                self.notify_queue(&job.queue_name).await?;
            }
        }

        Ok(ids)
    }

    /// Issues `SELECT pg_notify(channel, payload)` so any worker `LISTEN`ing
    /// on `notify_channel` wakes immediately instead of waiting for its next
    /// poll. One row, one round trip; failure here surfaces as a normal
    /// `QueueError` rather than being swallowed, since a caller that asked to
    /// be notified should know if that promise couldn't be kept.
    async fn notify_queue(&self, queue_name: &str) -> Result<(), QueueError> {
        let payload = serde_json::to_string(&NotificationPayload {
            queue_name: queue_name.to_string(),
        })?;

        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(&self.notify_channel)
            .bind(payload)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn find_by_id(&self, job_id: Uuid) -> Result<Option<Job>, QueueError> {
        queries::find_by_id(&self.pool, job_id).await
    }

    /// Attempts one selection round for a scheduler pool bound to `queue_expr`.
    pub async fn select_and_claim(
        &self,
        queue_expr: &QueueExpr,
        worker_id: Uuid,
        limit: i64,
        stale_claim_seconds: i64,
        enable_pauses: bool,
    ) -> Result<Option<Job>, QueueError> {
        dequeue::select_and_claim(
            &self.pool,
            queue_expr,
            worker_id,
            limit,
            stale_claim_seconds,
            enable_pauses,
        )
        .await
    }

    pub async fn retry(&self, job_id: Uuid) -> Result<(), QueueError> {
        retry::retry_job(&self.pool, job_id).await?;
        Ok(())
    }

    pub async fn delete(&self, job_id: Uuid) -> Result<(), QueueError> {
        retry::delete_job(&self.pool, job_id).await?;
        Ok(())
    }

    pub async fn snooze(&self, job_id: Uuid, reschedule_at: DateTime<Utc>) -> Result<(), QueueError> {
        retry::snooze_job(&self.pool, job_id, reschedule_at).await?;
        Ok(())
    }

    pub async fn reschedule_retry(
        &self,
        job_id: Uuid,
        reschedule_at: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        retry::reschedule_retry(&self.pool, job_id, reschedule_at).await?;
        Ok(())
    }

    pub async fn finish(
        &self,
        job_id: Uuid,
        error: Option<&str>,
        error_event: Option<ErrorEvent>,
    ) -> Result<(), QueueError> {
        retry::finish_job(&self.pool, job_id, error, error_event).await?;
        Ok(())
    }

    pub async fn count_waiting(&self) -> Result<u64, QueueError> {
        queries::count_total_waiting_jobs(&self.pool).await
    }

    pub async fn is_queue_paused(&self, queue_name: &str) -> Result<bool, QueueError> {
        queries::is_queue_paused(&self.pool, queue_name).await
    }

    pub async fn is_job_class_paused(&self, job_class: &str) -> Result<bool, QueueError> {
        queries::is_job_class_paused(&self.pool, job_class).await
    }

    pub async fn set_queue_paused(&self, queue_name: &str, paused: bool) -> Result<(), QueueError> {
        queries::set_paused(&self.pool, &format!("queue_paused:{queue_name}"), paused).await
    }

    pub async fn set_job_class_paused(
        &self,
        job_class: &str,
        paused: bool,
    ) -> Result<(), QueueError> {
        queries::set_paused(&self.pool, &format!("class_paused:{job_class}"), paused).await
    }
}
