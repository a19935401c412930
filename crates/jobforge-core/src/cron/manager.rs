//! Materializes recurring schedules into jobs, relying on the
//! `(cron_key, cron_at)` uniqueness constraint among non-finished rows to
//! make concurrent/duplicate firings idempotent.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::cron::parser::CronSchedule;
use crate::error::QueueError;
use crate::job_store::{enqueue, queries};
use crate::types::JobInit;

#[derive(Debug, Clone)]
pub struct CronEntry {
    pub key: String,
    pub schedule: CronSchedule,
    pub job_class: String,
    pub arguments: Vec<Value>,
    pub queue_name: String,
    pub priority: i32,
    pub enabled: bool,
}

/// Enqueues the job for one cron fire. Unique constraint violations on
/// `(cron_key, cron_at)` are swallowed as the expected outcome of two
/// managers racing the same entry at the same minute, not an error.
pub async fn fire(pool: &PgPool, entry: &CronEntry, cron_at: DateTime<Utc>) -> Result<bool, QueueError> {
    let job = JobInit {
        active_job_id: None,
        job_class: entry.job_class.clone(),
        queue_name: entry.queue_name.clone(),
        priority: entry.priority,
        serialized_params: Value::Array(entry.arguments.clone()),
        scheduled_at: None,
        concurrency_key: None,
        cron_key: Some(entry.key.clone()),
        cron_at: Some(cron_at),
        batch_id: None,
        batch_callback_id: None,
        labels: Vec::new(),
    };

    match enqueue::create_job(pool, job).await {
        Ok(_id) => {
            common_metrics::inc("jobforge_cron_fires", &[("key".to_string(), entry.key.clone())], 1);
            Ok(true)
        }
        Err(QueueError::DatabaseError(sqlx::Error::Database(db_err)))
            if db_err.is_unique_violation() =>
        {
            tracing::debug!(key = %entry.key, at = %cron_at, "cron fire deduplicated by unique constraint");
            Ok(false)
        }
        Err(other) => Err(other),
    }
}

/// Whether an entry is disabled, either by its own flag or by appearing in
/// the settings store's disabled-cron-keys list.
pub async fn is_disabled(pool: &PgPool, entry: &CronEntry) -> Result<bool, QueueError> {
    if !entry.enabled {
        return Ok(true);
    }
    let disabled = queries::disabled_cron_keys(pool).await?;
    Ok(disabled.iter().any(|k| k == &entry.key))
}

/// Enumerates every fire time for `entry` in `[now - catch_up_period, now]`
/// and attempts to enqueue each, relying on the uniqueness constraint to
/// filter duplicates left over from runs that happened before a restart.
pub async fn catch_up(
    pool: &PgPool,
    entry: &CronEntry,
    now: DateTime<Utc>,
    catch_up_period: chrono::Duration,
) -> Result<u32, QueueError> {
    if entry.schedule.is_reboot() {
        return Ok(0);
    }

    let window_start = now - catch_up_period;
    let mut fired = 0u32;
    let mut cursor = window_start;

    while let Some(next) = entry.schedule.next_after(cursor) {
        if next > now {
            break;
        }
        if fire(pool, entry, next).await? {
            fired += 1;
        }
        cursor = next;
    }

    Ok(fired)
}

/// Computes the next timer deadline for an entry, enforcing a 100ms floor to
/// avoid a thundering-herd of near-zero timers firing together at startup.
pub fn next_deadline(entry: &CronEntry, now: DateTime<Utc>) -> Option<(DateTime<Utc>, std::time::Duration)> {
    let next = entry.schedule.next_after(now)?;
    let raw = (next - now).to_std().unwrap_or(std::time::Duration::ZERO);
    Some((next, raw.max(std::time::Duration::from_millis(100))))
}

pub struct CronManager {
    pool: PgPool,
    entries: Vec<CronEntry>,
}

impl CronManager {
    pub fn new(pool: PgPool, entries: Vec<CronEntry>) -> Self {
        Self { pool, entries }
    }

    pub fn entries(&self) -> &[CronEntry] {
        &self.entries
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn run_graceful_catch_up(&self, period: chrono::Duration) -> Result<u32, QueueError> {
        let now = Utc::now();
        let mut total = 0;
        for entry in &self.entries {
            if is_disabled(&self.pool, entry).await? {
                continue;
            }
            total += catch_up(&self.pool, entry, now, period).await?;
        }
        Ok(total)
    }

    /// Fires one entry if `now >= cron_at` (tolerating clock drift in the
    /// caller's timer), returning the next scheduled deadline for re-arming.
    pub async fn fire_if_due(
        &self,
        entry: &CronEntry,
        cron_at: DateTime<Utc>,
    ) -> Result<bool, QueueError> {
        if Utc::now() < cron_at {
            return Ok(false);
        }
        if is_disabled(&self.pool, entry).await? {
            return Ok(false);
        }
        fire(&self.pool, entry, cron_at).await
    }
}

pub fn random_worker_id() -> Uuid {
    Uuid::now_v7()
}
