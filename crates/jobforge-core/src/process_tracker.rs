//! Registers this worker process as a row in `jobforge_processes` and keeps
//! it touched so other processes can infer liveness. The row is created
//! lazily, the first time a lock id is actually requested, not at construction.

use std::time::Duration;

use serde_json::Value;
use sqlx::PgPool;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::advisory_lock::try_session_lock;
use crate::error::QueueError;
use crate::types::LockType;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

pub struct ProcessTracker {
    pool: PgPool,
    process_id: Uuid,
    lock_type: LockType,
    registered: OnceCell<()>,
}

impl ProcessTracker {
    pub fn new(pool: PgPool, lock_type: LockType) -> Self {
        Self {
            pool,
            process_id: Uuid::now_v7(),
            lock_type,
            registered: OnceCell::new(),
        }
    }

    pub fn process_id(&self) -> Uuid {
        self.process_id
    }

    /// Lazily inserts the process row the first time it's needed. Idempotent.
    pub async fn ensure_registered(&self, state: &Value) -> Result<(), QueueError> {
        self.registered
            .get_or_try_init(|| async {
                sqlx::query(
                    "INSERT INTO jobforge_processes (id, state, lock_type, created_at, updated_at)
                     VALUES ($1, $2, $3, NOW(), NOW())
                     ON CONFLICT (id) DO NOTHING",
                )
                .bind(self.process_id)
                .bind(state)
                .bind(self.lock_type as i32)
                .execute(&self.pool)
                .await?;
                Ok::<_, QueueError>(())
            })
            .await?;
        Ok(())
    }

    async fn touch(&self, state: &Value) -> Result<(), QueueError> {
        sqlx::query("UPDATE jobforge_processes SET state = $2, updated_at = NOW() WHERE id = $1")
            .bind(self.process_id)
            .bind(state)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Spawns the 30s heartbeat task. In `AdvisoryLock` mode it also opens a
    /// dedicated connection and holds a session advisory lock on
    /// `hash(process_id)` for the task's lifetime, so liveness can be read
    /// straight off `pg_locks` by anyone, not just by `updated_at` staleness.
    /// Database errors during either path are logged and swallowed: a failed
    /// heartbeat never kills the worker.
    pub fn spawn_heartbeat(self: std::sync::Arc<Self>, state: Value) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(err) = self.ensure_registered(&state).await {
                tracing::warn!(process_id = %self.process_id, error = %err, "failed to register process row");
            }

            let mut lock_conn = if self.lock_type == LockType::AdvisoryLock {
                match self.pool.acquire().await {
                    Ok(conn) => Some(conn),
                    Err(err) => {
                        tracing::warn!(error = %err, "could not acquire dedicated connection for process advisory lock");
                        None
                    }
                }
            } else {
                None
            };

            if let Some(conn) = lock_conn.as_deref_mut() {
                let key = self.process_id.to_string();
                if !try_session_lock(conn, &key).await {
                    tracing::warn!(process_id = %self.process_id, "could not acquire session advisory lock for process liveness");
                }
            }

            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(err) = self.touch(&state).await {
                    tracing::warn!(process_id = %self.process_id, error = %err, "process heartbeat failed");
                }
            }
        })
    }

    pub async fn deregister(&self) -> Result<(), QueueError> {
        sqlx::query("DELETE FROM jobforge_processes WHERE id = $1")
            .bind(self.process_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Whether the process is alive: holds its advisory lock (`AdvisoryLock`
/// mode) or was touched within the last five minutes (`Heartbeat` mode).
pub async fn is_process_active(
    pool: &PgPool,
    process_id: Uuid,
    lock_type: LockType,
) -> Result<bool, QueueError> {
    if lock_type == LockType::AdvisoryLock {
        let key = process_id.to_string();
        return Ok(crate::advisory_lock::is_advisory_locked(pool, &key).await?);
    }

    let active: Option<bool> = sqlx::query_scalar(
        "SELECT updated_at >= NOW() - INTERVAL '5 minutes' FROM jobforge_processes WHERE id = $1",
    )
    .bind(process_id)
    .fetch_optional(pool)
    .await?;

    Ok(active.unwrap_or(false))
}
