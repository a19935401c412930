use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::advisory_lock::try_xact_lock;
use crate::error::QueueError;
use crate::queue_expr::QueueExpr;
use crate::types::Job;

/// Reclaims stale claims (`locked_at` older than `stale_claim_seconds`) by
/// clearing `locked_by_id`, `locked_at`, and `performed_at`. Run inside the
/// same transaction as the selection query that follows it, so a reclaimed
/// row is immediately visible as a dequeue candidate again.
async fn reclaim_stale_claims(
    tx: &mut sqlx::PgConnection,
    stale_claim_seconds: i64,
) -> Result<u64, QueueError> {
    let result = sqlx::query(
        r#"
WITH stale AS (
    SELECT id FROM jobforge_jobs
    WHERE finished_at IS NULL
      AND locked_at IS NOT NULL
      AND locked_at < NOW() - make_interval(secs => $1)
    FOR UPDATE SKIP LOCKED
)
UPDATE jobforge_jobs
SET locked_by_id = NULL, locked_at = NULL, performed_at = NULL
FROM stale
WHERE jobforge_jobs.id = stale.id
"#,
    )
    .bind(stale_claim_seconds as f64)
    .execute(tx)
    .await?;

    Ok(result.rows_affected())
}

/// Fetches dequeue candidates in candidate-lookup + `scheduled_at NULLS
/// FIRST` order, bounded by `limit`. Queue filtering by the scheduler's
/// queue expression happens in Rust rather than SQL, since `QueueExpr` is
/// richer than a simple `IN (...)` list (ordered drains, exclude lists).
///
/// Pause exclusion, by contrast, is done in SQL via `NOT EXISTS` against
/// `jobforge_settings` rather than in Rust: a paused queue/class must not
/// count against `limit`, so it has to be filtered before the `LIMIT`
/// clause applies, not after. `enable_pauses` gates the whole check behind
/// one bound parameter rather than building two separate query strings.
async fn fetch_candidates(
    tx: &mut sqlx::PgConnection,
    limit: i64,
    enable_pauses: bool,
) -> Result<Vec<Job>, QueueError> {
    let rows = sqlx::query_as::<_, Job>(
        r#"
SELECT j.* FROM jobforge_jobs j
WHERE j.finished_at IS NULL
  AND j.locked_by_id IS NULL
  AND (j.scheduled_at IS NULL OR j.scheduled_at <= NOW())
  AND (
    NOT $2
    OR NOT EXISTS (
        SELECT 1 FROM jobforge_settings s
        WHERE (s.key = 'queue_paused:' || j.queue_name OR s.key = 'class_paused:' || j.job_class)
          AND (s.value->>'paused')::boolean IS TRUE
    )
  )
ORDER BY j.priority ASC NULLS LAST, j.created_at ASC, j.scheduled_at ASC NULLS FIRST
LIMIT $1
"#,
    )
    .bind(limit)
    .bind(enable_pauses)
    .fetch_all(tx)
    .await?;

    Ok(rows)
}

/// Claims a job row: bumps `executions_count`, stamps `performed_at`,
/// `locked_by_id`, `locked_at`. Must be called only once the caller already
/// holds `pg_try_advisory_xact_lock(hash(job.id))` on the same connection.
async fn claim(
    tx: &mut sqlx::PgConnection,
    job_id: Uuid,
    worker_id: Uuid,
) -> Result<u64, QueueError> {
    let result = sqlx::query(
        r#"
UPDATE jobforge_jobs
SET performed_at = NOW(),
    locked_by_id = $2,
    locked_at = NOW(),
    executions_count = executions_count + 1
WHERE id = $1 AND finished_at IS NULL
"#,
    )
    .bind(job_id)
    .bind(worker_id)
    .execute(tx)
    .await?;

    Ok(result.rows_affected())
}

/// Runs one selection round for a scheduler pool: reclaims stale claims,
/// fetches candidates honoring the pool's queue expression, then attempts
/// the transactional advisory lock on each in order until one succeeds.
/// Commits (which releases the xact lock, leaving the claim markers as the
/// durable ownership signal) and returns the claimed job, or `None` if no
/// candidate in this round could be locked.
pub async fn select_and_claim(
    pool: &PgPool,
    queue_expr: &QueueExpr,
    worker_id: Uuid,
    limit: i64,
    stale_claim_seconds: i64,
    enable_pauses: bool,
) -> Result<Option<Job>, QueueError> {
    let mut tx = pool.begin().await?;

    reclaim_stale_claims(&mut tx, stale_claim_seconds).await?;

    let mut candidates = fetch_candidates(&mut tx, limit, enable_pauses).await?;
    candidates.retain(|job| queue_expr.matches(&job.queue_name));

    if let QueueExpr::Include { ordered: true, .. } = queue_expr {
        candidates.sort_by_key(|job| {
            (
                queue_expr.order_rank(&job.queue_name).unwrap_or(usize::MAX),
                job.priority,
                job.created_at,
            )
        });
    }

    for candidate in candidates {
        if !try_xact_lock(&mut tx, &candidate.id.to_string()).await {
            continue;
        }

        let affected = claim(&mut tx, candidate.id, worker_id).await?;
        if affected == 0 {
            // Someone else finished or reclaimed it between our SELECT and
            // the advisory lock attempt; move on to the next candidate.
            continue;
        }

        tx.commit().await?;
        tracing::debug!(job_id = %candidate.id, queue = %candidate.queue_name, "claimed job");
        return Ok(Some(candidate));
    }

    tx.commit().await?;
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue_expr::QueueExpr;

    #[test]
    fn ordered_queue_expr_ranks_by_position() {
        let expr: QueueExpr = "+emails,default".parse().unwrap();
        assert_eq!(expr.order_rank("emails"), Some(0));
        assert_eq!(expr.order_rank("default"), Some(1));
        assert_eq!(expr.order_rank("other"), None);
    }
}
