//! Postgres advisory locks: a 64-bit-keyspace mutex that needs no row of its
//! own and cooperates naturally with ordinary SQL. Used as the single
//! authority preventing two workers from claiming the same job row, and to
//! serialize concurrency-key and process-liveness checks.

use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

/// Derives the bigint advisory lock key for an arbitrary text key, the same
/// way Postgres' own `hashtext()` would, but computed in SQL so both callers
/// of a given key always hash it identically regardless of where it came from.
pub fn lock_key_sql() -> &'static str {
    "hashtext($1)"
}

/// Derives a stable bigint lock key for a job id: `hashtext(job_id::text)`.
pub async fn job_lock_acquired(conn: &mut PgConnection, job_id: Uuid) -> bool {
    try_xact_lock(conn, &job_id.to_string()).await
}

/// Attempt `pg_try_advisory_xact_lock(hashtext(key))` on the connection
/// currently inside a transaction. Released automatically on commit/rollback.
/// Errors are logged and treated as lock failure: the caller just moves on to
/// the next candidate.
pub async fn try_xact_lock(conn: &mut PgConnection, key: &str) -> bool {
    match sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_xact_lock(hashtext($1))")
        .bind(key)
        .fetch_one(conn)
        .await
    {
        Ok(acquired) => {
            if acquired {
                tracing::debug!(key, "acquired transaction advisory lock");
            } else {
                tracing::debug!(key, "transaction advisory lock already held elsewhere");
            }
            acquired
        }
        Err(err) => {
            tracing::warn!(key, error = %err, "advisory lock attempt failed, treating as not acquired");
            false
        }
    }
}

/// Attempt `pg_try_advisory_lock(hashtext(key))` on a session connection
/// (not scoped to a transaction). Must be paired with `release_session_lock`
/// on the very same connection or the lock leaks until the connection closes.
pub async fn try_session_lock(conn: &mut PgConnection, key: &str) -> bool {
    match sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_lock(hashtext($1))")
        .bind(key)
        .fetch_one(conn)
        .await
    {
        Ok(acquired) => acquired,
        Err(err) => {
            tracing::warn!(key, error = %err, "session advisory lock attempt failed");
            false
        }
    }
}

pub async fn release_session_lock(conn: &mut PgConnection, key: &str) -> bool {
    match sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock(hashtext($1))")
        .bind(key)
        .fetch_one(conn)
        .await
    {
        Ok(released) => {
            if !released {
                tracing::warn!(key, "session advisory lock was not held on release");
            }
            released
        }
        Err(err) => {
            tracing::error!(key, error = %err, "failed to release session advisory lock");
            false
        }
    }
}

/// Whether some other session currently holds the advisory lock on `key`.
/// Probes by attempting (and, if successful, immediately releasing) the lock
/// on a fresh connection: if the attempt fails, somebody else holds it.
pub async fn is_advisory_locked(pool: &PgPool, key: &str) -> Result<bool, sqlx::Error> {
    let mut conn = pool.acquire().await?;
    let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock(hashtext($1))")
        .bind(key)
        .fetch_one(&mut *conn)
        .await?;
    if acquired {
        sqlx::query("SELECT pg_advisory_unlock(hashtext($1))")
            .bind(key)
            .execute(&mut *conn)
            .await?;
    }
    Ok(!acquired)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_key_sql_is_hashtext() {
        assert_eq!(lock_key_sql(), "hashtext($1)");
    }
}
