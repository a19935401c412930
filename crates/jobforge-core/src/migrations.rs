use sqlx::PgPool;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Runs the embedded schema migrations. Panics on failure: a worker that
/// can't migrate its own schema has no useful degraded mode to fall back to.
pub async fn run_migrations(pool: &PgPool) {
    MIGRATOR
        .run(pool)
        .await
        .expect("failed to run jobforge-core migrations");
}
