use chrono::{Duration, Utc};
use jobforge_core::cron::manager::{catch_up, fire, is_disabled};
use jobforge_core::cron::CronEntry;
use sqlx::PgPool;

fn entry(key: &str, schedule: &str) -> CronEntry {
    CronEntry {
        key: key.to_string(),
        schedule: schedule.parse().unwrap(),
        job_class: "SendDailyDigest".to_string(),
        arguments: Vec::new(),
        queue_name: "default".to_string(),
        priority: 0,
        enabled: true,
    }
}

#[sqlx::test(migrations = "./migrations")]
async fn firing_the_same_tick_twice_is_deduplicated(db: PgPool) {
    let e = entry("daily-digest", "0 0 * * *");
    let at = Utc::now();

    let first = fire(&db, &e, at).await.unwrap();
    assert!(first);

    let second = fire(&db, &e, at).await.unwrap();
    assert!(!second, "a second fire at the exact same cron_at must be deduplicated");

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobforge_jobs WHERE cron_key = $1")
        .bind("daily-digest")
        .fetch_one(&db)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[sqlx::test(migrations = "./migrations")]
async fn firing_a_different_tick_is_not_deduplicated(db: PgPool) {
    let e = entry("daily-digest", "0 0 * * *");
    let first_at = Utc::now();
    let second_at = first_at + Duration::days(1);

    assert!(fire(&db, &e, first_at).await.unwrap());
    assert!(fire(&db, &e, second_at).await.unwrap());

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobforge_jobs WHERE cron_key = $1")
        .bind("daily-digest")
        .fetch_one(&db)
        .await
        .unwrap();
    assert_eq!(count, 2);
}

#[sqlx::test(migrations = "./migrations")]
async fn disabled_entry_is_reported_disabled(db: PgPool) {
    let mut e = entry("daily-digest", "0 0 * * *");
    e.enabled = false;
    assert!(is_disabled(&db, &e).await.unwrap());

    let e = entry("daily-digest", "0 0 * * *");
    assert!(!is_disabled(&db, &e).await.unwrap());

    sqlx::query(
        "INSERT INTO jobforge_settings (key, value) VALUES ('cron_disabled_keys', $1)
         ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
    )
    .bind(serde_json::json!(["daily-digest"]))
    .execute(&db)
    .await
    .unwrap();

    assert!(is_disabled(&db, &e).await.unwrap());
}

#[sqlx::test(migrations = "./migrations")]
async fn catch_up_fires_every_missed_tick_in_window(db: PgPool) {
    let e = entry("hourly-sync", "0 * * * *");
    let now = Utc::now();

    let fired = catch_up(&db, &e, now, Duration::hours(3)).await.unwrap();
    assert!(fired >= 2, "at least two hourly ticks should fall in a 3-hour catch-up window");

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobforge_jobs WHERE cron_key = $1")
        .bind("hourly-sync")
        .fetch_one(&db)
        .await
        .unwrap();
    assert_eq!(count as u32, fired);
}

#[sqlx::test(migrations = "./migrations")]
async fn reboot_entries_never_fire_during_catch_up(db: PgPool) {
    let e = entry("on-boot", "@reboot");
    let fired = catch_up(&db, &e, Utc::now(), Duration::hours(3)).await.unwrap();
    assert_eq!(fired, 0);
}
