use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use envconfig::Envconfig;
use eyre::Result;
use jobforge_core::cleanup;
use jobforge_worker::metrics_consts as m;
use jobforge_worker::{app_context::AppContext, config::Config, handlers, http};
use tracing::{error, info};

async fn cleanup_loop(context: Arc<AppContext>, liveness: health::HealthHandle) -> Result<()> {
    let mut interval = tokio::time::interval(StdDuration::from_secs(context.config.cleanup_interval_secs));

    loop {
        interval.tick().await;
        common_metrics::inc(m::CLEANUP_RUN_STARTS, &[], 1);
        let start = std::time::Instant::now();
        let horizon = Utc::now() - chrono::Duration::seconds(context.config.cleanup_horizon_seconds);

        match cleanup::run(
            &context.pool,
            horizon,
            context.config.cleanup_batch_size,
            context.config.cleanup_include_discarded,
        )
        .await
        {
            Ok(report) => {
                common_metrics::inc(m::CLEANUP_JOBS_DELETED, &[], report.jobs_deleted);
                common_metrics::inc(m::CLEANUP_EXECUTIONS_DELETED, &[], report.executions_deleted);
                common_metrics::inc(m::CLEANUP_BATCHES_DELETED, &[], report.batches_deleted);
                liveness.report_healthy().await;
                info!(?report, "cleanup round complete");
            }
            Err(e) => error!("cleanup round failed: {e}"),
        }
        common_metrics::inc(m::CLEANUP_RUN_ENDS, &[], 1);
        common_metrics::histogram(m::CLEANUP_RUN_MS, &[], start.elapsed().as_secs_f64() * 1000.0);
    }
}

/// One timer task per entry: sleep until the next deadline, fire if due,
/// re-arm. Separate per-entry tasks so a slow database round on one entry
/// can't delay another entry's deadline.
async fn cron_entry_loop(
    cron_manager: Arc<jobforge_core::cron::CronManager>,
    entry: jobforge_core::cron::CronEntry,
    liveness: health::HealthHandle,
) {
    loop {
        let Some((cron_at, sleep_for)) = jobforge_core::cron::manager::next_deadline(&entry, Utc::now()) else {
            // No further fire time (e.g. a malformed or exhausted schedule); stop this entry's loop.
            return;
        };

        tokio::time::sleep(sleep_for).await;

        match cron_manager.fire_if_due(&entry, cron_at).await {
            Ok(true) => common_metrics::inc(m::CRON_FIRED, &[("key".to_string(), entry.key.clone())], 1),
            Ok(false) => common_metrics::inc(m::CRON_DEDUPED, &[("key".to_string(), entry.key.clone())], 1),
            Err(e) => {
                common_metrics::inc(m::CRON_FAILED, &[("key".to_string(), entry.key.clone())], 1);
                error!(key = %entry.key, error = %e, "cron fire failed");
            }
        }
        liveness.report_healthy().await;
    }
}

#[tokio::main]
async fn main() {
    let config = Config::init_from_env().expect("failed to load configuration from env");
    tracing_subscriber::fmt::init();

    let registry = Arc::new(handlers::build_registry());
    let context = Arc::new(
        AppContext::new(config, registry)
            .await
            .expect("failed to build app context"),
    );

    context.run_migrations().await;

    let bind = format!("{}:{}", context.config.host, context.config.port);
    info!(worker_id = %context.worker_id, %bind, "starting jobforge worker");

    context
        .process_tracker
        .clone()
        .spawn_heartbeat(serde_json::json!({ "worker_id": context.worker_id }));

    let cleanup_liveness = context
        .liveness_handle(
            "cleanup",
            StdDuration::from_secs(context.config.cleanup_interval_secs * 4),
        )
        .register()
        .await;
    let cleanup_handle = tokio::spawn(cleanup_loop(context.clone(), cleanup_liveness));

    let scheduler_handles = context.spawn_schedulers().await;

    let mut cron_handles = Vec::new();
    if let Some(cron_manager) = context.cron_manager.clone() {
        match cron_manager
            .run_graceful_catch_up(chrono::Duration::seconds(
                context.config.cron_catch_up_period_seconds,
            ))
            .await
        {
            Ok(fired) => info!(fired, "cron graceful catch-up complete"),
            Err(e) => error!("cron catch-up failed: {e}"),
        }

        for entry in cron_manager.entries() {
            let liveness = context
                .liveness_handle(
                    &format!("cron:{}", entry.key),
                    StdDuration::from_secs(
                        (context.config.cron_catch_up_period_seconds.max(60) * 4) as u64,
                    ),
                )
                .register()
                .await;
            cron_handles.push(tokio::spawn(cron_entry_loop(
                cron_manager.clone(),
                entry.clone(),
                liveness,
            )));
        }
    }

    let app = http::app(context.clone());
    let http_handle = tokio::spawn(http::listen(app, bind));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
        res = cleanup_handle => {
            error!("cleanup loop exited unexpectedly");
            if let Err(e) = res {
                error!("cleanup loop panicked: {e}");
            }
        }
        res = http_handle => {
            error!("http server exited unexpectedly");
            if let Ok(Err(e)) = res {
                error!("http server failed: {e}");
            }
        }
    }

    for handle in scheduler_handles.iter().chain(cron_handles.iter()) {
        handle.abort();
    }
    context.shutdown_schedulers().await;
    if let Err(e) = context.process_tracker.deregister().await {
        error!("failed to deregister process row: {e}");
    }

    info!("exiting");
}
