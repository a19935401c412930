use std::sync::Arc;
use std::time::Duration as StdDuration;

use health::{HealthHandle, HealthRegistry};
use jobforge_core::concurrency::ConcurrencyConfig;
use jobforge_core::cron::CronManager;
use jobforge_core::process_tracker::ProcessTracker;
use jobforge_core::types::LockType;
use jobforge_core::{HandlerRegistry, Notifier, Poller, QueueExpr, Scheduler};
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::Config;

pub struct AppContext {
    pub pool: PgPool,
    pub health: HealthRegistry,
    pub worker_id: Uuid,
    pub config: Arc<Config>,
    pub process_tracker: Arc<ProcessTracker>,
    pub notifier: Option<Notifier>,
    pub poller: Poller,
    pub schedulers: Vec<Arc<Scheduler>>,
    pub cron_manager: Option<Arc<CronManager>>,
}

impl AppContext {
    pub async fn new(config: Config, registry: Arc<HandlerRegistry>) -> eyre::Result<Self> {
        let config = Arc::new(config);
        let pool = config.pool_config().connect().await?;
        let health = HealthRegistry::new("liveness");

        let worker_id = config
            .worker_id
            .as_ref()
            .and_then(|s| Uuid::parse_str(s).ok())
            .unwrap_or_else(Uuid::now_v7);

        let process_tracker = Arc::new(ProcessTracker::new(pool.clone(), LockType::Heartbeat));

        let notifier = if config.enable_listen_notify {
            Some(Notifier::spawn(
                config.database_url.clone(),
                config.notifier_channel.clone(),
            ))
        } else {
            None
        };

        let poller = Poller::spawn(config.poll_interval_seconds, notifier.clone());

        let pool_specs = config.scheduler_pools()?;
        let concurrency = ConcurrencyConfig::default();

        let mut schedulers = Vec::with_capacity(pool_specs.len());
        for spec in &pool_specs {
            let queue_expr: QueueExpr = spec.queues.parse()?;
            let scheduler = Arc::new(Scheduler::new(
                pool.clone(),
                queue_expr,
                spec.max_processes,
                registry.clone(),
                config.queue_select_limit,
                config.stale_claim_seconds,
                config.enable_pauses,
                concurrency.clone(),
            ));
            schedulers.push(scheduler);
        }

        let cron_manager = if config.cron_enabled {
            let specs = config.cron_entry_specs()?;
            let entries = specs
                .into_iter()
                .map(|s| {
                    Ok(jobforge_core::cron::CronEntry {
                        key: s.key,
                        schedule: s.schedule.parse()?,
                        job_class: s.job_class,
                        arguments: s.arguments,
                        queue_name: s.queue_name,
                        priority: s.priority,
                        enabled: s.enabled,
                    })
                })
                .collect::<eyre::Result<Vec<_>>>()?;
            Some(Arc::new(CronManager::new(pool.clone(), entries)))
        } else {
            None
        };

        Ok(Self {
            pool,
            health,
            worker_id,
            config,
            process_tracker,
            notifier,
            poller,
            schedulers,
            cron_manager,
        })
    }

    pub async fn run_migrations(&self) {
        jobforge_core::run_migrations(&self.pool).await;
    }

    /// Spawns a scheduler-pool's run loop plus its poller registration.
    pub async fn spawn_schedulers(&self) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.schedulers.len());
        for scheduler in &self.schedulers {
            let queue_expr = scheduler_queue_expr(scheduler);
            let poll_rx = self.poller.register(queue_expr).await;
            let scheduler = scheduler.clone();
            handles.push(tokio::spawn(async move {
                scheduler.run(poll_rx).await;
            }));
        }
        handles
    }

    pub async fn shutdown_schedulers(&self) {
        let timeout = self
            .config
            .engine_config()
            .shutdown_timeout_seconds
            .map(|s| StdDuration::from_secs(s.max(0) as u64));

        for scheduler in &self.schedulers {
            let outcome = scheduler.shutdown(timeout).await;
            tracing::info!(worker_id = %scheduler.worker_id(), ?outcome, "scheduler shut down");
        }
    }

    pub fn liveness_handle(&self, component: &str, deadline: StdDuration) -> HealthHandleFuture {
        HealthHandleFuture {
            registry: self.health.clone(),
            component: component.to_string(),
            deadline,
        }
    }
}

pub struct HealthHandleFuture {
    registry: HealthRegistry,
    component: String,
    deadline: StdDuration,
}

impl HealthHandleFuture {
    pub async fn register(self) -> HealthHandle {
        self.registry.register(self.component, self.deadline).await
    }
}

fn scheduler_queue_expr(scheduler: &Arc<Scheduler>) -> QueueExpr {
    // Scheduler keeps its queue_expr private; worker-level callers only need
    // to register a poller subscription, so Scheduler exposes a copy here.
    scheduler.queue_expr()
}
