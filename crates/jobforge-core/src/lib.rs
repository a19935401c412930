pub mod advisory_lock;
pub mod backoff;
pub mod batch;
pub mod classify;
pub mod cleanup;
pub mod concurrency;
pub mod config;
pub mod cron;
pub mod error;
pub mod executor;
pub mod job_store;
pub mod migrations;
pub mod notifier;
pub mod poller;
pub mod process_tracker;
pub mod queue_expr;
pub mod scheduler;
pub mod types;
pub mod wire;

pub use error::{JobError, JobResult, QueueError, QueueResult};
pub use executor::{Executor, Handler, HandlerRegistry};
pub use job_store::JobStore;
pub use migrations::run_migrations;
pub use notifier::Notifier;
pub use poller::Poller;
pub use queue_expr::QueueExpr;
pub use scheduler::{Scheduler, ShutdownOutcome};
pub use types::{Batch, Execution, Job, JobInit, JobStatus, LockType, ProcessRecord, Setting};
