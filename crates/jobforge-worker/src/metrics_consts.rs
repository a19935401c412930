pub const JOB_CLAIMED: &str = "jobforge_job_claimed";
pub const JOB_SUCCEEDED: &str = "jobforge_job_succeeded";
pub const JOB_CANCELLED: &str = "jobforge_job_cancelled";
pub const JOB_DISCARDED: &str = "jobforge_job_discarded";
pub const JOB_RETRIED: &str = "jobforge_job_retried";
pub const JOB_DURATION_MS: &str = "jobforge_job_duration_ms";

pub const CLEANUP_RUN_STARTS: &str = "jobforge_cleanup_run_starts";
pub const CLEANUP_RUN_ENDS: &str = "jobforge_cleanup_run_ends";
pub const CLEANUP_RUN_MS: &str = "jobforge_cleanup_run_ms";
pub const CLEANUP_JOBS_DELETED: &str = "jobforge_cleanup_jobs_deleted";
pub const CLEANUP_EXECUTIONS_DELETED: &str = "jobforge_cleanup_executions_deleted";
pub const CLEANUP_BATCHES_DELETED: &str = "jobforge_cleanup_batches_deleted";

pub const CRON_FIRED: &str = "jobforge_cron_fired";
pub const CRON_DEDUPED: &str = "jobforge_cron_deduped";
pub const CRON_FAILED: &str = "jobforge_cron_failed";
