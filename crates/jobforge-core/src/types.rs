use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Discriminates *why* a job finished with an error, independent of the retry machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum ErrorEvent {
    Handled,
    Unhandled,
    Cancelled,
    Discarded,
    Snoozed,
}

impl std::fmt::Display for ErrorEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorEvent::Handled => "handled",
            ErrorEvent::Unhandled => "unhandled",
            ErrorEvent::Cancelled => "cancelled",
            ErrorEvent::Discarded => "discarded",
            ErrorEvent::Snoozed => "snoozed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ErrorEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "handled" => Ok(ErrorEvent::Handled),
            "unhandled" => Ok(ErrorEvent::Unhandled),
            "cancelled" => Ok(ErrorEvent::Cancelled),
            "discarded" => Ok(ErrorEvent::Discarded),
            "snoozed" => Ok(ErrorEvent::Snoozed),
            other => Err(format!("unknown error_event: {other}")),
        }
    }
}

/// The derived status of a job row, computed from its timestamps rather than stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Scheduled,
    Queued,
    Running,
    Succeeded,
    Discarded,
    Retryable,
    Cancelled,
}

impl Job {
    pub fn status(&self, now: DateTime<Utc>) -> JobStatus {
        if self.finished_at.is_none() {
            if self.performed_at.is_some() {
                return JobStatus::Running;
            }
            return match self.scheduled_at {
                Some(at) if at > now => JobStatus::Scheduled,
                _ => JobStatus::Queued,
            };
        }

        match (&self.error, self.error_event) {
            (None, _) => JobStatus::Succeeded,
            (Some(_), Some(ErrorEvent::Discarded)) => JobStatus::Discarded,
            (Some(_), Some(ErrorEvent::Cancelled)) => JobStatus::Cancelled,
            (Some(_), _) => JobStatus::Retryable,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

/// A unit of scheduled work.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub active_job_id: Uuid,
    pub job_class: String,
    pub queue_name: String,
    pub priority: i32,
    pub serialized_params: Value,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub performed_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub error_event: Option<ErrorEvent>,
    pub executions_count: i32,
    pub concurrency_key: Option<String>,
    pub cron_key: Option<String>,
    pub cron_at: Option<DateTime<Utc>>,
    pub batch_id: Option<Uuid>,
    pub batch_callback_id: Option<Uuid>,
    pub labels: Vec<String>,
    pub locked_by_id: Option<Uuid>,
    pub locked_at: Option<DateTime<Utc>>,
    pub retried_good_job_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// The fields a caller supplies to enqueue a new job. Everything else is
/// derived (id, created_at) or starts out null (locked_*, finished_*, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInit {
    pub active_job_id: Option<Uuid>,
    pub job_class: String,
    pub queue_name: String,
    pub priority: i32,
    pub serialized_params: Value,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub concurrency_key: Option<String>,
    pub cron_key: Option<String>,
    pub cron_at: Option<DateTime<Utc>>,
    pub batch_id: Option<Uuid>,
    pub batch_callback_id: Option<Uuid>,
    pub labels: Vec<String>,
}

impl JobInit {
    pub fn new(job_class: impl Into<String>, queue_name: impl Into<String>, params: Value) -> Self {
        Self {
            active_job_id: None,
            job_class: job_class.into(),
            queue_name: queue_name.into(),
            priority: 0,
            serialized_params: params,
            scheduled_at: None,
            concurrency_key: None,
            cron_key: None,
            cron_at: None,
            batch_id: None,
            batch_callback_id: None,
            labels: Vec::new(),
        }
    }

    pub fn with_scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_concurrency_key(mut self, key: impl Into<String>) -> Self {
        self.concurrency_key = Some(key.into());
        self
    }
}

/// Immutable audit row for one execution attempt of a job.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub active_job_id: Uuid,
    pub job_class: String,
    pub queue_name: String,
    pub serialized_params: Value,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub error_event: Option<ErrorEvent>,
    pub error_backtrace: Vec<String>,
    pub process_id: Option<Uuid>,
    pub duration_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Grouping row used to fire aggregate callbacks once every member job is terminal.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Batch {
    pub id: Uuid,
    pub description: Option<String>,
    pub on_finish: Option<String>,
    pub on_success: Option<String>,
    pub on_discard: Option<String>,
    pub callback_queue_name: String,
    pub callback_priority: i32,
    pub enqueued_at: DateTime<Utc>,
    pub discarded_at: Option<DateTime<Utc>>,
    pub jobs_finished_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "int4")]
#[repr(i32)]
pub enum LockType {
    Heartbeat = 0,
    AdvisoryLock = 1,
}

impl From<i32> for LockType {
    fn from(value: i32) -> Self {
        match value {
            1 => LockType::AdvisoryLock,
            _ => LockType::Heartbeat,
        }
    }
}

/// One row per running worker process, used for liveness introspection.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub id: Uuid,
    pub state: Value,
    pub lock_type: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Key/value row used for pause flags and disabled cron-key lists.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: Value,
}
