//! The serialized job payload: the on-disk/over-the-wire contract that makes
//! cross-runtime enqueue/dequeue possible. Whatever ecosystem enqueued a job,
//! any worker that agrees on this shape can execute it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A job class name in its cross-runtime canonical form (`::`-separated).
/// Preserved verbatim: no case folding, no separator translation, so it round
/// trips across runtimes unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobClass(pub String);

impl JobClass {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobClass {
    fn from(s: String) -> Self {
        JobClass(s)
    }
}

impl From<&str> for JobClass {
    fn from(s: &str) -> Self {
        JobClass(s.to_string())
    }
}

/// The wire shape of a serialized job, per the external-interfaces contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WirePayload {
    pub job_class: JobClass,
    pub job_id: Uuid,
    pub queue_name: String,
    pub priority: i32,
    pub arguments: Vec<Value>,
    pub executions: i32,
    #[serde(default)]
    pub exception_executions: HashMap<String, i32>,
    pub enqueued_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency_key: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// The notification payload sent over `pg_notify` / received over `LISTEN`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub queue_name: String,
}

/// The tagged union a handler returns, normalized by the executor into a job
/// transition. Any value a handler returns that doesn't match one of these
/// shapes is treated as `Success`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum HandlerOutcome {
    Success,
    SuccessValue(Value),
    /// `class` is the exception's class name, matched against `discard_on`
    /// and `classify::DISCARD_BY_DEFAULT` to decide retry vs. discard.
    Error {
        class: String,
        message: String,
        #[serde(default)]
        backtrace: Vec<String>,
    },
    Cancel(String),
    Discard,
    DiscardReason(String),
    Snooze(i64),
}

impl HandlerOutcome {
    /// Convenience constructor for handlers that don't distinguish exception
    /// classes and just want to report a message with no backtrace.
    pub fn error(message: impl Into<String>) -> Self {
        HandlerOutcome::Error {
            class: "Error".to_string(),
            message: message.into(),
            backtrace: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_class_round_trips_verbatim() {
        let class = JobClass::from("Billing::InvoiceJob");
        let json = serde_json::to_string(&class).unwrap();
        let back: JobClass = serde_json::from_str(&json).unwrap();
        assert_eq!(class, back);
        assert_eq!(back.as_str(), "Billing::InvoiceJob");
    }

    #[test]
    fn wire_payload_round_trips() {
        let payload = WirePayload {
            job_class: JobClass::from("Jobs::Send"),
            job_id: Uuid::now_v7(),
            queue_name: "default".to_string(),
            priority: 0,
            arguments: vec![Value::from(1)],
            executions: 0,
            exception_executions: HashMap::new(),
            enqueued_at: Utc::now(),
            scheduled_at: None,
            locale: None,
            timezone: None,
            concurrency_key: Some("user:42".to_string()),
            labels: vec!["urgent".to_string()],
        };

        let json = serde_json::to_string(&payload).unwrap();
        let back: WirePayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back.job_class, payload.job_class);
        assert_eq!(back.job_id, payload.job_id);
        assert_eq!(back.concurrency_key, payload.concurrency_key);
        assert_eq!(back.labels, payload.labels);
    }
}
