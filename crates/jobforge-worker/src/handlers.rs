//! Reference handlers bundled with the binary. A real deployment registers
//! its own job classes against the `HandlerRegistry` built here; these exist
//! so the process is runnable (and its cron demo entry has somewhere to
//! land) without an embedding application.

use async_trait::async_trait;
use jobforge_core::executor::{Handler, HandlerRegistry};
use jobforge_core::wire::HandlerOutcome;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// Logs its arguments and succeeds. Useful for smoke-testing a deployment
/// and as the target of the default heartbeat cron entry.
pub struct LogHandler;

#[async_trait]
impl Handler for LogHandler {
    async fn perform(&self, arguments: &[Value]) -> HandlerOutcome {
        info!(?arguments, "LogHandler performed");
        HandlerOutcome::Success
    }
}

pub fn build_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register("LogHandler".to_string(), Arc::new(LogHandler));
    registry
}
