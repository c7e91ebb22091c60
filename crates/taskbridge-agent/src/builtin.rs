//! Agents shipped with the runtime.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use crate::agent::{Agent, AgentContext, AgentError};
use crate::registry::AgentKind;

/// Echoes its payload back.
///
/// Payload knobs:
/// - `delay_ms`: wait before answering, aborting on cancellation
/// - `fail_attempts`: fail the first N attempts of a run
#[derive(Debug, Default)]
pub struct DiagnosticAgent;

impl DiagnosticAgent {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Agent for DiagnosticAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Diagnostic
    }

    async fn execute(&self, ctx: &AgentContext) -> Result<Value, AgentError> {
        if !(ctx.payload.is_object() || ctx.payload.is_null()) {
            return Err(AgentError::InvalidInput(
                "diagnostic payload must be an object".to_string(),
            ));
        }

        let fail_attempts = ctx.payload["fail_attempts"].as_u64().unwrap_or(0);
        if u64::from(ctx.attempt) <= fail_attempts {
            ctx.log("warn", "injected failure");
            return Err(AgentError::Failed(format!(
                "diagnostic failure on attempt {}",
                ctx.attempt
            )));
        }

        if let Some(delay_ms) = ctx.payload["delay_ms"].as_u64() {
            ctx.report_progress(0, Some(format!("waiting {}ms", delay_ms)));
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
                _ = ctx.cancelled() => return Err(AgentError::Cancelled),
            }
        }
        ctx.report_progress(100, None);

        Ok(json!({
            "echo": ctx.payload,
            "attempt": ctx.attempt,
        }))
    }
}
