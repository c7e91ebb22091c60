//! Bridges engine workers to agent runtimes.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use taskbridge_core::{
    AgentEvent, EventEmitter, HandlerError, RuntimeConfig, TaskContext, TaskHandler,
    WorkflowDefinition,
};
use tracing::debug;

use crate::agent::{Agent, AgentContext};
use crate::runtime::AgentRuntime;

/// Runs an agent inside a fresh [`AgentRuntime`] per engine invocation.
#[derive(Clone)]
pub struct AgentTaskHandler {
    agent: Arc<dyn Agent>,
    config: RuntimeConfig,
    events: Option<EventEmitter<AgentEvent>>,
}

impl AgentTaskHandler {
    pub fn new(agent: Arc<dyn Agent>, config: RuntimeConfig) -> Self {
        Self {
            agent,
            config,
            events: None,
        }
    }

    /// Builder method to publish every runtime's events to one emitter.
    pub fn with_events(mut self, events: EventEmitter<AgentEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Definition named after the agent kind id.
    pub fn workflow_definition(self) -> WorkflowDefinition {
        let kind = self.agent.kind();
        WorkflowDefinition::new(kind.id(), Arc::new(self))
            .with_description(format!("Runs the '{}' agent", kind))
    }

    fn runtime(&self) -> AgentRuntime {
        match &self.events {
            Some(events) => {
                AgentRuntime::with_events(Arc::clone(&self.agent), self.config.clone(), events.clone())
            }
            None => AgentRuntime::new(Arc::clone(&self.agent), self.config.clone()),
        }
    }
}

#[async_trait]
impl TaskHandler for AgentTaskHandler {
    async fn handle(&self, ctx: TaskContext) -> Result<Value, HandlerError> {
        debug!(
            execution_id = %ctx.execution_id,
            engine = %ctx.engine,
            agent = self.agent.kind().id(),
            attempt = ctx.attempt,
            "Dispatching to agent runtime"
        );

        let agent_ctx = AgentContext::new(ctx.execution_id.as_str(), ctx.payload.clone())
            .with_cancellation(ctx.cancellation_token());
        let result = self.runtime().run(agent_ctx).await;

        if result.is_cancelled() {
            return Err(HandlerError::Cancelled);
        }
        match result.into_result() {
            Ok(value) => Ok(value.unwrap_or(Value::Null)),
            Err(error) => Err(HandlerError::Failed(error.message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::DiagnosticAgent;
    use serde_json::json;
    use taskbridge_core::{EngineKind, ExecutionId};
    use tokio_util::sync::CancellationToken;

    fn task_context(payload: Value, token: CancellationToken) -> TaskContext {
        TaskContext::new(
            ExecutionId::new("queue-1"),
            EngineKind::Queue,
            "diagnostic",
            payload,
            1,
            token,
        )
    }

    #[tokio::test]
    async fn test_success_maps_to_value() {
        let handler = AgentTaskHandler::new(Arc::new(DiagnosticAgent::new()), RuntimeConfig::default());
        let value = handler
            .handle(task_context(json!({"echo": "hi"}), CancellationToken::new()))
            .await
            .unwrap();
        assert_eq!(value["echo"], json!({"echo": "hi"}));
    }

    #[tokio::test]
    async fn test_failure_maps_to_failed() {
        let handler = AgentTaskHandler::new(Arc::new(DiagnosticAgent::new()), RuntimeConfig::default());
        let err = handler
            .handle(task_context(json!({"fail_attempts": 1}), CancellationToken::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Failed(_)));
    }

    #[tokio::test]
    async fn test_retries_inside_runtime() {
        let config = RuntimeConfig::default()
            .with_max_retries(2)
            .with_retry_delays(1, 5);
        let handler = AgentTaskHandler::new(Arc::new(DiagnosticAgent::new()), config);
        let value = handler
            .handle(task_context(json!({"fail_attempts": 2}), CancellationToken::new()))
            .await
            .unwrap();
        assert_eq!(value["attempt"], json!(3));
    }

    #[tokio::test]
    async fn test_engine_cancellation_maps_to_cancelled() {
        let handler = AgentTaskHandler::new(Arc::new(DiagnosticAgent::new()), RuntimeConfig::default());
        let token = CancellationToken::new();
        token.cancel();
        let err = handler
            .handle(task_context(json!({"delay_ms": 5_000}), token))
            .await
            .unwrap_err();
        assert_eq!(err, HandlerError::Cancelled);
    }

    #[tokio::test]
    async fn test_shared_events() {
        let events = EventEmitter::new(16);
        let mut rx = events.subscribe();
        let def = AgentTaskHandler::new(Arc::new(DiagnosticAgent::new()), RuntimeConfig::default())
            .with_events(events)
            .workflow_definition();
        assert_eq!(def.name, "diagnostic");

        def.handler()
            .handle(task_context(json!({}), CancellationToken::new()))
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().job_id, "queue-1");
    }
}
