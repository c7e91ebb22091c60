//! The agent contract and the context handed to each attempt.

use async_trait::async_trait;
use serde_json::Value;
use taskbridge_core::{AgentEvent, EventEmitter};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::registry::AgentKind;

/// Errors an agent attempt can end with.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AgentError {
    #[error("{0}")]
    Failed(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Attempt timed out after {0}ms")]
    Timeout(u64),

    #[error("Cancelled")]
    Cancelled,
}

/// A unit of executable logic run by an [`AgentRuntime`](crate::AgentRuntime).
#[async_trait]
pub trait Agent: Send + Sync {
    /// Registry kind this implementation serves.
    fn kind(&self) -> AgentKind;

    /// Run one attempt. Long-running agents should poll
    /// [`AgentContext::is_cancelled`] and return [`AgentError::Cancelled`].
    async fn execute(&self, ctx: &AgentContext) -> Result<Value, AgentError>;
}

/// Input and side channels for one agent run.
#[derive(Debug, Clone)]
pub struct AgentContext {
    /// Job (execution) the agent is working for.
    pub job_id: String,
    pub payload: Value,
    /// 1-indexed attempt, set by the runtime.
    pub attempt: u32,
    cancellation: CancellationToken,
    events: Option<EventEmitter<AgentEvent>>,
    agent_id: String,
}

impl AgentContext {
    pub fn new(job_id: impl Into<String>, payload: Value) -> Self {
        Self {
            job_id: job_id.into(),
            payload,
            attempt: 1,
            cancellation: CancellationToken::new(),
            events: None,
            agent_id: String::new(),
        }
    }

    /// Builder method to link an outer cancellation token (e.g. the engine's).
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }

    /// Emit a PROGRESS event on the runtime's emitter.
    pub fn report_progress(&self, percent: u8, message: Option<String>) {
        if let Some(events) = &self.events {
            events.emit(AgentEvent::progress(
                &self.job_id,
                &self.agent_id,
                percent,
                message,
            ));
        }
    }

    /// Emit a LOG event on the runtime's emitter.
    pub fn log(&self, level: &str, message: &str) {
        if let Some(events) = &self.events {
            events.emit(AgentEvent::log(&self.job_id, &self.agent_id, level, message));
        }
    }

    /// Context for one attempt, wired to the runtime's token and emitter.
    pub(crate) fn for_attempt(
        &self,
        attempt: u32,
        cancellation: CancellationToken,
        events: EventEmitter<AgentEvent>,
        agent_id: &str,
    ) -> Self {
        Self {
            job_id: self.job_id.clone(),
            payload: self.payload.clone(),
            attempt,
            cancellation,
            events: Some(events),
            agent_id: agent_id.to_string(),
        }
    }
}
