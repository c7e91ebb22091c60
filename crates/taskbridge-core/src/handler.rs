//! The contract engines use to run registered work.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::execution::EngineKind;
use crate::ids::ExecutionId;

/// Named message delivered to a running durable execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub name: String,
    pub payload: Value,
    pub received_at: DateTime<Utc>,
}

impl Signal {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
            received_at: Utc::now(),
        }
    }
}

/// Why a handler did not produce a value.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandlerError {
    /// Handler failed; the engine may retry.
    #[error("{0}")]
    Failed(String),

    /// Handler observed a cancellation request and stopped.
    #[error("cancelled")]
    Cancelled,
}

/// Everything a handler sees about the execution it serves.
pub struct TaskContext {
    pub execution_id: ExecutionId,
    pub engine: EngineKind,
    pub task_type: String,
    pub payload: Value,
    /// 1-indexed attempt number.
    pub attempt: u32,
    cancellation: CancellationToken,
    signals: Option<mpsc::UnboundedReceiver<Signal>>,
}

impl TaskContext {
    pub fn new(
        execution_id: ExecutionId,
        engine: EngineKind,
        task_type: impl Into<String>,
        payload: Value,
        attempt: u32,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            execution_id,
            engine,
            task_type: task_type.into(),
            payload,
            attempt,
            cancellation,
            signals: None,
        }
    }

    /// Attach the execution's signal channel (durable engine only).
    pub fn with_signals(mut self, signals: mpsc::UnboundedReceiver<Signal>) -> Self {
        self.signals = Some(signals);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Clone of the execution's cancellation token.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }

    /// Wait for the next signal. Returns `None` when no channel is attached
    /// or the engine dropped it.
    pub async fn next_signal(&mut self) -> Option<Signal> {
        match self.signals.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// Take a buffered signal without waiting.
    pub fn try_next_signal(&mut self) -> Option<Signal> {
        self.signals.as_mut().and_then(|rx| rx.try_recv().ok())
    }

    pub fn has_signals(&self) -> bool {
        self.signals.is_some()
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("execution_id", &self.execution_id)
            .field("engine", &self.engine)
            .field("task_type", &self.task_type)
            .field("attempt", &self.attempt)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Executable logic registered under a workflow type or job name.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, ctx: TaskContext) -> Result<Value, HandlerError>;
}

/// Adapter turning an async closure into a [`TaskHandler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send,
{
    async fn handle(&self, ctx: TaskContext) -> Result<Value, HandlerError> {
        (self.0)(ctx).await
    }
}

/// Wrap an async closure as a shareable handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn TaskHandler>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// A handler plus the name engines look it up by.
#[derive(Clone)]
pub struct WorkflowDefinition {
    /// Workflow type (durable) or job name (queue).
    pub name: String,
    pub description: String,
    handler: Arc<dyn TaskHandler>,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>, handler: Arc<dyn TaskHandler>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            handler,
        }
    }

    /// Builder method to set a description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn handler(&self) -> Arc<dyn TaskHandler> {
        Arc::clone(&self.handler)
    }
}

impl fmt::Debug for WorkflowDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowDefinition")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context(token: CancellationToken) -> TaskContext {
        TaskContext::new(
            ExecutionId::new("exec-1"),
            EngineKind::Durable,
            "analyze-project",
            json!({"n": 2}),
            1,
            token,
        )
    }

    #[tokio::test]
    async fn test_handler_fn() {
        let handler = handler_fn(|ctx: TaskContext| async move {
            let n = ctx.payload["n"].as_i64().unwrap_or(0);
            Ok(json!(n * 2))
        });
        let def = WorkflowDefinition::new("double", handler).with_description("doubles n");

        let value = def
            .handler()
            .handle(context(CancellationToken::new()))
            .await
            .unwrap();
        assert_eq!(value, json!(4));
        assert_eq!(def.name, "double");
    }

    #[tokio::test]
    async fn test_signals_and_cancellation() {
        let (tx, rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let mut ctx = context(token.clone()).with_signals(rx);

        tx.send(Signal::new("pause", json!({}))).unwrap();
        assert_eq!(ctx.next_signal().await.unwrap().name, "pause");
        assert!(ctx.try_next_signal().is_none());

        assert!(!ctx.is_cancelled());
        token.cancel();
        assert!(ctx.is_cancelled());
        ctx.cancelled().await;
    }

    #[tokio::test]
    async fn test_no_signal_channel() {
        let mut ctx = context(CancellationToken::new());
        assert!(!ctx.has_signals());
        assert!(ctx.next_signal().await.is_none());
    }
}
