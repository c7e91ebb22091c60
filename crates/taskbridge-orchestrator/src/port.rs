//! The contract every engine adapter implements.

use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use taskbridge_core::{
    EngineKind, ExecutionHandle, ExecutionId, ExecutionStatus, OrchestrationError,
    OrchestrationResult, TaskDescriptor, WorkflowDefinition,
};
use tracing::{info, warn};

use crate::engine::EngineError;

/// Engine-neutral orchestration operations.
///
/// Adapters translate native engine errors into
/// [`OrchestrationError`](taskbridge_core::OrchestrationError) before
/// returning; no engine type crosses this trait.
#[async_trait]
pub trait OrchestrationPort: Send + Sync {
    /// Which engine this adapter binds.
    fn engine(&self) -> EngineKind;

    /// Connect and start workers. Idempotent.
    async fn initialize(&self) -> OrchestrationResult<()>;

    /// Make a handler available to workers under `definition.name`.
    /// A later registration with the same name replaces the earlier one.
    async fn register_workflow(&self, definition: WorkflowDefinition) -> OrchestrationResult<()>;

    /// Hand the task to the engine and return immediately.
    async fn submit_task(&self, descriptor: &TaskDescriptor) -> OrchestrationResult<ExecutionHandle>;

    async fn get_status(&self, execution_id: &ExecutionId) -> OrchestrationResult<ExecutionStatus>;

    /// Request cooperative cancellation. Returns false if already terminal.
    async fn cancel(&self, execution_id: &ExecutionId) -> OrchestrationResult<bool>;

    async fn signal(
        &self,
        execution_id: &ExecutionId,
        name: &str,
        payload: Value,
    ) -> OrchestrationResult<()>;

    /// Wait for a terminal state and return the execution's value.
    async fn get_result(
        &self,
        execution_id: &ExecutionId,
        timeout: Option<Duration>,
    ) -> OrchestrationResult<Value>;

    /// Stop workers and close the engine client. Safe to call repeatedly.
    async fn shutdown(&self);
}

/// Run `connect` up to `attempts` times with a fixed delay in between.
pub(crate) async fn connect_with_retry<F, Fut>(
    engine: EngineKind,
    attempts: u32,
    delay: Duration,
    mut connect: F,
) -> OrchestrationResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), EngineError>>,
{
    let attempts = attempts.max(1);
    let mut last_error = String::new();
    for attempt in 1..=attempts {
        match connect().await {
            Ok(()) => {
                info!(engine = %engine, attempt, "Connected to engine");
                return Ok(());
            }
            Err(e) => {
                warn!(engine = %engine, attempt, error = %e, "Engine connection failed");
                last_error = e.to_string();
                if attempt < attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
    Err(OrchestrationError::EngineUnavailable {
        engine,
        reason: format!("gave up after {} attempts: {}", attempts, last_error),
    })
}

/// Await `fut`, failing with `TaskTimeout` once `timeout` elapses.
pub(crate) async fn wait_with_timeout<T, Fut>(
    execution_id: &ExecutionId,
    timeout: Option<Duration>,
    fut: Fut,
) -> OrchestrationResult<T>
where
    Fut: Future<Output = OrchestrationResult<T>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
            OrchestrationError::TaskTimeout {
                execution_id: execution_id.to_string(),
                timeout_ms: limit.as_millis() as u64,
            }
        })?,
        None => fut.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_connect_retry_gives_up() {
        let calls = AtomicU32::new(0);
        let err = connect_with_retry(EngineKind::Queue, 3, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(EngineError::Connection("refused".into())) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(
            err,
            OrchestrationError::EngineUnavailable { engine: EngineKind::Queue, reason } if reason.contains("refused")
        ));
    }

    #[tokio::test]
    async fn test_connect_retry_recovers() {
        let calls = AtomicU32::new(0);
        connect_with_retry(EngineKind::Durable, 3, Duration::from_millis(1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(EngineError::Connection("refused".into()))
                } else {
                    Ok(())
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_wait_with_timeout() {
        let id = ExecutionId::new("wf-1");
        let err = wait_with_timeout::<(), _>(&id, Some(Duration::from_millis(10)), async {
            std::future::pending::<OrchestrationResult<()>>().await
        })
        .await
        .unwrap_err();
        assert!(matches!(err, OrchestrationError::TaskTimeout { timeout_ms: 10, .. }));

        let value = wait_with_timeout(&id, None, async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }
}
