//! Orchestration port bound to a durable workflow engine.
//!
//! Each configured task queue gets one worker that polls for workflow tasks,
//! runs the registered handler and reports the outcome back to the engine.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use taskbridge_core::{
    EngineKind, ExecutionHandle, ExecutionId, ExecutionStatus, HandlerError, JobStatus,
    OrchestrationError, OrchestrationResult, Signal, TaskContext, TaskDescriptor,
    WorkflowDefinition,
};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::DurableAdapterConfig;
use crate::engine::{
    DurableEngine, EngineError, HistoryEvent, StartWorkflowOptions, WorkflowExecutionStatus,
    WorkflowOutcome, WorkflowTask,
};
use crate::port::{connect_with_retry, wait_with_timeout, OrchestrationPort};

type WorkflowMap = Arc<RwLock<HashMap<String, WorkflowDefinition>>>;

/// Pause before polling again after a transient poll error.
const POLL_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Map a native workflow status onto the canonical status.
pub fn map_workflow_status(status: WorkflowExecutionStatus) -> JobStatus {
    match status {
        WorkflowExecutionStatus::Running => JobStatus::Running,
        WorkflowExecutionStatus::Completed => JobStatus::Completed,
        WorkflowExecutionStatus::Failed => JobStatus::Failed,
        WorkflowExecutionStatus::Canceled => JobStatus::Cancelled,
        WorkflowExecutionStatus::Terminated => JobStatus::Terminated,
        WorkflowExecutionStatus::TimedOut => JobStatus::Failed,
        WorkflowExecutionStatus::ContinuedAsNew => JobStatus::Running,
    }
}

#[derive(Default)]
struct Lifecycle {
    initialized: bool,
    shut_down: bool,
    workers: HashMap<String, JoinHandle<()>>,
}

/// [`OrchestrationPort`] over a [`DurableEngine`].
pub struct DurableEngineAdapter<E: DurableEngine> {
    engine: Arc<E>,
    config: DurableAdapterConfig,
    workflows: WorkflowMap,
    lifecycle: Mutex<Lifecycle>,
    shutdown: CancellationToken,
}

impl<E: DurableEngine> DurableEngineAdapter<E> {
    pub fn new(engine: Arc<E>, config: DurableAdapterConfig) -> Self {
        Self {
            engine,
            config,
            workflows: Arc::new(RwLock::new(HashMap::new())),
            lifecycle: Mutex::new(Lifecycle::default()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &DurableAdapterConfig {
        &self.config
    }

    /// Force-close an execution as TERMINATED.
    pub async fn terminate(&self, execution_id: &ExecutionId, reason: &str) -> OrchestrationResult<()> {
        self.initialize().await?;
        self.engine
            .terminate_workflow(execution_id.as_str(), reason)
            .await
            .map_err(|e| e.into_orchestration(EngineKind::Durable))?;
        info!(execution_id = %execution_id, reason = %reason, "Execution terminated");
        Ok(())
    }

    /// Recorded event history of an execution.
    pub async fn history(&self, execution_id: &ExecutionId) -> OrchestrationResult<Vec<HistoryEvent>> {
        self.initialize().await?;
        self.engine
            .history(execution_id.as_str())
            .await
            .map_err(|e| e.into_orchestration(EngineKind::Durable))
    }

    /// Start a worker for `task_queue` unless one is running.
    async fn ensure_worker(&self, task_queue: &str) {
        let mut lifecycle = self.lifecycle.lock().await;
        if !lifecycle.shut_down {
            self.spawn_worker(&mut lifecycle, task_queue);
        }
    }

    fn spawn_worker(&self, lifecycle: &mut Lifecycle, task_queue: &str) {
        if lifecycle.workers.contains_key(task_queue) {
            return;
        }
        let handle = tokio::spawn(run_worker(
            Arc::clone(&self.engine),
            Arc::clone(&self.workflows),
            task_queue.to_string(),
            self.shutdown.clone(),
        ));
        lifecycle.workers.insert(task_queue.to_string(), handle);
    }

    fn engine_error(e: EngineError) -> OrchestrationError {
        e.into_orchestration(EngineKind::Durable)
    }
}

#[async_trait]
impl<E: DurableEngine> OrchestrationPort for DurableEngineAdapter<E> {
    fn engine(&self) -> EngineKind {
        EngineKind::Durable
    }

    async fn initialize(&self) -> OrchestrationResult<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.shut_down {
            return Err(OrchestrationError::EngineUnavailable {
                engine: EngineKind::Durable,
                reason: "adapter is shut down".to_string(),
            });
        }
        if lifecycle.initialized {
            return Ok(());
        }

        let engine = Arc::clone(&self.engine);
        connect_with_retry(
            EngineKind::Durable,
            self.config.connect_attempts,
            self.config.connect_retry_delay(),
            || {
                let engine = Arc::clone(&engine);
                async move { engine.connect().await }
            },
        )
        .await?;

        let mut queues = self.config.task_queues.clone();
        queues.push(self.config.default_task_queue.clone());
        for queue in &queues {
            self.spawn_worker(&mut lifecycle, queue);
        }
        lifecycle.initialized = true;

        info!(
            workers = lifecycle.workers.len(),
            "Durable engine adapter initialized"
        );
        Ok(())
    }

    async fn register_workflow(&self, definition: WorkflowDefinition) -> OrchestrationResult<()> {
        info!(workflow_type = %definition.name, "Registering workflow");
        self.workflows
            .write()
            .await
            .insert(definition.name.clone(), definition);
        Ok(())
    }

    async fn submit_task(&self, descriptor: &TaskDescriptor) -> OrchestrationResult<ExecutionHandle> {
        self.initialize().await?;

        let workflow_type = descriptor
            .routing
            .workflow_type
            .clone()
            .unwrap_or_else(|| descriptor.task_type.clone());
        let task_queue = descriptor
            .routing
            .task_queue
            .clone()
            .unwrap_or_else(|| self.config.default_task_queue.clone());
        self.ensure_worker(&task_queue).await;

        let execution_id = descriptor
            .requested_execution_id
            .clone()
            .unwrap_or_else(|| ExecutionId::generate_with_prefix(&workflow_type));

        let run_id = self
            .engine
            .start_workflow(StartWorkflowOptions {
                workflow_id: execution_id.to_string(),
                workflow_type: workflow_type.clone(),
                task_queue: task_queue.clone(),
                input: descriptor.payload.clone(),
                execution_timeout: descriptor.timeout(),
                memo: descriptor.tags.clone(),
            })
            .await
            .map_err(Self::engine_error)?;

        info!(
            task_id = %descriptor.id,
            execution_id = %execution_id,
            run_id = %run_id,
            workflow_type = %workflow_type,
            task_queue = %task_queue,
            "Workflow submitted"
        );
        Ok(ExecutionHandle::new(
            execution_id,
            EngineKind::Durable,
            descriptor.id.clone(),
        ))
    }

    async fn get_status(&self, execution_id: &ExecutionId) -> OrchestrationResult<ExecutionStatus> {
        self.initialize().await?;
        let description = self
            .engine
            .describe_workflow(execution_id.as_str())
            .await
            .map_err(Self::engine_error)?;

        Ok(ExecutionStatus::new(
            execution_id.clone(),
            EngineKind::Durable,
            map_workflow_status(description.status),
            description.start_time,
        )
        .with_end_time(description.close_time)
        .with_error(description.failure))
    }

    async fn cancel(&self, execution_id: &ExecutionId) -> OrchestrationResult<bool> {
        self.initialize().await?;
        let requested = self
            .engine
            .request_cancel(execution_id.as_str())
            .await
            .map_err(Self::engine_error)?;
        debug!(execution_id = %execution_id, requested, "Cancel requested");
        Ok(requested)
    }

    async fn signal(
        &self,
        execution_id: &ExecutionId,
        name: &str,
        payload: Value,
    ) -> OrchestrationResult<()> {
        self.initialize().await?;
        self.engine
            .signal_workflow(execution_id.as_str(), Signal::new(name, payload))
            .await
            .map_err(Self::engine_error)?;
        debug!(execution_id = %execution_id, signal = %name, "Signal delivered");
        Ok(())
    }

    async fn get_result(
        &self,
        execution_id: &ExecutionId,
        timeout: Option<Duration>,
    ) -> OrchestrationResult<Value> {
        self.initialize().await?;
        let completion = wait_with_timeout(execution_id, timeout, async {
            self.engine
                .await_completion(execution_id.as_str())
                .await
                .map_err(Self::engine_error)
        })
        .await?;

        if completion.status == WorkflowExecutionStatus::Completed {
            return Ok(completion.result.unwrap_or(Value::Null));
        }
        let status = map_workflow_status(completion.status);
        Err(OrchestrationError::ExecutionFailed {
            execution_id: execution_id.to_string(),
            status,
            reason: completion
                .failure
                .unwrap_or_else(|| format!("workflow ended {}", status)),
        })
    }

    async fn shutdown(&self) {
        let workers = {
            let mut lifecycle = self.lifecycle.lock().await;
            if lifecycle.shut_down {
                return;
            }
            lifecycle.shut_down = true;
            std::mem::take(&mut lifecycle.workers)
        };

        self.shutdown.cancel();
        self.engine.close().await;
        for (queue, handle) in workers {
            if let Err(e) = handle.await {
                error!(task_queue = %queue, error = %e, "Workflow worker panicked");
            }
        }
        info!("Durable engine adapter shut down");
    }
}

/// Poll `task_queue` and run one workflow task at a time until shutdown.
async fn run_worker<E: DurableEngine>(
    engine: Arc<E>,
    workflows: WorkflowMap,
    task_queue: String,
    shutdown: CancellationToken,
) {
    info!(task_queue = %task_queue, "Workflow worker started");
    loop {
        let task = tokio::select! {
            _ = shutdown.cancelled() => break,
            polled = engine.poll_workflow_task(&task_queue) => match polled {
                Ok(task) => task,
                Err(EngineError::Closed) => break,
                Err(e) => {
                    warn!(task_queue = %task_queue, error = %e, "Poll failed");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(POLL_ERROR_BACKOFF) => continue,
                    }
                }
            },
        };

        let workflow_id = task.workflow_id.clone();
        let outcome = tokio::select! {
            _ = shutdown.cancelled() => break,
            outcome = execute_workflow_task(&workflows, task) => outcome,
        };

        if let Err(e) = engine.complete_workflow_task(&workflow_id, outcome).await {
            warn!(workflow_id = %workflow_id, error = %e, "Failed to report workflow outcome");
        }
    }
    info!(task_queue = %task_queue, "Workflow worker stopped");
}

async fn execute_workflow_task(workflows: &WorkflowMap, task: WorkflowTask) -> WorkflowOutcome {
    let definition = workflows.read().await.get(&task.workflow_type).cloned();
    let Some(definition) = definition else {
        warn!(
            workflow_id = %task.workflow_id,
            workflow_type = %task.workflow_type,
            "No workflow registered for type"
        );
        return WorkflowOutcome::Failed(format!(
            "no workflow registered for type '{}'",
            task.workflow_type
        ));
    };

    debug!(
        workflow_id = %task.workflow_id,
        workflow_type = %task.workflow_type,
        attempt = task.attempt,
        "Running workflow task"
    );
    let ctx = TaskContext::new(
        ExecutionId::new(task.workflow_id.clone()),
        EngineKind::Durable,
        task.workflow_type,
        task.input,
        task.attempt,
        task.cancellation,
    )
    .with_signals(task.signals);

    let handler = definition.handler();
    let result = match task.execution_timeout {
        Some(limit) => match tokio::time::timeout(limit, handler.handle(ctx)).await {
            Ok(result) => result,
            Err(_) => return WorkflowOutcome::TimedOut,
        },
        None => handler.handle(ctx).await,
    };

    match result {
        Ok(value) => WorkflowOutcome::Completed(value),
        Err(HandlerError::Cancelled) => WorkflowOutcome::Canceled,
        Err(HandlerError::Failed(reason)) => WorkflowOutcome::Failed(reason),
    }
}
