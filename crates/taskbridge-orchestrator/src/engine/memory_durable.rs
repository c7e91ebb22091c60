//! In-process durable workflow engine.
//!
//! Keeps every execution with its event history, buffers signals until a
//! worker picks the execution up and hands tasks out per task queue.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use taskbridge_core::Signal;
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    DurableEngine, EngineError, HistoryEvent, HistoryEventType, StartWorkflowOptions,
    WorkflowCompletion, WorkflowDescription, WorkflowExecutionStatus, WorkflowOutcome,
    WorkflowTask,
};

struct Execution {
    description: WorkflowDescription,
    input: Value,
    execution_timeout: Option<Duration>,
    history: Vec<HistoryEvent>,
    picked_up: bool,
    attempt: u32,
    cancellation: CancellationToken,
    signal_tx: mpsc::UnboundedSender<Signal>,
    signal_rx: Option<mpsc::UnboundedReceiver<Signal>>,
    result: Option<Value>,
    status_tx: watch::Sender<WorkflowExecutionStatus>,
}

impl Execution {
    fn record(&mut self, event_type: HistoryEventType, details: Option<String>) {
        let event_id = self.history.len() as u64 + 1;
        self.history.push(HistoryEvent {
            event_id,
            event_type,
            timestamp: Utc::now(),
            details,
        });
        self.description.history_length = self.history.len();
    }

    fn is_closed(&self) -> bool {
        self.description.status.is_closed()
    }

    fn close(&mut self, status: WorkflowExecutionStatus, failure: Option<String>) {
        let event_type = match status {
            WorkflowExecutionStatus::Completed => HistoryEventType::WorkflowExecutionCompleted,
            WorkflowExecutionStatus::Canceled => HistoryEventType::WorkflowExecutionCanceled,
            WorkflowExecutionStatus::Terminated => HistoryEventType::WorkflowExecutionTerminated,
            WorkflowExecutionStatus::TimedOut => HistoryEventType::WorkflowExecutionTimedOut,
            _ => HistoryEventType::WorkflowExecutionFailed,
        };
        self.description.status = status;
        self.description.close_time = Some(Utc::now());
        self.description.failure = failure.clone();
        self.record(event_type, failure);
        self.status_tx.send_replace(status);
    }
}

#[derive(Default)]
struct EngineState {
    executions: HashMap<String, Execution>,
    task_queues: HashMap<String, VecDeque<String>>,
    notifiers: HashMap<String, Arc<Notify>>,
}

impl EngineState {
    fn notifier(&mut self, task_queue: &str) -> Arc<Notify> {
        Arc::clone(
            self.notifiers
                .entry(task_queue.to_string())
                .or_insert_with(|| Arc::new(Notify::new())),
        )
    }

    fn execution(&self, workflow_id: &str) -> Result<&Execution, EngineError> {
        self.executions
            .get(workflow_id)
            .ok_or_else(|| EngineError::NotFound(workflow_id.to_string()))
    }

    fn execution_mut(&mut self, workflow_id: &str) -> Result<&mut Execution, EngineError> {
        self.executions
            .get_mut(workflow_id)
            .ok_or_else(|| EngineError::NotFound(workflow_id.to_string()))
    }
}

/// In-memory [`DurableEngine`].
pub struct InMemoryDurableEngine {
    namespace: String,
    state: Mutex<EngineState>,
    connected: AtomicBool,
    closed: CancellationToken,
    connect_failures: AtomicU32,
}

impl InMemoryDurableEngine {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            state: Mutex::new(EngineState::default()),
            connected: AtomicBool::new(false),
            closed: CancellationToken::new(),
            connect_failures: AtomicU32::new(0),
        }
    }

    /// Simulate an unreachable endpoint for the next `n` connection attempts.
    pub fn with_connect_failures(self, n: u32) -> Self {
        self.connect_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.closed.is_cancelled() {
            return Err(EngineError::Closed);
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(EngineError::Connection("not connected".to_string()));
        }
        Ok(())
    }
}

impl Default for InMemoryDurableEngine {
    fn default() -> Self {
        Self::new("default")
    }
}

#[async_trait]
impl DurableEngine for InMemoryDurableEngine {
    async fn connect(&self) -> Result<(), EngineError> {
        if self.closed.is_cancelled() {
            return Err(EngineError::Closed);
        }
        let remaining = self.connect_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.connect_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(EngineError::Connection(format!(
                "namespace '{}' unreachable",
                self.namespace
            )));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn start_workflow(&self, options: StartWorkflowOptions) -> Result<String, EngineError> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;

        if let Some(existing) = state.executions.get(&options.workflow_id) {
            if !existing.is_closed() {
                return Err(EngineError::AlreadyExists(options.workflow_id));
            }
        }

        let run_id = Uuid::new_v4().to_string();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (status_tx, _) = watch::channel(WorkflowExecutionStatus::Running);
        let mut execution = Execution {
            description: WorkflowDescription {
                workflow_id: options.workflow_id.clone(),
                run_id: run_id.clone(),
                workflow_type: options.workflow_type.clone(),
                task_queue: options.task_queue.clone(),
                status: WorkflowExecutionStatus::Running,
                start_time: Utc::now(),
                close_time: None,
                failure: None,
                history_length: 0,
                memo: options.memo,
            },
            input: options.input,
            execution_timeout: options.execution_timeout,
            history: Vec::new(),
            picked_up: false,
            attempt: 0,
            cancellation: CancellationToken::new(),
            signal_tx,
            signal_rx: Some(signal_rx),
            result: None,
            status_tx,
        };
        execution.record(
            HistoryEventType::WorkflowExecutionStarted,
            Some(options.workflow_type.clone()),
        );

        state
            .executions
            .insert(options.workflow_id.clone(), execution);
        state
            .task_queues
            .entry(options.task_queue.clone())
            .or_default()
            .push_back(options.workflow_id.clone());
        state.notifier(&options.task_queue).notify_one();

        info!(
            namespace = %self.namespace,
            workflow_id = %options.workflow_id,
            workflow_type = %options.workflow_type,
            task_queue = %options.task_queue,
            "Workflow started"
        );
        Ok(run_id)
    }

    async fn describe_workflow(&self, workflow_id: &str) -> Result<WorkflowDescription, EngineError> {
        self.ensure_open()?;
        let state = self.state.lock().await;
        Ok(state.execution(workflow_id)?.description.clone())
    }

    async fn request_cancel(&self, workflow_id: &str) -> Result<bool, EngineError> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        let execution = state.execution_mut(workflow_id)?;
        if execution.is_closed() {
            return Ok(false);
        }

        execution.record(HistoryEventType::WorkflowExecutionCancelRequested, None);
        if execution.picked_up {
            execution.cancellation.cancel();
        } else {
            // never ran; nothing to notify
            execution.close(WorkflowExecutionStatus::Canceled, None);
        }
        debug!(workflow_id = %workflow_id, picked_up = execution.picked_up, "Cancellation requested");
        Ok(true)
    }

    async fn terminate_workflow(&self, workflow_id: &str, reason: &str) -> Result<(), EngineError> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        let execution = state.execution_mut(workflow_id)?;
        if execution.is_closed() {
            return Err(EngineError::NotFound(format!(
                "{} has no running execution",
                workflow_id
            )));
        }
        execution.cancellation.cancel();
        execution.close(WorkflowExecutionStatus::Terminated, Some(reason.to_string()));
        info!(workflow_id = %workflow_id, reason = %reason, "Workflow terminated");
        Ok(())
    }

    async fn signal_workflow(&self, workflow_id: &str, signal: Signal) -> Result<(), EngineError> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        let execution = state.execution_mut(workflow_id)?;
        if execution.is_closed() {
            return Err(EngineError::NotFound(format!(
                "{} has no running execution",
                workflow_id
            )));
        }
        let name = signal.name.clone();
        // receiver may already be gone if the handler returned; the signal is
        // still part of the history
        let _ = execution.signal_tx.send(signal);
        execution.record(HistoryEventType::WorkflowExecutionSignaled, Some(name));
        Ok(())
    }

    async fn poll_workflow_task(&self, task_queue: &str) -> Result<WorkflowTask, EngineError> {
        loop {
            let notify = {
                self.ensure_open()?;
                let mut state = self.state.lock().await;
                while let Some(workflow_id) = state
                    .task_queues
                    .get_mut(task_queue)
                    .and_then(|queue| queue.pop_front())
                {
                    let Some(execution) = state.executions.get_mut(&workflow_id) else {
                        continue;
                    };
                    if execution.is_closed() {
                        continue;
                    }

                    execution.picked_up = true;
                    execution.attempt += 1;
                    let signals = match execution.signal_rx.take() {
                        Some(rx) => rx,
                        None => {
                            let (tx, rx) = mpsc::unbounded_channel();
                            execution.signal_tx = tx;
                            rx
                        }
                    };
                    execution.record(HistoryEventType::WorkflowTaskStarted, None);

                    return Ok(WorkflowTask {
                        workflow_id,
                        run_id: execution.description.run_id.clone(),
                        workflow_type: execution.description.workflow_type.clone(),
                        input: execution.input.clone(),
                        attempt: execution.attempt,
                        execution_timeout: execution.execution_timeout,
                        cancellation: execution.cancellation.clone(),
                        signals,
                    });
                }
                state.notifier(task_queue)
            };

            tokio::select! {
                _ = notify.notified() => {}
                _ = self.closed.cancelled() => return Err(EngineError::Closed),
            }
        }
    }

    async fn complete_workflow_task(
        &self,
        workflow_id: &str,
        outcome: WorkflowOutcome,
    ) -> Result<(), EngineError> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        let execution = state.execution_mut(workflow_id)?;
        if execution.is_closed() {
            debug!(workflow_id = %workflow_id, "Ignoring outcome for closed execution");
            return Ok(());
        }

        match outcome {
            WorkflowOutcome::Completed(value) => {
                execution.result = Some(value);
                execution.close(WorkflowExecutionStatus::Completed, None);
            }
            WorkflowOutcome::Failed(reason) => {
                execution.close(WorkflowExecutionStatus::Failed, Some(reason));
            }
            WorkflowOutcome::Canceled => {
                execution.close(WorkflowExecutionStatus::Canceled, None);
            }
            WorkflowOutcome::TimedOut => {
                execution.close(
                    WorkflowExecutionStatus::TimedOut,
                    Some("workflow execution timed out".to_string()),
                );
            }
        }
        Ok(())
    }

    async fn await_completion(&self, workflow_id: &str) -> Result<WorkflowCompletion, EngineError> {
        self.ensure_open()?;
        let mut status_rx = {
            let state = self.state.lock().await;
            state.execution(workflow_id)?.status_tx.subscribe()
        };

        loop {
            if status_rx.borrow_and_update().is_closed() {
                break;
            }
            tokio::select! {
                changed = status_rx.changed() => changed.map_err(|_| EngineError::Closed)?,
                _ = self.closed.cancelled() => return Err(EngineError::Closed),
            }
        }

        let state = self.state.lock().await;
        let execution = state.execution(workflow_id)?;
        Ok(WorkflowCompletion {
            status: execution.description.status,
            result: execution.result.clone(),
            failure: execution.description.failure.clone(),
        })
    }

    async fn history(&self, workflow_id: &str) -> Result<Vec<HistoryEvent>, EngineError> {
        self.ensure_open()?;
        let state = self.state.lock().await;
        Ok(state.execution(workflow_id)?.history.clone())
    }

    async fn close(&self) {
        self.closed.cancel();
        self.connected.store(false, Ordering::SeqCst);
        info!(namespace = %self.namespace, "Durable engine client closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn start_options(id: &str) -> StartWorkflowOptions {
        StartWorkflowOptions {
            workflow_id: id.to_string(),
            workflow_type: "projectAnalysis".to_string(),
            task_queue: "analysis".to_string(),
            input: json!({"path": "/src"}),
            execution_timeout: None,
            memo: vec![],
        }
    }

    async fn connected_engine() -> InMemoryDurableEngine {
        let engine = InMemoryDurableEngine::new("test");
        engine.connect().await.unwrap();
        engine
    }

    #[tokio::test]
    async fn test_connect_failures_then_success() {
        let engine = InMemoryDurableEngine::new("test").with_connect_failures(2);
        assert!(matches!(engine.connect().await, Err(EngineError::Connection(_))));
        assert!(matches!(engine.connect().await, Err(EngineError::Connection(_))));
        assert!(engine.connect().await.is_ok());
    }

    #[tokio::test]
    async fn test_requires_connection() {
        let engine = InMemoryDurableEngine::new("test");
        let err = engine.start_workflow(start_options("wf-1")).await.unwrap_err();
        assert!(matches!(err, EngineError::Connection(_)));
    }

    #[tokio::test]
    async fn test_start_poll_complete() {
        let engine = connected_engine().await;
        engine.start_workflow(start_options("wf-1")).await.unwrap();

        let task = engine.poll_workflow_task("analysis").await.unwrap();
        assert_eq!(task.workflow_id, "wf-1");
        assert_eq!(task.attempt, 1);
        assert_eq!(task.input, json!({"path": "/src"}));

        engine
            .complete_workflow_task("wf-1", WorkflowOutcome::Completed(json!(42)))
            .await
            .unwrap();

        let completion = engine.await_completion("wf-1").await.unwrap();
        assert_eq!(completion.status, WorkflowExecutionStatus::Completed);
        assert_eq!(completion.result, Some(json!(42)));

        let history: Vec<_> = engine
            .history("wf-1")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(
            history,
            vec![
                HistoryEventType::WorkflowExecutionStarted,
                HistoryEventType::WorkflowTaskStarted,
                HistoryEventType::WorkflowExecutionCompleted,
            ]
        );
    }

    #[tokio::test]
    async fn test_duplicate_running_id_rejected() {
        let engine = connected_engine().await;
        engine.start_workflow(start_options("wf-1")).await.unwrap();
        let err = engine.start_workflow(start_options("wf-1")).await.unwrap_err();
        assert_eq!(err, EngineError::AlreadyExists("wf-1".into()));
    }

    #[tokio::test]
    async fn test_signals_buffered_until_pickup() {
        let engine = connected_engine().await;
        engine.start_workflow(start_options("wf-1")).await.unwrap();
        engine
            .signal_workflow("wf-1", Signal::new("pause", json!({})))
            .await
            .unwrap();

        let mut task = engine.poll_workflow_task("analysis").await.unwrap();
        assert_eq!(task.signals.recv().await.unwrap().name, "pause");

        engine
            .signal_workflow("wf-1", Signal::new("resume", json!({"at": 1})))
            .await
            .unwrap();
        assert_eq!(task.signals.recv().await.unwrap().name, "resume");
    }

    #[tokio::test]
    async fn test_cancel_before_pickup_closes_canceled() {
        let engine = connected_engine().await;
        engine.start_workflow(start_options("wf-1")).await.unwrap();

        assert!(engine.request_cancel("wf-1").await.unwrap());
        let description = engine.describe_workflow("wf-1").await.unwrap();
        assert_eq!(description.status, WorkflowExecutionStatus::Canceled);
        assert!(!engine.request_cancel("wf-1").await.unwrap());

        // the canceled execution is never handed to a worker
        engine.start_workflow(start_options("wf-2")).await.unwrap();
        let task = engine.poll_workflow_task("analysis").await.unwrap();
        assert_eq!(task.workflow_id, "wf-2");
    }

    #[tokio::test]
    async fn test_cancel_after_pickup_raises_token() {
        let engine = connected_engine().await;
        engine.start_workflow(start_options("wf-1")).await.unwrap();
        let task = engine.poll_workflow_task("analysis").await.unwrap();

        assert!(engine.request_cancel("wf-1").await.unwrap());
        assert!(task.cancellation.is_cancelled());
        let description = engine.describe_workflow("wf-1").await.unwrap();
        assert_eq!(description.status, WorkflowExecutionStatus::Running);

        engine
            .complete_workflow_task("wf-1", WorkflowOutcome::Canceled)
            .await
            .unwrap();
        let description = engine.describe_workflow("wf-1").await.unwrap();
        assert_eq!(description.status, WorkflowExecutionStatus::Canceled);
    }

    #[tokio::test]
    async fn test_terminate() {
        let engine = connected_engine().await;
        engine.start_workflow(start_options("wf-1")).await.unwrap();
        engine.terminate_workflow("wf-1", "operator").await.unwrap();

        let description = engine.describe_workflow("wf-1").await.unwrap();
        assert_eq!(description.status, WorkflowExecutionStatus::Terminated);
        assert_eq!(description.failure.as_deref(), Some("operator"));
        assert!(engine.terminate_workflow("wf-1", "again").await.is_err());
        assert!(engine
            .signal_workflow("wf-1", Signal::new("pause", json!({})))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_unknown_workflow() {
        let engine = connected_engine().await;
        assert_eq!(
            engine.describe_workflow("nope").await.unwrap_err(),
            EngineError::NotFound("nope".into())
        );
    }

    #[tokio::test]
    async fn test_poll_waits_and_close_unblocks() {
        let engine = Arc::new(connected_engine().await);
        let poller = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.poll_workflow_task("idle").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!poller.is_finished());

        engine.close().await;
        let result = poller.await.unwrap();
        assert!(matches!(result, Err(EngineError::Closed)));
        assert!(matches!(engine.connect().await, Err(EngineError::Closed)));
    }
}
