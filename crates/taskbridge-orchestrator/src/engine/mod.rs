//! Native engine boundary.
//!
//! The two execution engines are external collaborators. These traits model
//! the slice of each engine's client API the adapters use, in the engine's
//! own vocabulary. Adapters translate everything here into core types; none
//! of it crosses the orchestration port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use taskbridge_core::{EngineKind, OrchestrationError, Signal};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub mod memory_durable;
pub mod memory_queue;

pub use memory_durable::InMemoryDurableEngine;
pub use memory_queue::InMemoryQueueBroker;

/// Errors reported by engine clients.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("engine client closed")]
    Closed,
}

impl EngineError {
    /// Translate into the orchestration taxonomy at the port boundary.
    pub fn into_orchestration(self, engine: EngineKind) -> OrchestrationError {
        match self {
            Self::NotFound(id) => OrchestrationError::ExecutionNotFound(id),
            Self::AlreadyExists(id) => {
                OrchestrationError::InvalidInput(format!("execution id '{}' already in use", id))
            }
            Self::Rejected(reason) => OrchestrationError::InvalidInput(reason),
            Self::Connection(reason) => OrchestrationError::EngineUnavailable { engine, reason },
            Self::Closed => OrchestrationError::EngineUnavailable {
                engine,
                reason: "engine client closed".to_string(),
            },
        }
    }
}

// ============================================================================
// Durable workflow engine
// ============================================================================

/// Native workflow execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowExecutionStatus {
    Running,
    Completed,
    Failed,
    Canceled,
    Terminated,
    ContinuedAsNew,
    TimedOut,
}

impl WorkflowExecutionStatus {
    /// Returns true once the run can make no further progress.
    pub fn is_closed(&self) -> bool {
        !matches!(self, Self::Running | Self::ContinuedAsNew)
    }
}

/// Request to start a workflow execution.
#[derive(Debug, Clone)]
pub struct StartWorkflowOptions {
    pub workflow_id: String,
    pub workflow_type: String,
    pub task_queue: String,
    pub input: Value,
    pub execution_timeout: Option<Duration>,
    /// Searchable tags stored with the execution.
    pub memo: Vec<String>,
}

/// Result of describing a workflow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDescription {
    pub workflow_id: String,
    pub run_id: String,
    pub workflow_type: String,
    pub task_queue: String,
    pub status: WorkflowExecutionStatus,
    pub start_time: DateTime<Utc>,
    pub close_time: Option<DateTime<Utc>>,
    pub failure: Option<String>,
    pub history_length: usize,
    pub memo: Vec<String>,
}

/// Work handed to a worker polling a task queue.
#[derive(Debug)]
pub struct WorkflowTask {
    pub workflow_id: String,
    pub run_id: String,
    pub workflow_type: String,
    pub input: Value,
    pub attempt: u32,
    pub execution_timeout: Option<Duration>,
    pub cancellation: CancellationToken,
    pub signals: mpsc::UnboundedReceiver<Signal>,
}

/// What a worker reports back after running a workflow task.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowOutcome {
    Completed(Value),
    Failed(String),
    Canceled,
    TimedOut,
}

/// Terminal state of an execution, returned by `await_completion`.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowCompletion {
    pub status: WorkflowExecutionStatus,
    pub result: Option<Value>,
    pub failure: Option<String>,
}

/// Kind of entry in an execution's event history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryEventType {
    WorkflowExecutionStarted,
    WorkflowTaskStarted,
    WorkflowExecutionSignaled,
    WorkflowExecutionCancelRequested,
    WorkflowExecutionCompleted,
    WorkflowExecutionFailed,
    WorkflowExecutionCanceled,
    WorkflowExecutionTerminated,
    WorkflowExecutionTimedOut,
}

/// One entry of an execution's event history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub event_id: u64,
    pub event_type: HistoryEventType,
    pub timestamp: DateTime<Utc>,
    pub details: Option<String>,
}

/// Client API of a durable, replay-capable workflow engine.
#[async_trait]
pub trait DurableEngine: Send + Sync + 'static {
    /// Open the connection. May fail transiently.
    async fn connect(&self) -> Result<(), EngineError>;

    /// Start an execution; returns the run id.
    async fn start_workflow(&self, options: StartWorkflowOptions) -> Result<String, EngineError>;

    async fn describe_workflow(&self, workflow_id: &str) -> Result<WorkflowDescription, EngineError>;

    /// Request cooperative cancellation. Returns false if already closed.
    async fn request_cancel(&self, workflow_id: &str) -> Result<bool, EngineError>;

    async fn terminate_workflow(&self, workflow_id: &str, reason: &str) -> Result<(), EngineError>;

    /// Deliver a signal to a running execution.
    async fn signal_workflow(&self, workflow_id: &str, signal: Signal) -> Result<(), EngineError>;

    /// Wait for the next task on `task_queue`. Fails with `Closed` on close.
    async fn poll_workflow_task(&self, task_queue: &str) -> Result<WorkflowTask, EngineError>;

    /// Report the outcome of a polled task.
    async fn complete_workflow_task(
        &self,
        workflow_id: &str,
        outcome: WorkflowOutcome,
    ) -> Result<(), EngineError>;

    /// Wait until the execution closes.
    async fn await_completion(&self, workflow_id: &str) -> Result<WorkflowCompletion, EngineError>;

    async fn history(&self, workflow_id: &str) -> Result<Vec<HistoryEvent>, EngineError>;

    async fn close(&self);
}

// ============================================================================
// Job queue broker
// ============================================================================

/// Native job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
    Delayed,
    Paused,
    Unknown,
}

impl JobState {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Per-job options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOptions {
    /// Higher values are dispatched first.
    pub priority: i32,
    /// Total attempts including the first.
    pub attempts: u32,
    pub backoff_delay_ms: u64,
    pub backoff_max_ms: u64,
    /// Caller-chosen job id.
    pub job_id: Option<String>,
    /// Per-attempt processing timeout.
    pub timeout: Option<Duration>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            attempts: 3,
            backoff_delay_ms: 1_000,
            backoff_max_ms: 30_000,
            job_id: None,
            timeout: None,
        }
    }
}

/// Stored state of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub queue: String,
    pub name: String,
    pub data: Value,
    pub priority: i32,
    pub state: JobState,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub processed_on: Option<DateTime<Utc>>,
    pub finished_on: Option<DateTime<Utc>>,
    pub failed_reason: Option<String>,
    pub return_value: Option<Value>,
}

/// A job handed to a processor.
#[derive(Debug, Clone)]
pub struct ActiveJob {
    pub id: String,
    pub queue: String,
    pub name: String,
    pub data: Value,
    /// 1-indexed attempt number.
    pub attempt: u32,
    pub timeout: Option<Duration>,
    pub cancellation: CancellationToken,
}

/// What `remove_job` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// Waiting or delayed job removed before it ran.
    Removed,
    /// Job is running; its cancellation token was raised.
    CancellationRequested,
    /// Job already completed or failed.
    AlreadyFinished,
}

/// What the broker did with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    RetryScheduled { delay: Duration },
    Failed,
}

/// Job counts of one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
    pub paused: u64,
}

/// Client API of a priority/retry job queue broker.
#[async_trait]
pub trait QueueBroker: Send + Sync + 'static {
    async fn connect(&self) -> Result<(), EngineError>;

    /// Enqueue a job; returns its id.
    async fn add_job(
        &self,
        queue: &str,
        name: &str,
        data: Value,
        options: JobOptions,
    ) -> Result<String, EngineError>;

    async fn get_job(&self, job_id: &str) -> Result<JobRecord, EngineError>;

    async fn remove_job(&self, job_id: &str) -> Result<RemoveOutcome, EngineError>;

    /// Wait for the next dispatchable job on `queue` and mark it active.
    async fn next_job(&self, queue: &str) -> Result<ActiveJob, EngineError>;

    async fn complete_job(&self, job_id: &str, value: Value) -> Result<(), EngineError>;

    /// Record a failed attempt; retries with backoff while attempts remain
    /// and `retryable` is set.
    async fn fail_job(
        &self,
        job_id: &str,
        reason: &str,
        retryable: bool,
    ) -> Result<FailureDisposition, EngineError>;

    /// Wait until the job completes or fails for good.
    async fn await_job(&self, job_id: &str) -> Result<JobRecord, EngineError>;

    async fn job_counts(&self, queue: &str) -> Result<JobCounts, EngineError>;

    async fn close(&self);
}
