//! Task descriptors and the caller-facing scheduling options.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::ids::{ExecutionId, TaskId};
use crate::retry::RetryPolicy;

/// Execution class of a task, decided once at creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    /// Fire-and-forget work for the job queue.
    #[default]
    Simple,
    /// Long-running, resumable work for the durable engine.
    Complex,
}

/// Where a task should land inside its engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Routing {
    /// Job queue name (queue engine).
    pub queue_name: Option<String>,
    /// Workflow type to start (durable engine).
    pub workflow_type: Option<String>,
    /// Task queue the workflow is polled from (durable engine).
    pub task_queue: Option<String>,
    /// Job queue that receives a tracking record when a workflow starts.
    pub tracking_queue: Option<String>,
}

/// Options accepted by `schedule`.
///
/// Field names are snake_case on the wire; the camelCase names used by older
/// clients are accepted as aliases.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskOptions {
    /// Explicit complexity flag. Absent means "let the policy decide".
    #[serde(alias = "isComplex")]
    pub is_complex: Option<bool>,
    pub priority: Option<i32>,
    #[serde(alias = "queueName")]
    pub queue: Option<String>,
    pub tags: Vec<String>,
    #[serde(alias = "workflowType")]
    pub workflow_type: Option<String>,
    #[serde(alias = "taskQueue")]
    pub task_queue: Option<String>,
    #[serde(alias = "trackingQueue")]
    pub tracking_queue: Option<String>,
    /// Caller-chosen execution id, honored by both engines.
    #[serde(alias = "executionId", alias = "jobId", alias = "workflowId")]
    pub execution_id: Option<String>,
    #[serde(alias = "attempts", alias = "maxAttempts")]
    pub max_attempts: Option<u32>,
    #[serde(alias = "backoffDelayMs")]
    pub backoff_delay_ms: Option<u64>,
    #[serde(alias = "maxDelayMs", alias = "backoffMaxDelayMs")]
    pub max_delay_ms: Option<u64>,
    #[serde(alias = "timeoutMs", alias = "timeout")]
    pub timeout_ms: Option<u64>,
}

impl TaskOptions {
    /// Options for a task explicitly marked complex.
    pub fn complex() -> Self {
        Self {
            is_complex: Some(true),
            ..Self::default()
        }
    }

    /// Options for a task explicitly marked simple.
    pub fn simple() -> Self {
        Self {
            is_complex: Some(false),
            ..Self::default()
        }
    }
}

/// Immutable description of one unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Unique task identifier.
    pub id: TaskId,

    /// Task type; doubles as the job name or default workflow type.
    pub task_type: String,

    /// Opaque payload handed to the handler.
    pub payload: Value,

    classification: Classification,

    /// Higher values are dispatched first by the queue engine.
    pub priority: i32,

    pub tags: Vec<String>,

    pub routing: Routing,

    pub retry_policy: RetryPolicy,

    /// Execution timeout enforced by the engine.
    pub timeout_ms: Option<u64>,

    /// Execution id requested by the caller, if any.
    pub requested_execution_id: Option<ExecutionId>,

    /// When the descriptor was created.
    pub created_at: DateTime<Utc>,
}

impl TaskDescriptor {
    /// Create a descriptor with default routing and retry policy.
    pub fn new(
        task_type: impl Into<String>,
        payload: Value,
        classification: Classification,
    ) -> Self {
        Self {
            id: TaskId::generate(),
            task_type: task_type.into(),
            payload,
            classification,
            priority: 0,
            tags: Vec::new(),
            routing: Routing::default(),
            retry_policy: RetryPolicy::default(),
            timeout_ms: None,
            requested_execution_id: None,
            created_at: Utc::now(),
        }
    }

    /// Build a descriptor from scheduling options and an already-made decision.
    pub fn from_options(
        task_type: impl Into<String>,
        payload: Value,
        classification: Classification,
        options: &TaskOptions,
    ) -> Self {
        let mut retry_policy = RetryPolicy::default();
        if let Some(attempts) = options.max_attempts {
            retry_policy.max_attempts = attempts;
        }
        if let Some(delay) = options.backoff_delay_ms {
            retry_policy.base_delay_ms = delay;
        }
        if let Some(max_delay) = options.max_delay_ms {
            retry_policy.max_delay_ms = max_delay;
        }

        let mut descriptor = Self::new(task_type, payload, classification);
        descriptor.priority = options.priority.unwrap_or(0);
        descriptor.tags = options.tags.clone();
        descriptor.routing = Routing {
            queue_name: options.queue.clone(),
            workflow_type: options.workflow_type.clone(),
            task_queue: options.task_queue.clone(),
            tracking_queue: options.tracking_queue.clone(),
        };
        descriptor.retry_policy = retry_policy;
        descriptor.timeout_ms = options.timeout_ms;
        descriptor.requested_execution_id = options.execution_id.clone().map(ExecutionId::from);
        descriptor
    }

    /// Execution class, fixed at creation.
    pub fn classification(&self) -> Classification {
        self.classification
    }

    pub fn is_complex(&self) -> bool {
        self.classification == Classification::Complex
    }

    /// Builder method to set the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Builder method to set the routing.
    pub fn with_routing(mut self, routing: Routing) -> Self {
        self.routing = routing;
        self
    }

    /// Builder method to set the retry policy.
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Builder method to request a specific execution id.
    pub fn with_execution_id(mut self, id: impl Into<ExecutionId>) -> Self {
        self.requested_execution_id = Some(id.into());
        self
    }

    /// Builder method to set an execution timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}
