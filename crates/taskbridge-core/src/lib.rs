//! TaskBridge Core Domain Types
//!
//! This crate contains the engine-neutral vocabulary shared by every
//! TaskBridge component:
//! - Task descriptors and the complexity classifier
//! - Canonical job and agent statuses
//! - Execution handles with engine-qualified ids
//! - The orchestration error taxonomy
//! - The task handler contract engines invoke
//!
//! Nothing here talks to an engine; adapters live in `taskbridge-orchestrator`.

pub mod classifier;
pub mod config;
pub mod emitter;
pub mod error;
pub mod event;
pub mod execution;
pub mod handler;
pub mod ids;
pub mod retry;
pub mod status;
pub mod task;

// Re-export commonly used types
pub use classifier::{classify, ClassificationPolicy};
pub use config::{LogLevel, RuntimeConfig};
pub use emitter::EventEmitter;
pub use error::{OrchestrationError, OrchestrationResult};
pub use event::{AgentEvent, AgentEventType};
pub use execution::{EngineKind, ExecutionHandle, ExecutionStatus};
pub use handler::{
    handler_fn, HandlerError, Signal, TaskContext, TaskHandler, WorkflowDefinition,
};
pub use ids::{EventId, ExecutionId, TaskId};
pub use retry::RetryPolicy;
pub use status::{AgentStatus, JobStatus};
pub use task::{Classification, Routing, TaskDescriptor, TaskOptions};
