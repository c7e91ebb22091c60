//! TaskBridge agent runtime.
//!
//! Wraps one unit of executable logic (an [`Agent`]) with retry and
//! exponential backoff, execution metrics, lifecycle events and a small
//! status state machine. Engines reach agents through [`AgentTaskHandler`].

pub mod agent;
pub mod backoff;
pub mod builtin;
pub mod handler;
pub mod metrics;
pub mod registry;
pub mod result;
pub mod runtime;

pub use agent::{Agent, AgentContext, AgentError};
pub use backoff::Backoff;
pub use builtin::DiagnosticAgent;
pub use handler::AgentTaskHandler;
pub use metrics::{ExecutionMetrics, MetricsRecorder, ResourceUsage};
pub use registry::{AgentKind, AgentRegistry, RegistryError};
pub use result::{AgentResult, ErrorInfo, ErrorKind};
pub use runtime::AgentRuntime;
