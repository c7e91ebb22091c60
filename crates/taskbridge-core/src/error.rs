//! Orchestration error taxonomy.
//!
//! Adapters translate every native engine failure into one of these variants;
//! no engine-specific error type crosses the orchestration port.

use thiserror::Error;

use crate::execution::EngineKind;
use crate::status::JobStatus;

/// Errors surfaced by the orchestration layer.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// Caller omitted the hints required to route a task.
    #[error("Classification ambiguous for task '{task_type}': {reason}")]
    ClassificationAmbiguous { task_type: String, reason: String },

    /// Engine could not be reached.
    #[error("Engine '{engine}' unavailable: {reason}")]
    EngineUnavailable { engine: EngineKind, reason: String },

    /// Execution id unknown to the engine(s) consulted.
    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    /// Operation not offered by the selected engine.
    #[error("Operation '{operation}' not supported by engine '{engine}'")]
    UnsupportedOperation {
        engine: EngineKind,
        operation: &'static str,
    },

    /// Result retrieval exceeded the caller's timeout.
    #[error("Timed out after {timeout_ms}ms waiting for execution {execution_id}")]
    TaskTimeout {
        execution_id: String,
        timeout_ms: u64,
    },

    /// Runtime gave up after its configured retries.
    #[error("Retries exhausted after {attempts} attempts: {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },

    /// Execution reached a terminal state other than COMPLETED.
    #[error("Execution {execution_id} ended {status}: {reason}")]
    ExecutionFailed {
        execution_id: String,
        status: JobStatus,
        reason: String,
    },

    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl OrchestrationError {
    /// Returns true for the one error the bridge recovers from when probing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ExecutionNotFound(_))
    }
}

/// Result alias used across the orchestration crates.
pub type OrchestrationResult<T> = std::result::Result<T, OrchestrationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = OrchestrationError::UnsupportedOperation {
            engine: EngineKind::Queue,
            operation: "signal",
        };
        assert_eq!(
            err.to_string(),
            "Operation 'signal' not supported by engine 'queue'"
        );

        let err = OrchestrationError::ExecutionNotFound("queue:7".into());
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Execution not found: queue:7");
    }
}
