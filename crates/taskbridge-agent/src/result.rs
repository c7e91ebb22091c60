//! Terminal outcome of an agent run.

use serde::{Deserialize, Serialize};

use crate::metrics::ExecutionMetrics;

/// Category of a failed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// The only attempt failed.
    AgentFailed,
    /// Every permitted attempt failed.
    RetryExhausted,
    /// The last attempt exceeded the per-attempt timeout.
    Timeout,
    /// The payload was rejected by the agent.
    InvalidInput,
    /// The run was cancelled.
    Cancelled,
}

/// Error details carried by a failed [`AgentResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
    pub kind: ErrorKind,
    /// Attempts made before giving up.
    pub attempts: u32,
}

/// Produced exactly once per terminal run of an [`AgentRuntime`](crate::AgentRuntime).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult<T> {
    pub success: bool,
    pub value: Option<T>,
    pub error: Option<ErrorInfo>,
    pub job_id: String,
    pub metrics: ExecutionMetrics,
}

impl<T> AgentResult<T> {
    pub fn succeeded(job_id: impl Into<String>, value: T, metrics: ExecutionMetrics) -> Self {
        Self {
            success: true,
            value: Some(value),
            error: None,
            job_id: job_id.into(),
            metrics,
        }
    }

    pub fn failed(job_id: impl Into<String>, error: ErrorInfo, metrics: ExecutionMetrics) -> Self {
        Self {
            success: false,
            value: None,
            error: Some(error),
            job_id: job_id.into(),
            metrics,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(&self.error, Some(e) if e.kind == ErrorKind::Cancelled)
    }

    /// Convert into a plain `Result`, dropping the metrics.
    pub fn into_result(self) -> Result<Option<T>, ErrorInfo> {
        match self.error {
            Some(error) if !self.success => Err(error),
            _ => Ok(self.value),
        }
    }
}
