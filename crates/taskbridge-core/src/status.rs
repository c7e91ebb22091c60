//! Status enums for executions and agent runtimes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical status of an execution, whatever engine runs it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Accepted by the engine, not yet picked up.
    #[default]
    Pending,
    /// Executing (or in a native state with no canonical counterpart).
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error, including native timeouts.
    Failed,
    /// Cancelled cooperatively or removed before it started.
    Cancelled,
    /// Forcibly closed by an operator.
    Terminated,
}

impl JobStatus {
    /// Returns true if the execution can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Terminated
        )
    }

    /// Returns true if the execution is still active (not terminal).
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Terminated => "TERMINATED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of an agent runtime.
///
/// `Idle -> Running -> (Completed | Failed | Retrying -> Running | Cancelled)`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    /// Created, never run.
    #[default]
    Idle,
    /// An attempt is executing.
    Running,
    /// Waiting out the backoff before the next attempt.
    Retrying,
    /// Last attempt succeeded.
    Completed,
    /// Attempts exhausted.
    Failed,
    /// Cancelled while running or retrying.
    Cancelled,
}

impl AgentStatus {
    /// Returns true if the runtime reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns true if `cancel()` has an effect in this state.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, Self::Running | Self::Retrying)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_terminal() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(JobStatus::Terminated.is_terminal());
    }

    #[test]
    fn test_job_status_serde() {
        let json = serde_json::to_string(&JobStatus::Cancelled).unwrap();
        assert_eq!(json, "\"CANCELLED\"");
        let back: JobStatus = serde_json::from_str("\"TERMINATED\"").unwrap();
        assert_eq!(back, JobStatus::Terminated);
    }

    #[test]
    fn test_agent_status_cancellable() {
        assert!(AgentStatus::Running.is_cancellable());
        assert!(AgentStatus::Retrying.is_cancellable());
        for status in [
            AgentStatus::Idle,
            AgentStatus::Completed,
            AgentStatus::Failed,
            AgentStatus::Cancelled,
        ] {
            assert!(!status.is_cancellable());
        }
        assert_eq!(AgentStatus::default(), AgentStatus::Idle);
    }
}
