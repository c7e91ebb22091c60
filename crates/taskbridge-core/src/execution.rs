//! Execution handles and canonical execution status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::OrchestrationError;
use crate::ids::{ExecutionId, TaskId};
use crate::status::JobStatus;

/// Which engine owns an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Durable, replay-capable workflow engine.
    Durable,
    /// Lightweight priority/retry job queue.
    Queue,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Durable => "durable",
            Self::Queue => "queue",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "durable" => Ok(Self::Durable),
            "queue" => Ok(Self::Queue),
            other => Err(OrchestrationError::InvalidInput(format!(
                "unknown engine '{}', expected 'durable' or 'queue'",
                other
            ))),
        }
    }
}

/// Reference to one submitted execution.
///
/// Rendered to callers as a qualified id, `<engine>:<execution_id>`, so the
/// owning engine travels with the id and status lookups never have to guess.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionHandle {
    /// Engine-scoped execution id.
    pub execution_id: ExecutionId,
    /// Engine that accepted the execution.
    pub engine: EngineKind,
    /// Descriptor the execution was created from.
    pub task_id: TaskId,
}

impl ExecutionHandle {
    pub fn new(execution_id: ExecutionId, engine: EngineKind, task_id: TaskId) -> Self {
        Self {
            execution_id,
            engine,
            task_id,
        }
    }

    /// Engine-qualified id handed back to callers.
    pub fn qualified_id(&self) -> String {
        format!("{}:{}", self.engine, self.execution_id)
    }

    /// Split a qualified id into engine and raw execution id.
    ///
    /// Returns `None` for legacy ids that carry no engine prefix.
    pub fn parse_qualified(id: &str) -> Option<(EngineKind, ExecutionId)> {
        let (prefix, raw) = id.split_once(':')?;
        let engine = match prefix {
            "durable" => EngineKind::Durable,
            "queue" => EngineKind::Queue,
            _ => return None,
        };
        if raw.is_empty() {
            return None;
        }
        Some((engine, ExecutionId::new(raw)))
    }
}

impl fmt::Display for ExecutionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.engine, self.execution_id)
    }
}

/// Snapshot of an execution in canonical terms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStatus {
    pub execution_id: ExecutionId,
    pub engine: EngineKind,
    pub status: JobStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl ExecutionStatus {
    pub fn new(
        execution_id: ExecutionId,
        engine: EngineKind,
        status: JobStatus,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            execution_id,
            engine,
            status,
            start_time,
            end_time: None,
            error: None,
        }
    }

    /// Builder method to set the close time.
    pub fn with_end_time(mut self, end_time: Option<DateTime<Utc>>) -> Self {
        self.end_time = end_time;
        self
    }

    /// Builder method to attach an error message.
    pub fn with_error(mut self, error: Option<String>) -> Self {
        self.error = error;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualified_id_round_trip() {
        let handle = ExecutionHandle::new(
            ExecutionId::new("analyze-project-1"),
            EngineKind::Durable,
            TaskId::generate(),
        );
        assert_eq!(handle.qualified_id(), "durable:analyze-project-1");
        assert_eq!(handle.to_string(), handle.qualified_id());

        let (engine, raw) = ExecutionHandle::parse_qualified(&handle.qualified_id()).unwrap();
        assert_eq!(engine, EngineKind::Durable);
        assert_eq!(raw.as_str(), "analyze-project-1");
    }

    #[test]
    fn test_parse_legacy_ids() {
        assert!(ExecutionHandle::parse_qualified("17").is_none());
        assert!(ExecutionHandle::parse_qualified("redis:17").is_none());
        assert!(ExecutionHandle::parse_qualified("queue:").is_none());

        let (engine, raw) = ExecutionHandle::parse_qualified("queue:a:b").unwrap();
        assert_eq!(engine, EngineKind::Queue);
        assert_eq!(raw.as_str(), "a:b");
    }

    #[test]
    fn test_engine_kind_from_str() {
        assert_eq!("Durable".parse::<EngineKind>().unwrap(), EngineKind::Durable);
        assert_eq!("queue".parse::<EngineKind>().unwrap(), EngineKind::Queue);
        assert!("n8n".parse::<EngineKind>().is_err());
    }
}
