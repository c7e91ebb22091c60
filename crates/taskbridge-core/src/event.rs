//! Agent lifecycle events.

use crate::ids::EventId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An event emitted by an agent runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEvent {
    /// Unique event identifier.
    pub id: EventId,
    /// Job the runtime is executing.
    pub job_id: String,
    /// Stable id of the agent kind.
    pub agent: String,
    /// Type of event.
    pub event_type: AgentEventType,
    /// Unix timestamp (milliseconds) when event occurred.
    pub timestamp_ms: i64,
    /// Event-specific metadata (attempt, delay_ms, error, etc.).
    pub metadata: HashMap<String, String>,
}

impl AgentEvent {
    /// Create a new agent event.
    pub fn new(
        job_id: impl Into<String>,
        agent: impl Into<String>,
        event_type: AgentEventType,
        metadata: HashMap<String, String>,
    ) -> Self {
        Self {
            id: EventId::generate(),
            job_id: job_id.into(),
            agent: agent.into(),
            event_type,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            metadata,
        }
    }

    pub fn started(job_id: &str, agent: &str) -> Self {
        Self::new(job_id, agent, AgentEventType::Started, HashMap::new())
    }

    /// Create a Progress event; `percent` is clamped to 100.
    pub fn progress(job_id: &str, agent: &str, percent: u8, message: Option<String>) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("percent".to_string(), percent.min(100).to_string());
        if let Some(m) = message {
            metadata.insert("message".to_string(), m);
        }
        Self::new(job_id, agent, AgentEventType::Progress, metadata)
    }

    /// Create a Retrying event for the upcoming attempt.
    pub fn retrying(job_id: &str, agent: &str, attempt: u32, delay_ms: u64, error: &str) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("attempt".to_string(), attempt.to_string());
        metadata.insert("delay_ms".to_string(), delay_ms.to_string());
        metadata.insert("error".to_string(), error.to_string());
        Self::new(job_id, agent, AgentEventType::Retrying, metadata)
    }

    pub fn completed(job_id: &str, agent: &str, duration_ms: i64) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("duration_ms".to_string(), duration_ms.to_string());
        Self::new(job_id, agent, AgentEventType::Completed, metadata)
    }

    pub fn failed(job_id: &str, agent: &str, error: &str, attempts: u32) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("error".to_string(), error.to_string());
        metadata.insert("attempts".to_string(), attempts.to_string());
        Self::new(job_id, agent, AgentEventType::Failed, metadata)
    }

    pub fn cancelled(job_id: &str, agent: &str) -> Self {
        Self::new(job_id, agent, AgentEventType::Cancelled, HashMap::new())
    }

    pub fn log(job_id: &str, agent: &str, level: &str, message: &str) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("level".to_string(), level.to_string());
        metadata.insert("message".to_string(), message.to_string());
        Self::new(job_id, agent, AgentEventType::Log, metadata)
    }
}

/// Type of agent event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentEventType {
    Started,
    Progress,
    Retrying,
    Completed,
    Failed,
    Cancelled,
    Log,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retrying_event() {
        let event = AgentEvent::retrying("job-1", "diagnostic", 2, 400, "boom");

        assert_eq!(event.event_type, AgentEventType::Retrying);
        assert_eq!(event.metadata.get("attempt"), Some(&"2".to_string()));
        assert_eq!(event.metadata.get("delay_ms"), Some(&"400".to_string()));
        assert_eq!(event.metadata.get("error"), Some(&"boom".to_string()));
        assert!(event.timestamp_ms > 0);
    }

    #[test]
    fn test_progress_clamped() {
        let event = AgentEvent::progress("job-1", "diagnostic", 250, None);
        assert_eq!(event.metadata.get("percent"), Some(&"100".to_string()));
        assert!(!event.metadata.contains_key("message"));
    }
}
