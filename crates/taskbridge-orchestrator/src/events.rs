//! Bridge-scoped orchestration events.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use taskbridge_core::{Classification, EngineKind, EventId};

/// Something the bridge did on a caller's behalf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationEvent {
    pub id: EventId,
    /// Unix timestamp (milliseconds) when the event occurred.
    pub timestamp_ms: i64,
    pub kind: OrchestrationEventKind,
}

/// What happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrchestrationEventKind {
    Scheduled {
        execution_id: String,
        task_type: String,
        classification: Classification,
    },
    TrackingRecorded {
        workflow_id: String,
        queue: String,
        job_id: String,
    },
    Cancelled {
        execution_id: String,
        engine: EngineKind,
    },
    Signalled {
        execution_id: String,
        signal: String,
    },
    WorkflowRegistered {
        name: String,
    },
}

impl OrchestrationEvent {
    pub fn new(kind: OrchestrationEventKind) -> Self {
        Self {
            id: EventId::generate(),
            timestamp_ms: Utc::now().timestamp_millis(),
            kind,
        }
    }

    pub fn scheduled(execution_id: &str, task_type: &str, classification: Classification) -> Self {
        Self::new(OrchestrationEventKind::Scheduled {
            execution_id: execution_id.to_string(),
            task_type: task_type.to_string(),
            classification,
        })
    }

    pub fn tracking_recorded(workflow_id: &str, queue: &str, job_id: &str) -> Self {
        Self::new(OrchestrationEventKind::TrackingRecorded {
            workflow_id: workflow_id.to_string(),
            queue: queue.to_string(),
            job_id: job_id.to_string(),
        })
    }

    pub fn cancelled(execution_id: &str, engine: EngineKind) -> Self {
        Self::new(OrchestrationEventKind::Cancelled {
            execution_id: execution_id.to_string(),
            engine,
        })
    }

    pub fn signalled(execution_id: &str, signal: &str) -> Self {
        Self::new(OrchestrationEventKind::Signalled {
            execution_id: execution_id.to_string(),
            signal: signal.to_string(),
        })
    }

    pub fn workflow_registered(name: &str) -> Self {
        Self::new(OrchestrationEventKind::WorkflowRegistered {
            name: name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialized_shape() {
        let event = OrchestrationEvent::cancelled("queue:17", EngineKind::Queue);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"]["type"], "CANCELLED");
        assert_eq!(json["kind"]["engine"], "queue");
        assert_eq!(json["kind"]["execution_id"], "queue:17");
        assert!(event.timestamp_ms > 0);
    }

    #[test]
    fn test_timestamp_is_wall_clock_millis() {
        let before = Utc::now().timestamp_millis();
        let event = OrchestrationEvent::workflow_registered("send-email");
        let after = Utc::now().timestamp_millis();
        assert!(event.timestamp_ms >= before && event.timestamp_ms <= after);
    }
}
