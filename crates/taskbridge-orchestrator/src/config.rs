//! Orchestrator configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use taskbridge_core::{ClassificationPolicy, OrchestrationError, RuntimeConfig};

/// Durable adapter configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DurableAdapterConfig {
    /// Engine namespace.
    pub namespace: String,

    /// Task queues that get a worker at initialize.
    pub task_queues: Vec<String>,

    /// Task queue used when a descriptor names none.
    pub default_task_queue: String,

    /// Connection attempts before giving up.
    pub connect_attempts: u32,

    /// Fixed delay between connection attempts (milliseconds).
    pub connect_retry_delay_ms: u64,
}

impl Default for DurableAdapterConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            task_queues: Vec::new(),
            default_task_queue: "default-task-queue".to_string(),
            connect_attempts: 3,
            connect_retry_delay_ms: 500,
        }
    }
}

impl DurableAdapterConfig {
    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.connect_retry_delay_ms)
    }
}

/// Queue adapter configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueAdapterConfig {
    /// Queue used when a descriptor names none.
    pub default_queue: String,

    /// Queues that get a dispatch loop at initialize.
    pub queues: Vec<String>,

    /// Concurrent processors per queue.
    pub concurrency: usize,

    /// Connection attempts before giving up.
    pub connect_attempts: u32,

    /// Fixed delay between connection attempts (milliseconds).
    pub connect_retry_delay_ms: u64,
}

impl Default for QueueAdapterConfig {
    fn default() -> Self {
        Self {
            default_queue: "default".to_string(),
            queues: Vec::new(),
            concurrency: 4,
            connect_attempts: 3,
            connect_retry_delay_ms: 500,
        }
    }
}

impl QueueAdapterConfig {
    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.connect_retry_delay_ms)
    }
}

/// Top-level configuration of the orchestration server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// HTTP server bind address.
    pub http_bind_addr: String,

    pub durable: DurableAdapterConfig,

    pub queue: QueueAdapterConfig,

    /// How the bridge treats tasks without an explicit complexity flag.
    pub classification_policy: ClassificationPolicy,

    /// Retry and logging settings for agent runtimes.
    pub runtime: RuntimeConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            http_bind_addr: "127.0.0.1:8080".to_string(),
            durable: DurableAdapterConfig::default(),
            queue: QueueAdapterConfig::default(),
            classification_policy: ClassificationPolicy::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Parse and validate a JSON document; missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self, OrchestrationError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| OrchestrationError::InvalidInput(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), OrchestrationError> {
        self.runtime.validate()?;
        if self.queue.concurrency == 0 {
            return Err(OrchestrationError::InvalidInput(
                "queue concurrency must be at least 1".to_string(),
            ));
        }
        if self.durable.connect_attempts == 0 || self.queue.connect_attempts == 0 {
            return Err(OrchestrationError::InvalidInput(
                "connect_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
