//! TaskBridge orchestration layer.
//!
//! Routes task descriptors to a durable workflow engine or a lightweight job
//! queue and exposes one status/cancel/signal contract over both:
//! - [`port::OrchestrationPort`]: the contract every engine adapter implements
//! - [`durable::DurableEngineAdapter`] and [`queue::LightweightQueueAdapter`]
//! - [`bridge::OrchestratorBridge`]: the caller-facing façade
//! - [`engine`]: native engine boundary plus in-memory engines

pub mod bridge;
pub mod config;
pub mod durable;
pub mod engine;
pub mod events;
pub mod http;
pub mod metrics;
pub mod port;
pub mod queue;

pub use bridge::{BridgeMetrics, OrchestratorBridge, TRACKING_JOB_NAME};
pub use config::{DurableAdapterConfig, OrchestratorConfig, QueueAdapterConfig};
pub use durable::DurableEngineAdapter;
pub use engine::{InMemoryDurableEngine, InMemoryQueueBroker};
pub use events::{OrchestrationEvent, OrchestrationEventKind};
pub use port::OrchestrationPort;
pub use queue::LightweightQueueAdapter;
