//! Caller-facing orchestration façade.
//!
//! Classifies incoming work, routes it to the durable engine or the job
//! queue and resolves status, cancel and signal calls against the engine an
//! execution id belongs to.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use taskbridge_core::{
    Classification, ClassificationPolicy, EngineKind, EventEmitter, ExecutionHandle, ExecutionId,
    ExecutionStatus, OrchestrationError, OrchestrationResult, RetryPolicy, Routing,
    TaskDescriptor, TaskOptions, WorkflowDefinition,
};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::events::OrchestrationEvent;
use crate::port::OrchestrationPort;

/// Job name of the tracking records enqueued for durable executions.
pub const TRACKING_JOB_NAME: &str = "workflow-tracking";

/// Where a caller-supplied id points.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    /// Engine known from the qualified id or the caller's hint.
    Engine(EngineKind, ExecutionId),
    /// Legacy unqualified id; probe durable, then queue.
    Unknown(ExecutionId),
}

#[derive(Debug, Default)]
struct Counters {
    scheduled_durable: AtomicU64,
    scheduled_queue: AtomicU64,
    tracking_recorded: AtomicU64,
    tracking_failed: AtomicU64,
    cancelled: AtomicU64,
    signals: AtomicU64,
    legacy_probes: AtomicU64,
}

/// Point-in-time copy of the bridge counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeMetrics {
    pub scheduled_durable: u64,
    pub scheduled_queue: u64,
    pub tracking_recorded: u64,
    pub tracking_failed: u64,
    pub cancelled: u64,
    pub signals: u64,
    pub legacy_probes: u64,
    pub registered_workflows: u64,
}

/// Single entry point over both engine adapters.
pub struct OrchestratorBridge {
    durable: Arc<dyn OrchestrationPort>,
    queue: Arc<dyn OrchestrationPort>,
    workflows: RwLock<HashMap<String, WorkflowDefinition>>,
    policy: ClassificationPolicy,
    events: EventEmitter<OrchestrationEvent>,
    counters: Counters,
}

impl OrchestratorBridge {
    pub fn new(durable: Arc<dyn OrchestrationPort>, queue: Arc<dyn OrchestrationPort>) -> Self {
        Self {
            durable,
            queue,
            workflows: RwLock::new(HashMap::new()),
            policy: ClassificationPolicy::default(),
            events: EventEmitter::default(),
            counters: Counters::default(),
        }
    }

    /// Builder method to set how missing complexity flags are treated.
    pub fn with_policy(mut self, policy: ClassificationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Builder method to publish events on a shared emitter.
    pub fn with_events(mut self, events: EventEmitter<OrchestrationEvent>) -> Self {
        self.events = events;
        self
    }

    pub fn policy(&self) -> ClassificationPolicy {
        self.policy
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestrationEvent> {
        self.events.subscribe()
    }

    /// Initialize both adapters.
    pub async fn initialize(&self) -> OrchestrationResult<()> {
        self.durable.initialize().await?;
        self.queue.initialize().await?;
        info!("Orchestrator bridge initialized");
        Ok(())
    }

    /// Shut both adapters down. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        self.durable.shutdown().await;
        self.queue.shutdown().await;
        info!("Orchestrator bridge shut down");
    }

    /// Register a definition with the bridge and both adapters.
    /// A later registration under the same name replaces the earlier one.
    pub async fn register_workflow(&self, definition: WorkflowDefinition) -> OrchestrationResult<()> {
        let name = definition.name.clone();
        self.durable.register_workflow(definition.clone()).await?;
        self.queue.register_workflow(definition.clone()).await?;
        let replaced = self
            .workflows
            .write()
            .await
            .insert(name.clone(), definition)
            .is_some();

        info!(name = %name, replaced, "Workflow registered");
        self.events.emit(OrchestrationEvent::workflow_registered(&name));
        Ok(())
    }

    /// Names of every registered workflow, sorted.
    pub async fn workflow_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.workflows.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Classify, route and submit a unit of work.
    pub async fn schedule(
        &self,
        task_type: &str,
        payload: Value,
        options: TaskOptions,
    ) -> OrchestrationResult<ExecutionHandle> {
        if task_type.trim().is_empty() {
            return Err(OrchestrationError::InvalidInput(
                "task type must not be empty".to_string(),
            ));
        }

        let classification = self.policy.apply(task_type, &options)?;
        let descriptor = TaskDescriptor::from_options(task_type, payload, classification, &options);
        let handle = match classification {
            Classification::Complex => {
                let handle = self.durable.submit_task(&descriptor).await?;
                self.counters.scheduled_durable.fetch_add(1, Ordering::Relaxed);
                if let Some(queue) = descriptor.routing.tracking_queue.as_deref() {
                    self.record_tracking(&descriptor, &handle, queue).await;
                }
                handle
            }
            Classification::Simple => {
                let handle = self.queue.submit_task(&descriptor).await?;
                self.counters.scheduled_queue.fetch_add(1, Ordering::Relaxed);
                handle
            }
        };

        let qualified = handle.qualified_id();
        info!(
            task_id = %descriptor.id,
            task_type = %task_type,
            classification = ?classification,
            execution_id = %qualified,
            "Task scheduled"
        );
        self.events.emit(OrchestrationEvent::scheduled(
            &qualified,
            task_type,
            classification,
        ));
        Ok(handle)
    }

    pub async fn get_task_status(
        &self,
        id: &str,
        hint: Option<EngineKind>,
    ) -> OrchestrationResult<ExecutionStatus> {
        match self.resolve(id, hint)? {
            Target::Engine(engine, raw) => self.port(engine).get_status(&raw).await,
            Target::Unknown(raw) => {
                self.probe(id, |port| {
                    let raw = raw.clone();
                    async move { port.get_status(&raw).await }
                })
                .await
            }
        }
    }

    /// Request cooperative cancellation. Returns false if the execution is
    /// already terminal.
    pub async fn cancel_task(&self, id: &str, hint: Option<EngineKind>) -> OrchestrationResult<bool> {
        let (engine, cancelled) = match self.resolve(id, hint)? {
            Target::Engine(engine, raw) => (engine, self.port(engine).cancel(&raw).await?),
            Target::Unknown(raw) => {
                self.probe(id, |port| {
                    let raw = raw.clone();
                    async move { Ok::<_, OrchestrationError>((port.engine(), port.cancel(&raw).await?)) }
                })
                .await?
            }
        };

        if cancelled {
            self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
            self.events.emit(OrchestrationEvent::cancelled(id, engine));
        }
        info!(execution_id = %id, engine = %engine, cancelled, "Cancel requested");
        Ok(cancelled)
    }

    /// Deliver a signal to a durable execution. Queue executions reject it.
    pub async fn signal_workflow(&self, id: &str, name: &str, payload: Value) -> OrchestrationResult<()> {
        if name.trim().is_empty() {
            return Err(OrchestrationError::InvalidInput(
                "signal name must not be empty".to_string(),
            ));
        }

        match self.resolve(id, None)? {
            Target::Engine(engine, raw) => self.port(engine).signal(&raw, name, payload).await?,
            Target::Unknown(raw) => match self.durable.signal(&raw, name, payload.clone()).await {
                Err(e) if e.is_not_found() => {
                    self.counters.legacy_probes.fetch_add(1, Ordering::Relaxed);
                    // surfaces NotFound, or Unsupported for a queue job
                    self.queue
                        .get_status(&raw)
                        .await
                        .map_err(|e| self.not_found_as(id, e))?;
                    self.queue.signal(&raw, name, payload).await?
                }
                other => other?,
            },
        }

        self.counters.signals.fetch_add(1, Ordering::Relaxed);
        self.events.emit(OrchestrationEvent::signalled(id, name));
        debug!(execution_id = %id, signal = %name, "Signal sent");
        Ok(())
    }

    /// Wait for an execution to finish and return its value.
    pub async fn get_result(
        &self,
        id: &str,
        hint: Option<EngineKind>,
        timeout: Option<Duration>,
    ) -> OrchestrationResult<Value> {
        let (engine, raw) = match self.resolve(id, hint)? {
            Target::Engine(engine, raw) => (engine, raw),
            Target::Unknown(raw) => {
                let status = self
                    .probe(id, |port| {
                        let raw = raw.clone();
                        async move { port.get_status(&raw).await }
                    })
                    .await?;
                (status.engine, raw)
            }
        };
        self.port(engine).get_result(&raw, timeout).await
    }

    /// Snapshot of the bridge counters.
    pub async fn metrics(&self) -> BridgeMetrics {
        BridgeMetrics {
            scheduled_durable: self.counters.scheduled_durable.load(Ordering::Relaxed),
            scheduled_queue: self.counters.scheduled_queue.load(Ordering::Relaxed),
            tracking_recorded: self.counters.tracking_recorded.load(Ordering::Relaxed),
            tracking_failed: self.counters.tracking_failed.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
            signals: self.counters.signals.load(Ordering::Relaxed),
            legacy_probes: self.counters.legacy_probes.load(Ordering::Relaxed),
            registered_workflows: self.workflows.read().await.len() as u64,
        }
    }

    fn port(&self, engine: EngineKind) -> &Arc<dyn OrchestrationPort> {
        match engine {
            EngineKind::Durable => &self.durable,
            EngineKind::Queue => &self.queue,
        }
    }

    fn resolve(&self, id: &str, hint: Option<EngineKind>) -> OrchestrationResult<Target> {
        if id.trim().is_empty() {
            return Err(OrchestrationError::InvalidInput(
                "execution id must not be empty".to_string(),
            ));
        }

        match (ExecutionHandle::parse_qualified(id), hint) {
            (Some((engine, _)), Some(hinted)) if engine != hinted => {
                Err(OrchestrationError::InvalidInput(format!(
                    "execution id '{}' belongs to engine '{}', not '{}'",
                    id, engine, hinted
                )))
            }
            (Some((engine, raw)), _) => Ok(Target::Engine(engine, raw)),
            (None, Some(hinted)) => Ok(Target::Engine(hinted, ExecutionId::new(id))),
            (None, None) => Ok(Target::Unknown(ExecutionId::new(id))),
        }
    }

    /// Run `op` against durable, then queue when durable does not know the id.
    async fn probe<T, F, Fut>(&self, id: &str, op: F) -> OrchestrationResult<T>
    where
        F: Fn(Arc<dyn OrchestrationPort>) -> Fut,
        Fut: Future<Output = OrchestrationResult<T>>,
    {
        self.counters.legacy_probes.fetch_add(1, Ordering::Relaxed);
        match op(Arc::clone(&self.durable)).await {
            Err(e) if e.is_not_found() => {
                debug!(execution_id = %id, "Not a durable execution, probing queue");
                op(Arc::clone(&self.queue))
                    .await
                    .map_err(|e| self.not_found_as(id, e))
            }
            other => other,
        }
    }

    /// Report a not-found under the id the caller used.
    fn not_found_as(&self, id: &str, e: OrchestrationError) -> OrchestrationError {
        if e.is_not_found() {
            OrchestrationError::ExecutionNotFound(id.to_string())
        } else {
            e
        }
    }

    async fn record_tracking(&self, descriptor: &TaskDescriptor, handle: &ExecutionHandle, queue: &str) {
        let workflow_type = descriptor
            .routing
            .workflow_type
            .clone()
            .unwrap_or_else(|| descriptor.task_type.clone());
        let record = json!({
            "workflowId": handle.execution_id.as_str(),
            "workflowType": workflow_type,
            "status": "STARTED",
            "payload": descriptor.payload,
        });
        let tracking = TaskDescriptor::new(TRACKING_JOB_NAME, record, Classification::Simple)
            .with_routing(Routing {
                queue_name: Some(queue.to_string()),
                ..Routing::default()
            })
            .with_retry_policy(RetryPolicy::single_attempt());

        match self.queue.submit_task(&tracking).await {
            Ok(job) => {
                self.counters.tracking_recorded.fetch_add(1, Ordering::Relaxed);
                self.events.emit(OrchestrationEvent::tracking_recorded(
                    handle.execution_id.as_str(),
                    queue,
                    job.execution_id.as_str(),
                ));
            }
            Err(e) => {
                self.counters.tracking_failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    execution_id = %handle.execution_id,
                    queue = %queue,
                    error = %e,
                    "Failed to record workflow tracking"
                );
            }
        }
    }
}
