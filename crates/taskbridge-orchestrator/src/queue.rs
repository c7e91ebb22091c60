//! Orchestration port bound to a priority/retry job queue.
//!
//! Each queue gets one dispatch loop that hands jobs to a bounded pool of
//! processors. Failed attempts go back to the broker, which owns retries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use taskbridge_core::{
    EngineKind, ExecutionHandle, ExecutionId, ExecutionStatus, HandlerError, JobStatus,
    OrchestrationError, OrchestrationResult, TaskContext, TaskDescriptor, WorkflowDefinition,
};
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::QueueAdapterConfig;
use crate::engine::{
    ActiveJob, EngineError, FailureDisposition, JobCounts, JobOptions, JobRecord, JobState,
    QueueBroker, RemoveOutcome,
};
use crate::port::{connect_with_retry, wait_with_timeout, OrchestrationPort};

type HandlerMap = Arc<RwLock<HashMap<String, WorkflowDefinition>>>;

/// Pause before asking for the next job after a transient broker error.
const DISPATCH_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Map a native job state onto the canonical status.
pub fn map_job_state(state: JobState) -> JobStatus {
    match state {
        JobState::Waiting | JobState::Delayed => JobStatus::Pending,
        JobState::Active => JobStatus::Running,
        JobState::Completed => JobStatus::Completed,
        JobState::Failed => JobStatus::Failed,
        JobState::Paused | JobState::Unknown => JobStatus::Running,
    }
}

/// Cancellations the adapter remembers on behalf of the broker.
#[derive(Debug, Clone, Copy)]
enum Cancellation {
    /// Removed before it ran; the broker no longer knows the job.
    Removed {
        created_at: DateTime<Utc>,
        removed_at: DateTime<Utc>,
    },
    /// Cancellation token raised while the job was active.
    Requested,
}

#[derive(Default)]
struct Lifecycle {
    initialized: bool,
    shut_down: bool,
    dispatchers: HashMap<String, JoinHandle<()>>,
}

/// [`OrchestrationPort`] over a [`QueueBroker`].
pub struct LightweightQueueAdapter<B: QueueBroker> {
    broker: Arc<B>,
    config: QueueAdapterConfig,
    handlers: HandlerMap,
    cancellations: RwLock<HashMap<String, Cancellation>>,
    lifecycle: Mutex<Lifecycle>,
    shutdown: CancellationToken,
}

impl<B: QueueBroker> LightweightQueueAdapter<B> {
    pub fn new(broker: Arc<B>, config: QueueAdapterConfig) -> Self {
        Self {
            broker,
            config,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            cancellations: RwLock::new(HashMap::new()),
            lifecycle: Mutex::new(Lifecycle::default()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &QueueAdapterConfig {
        &self.config
    }

    /// Job counts of `queue` by native state.
    pub async fn queue_counts(&self, queue: &str) -> OrchestrationResult<JobCounts> {
        self.initialize().await?;
        self.broker
            .job_counts(queue)
            .await
            .map_err(Self::engine_error)
    }

    async fn ensure_dispatcher(&self, queue: &str) {
        let mut lifecycle = self.lifecycle.lock().await;
        if !lifecycle.shut_down {
            self.spawn_dispatcher(&mut lifecycle, queue);
        }
    }

    fn spawn_dispatcher(&self, lifecycle: &mut Lifecycle, queue: &str) {
        if lifecycle.dispatchers.contains_key(queue) {
            return;
        }
        let handle = tokio::spawn(run_dispatcher(
            Arc::clone(&self.broker),
            Arc::clone(&self.handlers),
            queue.to_string(),
            self.config.concurrency.max(1),
            self.shutdown.clone(),
        ));
        lifecycle.dispatchers.insert(queue.to_string(), handle);
    }

    async fn cancellation(&self, job_id: &str) -> Option<Cancellation> {
        self.cancellations.read().await.get(job_id).copied()
    }

    /// Canonical status, with remembered cancellations taking precedence
    /// over a failure they caused.
    async fn effective_status(&self, record: &JobRecord) -> JobStatus {
        let status = map_job_state(record.state);
        match self.cancellation(&record.id).await {
            Some(Cancellation::Requested) if status == JobStatus::Failed => JobStatus::Cancelled,
            _ => status,
        }
    }

    /// Drop a `Requested` entry once the job completed anyway; it can no
    /// longer change the reported outcome. Entries for failed jobs stay so the
    /// failure keeps reading as CANCELLED.
    async fn settle_cancellation(&self, record: &JobRecord) {
        if record.state != JobState::Completed {
            return;
        }
        let mut cancellations = self.cancellations.write().await;
        if let Some(Cancellation::Requested) = cancellations.get(&record.id) {
            cancellations.remove(&record.id);
            debug!(job_id = %record.id, "Job completed despite cancellation request");
        }
    }

    fn removed_error(execution_id: &ExecutionId) -> OrchestrationError {
        OrchestrationError::ExecutionFailed {
            execution_id: execution_id.to_string(),
            status: JobStatus::Cancelled,
            reason: "job removed before it ran".to_string(),
        }
    }

    fn engine_error(e: EngineError) -> OrchestrationError {
        e.into_orchestration(EngineKind::Queue)
    }
}

#[async_trait]
impl<B: QueueBroker> OrchestrationPort for LightweightQueueAdapter<B> {
    fn engine(&self) -> EngineKind {
        EngineKind::Queue
    }

    async fn initialize(&self) -> OrchestrationResult<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.shut_down {
            return Err(OrchestrationError::EngineUnavailable {
                engine: EngineKind::Queue,
                reason: "adapter is shut down".to_string(),
            });
        }
        if lifecycle.initialized {
            return Ok(());
        }

        let broker = Arc::clone(&self.broker);
        connect_with_retry(
            EngineKind::Queue,
            self.config.connect_attempts,
            self.config.connect_retry_delay(),
            || {
                let broker = Arc::clone(&broker);
                async move { broker.connect().await }
            },
        )
        .await?;

        let mut queues = self.config.queues.clone();
        queues.push(self.config.default_queue.clone());
        for queue in &queues {
            self.spawn_dispatcher(&mut lifecycle, queue);
        }
        lifecycle.initialized = true;

        info!(
            queues = lifecycle.dispatchers.len(),
            concurrency = self.config.concurrency,
            "Queue adapter initialized"
        );
        Ok(())
    }

    async fn register_workflow(&self, definition: WorkflowDefinition) -> OrchestrationResult<()> {
        info!(job_name = %definition.name, "Registering job handler");
        self.handlers
            .write()
            .await
            .insert(definition.name.clone(), definition);
        Ok(())
    }

    async fn submit_task(&self, descriptor: &TaskDescriptor) -> OrchestrationResult<ExecutionHandle> {
        self.initialize().await?;

        let queue = descriptor
            .routing
            .queue_name
            .clone()
            .unwrap_or_else(|| self.config.default_queue.clone());
        self.ensure_dispatcher(&queue).await;

        let policy = descriptor.retry_policy;
        let options = JobOptions {
            priority: descriptor.priority,
            attempts: policy.max_attempts.max(1),
            backoff_delay_ms: policy.base_delay_ms,
            backoff_max_ms: policy.max_delay_ms,
            job_id: descriptor
                .requested_execution_id
                .as_ref()
                .map(|id| id.to_string()),
            timeout: descriptor.timeout(),
        };
        let job_id = self
            .broker
            .add_job(&queue, &descriptor.task_type, descriptor.payload.clone(), options)
            .await
            .map_err(Self::engine_error)?;

        info!(
            task_id = %descriptor.id,
            job_id = %job_id,
            queue = %queue,
            job_name = %descriptor.task_type,
            priority = descriptor.priority,
            "Job enqueued"
        );
        Ok(ExecutionHandle::new(
            ExecutionId::new(job_id),
            EngineKind::Queue,
            descriptor.id.clone(),
        ))
    }

    async fn get_status(&self, execution_id: &ExecutionId) -> OrchestrationResult<ExecutionStatus> {
        self.initialize().await?;
        if let Some(Cancellation::Removed {
            created_at,
            removed_at,
        }) = self.cancellation(execution_id.as_str()).await
        {
            return Ok(ExecutionStatus::new(
                execution_id.clone(),
                EngineKind::Queue,
                JobStatus::Cancelled,
                created_at,
            )
            .with_end_time(Some(removed_at)));
        }

        let record = self
            .broker
            .get_job(execution_id.as_str())
            .await
            .map_err(Self::engine_error)?;
        self.settle_cancellation(&record).await;
        let status = self.effective_status(&record).await;
        let error = if record.state == JobState::Failed {
            record.failed_reason.clone()
        } else {
            None
        };

        Ok(ExecutionStatus::new(
            execution_id.clone(),
            EngineKind::Queue,
            status,
            record.created_at,
        )
        .with_end_time(record.finished_on)
        .with_error(error))
    }

    /// Remove a waiting or delayed job, or raise the cancellation token of an
    /// active one.
    ///
    /// Cancelling an active job is best effort: the processor may ignore the
    /// token and still complete the job.
    async fn cancel(&self, execution_id: &ExecutionId) -> OrchestrationResult<bool> {
        self.initialize().await?;
        if let Some(Cancellation::Removed { .. }) = self.cancellation(execution_id.as_str()).await {
            return Ok(false);
        }

        let record = self
            .broker
            .get_job(execution_id.as_str())
            .await
            .map_err(Self::engine_error)?;
        let outcome = self
            .broker
            .remove_job(execution_id.as_str())
            .await
            .map_err(Self::engine_error)?;

        let cancellation = match outcome {
            RemoveOutcome::Removed => Cancellation::Removed {
                created_at: record.created_at,
                removed_at: Utc::now(),
            },
            RemoveOutcome::CancellationRequested => Cancellation::Requested,
            RemoveOutcome::AlreadyFinished => return Ok(false),
        };
        self.cancellations
            .write()
            .await
            .insert(execution_id.to_string(), cancellation);

        debug!(job_id = %execution_id, outcome = ?outcome, "Job cancellation applied");
        Ok(true)
    }

    async fn signal(
        &self,
        _execution_id: &ExecutionId,
        _name: &str,
        _payload: Value,
    ) -> OrchestrationResult<()> {
        Err(OrchestrationError::UnsupportedOperation {
            engine: EngineKind::Queue,
            operation: "signal",
        })
    }

    async fn get_result(
        &self,
        execution_id: &ExecutionId,
        timeout: Option<Duration>,
    ) -> OrchestrationResult<Value> {
        self.initialize().await?;
        if let Some(Cancellation::Removed { .. }) = self.cancellation(execution_id.as_str()).await {
            return Err(Self::removed_error(execution_id));
        }

        let awaited = wait_with_timeout(execution_id, timeout, async {
            self.broker
                .await_job(execution_id.as_str())
                .await
                .map_err(Self::engine_error)
        })
        .await;
        let record = match awaited {
            Ok(record) => record,
            Err(e) if e.is_not_found() => {
                // removed while we were waiting
                return match self.cancellation(execution_id.as_str()).await {
                    Some(Cancellation::Removed { .. }) => Err(Self::removed_error(execution_id)),
                    _ => Err(e),
                };
            }
            Err(e) => return Err(e),
        };

        if record.state == JobState::Completed {
            self.settle_cancellation(&record).await;
            return Ok(record.return_value.unwrap_or(Value::Null));
        }
        let status = self.effective_status(&record).await;
        Err(OrchestrationError::ExecutionFailed {
            execution_id: execution_id.to_string(),
            status,
            reason: record
                .failed_reason
                .unwrap_or_else(|| format!("job ended {}", status)),
        })
    }

    async fn shutdown(&self) {
        let dispatchers = {
            let mut lifecycle = self.lifecycle.lock().await;
            if lifecycle.shut_down {
                return;
            }
            lifecycle.shut_down = true;
            std::mem::take(&mut lifecycle.dispatchers)
        };

        self.shutdown.cancel();
        self.broker.close().await;
        for (queue, handle) in dispatchers {
            if let Err(e) = handle.await {
                error!(queue = %queue, error = %e, "Queue dispatcher panicked");
            }
        }
        info!("Queue adapter shut down");
    }
}

/// Feed jobs from `queue` to at most `concurrency` processors until shutdown.
async fn run_dispatcher<B: QueueBroker>(
    broker: Arc<B>,
    handlers: HandlerMap,
    queue: String,
    concurrency: usize,
    shutdown: CancellationToken,
) {
    info!(queue = %queue, concurrency, "Queue dispatcher started");
    let permits = Arc::new(Semaphore::new(concurrency));
    let mut processors = JoinSet::new();

    loop {
        let permit = tokio::select! {
            _ = shutdown.cancelled() => break,
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let job = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = broker.next_job(&queue) => match next {
                Ok(job) => job,
                Err(EngineError::Closed) => break,
                Err(e) => {
                    warn!(queue = %queue, error = %e, "Fetching next job failed");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(DISPATCH_ERROR_BACKOFF) => continue,
                    }
                }
            },
        };

        let broker = Arc::clone(&broker);
        let handlers = Arc::clone(&handlers);
        processors.spawn(async move {
            process_job(broker.as_ref(), &handlers, job).await;
            drop(permit);
        });

        while let Some(joined) = processors.try_join_next() {
            if let Err(e) = joined {
                error!(queue = %queue, error = %e, "Job processor panicked");
            }
        }
    }

    processors.shutdown().await;
    info!(queue = %queue, "Queue dispatcher stopped");
}

/// Run one attempt of `job` and report the outcome to the broker.
async fn process_job<B: QueueBroker>(broker: &B, handlers: &HandlerMap, job: ActiveJob) {
    let definition = handlers.read().await.get(&job.name).cloned();
    let Some(definition) = definition else {
        warn!(job_id = %job.id, job_name = %job.name, "No handler registered for job");
        let reason = format!("no handler registered for job '{}'", job.name);
        if let Err(e) = broker.fail_job(&job.id, &reason, false).await {
            warn!(job_id = %job.id, error = %e, "Failed to report job failure");
        }
        return;
    };

    debug!(job_id = %job.id, job_name = %job.name, attempt = job.attempt, "Processing job");
    let ctx = TaskContext::new(
        ExecutionId::new(job.id.clone()),
        EngineKind::Queue,
        job.name.clone(),
        job.data.clone(),
        job.attempt,
        job.cancellation.clone(),
    );
    let handler = definition.handler();
    let result = match job.timeout {
        Some(limit) => tokio::time::timeout(limit, handler.handle(ctx))
            .await
            .unwrap_or_else(|_| {
                Err(HandlerError::Failed(format!(
                    "job timed out after {}ms",
                    limit.as_millis()
                )))
            }),
        None => handler.handle(ctx).await,
    };

    let reported = match result {
        Ok(value) => broker.complete_job(&job.id, value).await.map(|_| None),
        Err(HandlerError::Cancelled) => broker
            .fail_job(&job.id, "cancelled", false)
            .await
            .map(Some),
        Err(HandlerError::Failed(reason)) => {
            broker.fail_job(&job.id, &reason, true).await.map(Some)
        }
    };

    match reported {
        Ok(None) => debug!(job_id = %job.id, "Job completed"),
        Ok(Some(FailureDisposition::RetryScheduled { delay })) => {
            debug!(job_id = %job.id, delay_ms = delay.as_millis() as u64, "Job will be retried")
        }
        Ok(Some(FailureDisposition::Failed)) => debug!(job_id = %job.id, "Job failed"),
        Err(e) => warn!(job_id = %job.id, error = %e, "Failed to report job outcome"),
    }
}
