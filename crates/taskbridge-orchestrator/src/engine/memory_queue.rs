//! In-process job queue broker.
//!
//! Dispatches priority-then-FIFO per queue and retries failed attempts with
//! exponential backoff until the job's attempts are spent.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use taskbridge_core::retry::exponential_delay_ms;
use tokio::sync::{watch, Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    ActiveJob, EngineError, FailureDisposition, JobCounts, JobOptions, JobRecord, JobState,
    QueueBroker, RemoveOutcome,
};

/// Heap entry; the highest priority pops first, then the oldest sequence.
#[derive(Debug, PartialEq, Eq)]
struct Pending {
    priority: i32,
    seq: u64,
    job_id: String,
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

struct StoredJob {
    record: JobRecord,
    options: JobOptions,
    cancellation: CancellationToken,
    state_tx: watch::Sender<JobState>,
}

impl StoredJob {
    fn set_state(&mut self, state: JobState) {
        self.record.state = state;
        self.state_tx.send_replace(state);
    }
}

#[derive(Default)]
struct BrokerState {
    jobs: HashMap<String, StoredJob>,
    waiting: HashMap<String, BinaryHeap<Pending>>,
    notifiers: HashMap<String, Arc<Notify>>,
    next_id: u64,
    next_seq: u64,
}

impl BrokerState {
    fn notifier(&mut self, queue: &str) -> Arc<Notify> {
        Arc::clone(
            self.notifiers
                .entry(queue.to_string())
                .or_insert_with(|| Arc::new(Notify::new())),
        )
    }

    fn push_waiting(&mut self, queue: &str, job_id: String, priority: i32) {
        self.next_seq += 1;
        let seq = self.next_seq;
        self.waiting
            .entry(queue.to_string())
            .or_default()
            .push(Pending {
                priority,
                seq,
                job_id,
            });
        self.notifier(queue).notify_one();
    }

    fn job_mut(&mut self, job_id: &str) -> Result<&mut StoredJob, EngineError> {
        self.jobs
            .get_mut(job_id)
            .ok_or_else(|| EngineError::NotFound(job_id.to_string()))
    }
}

/// In-memory [`QueueBroker`].
pub struct InMemoryQueueBroker {
    state: Arc<Mutex<BrokerState>>,
    connected: AtomicBool,
    closed: CancellationToken,
    connect_failures: AtomicU32,
}

impl InMemoryQueueBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            connected: AtomicBool::new(false),
            closed: CancellationToken::new(),
            connect_failures: AtomicU32::new(0),
        }
    }

    /// Simulate an unreachable broker for the next `n` connection attempts.
    pub fn with_connect_failures(self, n: u32) -> Self {
        self.connect_failures.store(n, Ordering::SeqCst);
        self
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.closed.is_cancelled() {
            return Err(EngineError::Closed);
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(EngineError::Connection("not connected".to_string()));
        }
        Ok(())
    }

    /// Move a delayed job back to waiting once its backoff elapses.
    fn schedule_retry(&self, job_id: String, queue: String, priority: i32, delay: Duration) {
        let state = Arc::clone(&self.state);
        let closed = self.closed.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = closed.cancelled() => return,
            }
            let mut state = state.lock().await;
            let promoted = match state.jobs.get_mut(&job_id) {
                Some(job) if job.record.state == JobState::Delayed => {
                    job.set_state(JobState::Waiting);
                    true
                }
                _ => false,
            };
            if promoted {
                debug!(job_id = %job_id, queue = %queue, "Delayed job promoted to waiting");
                state.push_waiting(&queue, job_id, priority);
            }
        });
    }
}

impl Default for InMemoryQueueBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueBroker for InMemoryQueueBroker {
    async fn connect(&self) -> Result<(), EngineError> {
        if self.closed.is_cancelled() {
            return Err(EngineError::Closed);
        }
        let remaining = self.connect_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.connect_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(EngineError::Connection("broker unreachable".to_string()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn add_job(
        &self,
        queue: &str,
        name: &str,
        data: Value,
        options: JobOptions,
    ) -> Result<String, EngineError> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;

        let job_id = match &options.job_id {
            Some(id) => {
                if state.jobs.contains_key(id) {
                    return Err(EngineError::AlreadyExists(id.clone()));
                }
                id.clone()
            }
            None => {
                state.next_id += 1;
                state.next_id.to_string()
            }
        };

        let (state_tx, _) = watch::channel(JobState::Waiting);
        let record = JobRecord {
            id: job_id.clone(),
            queue: queue.to_string(),
            name: name.to_string(),
            data,
            priority: options.priority,
            state: JobState::Waiting,
            attempts_made: 0,
            max_attempts: options.attempts.max(1),
            created_at: Utc::now(),
            processed_on: None,
            finished_on: None,
            failed_reason: None,
            return_value: None,
        };
        let priority = options.priority;
        state.jobs.insert(
            job_id.clone(),
            StoredJob {
                record,
                options,
                cancellation: CancellationToken::new(),
                state_tx,
            },
        );
        state.push_waiting(queue, job_id.clone(), priority);

        debug!(job_id = %job_id, queue = %queue, name = %name, priority, "Job added");
        Ok(job_id)
    }

    async fn get_job(&self, job_id: &str) -> Result<JobRecord, EngineError> {
        self.ensure_open()?;
        let state = self.state.lock().await;
        state
            .jobs
            .get(job_id)
            .map(|job| job.record.clone())
            .ok_or_else(|| EngineError::NotFound(job_id.to_string()))
    }

    async fn remove_job(&self, job_id: &str) -> Result<RemoveOutcome, EngineError> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        let job = state.job_mut(job_id)?;
        let current = job.record.state;
        match current {
            JobState::Active => {
                job.cancellation.cancel();
                Ok(RemoveOutcome::CancellationRequested)
            }
            JobState::Completed | JobState::Failed => Ok(RemoveOutcome::AlreadyFinished),
            _ => {
                // stale heap entries are skipped on dispatch
                state.jobs.remove(job_id);
                info!(job_id = %job_id, "Job removed");
                Ok(RemoveOutcome::Removed)
            }
        }
    }

    async fn next_job(&self, queue: &str) -> Result<ActiveJob, EngineError> {
        loop {
            let notify = {
                self.ensure_open()?;
                let mut state = self.state.lock().await;
                while let Some(pending) = state.waiting.get_mut(queue).and_then(|heap| heap.pop()) {
                    let Some(job) = state.jobs.get_mut(&pending.job_id) else {
                        continue;
                    };
                    if job.record.state != JobState::Waiting {
                        continue;
                    }

                    job.record.attempts_made += 1;
                    job.record.processed_on = Some(Utc::now());
                    job.set_state(JobState::Active);
                    return Ok(ActiveJob {
                        id: job.record.id.clone(),
                        queue: job.record.queue.clone(),
                        name: job.record.name.clone(),
                        data: job.record.data.clone(),
                        attempt: job.record.attempts_made,
                        timeout: job.options.timeout,
                        cancellation: job.cancellation.clone(),
                    });
                }
                state.notifier(queue)
            };

            tokio::select! {
                _ = notify.notified() => {}
                _ = self.closed.cancelled() => return Err(EngineError::Closed),
            }
        }
    }

    async fn complete_job(&self, job_id: &str, value: Value) -> Result<(), EngineError> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        let job = state.job_mut(job_id)?;
        if job.record.state != JobState::Active {
            return Err(EngineError::Rejected(format!("job {} is not active", job_id)));
        }
        job.record.return_value = Some(value);
        job.record.finished_on = Some(Utc::now());
        job.set_state(JobState::Completed);
        Ok(())
    }

    async fn fail_job(
        &self,
        job_id: &str,
        reason: &str,
        retryable: bool,
    ) -> Result<FailureDisposition, EngineError> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        let job = state.job_mut(job_id)?;
        if job.record.state != JobState::Active {
            return Err(EngineError::Rejected(format!("job {} is not active", job_id)));
        }
        job.record.failed_reason = Some(reason.to_string());

        let attempts_made = job.record.attempts_made;
        if retryable && attempts_made < job.record.max_attempts && !job.cancellation.is_cancelled() {
            let delay = Duration::from_millis(exponential_delay_ms(
                job.options.backoff_delay_ms,
                job.options.backoff_max_ms,
                attempts_made,
            ));
            job.set_state(JobState::Delayed);
            let queue = job.record.queue.clone();
            let priority = job.record.priority;
            drop(state);

            warn!(
                job_id = %job_id,
                attempt = attempts_made,
                delay_ms = delay.as_millis() as u64,
                reason = %reason,
                "Job attempt failed, retry scheduled"
            );
            self.schedule_retry(job_id.to_string(), queue, priority, delay);
            return Ok(FailureDisposition::RetryScheduled { delay });
        }

        job.record.finished_on = Some(Utc::now());
        job.set_state(JobState::Failed);
        warn!(job_id = %job_id, attempts = attempts_made, reason = %reason, "Job failed");
        Ok(FailureDisposition::Failed)
    }

    async fn await_job(&self, job_id: &str) -> Result<JobRecord, EngineError> {
        self.ensure_open()?;
        let mut state_rx = {
            let state = self.state.lock().await;
            state
                .jobs
                .get(job_id)
                .map(|job| job.state_tx.subscribe())
                .ok_or_else(|| EngineError::NotFound(job_id.to_string()))?
        };

        loop {
            if state_rx.borrow_and_update().is_finished() {
                break;
            }
            tokio::select! {
                // sender dropped: the job was removed
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        return Err(EngineError::NotFound(job_id.to_string()));
                    }
                }
                _ = self.closed.cancelled() => return Err(EngineError::Closed),
            }
        }
        self.get_job(job_id).await
    }

    async fn job_counts(&self, queue: &str) -> Result<JobCounts, EngineError> {
        self.ensure_open()?;
        let state = self.state.lock().await;
        let mut counts = JobCounts::default();
        for job in state.jobs.values().filter(|job| job.record.queue == queue) {
            match job.record.state {
                JobState::Waiting => counts.waiting += 1,
                JobState::Active => counts.active += 1,
                JobState::Completed => counts.completed += 1,
                JobState::Failed => counts.failed += 1,
                JobState::Delayed => counts.delayed += 1,
                JobState::Paused => counts.paused += 1,
                JobState::Unknown => {}
            }
        }
        Ok(counts)
    }

    async fn close(&self) {
        self.closed.cancel();
        self.connected.store(false, Ordering::SeqCst);
        info!("Queue broker client closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn connected_broker() -> InMemoryQueueBroker {
        let broker = InMemoryQueueBroker::new();
        broker.connect().await.unwrap();
        broker
    }

    fn options(priority: i32, attempts: u32) -> JobOptions {
        JobOptions {
            priority,
            attempts,
            backoff_delay_ms: 5,
            backoff_max_ms: 50,
            ..JobOptions::default()
        }
    }

    #[tokio::test]
    async fn test_priority_then_fifo() {
        let broker = connected_broker().await;
        let low_1 = broker.add_job("q", "a", json!(1), options(0, 1)).await.unwrap();
        let high = broker.add_job("q", "b", json!(2), options(10, 1)).await.unwrap();
        let low_2 = broker.add_job("q", "c", json!(3), options(0, 1)).await.unwrap();

        let order = vec![
            broker.next_job("q").await.unwrap().id,
            broker.next_job("q").await.unwrap().id,
            broker.next_job("q").await.unwrap().id,
        ];
        assert_eq!(order, vec![high, low_1, low_2]);
    }

    #[tokio::test]
    async fn test_ids_sequential_and_custom() {
        let broker = connected_broker().await;
        assert_eq!(broker.add_job("q", "a", json!({}), options(0, 1)).await.unwrap(), "1");
        assert_eq!(broker.add_job("q", "a", json!({}), options(0, 1)).await.unwrap(), "2");

        let custom = JobOptions {
            job_id: Some("email-42".into()),
            ..JobOptions::default()
        };
        assert_eq!(
            broker.add_job("q", "a", json!({}), custom.clone()).await.unwrap(),
            "email-42"
        );
        assert_eq!(
            broker.add_job("q", "a", json!({}), custom).await.unwrap_err(),
            EngineError::AlreadyExists("email-42".into())
        );
    }

    #[tokio::test]
    async fn test_retry_until_exhausted() {
        let broker = connected_broker().await;
        let id = broker.add_job("q", "flaky", json!({}), options(0, 3)).await.unwrap();

        for attempt in 1..=3u32 {
            let job = broker.next_job("q").await.unwrap();
            assert_eq!(job.attempt, attempt);
            let disposition = broker.fail_job(&id, "boom", true).await.unwrap();
            if attempt < 3 {
                assert!(matches!(disposition, FailureDisposition::RetryScheduled { .. }));
                assert_eq!(broker.get_job(&id).await.unwrap().state, JobState::Delayed);
            } else {
                assert_eq!(disposition, FailureDisposition::Failed);
            }
        }

        let record = broker.await_job(&id).await.unwrap();
        assert_eq!(record.state, JobState::Failed);
        assert_eq!(record.attempts_made, 3);
        assert_eq!(record.failed_reason.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_non_retryable_failure() {
        let broker = connected_broker().await;
        let id = broker.add_job("q", "a", json!({}), options(0, 5)).await.unwrap();
        broker.next_job("q").await.unwrap();
        assert_eq!(
            broker.fail_job(&id, "cancelled", false).await.unwrap(),
            FailureDisposition::Failed
        );
    }

    #[tokio::test]
    async fn test_remove_outcomes() {
        let broker = connected_broker().await;
        let waiting = broker.add_job("q", "a", json!({}), options(0, 1)).await.unwrap();
        let active = broker.add_job("q", "b", json!({}), options(0, 1)).await.unwrap();

        assert_eq!(broker.remove_job(&waiting).await.unwrap(), RemoveOutcome::Removed);
        assert!(matches!(
            broker.get_job(&waiting).await,
            Err(EngineError::NotFound(_))
        ));

        // the removed job is skipped on dispatch
        let job = broker.next_job("q").await.unwrap();
        assert_eq!(job.id, active);
        assert_eq!(
            broker.remove_job(&active).await.unwrap(),
            RemoveOutcome::CancellationRequested
        );
        assert!(job.cancellation.is_cancelled());

        broker.complete_job(&active, json!("ok")).await.unwrap();
        assert_eq!(
            broker.remove_job(&active).await.unwrap(),
            RemoveOutcome::AlreadyFinished
        );
    }

    #[tokio::test]
    async fn test_await_removed_job() {
        let broker = Arc::new(connected_broker().await);
        let id = broker.add_job("q", "a", json!({}), options(0, 1)).await.unwrap();
        let waiter = {
            let broker = Arc::clone(&broker);
            let id = id.clone();
            tokio::spawn(async move { broker.await_job(&id).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        broker.remove_job(&id).await.unwrap();

        assert!(matches!(waiter.await.unwrap(), Err(EngineError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_counts() {
        let broker = connected_broker().await;
        let a = broker.add_job("q", "a", json!({}), options(0, 1)).await.unwrap();
        broker.add_job("q", "b", json!({}), options(0, 1)).await.unwrap();
        broker.add_job("other", "c", json!({}), options(0, 1)).await.unwrap();
        broker.next_job("q").await.unwrap();
        broker.complete_job(&a, json!(null)).await.unwrap();

        let counts = broker.job_counts("q").await.unwrap();
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.waiting, 1);
        assert_eq!(counts.active, 0);
    }

    #[tokio::test]
    async fn test_close_unblocks_next_job() {
        let broker = Arc::new(connected_broker().await);
        let waiter = {
            let broker = Arc::clone(&broker);
            tokio::spawn(async move { broker.next_job("empty").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        broker.close().await;
        assert!(matches!(waiter.await.unwrap(), Err(EngineError::Closed)));
    }
}
