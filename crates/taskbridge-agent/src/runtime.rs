//! Agent runtime: retries, backoff, metrics and the status state machine.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde_json::Value;
use taskbridge_core::{AgentEvent, AgentStatus, EventEmitter, OrchestrationError, RuntimeConfig};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::{Agent, AgentContext, AgentError};
use crate::backoff::Backoff;
use crate::metrics::MetricsRecorder;
use crate::result::{AgentResult, ErrorInfo, ErrorKind};

/// Type alias for the injectable sleep function.
type SleepFn = Arc<dyn Fn(Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

#[derive(Debug, Default)]
struct RuntimeState {
    status: AgentStatus,
    retry_count: u32,
    job_id: String,
    cancellation: Option<CancellationToken>,
}

/// How the retry loop ended.
enum RunOutcome {
    Succeeded { value: Value },
    Failed { error: AgentError, attempts: u32 },
    Cancelled { attempts: u32 },
}

fn tokio_sleep(delay: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(tokio::time::sleep(delay))
}

/// Decision taken after a failed attempt.
enum NextStep {
    Retry(u32),
    GiveUp,
    Stop,
}

/// Runs one agent with retry, backoff, metrics and lifecycle events.
///
/// A runtime is scoped to the executions of a single caller; it spawns no
/// tasks of its own and runs on whichever engine worker calls [`run`](Self::run).
pub struct AgentRuntime {
    agent: Arc<dyn Agent>,
    config: RuntimeConfig,
    backoff: Backoff,
    state: Mutex<RuntimeState>,
    events: EventEmitter<AgentEvent>,
    sleep_fn: SleepFn,
}

impl AgentRuntime {
    /// Create a runtime with its own event emitter.
    pub fn new(agent: Arc<dyn Agent>, config: RuntimeConfig) -> Self {
        Self::with_events(agent, config, EventEmitter::default())
    }

    /// Create a runtime that publishes to an injected emitter.
    pub fn with_events(
        agent: Arc<dyn Agent>,
        config: RuntimeConfig,
        events: EventEmitter<AgentEvent>,
    ) -> Self {
        Self {
            agent,
            backoff: Backoff::from_config(&config),
            config,
            state: Mutex::new(RuntimeState::default()),
            events,
            sleep_fn: Arc::new(tokio_sleep),
        }
    }

    /// Override the sleep function (test-only).
    #[cfg(test)]
    fn with_sleep_fn(mut self, sleep_fn: SleepFn) -> Self {
        self.sleep_fn = sleep_fn;
        self
    }

    pub fn status(&self) -> AgentStatus {
        self.lock_state().status
    }

    /// Retries performed so far in the current run.
    pub fn retry_count(&self) -> u32 {
        self.lock_state().retry_count
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Run the agent to a terminal outcome. Never returns an error; failures
    /// are reported through [`AgentResult::error`].
    pub async fn run(&self, context: AgentContext) -> AgentResult<Value> {
        let token = context.cancellation_token().child_token();
        {
            let mut state = self.lock_state();
            state.status = AgentStatus::Running;
            state.retry_count = 0;
            state.job_id = context.job_id.clone();
            state.cancellation = Some(token.clone());
        }

        let agent_id = self.agent.kind().id();
        info!(job_id = %context.job_id, agent = agent_id, "Agent run started");
        self.events.emit(AgentEvent::started(&context.job_id, agent_id));

        let recorder = MetricsRecorder::start();
        let outcome = self.run_with_retries(&context, &token).await;
        let metrics = recorder.finish();

        match outcome {
            RunOutcome::Succeeded { value } => {
                AgentResult::succeeded(context.job_id, value, metrics)
            }
            RunOutcome::Cancelled { attempts } => AgentResult::failed(
                context.job_id,
                ErrorInfo {
                    message: AgentError::Cancelled.to_string(),
                    kind: ErrorKind::Cancelled,
                    attempts,
                },
                metrics,
            ),
            RunOutcome::Failed { error, attempts } => {
                let (kind, message) = match &error {
                    _ if attempts > 1 => (
                        ErrorKind::RetryExhausted,
                        OrchestrationError::RetryExhausted {
                            attempts,
                            last_error: error.to_string(),
                        }
                        .to_string(),
                    ),
                    AgentError::Timeout(_) => (ErrorKind::Timeout, error.to_string()),
                    AgentError::InvalidInput(_) => (ErrorKind::InvalidInput, error.to_string()),
                    _ => (ErrorKind::AgentFailed, error.to_string()),
                };
                AgentResult::failed(
                    context.job_id,
                    ErrorInfo {
                        message,
                        kind,
                        attempts,
                    },
                    metrics,
                )
            }
        }
    }

    /// Request cancellation.
    ///
    /// Only effective while RUNNING or RETRYING; returns `false` otherwise.
    /// In-flight agent code is not interrupted, it sees the request through
    /// its context, and no further attempts are made.
    pub fn cancel(&self) -> bool {
        self.transition_to_cancelled()
    }

    async fn run_with_retries(
        &self,
        context: &AgentContext,
        token: &CancellationToken,
    ) -> RunOutcome {
        let agent_id = self.agent.kind().id();
        let job_id = context.job_id.as_str();
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            if token.is_cancelled() {
                self.transition_to_cancelled();
                return RunOutcome::Cancelled { attempts: attempt };
            }

            attempt += 1;
            let attempt_ctx =
                context.for_attempt(attempt, token.clone(), self.events.clone(), agent_id);
            debug!(job_id = %job_id, agent = agent_id, attempt, "Executing attempt");

            match self.execute_once(&attempt_ctx).await {
                Ok(value) => {
                    let cancelled = {
                        let mut state = self.lock_state();
                        state.retry_count = 0;
                        if state.status == AgentStatus::Cancelled {
                            true
                        } else {
                            state.status = AgentStatus::Completed;
                            false
                        }
                    };
                    if cancelled {
                        info!(job_id = %job_id, agent = agent_id, "Agent finished after cancellation, discarding value");
                        return RunOutcome::Cancelled { attempts: attempt };
                    }
                    let elapsed_ms = started.elapsed().as_millis() as i64;
                    self.events
                        .emit(AgentEvent::completed(job_id, agent_id, elapsed_ms));
                    info!(job_id = %job_id, agent = agent_id, attempts = attempt, "Agent run completed");
                    return RunOutcome::Succeeded { value };
                }
                Err(AgentError::Cancelled) => {
                    self.transition_to_cancelled();
                    return RunOutcome::Cancelled { attempts: attempt };
                }
                Err(error) => {
                    if token.is_cancelled() {
                        self.transition_to_cancelled();
                        return RunOutcome::Cancelled { attempts: attempt };
                    }

                    let next = {
                        let mut state = self.lock_state();
                        if state.status == AgentStatus::Cancelled {
                            NextStep::Stop
                        } else if state.retry_count < self.config.max_retries {
                            state.retry_count += 1;
                            state.status = AgentStatus::Retrying;
                            NextStep::Retry(state.retry_count)
                        } else {
                            state.status = AgentStatus::Failed;
                            NextStep::GiveUp
                        }
                    };

                    match next {
                        NextStep::Stop => return RunOutcome::Cancelled { attempts: attempt },
                        NextStep::GiveUp => {
                            warn!(
                                job_id = %job_id,
                                agent = agent_id,
                                attempts = attempt,
                                error = %error,
                                "Agent run failed"
                            );
                            self.events
                                .emit(AgentEvent::failed(job_id, agent_id, &error.to_string(), attempt));
                            return RunOutcome::Failed {
                                error,
                                attempts: attempt,
                            };
                        }
                        NextStep::Retry(retry_number) => {
                            let delay = self.backoff.delay(retry_number);
                            warn!(
                                job_id = %job_id,
                                agent = agent_id,
                                retry = retry_number,
                                delay_ms = delay.as_millis() as u64,
                                error = %error,
                                "Agent attempt failed, retrying"
                            );
                            self.events.emit(AgentEvent::retrying(
                                job_id,
                                agent_id,
                                attempt + 1,
                                delay.as_millis() as u64,
                                &error.to_string(),
                            ));

                            tokio::select! {
                                _ = (self.sleep_fn)(delay) => {}
                                _ = token.cancelled() => {
                                    self.transition_to_cancelled();
                                    return RunOutcome::Cancelled { attempts: attempt };
                                }
                            }

                            let mut state = self.lock_state();
                            if state.status == AgentStatus::Cancelled {
                                return RunOutcome::Cancelled { attempts: attempt };
                            }
                            state.status = AgentStatus::Running;
                        }
                    }
                }
            }
        }
    }

    /// One attempt, bounded by the configured timeout.
    async fn execute_once(&self, ctx: &AgentContext) -> Result<Value, AgentError> {
        match self.config.timeout_ms {
            Some(ms) => {
                match tokio::time::timeout(Duration::from_millis(ms), self.agent.execute(ctx)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(AgentError::Timeout(ms)),
                }
            }
            None => self.agent.execute(ctx).await,
        }
    }

    /// RUNNING/RETRYING -> CANCELLED. Emits once; returns whether it moved.
    fn transition_to_cancelled(&self) -> bool {
        let (job_id, token) = {
            let mut state = self.lock_state();
            if !state.status.is_cancellable() {
                return false;
            }
            state.status = AgentStatus::Cancelled;
            (state.job_id.clone(), state.cancellation.clone())
        };

        if let Some(token) = token {
            token.cancel();
        }
        let agent_id = self.agent.kind().id();
        info!(job_id = %job_id, agent = agent_id, "Agent run cancelled");
        self.events.emit(AgentEvent::cancelled(&job_id, agent_id));
        true
    }

    fn lock_state(&self) -> MutexGuard<'_, RuntimeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::registry::AgentKind;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use taskbridge_core::AgentEventType;

    /// Fails a fixed number of times, then succeeds.
    struct FlakyAgent {
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyAgent {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures,
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Agent for FlakyAgent {
        fn kind(&self) -> AgentKind {
            AgentKind::Diagnostic
        }

        async fn execute(&self, ctx: &AgentContext) -> Result<Value, AgentError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.failures {
                Err(AgentError::Failed(format!("failure {}", n)))
            } else {
                Ok(json!({"attempt": ctx.attempt}))
            }
        }
    }

    /// Blocks until cancelled, or sleeps `work_ms` and succeeds when
    /// `ignore_cancel` is set.
    struct SlowAgent {
        work_ms: u64,
        ignore_cancel: bool,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Agent for SlowAgent {
        fn kind(&self) -> AgentKind {
            AgentKind::Diagnostic
        }

        async fn execute(&self, ctx: &AgentContext) -> Result<Value, AgentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.ignore_cancel {
                tokio::time::sleep(Duration::from_millis(self.work_ms)).await;
                return Ok(json!("done"));
            }
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(self.work_ms)) => Ok(json!("done")),
                _ = ctx.cancelled() => Err(AgentError::Cancelled),
            }
        }
    }

    fn recording_sleep() -> (SleepFn, Arc<Mutex<Vec<Duration>>>) {
        let delays = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&delays);
        let sleep_fn: SleepFn = Arc::new(
            move |d: Duration| -> Pin<Box<dyn Future<Output = ()> + Send>> {
                captured.lock().unwrap().push(d);
                Box::pin(async {})
            },
        );
        (sleep_fn, delays)
    }

    async fn wait_for_calls(calls: &AtomicU32, n: u32) {
        for _ in 0..400 {
            if calls.load(Ordering::SeqCst) >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("agent never reached {} calls", n);
    }

    async fn wait_for_status(runtime: &AgentRuntime, status: AgentStatus) {
        for _ in 0..400 {
            if runtime.status() == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("runtime never reached {:?}", status);
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<AgentEvent>) -> Vec<AgentEventType> {
        let mut types = Vec::new();
        while let Ok(event) = rx.try_recv() {
            types.push(event.event_type);
        }
        types
    }

    #[tokio::test]
    async fn test_success_first_attempt() {
        let agent = FlakyAgent::new(0);
        let runtime = AgentRuntime::new(agent.clone(), RuntimeConfig::default());
        let mut rx = runtime.subscribe();
        assert_eq!(runtime.status(), AgentStatus::Idle);

        let result = runtime.run(AgentContext::new("job-1", json!({}))).await;

        assert!(result.success);
        assert_eq!(result.value, Some(json!({"attempt": 1})));
        assert_eq!(result.job_id, "job-1");
        assert_eq!(agent.calls(), 1);
        assert_eq!(runtime.status(), AgentStatus::Completed);
        assert_eq!(
            drain(&mut rx),
            vec![AgentEventType::Started, AgentEventType::Completed]
        );
    }

    #[tokio::test]
    async fn test_fails_twice_then_succeeds() {
        let agent = FlakyAgent::new(2);
        let config = RuntimeConfig::default()
            .with_max_retries(3)
            .with_retry_delays(20, 1_000);
        let runtime = AgentRuntime::new(agent.clone(), config);
        let mut rx = runtime.subscribe();

        let started = Instant::now();
        let result = runtime.run(AgentContext::new("job-c", json!({}))).await;
        let elapsed = started.elapsed();

        assert!(result.success);
        assert_eq!(agent.calls(), 3);
        assert!(elapsed >= Duration::from_millis(20 + 2 * 20), "elapsed {:?}", elapsed);
        assert!(result.metrics.duration_ms >= 60);
        assert_eq!(runtime.status(), AgentStatus::Completed);
        assert_eq!(runtime.retry_count(), 0);

        let events = drain(&mut rx);
        assert_eq!(
            events
                .iter()
                .filter(|t| **t == AgentEventType::Retrying)
                .count(),
            2
        );
        assert_eq!(events.last(), Some(&AgentEventType::Completed));
    }

    #[tokio::test]
    async fn test_always_failing_invoked_max_retries_plus_one() {
        for max_retries in [0u32, 1, 4] {
            let agent = FlakyAgent::new(u32::MAX);
            let (sleep_fn, delays) = recording_sleep();
            let config = RuntimeConfig::default()
                .with_max_retries(max_retries)
                .with_retry_delays(10, 1_000);
            let runtime = AgentRuntime::new(agent.clone(), config).with_sleep_fn(sleep_fn);

            let result = runtime.run(AgentContext::new("job-x", json!({}))).await;

            assert!(!result.success);
            assert_eq!(agent.calls(), max_retries + 1);
            assert_eq!(runtime.status(), AgentStatus::Failed);
            let error = result.error.unwrap();
            assert_eq!(error.attempts, max_retries + 1);
            if max_retries == 0 {
                assert_eq!(error.kind, ErrorKind::AgentFailed);
            } else {
                assert_eq!(error.kind, ErrorKind::RetryExhausted);
            }
            assert_eq!(delays.lock().unwrap().len(), max_retries as usize);
        }
    }

    #[tokio::test]
    async fn test_backoff_delays_within_bounds() {
        let agent = FlakyAgent::new(u32::MAX);
        let (sleep_fn, delays) = recording_sleep();
        let config = RuntimeConfig::default()
            .with_max_retries(4)
            .with_retry_delays(100, 500);
        let runtime = AgentRuntime::new(agent, config).with_sleep_fn(sleep_fn);

        runtime.run(AgentContext::new("job-b", json!({}))).await;

        let delays = delays.lock().unwrap().clone();
        assert_eq!(delays.len(), 4);
        for (i, delay) in delays.iter().enumerate() {
            let base = (100u64 << i).min(500);
            let ms = delay.as_millis() as u64;
            assert!(ms >= base && ms as f64 <= base as f64 * 1.3 && ms <= 500);
        }
    }

    #[tokio::test]
    async fn test_cancel_is_noop_outside_running() {
        let runtime = AgentRuntime::new(FlakyAgent::new(0), RuntimeConfig::default());
        let mut rx = runtime.subscribe();
        assert!(!runtime.cancel());
        assert_eq!(runtime.status(), AgentStatus::Idle);

        runtime.run(AgentContext::new("job-1", json!({}))).await;
        assert!(!runtime.cancel());
        assert_eq!(runtime.status(), AgentStatus::Completed);

        let failing = AgentRuntime::new(FlakyAgent::new(u32::MAX), RuntimeConfig::default());
        failing.run(AgentContext::new("job-2", json!({}))).await;
        assert!(!failing.cancel());
        assert_eq!(failing.status(), AgentStatus::Failed);

        assert!(!drain(&mut rx).contains(&AgentEventType::Cancelled));
    }

    #[tokio::test]
    async fn test_cancel_while_running() {
        let agent = Arc::new(SlowAgent {
            work_ms: 10_000,
            ignore_cancel: false,
            calls: AtomicU32::new(0),
        });
        let runtime = Arc::new(AgentRuntime::new(
            agent.clone(),
            RuntimeConfig::default().with_max_retries(3),
        ));
        let mut rx = runtime.subscribe();

        let task = {
            let runtime = Arc::clone(&runtime);
            tokio::spawn(async move { runtime.run(AgentContext::new("job-d", json!({}))).await })
        };
        wait_for_calls(&agent.calls, 1).await;

        assert!(runtime.cancel());
        assert!(!runtime.cancel());

        let result = task.await.unwrap();
        assert!(result.is_cancelled());
        assert_eq!(agent.calls.load(Ordering::SeqCst), 1);
        assert_eq!(runtime.status(), AgentStatus::Cancelled);

        let cancelled = drain(&mut rx)
            .into_iter()
            .filter(|t| *t == AgentEventType::Cancelled)
            .count();
        assert_eq!(cancelled, 1);
    }

    #[tokio::test]
    async fn test_cancel_during_backoff_stops_retries() {
        let agent = FlakyAgent::new(u32::MAX);
        let config = RuntimeConfig::default()
            .with_max_retries(5)
            .with_retry_delays(5_000, 10_000);
        let runtime = Arc::new(AgentRuntime::new(agent.clone(), config));

        let task = {
            let runtime = Arc::clone(&runtime);
            tokio::spawn(async move { runtime.run(AgentContext::new("job-r", json!({}))).await })
        };
        wait_for_status(&runtime, AgentStatus::Retrying).await;

        assert!(runtime.cancel());
        let result = task.await.unwrap();

        assert!(result.is_cancelled());
        assert_eq!(agent.calls(), 1);
        assert_eq!(runtime.status(), AgentStatus::Cancelled);
        assert!(!runtime.cancel());
    }

    #[tokio::test]
    async fn test_outer_token_cancels_run() {
        let agent = Arc::new(SlowAgent {
            work_ms: 10_000,
            ignore_cancel: false,
            calls: AtomicU32::new(0),
        });
        let runtime = Arc::new(AgentRuntime::new(agent, RuntimeConfig::default()));
        let outer = CancellationToken::new();

        let task = {
            let runtime = Arc::clone(&runtime);
            let ctx = AgentContext::new("job-o", json!({})).with_cancellation(outer.clone());
            tokio::spawn(async move { runtime.run(ctx).await })
        };
        wait_for_status(&runtime, AgentStatus::Running).await;
        outer.cancel();

        let result = task.await.unwrap();
        assert!(result.is_cancelled());
        assert_eq!(runtime.status(), AgentStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_in_flight_success_after_cancel_reports_cancelled() {
        let agent = Arc::new(SlowAgent {
            work_ms: 50,
            ignore_cancel: true,
            calls: AtomicU32::new(0),
        });
        let runtime = Arc::new(AgentRuntime::new(agent.clone(), RuntimeConfig::default()));
        let mut rx = runtime.subscribe();

        let task = {
            let runtime = Arc::clone(&runtime);
            tokio::spawn(async move { runtime.run(AgentContext::new("job-f", json!({}))).await })
        };
        wait_for_calls(&agent.calls, 1).await;
        assert!(runtime.cancel());

        let result = task.await.unwrap();
        assert!(!result.success);
        assert!(result.is_cancelled());
        assert_eq!(result.value, None);
        assert_eq!(result.error.unwrap().attempts, 1);
        assert_eq!(runtime.status(), AgentStatus::Cancelled);
        assert!(!drain(&mut rx).contains(&AgentEventType::Completed));
    }

    #[tokio::test]
    async fn test_attempt_timeout() {
        let agent = Arc::new(SlowAgent {
            work_ms: 10_000,
            ignore_cancel: false,
            calls: AtomicU32::new(0),
        });
        let runtime = AgentRuntime::new(agent, RuntimeConfig::default().with_timeout_ms(20));

        let result = runtime.run(AgentContext::new("job-t", json!({}))).await;

        let error = result.error.unwrap();
        assert_eq!(error.kind, ErrorKind::Timeout);
        assert_eq!(runtime.status(), AgentStatus::Failed);
    }

    #[tokio::test]
    async fn test_injected_emitter_shared() {
        let events = EventEmitter::new(32);
        let mut rx = events.subscribe();
        let a = AgentRuntime::with_events(FlakyAgent::new(0), RuntimeConfig::default(), events.clone());
        let b = AgentRuntime::with_events(FlakyAgent::new(0), RuntimeConfig::default(), events);

        a.run(AgentContext::new("job-a", json!({}))).await;
        b.run(AgentContext::new("job-b", json!({}))).await;

        let mut jobs = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if event.event_type == AgentEventType::Completed {
                jobs.push(event.job_id);
            }
        }
        assert_eq!(jobs, vec!["job-a".to_string(), "job-b".to_string()]);
    }
}
