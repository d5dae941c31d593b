// SPDX-License-Identifier: MIT OR Apache-2.0
//! tb-worker
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The Executor Worker (spec.md §4.7): a poll loop that claims queued calls,
//! runs the six-step per-job pipeline, and emits a receipt. Concurrency is
//! bounded by `max_concurrent`; consecutive empty polls trigger exponential
//! backoff; `stop()` waits for in-flight jobs up to a shutdown deadline.

use chrono::Utc;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tb_bus::{BusEvent, EventBus};
use tb_core::{CallStatus, Effects, HandlerContext, HandlerOutcome, ToolCall};
use tb_dispatch::Dispatcher;
use tb_error::{ErrorCode, TbError};
use tb_queue::QueueStore;
use tb_registry::Registry;
use tb_validate::{InputValidation, SchemaValidator};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

/// Tunables for a single [`Worker`] instance (spec.md §4.7, §5).
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Identity prefix; the worker appends a random suffix to make the full
    /// id globally unique across instances on the same host.
    pub worker_id: String,
    /// Maximum number of jobs this worker executes concurrently.
    pub max_concurrent: usize,
    /// Base delay between polls when the queue is non-empty.
    pub poll_interval: Duration,
    /// Backoff multiplier applied per consecutive empty poll.
    pub backoff_multiplier: f64,
    /// Upper bound on the backoff delay.
    pub max_backoff: Duration,
    /// How long `stop()` waits for in-flight jobs before giving up on them.
    pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::new_v4()),
            max_concurrent: 1,
            poll_interval: Duration::from_millis(250),
            backoff_multiplier: 1.5,
            max_backoff: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// A point-in-time snapshot of worker metrics (spec.md §4.7 "Metrics
/// emitted"). The worker exposes this struct but never serves it over the
/// network itself — a CLI or collaborator process decides how to publish it.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct WorkerHealth {
    /// Total jobs claimed since the worker started.
    pub jobs_claimed: u64,
    /// Total jobs that finished with `status = succeeded`.
    pub jobs_succeeded: u64,
    /// Total jobs that finished with `status ∈ {failed, not_configured}`.
    pub jobs_failed: u64,
    /// Jobs currently executing.
    pub active_jobs: u64,
    /// Consecutive polls that returned nothing, reset on the next claim.
    pub consecutive_empty_polls: u64,
    /// Timestamp of the most recent successful claim, if any.
    pub last_claim_at: Option<chrono::DateTime<Utc>>,
}

#[derive(Default)]
struct Metrics {
    jobs_claimed: AtomicU64,
    jobs_succeeded: AtomicU64,
    jobs_failed: AtomicU64,
    active_jobs: AtomicU64,
    consecutive_empty_polls: AtomicU64,
    last_claim_at: std::sync::Mutex<Option<chrono::DateTime<Utc>>>,
}

impl Metrics {
    fn snapshot(&self) -> WorkerHealth {
        WorkerHealth {
            jobs_claimed: self.jobs_claimed.load(Ordering::Relaxed),
            jobs_succeeded: self.jobs_succeeded.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            active_jobs: self.active_jobs.load(Ordering::Relaxed),
            consecutive_empty_polls: self.consecutive_empty_polls.load(Ordering::Relaxed),
            last_claim_at: *self.last_claim_at.lock().unwrap(),
        }
    }
}

/// The Executor Worker: owns a poll loop task and a pool of in-flight job
/// tasks bounded by `max_concurrent`.
pub struct Worker {
    config: WorkerConfig,
    store: Arc<dyn QueueStore>,
    registry: Arc<Registry>,
    validator: Arc<SchemaValidator>,
    dispatcher: Arc<Dispatcher>,
    bus: Arc<dyn EventBus>,
    metrics: Arc<Metrics>,
    stop_tx: Option<tokio::sync::watch::Sender<bool>>,
    poll_task: Option<tokio::task::JoinHandle<()>>,
}

impl Worker {
    /// Construct a worker. Call [`Worker::start`] to begin polling.
    #[must_use]
    pub fn new(
        config: WorkerConfig,
        store: Arc<dyn QueueStore>,
        registry: Arc<Registry>,
        validator: Arc<SchemaValidator>,
        dispatcher: Arc<Dispatcher>,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            config,
            store,
            registry,
            validator,
            dispatcher,
            bus,
            metrics: Arc::new(Metrics::default()),
            stop_tx: None,
            poll_task: None,
        }
    }

    /// A readable snapshot of this worker's metrics (spec.md §4.7).
    #[must_use]
    pub fn health(&self) -> WorkerHealth {
        self.metrics.snapshot()
    }

    /// This worker's globally unique identity.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.config.worker_id
    }

    /// Initialise event subscriptions and spawn the poll loop. Idempotent:
    /// calling `start` twice on an already-started worker is a no-op.
    pub fn start(&mut self) {
        if self.poll_task.is_some() {
            return;
        }
        let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
        let loop_state = PollLoop {
            config: self.config.clone(),
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
            validator: Arc::clone(&self.validator),
            dispatcher: Arc::clone(&self.dispatcher),
            bus: Arc::clone(&self.bus),
            metrics: Arc::clone(&self.metrics),
        };
        let handle = tokio::spawn(loop_state.run(stop_rx));
        self.stop_tx = Some(stop_tx);
        self.poll_task = Some(handle);
        tracing::info!(worker_id = %self.config.worker_id, "worker started");
    }

    /// Stop polling and wait for in-flight jobs up to `shutdown_timeout`.
    /// Jobs still running past the deadline are abandoned to the
    /// crash-safety policy (spec.md §4.7 "Crash safety") rather than forced
    /// to cancel mid-write, which could leave a receipt half-written.
    pub async fn stop(&mut self) {
        let Some(stop_tx) = self.stop_tx.take() else {
            return;
        };
        let _ = stop_tx.send(true);

        if let Some(handle) = self.poll_task.take() {
            match tokio::time::timeout(self.config.shutdown_timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::error!(worker_id = %self.config.worker_id, error = ?err, "poll loop panicked"),
                Err(_) => tracing::warn!(
                    worker_id = %self.config.worker_id,
                    "shutdown deadline exceeded with jobs still in flight"
                ),
            }
        }
        tracing::info!(worker_id = %self.config.worker_id, "worker stopped");
    }
}

struct PollLoop {
    config: WorkerConfig,
    store: Arc<dyn QueueStore>,
    registry: Arc<Registry>,
    validator: Arc<SchemaValidator>,
    dispatcher: Arc<Dispatcher>,
    bus: Arc<dyn EventBus>,
    metrics: Arc<Metrics>,
}

impl PollLoop {
    async fn run(self, mut stop_rx: tokio::sync::watch::Receiver<bool>) {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent));
        let mut in_flight: JoinSet<()> = JoinSet::new();
        let mut backoff = self.config.poll_interval;

        loop {
            if *stop_rx.borrow() {
                break;
            }

            // Reap finished job tasks without blocking the next claim.
            while in_flight.try_join_next().is_some() {}

            if semaphore.available_permits() == 0 {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                    _ = stop_rx.changed() => {}
                }
                continue;
            }

            match self.store.claim_next(&self.config.worker_id).await {
                Ok(Some(call)) => {
                    backoff = self.config.poll_interval;
                    self.metrics.jobs_claimed.fetch_add(1, Ordering::Relaxed);
                    self.metrics.consecutive_empty_polls.store(0, Ordering::Relaxed);
                    *self.metrics.last_claim_at.lock().unwrap() = Some(Utc::now());
                    self.bus.publish(BusEvent::CallStatusChanged {
                        call_id: call.id,
                        old_status: CallStatus::Queued,
                        new_status: CallStatus::Running,
                        worker_id: Some(self.config.worker_id.clone()),
                    });

                    let permit = Arc::clone(&semaphore).acquire_owned().await.expect("semaphore never closed");
                    self.metrics.active_jobs.fetch_add(1, Ordering::Relaxed);
                    let job = JobContext {
                        store: Arc::clone(&self.store),
                        registry: Arc::clone(&self.registry),
                        validator: Arc::clone(&self.validator),
                        dispatcher: Arc::clone(&self.dispatcher),
                        bus: Arc::clone(&self.bus),
                        metrics: Arc::clone(&self.metrics),
                        worker_id: self.config.worker_id.clone(),
                    };
                    in_flight.spawn(async move {
                        let _permit = permit;
                        job.execute(call).await;
                    });
                }
                Ok(None) => {
                    let polls = self.metrics.consecutive_empty_polls.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::debug!(worker_id = %self.config.worker_id, consecutive_empty_polls = polls, "nothing queued");
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = stop_rx.changed() => {}
                    }
                    let next_backoff_ms = (backoff.as_secs_f64() * self.config.backoff_multiplier).min(self.config.max_backoff.as_secs_f64());
                    backoff = Duration::from_secs_f64(next_backoff_ms.max(self.config.poll_interval.as_secs_f64()));
                }
                Err(err) => {
                    tracing::error!(worker_id = %self.config.worker_id, error = %err, "claim_next failed");
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }

        while in_flight.join_next().await.is_some() {}
    }
}

struct JobContext {
    store: Arc<dyn QueueStore>,
    registry: Arc<Registry>,
    validator: Arc<SchemaValidator>,
    dispatcher: Arc<Dispatcher>,
    bus: Arc<dyn EventBus>,
    metrics: Arc<Metrics>,
    worker_id: String,
}

impl JobContext {
    /// The six-step per-job pipeline (spec.md §4.7). No step may be skipped
    /// or reordered.
    async fn execute(self, call: ToolCall) {
        let outcome = self.run_pipeline(&call).await;
        let (status, result, effects, error) = outcome_to_quad(outcome);
        self.finish(&call, status, result, effects, error).await;
        self.metrics.active_jobs.fetch_sub(1, Ordering::Relaxed);
    }

    async fn run_pipeline(&self, call: &ToolCall) -> PipelineOutcome {
        // 1. Resolve the tool.
        let Some(tool) = self.registry.get(&call.tool_name) else {
            return PipelineOutcome::Rejected(TbError::new(
                ErrorCode::ToolNotFound,
                format!("no such tool `{}`", call.tool_name),
            ));
        };

        // 2. Validate input.
        if let InputValidation::Invalid(errors) = self.validator.validate_input(tool, &call.input) {
            tracing::debug!(tool_name = %tool.name, error_count = errors.len(), "input failed schema validation");
            return PipelineOutcome::ValidationFailed(errors);
        }

        // 3. Consult the Idempotency Engine.
        match tb_idempotency::resolve(self.store.as_ref(), tool, call).await {
            Ok(tb_idempotency::Resolution::Hit(prior)) => {
                return PipelineOutcome::IdempotentHit(prior.result);
            }
            Ok(tb_idempotency::Resolution::Skip | tb_idempotency::Resolution::Miss) => {}
            Err(err) => return PipelineOutcome::Rejected(err),
        }

        // 4. Resolve the handler.
        let handler = match self.dispatcher.resolve(&call.tool_name) {
            Ok(handler) => handler,
            Err(err) => return PipelineOutcome::Rejected(err),
        };

        // 5. Execute under a timeout derived from tool.timeout_ms.
        let ctx = HandlerContext {
            call_id: call.id,
            tool_name: call.tool_name.clone(),
            metadata: [("worker_id".to_string(), self.worker_id.clone())].into_iter().collect(),
        };
        let timeout = Duration::from_millis(tool.timeout_ms);
        let input = call.input.clone();
        match tokio::time::timeout(timeout, handler.call(input, ctx)).await {
            Ok(outcome) => {
                // 6. Soft-validate output before persisting.
                if let HandlerOutcome::Succeeded { result, .. } = &outcome {
                    self.validator.validate_output(tool, result);
                }
                PipelineOutcome::Handled(outcome)
            }
            Err(_) => PipelineOutcome::Rejected(TbError::new(
                ErrorCode::ExecutionTimeout,
                format!("handler for `{}` exceeded {}ms", call.tool_name, tool.timeout_ms),
            )),
        }
    }

    async fn finish(
        &self,
        call: &ToolCall,
        status: CallStatus,
        result: Value,
        effects: Effects,
        error: Option<TbError>,
    ) {
        if let Err(err) = self.store.write_receipt(call.id, &call.tool_name, status, result, effects).await {
            tracing::error!(call_id = %call.id, error = %err, "failed to write receipt");
        }
        if let Err(err) = self.store.complete(call.id, status, error).await {
            tracing::error!(call_id = %call.id, error = %err, "failed to complete call");
        }

        match status {
            CallStatus::Succeeded => self.metrics.jobs_succeeded.fetch_add(1, Ordering::Relaxed),
            _ => self.metrics.jobs_failed.fetch_add(1, Ordering::Relaxed),
        };

        if let Ok(Some(receipt)) = self.store.find_receipt_by_call_id(call.id).await {
            self.bus.publish(BusEvent::ReceiptCreated { receipt });
        }
        self.bus.publish(BusEvent::CallStatusChanged {
            call_id: call.id,
            old_status: CallStatus::Running,
            new_status: status,
            worker_id: Some(self.worker_id.clone()),
        });
    }
}

enum PipelineOutcome {
    Handled(HandlerOutcome),
    IdempotentHit(Value),
    ValidationFailed(Vec<tb_error::FieldError>),
    Rejected(TbError),
}

fn outcome_to_quad(outcome: PipelineOutcome) -> (CallStatus, Value, Effects, Option<TbError>) {
    match outcome {
        PipelineOutcome::Handled(HandlerOutcome::Succeeded { result, effects }) => {
            (CallStatus::Succeeded, result, effects, None)
        }
        PipelineOutcome::Handled(HandlerOutcome::NotConfigured { reason, required_env, next_steps }) => {
            let outcome = HandlerOutcome::not_configured(reason, required_env, next_steps);
            (CallStatus::NotConfigured, outcome.result_payload(), Effects::empty(), None)
        }
        PipelineOutcome::Handled(HandlerOutcome::Failed(err)) => {
            tracing::warn!(code = %err.code, message = %err.message, "handler returned a failure");
            let effects = Effects { errors: vec![field_error_for(&err)], ..Effects::empty() };
            (CallStatus::Failed, Value::Object(Default::default()), effects, Some(err))
        }
        PipelineOutcome::IdempotentHit(result) => {
            (CallStatus::Succeeded, result, Effects::idempotency_hit(), None)
        }
        PipelineOutcome::ValidationFailed(errors) => {
            let err = TbError::schema_validation(errors.clone());
            (CallStatus::Failed, Value::Object(Default::default()), Effects { errors, ..Effects::empty() }, Some(err))
        }
        PipelineOutcome::Rejected(err) => {
            tracing::warn!(code = %err.code, message = %err.message, "job rejected before handler dispatch");
            let effects = Effects { errors: vec![field_error_for(&err)], ..Effects::empty() };
            (CallStatus::Failed, Value::Object(Default::default()), effects, Some(err))
        }
    }
}

/// Flatten a whole-call [`TbError`] into the single [`tb_error::FieldError`]
/// `effects.errors` carries for it, mirroring how the Validator reports a
/// per-field failure (spec.md §4.2) even though this error has no one field.
fn field_error_for(err: &TbError) -> tb_error::FieldError {
    let keyword = serde_json::to_value(err.code)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| err.code.code().to_string());
    tb_error::FieldError::new("/", keyword, err.message.clone())
}
