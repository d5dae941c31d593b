// SPDX-License-Identifier: MIT OR Apache-2.0
//! tb-cli
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Library half of the `tool-backplane` binary (spec.md §6): wires a
//! [`tb_brain::Brain`] over a Queue Store, Event Bus, Registry, and
//! dispatcher, optionally runs an in-process [`tb_worker::Worker`] pool
//! alongside it, and flattens the resulting [`tb_core::BrainRun`] into the
//! single [`response::PlannerResponse`] document this binary writes to
//! standard output.

pub mod response;
pub mod wiring;

use response::PlannerResponse;
use std::sync::Arc;
use std::time::Duration;
use tb_brain::{Brain, RuleBase};
use tb_bus::InProcessEventBus;
use tb_core::{PlannerLimits, PlannerMode};
use tb_queue::InMemoryQueueStore;
use tb_registry::Registry;
use tb_validate::SchemaValidator;
use tb_handlers::LeadsStore;
use tb_worker::{Worker, WorkerConfig};

/// Everything one invocation of the Planner needs, already resolved from
/// CLI args / config (exit-code and I/O concerns stay in `main.rs`).
pub struct RunRequest {
    /// The raw natural-language message.
    pub message: String,
    /// Which of the four modes to run.
    pub mode: PlannerMode,
    /// Opaque caller context passed straight to the rule base's `extract`.
    pub context: serde_json::Value,
    /// Opaque conversation identifier, if the caller supplied one.
    pub conversation_id: Option<String>,
    /// Caps on this run.
    pub limits: PlannerLimits,
    /// Start an in-process worker pool so `enqueue`/`enqueue_and_wait` have
    /// something to actually claim and execute. Without this, calls are
    /// enqueued (or waited on) but never run — a legitimate configuration
    /// when a separate worker process handles execution.
    pub with_worker: bool,
    /// `tb_worker::WorkerConfig` knobs, already resolved from config/env.
    pub worker_config: WorkerConfig,
}

/// Run one Planner request against a fresh in-memory Queue Store/Event Bus
/// and the embedded three-tool registry, optionally backed by an
/// in-process worker pool, and return the wire-shaped response.
pub async fn run(registry: Arc<Registry>, rules: RuleBase, request: RunRequest) -> PlannerResponse {
    let store = Arc::new(InMemoryQueueStore::new());
    let bus = Arc::new(InProcessEventBus::default());
    let validator = Arc::new(SchemaValidator::new());

    let mut worker = if request.with_worker {
        let leads = Arc::new(LeadsStore::new());
        let dispatcher = Arc::new(wiring::embedded_dispatcher(leads));
        let mut worker = Worker::new(
            request.worker_config,
            Arc::clone(&store) as Arc<dyn tb_queue::QueueStore>,
            Arc::clone(&registry),
            Arc::clone(&validator),
            dispatcher,
            Arc::clone(&bus) as Arc<dyn tb_bus::EventBus>,
        );
        worker.start();
        Some(worker)
    } else {
        None
    };

    let brain = Brain::new(
        registry,
        validator,
        store as Arc<dyn tb_queue::QueueStore>,
        bus as Arc<dyn tb_bus::EventBus>,
        rules,
    );

    let run = brain
        .run(request.message, request.mode, request.context, request.conversation_id, request.limits)
        .await;

    if let Some(worker) = worker.as_mut() {
        // Give in-flight work (if any slipped past the wait deadline) a
        // moment to settle before tearing the worker down, then stop
        // unconditionally — the response has already been computed either
        // way (spec.md: partial completion is reported, never masked).
        let _ = tokio::time::timeout(Duration::from_millis(50), worker.stop()).await;
    }

    PlannerResponse::from_run(run)
}

#[cfg(test)]
mod tests;
