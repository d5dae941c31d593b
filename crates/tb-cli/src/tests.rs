use super::*;
use std::sync::Arc;
use wiring::{default_rules, embedded_registry};

fn request(message: &str, mode: PlannerMode) -> RunRequest {
    RunRequest {
        message: message.into(),
        mode,
        context: serde_json::Value::Null,
        conversation_id: None,
        limits: PlannerLimits::default(),
        with_worker: false,
        worker_config: WorkerConfig::default(),
    }
}

#[tokio::test]
async fn answer_mode_never_enqueues() {
    let registry = Arc::new(embedded_registry());
    let response = run(registry, default_rules(), request("take a note about lunch", PlannerMode::Answer)).await;

    assert!(response.ok);
    assert!(response.enqueued.is_empty());
    assert!(response.assistant_message.is_some());
}

#[tokio::test]
async fn enqueue_mode_without_a_worker_enqueues_but_never_resolves() {
    let registry = Arc::new(embedded_registry());
    let response = run(registry, default_rules(), request("please leave a note", PlannerMode::Enqueue)).await;

    assert!(response.ok);
    assert_eq!(response.enqueued.len(), 1);
    assert!(response.receipts.is_empty());
}

#[tokio::test]
async fn enqueue_and_wait_with_a_worker_resolves_a_receipt() {
    let registry = Arc::new(embedded_registry());
    let mut req = request("please leave a note", PlannerMode::EnqueueAndWait);
    req.with_worker = true;
    req.limits = PlannerLimits { wait_timeout_ms: 2_000, ..PlannerLimits::default() };
    req.worker_config = WorkerConfig {
        poll_interval: Duration::from_millis(10),
        ..WorkerConfig::default()
    };

    let response = run(registry, default_rules(), req).await;

    assert!(response.ok);
    assert_eq!(response.receipts.len(), 1);
}

#[tokio::test]
async fn no_rule_match_still_produces_ok_true_with_an_answer() {
    let registry = Arc::new(embedded_registry());
    let response = run(registry, default_rules(), request("do something unprecedented", PlannerMode::Enqueue)).await;

    assert!(response.ok);
    assert!(response.enqueued.is_empty());
    assert!(response.assistant_message.is_some());
}
