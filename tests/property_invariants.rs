//! Property tests for the universal invariants (spec.md §8).

use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tb_core::{
    validate::validate_receipt, CallStatus, Effects, HandlerContext, Idempotency, IdempotencyMode,
    Receipt, Tool,
};
use tb_dispatch::Dispatcher;
use tb_idempotency::stable_key;
use tb_queue::{InMemoryQueueStore, QueueStore};
use tb_registry::{Catalog, Registry};
use tb_validate::SchemaValidator;
use tb_worker::{Worker, WorkerConfig};

fn arb_call_status() -> impl Strategy<Value = CallStatus> {
    prop_oneof![
        Just(CallStatus::Queued),
        Just(CallStatus::Running),
        Just(CallStatus::Succeeded),
        Just(CallStatus::Failed),
        Just(CallStatus::NotConfigured),
    ]
}

proptest! {
    /// Property 2: terminal-only-status. A receipt built with any
    /// `CallStatus` passes `validate_receipt`'s RC1 check iff that status
    /// is one of the three terminal variants.
    #[test]
    fn receipt_status_terminal_iff_one_of_three(status in arb_call_status()) {
        let tool = Tool {
            name: "leads.create".into(),
            description: "create a lead".into(),
            permissions: Default::default(),
            input_schema: json!({}),
            output_schema: json!({}),
            idempotency: Idempotency { mode: IdempotencyMode::None, key_field: None },
            timeout_ms: 30_000,
            receipt_fields: vec![],
        };
        let receipt = Receipt::new(
            uuid::Uuid::new_v4(),
            "leads.create",
            status,
            json!({}),
            Effects::empty(),
            chrono::Utc::now(),
        );

        let terminal = matches!(status, CallStatus::Succeeded | CallStatus::Failed | CallStatus::NotConfigured);
        prop_assert_eq!(validate_receipt(&receipt, &tool).is_ok(), terminal);
    }

    /// Property grounding for keyed idempotency's dedupe key (spec.md §4.3):
    /// `stable_key` is a pure function of its three inputs.
    #[test]
    fn stable_key_is_deterministic(tool_name in "[a-z]{1,10}\\.[a-z]{1,10}", field in "[a-z]{1,10}", value in "[+0-9]{1,15}") {
        let a = stable_key(&tool_name, &field, &json!(value));
        let b = stable_key(&tool_name, &field, &json!(value));
        prop_assert_eq!(a, b);
    }

    /// Property grounding: distinct key values never collide into the same
    /// stable key for the same tool/field pair.
    #[test]
    fn stable_key_distinguishes_distinct_values(a in "[+0-9]{1,15}", b in "[+0-9]{1,15}") {
        prop_assume!(a != b);
        let ka = stable_key("leads.create", "phone", &json!(a));
        let kb = stable_key("leads.create", "phone", &json!(b));
        prop_assert_ne!(ka, kb);
    }
}

fn safe_retry_tool() -> Tool {
    Tool {
        name: "comms.send_sms".into(),
        description: "send an sms".into(),
        permissions: Default::default(),
        input_schema: json!({"type": "object", "properties": {"to": {"type": "string"}}, "required": ["to"]}),
        output_schema: json!({"type": "object"}),
        idempotency: Idempotency { mode: IdempotencyMode::SafeRetry, key_field: None },
        timeout_ms: 5_000,
        receipt_fields: vec![],
    }
}

/// Property 7: safe-retry idempotency. Two calls sharing an
/// `idempotency_key` yield identical `result` and only the first one
/// performs any `db_writes`.
#[test]
fn safe_retry_calls_sharing_a_key_share_one_result_and_one_side_effect() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut runner = proptest::test_runner::TestRunner::default();
    let strategy = "[a-zA-Z0-9]{4,20}";

    runner
        .run(&strategy, |key: String| {
            rt.block_on(async {
                let store = Arc::new(InMemoryQueueStore::new());
                let registry =
                    Registry::load(Catalog { version: "1".into(), tools: vec![safe_retry_tool()] }).unwrap();
                let call_count = Arc::new(std::sync::atomic::AtomicU64::new(0));
                let counted = Arc::clone(&call_count);
                let dispatcher = Dispatcher::builder()
                    .register("comms.send_sms", move |_input: serde_json::Value, _ctx: HandlerContext| {
                        let counted = Arc::clone(&counted);
                        async move {
                            counted.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                            tb_core::HandlerOutcome::success(
                                json!({"sent": true}),
                                Effects { db_writes: vec![json!({"table": "sms_log"})], ..Effects::empty() },
                            )
                        }
                    })
                    .build();

                let bus = Arc::new(tb_bus::InProcessEventBus::default());
                let config = WorkerConfig {
                    poll_interval: Duration::from_millis(5),
                    shutdown_timeout: Duration::from_secs(2),
                    ..WorkerConfig::default()
                };
                let mut worker = Worker::new(
                    config,
                    Arc::clone(&store) as Arc<dyn QueueStore>,
                    Arc::new(registry),
                    Arc::new(SchemaValidator::new()),
                    Arc::new(dispatcher),
                    bus,
                );
                worker.start();

                let first = store
                    .enqueue("comms.send_sms", json!({"to": "+61400000001"}), Some(key.clone()))
                    .await
                    .unwrap();
                let first_receipt = settle(&store, first).await;

                let second = store
                    .enqueue("comms.send_sms", json!({"to": "+61400000001"}), Some(key.clone()))
                    .await
                    .unwrap();
                let second_receipt = settle(&store, second).await;

                worker.stop().await;

                assert_eq!(first_receipt.result, second_receipt.result);
                assert!(!first_receipt.effects.db_writes.is_empty());
                assert!(second_receipt.effects.db_writes.is_empty());
                assert_eq!(call_count.load(std::sync::atomic::Ordering::Relaxed), 1);
            });
            Ok(())
        })
        .unwrap();
}

async fn settle(store: &InMemoryQueueStore, call_id: uuid::Uuid) -> tb_core::Receipt {
    for _ in 0..500 {
        if let Some(r) = store.find_receipt_by_call_id(call_id).await.unwrap() {
            return r;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("receipt for {call_id} never arrived");
}
