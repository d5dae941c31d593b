use super::*;
use serde_json::json;
use std::sync::Arc;

fn ctx(tool_name: &str) -> HandlerContext {
    HandlerContext {
        call_id: Uuid::new_v4(),
        tool_name: tool_name.into(),
        metadata: Default::default(),
    }
}

#[tokio::test]
async fn leads_create_returns_the_same_lead_id_for_the_same_phone() {
    let store = LeadsStore::new();

    let first = leads_create(json!({"phone": "+61400000001"}), ctx("leads.create"), &store).await;
    let second = leads_create(json!({"phone": "+61400000001"}), ctx("leads.create"), &store).await;

    let (id1, id2) = match (first, second) {
        (HandlerOutcome::Succeeded { result: r1, .. }, HandlerOutcome::Succeeded { result: r2, .. }) => {
            (r1["lead_id"].clone(), r2["lead_id"].clone())
        }
        _ => panic!("expected success"),
    };
    assert_eq!(id1, id2);
}

#[tokio::test]
async fn leads_create_assigns_distinct_ids_to_distinct_phones() {
    let store = LeadsStore::new();

    let a = leads_create(json!({"phone": "+61400000001"}), ctx("leads.create"), &store).await;
    let b = leads_create(json!({"phone": "+61400000002"}), ctx("leads.create"), &store).await;

    let extract = |o: HandlerOutcome| match o {
        HandlerOutcome::Succeeded { result, .. } => result["lead_id"].as_str().unwrap().to_string(),
        _ => panic!("expected success"),
    };
    assert_ne!(extract(a), extract(b));
}

#[tokio::test]
async fn os_create_note_returns_a_fresh_note_id_and_db_write() {
    let outcome = os_create_note(json!({"title": "hi", "content": "there"}), ctx("os.create_note")).await;
    match outcome {
        HandlerOutcome::Succeeded { result, effects } => {
            assert!(result["note_id"].as_str().unwrap().starts_with("note_"));
            assert_eq!(effects.db_writes.len(), 1);
        }
        _ => panic!("expected success"),
    }
}

#[tokio::test]
async fn comms_send_sms_is_always_not_configured_and_never_writes() {
    let outcome = comms_send_sms(json!({"to": "+61400000001", "body": "hi"}), ctx("comms.send_sms")).await;
    match outcome {
        HandlerOutcome::NotConfigured {
            reason,
            required_env,
            next_steps,
        } => {
            assert!(reason.contains("SMS"));
            assert!(!required_env.is_empty());
            assert!(!next_steps.is_empty());
        }
        _ => panic!("expected not_configured"),
    }
}

#[tokio::test]
async fn register_all_wires_every_example_handler() {
    let leads = Arc::new(LeadsStore::new());
    let dispatcher = register_all(tb_dispatch::Dispatcher::builder(), leads).build();

    assert_eq!(dispatcher.len(), 3);
    assert!(dispatcher.resolve("leads.create").is_ok());
    assert!(dispatcher.resolve("os.create_note").is_ok());
    assert!(dispatcher.resolve("comms.send_sms").is_ok());
}
