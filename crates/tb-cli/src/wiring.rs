//! Wires the concrete collaborators this binary ships with: an embedded
//! three-tool catalog (or one loaded from disk), the example handlers from
//! `tb-handlers`, and a small keyword rule base covering all three.
//!
//! A real deployment would replace every piece of this module with its own
//! registry file and collaborator crate; nothing here is part of the core
//! contract.

use anyhow::{Context, Result};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tb_brain::{Rule, RuleBase};
use tb_core::{Idempotency, IdempotencyMode, Tool};
use tb_dispatch::Dispatcher;
use tb_handlers::LeadsStore;
use tb_registry::{Catalog, Registry};

/// Load a Registry catalog from a JSON file on disk.
pub fn load_registry_file(path: &Path) -> Result<Registry> {
    let content = std::fs::read_to_string(path).with_context(|| format!("read registry file {}", path.display()))?;
    let catalog: Catalog =
        serde_json::from_str(&content).with_context(|| format!("parse registry catalog {}", path.display()))?;
    Registry::load(catalog).map_err(|errors| {
        let messages: Vec<String> = errors.iter().map(|e| e.message.clone()).collect();
        anyhow::anyhow!("registry failed to load: {}", messages.join("; "))
    })
}

/// The catalog backing the three example handlers, used when no
/// `--registry` file is supplied.
#[must_use]
pub fn embedded_registry() -> Registry {
    let tools = vec![
        Tool {
            name: "leads.create".into(),
            description: "Create (or reuse) a lead for a phone number".into(),
            permissions: Default::default(),
            input_schema: json!({
                "type": "object",
                "properties": {"phone": {"type": "string"}},
                "required": ["phone"]
            }),
            output_schema: json!({"type": "object", "properties": {"lead_id": {"type": "string"}}}),
            idempotency: Idempotency {
                mode: IdempotencyMode::Keyed,
                key_field: Some("phone".into()),
            },
            timeout_ms: 5_000,
            receipt_fields: vec!["lead_id".into()],
        },
        Tool {
            name: "os.create_note".into(),
            description: "Create a note".into(),
            permissions: Default::default(),
            input_schema: json!({
                "type": "object",
                "properties": {"title": {"type": "string"}, "content": {"type": "string"}},
                "required": ["title", "content"]
            }),
            output_schema: json!({"type": "object", "properties": {"note_id": {"type": "string"}}}),
            idempotency: Idempotency {
                mode: IdempotencyMode::None,
                key_field: None,
            },
            timeout_ms: 5_000,
            receipt_fields: vec!["note_id".into()],
        },
        Tool {
            name: "comms.send_sms".into(),
            description: "Send an SMS (no provider configured in this deployment)".into(),
            permissions: Default::default(),
            input_schema: json!({
                "type": "object",
                "properties": {"to": {"type": "string"}, "body": {"type": "string"}},
                "required": ["to", "body"]
            }),
            output_schema: json!({"type": "object"}),
            idempotency: Idempotency {
                mode: IdempotencyMode::SafeRetry,
                key_field: None,
            },
            timeout_ms: 5_000,
            receipt_fields: vec![],
        },
    ];
    Registry::load(Catalog {
        version: "1".into(),
        tools,
    })
    .expect("embedded catalog is statically known-valid")
}

/// A minimal keyword rule base covering the three embedded tools. The first
/// rule whose keyword appears in the message wins (spec.md §4.8); a
/// deployment with a richer Planner would replace this with its own
/// `RuleBase` rather than extend this one.
#[must_use]
pub fn default_rules() -> RuleBase {
    let mut rules = RuleBase::new();
    rules.add(Rule::keyword("create_lead", "lead", "leads.create", |message, context| {
        let phone = context["phone"].as_str().unwrap_or("+10000000000");
        json!({"phone": phone, "source_message": message})
    }));
    rules.add(Rule::keyword("create_note", "note", "os.create_note", |message, _context| {
        json!({"title": "From the Planner", "content": message})
    }));
    rules.add(Rule::keyword("send_sms", "text", "comms.send_sms", |message, context| {
        let to = context["to"].as_str().unwrap_or("+10000000000");
        json!({"to": to, "body": message})
    }));
    rules
}

/// Build the dispatch table backing `embedded_registry()`.
#[must_use]
pub fn embedded_dispatcher(leads: Arc<LeadsStore>) -> Dispatcher {
    tb_handlers::register_all(Dispatcher::builder(), leads).build()
}
