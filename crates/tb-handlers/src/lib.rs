// SPDX-License-Identifier: MIT OR Apache-2.0
//! tb-handlers
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Example collaborator handlers (spec.md §9 "out-of-scope collaborators").
//! These are deliberately thin: enough to exercise every idempotency mode
//! and the `not_configured` path end to end, not a real CRM or SMS
//! integration. A handler here never touches the queue or a receipt
//! directly — it only returns a [`HandlerOutcome`] for the Worker to
//! persist.

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tb_core::{Effects, HandlerContext, HandlerOutcome};
use tb_dispatch::DispatcherBuilder;
use uuid::Uuid;

/// An in-memory stand-in for a CRM's leads table, keyed by phone number.
///
/// Real collaborators own a database; this one owns a `Mutex<BTreeMap>` so
/// `leads.create`'s `keyed` idempotency can be demonstrated without a
/// storage back end (spec.md §9 Non-goals: "no domain SQL migrations").
#[derive(Default)]
pub struct LeadsStore {
    by_phone: Mutex<BTreeMap<String, String>>,
}

impl LeadsStore {
    /// A fresh, empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a lead for `phone`, or return the existing lead id if one was
    /// already created for this phone number. The collaborator itself is
    /// idempotent here only incidentally; the Worker's keyed Idempotency
    /// Engine is what actually prevents this from running twice for the
    /// same `leads.create` call — see spec.md scenario S2.
    fn create_or_get(&self, phone: &str) -> String {
        let mut guard = self.by_phone.lock().unwrap();
        guard
            .entry(phone.to_string())
            .or_insert_with(|| format!("lead_{}", Uuid::new_v4().simple()))
            .clone()
    }
}

/// `leads.create` (spec.md scenario S2): keyed idempotency on `phone`.
///
/// # Panics
///
/// Panics if `input.phone` is missing or not a string; the Worker never
/// dispatches to this handler without first validating input against
/// `leads.create`'s registry schema, which requires `phone`.
pub async fn leads_create(input: serde_json::Value, ctx: HandlerContext, store: &LeadsStore) -> HandlerOutcome {
    let phone = input["phone"].as_str().expect("leads.create input missing required `phone`");
    let lead_id = store.create_or_get(phone);

    tracing::info!(call_id = %ctx.call_id, phone, lead_id, "created (or reused) lead");

    HandlerOutcome::success(
        serde_json::json!({"lead_id": lead_id}),
        Effects {
            db_writes: vec![serde_json::json!({"table": "leads", "id": lead_id, "phone": phone})],
            ..Effects::empty()
        },
    )
}

/// `os.create_note` (spec.md scenario S3): no idempotency, a plain
/// single-write collaborator used mainly to demonstrate that a schema
/// violation never reaches this function at all.
pub async fn os_create_note(input: serde_json::Value, ctx: HandlerContext) -> HandlerOutcome {
    let title = input["title"].as_str().unwrap_or_default();
    let content = input["content"].as_str().unwrap_or_default();
    let note_id = format!("note_{}", Uuid::new_v4().simple());

    tracing::info!(call_id = %ctx.call_id, note_id, "created note");

    HandlerOutcome::success(
        serde_json::json!({"note_id": note_id, "created_at": Utc::now().to_rfc3339()}),
        Effects {
            db_writes: vec![serde_json::json!({"table": "notes", "id": note_id, "title": title, "content": content})],
            ..Effects::empty()
        },
    )
}

/// `comms.send_sms` (spec.md §9): always `not_configured`. No SMS provider
/// is part of this core, and a `send_*` tool marked `not_configured` must
/// never perform a side effect — so this never touches `input` beyond
/// logging that it was asked to run.
pub async fn comms_send_sms(_input: serde_json::Value, ctx: HandlerContext) -> HandlerOutcome {
    tracing::info!(call_id = %ctx.call_id, "comms.send_sms invoked with no SMS provider configured");
    HandlerOutcome::not_configured(
        "no SMS provider is configured for this deployment",
        vec!["SMS_PROVIDER_API_KEY".into(), "SMS_PROVIDER_FROM_NUMBER".into()],
        vec![
            "set SMS_PROVIDER_API_KEY and SMS_PROVIDER_FROM_NUMBER".into(),
            "restart the worker pool to pick up the new environment".into(),
        ],
    )
}

/// Register every example handler under its registry tool name, mirroring
/// how a real collaborator crate wires itself into the dispatch table at
/// startup. `leads` owns the shared lead store so repeated calls across
/// the lifetime of the process can be observed reusing the same lead id.
#[must_use]
pub fn register_all(builder: DispatcherBuilder, leads: std::sync::Arc<LeadsStore>) -> DispatcherBuilder {
    builder
        .register("leads.create", move |input: serde_json::Value, ctx: HandlerContext| {
            let leads = std::sync::Arc::clone(&leads);
            async move { leads_create(input, ctx, &leads).await }
        })
        .register("os.create_note", |input: serde_json::Value, ctx: HandlerContext| os_create_note(input, ctx))
        .register("comms.send_sms", |input: serde_json::Value, ctx: HandlerContext| comms_send_sms(input, ctx))
}

#[cfg(test)]
mod tests;
