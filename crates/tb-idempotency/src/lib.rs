// SPDX-License-Identifier: MIT OR Apache-2.0
//! tb-idempotency
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The Idempotency Engine (spec.md §4.3): resolves a `none`/`safe-retry`/
//! `keyed` tool call to either a hit (return the prior receipt's result) or
//! a miss (dispatch the handler). Evaluated by the Worker *before* handler
//! dispatch, never after.

use serde_json::Value;
use tb_core::path::get_path;
use tb_core::{Receipt, Tool, ToolCall};
use tb_core::IdempotencyMode;
use tb_error::{ErrorCode, TbError};
use tb_queue::QueueStore;

/// Outcome of consulting the Idempotency Engine for a single call.
#[derive(Debug, Clone)]
pub enum Resolution {
    /// `mode = none`: always dispatch the handler.
    Skip,
    /// A prior successful receipt already answers this call; dispatch is
    /// skipped and the Worker copies `prior.result` into a fresh receipt
    /// with `effects.idempotency.hit = true`.
    Hit(Receipt),
    /// No prior receipt matches; dispatch the handler.
    Miss,
}

/// Consult the Idempotency Engine for `call` against its `tool` definition.
///
/// # Errors
///
/// Returns `TbError { code: KeyMissing }` when `mode = keyed` and
/// `input[key_field]` is absent (spec.md §4.3: "otherwise → failed with
/// missing key_field"). Propagates any `QueueStore` error.
pub async fn resolve(
    store: &dyn QueueStore,
    tool: &Tool,
    call: &ToolCall,
) -> Result<Resolution, TbError> {
    match tool.idempotency.mode {
        IdempotencyMode::None => Ok(Resolution::Skip),
        IdempotencyMode::SafeRetry => resolve_safe_retry(store, tool, call).await,
        IdempotencyMode::Keyed => resolve_keyed(store, tool, call).await,
    }
}

async fn resolve_safe_retry(
    store: &dyn QueueStore,
    tool: &Tool,
    call: &ToolCall,
) -> Result<Resolution, TbError> {
    if let Some(prior) = store.find_receipt_by_call_id(call.id).await? {
        if prior.status == tb_core::CallStatus::Succeeded {
            return Ok(Resolution::Hit(prior));
        }
    }

    if let Some(key) = &call.idempotency_key {
        if let Some(prior) = store
            .find_successful_receipt_by_tool_and_key(&tool.name, key)
            .await?
        {
            return Ok(Resolution::Hit(prior));
        }
    }

    Ok(Resolution::Miss)
}

async fn resolve_keyed(
    store: &dyn QueueStore,
    tool: &Tool,
    call: &ToolCall,
) -> Result<Resolution, TbError> {
    let key_field = tool
        .idempotency
        .key_field
        .as_deref()
        .expect("Registry::load rejects keyed tools without a key_field (invariant R3)");

    let key_value = get_path(&call.input, key_field).ok_or_else(|| {
        TbError::new(
            ErrorCode::KeyMissing,
            format!("input is missing key_field `{key_field}`"),
        )
    })?;

    if let Some(prior) = store
        .find_successful_receipt_by_tool_and_input_field(&tool.name, key_field, key_value)
        .await?
    {
        return Ok(Resolution::Hit(prior));
    }

    Ok(Resolution::Miss)
}

/// Compute the stable dedupe key for a `keyed` tool call:
/// `tool_name + ":" + key_field + ":" + input[key_field]` (spec.md §4.3).
///
/// This is exposed for handlers that need to reserve a unique slot at their
/// own storage layer (spec.md §9 "Implicit retry via exception codes"
/// redesign note) using the same key the engine itself computes.
#[must_use]
pub fn stable_key(tool_name: &str, key_field: &str, value: &Value) -> String {
    let rendered = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    format!("{tool_name}:{key_field}:{rendered}")
}
