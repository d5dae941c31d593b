// SPDX-License-Identifier: MIT OR Apache-2.0
//! Canonical response shapes produced by handlers (spec.md §4.4, §9).
//!
//! The source system mixes `success(...)`, `notConfigured(...)`, and thrown
//! failures into ad-hoc shapes. Per the redesign note in spec.md §9 this is
//! collapsed into a single tagged [`HandlerOutcome`] that the Worker
//! translates into a persisted [`crate::Receipt`].

use crate::{Effects, TbError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a handler (or the Worker itself, on a dispatch fault) returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum HandlerOutcome {
    /// The handler completed its work.
    Succeeded {
        /// The result object, validated (softly) against `tool.output_schema`.
        result: Value,
        /// Side effects the handler performed.
        effects: Effects,
    },
    /// The tool exists but its external dependency is absent. Per spec.md
    /// §7 this is *not* an error: the handler must not have performed any
    /// side effect before returning this.
    NotConfigured {
        /// Why the dependency is absent (e.g. "HIGHLEVEL_API_KEY not set").
        reason: String,
        /// Environment variables the operator needs to set to unblock this.
        required_env: Vec<String>,
        /// Actionable next steps for a human operator.
        next_steps: Vec<String>,
    },
    /// The handler failed.
    Failed(TbError),
}

impl HandlerOutcome {
    /// Build a `Succeeded` outcome.
    #[must_use]
    pub fn success(result: Value, effects: Effects) -> Self {
        Self::Succeeded { result, effects }
    }

    /// Build a `NotConfigured` outcome.
    #[must_use]
    pub fn not_configured(
        reason: impl Into<String>,
        required_env: Vec<String>,
        next_steps: Vec<String>,
    ) -> Self {
        Self::NotConfigured {
            reason: reason.into(),
            required_env,
            next_steps,
        }
    }

    /// Build a `Failed` outcome from a [`TbError`].
    #[must_use]
    pub fn failed(error: TbError) -> Self {
        Self::Failed(error)
    }

    /// The `result` payload the Worker should persist on the receipt,
    /// regardless of which variant this is.
    #[must_use]
    pub fn result_payload(&self) -> Value {
        match self {
            Self::Succeeded { result, .. } => result.clone(),
            Self::NotConfigured {
                reason,
                required_env,
                next_steps,
            } => serde_json::json!({
                "reason": reason,
                "required_env": required_env,
                "next_steps": next_steps,
            }),
            Self::Failed(_) => Value::Object(Default::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tb_error::ErrorCode;

    #[test]
    fn not_configured_serializes_with_required_fields() {
        let outcome = HandlerOutcome::not_configured(
            "no SMS provider configured",
            vec!["SMS_API_KEY".to_string()],
            vec!["set SMS_API_KEY and restart the worker".to_string()],
        );
        let payload = outcome.result_payload();
        assert_eq!(payload["reason"], serde_json::json!("no SMS provider configured"));
        assert!(payload["required_env"].is_array());
    }

    #[test]
    fn failed_outcome_carries_error_code() {
        let outcome = HandlerOutcome::failed(TbError::new(ErrorCode::PreconditionFailed, "lead already closed"));
        match outcome {
            HandlerOutcome::Failed(e) => assert_eq!(e.code, ErrorCode::PreconditionFailed),
            _ => panic!("expected Failed"),
        }
    }
}
