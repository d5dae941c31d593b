// SPDX-License-Identifier: MIT OR Apache-2.0
//! Receipt and tool-call invariant checks.
//!
//! This module checks the structural invariants a [`Receipt`] must satisfy
//! (spec.md §3 RC1/RC2, §8 property 1/2) — it is deliberately *not* the
//! JSON-schema Validator (spec.md §4.2); that lives in the `tb-validate`
//! crate and needs the owning [`Tool`] to compile a schema validator.

use crate::path::get_path;
use crate::{CallStatus, Receipt, Tool};
use std::fmt;

/// A single receipt-invariant violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiptInvariantError {
    /// Invariant RC1: a receipt's status was not one of the three terminal
    /// statuses.
    NonTerminalStatus {
        /// The offending status.
        status: CallStatus,
    },
    /// Invariant RC2: a succeeded receipt's `result` is missing a field the
    /// tool's `receipt_fields` requires.
    MissingReceiptField {
        /// The dotted path that failed to resolve.
        path: String,
    },
}

impl fmt::Display for ReceiptInvariantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonTerminalStatus { status } => {
                write!(f, "receipt has non-terminal status {status:?}")
            }
            Self::MissingReceiptField { path } => {
                write!(f, "result is missing required receipt field `{path}`")
            }
        }
    }
}

impl std::error::Error for ReceiptInvariantError {}

/// Validate a [`Receipt`] against its owning [`Tool`] definition.
///
/// Checks invariant RC1 (terminal-only status) unconditionally, and
/// invariant RC2 (`receipt_fields` resolve in `result`) only when
/// `status == Succeeded`.
///
/// # Errors
///
/// Returns every violation found; does not short-circuit on the first one.
pub fn validate_receipt(receipt: &Receipt, tool: &Tool) -> Result<(), Vec<ReceiptInvariantError>> {
    let mut errors = Vec::new();

    if !receipt.status.is_terminal() {
        errors.push(ReceiptInvariantError::NonTerminalStatus {
            status: receipt.status,
        });
    }

    if receipt.status == CallStatus::Succeeded {
        for field in &tool.receipt_fields {
            if get_path(&receipt.result, field).is_none() {
                errors.push(ReceiptInvariantError::MissingReceiptField { path: field.clone() });
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Effects, Idempotency, IdempotencyMode};
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn tool(receipt_fields: Vec<&str>) -> Tool {
        Tool {
            name: "leads.create".into(),
            description: "create a lead".into(),
            permissions: Default::default(),
            input_schema: json!({}),
            output_schema: json!({}),
            idempotency: Idempotency {
                mode: IdempotencyMode::None,
                key_field: None,
            },
            timeout_ms: 30_000,
            receipt_fields: receipt_fields.into_iter().map(String::from).collect(),
        }
    }

    #[test]
    fn succeeded_receipt_with_all_fields_is_valid() {
        let t = tool(vec!["lead_id"]);
        let r = Receipt::new(
            Uuid::new_v4(),
            "leads.create",
            CallStatus::Succeeded,
            json!({"lead_id": "abc"}),
            Effects::empty(),
            Utc::now(),
        );
        assert!(validate_receipt(&r, &t).is_ok());
    }

    #[test]
    fn succeeded_receipt_missing_field_is_invalid() {
        let t = tool(vec!["lead_id"]);
        let r = Receipt::new(
            Uuid::new_v4(),
            "leads.create",
            CallStatus::Succeeded,
            json!({}),
            Effects::empty(),
            Utc::now(),
        );
        let errs = validate_receipt(&r, &t).unwrap_err();
        assert_eq!(errs.len(), 1);
    }

    #[test]
    fn failed_receipt_never_checks_receipt_fields() {
        let t = tool(vec!["lead_id"]);
        let r = Receipt::new(
            Uuid::new_v4(),
            "leads.create",
            CallStatus::Failed,
            json!({}),
            Effects::empty(),
            Utc::now(),
        );
        assert!(validate_receipt(&r, &t).is_ok());
    }
}
