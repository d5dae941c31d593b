// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Unified error taxonomy for the tool backplane.
//!
//! Every error code follows the pattern `TB-X###` where `X` is the category
//! letter and `###` is a three-digit number:
//!
//! - **V** — Validation errors
//! - **G** — Registry errors
//! - **X** — Execution errors
//! - **D** — Database/queue-store errors
//! - **I** — Integration errors
//! - **K** — Idempotency errors
//! - **B** — Business errors

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable, machine-readable error code shared by every layer of the backplane.
///
/// Mirrors the taxonomy in spec.md §7 exactly: Validation, Registry,
/// Execution, Database, Integration, Idempotency, Business.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // ── Validation (V) ───────────────────────────────────────────────
    /// The input failed JSON-schema validation.
    SchemaValidationFailed,
    /// A `keyed` tool's input is missing its declared `key_field`.
    MissingKeyField,
    /// A field holds a value outside its declared enum/format.
    UnknownValue,

    // ── Registry (G) ─────────────────────────────────────────────────
    /// The requested tool name has no registry entry.
    ToolNotFound,
    /// The registry catalog itself failed to load or validate.
    InvalidRegistry,

    // ── Execution (X) ────────────────────────────────────────────────
    /// No handler is registered for the resolved module/symbol.
    HandlerNotFound,
    /// The handler did not finish within `tool.timeout_ms`.
    ExecutionTimeout,
    /// The handler returned or panicked with a failure.
    HandlerThrew,
    /// The receipt could not be durably written.
    ReceiptWriteFailed,
    /// `claim_next` failed at the store layer.
    ClaimFailed,

    // ── Database (D) ─────────────────────────────────────────────────
    /// A unique constraint was violated (e.g. duplicate receipt for a call).
    UniqueViolation,
    /// A foreign-key constraint was violated.
    ForeignKeyViolation,
    /// The queue store could not be reached.
    ConnectionError,

    // ── Integration (I) ──────────────────────────────────────────────
    /// The tool's external dependency is absent; no side effect occurred.
    NotConfigured,
    /// Authentication against an external system failed.
    AuthFailed,
    /// The external system rate-limited the request.
    RateLimited,
    /// The external system did not respond in time.
    Timeout,
    /// The external system returned an error response.
    ApiError,

    // ── Idempotency (K) ──────────────────────────────────────────────
    /// `idempotency.mode = keyed` but `key_field` is absent from input.
    KeyMissing,
    /// Two concurrent calls raced on the same idempotency key.
    Violation,

    // ── Business (B) ─────────────────────────────────────────────────
    /// A handler-level precondition was not met.
    PreconditionFailed,
    /// The call attempted an invalid state transition.
    InvalidStateTransition,
}

impl ErrorCode {
    /// Machine-readable code string (e.g. `"TB-V001"`).
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::SchemaValidationFailed => "TB-V001",
            Self::MissingKeyField => "TB-V002",
            Self::UnknownValue => "TB-V003",

            Self::ToolNotFound => "TB-G001",
            Self::InvalidRegistry => "TB-G002",

            Self::HandlerNotFound => "TB-X001",
            Self::ExecutionTimeout => "TB-X002",
            Self::HandlerThrew => "TB-X003",
            Self::ReceiptWriteFailed => "TB-X004",
            Self::ClaimFailed => "TB-X005",

            Self::UniqueViolation => "TB-D001",
            Self::ForeignKeyViolation => "TB-D002",
            Self::ConnectionError => "TB-D003",

            Self::NotConfigured => "TB-I001",
            Self::AuthFailed => "TB-I002",
            Self::RateLimited => "TB-I003",
            Self::Timeout => "TB-I004",
            Self::ApiError => "TB-I005",

            Self::KeyMissing => "TB-K001",
            Self::Violation => "TB-K002",

            Self::PreconditionFailed => "TB-B001",
            Self::InvalidStateTransition => "TB-B002",
        }
    }

    /// Human-readable category label.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::SchemaValidationFailed | Self::MissingKeyField | Self::UnknownValue => {
                "validation"
            }
            Self::ToolNotFound | Self::InvalidRegistry => "registry",
            Self::HandlerNotFound
            | Self::ExecutionTimeout
            | Self::HandlerThrew
            | Self::ReceiptWriteFailed
            | Self::ClaimFailed => "execution",
            Self::UniqueViolation | Self::ForeignKeyViolation | Self::ConnectionError => {
                "database"
            }
            Self::NotConfigured
            | Self::AuthFailed
            | Self::RateLimited
            | Self::Timeout
            | Self::ApiError => "integration",
            Self::KeyMissing | Self::Violation => "idempotency",
            Self::PreconditionFailed | Self::InvalidStateTransition => "business",
        }
    }

    /// Short human-readable description of this error code.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::SchemaValidationFailed => "input failed JSON-schema validation",
            Self::MissingKeyField => "a keyed tool's input is missing its key_field",
            Self::UnknownValue => "a field holds a value outside its declared domain",
            Self::ToolNotFound => "no registry entry for the requested tool name",
            Self::InvalidRegistry => "the registry catalog failed to load or validate",
            Self::HandlerNotFound => "no handler registered for the resolved symbol",
            Self::ExecutionTimeout => "the handler did not finish within its timeout",
            Self::HandlerThrew => "the handler returned or panicked with a failure",
            Self::ReceiptWriteFailed => "the receipt could not be durably written",
            Self::ClaimFailed => "claim_next failed at the store layer",
            Self::UniqueViolation => "a unique constraint was violated",
            Self::ForeignKeyViolation => "a foreign-key constraint was violated",
            Self::ConnectionError => "the queue store could not be reached",
            Self::NotConfigured => "the tool's external dependency is absent",
            Self::AuthFailed => "authentication against an external system failed",
            Self::RateLimited => "the external system rate-limited the request",
            Self::Timeout => "the external system did not respond in time",
            Self::ApiError => "the external system returned an error response",
            Self::KeyMissing => "idempotency key_field is absent from input",
            Self::Violation => "two concurrent calls raced on the same idempotency key",
            Self::PreconditionFailed => "a handler-level precondition was not met",
            Self::InvalidStateTransition => "the call attempted an invalid state transition",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// A single structured validation failure (dotted path + keyword + message).
///
/// This is the shape the Validator (spec.md §4.2) emits into
/// `effects.errors` on a `schema_validation_failed` receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Dotted/JSON-pointer path to the offending field (e.g. `/content`).
    pub path: String,
    /// The JSON-schema validation keyword that failed (e.g. `"required"`).
    pub keyword: String,
    /// Human-readable message.
    pub message: String,
}

impl FieldError {
    /// Construct a new field error.
    pub fn new(path: impl Into<String>, keyword: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            keyword: keyword.into(),
            message: message.into(),
        }
    }
}

/// A structured failure attached to a `failed` receipt or returned by a
/// handler. Mirrors spec.md §9's collapsed `Failed(code, message, details)`
/// variant.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct TbError {
    /// The stable error code.
    pub code: ErrorCode,
    /// Human-readable message for logs and `assistant_message` surfaces.
    pub message: String,
    /// Optional structured detail payload (e.g. field errors, retry hints).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl TbError {
    /// Construct a new error with no extra detail payload.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Attach a structured detail payload.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Build a `schema_validation_failed` error carrying the field-error list.
    #[must_use]
    pub fn schema_validation(errors: Vec<FieldError>) -> Self {
        let message = format!("input failed schema validation ({} error(s))", errors.len());
        Self::new(ErrorCode::SchemaValidationFailed, message)
            .with_details(serde_json::json!({ "errors": errors }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_is_stable_and_categorized() {
        assert_eq!(ErrorCode::ToolNotFound.code(), "TB-G001");
        assert_eq!(ErrorCode::ToolNotFound.category(), "registry");
        assert_eq!(ErrorCode::ExecutionTimeout.category(), "execution");
    }

    #[test]
    fn display_is_the_code() {
        assert_eq!(ErrorCode::HandlerNotFound.to_string(), "TB-X001");
    }

    #[test]
    fn schema_validation_carries_field_errors() {
        let e = TbError::schema_validation(vec![FieldError::new("/content", "required", "content is required")]);
        assert_eq!(e.code, ErrorCode::SchemaValidationFailed);
        assert!(e.details.is_some());
    }
}
