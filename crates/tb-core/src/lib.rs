// SPDX-License-Identifier: MIT OR Apache-2.0
//! tb-core
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The stable contract for the tool backplane: [`Tool`] (registry entries),
//! [`ToolCall`] (queue entries), [`Receipt`] (terminal outcomes), and
//! [`BrainRun`] (planner audit records). If you only take one dependency,
//! take this one.

/// Path lookup and dotted-path helpers used by receipt validation and the
/// idempotency engine.
pub mod path;
/// Canonical response shapes produced by handlers (spec.md §4.4).
pub mod response;
/// Receipt and tool-call invariant checks (spec.md §3 invariants RC1/RC2/Q1).
pub mod validate;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

pub use response::HandlerOutcome;
pub use tb_error::{ErrorCode, FieldError, TbError};

/// Current contract version embedded in registry catalogs and audit records.
pub const CONTRACT_VERSION: &str = "toolplane/v1";

/// Default timeout for a tool when the registry entry omits `timeout_ms`.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Default wait timeout for `enqueue_and_wait` planner runs.
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 30_000;

/// Default cap on the number of tool calls a single planner run may produce.
pub const DEFAULT_MAX_TOOL_CALLS: usize = 10;

// ---------------------------------------------------------------------------
// Tool (Registry entry)
// ---------------------------------------------------------------------------

/// A declared tool contract, immutable once loaded into the [Registry].
///
/// [Registry]: https://docs.rs/tb-registry
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Tool {
    /// Dotted identifier `d1.d2...dn.method` (n ≥ 1; all lowercase snake).
    pub name: String,

    /// Human-readable description shown to the Planner and operators.
    pub description: String,

    /// Capability strings the caller must hold to invoke this tool.
    #[serde(default)]
    pub permissions: BTreeSet<String>,

    /// JSON-schema document validated against `ToolCall::input`.
    pub input_schema: serde_json::Value,

    /// JSON-schema document soft-validated against a successful `result`.
    pub output_schema: serde_json::Value,

    /// Idempotency contract for this tool (§4.3).
    pub idempotency: Idempotency,

    /// Hard execution timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Dotted paths that must resolve to a defined, non-null value in
    /// `result` for every `succeeded` receipt (invariant RC2).
    #[serde(default)]
    pub receipt_fields: Vec<String>,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// Idempotency mode and configuration for a [`Tool`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Idempotency {
    /// The resolution mode.
    pub mode: IdempotencyMode,

    /// Field in `input` holding the stable dedupe key. Required iff
    /// `mode == Keyed` (invariant R3).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_field: Option<String>,
}

/// The three idempotency modes (spec.md §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum IdempotencyMode {
    /// Always execute; the Idempotency Engine is skipped entirely.
    None,
    /// Dedupe on `call_id`, and optionally on caller-supplied `idempotency_key`.
    SafeRetry,
    /// Dedupe on a stable key derived from `input[key_field]`.
    Keyed,
}

// ---------------------------------------------------------------------------
// ToolCall (queue entry)
// ---------------------------------------------------------------------------

/// A queued request to execute a [`Tool`] with a specific input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Server-generated unique identifier.
    pub id: Uuid,

    /// The tool this call invokes.
    pub tool_name: String,

    /// Structured input payload, validated against `tool.input_schema`.
    pub input: serde_json::Value,

    /// Current lifecycle status (invariant Q1: `queued -> running -> terminal`).
    pub status: CallStatus,

    /// Caller-supplied token used by `safe-retry` dedupe.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,

    /// Structured failure detail, present only when `status == Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TbError>,

    /// When a worker claimed this call, if ever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,

    /// Identity of the worker holding (or that last held) this call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,

    /// Enqueue timestamp.
    pub created_at: DateTime<Utc>,

    /// Last status-transition timestamp.
    pub updated_at: DateTime<Utc>,
}

impl ToolCall {
    /// Construct a freshly queued call. `id`, `created_at`, and `updated_at`
    /// are stamped by the caller (the Queue Store assigns the authoritative
    /// `created_at` on insert; this constructor is for store implementations
    /// and tests).
    #[must_use]
    pub fn new(id: Uuid, tool_name: impl Into<String>, input: serde_json::Value, now: DateTime<Utc>) -> Self {
        Self {
            id,
            tool_name: tool_name.into(),
            input,
            status: CallStatus::Queued,
            idempotency_key: None,
            error: None,
            claimed_at: None,
            claimed_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// `true` once the call has reached a status that never transitions
    /// again (invariant C2).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Lifecycle status of a [`ToolCall`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    /// Waiting to be claimed.
    Queued,
    /// Claimed by exactly one worker (invariant C1).
    Running,
    /// Terminal: the handler completed successfully.
    Succeeded,
    /// Terminal: validation, dispatch, or the handler failed.
    Failed,
    /// Terminal: the tool's external dependency is absent.
    NotConfigured,
}

impl CallStatus {
    /// `true` for the three terminal statuses (invariant C2/RC1).
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::NotConfigured)
    }

    /// Whether `self -> next` is a legal transition under invariant Q1.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Queued, Self::Running) => true,
            (Self::Running, n) if n.is_terminal() => true,
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Receipt
// ---------------------------------------------------------------------------

/// The exactly-one, append-only, terminal record of a call's outcome
/// (invariant C3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    /// Unique receipt identifier.
    pub id: Uuid,

    /// The call this receipt belongs to. Unique across all receipts.
    pub call_id: Uuid,

    /// The tool that was invoked.
    pub tool_name: String,

    /// Terminal outcome (invariant RC1: never `Queued`/`Running`).
    pub status: CallStatus,

    /// For `succeeded`, the handler's result object (must satisfy
    /// `receipt_fields`, invariant RC2). For `not_configured`, contains
    /// `reason`, `required_env`, `next_steps`. For `failed`, typically empty.
    pub result: serde_json::Value,

    /// Structured side-effect log.
    pub effects: Effects,

    /// Receipt creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Receipt {
    /// Construct a new receipt. Panics in debug builds are intentionally
    /// avoided here — callers that need invariant enforcement should run
    /// [`validate::validate_receipt`] before persisting.
    #[must_use]
    pub fn new(
        call_id: Uuid,
        tool_name: impl Into<String>,
        status: CallStatus,
        result: serde_json::Value,
        effects: Effects,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            call_id,
            tool_name: tool_name.into(),
            status,
            result,
            effects,
            created_at: now,
        }
    }
}

/// Structured side-effect log attached to a [`Receipt`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Effects {
    /// Database writes the handler performed (collaborator-defined shape).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub db_writes: Vec<serde_json::Value>,

    /// Outbound messages sent (SMS/email/etc.), if any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages_sent: Vec<serde_json::Value>,

    /// Files written, if any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files_written: Vec<serde_json::Value>,

    /// External API calls made, if any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub external_calls: Vec<serde_json::Value>,

    /// Idempotency resolution metadata, set by the Idempotency Engine or the
    /// Worker (never by a handler directly).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency: Option<IdempotencyEffect>,

    /// Field-level validation errors (set only on `schema_validation_failed`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldError>,
}

impl Effects {
    /// An effects record with nothing in it.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Mark this effects record as an idempotency hit.
    #[must_use]
    pub fn idempotency_hit() -> Self {
        Self {
            idempotency: Some(IdempotencyEffect { hit: true }),
            ..Default::default()
        }
    }
}

/// Idempotency metadata recorded on a [`Receipt`] (spec.md §4.3/§8 property 6/7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyEffect {
    /// `true` when this receipt is a copy of a prior successful result
    /// rather than the product of a fresh handler execution.
    pub hit: bool,
}

// ---------------------------------------------------------------------------
// BrainRun (planner audit)
// ---------------------------------------------------------------------------

/// Audit record of a single Planner invocation (spec.md §3/§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrainRun {
    /// Unique run identifier.
    pub id: Uuid,

    /// Run creation timestamp.
    pub created_at: DateTime<Utc>,

    /// Last state-transition timestamp.
    pub updated_at: DateTime<Utc>,

    /// The raw natural-language message.
    pub message: String,

    /// The requested execution mode.
    pub mode: PlannerMode,

    /// Opaque conversation identifier, if the caller supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,

    /// Caller-supplied context blob (opaque to the core).
    #[serde(default)]
    pub context: serde_json::Value,

    /// Planner limits in effect for this run.
    pub limits: PlannerLimits,

    /// The mode actually used and why, once planning completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,

    /// The draft tool calls the rule base produced.
    #[serde(default)]
    pub planned_tool_calls: Vec<PlannedCall>,

    /// IDs of calls that were actually enqueued (modes `enqueue`/`enqueue_and_wait`).
    #[serde(default)]
    pub enqueued_call_ids: Vec<Uuid>,

    /// Current state-machine status.
    pub status: BrainRunStatus,

    /// Natural-language reply to surface to the caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_message: Option<String>,

    /// Suggested follow-up actions for the caller.
    #[serde(default)]
    pub next_actions: Vec<String>,

    /// Receipts collected so far (populated incrementally while waiting).
    #[serde(default)]
    pub receipts: Vec<Receipt>,

    /// Terminal error, if planning or waiting failed outright.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TbError>,
}

impl BrainRun {
    /// Start a new run in the `created` state.
    #[must_use]
    pub fn new(message: impl Into<String>, mode: PlannerMode, limits: PlannerLimits, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            message: message.into(),
            mode,
            conversation_id: None,
            context: serde_json::Value::Null,
            limits,
            decision: None,
            planned_tool_calls: Vec::new(),
            enqueued_call_ids: Vec::new(),
            status: BrainRunStatus::Created,
            assistant_message: None,
            next_actions: Vec::new(),
            receipts: Vec::new(),
            error: None,
        }
    }
}

/// The four Planner execution modes (spec.md §4.8). Distinct and not
/// collapsible: `answer`/`plan` never enqueue, `enqueue` never waits,
/// `enqueue_and_wait` does both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PlannerMode {
    /// Plan and validate only; respond with a help message.
    Answer,
    /// Plan and validate only; return the draft calls without enqueueing.
    Plan,
    /// Plan, validate, and enqueue; return immediately.
    Enqueue,
    /// Plan, validate, enqueue, and wait for every receipt (or a timeout).
    EnqueueAndWait,
}

/// Caps on a single planner run (spec.md §4.8 "Limits").
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PlannerLimits {
    /// Maximum number of tool calls a single plan may contain.
    pub max_tool_calls: usize,
    /// Wall-clock deadline for `enqueue_and_wait`, in milliseconds.
    pub wait_timeout_ms: u64,
}

impl Default for PlannerLimits {
    fn default() -> Self {
        Self {
            max_tool_calls: DEFAULT_MAX_TOOL_CALLS,
            wait_timeout_ms: DEFAULT_WAIT_TIMEOUT_MS,
        }
    }
}

/// The `BrainRun` state machine (spec.md §4.8):
/// `created -> planning -> (enqueued | failed)`, and from
/// `enqueued -> (waiting -> (completed | failed))` or directly `completed`
/// for non-waiting modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BrainRunStatus {
    /// Just constructed; no rule evaluation has happened yet.
    Created,
    /// Rule matching and validation are in progress.
    Planning,
    /// Calls were enqueued (or deliberately not, for `answer`/`plan` modes).
    Enqueued,
    /// `enqueue_and_wait`: blocked on receipts.
    Waiting,
    /// Run finished; see `assistant_message`/`receipts` for the outcome.
    Completed,
    /// Run aborted; see `error`.
    Failed,
}

/// The mode actually used for a run, and a short reason (e.g. "no rule
/// matched", "matched rule `create_lead`").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// The mode that was actually executed.
    pub mode_used: PlannerMode,
    /// Human-readable justification.
    pub reason: String,
}

/// A single draft tool call produced by the rule base, before it becomes a
/// persisted [`ToolCall`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedCall {
    /// The tool this draft targets.
    pub tool_name: String,
    /// The input the rule's `extract` function produced.
    pub input: serde_json::Value,
    /// Idempotency key computed for this draft, if applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

/// Read-only metadata every handler receives alongside its validated input
/// (spec.md §4.5 "Handler Dispatch").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerContext {
    /// The call this invocation is executing.
    pub call_id: Uuid,
    /// The tool name being dispatched (redundant with the call, kept for
    /// handlers that register under multiple names).
    pub tool_name: String,
    /// Arbitrary key-value metadata threaded through by the worker (e.g.
    /// `worker_id`), never mutated by the handler.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_never_transition() {
        assert!(CallStatus::Succeeded.is_terminal());
        assert!(!CallStatus::Succeeded.can_transition_to(CallStatus::Failed));
        assert!(!CallStatus::Running.can_transition_to(CallStatus::Queued));
    }

    #[test]
    fn legal_transitions() {
        assert!(CallStatus::Queued.can_transition_to(CallStatus::Running));
        assert!(CallStatus::Running.can_transition_to(CallStatus::Succeeded));
        assert!(CallStatus::Running.can_transition_to(CallStatus::Failed));
        assert!(CallStatus::Running.can_transition_to(CallStatus::NotConfigured));
        assert!(!CallStatus::Running.can_transition_to(CallStatus::Running));
    }

    #[test]
    fn idempotency_mode_kebab_case() {
        let v = serde_json::to_value(IdempotencyMode::SafeRetry).unwrap();
        assert_eq!(v, serde_json::json!("safe-retry"));
    }

    #[test]
    fn planner_limits_defaults_match_spec() {
        let limits = PlannerLimits::default();
        assert_eq!(limits.max_tool_calls, 10);
        assert_eq!(limits.wait_timeout_ms, 30_000);
    }
}
