//! The Planner request/response boundary (spec.md §6).
//!
//! [`PlannerResponse`] is the single JSON document this binary writes to
//! standard output; [`PlannerResponse::from_run`] is the only place a
//! [`BrainRun`] gets flattened into it.

use serde::Serialize;
use serde_json::Value;
use tb_core::{BrainRun, BrainRunStatus, Decision, PlannedCall, Receipt};
use tb_error::ErrorCode;
use uuid::Uuid;

/// One entry of the response's `enqueued` list.
#[derive(Debug, Serialize)]
pub struct EnqueuedEntry {
    /// The persisted call id.
    pub call_id: Uuid,
    /// The tool it targets.
    pub tool_name: String,
}

/// One entry of the response's `errors` list.
#[derive(Debug, Serialize)]
pub struct ErrorEntry {
    /// Stable error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Structured detail payload, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// The exact shape spec.md §6 requires at the Planner/caller boundary.
#[derive(Debug, Serialize)]
pub struct PlannerResponse {
    /// `true` iff the run reached `completed` with no terminal error.
    pub ok: bool,
    /// The `BrainRun` this response summarizes.
    pub run_id: Uuid,
    /// The mode actually used and why, once planning completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    /// The draft tool calls the rule base produced.
    pub planned_tool_calls: Vec<PlannedCall>,
    /// Calls that were actually enqueued.
    pub enqueued: Vec<EnqueuedEntry>,
    /// Receipts collected before the run completed (possibly partial).
    pub receipts: Vec<Receipt>,
    /// Natural-language reply to surface to the caller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant_message: Option<String>,
    /// Suggested follow-up actions for the caller.
    pub next_actions: Vec<String>,
    /// Non-empty only when the run aborted outright.
    pub errors: Vec<ErrorEntry>,
}

impl PlannerResponse {
    /// Flatten a completed or failed [`BrainRun`] into the wire shape.
    #[must_use]
    pub fn from_run(run: BrainRun) -> Self {
        let ok = run.status == BrainRunStatus::Completed && run.error.is_none();
        let enqueued = run
            .enqueued_call_ids
            .iter()
            .zip(run.planned_tool_calls.iter())
            .map(|(call_id, planned)| EnqueuedEntry {
                call_id: *call_id,
                tool_name: planned.tool_name.clone(),
            })
            .collect();
        let errors = run
            .error
            .into_iter()
            .map(|e| ErrorEntry {
                code: e.code,
                message: e.message,
                details: e.details,
            })
            .collect();

        Self {
            ok,
            run_id: run.id,
            decision: run.decision,
            planned_tool_calls: run.planned_tool_calls,
            enqueued,
            receipts: run.receipts,
            assistant_message: run.assistant_message,
            next_actions: run.next_actions,
            errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tb_core::PlannerLimits;
    use tb_core::PlannerMode;
    use tb_error::TbError;

    #[test]
    fn ok_is_false_when_run_carries_an_error() {
        let mut run = BrainRun::new("hi", PlannerMode::Enqueue, PlannerLimits::default(), Utc::now());
        run.status = BrainRunStatus::Failed;
        run.error = Some(TbError::new(ErrorCode::ToolNotFound, "nope"));

        let response = PlannerResponse::from_run(run);
        assert!(!response.ok);
        assert_eq!(response.errors.len(), 1);
    }

    #[test]
    fn ok_is_true_for_a_clean_completed_run() {
        let mut run = BrainRun::new("hi", PlannerMode::Answer, PlannerLimits::default(), Utc::now());
        run.status = BrainRunStatus::Completed;

        let response = PlannerResponse::from_run(run);
        assert!(response.ok);
        assert!(response.errors.is_empty());
    }

    #[test]
    fn enqueued_pairs_call_ids_with_their_tool_names() {
        let mut run = BrainRun::new("hi", PlannerMode::Enqueue, PlannerLimits::default(), Utc::now());
        run.status = BrainRunStatus::Completed;
        let call_id = Uuid::new_v4();
        run.enqueued_call_ids = vec![call_id];
        run.planned_tool_calls = vec![PlannedCall {
            tool_name: "os.create_note".into(),
            input: serde_json::json!({}),
            idempotency_key: None,
        }];

        let response = PlannerResponse::from_run(run);
        assert_eq!(response.enqueued.len(), 1);
        assert_eq!(response.enqueued[0].call_id, call_id);
        assert_eq!(response.enqueued[0].tool_name, "os.create_note");
    }
}
