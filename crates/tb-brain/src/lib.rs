// SPDX-License-Identifier: MIT OR Apache-2.0
//! tb-brain
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The Planner ("Brain", spec.md §4.8): turns a natural-language `message`
//! into an ordered sequence of registry-valid [`tb_core::ToolCall`] drafts
//! and drives their execution through the `answer`/`plan`/`enqueue`/
//! `enqueue_and_wait` mode matrix, recording every step on a [`BrainRun`].

use chrono::Utc;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tb_bus::{BusEvent, EventBus};
use tb_core::{BrainRun, BrainRunStatus, Decision, IdempotencyMode, PlannedCall, PlannerLimits, PlannerMode, Receipt};
use tb_error::{ErrorCode, TbError};
use tb_queue::QueueStore;
use tb_registry::Registry;
use tb_validate::{InputValidation, SchemaValidator};
use uuid::Uuid;

/// How a [`Rule`]'s pattern is matched against the raw message.
pub enum RulePattern {
    /// Case-insensitive substring match.
    Keyword(String),
    /// Regular-expression match.
    Regex(regex::Regex),
}

impl RulePattern {
    fn matches(&self, message: &str) -> bool {
        match self {
            Self::Keyword(kw) => message.to_lowercase().contains(&kw.to_lowercase()),
            Self::Regex(re) => re.is_match(message),
        }
    }
}

/// A single planner rule: `{pattern, tool_name, extract}` (spec.md §4.8).
pub struct Rule {
    /// Stable identifier used only for diagnostics and `Decision.reason`.
    pub id: String,
    /// What triggers this rule.
    pub pattern: RulePattern,
    /// The tool this rule drafts a call for.
    pub tool_name: String,
    /// Builds the draft `input` from the raw message and caller context.
    pub extract: Arc<dyn Fn(&str, &Value) -> Value + Send + Sync>,
}

impl Rule {
    /// Construct a rule matched by a case-insensitive keyword.
    #[must_use]
    pub fn keyword(
        id: impl Into<String>,
        keyword: impl Into<String>,
        tool_name: impl Into<String>,
        extract: impl Fn(&str, &Value) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            pattern: RulePattern::Keyword(keyword.into()),
            tool_name: tool_name.into(),
            extract: Arc::new(extract),
        }
    }

    /// Construct a rule matched by a compiled regular expression.
    #[must_use]
    pub fn regex(
        id: impl Into<String>,
        pattern: regex::Regex,
        tool_name: impl Into<String>,
        extract: impl Fn(&str, &Value) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            pattern: RulePattern::Regex(pattern),
            tool_name: tool_name.into(),
            extract: Arc::new(extract),
        }
    }
}

/// Ordered rule base (spec.md §4.8 "Rule base").
///
/// Rules are evaluated in registration order and the first match wins, so
/// ties in generality are resolved by earlier registration rather than by
/// any notion of specificity or priority.
#[derive(Default)]
pub struct RuleBase {
    rules: Vec<Rule>,
}

impl RuleBase {
    /// An empty rule base.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule at the end of the evaluation order.
    pub fn add(&mut self, rule: Rule) -> &mut Self {
        self.rules.push(rule);
        self
    }

    /// Find the first rule whose pattern matches `message`.
    #[must_use]
    pub fn first_match(&self, message: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.pattern.matches(message))
    }

    /// Number of rules currently registered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// `true` when no rules are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// The Planner: combines a [`RuleBase`] with the Registry, Validator, Queue
/// Store, and Event Bus it needs to plan, validate, enqueue, and wait.
pub struct Brain {
    registry: Arc<Registry>,
    validator: Arc<SchemaValidator>,
    store: Arc<dyn QueueStore>,
    bus: Arc<dyn EventBus>,
    rules: RuleBase,
}

impl Brain {
    /// Construct a Planner over a fixed rule base and its collaborators.
    #[must_use]
    pub fn new(
        registry: Arc<Registry>,
        validator: Arc<SchemaValidator>,
        store: Arc<dyn QueueStore>,
        bus: Arc<dyn EventBus>,
        rules: RuleBase,
    ) -> Self {
        Self {
            registry,
            validator,
            store,
            bus,
            rules,
        }
    }

    /// Run the planner pipeline for one `message` under `mode` and return
    /// the completed (or failed) [`BrainRun`] audit record.
    ///
    /// `created -> planning -> (enqueued | failed)`, and from
    /// `enqueued -> (waiting -> (completed | failed))` or directly
    /// `completed` for non-waiting modes (spec.md §4.8 "BrainRun state
    /// machine").
    pub async fn run(
        &self,
        message: impl Into<String>,
        mode: PlannerMode,
        context: Value,
        conversation_id: Option<String>,
        limits: PlannerLimits,
    ) -> BrainRun {
        let message = message.into();
        let mut run = BrainRun::new(message.clone(), mode, limits, Utc::now());
        run.context = context.clone();
        run.conversation_id = conversation_id;
        run.status = BrainRunStatus::Planning;

        let Some(rule) = self.rules.first_match(&message) else {
            run.decision = Some(Decision {
                mode_used: PlannerMode::Answer,
                reason: "no rule matched".into(),
            });
            run.assistant_message = Some(format!(
                "I didn't find an action for \"{message}\". Try rephrasing, or ask what I can do."
            ));
            return self.complete(run);
        };

        let draft_input = (rule.extract)(&message, &context);
        if run.limits.max_tool_calls == 0 {
            run.next_actions.push("plan truncated to 0 calls by max_tool_calls".into());
            run.decision = Some(Decision {
                mode_used: mode,
                reason: format!("matched rule `{}` but limits.max_tool_calls = 0", rule.id),
            });
            return self.complete(run);
        }

        let mut draft = PlannedCall {
            tool_name: rule.tool_name.clone(),
            input: draft_input,
            idempotency_key: None,
        };
        run.planned_tool_calls = vec![draft.clone()];

        // Pipeline step 1: the tool must exist.
        let Some(tool) = self.registry.get(&draft.tool_name) else {
            run.error = Some(TbError::new(
                ErrorCode::ToolNotFound,
                format!("rule `{}` drafted unknown tool `{}`", rule.id, draft.tool_name),
            ));
            run.status = BrainRunStatus::Failed;
            run.updated_at = Utc::now();
            return run;
        };

        // Pipeline step 2: validateInput must pass, or the whole plan aborts.
        if let InputValidation::Invalid(errors) = self.validator.validate_input(tool, &draft.input) {
            run.error = Some(TbError::schema_validation(errors));
            run.status = BrainRunStatus::Failed;
            run.updated_at = Utc::now();
            return run;
        }

        run.decision = Some(Decision {
            mode_used: mode,
            reason: format!("matched rule `{}`", rule.id),
        });

        if matches!(mode, PlannerMode::Answer | PlannerMode::Plan) {
            run.assistant_message = Some(match mode {
                PlannerMode::Answer => format!("I can run `{}` for you. Ask me to enqueue it to proceed.", tool.name),
                _ => format!("Planned `{}` (not enqueued).", tool.name),
            });
            return self.complete(run);
        }

        // Pipeline step 3: compute the idempotency key where applicable.
        // `keyed` tools derive their key from `input[key_field]` inside the
        // Idempotency Engine itself; only `safe-retry` needs the Planner to
        // mint a token, since nothing else identifies "the same intent".
        if tool.idempotency.mode == IdempotencyMode::SafeRetry {
            draft.idempotency_key = Some(safe_retry_key(&tool.name, &draft.input));
        }

        // Pipeline step 4: enqueue atomically with an audit link to this run.
        let call_id = match self.store.enqueue(&tool.name, draft.input.clone(), draft.idempotency_key.clone()).await {
            Ok(id) => id,
            Err(err) => {
                run.error = Some(err);
                run.status = BrainRunStatus::Failed;
                run.updated_at = Utc::now();
                return run;
            }
        };
        if let Err(err) = self
            .store
            .log_event("brain_call_enqueued", &call_id.to_string(), serde_json::json!({"brain_run_id": run.id}))
            .await
        {
            tracing::warn!(brain_run_id = %run.id, call_id = %call_id, error = %err, "failed to record enqueue audit event");
        }

        run.planned_tool_calls = vec![draft];
        run.enqueued_call_ids = vec![call_id];
        run.status = BrainRunStatus::Enqueued;
        run.updated_at = Utc::now();

        if mode == PlannerMode::Enqueue {
            run.assistant_message = Some(format!("Enqueued `{}`.", tool.name));
            return self.complete(run);
        }

        // mode == EnqueueAndWait: subscribe before waiting so no receipt
        // published between enqueue and subscribe is missed permanently —
        // the store poll fallback in `wait_for_receipts` covers that gap.
        run.status = BrainRunStatus::Waiting;
        run.updated_at = Utc::now();
        let timeout = Duration::from_millis(run.limits.wait_timeout_ms);
        let (receipts, timed_out) = self.wait_for_receipts(&run.enqueued_call_ids, timeout).await;
        let total = run.enqueued_call_ids.len();
        run.receipts = receipts;

        // A deadline passing before every receipt arrives is reported
        // honestly as a failed run (spec.md §8 "Planner honesty", scenario
        // S5) even though the calls themselves are still in flight and the
        // receipts collected so far are returned, not discarded.
        if timed_out {
            let pending: Vec<String> = run
                .enqueued_call_ids
                .iter()
                .filter(|id| !run.receipts.iter().any(|r| r.call_id == **id))
                .map(std::string::ToString::to_string)
                .collect();
            run.next_actions.push(format!(
                "wait_timeout_ms elapsed with {}/{} receipt(s) collected",
                run.receipts.len(),
                total
            ));
            run.assistant_message = Some(format!(
                "Collected {}/{} receipt(s); still pending: {}.",
                run.receipts.len(),
                total,
                pending.join(", ")
            ));
            run.error = Some(TbError::new(
                ErrorCode::ExecutionTimeout,
                format!("wait_timeout_ms elapsed with {}/{} receipt(s) collected", run.receipts.len(), total),
            ));
            run.status = BrainRunStatus::Failed;
            run.updated_at = Utc::now();
            return run;
        }

        run.assistant_message = Some(format!("Collected {}/{} receipt(s).", run.receipts.len(), total));
        self.complete(run)
    }

    fn complete(&self, mut run: BrainRun) -> BrainRun {
        run.status = BrainRunStatus::Completed;
        run.updated_at = Utc::now();
        run
    }

    /// Wait for a receipt for every id in `call_ids`, driven primarily by
    /// `receipt_created` events and falling back to polling the Queue Store
    /// directly (spec.md §4.8 "Waiting"). Returns whatever was collected by
    /// `timeout`, even if incomplete — partial completion is reported by
    /// the caller, never silently masked.
    async fn wait_for_receipts(&self, call_ids: &[Uuid], timeout: Duration) -> (Vec<Receipt>, bool) {
        let mut remaining: HashSet<Uuid> = call_ids.iter().copied().collect();
        let mut collected = Vec::new();
        let mut sub = self.bus.subscribe();

        // A receipt may already exist (e.g. an idempotency hit resolved
        // synchronously faster than we could subscribe).
        for id in call_ids {
            if let Ok(Some(receipt)) = self.store.find_receipt_by_call_id(*id).await {
                if remaining.remove(id) {
                    collected.push(receipt);
                }
            }
        }

        let deadline = tokio::time::Instant::now() + timeout;
        const POLL_FALLBACK_INTERVAL: Duration = Duration::from_millis(200);

        while !remaining.is_empty() {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                break;
            }
            let tick = POLL_FALLBACK_INTERVAL.min(deadline - now);

            tokio::select! {
                event = sub.recv() => {
                    if let Some(BusEvent::ReceiptCreated { receipt }) = event {
                        if remaining.remove(&receipt.call_id) {
                            collected.push(receipt);
                        }
                    }
                }
                _ = tokio::time::sleep(tick) => {
                    let mut newly_done = Vec::new();
                    for id in &remaining {
                        if let Ok(Some(receipt)) = self.store.find_receipt_by_call_id(*id).await {
                            newly_done.push(receipt);
                        }
                    }
                    for receipt in newly_done {
                        remaining.remove(&receipt.call_id);
                        collected.push(receipt);
                    }
                }
            }
        }

        (collected, !remaining.is_empty())
    }
}

/// Mint a stable idempotency token for a `safe-retry` draft: the Planner is
/// the only party that knows "this is the same intent", since the tool
/// itself carries no `key_field` to dedupe on.
fn safe_retry_key(tool_name: &str, input: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tool_name.as_bytes());
    hasher.update(b":");
    hasher.update(input.to_string().as_bytes());
    format!("brain:{:x}", hasher.finalize())
}
