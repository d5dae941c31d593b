// SPDX-License-Identifier: MIT OR Apache-2.0
//! tb-queue
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The abstract Queue Store contract the Executor Worker consumes
//! (spec.md §4.6), plus [`InMemoryQueueStore`] — a tokio-native
//! implementation that satisfies every invariant (Q1, C1–C3, RC1–RC3) so
//! the rest of the workspace is testable without a real database. This is
//! deliberately *not* "the" storage backend (spec.md §1 Non-goals): a
//! relational or broker-backed implementation only needs to satisfy the
//! same [`QueueStore`] trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Mutex;
use tb_core::{CallStatus, Effects, ToolCall};
use tb_core::Receipt;
use tb_error::{ErrorCode, TbError};
use uuid::Uuid;

/// An append-only audit event, independent of receipts (spec.md §4.6
/// `log_event`).
#[derive(Debug, Clone)]
pub struct AuditEvent {
    /// Event creation timestamp.
    pub at: DateTime<Utc>,
    /// Event type tag (e.g. `"call_enqueued"`).
    pub event_type: String,
    /// The aggregate the event concerns (typically a call or run id).
    pub aggregate: String,
    /// Arbitrary structured payload.
    pub payload: serde_json::Value,
}

/// The atomic operations the Executor Worker and Idempotency Engine need
/// from a backing store (spec.md §4.6).
///
/// Implementations must uphold:
/// - invariant Q1: `queued -> running -> {succeeded, failed, not_configured}`
///   is the only legal status path;
/// - invariant C1: at most one worker ever holds a call in `running`;
/// - invariant RC1/RC2/RC3 on every receipt this store returns.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert a new call with `status = queued`, `created_at = now`.
    async fn enqueue(
        &self,
        tool_name: &str,
        input: serde_json::Value,
        idempotency_key: Option<String>,
    ) -> Result<Uuid, TbError>;

    /// Atomically select the oldest `queued` call, transition it to
    /// `running`, stamp `claimed_at`/`claimed_by`, and return it. Returns
    /// `Ok(None)` when nothing is queued. Two concurrent callers must never
    /// receive the same call (invariant C1).
    async fn claim_next(&self, worker_id: &str) -> Result<Option<ToolCall>, TbError>;

    /// Transition `call_id` from `running` to a terminal status. Rejects
    /// illegal transitions (invariant Q1) with `InvalidStateTransition`.
    async fn complete(
        &self,
        call_id: Uuid,
        status: CallStatus,
        error: Option<TbError>,
    ) -> Result<(), TbError>;

    /// Write the single, permanent receipt for `call_id`. A unique
    /// constraint on `call_id` rejects a second insert with
    /// `UniqueViolation` (invariant C3/RC3).
    async fn write_receipt(
        &self,
        call_id: Uuid,
        tool_name: &str,
        status: CallStatus,
        result: serde_json::Value,
        effects: Effects,
    ) -> Result<Uuid, TbError>;

    /// Look up the receipt for a specific call, if one has been written.
    async fn find_receipt_by_call_id(&self, call_id: Uuid) -> Result<Option<Receipt>, TbError>;

    /// Used by the `safe-retry` Idempotency Engine path: the most recent
    /// successful receipt for any call of `tool_name` whose
    /// `idempotency_key` matches, or `None` on a miss.
    async fn find_successful_receipt_by_tool_and_key(
        &self,
        tool_name: &str,
        idempotency_key: &str,
    ) -> Result<Option<Receipt>, TbError>;

    /// Used by the `keyed` Idempotency Engine path: the most recent
    /// successful receipt for any call of `tool_name` whose `input`
    /// contains `key_field == key_value`, or `None` on a miss.
    async fn find_successful_receipt_by_tool_and_input_field(
        &self,
        tool_name: &str,
        key_field: &str,
        key_value: &serde_json::Value,
    ) -> Result<Option<Receipt>, TbError>;

    /// Append an audit event, independent of the receipt stream.
    async fn log_event(&self, event_type: &str, aggregate: &str, payload: serde_json::Value) -> Result<(), TbError>;

    /// Re-queue every call still `running` whose `claimed_at` is older than
    /// `older_than`. This is the primitive a crash-recovery reaper needs
    /// (spec.md §9 Open Question #1); the core Worker never calls it
    /// automatically — see DESIGN.md for the policy this workspace chose.
    async fn reap_stale(&self, older_than: chrono::Duration) -> Result<Vec<Uuid>, TbError>;
}

struct Inner {
    calls: BTreeMap<Uuid, ToolCall>,
    receipts: BTreeMap<Uuid, Receipt>,
    receipt_by_call: BTreeMap<Uuid, Uuid>,
    events: Vec<AuditEvent>,
}

/// An in-memory [`QueueStore`]. Safe to share across tasks and workers via
/// a single `Arc<InMemoryQueueStore>`; every operation takes a short-lived
/// `std::sync::Mutex` guard, which is enough to make `claim_next` and
/// `write_receipt` atomic without any cross-task locking protocol.
pub struct InMemoryQueueStore {
    inner: Mutex<Inner>,
}

impl Default for InMemoryQueueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryQueueStore {
    /// Construct an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                calls: BTreeMap::new(),
                receipts: BTreeMap::new(),
                receipt_by_call: BTreeMap::new(),
                events: Vec::new(),
            }),
        }
    }

    /// Snapshot a call by id, mainly for tests and CLI introspection.
    #[must_use]
    pub fn get_call(&self, call_id: Uuid) -> Option<ToolCall> {
        self.inner.lock().unwrap().calls.get(&call_id).cloned()
    }

    /// Number of audit events recorded so far.
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.inner.lock().unwrap().events.len()
    }

    fn most_recent<'a, I>(candidates: I) -> Option<Receipt>
    where
        I: Iterator<Item = &'a Receipt>,
    {
        candidates
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.call_id.cmp(&b.call_id)))
            .cloned()
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn enqueue(
        &self,
        tool_name: &str,
        input: serde_json::Value,
        idempotency_key: Option<String>,
    ) -> Result<Uuid, TbError> {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let mut call = ToolCall::new(id, tool_name, input, now);
        call.idempotency_key = idempotency_key;
        let mut guard = self.inner.lock().unwrap();
        guard.calls.insert(id, call);
        Ok(id)
    }

    async fn claim_next(&self, worker_id: &str) -> Result<Option<ToolCall>, TbError> {
        let mut guard = self.inner.lock().unwrap();
        let next_id = guard
            .calls
            .values()
            .filter(|c| c.status == CallStatus::Queued)
            .min_by_key(|c| (c.created_at, c.id))
            .map(|c| c.id);

        let Some(id) = next_id else {
            return Ok(None);
        };

        let now = Utc::now();
        let call = guard.calls.get_mut(&id).expect("id came from this map");
        call.status = CallStatus::Running;
        call.claimed_at = Some(now);
        call.claimed_by = Some(worker_id.to_string());
        call.updated_at = now;
        Ok(Some(call.clone()))
    }

    async fn complete(
        &self,
        call_id: Uuid,
        status: CallStatus,
        error: Option<TbError>,
    ) -> Result<(), TbError> {
        let mut guard = self.inner.lock().unwrap();
        let call = guard
            .calls
            .get_mut(&call_id)
            .ok_or_else(|| TbError::new(ErrorCode::ClaimFailed, format!("no such call {call_id}")))?;

        if !call.status.can_transition_to(status) {
            return Err(TbError::new(
                ErrorCode::InvalidStateTransition,
                format!("cannot transition call {call_id} from {:?} to {status:?}", call.status),
            ));
        }

        call.status = status;
        call.error = error;
        call.updated_at = Utc::now();
        Ok(())
    }

    async fn write_receipt(
        &self,
        call_id: Uuid,
        tool_name: &str,
        status: CallStatus,
        result: serde_json::Value,
        effects: Effects,
    ) -> Result<Uuid, TbError> {
        let mut guard = self.inner.lock().unwrap();
        if guard.receipt_by_call.contains_key(&call_id) {
            return Err(TbError::new(
                ErrorCode::UniqueViolation,
                format!("a receipt already exists for call {call_id}"),
            ));
        }
        let receipt = Receipt::new(call_id, tool_name, status, result, effects, Utc::now());
        let receipt_id = receipt.id;
        guard.receipt_by_call.insert(call_id, receipt_id);
        guard.receipts.insert(receipt_id, receipt);
        Ok(receipt_id)
    }

    async fn find_receipt_by_call_id(&self, call_id: Uuid) -> Result<Option<Receipt>, TbError> {
        let guard = self.inner.lock().unwrap();
        Ok(guard
            .receipt_by_call
            .get(&call_id)
            .and_then(|rid| guard.receipts.get(rid))
            .cloned())
    }

    async fn find_successful_receipt_by_tool_and_key(
        &self,
        tool_name: &str,
        idempotency_key: &str,
    ) -> Result<Option<Receipt>, TbError> {
        let guard = self.inner.lock().unwrap();
        let candidates = guard.receipts.values().filter(|r| {
            r.tool_name == tool_name
                && r.status == CallStatus::Succeeded
                && guard
                    .calls
                    .get(&r.call_id)
                    .and_then(|c| c.idempotency_key.as_deref())
                    == Some(idempotency_key)
        });
        Ok(Self::most_recent(candidates))
    }

    async fn find_successful_receipt_by_tool_and_input_field(
        &self,
        tool_name: &str,
        key_field: &str,
        key_value: &serde_json::Value,
    ) -> Result<Option<Receipt>, TbError> {
        let guard = self.inner.lock().unwrap();
        let candidates = guard.receipts.values().filter(|r| {
            r.tool_name == tool_name
                && r.status == CallStatus::Succeeded
                && guard
                    .calls
                    .get(&r.call_id)
                    .and_then(|c| tb_core::path::get_path(&c.input, key_field))
                    == Some(key_value)
        });
        Ok(Self::most_recent(candidates))
    }

    async fn log_event(&self, event_type: &str, aggregate: &str, payload: serde_json::Value) -> Result<(), TbError> {
        let mut guard = self.inner.lock().unwrap();
        guard.events.push(AuditEvent {
            at: Utc::now(),
            event_type: event_type.to_string(),
            aggregate: aggregate.to_string(),
            payload,
        });
        Ok(())
    }

    async fn reap_stale(&self, older_than: chrono::Duration) -> Result<Vec<Uuid>, TbError> {
        let mut guard = self.inner.lock().unwrap();
        let deadline = Utc::now() - older_than;
        let stale_ids: Vec<Uuid> = guard
            .calls
            .values()
            .filter(|c| c.status == CallStatus::Running && c.claimed_at.is_some_and(|at| at < deadline))
            .map(|c| c.id)
            .collect();

        for id in &stale_ids {
            if let Some(call) = guard.calls.get_mut(id) {
                call.status = CallStatus::Queued;
                call.claimed_at = None;
                call.claimed_by = None;
                call.updated_at = Utc::now();
            }
        }
        Ok(stale_ids)
    }
}
