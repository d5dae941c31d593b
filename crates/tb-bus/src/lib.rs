// SPDX-License-Identifier: MIT OR Apache-2.0
//! tb-bus
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The abstract Event/Realtime Bus (spec.md §4.9): two event types
//! (`receipt_created`, `call_status_changed`), at-least-once delivery
//! within a process, and ordering preserved within a single call id.
//! [`InProcessEventBus`] backs this with a `tokio::sync::broadcast`
//! channel; the Planner's `wait_for_receipt` (in `tb-brain`) subscribes to
//! it and falls back to polling the Queue Store directly.

use tb_core::{CallStatus, Receipt};
use tokio::sync::broadcast;
use uuid::Uuid;

/// An event published by the Worker as calls move through their lifecycle.
#[derive(Debug, Clone)]
pub enum BusEvent {
    /// A receipt was just written for `receipt.call_id`.
    ReceiptCreated {
        /// The receipt that was written.
        receipt: Receipt,
    },
    /// A call's status changed (including the `queued -> running`
    /// transition, which never produces a receipt).
    CallStatusChanged {
        /// The call whose status changed.
        call_id: Uuid,
        /// The status before the transition.
        old_status: CallStatus,
        /// The status after the transition.
        new_status: CallStatus,
        /// The worker that performed the transition, if any.
        worker_id: Option<String>,
    },
}

impl BusEvent {
    /// The call id this event concerns, for subscribers that only care
    /// about one call (e.g. `wait_for_receipt`).
    #[must_use]
    pub fn call_id(&self) -> Uuid {
        match self {
            Self::ReceiptCreated { receipt } => receipt.call_id,
            Self::CallStatusChanged { call_id, .. } => *call_id,
        }
    }
}

/// Publish/subscribe contract for backplane lifecycle events.
///
/// Delivery is at-least-once per subscriber within a process; ordering
/// within a single call id is preserved because the Worker publishes
/// sequentially from the same task that performs the transition.
pub trait EventBus: Send + Sync {
    /// Publish an event to every current subscriber.
    fn publish(&self, event: BusEvent);

    /// Subscribe to the event stream from this point forward.
    fn subscribe(&self) -> BusSubscription;
}

/// A subscription handle; wraps the underlying broadcast receiver so
/// callers don't need to depend on `tokio::sync::broadcast` directly.
pub struct BusSubscription {
    inner: broadcast::Receiver<BusEvent>,
}

impl BusSubscription {
    /// Wait for the next event. Returns `None` if every publisher has been
    /// dropped (the bus is gone).
    ///
    /// A `Lagged` receiver (subscriber fell behind the broadcast buffer) is
    /// treated as "skip forward and keep listening" rather than an error —
    /// callers that need every event should keep their own queue-store
    /// poll as a fallback, exactly as `wait_for_receipt` does.
    pub async fn recv(&mut self) -> Option<BusEvent> {
        loop {
            match self.inner.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Default channel capacity for [`InProcessEventBus`]. Generous enough that
/// a burst of concurrent worker completions doesn't lag a planner
/// subscriber under normal load; subscribers that do lag still make
/// progress via [`BusSubscription::recv`]'s skip-forward behavior.
pub const DEFAULT_BUS_CAPACITY: usize = 1024;

/// An in-process [`EventBus`] backed by `tokio::sync::broadcast`.
pub struct InProcessEventBus {
    sender: broadcast::Sender<BusEvent>,
}

impl Default for InProcessEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl InProcessEventBus {
    /// Construct a bus with the given broadcast buffer capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Number of active subscribers, mainly for metrics/tests.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl EventBus for InProcessEventBus {
    fn publish(&self, event: BusEvent) {
        // `send` only errors when there are no subscribers; that's a
        // no-op, not a fault — the Worker must keep running.
        let _ = self.sender.send(event);
    }

    fn subscribe(&self) -> BusSubscription {
        BusSubscription {
            inner: self.sender.subscribe(),
        }
    }
}
