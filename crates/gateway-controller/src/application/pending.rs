//! Single-slot queue for operations that need a live session first.
//!
//! Callers that want "join, then do X" park X here and issue the join; the
//! join outcome pumps the queue. The slot holds at most one operation and
//! the last writer wins — a displaced operation is dropped without running
//! either of its closures. Per enqueued operation exactly one of
//! {execute, rollback, drop} happens.

use std::sync::Mutex;
use std::time::Instant;

use gateway_core::BusName;
use tracing::{debug, warn};

type OpFn = Box<dyn FnOnce() + Send + 'static>;

/// A deferred operation bound to a session target.
pub struct PendingOperation {
    pub target_bus_name: BusName,
    pub operation: OpFn,
    pub rollback: Option<OpFn>,
    pub enqueued_at: Instant,
}

impl PendingOperation {
    pub fn new(target_bus_name: impl Into<BusName>, operation: OpFn) -> Self {
        Self {
            target_bus_name: target_bus_name.into(),
            operation,
            rollback: None,
            enqueued_at: Instant::now(),
        }
    }

    pub fn with_rollback(mut self, rollback: OpFn) -> Self {
        self.rollback = Some(rollback);
        self
    }
}

impl std::fmt::Debug for PendingOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingOperation")
            .field("target_bus_name", &self.target_bus_name)
            .field("has_rollback", &self.rollback.is_some())
            .field("enqueued_at", &self.enqueued_at)
            .finish()
    }
}

/// The one-deep deferred-operation slot.
#[derive(Default)]
pub struct PendingOperationQueue {
    slot: Mutex<Option<PendingOperation>>,
}

impl PendingOperationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parks `operation` until its target session resolves. Displaces any
    /// earlier occupant without running it.
    pub fn defer_until_ready(&self, operation: PendingOperation) {
        let displaced = self
            .slot
            .lock()
            .expect("pending slot mutex poisoned")
            .replace(operation);
        if let Some(old) = displaced {
            warn!(
                bus_name = %old.target_bus_name,
                "deferred operation displaced before its session resolved"
            );
        }
    }

    /// Pumps the slot after a successful join of `bus_name`. The operation
    /// runs outside the slot lock, so it may defer again.
    pub fn on_session_ready(&self, bus_name: &str) {
        if let Some(pending) = self.take_if_targets(bus_name) {
            debug!(bus_name, "running deferred operation");
            (pending.operation)();
        }
    }

    /// Pumps the slot after a failed join of `bus_name`: the rollback runs
    /// if present, otherwise the operation is silently dropped.
    pub fn on_session_failed(&self, bus_name: &str) {
        if let Some(pending) = self.take_if_targets(bus_name) {
            match pending.rollback {
                Some(rollback) => {
                    debug!(bus_name, "session failed, running deferred rollback");
                    rollback();
                }
                None => {
                    debug!(bus_name, "session failed, deferred operation dropped");
                }
            }
        }
    }

    /// True when something is parked (diagnostics and tests).
    pub fn is_occupied(&self) -> bool {
        self.slot
            .lock()
            .expect("pending slot mutex poisoned")
            .is_some()
    }

    fn take_if_targets(&self, bus_name: &str) -> Option<PendingOperation> {
        let mut slot = self.slot.lock().expect("pending slot mutex poisoned");
        if slot
            .as_ref()
            .is_some_and(|p| p.target_bus_name == bus_name)
        {
            slot.take()
        } else {
            None
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_op(counter: &Arc<AtomicUsize>) -> OpFn {
        let counter = counter.clone();
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_ready_runs_operation_exactly_once() {
        let queue = PendingOperationQueue::new();
        let ran = Arc::new(AtomicUsize::new(0));
        queue.defer_until_ready(PendingOperation::new(":1.1", counting_op(&ran)));

        queue.on_session_ready(":1.1");
        queue.on_session_ready(":1.1");

        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(!queue.is_occupied());
    }

    #[test]
    fn test_failed_runs_rollback_not_operation() {
        let queue = PendingOperationQueue::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let rolled_back = Arc::new(AtomicUsize::new(0));
        queue.defer_until_ready(
            PendingOperation::new(":1.1", counting_op(&ran))
                .with_rollback(counting_op(&rolled_back)),
        );

        queue.on_session_failed(":1.1");

        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(rolled_back.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_without_rollback_drops_silently() {
        let queue = PendingOperationQueue::new();
        let ran = Arc::new(AtomicUsize::new(0));
        queue.defer_until_ready(PendingOperation::new(":1.1", counting_op(&ran)));

        queue.on_session_failed(":1.1");

        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert!(!queue.is_occupied());
    }

    #[test]
    fn test_last_writer_wins_and_displaced_operation_never_runs() {
        let queue = PendingOperationQueue::new();
        let first = Arc::new(AtomicUsize::new(0));
        let first_rollback = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        queue.defer_until_ready(
            PendingOperation::new(":1.1", counting_op(&first))
                .with_rollback(counting_op(&first_rollback)),
        );
        queue.defer_until_ready(PendingOperation::new(":1.1", counting_op(&second)));
        queue.on_session_ready(":1.1");

        assert_eq!(first.load(Ordering::SeqCst), 0, "displaced op never runs");
        assert_eq!(
            first_rollback.load(Ordering::SeqCst),
            0,
            "displaced rollback never runs"
        );
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_other_bus_name_leaves_slot_untouched() {
        let queue = PendingOperationQueue::new();
        let ran = Arc::new(AtomicUsize::new(0));
        queue.defer_until_ready(PendingOperation::new(":1.1", counting_op(&ran)));

        queue.on_session_ready(":1.9");
        queue.on_session_failed(":1.9");
        assert!(queue.is_occupied());
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        queue.on_session_ready(":1.1");
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_operation_may_defer_again_from_inside_the_pump() {
        let queue = Arc::new(PendingOperationQueue::new());
        let ran = Arc::new(AtomicUsize::new(0));

        let queue_inner = queue.clone();
        let ran_inner = ran.clone();
        queue.defer_until_ready(PendingOperation::new(
            ":1.1",
            Box::new(move || {
                queue_inner.defer_until_ready(PendingOperation::new(
                    ":1.2",
                    counting_op(&ran_inner),
                ));
            }),
        ));

        queue.on_session_ready(":1.1");
        assert!(queue.is_occupied(), "re-deferred from inside the pump");

        queue.on_session_ready(":1.2");
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
