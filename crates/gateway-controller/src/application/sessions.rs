//! Session coordinator: establish, track, and tear down gateway sessions.
//!
//! # Single-flight invariant
//!
//! At most one join is in flight per bus name.  A second join request issued
//! while the first has not resolved does not reach the transport at all; its
//! listener is attached to the pending attempt and observes the same terminal
//! result.  Listeners attached to one attempt are notified in attachment
//! order, which is also the order the requests were issued in.
//!
//! # Synchronous and asynchronous variants
//!
//! The synchronous [`SessionCoordinator::join_session`] is the asynchronous
//! variant plus a channel wait, so both share the single-flight path and the
//! blocking caller can never race an async caller into a duplicate join.
//!
//! There is no cancellation of an in-flight join; callers wait for the
//! terminal result and then leave.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use gateway_core::{
    BusName, GatewayError, GatewayEvent, SessionHandle, SessionId, SessionState,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::infrastructure::transport::{GatewayTransport, TransportError};

/// Session lifecycle callbacks. Completion is delivered on a thread supplied
/// by the transport, not necessarily the one that issued the request.
pub trait SessionListener: Send + Sync {
    fn session_joined(&self, handle: &SessionHandle);
    fn session_failed(&self, handle: &SessionHandle);
    /// The transport reported an external disconnect of an established
    /// session. Default is to ignore it.
    fn session_lost(&self, session_id: SessionId) {
        let _ = session_id;
    }
}

/// Per-bus-name session slot. Absence of a slot means no session (terminal
/// states are not retained).
enum SessionSlot {
    /// Join issued, transport has not answered. `waiters` hold every caller
    /// attached to this attempt, in issuance order.
    Joining { waiters: Vec<Arc<dyn SessionListener>> },
    /// Established session; `listeners` are kept for loss notification.
    Joined {
        session_id: SessionId,
        listeners: Vec<Arc<dyn SessionListener>>,
    },
}

#[derive(Default)]
struct CoordinatorState {
    by_bus: HashMap<BusName, SessionSlot>,
    by_id: HashMap<SessionId, BusName>,
}

/// Establishes and tracks sessions with at most one in-flight join per
/// target device.
pub struct SessionCoordinator {
    transport: Arc<dyn GatewayTransport>,
    state: Arc<Mutex<CoordinatorState>>,
    events: mpsc::UnboundedSender<GatewayEvent>,
}

impl SessionCoordinator {
    pub fn new(
        transport: Arc<dyn GatewayTransport>,
        events: mpsc::UnboundedSender<GatewayEvent>,
    ) -> Self {
        Self {
            transport,
            state: Arc::new(Mutex::new(CoordinatorState::default())),
            events,
        }
    }

    /// Joins `bus_name`, blocking the calling thread until the transport
    /// reports success or failure. Returns a handle in state `Joined` or
    /// `Failed`; only argument errors are reported as `Err`.
    pub fn join_session(&self, bus_name: &str) -> Result<SessionHandle, GatewayError> {
        let (tx, rx) = std::sync::mpsc::channel();
        self.join_session_async(bus_name, Arc::new(SyncWaiter::new(tx)))?;
        rx.recv().map_err(|_| {
            GatewayError::RemoteCommunication("session join completion was dropped".to_string())
        })
    }

    /// Joins `bus_name` without blocking; `listener` receives the terminal
    /// result. A join for a bus name that is already joined completes
    /// immediately with the existing handle.
    pub fn join_session_async(
        &self,
        bus_name: &str,
        listener: Arc<dyn SessionListener>,
    ) -> Result<(), GatewayError> {
        if bus_name.is_empty() {
            return Err(GatewayError::invalid_argument("bus name is empty"));
        }

        // Decide under the lock whether this request issues the join or
        // attaches to an existing slot; never call the transport while the
        // lock is held (its callback may re-enter immediately).
        let action = {
            let mut state = self.state.lock().expect("session state mutex poisoned");
            match state.by_bus.get_mut(bus_name) {
                Some(SessionSlot::Joining { waiters }) => {
                    debug!(bus_name, "join already in flight, attaching listener");
                    waiters.push(listener);
                    JoinAction::Attached
                }
                Some(SessionSlot::Joined {
                    session_id,
                    listeners,
                }) => {
                    let handle = SessionHandle::joined(bus_name, *session_id);
                    listeners.push(listener.clone());
                    JoinAction::AlreadyJoined { handle, listener }
                }
                None => {
                    state.by_bus.insert(
                        bus_name.to_string(),
                        SessionSlot::Joining {
                            waiters: vec![listener],
                        },
                    );
                    JoinAction::Issue
                }
            }
        };

        match action {
            JoinAction::Attached => {}
            JoinAction::AlreadyJoined { handle, listener } => {
                listener.session_joined(&handle);
            }
            JoinAction::Issue => {
                debug!(bus_name, "issuing session join");
                let state = Arc::clone(&self.state);
                let events = self.events.clone();
                let bus = bus_name.to_string();
                self.transport.join_session_async(
                    bus_name,
                    Box::new(move |result| complete_join(&state, &events, &bus, result)),
                );
            }
        }
        Ok(())
    }

    /// Leaves a session: best-effort remote teardown, unconditional local
    /// transition to `Left`. Unknown or already-left ids are a no-op.
    pub fn leave_session(&self, session_id: SessionId) {
        let known = {
            let mut state = self.state.lock().expect("session state mutex poisoned");
            match state.by_id.remove(&session_id) {
                Some(bus) => {
                    state.by_bus.remove(&bus);
                    true
                }
                None => false,
            }
        };

        if !known {
            debug!(session_id, "leave for unknown session id ignored");
            return;
        }

        info!(session_id, "leaving session");
        if let Err(e) = self.transport.leave_session(session_id) {
            // Local state has already transitioned; the remote end will
            // reap the session on its own timeout.
            warn!(session_id, error = %e, "remote session teardown failed");
        }
    }

    /// Handles the transport's external disconnect signal for an
    /// established session.
    pub fn on_session_lost(&self, session_id: SessionId) {
        let listeners = {
            let mut state = self.state.lock().expect("session state mutex poisoned");
            match state.by_id.remove(&session_id) {
                Some(bus) => match state.by_bus.remove(&bus) {
                    Some(SessionSlot::Joined { listeners, .. }) => listeners,
                    _ => Vec::new(),
                },
                None => Vec::new(),
            }
        };

        if !listeners.is_empty() {
            warn!(session_id, "session lost");
        }
        for listener in listeners {
            listener.session_lost(session_id);
        }
    }

    /// Returns the established session handle for `bus_name`, if any.
    pub fn session_for(&self, bus_name: &str) -> Option<SessionHandle> {
        let state = self.state.lock().expect("session state mutex poisoned");
        match state.by_bus.get(bus_name) {
            Some(SessionSlot::Joined { session_id, .. }) => {
                Some(SessionHandle::joined(bus_name, *session_id))
            }
            Some(SessionSlot::Joining { .. }) => Some(SessionHandle {
                bus_name: bus_name.to_string(),
                session_id: None,
                state: SessionState::Joining,
            }),
            None => None,
        }
    }
}

enum JoinAction {
    Issue,
    Attached,
    AlreadyJoined {
        handle: SessionHandle,
        listener: Arc<dyn SessionListener>,
    },
}

/// Resolves the in-flight attempt for `bus` and notifies every attached
/// waiter, in attachment order.
fn complete_join(
    state: &Mutex<CoordinatorState>,
    events: &mpsc::UnboundedSender<GatewayEvent>,
    bus: &str,
    result: Result<SessionId, TransportError>,
) {
    let (waiters, handle) = {
        let mut state = state.lock().expect("session state mutex poisoned");
        let waiters = match state.by_bus.remove(bus) {
            Some(SessionSlot::Joining { waiters }) => waiters,
            // Slot was torn down while the join was in flight (shutdown).
            _ => Vec::new(),
        };

        match result {
            Ok(session_id) => {
                state.by_bus.insert(
                    bus.to_string(),
                    SessionSlot::Joined {
                        session_id,
                        listeners: waiters.clone(),
                    },
                );
                state.by_id.insert(session_id, bus.to_string());
                (waiters, SessionHandle::joined(bus, session_id))
            }
            Err(ref e) => {
                warn!(bus_name = bus, error = %e, "session join failed");
                (waiters, SessionHandle::failed(bus))
            }
        }
    };

    match handle.state {
        SessionState::Joined => {
            let session_id = handle.session_id.unwrap_or_default();
            info!(bus_name = bus, session_id, "session joined");
            for waiter in &waiters {
                waiter.session_joined(&handle);
            }
            let _ = events.send(GatewayEvent::SessionReady {
                bus_name: bus.to_string(),
                session_id,
            });
        }
        _ => {
            for waiter in &waiters {
                waiter.session_failed(&handle);
            }
            let _ = events.send(GatewayEvent::SessionFailed {
                bus_name: bus.to_string(),
            });
        }
    }
}

/// Adapter that turns the async listener interface into a blocking wait.
struct SyncWaiter {
    tx: Mutex<Option<std::sync::mpsc::Sender<SessionHandle>>>,
}

impl SyncWaiter {
    fn new(tx: std::sync::mpsc::Sender<SessionHandle>) -> Self {
        Self {
            tx: Mutex::new(Some(tx)),
        }
    }

    fn complete(&self, handle: &SessionHandle) {
        if let Some(tx) = self.tx.lock().expect("waiter mutex poisoned").take() {
            let _ = tx.send(handle.clone());
        }
    }
}

impl SessionListener for SyncWaiter {
    fn session_joined(&self, handle: &SessionHandle) {
        self.complete(handle);
    }
    fn session_failed(&self, handle: &SessionHandle) {
        self.complete(handle);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
