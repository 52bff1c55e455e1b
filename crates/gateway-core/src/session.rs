//! Session handles and the session state machine.
//!
//! A *session* is a point-to-point logical connection to one gateway,
//! identified by a [`SessionId`] once established. Sessions progress through:
//!
//! ```text
//! Joining ──► Joined ──► Left        (explicit leave or transport disconnect)
//!    │
//!    └──────► Failed                 (terminal)
//! ```
//!
//! At most one non-terminal handle exists per bus name at a time; concurrent
//! join requests for the same bus name attach to the in-flight attempt
//! instead of racing to create a second session.

use serde::{Deserialize, Serialize};

use crate::device::BusName;

/// Transport-assigned identifier of an established session.
pub type SessionId = u32;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// A join has been issued; the transport has not yet answered.
    Joining,
    /// The transport confirmed the join; `session_id` is set.
    Joined,
    /// The transport rejected the join or the round trip failed. Terminal.
    Failed,
    /// The session was left explicitly or lost to a transport disconnect.
    /// Terminal.
    Left,
}

/// A caller-visible view of one session attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHandle {
    /// The bus name the join targeted.
    pub bus_name: BusName,
    /// Set once the transport reports `Joined`; `None` while joining or
    /// after a failure.
    pub session_id: Option<SessionId>,
    pub state: SessionState,
}

impl SessionHandle {
    pub fn joined(bus_name: impl Into<String>, session_id: SessionId) -> Self {
        Self {
            bus_name: bus_name.into(),
            session_id: Some(session_id),
            state: SessionState::Joined,
        }
    }

    pub fn failed(bus_name: impl Into<String>) -> Self {
        Self {
            bus_name: bus_name.into(),
            session_id: None,
            state: SessionState::Failed,
        }
    }

    /// `true` while the handle still counts against the one-per-bus-name
    /// single-flight limit.
    pub fn is_active(&self) -> bool {
        matches!(self.state, SessionState::Joining | SessionState::Joined)
    }
}
