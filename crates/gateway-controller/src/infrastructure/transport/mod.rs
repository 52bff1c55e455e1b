//! The transport port: what the orchestration layer requires from the
//! underlying bus stack.
//!
//! The real transport owns connection establishment, wire encoding, and the
//! cryptographic authentication handshake; none of that is modelled here.
//! This trait is the seam the discovery/session/credential core drives, and
//! the seam tests mock.
//!
//! # Threading contract
//!
//! - All methods may be called from any thread.
//! - [`GatewayTransport::join_session_async`] invokes its callback exactly
//!   once, on a transport-owned thread. Callers must not assume it is the
//!   thread that issued the request.
//! - During `connect_config` the transport may synchronously call back into
//!   the controller's password hook to obtain the current passcode, so
//!   implementations of that hook must not perform I/O.

use gateway_core::SessionId;
use thiserror::Error;

pub mod loopback;

pub use loopback::LoopbackTransport;

/// Completion callback for an asynchronous session join.
pub type JoinCallback = Box<dyn FnOnce(Result<SessionId, TransportError>) + Send + 'static>;

/// Error type for transport operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The config channel to a peer could not be opened.
    #[error("connect to {bus_name} failed: {reason}")]
    Connect { bus_name: String, reason: String },
    /// A remote call failed or timed out in transit.
    #[error("remote call failed: {0}")]
    Call(String),
    /// The remote peer answered and refused the request.
    #[error("remote peer rejected the request: {0}")]
    Rejected(String),
}

impl From<TransportError> for gateway_core::GatewayError {
    fn from(e: TransportError) -> Self {
        gateway_core::GatewayError::RemoteCommunication(e.to_string())
    }
}

/// Operations the orchestration layer needs from the bus stack.
#[cfg_attr(test, mockall::automock)]
pub trait GatewayTransport: Send + Sync {
    /// Whether the underlying bus attachment is connected. Checked once at
    /// service init; an unconnected attachment is refused outright.
    fn is_connected(&self) -> bool;

    /// Opens the config channel to `bus_name`. Blocks for the handshake.
    fn connect_config(&self, bus_name: &str) -> Result<(), TransportError>;

    /// Whether the config channel is currently open. A `connect_config` that
    /// returned `Ok` can still be reported disconnected here if the peer
    /// dropped the channel right after the handshake.
    fn is_config_connected(&self) -> bool;

    /// Tears down the config channel. No-op when none is open.
    fn disconnect_config(&self);

    /// Sets the peer's passcode over the open config channel.
    fn remote_set_passcode(&self, current: &str, new: &str) -> Result<(), TransportError>;

    /// Issues a factory reset over the open config channel.
    fn remote_factory_reset(&self) -> Result<(), TransportError>;

    /// Issues an asynchronous session join towards `bus_name`.
    fn join_session_async(&self, bus_name: &str, on_complete: JoinCallback);

    /// Best-effort remote session teardown.
    fn leave_session(&self, session_id: SessionId) -> Result<(), TransportError>;
}
