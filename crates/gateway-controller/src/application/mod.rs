//! Application layer: the discovery/session/credential orchestration core.
//!
//! Data flows one way for discovery (transport → [`discovery`] → listener)
//! and bidirectionally for sessions (caller → [`sessions`] → transport →
//! completion callback → [`pending`] → caller). [`credentials`] owns the
//! passcode lifecycle and the single process-wide config session.
//! [`service`] is the facade external callers address.

pub mod credentials;
pub mod discovery;
pub mod pending;
pub mod service;
pub mod sessions;
