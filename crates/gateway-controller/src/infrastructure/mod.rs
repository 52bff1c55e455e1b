//! Infrastructure layer: the ports the orchestration core drives and their
//! concrete adapters.
//!
//! - [`transport`] – the `GatewayTransport` trait (what the underlying secure
//!   bus stack must provide) plus an in-process loopback implementation for
//!   the headless binary and end-to-end tests.
//! - [`storage`] – persisted passcode cache, keyed by stable device identity.

pub mod storage;
pub mod transport;
