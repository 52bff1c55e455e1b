//! In-process transport simulator.
//!
//! Stands in for the real bus stack in the headless binary and in end-to-end
//! tests: every peer auto-accepts config connections and session joins, and
//! session ids are handed out from a monotonic counter. Failure paths are
//! scriptable per call via [`LoopbackTransport::fail_next_join`] and
//! [`LoopbackTransport::fail_next_passcode_set`].
//!
//! Join callbacks are invoked inline on the caller's thread. The port
//! contract only promises "some transport-owned thread", so code under test
//! must already tolerate that.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use gateway_core::SessionId;
use tracing::debug;

use super::{GatewayTransport, JoinCallback, TransportError};

/// A transport whose remote side lives in this process.
#[derive(Default)]
pub struct LoopbackTransport {
    config_peer: Mutex<Option<String>>,
    next_session: AtomicU32,
    fail_next_join: AtomicBool,
    fail_next_passcode: AtomicBool,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `join_session_async` complete with a rejection.
    pub fn fail_next_join(&self) {
        self.fail_next_join.store(true, Ordering::SeqCst);
    }

    /// Makes the next `remote_set_passcode` fail with a rejection.
    pub fn fail_next_passcode_set(&self) {
        self.fail_next_passcode.store(true, Ordering::SeqCst);
    }

    /// The peer the config channel is currently open to, if any.
    pub fn config_peer(&self) -> Option<String> {
        self.config_peer.lock().expect("config peer mutex poisoned").clone()
    }
}

impl GatewayTransport for LoopbackTransport {
    fn is_connected(&self) -> bool {
        true
    }

    fn connect_config(&self, bus_name: &str) -> Result<(), TransportError> {
        let mut peer = self.config_peer.lock().expect("config peer mutex poisoned");
        debug!(bus_name, "loopback: config channel opened");
        *peer = Some(bus_name.to_string());
        Ok(())
    }

    fn is_config_connected(&self) -> bool {
        self.config_peer
            .lock()
            .expect("config peer mutex poisoned")
            .is_some()
    }

    fn disconnect_config(&self) {
        let mut peer = self.config_peer.lock().expect("config peer mutex poisoned");
        if peer.take().is_some() {
            debug!("loopback: config channel closed");
        }
    }

    fn remote_set_passcode(&self, _current: &str, _new: &str) -> Result<(), TransportError> {
        if self.fail_next_passcode.swap(false, Ordering::SeqCst) {
            return Err(TransportError::Rejected(
                "simulated passcode rejection".to_string(),
            ));
        }
        Ok(())
    }

    fn remote_factory_reset(&self) -> Result<(), TransportError> {
        Ok(())
    }

    fn join_session_async(&self, bus_name: &str, on_complete: JoinCallback) {
        if self.fail_next_join.swap(false, Ordering::SeqCst) {
            on_complete(Err(TransportError::Rejected(
                "simulated join rejection".to_string(),
            )));
            return;
        }
        let id: SessionId = self.next_session.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(bus_name, session_id = id, "loopback: session joined");
        on_complete(Ok(id));
    }

    fn leave_session(&self, _session_id: SessionId) -> Result<(), TransportError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_hands_out_monotonic_session_ids() {
        let transport = LoopbackTransport::new();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let (tx, rx) = std::sync::mpsc::channel();
            transport.join_session_async(":1.1", Box::new(move |r| tx.send(r).unwrap()));
            ids.push(rx.recv().unwrap().unwrap());
        }
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_fail_next_join_rejects_exactly_one_join() {
        let transport = LoopbackTransport::new();
        transport.fail_next_join();

        let (tx, rx) = std::sync::mpsc::channel();
        transport.join_session_async(":1.1", Box::new(move |r| tx.send(r).unwrap()));
        assert!(rx.recv().unwrap().is_err());

        let (tx, rx) = std::sync::mpsc::channel();
        transport.join_session_async(":1.1", Box::new(move |r| tx.send(r).unwrap()));
        assert!(rx.recv().unwrap().is_ok());
    }

    #[test]
    fn test_connect_config_tracks_current_peer() {
        let transport = LoopbackTransport::new();
        assert!(!transport.is_config_connected());

        transport.connect_config(":1.2").unwrap();
        assert!(transport.is_config_connected());
        assert_eq!(transport.config_peer().as_deref(), Some(":1.2"));

        transport.disconnect_config();
        assert!(!transport.is_config_connected());
    }
}
