//! Credential store: passcode issuance, persistence, and rollback.
//!
//! Two pieces of state live here, and both are process-wide singletons:
//!
//! - the *current* passcode — the value the transport's synchronous password
//!   hook answers with while it authenticates a peer; and
//! - the single *config session* — the administration channel used for
//!   passcode-set and factory-reset calls.  `Connected` to peer A must be
//!   torn down before connecting to peer B; the teardown happens inside this
//!   store, never in callers.
//!
//! # Rollback contract
//!
//! `set_passcode` stages the new value in memory before touching the wire
//! (the handshake for the config session itself must already answer with
//! it).  Any failure before the remote set is confirmed reverts the staged
//! value, leaves the persisted cache untouched, and emits exactly one
//! `CredentialSetFailed` notification.  Persistence failing *after* the
//! remote set succeeded is a different animal: remote and local state now
//! disagree, which is surfaced as `Consistency` rather than silently
//! resolved.
//!
//! Factory reset is deliberately asymmetric: the local default is applied
//! first and is NOT rolled back when the remote call fails.

use std::sync::{Arc, Mutex};

use gateway_core::{AppId, BusName, GatewayError, GatewayEvent, DEFAULT_PASSCODE};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::infrastructure::storage::PasscodeStore;
use crate::infrastructure::transport::GatewayTransport;

/// Config-channel sub-state machine: `Disconnected → Connecting → Connected`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSessionState {
    Disconnected,
    Connecting,
    Connected { peer: BusName },
}

struct CredentialState {
    current_passcode: String,
    config_session: ConfigSessionState,
}

/// Owns the passcode lifecycle for all devices.
///
/// Two locks with distinct jobs:
///
/// - `op_lock` serializes whole operations (`set_passcode`,
///   `factory_reset`, `disconnect`). It is held across the transport calls,
///   so a second caller cannot steal the config channel or clobber the
///   staged passcode between the ensure-connected step and the remote call.
/// - `state` guards the two fields and is never held across a transport
///   call, because the config handshake re-enters [`password_for`].
pub struct CredentialStore {
    transport: Arc<dyn GatewayTransport>,
    store: Arc<dyn PasscodeStore>,
    op_lock: Mutex<()>,
    state: Mutex<CredentialState>,
    events: mpsc::UnboundedSender<GatewayEvent>,
}

impl CredentialStore {
    pub fn new(
        transport: Arc<dyn GatewayTransport>,
        store: Arc<dyn PasscodeStore>,
        events: mpsc::UnboundedSender<GatewayEvent>,
    ) -> Self {
        Self {
            transport,
            store,
            op_lock: Mutex::new(()),
            state: Mutex::new(CredentialState {
                current_passcode: DEFAULT_PASSCODE.to_string(),
                config_session: ConfigSessionState::Disconnected,
            }),
            events,
        }
    }

    /// Sets a new passcode for the device identified by `app_id`, currently
    /// reachable at `bus_name`.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for an empty passcode or bus name (no side
    ///   effects).
    /// - `RemoteCommunication` when the config session cannot be established
    ///   or the remote set fails; the staged passcode has been reverted and
    ///   one `CredentialSetFailed` was emitted.
    /// - `Consistency` when the remote set succeeded but persisting the new
    ///   passcode did not; the staged value stays live because the remote
    ///   end already changed.
    pub fn set_passcode(
        &self,
        app_id: AppId,
        bus_name: &str,
        new_passcode: &str,
    ) -> Result<(), GatewayError> {
        if new_passcode.is_empty() {
            return Err(GatewayError::invalid_argument("passcode is empty"));
        }
        if bus_name.is_empty() {
            return Err(GatewayError::invalid_argument("bus name is empty"));
        }

        // One credential operation at a time: nothing may retarget the
        // config channel or restage the passcode until this call resolves.
        let _op = self.op_lock.lock().expect("credential op mutex poisoned");

        // Stage: the config handshake below may ask for the passcode.
        let previous = {
            let mut state = self.state.lock().expect("credential state mutex poisoned");
            std::mem::replace(&mut state.current_passcode, new_passcode.to_string())
        };

        if let Err(e) = self.ensure_config_session(bus_name) {
            self.roll_back(app_id, previous);
            return Err(e);
        }
        if !self.transport.is_config_connected() {
            self.roll_back(app_id, previous);
            return Err(GatewayError::RemoteCommunication(
                "config session is not connected".to_string(),
            ));
        }

        if let Err(e) = self.transport.remote_set_passcode(&previous, new_passcode) {
            warn!(%app_id, bus_name, error = %e, "remote passcode set failed, rolling back");
            self.roll_back(app_id, previous);
            return Err(e.into());
        }

        // Remote accepted; make the change durable.
        if let Err(e) = self.store.put(app_id, new_passcode) {
            error!(%app_id, error = %e, "passcode accepted remotely but could not be persisted");
            return Err(GatewayError::Consistency(format!(
                "remote passcode updated but local persistence failed: {e}"
            )));
        }

        info!(%app_id, bus_name, "passcode updated");
        Ok(())
    }

    /// Returns the persisted passcode for `app_id`, or the process-wide
    /// default if none is persisted. Absence is not an error.
    pub fn passcode(&self, app_id: &AppId) -> String {
        self.store
            .get(app_id)
            .unwrap_or_else(|| DEFAULT_PASSCODE.to_string())
    }

    /// Resets `app_id` (reachable at `bus_name`) to the default passcode.
    ///
    /// The local default is applied before the remote call and is not rolled
    /// back if the remote reset fails; the failure is still reported.
    pub fn factory_reset(&self, app_id: AppId, bus_name: &str) -> Result<(), GatewayError> {
        if bus_name.is_empty() {
            return Err(GatewayError::invalid_argument("bus name is empty"));
        }

        let _op = self.op_lock.lock().expect("credential op mutex poisoned");

        {
            let mut state = self.state.lock().expect("credential state mutex poisoned");
            state.current_passcode = DEFAULT_PASSCODE.to_string();
        }
        if let Err(e) = self.store.remove(&app_id) {
            return Err(GatewayError::Consistency(format!(
                "local default applied but persisted entry could not be cleared: {e}"
            )));
        }

        self.ensure_config_session(bus_name)?;
        if !self.transport.is_config_connected() {
            return Err(GatewayError::RemoteCommunication(
                "config session is not connected".to_string(),
            ));
        }

        if let Err(e) = self.transport.remote_factory_reset() {
            warn!(%app_id, bus_name, error = %e, "remote factory reset failed, local default kept");
            return Err(e.into());
        }

        info!(%app_id, bus_name, "factory reset issued");
        Ok(())
    }

    /// The transport's synchronous password hook. Answers from memory only;
    /// must return within the handshake's timeout, so no I/O happens here.
    pub fn password_for(&self, _bus_name: &str) -> String {
        self.state
            .lock()
            .expect("credential state mutex poisoned")
            .current_passcode
            .clone()
    }

    /// Tears down the config session, if any. Used at service shutdown;
    /// waits for an in-flight credential operation to resolve first.
    pub fn disconnect(&self) {
        let _op = self.op_lock.lock().expect("credential op mutex poisoned");
        self.transport.disconnect_config();
        let mut state = self.state.lock().expect("credential state mutex poisoned");
        state.config_session = ConfigSessionState::Disconnected;
    }

    /// Current config-channel state (diagnostics and tests).
    pub fn config_session_state(&self) -> ConfigSessionState {
        self.state
            .lock()
            .expect("credential state mutex poisoned")
            .config_session
            .clone()
    }

    /// Idempotent ensure-connected step: reuses a live session to the same
    /// peer, otherwise tears down whatever is there and connects fresh.
    fn ensure_config_session(&self, bus_name: &str) -> Result<(), GatewayError> {
        {
            let mut state = self.state.lock().expect("credential state mutex poisoned");
            if let ConfigSessionState::Connected { peer } = &state.config_session {
                if peer == bus_name && self.transport.is_config_connected() {
                    debug!(bus_name, "reusing config session");
                    return Ok(());
                }
            }
            state.config_session = ConfigSessionState::Connecting;
        }

        // The connect blocks for a handshake that may re-enter
        // `password_for`, so the state lock must not be held across it.
        self.transport.disconnect_config();
        match self.transport.connect_config(bus_name) {
            Ok(()) => {
                let mut state = self.state.lock().expect("credential state mutex poisoned");
                state.config_session = ConfigSessionState::Connected {
                    peer: bus_name.to_string(),
                };
                debug!(bus_name, "config session connected");
                Ok(())
            }
            Err(e) => {
                let mut state = self.state.lock().expect("credential state mutex poisoned");
                state.config_session = ConfigSessionState::Disconnected;
                Err(e.into())
            }
        }
    }

    /// Reverts the staged passcode and tells observers the set failed.
    fn roll_back(&self, app_id: AppId, previous: String) {
        {
            let mut state = self.state.lock().expect("credential state mutex poisoned");
            state.current_passcode = previous;
        }
        let _ = self
            .events
            .send(GatewayEvent::CredentialSetFailed { app_id });
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
