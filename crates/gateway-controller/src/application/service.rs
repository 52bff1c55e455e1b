//! The controller facade external callers address.
//!
//! `GatewayService` owns the lifecycle (`Uninitialized → Initialized →
//! ShuttingDown → Uninitialized`) and wires the registry, session
//! coordinator, credential store, and pending-operation queue together over
//! one transport. Callers address devices by stable `AppId`; the facade
//! resolves the current bus name through the registry at call time, so a
//! device that re-announced under a new address is still reachable by the
//! same id.
//!
//! The transport-facing ingress hooks (`on_announced`, `on_lost`,
//! `on_session_lost`, `password_for`) are infallible: they arrive on
//! transport-owned threads that have nowhere to put an error, so before
//! initialization they drop the signal (or answer with the default
//! passcode) instead of failing.

use std::sync::{Arc, Mutex};

use gateway_core::{
    AppId, BusName, DeviceRecord, GatewayError, GatewayEvent, SessionHandle, SessionId,
    DEFAULT_PASSCODE,
};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::application::credentials::CredentialStore;
use crate::application::discovery::{DiscoveryListener, DiscoveryRegistry};
use crate::application::pending::{PendingOperation, PendingOperationQueue};
use crate::application::sessions::{SessionCoordinator, SessionListener};
use crate::infrastructure::storage::PasscodeStore;
use crate::infrastructure::transport::GatewayTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServiceLifecycleState {
    Uninitialized,
    Initialized,
    ShuttingDown,
}

/// The wired component set. Cloned out of the facade lock before use so a
/// blocking remote call never holds the lifecycle lock.
#[derive(Clone)]
struct ServiceInner {
    registry: Arc<DiscoveryRegistry>,
    sessions: Arc<SessionCoordinator>,
    credentials: Arc<CredentialStore>,
    pending: Arc<PendingOperationQueue>,
}

struct ServiceState {
    lifecycle: ServiceLifecycleState,
    inner: Option<ServiceInner>,
}

/// Facade over discovery, sessions, and credentials for gateway devices.
pub struct GatewayService {
    state: Mutex<ServiceState>,
}

impl Default for GatewayService {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayService {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ServiceState {
                lifecycle: ServiceLifecycleState::Uninitialized,
                inner: None,
            }),
        }
    }

    /// Initializes the controller over `transport`, persisting credentials
    /// through `store`. Returns the receiving end of the controller's event
    /// channel.
    ///
    /// # Errors
    ///
    /// `InvalidState` when already initialized or when the transport reports
    /// itself disconnected. Re-initialization requires a `shutdown` first.
    pub fn init(
        &self,
        transport: Arc<dyn GatewayTransport>,
        store: Arc<dyn PasscodeStore>,
    ) -> Result<mpsc::UnboundedReceiver<GatewayEvent>, GatewayError> {
        let mut state = self.state.lock().expect("service state mutex poisoned");
        if state.lifecycle != ServiceLifecycleState::Uninitialized {
            return Err(GatewayError::invalid_state("controller already initialized"));
        }
        if !transport.is_connected() {
            return Err(GatewayError::invalid_state("transport is not connected"));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.inner = Some(ServiceInner {
            registry: Arc::new(DiscoveryRegistry::new(tx.clone())),
            sessions: Arc::new(SessionCoordinator::new(transport.clone(), tx.clone())),
            credentials: Arc::new(CredentialStore::new(transport, store, tx)),
            pending: Arc::new(PendingOperationQueue::new()),
        });
        state.lifecycle = ServiceLifecycleState::Initialized;
        info!("gateway controller initialized");
        Ok(rx)
    }

    /// Tears the controller down: drops all discovery state, closes the
    /// config session, and releases the transport. Idempotent.
    pub fn shutdown(&self) {
        let inner = {
            let mut state = self.state.lock().expect("service state mutex poisoned");
            if state.lifecycle != ServiceLifecycleState::Initialized {
                return;
            }
            state.lifecycle = ServiceLifecycleState::ShuttingDown;
            state.inner.take()
        };

        if let Some(inner) = inner {
            inner.registry.clear();
            inner.credentials.disconnect();
        }

        let mut state = self.state.lock().expect("service state mutex poisoned");
        state.lifecycle = ServiceLifecycleState::Uninitialized;
        info!("gateway controller shut down");
    }

    // ── Discovery ─────────────────────────────────────────────────────────

    /// Snapshot of all currently advertised devices.
    pub fn devices(&self) -> Result<Vec<DeviceRecord>, GatewayError> {
        Ok(self.components()?.registry.snapshot())
    }

    pub fn set_discovery_listener(
        &self,
        listener: Arc<dyn DiscoveryListener>,
    ) -> Result<(), GatewayError> {
        self.components()?.registry.set_listener(listener);
        Ok(())
    }

    pub fn clear_discovery_listener(&self) -> Result<(), GatewayError> {
        self.components()?.registry.clear_listener();
        Ok(())
    }

    // ── Sessions ──────────────────────────────────────────────────────────

    /// Joins a session with the device, blocking until the transport answers.
    pub fn join_session(&self, app_id: AppId) -> Result<SessionHandle, GatewayError> {
        let inner = self.components()?;
        let bus_name = resolve_bus_name(&inner, &app_id)?;
        let handle = inner.sessions.join_session(&bus_name)?;
        // The blocking path resolves here, so pump the deferred slot here.
        if handle.is_active() {
            inner.pending.on_session_ready(&handle.bus_name);
        } else {
            inner.pending.on_session_failed(&handle.bus_name);
        }
        Ok(handle)
    }

    /// Joins without blocking; `listener` receives the terminal result. The
    /// deferred-operation slot is pumped before the listener is told.
    pub fn join_session_async(
        &self,
        app_id: AppId,
        listener: Arc<dyn SessionListener>,
    ) -> Result<(), GatewayError> {
        let inner = self.components()?;
        let bus_name = resolve_bus_name(&inner, &app_id)?;
        let pump = Arc::new(PumpListener {
            pending: inner.pending.clone(),
            next: listener,
        });
        inner.sessions.join_session_async(&bus_name, pump)
    }

    /// Best-effort session teardown; local state always transitions.
    pub fn leave_session(&self, session_id: SessionId) -> Result<(), GatewayError> {
        self.components()?.sessions.leave_session(session_id);
        Ok(())
    }

    /// Parks an operation until a session to its target resolves.
    pub fn defer_until_ready(&self, operation: PendingOperation) -> Result<(), GatewayError> {
        self.components()?.pending.defer_until_ready(operation);
        Ok(())
    }

    // ── Credentials ───────────────────────────────────────────────────────

    /// Sets a new passcode on the device. A failure on the remote path also
    /// clears the device's authentication flag in the discovery snapshot.
    pub fn set_passcode(&self, app_id: AppId, new_passcode: &str) -> Result<(), GatewayError> {
        let inner = self.components()?;
        let bus_name = resolve_bus_name(&inner, &app_id)?;
        let result = inner
            .credentials
            .set_passcode(app_id, &bus_name, new_passcode);
        if matches!(result, Err(GatewayError::RemoteCommunication(_))) {
            inner.registry.mark_unauthenticated(&app_id);
        }
        result
    }

    /// The device's persisted passcode, or the default when none is stored.
    pub fn passcode(&self, app_id: AppId) -> Result<String, GatewayError> {
        Ok(self.components()?.credentials.passcode(&app_id))
    }

    /// Resets the device to the default passcode (local first, then remote).
    pub fn factory_reset(&self, app_id: AppId) -> Result<(), GatewayError> {
        let inner = self.components()?;
        let bus_name = resolve_bus_name(&inner, &app_id)?;
        inner.credentials.factory_reset(app_id, &bus_name)
    }

    // ── Transport-facing ingress hooks ────────────────────────────────────

    /// Device announcement from the transport. Dropped before init.
    pub fn on_announced(&self, app_id: AppId, bus_name: &str, display_name: &str) {
        match self.components() {
            Ok(inner) => inner.registry.on_announced(app_id, bus_name, display_name),
            Err(_) => debug!(%app_id, "announcement before init dropped"),
        }
    }

    /// Lost-device signal from the transport. Dropped before init.
    pub fn on_lost(&self, app_id: AppId) {
        if let Ok(inner) = self.components() {
            inner.registry.on_lost(app_id);
        }
    }

    /// External session-disconnect signal from the transport.
    pub fn on_session_lost(&self, session_id: SessionId) {
        if let Ok(inner) = self.components() {
            inner.sessions.on_session_lost(session_id);
        }
    }

    /// The transport's synchronous authentication hook. Must always answer;
    /// before init the default passcode is returned.
    pub fn password_for(&self, bus_name: &str) -> String {
        match self.components() {
            Ok(inner) => inner.credentials.password_for(bus_name),
            Err(_) => DEFAULT_PASSCODE.to_string(),
        }
    }

    fn components(&self) -> Result<ServiceInner, GatewayError> {
        let state = self.state.lock().expect("service state mutex poisoned");
        match (&state.lifecycle, &state.inner) {
            (ServiceLifecycleState::Initialized, Some(inner)) => Ok(inner.clone()),
            _ => Err(GatewayError::invalid_state("controller is not initialized")),
        }
    }
}

/// Resolves the device's current bus name; the nil id and unknown devices
/// are argument errors, not remote failures.
fn resolve_bus_name(inner: &ServiceInner, app_id: &AppId) -> Result<BusName, GatewayError> {
    if app_id.is_nil() {
        return Err(GatewayError::invalid_argument("app id is nil"));
    }
    inner
        .registry
        .bus_name_of(app_id)
        .ok_or_else(|| GatewayError::invalid_argument(format!("unknown device {app_id}")))
}

/// Wraps a caller's session listener so every join outcome pumps the
/// deferred-operation slot before the caller hears about it.
struct PumpListener {
    pending: Arc<PendingOperationQueue>,
    next: Arc<dyn SessionListener>,
}

impl SessionListener for PumpListener {
    fn session_joined(&self, handle: &SessionHandle) {
        self.pending.on_session_ready(&handle.bus_name);
        self.next.session_joined(handle);
    }

    fn session_failed(&self, handle: &SessionHandle) {
        self.pending.on_session_failed(&handle.bus_name);
        self.next.session_failed(handle);
    }

    fn session_lost(&self, session_id: SessionId) {
        self.next.session_lost(session_id);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
