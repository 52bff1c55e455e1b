//! Gateway controller entry point (headless).
//!
//! Wires a [`GatewayService`] over the in-process loopback transport and runs
//! until Ctrl-C. Controller events are pumped to the structured log, and a
//! short scripted scenario (announce, join, set passcode) exercises the
//! orchestration so the binary is useful as a smoke check without a real bus
//! stack.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ GatewayService::init()   -- wires registry / sessions / credentials
//!       ├─ LoopbackTransport   (in-process simulator)
//!       ├─ TomlPasscodeStore   (platform config dir; memory fallback)
//!       └─ event pump          (Tokio task draining the event channel)
//! ```

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use gateway_controller::infrastructure::storage::{
    MemoryPasscodeStore, PasscodeStore, TomlPasscodeStore,
};
use gateway_controller::infrastructure::transport::LoopbackTransport;
use gateway_controller::GatewayService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging.  Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Gateway controller starting");

    let store: Arc<dyn PasscodeStore> = match TomlPasscodeStore::open_default() {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!("passcode cache unavailable ({e}), falling back to in-memory store");
            Arc::new(MemoryPasscodeStore::new())
        }
    };

    let transport = Arc::new(LoopbackTransport::new());
    let service = Arc::new(GatewayService::new());
    let mut events = service.init(transport, store)?;

    // ── Event pump ────────────────────────────────────────────────────────────
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            info!(?event, "controller event");
        }
    });

    // ── Scripted loopback scenario ────────────────────────────────────────────
    let app_id = Uuid::new_v4();
    service.on_announced(app_id, ":1.42", "loopback-gateway");

    let worker = service.clone();
    let handle = tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let session = worker.join_session(app_id)?;
        info!(bus_name = %session.bus_name, session_id = ?session.session_id, "joined");
        worker.set_passcode(app_id, "424242")?;
        info!("passcode updated for {app_id}");
        Ok(())
    })
    .await?;
    if let Err(e) = handle {
        warn!("loopback scenario failed: {e}");
    }

    info!("Gateway controller ready.  Press Ctrl-C to exit.");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    service.shutdown();
    info!("Gateway controller stopped");
    Ok(())
}
