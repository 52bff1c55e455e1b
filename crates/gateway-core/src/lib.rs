//! # gateway-core
//!
//! Shared library for the gateway controller containing the domain entities,
//! the typed controller events, and the error taxonomy.
//!
//! This crate is used by the controller orchestration layer and by any
//! presentation layer sitting on top of it. It has zero dependencies on OS
//! APIs, UI frameworks, or network sockets.
//!
//! # Architecture overview
//!
//! A *gateway* is a peer device that advertises itself over a shared local
//! message bus. The controller application discovers nearby gateways,
//! establishes authenticated point-to-point *sessions* with a chosen one, and
//! manages the per-device *passcode* used to authenticate those sessions.
//!
//! This crate defines the vocabulary shared by all of that:
//!
//! - **`device`** – stable identity ([`AppId`]) vs. ephemeral transport
//!   address ([`BusName`]), and the [`DeviceRecord`] pairing the two.
//! - **`session`** – [`SessionHandle`] and the
//!   `Joining → {Joined | Failed}` / `Joined → Left` state machine.
//! - **`event`** – [`GatewayEvent`], the typed notifications the controller
//!   emits instead of opaque broadcast intents.
//! - **`error`** – [`GatewayError`], the four-way taxonomy every public
//!   controller operation reports through.

pub mod device;
pub mod error;
pub mod event;
pub mod session;

// Re-export the most-used types at the crate root so callers can write
// `gateway_core::DeviceRecord` instead of `gateway_core::device::DeviceRecord`.
pub use device::{AppId, BusName, DeviceRecord};
pub use error::GatewayError;
pub use event::GatewayEvent;
pub use session::{SessionHandle, SessionId, SessionState};

/// The process-wide default passcode assumed for a device until an explicit
/// passcode has been set and confirmed for it.
///
/// Absence of a persisted entry for an [`AppId`] means "use this", not an
/// error.
pub const DEFAULT_PASSCODE: &str = "000000";
