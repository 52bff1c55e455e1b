//! Device identity and discovery records.
//!
//! Two different names identify a gateway, and conflating them is the classic
//! bug this module exists to prevent:
//!
//! - [`AppId`] is the *stable* identity. It survives reconnects and reboots.
//!   Credentials are always keyed by it.
//! - [`BusName`] is the *ephemeral* address the transport assigned for the
//!   current attachment. A device that drops off the bus and re-announces may
//!   come back under a different bus name while keeping its app id.
//!
//! A [`DeviceRecord`] pairs the two, together with the human-readable name
//! from the announcement and an authentication flag the UI layer renders.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable, globally unique identifier of a gateway application.
pub type AppId = Uuid;

/// Ephemeral transport-level address of a device on the bus.
pub type BusName = String;

/// A discovered gateway as tracked by the discovery registry.
///
/// The registry is the sole owner and mutator; consumers only ever receive
/// cloned snapshots, so a snapshot held across concurrent announce/lost
/// events never observes a partial update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Stable identity from the announcement.
    pub app_id: AppId,
    /// Most recently announced bus name.
    pub bus_name: BusName,
    /// Human-readable name from the announcement.
    pub display_name: String,
    /// Cleared when a passcode-set attempt against this device fails, so
    /// list views can mark the device as needing authentication again.
    pub is_authenticated: bool,
}

impl DeviceRecord {
    /// Creates a record for a first announcement. New devices start out
    /// authenticated; only a failed credential operation clears the flag.
    pub fn new(
        app_id: AppId,
        bus_name: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            app_id,
            bus_name: bus_name.into(),
            display_name: display_name.into(),
            is_authenticated: true,
        }
    }
}
