//! Typed events emitted by the controller to its consumers.
//!
//! The presentation layer receives these over an unbounded channel handed out
//! by `GatewayService::init`. Events replace an opaque broadcast mechanism:
//! each carries exactly the identity a consumer needs to refresh its view or
//! roll back optimistic state.

use crate::device::{AppId, BusName};
use crate::session::SessionId;

/// A notification from the discovery/session/credential core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    /// A previously unseen device announced itself.
    ///
    /// Not re-emitted when a known device re-announces with a new bus name;
    /// that is a content refresh, visible in the next snapshot.
    DeviceAdded { app_id: AppId },
    /// A device was reported lost and removed from the registry.
    DeviceRemoved { app_id: AppId },
    /// A passcode-set attempt failed and was rolled back. Consumers should
    /// mark the device as unauthenticated again.
    CredentialSetFailed { app_id: AppId },
    /// A session join completed successfully.
    SessionReady {
        bus_name: BusName,
        session_id: SessionId,
    },
    /// A session join was rejected or the round trip failed.
    SessionFailed { bus_name: BusName },
}
