//! Integration tests for the credential rollback contract.
//!
//! # Purpose
//!
//! A passcode change is staged in memory *before* the remote call, because
//! the transport's authentication hook must answer with the new value while
//! the config channel handshakes.  These tests pin down what happens when
//! the remote side then says no:
//!
//! - the staged value is reverted, so the hook answers with the old passcode
//!   again;
//! - nothing stale is persisted;
//! - exactly one `CredentialSetFailed` event is emitted per failed set;
//! - the device's snapshot entry drops its authenticated flag.
//!
//! Factory reset is the deliberate exception: its local default is applied
//! first and survives a remote failure.

use std::sync::Arc;

use gateway_controller::infrastructure::storage::MemoryPasscodeStore;
use gateway_controller::infrastructure::transport::{GatewayTransport, LoopbackTransport};
use gateway_controller::GatewayService;
use gateway_core::{GatewayError, GatewayEvent, DEFAULT_PASSCODE};
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

struct Harness {
    service: GatewayService,
    transport: Arc<LoopbackTransport>,
    rx: UnboundedReceiver<GatewayEvent>,
    app_id: uuid::Uuid,
}

fn announced_device() -> Harness {
    let service = GatewayService::new();
    let transport = Arc::new(LoopbackTransport::new());
    let mut rx = service
        .init(transport.clone(), Arc::new(MemoryPasscodeStore::new()))
        .expect("init");

    let app_id = Uuid::new_v4();
    service.on_announced(app_id, ":1.4", "porch-gateway");
    let _ = rx.try_recv(); // DeviceAdded

    Harness {
        service,
        transport,
        rx,
        app_id,
    }
}

/// A rejected remote set reverts the staged passcode, persists nothing, and
/// emits exactly one `CredentialSetFailed`.
#[test]
fn test_rejected_set_rolls_back_and_emits_one_event() {
    let mut h = announced_device();
    h.transport.fail_next_passcode_set();

    let result = h.service.set_passcode(h.app_id, "867530");
    assert!(matches!(result, Err(GatewayError::RemoteCommunication(_))));

    // The hook answers with the pre-set value again.
    assert_eq!(h.service.password_for(":1.4"), DEFAULT_PASSCODE);
    // Nothing was persisted.
    assert_eq!(
        h.service.passcode(h.app_id).expect("passcode"),
        DEFAULT_PASSCODE
    );
    // Exactly one failure event.
    assert_eq!(
        h.rx.try_recv(),
        Ok(GatewayEvent::CredentialSetFailed { app_id: h.app_id })
    );
    assert!(h.rx.try_recv().is_err());
}

/// The rollback restores the *previous custom* passcode, not the default.
#[test]
fn test_rollback_restores_previous_custom_passcode() {
    let mut h = announced_device();
    h.service.set_passcode(h.app_id, "111222").expect("first set");

    h.transport.fail_next_passcode_set();
    let result = h.service.set_passcode(h.app_id, "333444");
    assert!(result.is_err());

    assert_eq!(h.service.password_for(":1.4"), "111222");
    assert_eq!(h.service.passcode(h.app_id).expect("passcode"), "111222");
    assert_eq!(
        h.rx.try_recv(),
        Ok(GatewayEvent::CredentialSetFailed { app_id: h.app_id })
    );
}

/// A failed set flips the device's authenticated flag in the snapshot; a
/// successful retry leaves the flag where discovery last put it (the next
/// announcement refresh does not resurrect it either).
#[test]
fn test_failed_set_marks_snapshot_unauthenticated() {
    let h = announced_device();
    assert!(h.service.devices().expect("devices")[0].is_authenticated);

    h.transport.fail_next_passcode_set();
    let _ = h.service.set_passcode(h.app_id, "999888");
    assert!(!h.service.devices().expect("devices")[0].is_authenticated);

    h.service.on_announced(h.app_id, ":1.4", "porch-gateway");
    assert!(
        !h.service.devices().expect("devices")[0].is_authenticated,
        "re-announcement refreshes content, not trust"
    );
}

/// Argument errors are checked before anything is staged: no rollback event,
/// no config channel opened.
#[test]
fn test_invalid_arguments_have_no_side_effects() {
    let mut h = announced_device();

    assert!(matches!(
        h.service.set_passcode(h.app_id, ""),
        Err(GatewayError::InvalidArgument(_))
    ));
    assert!(matches!(
        h.service.set_passcode(Uuid::new_v4(), "123456"),
        Err(GatewayError::InvalidArgument(_))
    ));

    assert!(h.rx.try_recv().is_err(), "no event for argument errors");
    assert!(!h.transport.is_config_connected());
    assert_eq!(h.service.password_for(":1.4"), DEFAULT_PASSCODE);
}

/// Factory reset applies the local default before the remote call and twice
/// in a row is harmless.
#[test]
fn test_factory_reset_is_idempotent_and_local_first() {
    let h = announced_device();
    h.service.set_passcode(h.app_id, "777666").expect("set");

    h.service.factory_reset(h.app_id).expect("first reset");
    h.service.factory_reset(h.app_id).expect("second reset");

    assert_eq!(
        h.service.passcode(h.app_id).expect("passcode"),
        DEFAULT_PASSCODE
    );
    assert_eq!(h.service.password_for(":1.4"), DEFAULT_PASSCODE);
}

/// Two sets against the same peer reuse one config channel; a set against a
/// different peer moves the channel.
#[test]
fn test_config_channel_follows_the_target_peer() {
    let h = announced_device();
    let second_id = Uuid::new_v4();
    h.service.on_announced(second_id, ":1.5", "garage-gateway");

    h.service.set_passcode(h.app_id, "101010").expect("set A");
    assert_eq!(h.transport.config_peer().as_deref(), Some(":1.4"));

    h.service.set_passcode(h.app_id, "202020").expect("set A again");
    assert_eq!(h.transport.config_peer().as_deref(), Some(":1.4"));

    h.service.set_passcode(second_id, "303030").expect("set B");
    assert_eq!(h.transport.config_peer().as_deref(), Some(":1.5"));
}
