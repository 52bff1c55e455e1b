//! Discovery registry: the live set of advertised gateways.
//!
//! Announcement callbacks arrive on arbitrary transport-owned threads.  A
//! notification lock taken at ingress serializes each commit together with
//! its listener call and event send, so deliveries observe commit order even
//! when announce/lost for the same device race on two threads.  The listener
//! runs without the map lock held and may read the registry from its
//! callback; it must not announce or remove devices from there.
//!
//! Deduplication is by stable identity: a re-announcement of a known
//! `app_id` updates the record in place — typically because the device came
//! back under a new bus name — and deliberately does NOT emit an
//! added/removed pair.  An in-flight session that still holds the old bus
//! name is not implicitly invalidated; session loss is surfaced separately
//! by the transport's own disconnect signal.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use gateway_core::{AppId, BusName, DeviceRecord, GatewayEvent};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Receives additions/removals. Only one listener is active at a time,
/// matching a single-screen-at-a-time consumer; re-register on each
/// observation context change.
pub trait DiscoveryListener: Send + Sync {
    fn device_added(&self, record: &DeviceRecord);
    fn device_removed(&self, record: &DeviceRecord);
}

/// Tracks advertised devices and notifies on changes.
pub struct DiscoveryRegistry {
    devices: Mutex<HashMap<AppId, DeviceRecord>>,
    listener: Mutex<Option<Arc<dyn DiscoveryListener>>>,
    // Taken before `devices` and held through notification, so listener
    // calls and event sends happen in commit order.
    notify: Mutex<()>,
    events: mpsc::UnboundedSender<GatewayEvent>,
}

impl DiscoveryRegistry {
    pub fn new(events: mpsc::UnboundedSender<GatewayEvent>) -> Self {
        Self {
            devices: Mutex::new(HashMap::new()),
            listener: Mutex::new(None),
            notify: Mutex::new(()),
            events,
        }
    }

    /// Handles a device announcement from the transport.
    pub fn on_announced(
        &self,
        app_id: AppId,
        bus_name: impl Into<String>,
        display_name: impl Into<String>,
    ) {
        let bus_name = bus_name.into();
        let display_name = display_name.into();

        let _order = self.notify.lock().expect("notification order mutex poisoned");
        let added = {
            let mut devices = self.devices.lock().expect("device map mutex poisoned");
            match devices.get_mut(&app_id) {
                Some(record) => {
                    // Content refresh only; keeps the authentication flag.
                    debug!(%app_id, %bus_name, "device re-announced, record refreshed");
                    record.bus_name = bus_name;
                    record.display_name = display_name;
                    None
                }
                None => {
                    let record = DeviceRecord::new(app_id, bus_name, display_name);
                    devices.insert(app_id, record.clone());
                    Some(record)
                }
            }
        };

        if let Some(record) = added {
            info!(%app_id, bus_name = %record.bus_name, "device discovered");
            if let Some(listener) = self.current_listener() {
                listener.device_added(&record);
            }
            let _ = self.events.send(GatewayEvent::DeviceAdded { app_id });
        }
    }

    /// Handles a lost-device notification. Unknown ids are a no-op.
    pub fn on_lost(&self, app_id: AppId) {
        let _order = self.notify.lock().expect("notification order mutex poisoned");
        let removed = {
            let mut devices = self.devices.lock().expect("device map mutex poisoned");
            devices.remove(&app_id)
        };

        if let Some(record) = removed {
            info!(%app_id, bus_name = %record.bus_name, "device lost");
            if let Some(listener) = self.current_listener() {
                listener.device_removed(&record);
            }
            let _ = self.events.send(GatewayEvent::DeviceRemoved { app_id });
        }
    }

    /// Returns an immutable snapshot of all known devices.
    pub fn snapshot(&self) -> Vec<DeviceRecord> {
        self.devices
            .lock()
            .expect("device map mutex poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Resolves the most recently announced bus name for `app_id`.
    pub fn bus_name_of(&self, app_id: &AppId) -> Option<BusName> {
        self.devices
            .lock()
            .expect("device map mutex poisoned")
            .get(app_id)
            .map(|r| r.bus_name.clone())
    }

    /// Clears the authentication flag after a failed credential operation.
    /// Returns `false` if the device is no longer known.
    pub fn mark_unauthenticated(&self, app_id: &AppId) -> bool {
        let mut devices = self.devices.lock().expect("device map mutex poisoned");
        match devices.get_mut(app_id) {
            Some(record) => {
                record.is_authenticated = false;
                true
            }
            None => false,
        }
    }

    /// Replaces the active listener (last registration wins).
    pub fn set_listener(&self, listener: Arc<dyn DiscoveryListener>) {
        *self.listener.lock().expect("listener mutex poisoned") = Some(listener);
    }

    pub fn clear_listener(&self) {
        *self.listener.lock().expect("listener mutex poisoned") = None;
    }

    /// Drops the listener and all records. Used at service shutdown;
    /// waits for an in-flight notification to finish delivering.
    pub fn clear(&self) {
        let _order = self.notify.lock().expect("notification order mutex poisoned");
        self.clear_listener();
        self.devices
            .lock()
            .expect("device map mutex poisoned")
            .clear();
    }

    fn current_listener(&self) -> Option<Arc<dyn DiscoveryListener>> {
        self.listener.lock().expect("listener mutex poisoned").clone()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[derive(Default)]
    struct RecordingListener {
        added: Mutex<Vec<DeviceRecord>>,
        removed: Mutex<Vec<DeviceRecord>>,
    }

    impl DiscoveryListener for RecordingListener {
        fn device_added(&self, record: &DeviceRecord) {
            self.added.lock().unwrap().push(record.clone());
        }
        fn device_removed(&self, record: &DeviceRecord) {
            self.removed.lock().unwrap().push(record.clone());
        }
    }

    fn make_registry() -> (
        DiscoveryRegistry,
        mpsc::UnboundedReceiver<GatewayEvent>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (DiscoveryRegistry::new(tx), rx)
    }

    #[test]
    fn test_first_announcement_inserts_and_notifies_added() {
        let (registry, mut rx) = make_registry();
        let listener = Arc::new(RecordingListener::default());
        registry.set_listener(listener.clone());

        let app_id = Uuid::new_v4();
        registry.on_announced(app_id, ":1.1", "gw-one");

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].bus_name, ":1.1");
        assert_eq!(listener.added.lock().unwrap().len(), 1);
        assert_eq!(rx.try_recv(), Ok(GatewayEvent::DeviceAdded { app_id }));
    }

    #[test]
    fn test_reannouncement_with_new_bus_name_updates_without_duplicates() {
        let (registry, mut rx) = make_registry();
        let listener = Arc::new(RecordingListener::default());
        registry.set_listener(listener.clone());

        let app_id = Uuid::new_v4();
        registry.on_announced(app_id, ":1.1", "gw-one");
        registry.on_announced(app_id, ":1.9", "gw-one");

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1, "no duplicate entries for one app id");
        assert_eq!(snapshot[0].bus_name, ":1.9", "latest bus name wins");

        // Only the first announcement produced an added notification.
        assert_eq!(listener.added.lock().unwrap().len(), 1);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err(), "no event for the refresh");
    }

    #[test]
    fn test_reannouncement_preserves_authentication_flag() {
        let (registry, _rx) = make_registry();
        let app_id = Uuid::new_v4();
        registry.on_announced(app_id, ":1.1", "gw");
        assert!(registry.mark_unauthenticated(&app_id));

        registry.on_announced(app_id, ":1.2", "gw");
        assert!(!registry.snapshot()[0].is_authenticated);
    }

    #[test]
    fn test_lost_removes_record_and_notifies() {
        let (registry, mut rx) = make_registry();
        let listener = Arc::new(RecordingListener::default());
        registry.set_listener(listener.clone());

        let app_id = Uuid::new_v4();
        registry.on_announced(app_id, ":1.1", "gw");
        let _ = rx.try_recv();

        registry.on_lost(app_id);
        assert!(registry.snapshot().is_empty());
        assert_eq!(listener.removed.lock().unwrap().len(), 1);
        assert_eq!(rx.try_recv(), Ok(GatewayEvent::DeviceRemoved { app_id }));
    }

    #[test]
    fn test_lost_for_unknown_app_id_is_a_no_op() {
        let (registry, mut rx) = make_registry();
        registry.on_lost(Uuid::new_v4());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_set_listener_replaces_previous_listener() {
        let (registry, _rx) = make_registry();
        let first = Arc::new(RecordingListener::default());
        let second = Arc::new(RecordingListener::default());

        registry.set_listener(first.clone());
        registry.set_listener(second.clone());
        registry.on_announced(Uuid::new_v4(), ":1.1", "gw");

        assert!(first.added.lock().unwrap().is_empty());
        assert_eq!(second.added.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_mutation() {
        let (registry, _rx) = make_registry();
        let app_id = Uuid::new_v4();
        registry.on_announced(app_id, ":1.1", "gw");

        let snapshot = registry.snapshot();
        registry.on_lost(app_id);

        assert_eq!(snapshot.len(), 1, "earlier snapshot is unaffected");
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn test_bus_name_of_tracks_latest_announcement() {
        let (registry, _rx) = make_registry();
        let app_id = Uuid::new_v4();
        assert_eq!(registry.bus_name_of(&app_id), None);

        registry.on_announced(app_id, ":1.1", "gw");
        registry.on_announced(app_id, ":1.2", "gw");
        assert_eq!(registry.bus_name_of(&app_id).as_deref(), Some(":1.2"));
    }

    #[test]
    fn test_event_stream_follows_commit_order_under_contention() {
        // Several threads hammer announce/lost for one device. Because each
        // commit and its event send are serialized together, the channel
        // must show a strict added/removed alternation; an inversion means
        // a notification escaped between another thread's commit and send.
        let (registry, mut rx) = make_registry();
        let registry = Arc::new(registry);
        let app_id = Uuid::new_v4();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let registry = registry.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..50 {
                    registry.on_announced(app_id, ":1.1", "gw");
                    registry.on_lost(app_id);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let mut present = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                GatewayEvent::DeviceAdded { .. } => {
                    assert!(!present, "added event while already present");
                    present = true;
                }
                GatewayEvent::DeviceRemoved { .. } => {
                    assert!(present, "removed event while absent");
                    present = false;
                }
                _ => {}
            }
        }
    }

    #[test]
    fn test_clear_drops_records_and_listener() {
        let (registry, _rx) = make_registry();
        let listener = Arc::new(RecordingListener::default());
        registry.set_listener(listener.clone());
        registry.on_announced(Uuid::new_v4(), ":1.1", "gw");

        registry.clear();
        assert!(registry.snapshot().is_empty());

        registry.on_announced(Uuid::new_v4(), ":1.2", "gw");
        assert_eq!(
            listener.added.lock().unwrap().len(),
            1,
            "cleared listener must not see post-clear announcements"
        );
    }
}
