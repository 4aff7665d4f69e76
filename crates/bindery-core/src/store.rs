// ── Snapshot store ──
//
// Latest snapshot per device with push-based change notification.
// Each device owns a `watch` channel; the poll task for that device is
// its only writer.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;

use crate::model::{DeviceId, Snapshot};

type Slot = watch::Sender<Option<Arc<Snapshot>>>;

pub struct SnapshotStore {
    devices: DashMap<DeviceId, Slot>,
    /// Bumped on every mutation.
    version: watch::Sender<u64>,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotStore {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0u64);
        Self {
            devices: DashMap::new(),
            version,
        }
    }

    /// Replace the device's snapshot, returning the previous one.
    pub fn upsert(&self, snapshot: Snapshot) -> Option<Arc<Snapshot>> {
        let previous = self
            .devices
            .entry(snapshot.device.clone())
            .or_insert_with(|| watch::channel(None).0)
            .send_replace(Some(Arc::new(snapshot)));
        self.bump_version();
        previous
    }

    pub fn get(&self, device: &DeviceId) -> Option<Arc<Snapshot>> {
        self.devices.get(device).and_then(|slot| slot.borrow().clone())
    }

    /// Watch one device. Works before the first snapshot arrives; the
    /// receiver's `changed()` fails once the device is removed.
    pub fn subscribe(&self, device: &DeviceId) -> watch::Receiver<Option<Arc<Snapshot>>> {
        self.devices
            .entry(device.clone())
            .or_insert_with(|| watch::channel(None).0)
            .subscribe()
    }

    /// Drop the device and everything stored for it.
    pub fn remove(&self, device: &DeviceId) -> Option<Arc<Snapshot>> {
        let removed = self
            .devices
            .remove(device)
            .and_then(|(_, slot)| slot.borrow().clone());
        self.bump_version();
        removed
    }

    /// All current snapshots, ordered by device id.
    pub fn all(&self) -> Vec<Arc<Snapshot>> {
        let mut all: Vec<Arc<Snapshot>> = self
            .devices
            .iter()
            .filter_map(|slot| slot.value().borrow().clone())
            .collect();
        all.sort_by(|a, b| a.device.cmp(&b.device));
        all
    }

    pub fn version(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    fn bump_version(&self) {
        self.version.send_modify(|v| *v += 1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{DateTime, Utc};

    use super::*;

    fn snapshot(device: &str, online: bool) -> Snapshot {
        Snapshot {
            device: device.into(),
            device_type: "washer".into(),
            captured_at: DateTime::<Utc>::UNIX_EPOCH,
            fields: BTreeMap::new(),
            online,
        }
    }

    #[test]
    fn latest_wins() {
        let store = SnapshotStore::new();
        assert!(store.upsert(snapshot("w1", true)).is_none());
        let previous = store.upsert(snapshot("w1", false)).unwrap();
        assert!(previous.online);
        assert!(!store.get(&"w1".into()).unwrap().online);
    }

    #[test]
    fn all_is_sorted() {
        let store = SnapshotStore::new();
        store.upsert(snapshot("b", true));
        store.upsert(snapshot("a", true));
        let ids: Vec<String> = store.all().iter().map(|s| s.device.to_string()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn subscriber_sees_updates_and_removal() {
        let store = SnapshotStore::new();
        let device = DeviceId::from("w1");
        let mut rx = store.subscribe(&device);
        assert!(rx.borrow().is_none());

        store.upsert(snapshot("w1", true));
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().as_ref().unwrap().online);

        store.remove(&device);
        assert!(rx.changed().await.is_err());
        assert!(store.get(&device).is_none());
    }

    #[test]
    fn version_bumps() {
        let store = SnapshotStore::new();
        let rx = store.version();
        store.upsert(snapshot("w1", true));
        store.remove(&"w1".into());
        assert_eq!(*rx.borrow(), 2);
    }
}
