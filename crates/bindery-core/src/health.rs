// ── Status / health tracker ──
//
// Folds poll-cycle outcomes into a per-device connectivity status and
// decides whether polling continues. No backoff: every failure just
// waits for the next fixed-delay tick.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, warn};

use bindery_api::FailureKind;

use crate::model::{ConnectivityStatus, DeviceHealth, DeviceId, Snapshot};

/// Detail attached when the vendor says the device is unreachable.
pub const DEVICE_REPORTS_OFFLINE: &str = "device reports offline";

/// Effect of one recorded outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub health: DeviceHealth,
    /// Status or detail differs from before this outcome.
    pub changed: bool,
    /// Polling must stop until the device is re-initialized.
    pub suspend: bool,
}

#[derive(Debug, Default)]
pub struct HealthTracker {
    devices: DashMap<DeviceId, DeviceHealth>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, device: &DeviceId) -> Option<DeviceHealth> {
        self.devices.get(device).map(|h| h.value().clone())
    }

    /// Start tracking a device from a clean slate.
    pub fn reset(&self, device: &DeviceId) {
        self.devices.insert(device.clone(), DeviceHealth::default());
    }

    pub fn remove(&self, device: &DeviceId) {
        self.devices.remove(device);
    }

    /// A cycle produced a snapshot.
    pub fn record_success(
        &self,
        device: &DeviceId,
        snapshot: &Snapshot,
        now: DateTime<Utc>,
    ) -> Transition {
        let (status, detail) = if snapshot.online {
            (ConnectivityStatus::Online, None)
        } else {
            (
                ConnectivityStatus::Offline,
                Some(DEVICE_REPORTS_OFFLINE.to_owned()),
            )
        };
        self.apply(device, status, detail, false, |h| {
            h.consecutive_failures = 0;
            h.last_success = Some(now);
        })
    }

    /// A cycle failed with an error of class `kind`.
    pub fn record_failure(&self, device: &DeviceId, kind: FailureKind, message: &str) -> Transition {
        let (status, detail, suspend) = match kind {
            FailureKind::Auth | FailureKind::Config => {
                warn!(device = %device, kind = %kind, error = message, "suspending polling");
                (ConnectivityStatus::ConfigError, message.to_owned(), true)
            }
            FailureKind::Permanent => {
                warn!(device = %device, error = message, "permanent request failure");
                (
                    ConnectivityStatus::CommunicationError,
                    format!("permanent: {message}"),
                    false,
                )
            }
            FailureKind::Offline => {
                debug!(device = %device, error = message, "device not responding");
                (ConnectivityStatus::Offline, message.to_owned(), false)
            }
            FailureKind::Transient | FailureKind::Malformed => {
                debug!(device = %device, kind = %kind, error = message, "poll failed");
                (ConnectivityStatus::CommunicationError, message.to_owned(), false)
            }
        };
        self.apply(device, status, Some(detail), suspend, |h| {
            h.consecutive_failures = h.consecutive_failures.saturating_add(1);
            h.last_error = Some(message.to_owned());
        })
    }

    /// Configuration rejected before any fetch was attempted.
    pub fn record_config_error(&self, device: &DeviceId, detail: &str) -> Transition {
        self.apply(
            device,
            ConnectivityStatus::ConfigError,
            Some(detail.to_owned()),
            true,
            |h| h.last_error = Some(detail.to_owned()),
        )
    }

    fn apply(
        &self,
        device: &DeviceId,
        status: ConnectivityStatus,
        detail: Option<String>,
        suspend: bool,
        update: impl FnOnce(&mut DeviceHealth),
    ) -> Transition {
        let mut entry = self.devices.entry(device.clone()).or_default();
        let changed = entry.status != status || entry.detail != detail;
        entry.status = status;
        entry.detail = detail;
        update(entry.value_mut());
        Transition {
            health: entry.value().clone(),
            changed,
            suspend,
        }
    }
}
