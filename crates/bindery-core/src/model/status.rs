use chrono::{DateTime, Utc};
use serde::Serialize;

/// Connectivity of a device as shown to the host.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectivityStatus {
    Online,
    /// Reachable bridge, but the device itself is not responding.
    #[default]
    Offline,
    /// Bad configuration or rejected credentials; polling is suspended.
    ConfigError,
    /// Fetch or parse failed; polling continues.
    CommunicationError,
}

/// Health record kept per device by the health tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceHealth {
    pub status: ConnectivityStatus,
    pub detail: Option<String>,
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Default for DeviceHealth {
    fn default() -> Self {
        Self {
            status: ConnectivityStatus::Offline,
            detail: Some("not yet polled".into()),
            consecutive_failures: 0,
            last_success: None,
            last_error: None,
        }
    }
}
