// ── Identity types ──
//
// Bridges, devices and device types are all identified by short vendor
// strings. Distinct newtypes keep them from being mixed up in maps and
// function signatures.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Name of a bridge (one vendor account or one LAN device host).
    BridgeId
);
string_id!(
    /// Vendor identifier of a polled device, unique within the engine.
    DeviceId
);
string_id!(
    /// Tag selecting the normalization schema, e.g. `air_conditioner`.
    DeviceType
);

impl DeviceId {
    /// Numeric ids (DVR channels) count from 1; anything else must just
    /// be non-blank.
    pub fn is_valid(&self) -> bool {
        let trimmed = self.0.trim();
        if trimmed.is_empty() {
            return false;
        }
        match trimmed.parse::<i64>() {
            Ok(n) => n >= 1,
            Err(_) => true,
        }
    }
}

/// Who a device is and where it lives. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub bridge: BridgeId,
    pub device: DeviceId,
    pub device_type: DeviceType,
}

impl DeviceIdentity {
    pub fn new(
        bridge: impl Into<BridgeId>,
        device: impl Into<DeviceId>,
        device_type: impl Into<DeviceType>,
    ) -> Self {
        Self {
            bridge: bridge.into(),
            device: device.into(),
            device_type: device_type.into(),
        }
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({})", self.bridge, self.device, self.device_type)
    }
}
