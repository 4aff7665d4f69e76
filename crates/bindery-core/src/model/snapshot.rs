// ── Canonical snapshot ──
//
// The normalized, typed state of one device at one point in time.
// Snapshots are immutable; the store keeps only the latest per device.

use std::collections::BTreeMap;
use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

use super::identity::{DeviceId, DeviceType};

// ── FieldValue ──────────────────────────────────────────────────────

/// A single channel value.
///
/// `Undefined` means "the device did not report this"; it is distinct
/// from any reported value, including zero and empty text.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Undefined,
    Integer(i64),
    Decimal(f64),
    Text(String),
    Boolean(bool),
    Binary { media_type: String, data: Bytes },
}

impl FieldValue {
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("UNDEF"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Decimal(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
            Self::Boolean(true) => f.write_str("ON"),
            Self::Boolean(false) => f.write_str("OFF"),
            Self::Binary { media_type, data } => write!(f, "<{media_type}, {} bytes>", data.len()),
        }
    }
}

/// JSON rendering: `Undefined` is `null`, binary is a base64 object.
impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Undefined => serializer.serialize_none(),
            Self::Integer(v) => serializer.serialize_i64(*v),
            Self::Decimal(v) => serializer.serialize_f64(*v),
            Self::Text(v) => serializer.serialize_str(v),
            Self::Boolean(v) => serializer.serialize_bool(*v),
            Self::Binary { media_type, data } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("media_type", media_type)?;
                map.serialize_entry("data", &BASE64.encode(data))?;
                map.end()
            }
        }
    }
}

// ── Snapshot ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub device: DeviceId,
    pub device_type: DeviceType,
    pub captured_at: DateTime<Utc>,
    pub fields: BTreeMap<String, FieldValue>,
    /// Vendor-reported reachability; `true` when the schema has no flag.
    pub online: bool,
}

impl Snapshot {
    pub fn field(&self, channel: &str) -> Option<&FieldValue> {
        self.fields.get(channel)
    }

    /// Channels whose value differs from `previous` (all of them when
    /// there is no previous snapshot).
    pub fn changed_since<'a>(
        &'a self,
        previous: Option<&Snapshot>,
    ) -> Vec<(&'a str, &'a FieldValue)> {
        self.fields
            .iter()
            .filter(|(channel, value)| {
                previous
                    .and_then(|p| p.fields.get(channel.as_str()))
                    .is_none_or(|old| old != *value)
            })
            .map(|(channel, value)| (channel.as_str(), value))
            .collect()
    }
}
