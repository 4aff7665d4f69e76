// ── Domain model ──
//
// Identity, snapshot and status types shared by every other module.

pub mod identity;
pub mod snapshot;
pub mod status;

pub use identity::{BridgeId, DeviceId, DeviceIdentity, DeviceType};
pub use snapshot::{FieldValue, Snapshot};
pub use status::{ConnectivityStatus, DeviceHealth};
