//! Polling engine between `bindery-api` and a host framework.
//!
//! - **[`Engine`]** — Central facade. Registers bridges (one token
//!   refresher slot plus one [`HttpDeviceClient`](bindery_api::HttpDeviceClient)
//!   each), initializes and disposes devices, and answers status queries.
//!   [`Engine::poll_once()`] fetches a single snapshot without scheduling.
//!
//! - **[`Poller`]** — Per-device fixed-delay task. The next cycle starts a
//!   full interval after the previous one completes; cancellation is
//!   cooperative via `CancellationToken`.
//!
//! - **[`normalize()`]** — Pure mapping from a raw payload and a
//!   [`Schema`] to a canonical [`Snapshot`]. Fields the vendor did not
//!   report become [`FieldValue::Undefined`].
//!
//! - **[`HealthTracker`]** — Folds cycle outcomes into a
//!   [`ConnectivityStatus`] and decides when polling is suspended.
//!
//! - **[`StateSink`]** — Where updates leave the engine: one `publish` per
//!   changed channel and one `update_connectivity` per status change.

pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod model;
pub mod normalize;
pub mod poller;
pub mod schema;
pub mod sink;
pub mod store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{BridgeAuth, BridgeConfig, DeviceConfig};
pub use engine::Engine;
pub use error::CoreError;
pub use health::{HealthTracker, Transition};
pub use normalize::{NormalizeError, normalize};
pub use poller::{CycleVerdict, PollCycle, PollState, Poller, RefreshRequest};
pub use schema::{FieldKind, FieldSpec, Schema, SchemaRegistry};
pub use sink::{BroadcastSink, SinkEvent, StateSink, TracingSink};
pub use store::SnapshotStore;

pub use model::{
    BridgeId, ConnectivityStatus, DeviceHealth, DeviceId, DeviceIdentity, DeviceType, FieldValue,
    Snapshot,
};
