// ── Channel / state sink ──
//
// Where canonical updates leave the engine. The engine calls the sink
// once per changed channel and once per connectivity change; it never
// republishes unchanged values.

use tokio::sync::broadcast;
use tracing::info;

use crate::model::{ConnectivityStatus, DeviceId, FieldValue};

const EVENT_CHANNEL_SIZE: usize = 256;

/// Receiver of channel values and connectivity changes.
pub trait StateSink: Send + Sync {
    fn publish(&self, device: &DeviceId, channel: &str, value: &FieldValue);

    fn update_connectivity(
        &self,
        device: &DeviceId,
        status: ConnectivityStatus,
        detail: Option<&str>,
    );
}

// ── TracingSink ─────────────────────────────────────────────────────

/// Writes every update as a structured log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl StateSink for TracingSink {
    fn publish(&self, device: &DeviceId, channel: &str, value: &FieldValue) {
        info!(device = %device, channel, value = %value, "state update");
    }

    fn update_connectivity(
        &self,
        device: &DeviceId,
        status: ConnectivityStatus,
        detail: Option<&str>,
    ) {
        info!(
            device = %device,
            status = %status,
            detail = detail.unwrap_or_default(),
            "connectivity update"
        );
    }
}

// ── BroadcastSink ───────────────────────────────────────────────────

/// Event emitted by [`BroadcastSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    State {
        device: DeviceId,
        channel: String,
        value: FieldValue,
    },
    Connectivity {
        device: DeviceId,
        status: ConnectivityStatus,
        detail: Option<String>,
    },
}

/// Fans updates out to in-process subscribers.
///
/// Events sent while nobody is subscribed are dropped.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<SinkEvent>,
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastSink {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SinkEvent> {
        self.tx.subscribe()
    }
}

impl StateSink for BroadcastSink {
    fn publish(&self, device: &DeviceId, channel: &str, value: &FieldValue) {
        let _ = self.tx.send(SinkEvent::State {
            device: device.clone(),
            channel: channel.to_owned(),
            value: value.clone(),
        });
    }

    fn update_connectivity(
        &self,
        device: &DeviceId,
        status: ConnectivityStatus,
        detail: Option<&str>,
    ) {
        let _ = self.tx.send(SinkEvent::Connectivity {
            device: device.clone(),
            status,
            detail: detail.map(str::to_owned),
        });
    }
}
