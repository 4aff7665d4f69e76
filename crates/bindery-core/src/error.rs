// ── Core error types ──
//
// Errors surfaced by the engine's public API. Poll cycles never return
// these to callers; they are folded into device health instead. The
// `From<bindery_api::Error>` impl keeps the failure class intact.

use thiserror::Error;

use bindery_api::FailureKind;

use crate::normalize::NormalizeError;

#[derive(Debug, Error)]
pub enum CoreError {
    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Lookup ───────────────────────────────────────────────────────
    #[error("Unknown device: {device}")]
    UnknownDevice { device: String },

    #[error("Unknown bridge: {bridge}")]
    UnknownBridge { bridge: String },

    #[error("No schema registered for device type '{device_type}'")]
    UnknownDeviceType { device_type: String },

    #[error("Device already registered: {device}")]
    DuplicateDevice { device: String },

    // ── Cycle failures ───────────────────────────────────────────────
    #[error("Malformed response: {0}")]
    MalformedResponse(#[from] NormalizeError),

    #[error(transparent)]
    Api(#[from] bindery_api::Error),

    // ── Lifecycle ────────────────────────────────────────────────────
    #[error("Engine is shut down")]
    ShutDown,
}

impl CoreError {
    /// Failure class used by the health tracker.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Config { .. }
            | Self::UnknownDevice { .. }
            | Self::UnknownBridge { .. }
            | Self::UnknownDeviceType { .. }
            | Self::DuplicateDevice { .. }
            | Self::ShutDown => FailureKind::Config,
            Self::MalformedResponse(_) => FailureKind::Malformed,
            Self::Api(e) => e.kind(),
        }
    }
}
