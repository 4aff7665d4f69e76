use thiserror::Error;

/// Coarse failure class of a device request.
///
/// The poll engine only ever branches on this; the concrete [`Error`]
/// variant is kept for logging and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum FailureKind {
    /// Credentials invalid, expired and not recoverable by a refresh.
    Auth,
    /// Local configuration cannot work (unknown bridge, bad client setup).
    Config,
    /// Network-level or server-side hiccup; the next poll may succeed.
    Transient,
    /// Non-auth 4xx or a request the vendor will never accept.
    Permanent,
    /// The payload did not have the expected shape.
    Malformed,
    /// The vendor reports the device itself as unreachable.
    Offline,
}

/// Top-level error type for the `bindery-api` crate.
///
/// Covers every failure mode of the token lifecycle and the device
/// client. `bindery-core` never matches on variants directly; it uses
/// [`Error::kind`].
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Credentials could not be obtained or refreshed.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// The vendor rejected a token mid-flight (HTTP 401 or an auth
    /// result code). The client refreshes and retries once on this.
    #[error("Session expired -- re-authentication required")]
    SessionExpired,

    /// No token source registered for the bridge.
    #[error("No credentials registered for bridge '{bridge}'")]
    UnknownBridge { bridge: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS setup or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Vendor responses ────────────────────────────────────────────
    /// Non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Embedded result code signalling failure inside an HTTP 200 body.
    #[error("Vendor API error {code}: {message}")]
    Vendor { code: String, message: String },

    /// The vendor answered, but says the device is not responding.
    #[error("Device '{device}' is not responding (result code {code})")]
    DeviceOffline { device: String, code: String },

    // ── Data ────────────────────────────────────────────────────────
    /// Body could not be decoded, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Classify this error for the health tracker.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Authentication { .. } | Self::SessionExpired => FailureKind::Auth,
            Self::UnknownBridge { .. } | Self::Tls(_) => FailureKind::Config,
            Self::Transport(e) => classify_transport(e),
            Self::Timeout { .. } => FailureKind::Transient,
            Self::InvalidUrl(_) | Self::Vendor { .. } => FailureKind::Permanent,
            Self::Http { status, .. } => classify_status(*status),
            Self::DeviceOffline { .. } => FailureKind::Offline,
            Self::Deserialization { .. } => FailureKind::Malformed,
        }
    }

    /// Returns `true` if the vendor rejected the token and a fresh one
    /// might resolve it.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, Self::SessionExpired)
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        self.kind() == FailureKind::Transient
    }

    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Map an HTTP status code to a failure class.
///
/// 401 is reported as `Auth` here; the device client turns a first 401
/// into [`Error::SessionExpired`] before this is ever consulted.
pub fn classify_status(status: u16) -> FailureKind {
    match status {
        401 => FailureKind::Auth,
        408 | 429 | 500..=599 => FailureKind::Transient,
        _ => FailureKind::Permanent,
    }
}

fn classify_transport(e: &reqwest::Error) -> FailureKind {
    if e.is_builder() {
        FailureKind::Permanent
    } else if e.is_decode() {
        FailureKind::Malformed
    } else if let Some(status) = e.status() {
        classify_status(status.as_u16())
    } else {
        // connect, timeout, reset, body read: all network-level
        FailureKind::Transient
    }
}
