//! CLI error types with miette diagnostics.
//!
//! Maps config and engine errors into user-facing errors with help text.

use miette::Diagnostic;
use thiserror::Error;

use bindery_api::FailureKind;
use bindery_config::ConfigError;
use bindery_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration file not found: {path}")]
    #[diagnostic(
        code(bindery::no_config),
        help(
            "Pass one with --config or set BINDERY_CONFIG.\n\
             Default location: {default}"
        )
    )]
    NoConfig { path: String, default: String },

    #[error("Invalid configuration")]
    #[diagnostic(
        code(bindery::config),
        help("Run: bindery check --config <PATH> to see the full summary")
    )]
    Config(#[source] ConfigError),

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(bindery::validation))]
    Validation { field: String, reason: String },

    #[error("Device '{device}' is not configured")]
    #[diagnostic(code(bindery::unknown_device), help("Configured devices: {available}"))]
    UnknownDevice { device: String, available: String },

    // ── Polling ──────────────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(bindery::auth_failed),
        help("Verify the bridge credentials; *_env variables take precedence over plaintext.")
    )]
    AuthFailed { message: String },

    #[error("Could not reach the vendor endpoint: {message}")]
    #[diagnostic(code(bindery::connection_failed))]
    ConnectionFailed { message: String },

    #[error("Request timed out after {seconds}s")]
    #[diagnostic(
        code(bindery::timeout),
        help("Raise `timeout` in the bridge or [defaults] section.")
    )]
    Timeout { seconds: u64 },

    #[error("Device '{device}' is offline")]
    #[diagnostic(code(bindery::offline))]
    DeviceOffline { device: String },

    #[error("Unexpected response: {message}")]
    #[diagnostic(
        code(bindery::malformed),
        help("Check the device type's schema and the request `format`.")
    )]
    Malformed { message: String },

    #[error("Request failed: {message}")]
    #[diagnostic(code(bindery::request_failed))]
    Request { message: String },

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to encode output: {0}")]
    #[diagnostic(code(bindery::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NoConfig { .. } | Self::Config(_) | Self::Validation { .. } => exit_code::USAGE,
            Self::UnknownDevice { .. } => exit_code::NOT_FOUND,
            Self::AuthFailed { .. } => exit_code::AUTH,
            Self::ConnectionFailed { .. } | Self::DeviceOffline { .. } => exit_code::CONNECTION,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            _ => exit_code::GENERAL,
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NotFound { path } => Self::NoConfig {
                path: path.display().to_string(),
                default: bindery_config::config_path().display().to_string(),
            },
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            other => Self::Config(other),
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Api(bindery_api::Error::Timeout { timeout_secs }) => Self::Timeout {
                seconds: timeout_secs,
            },
            CoreError::Api(bindery_api::Error::DeviceOffline { device, .. }) => {
                Self::DeviceOffline { device }
            }
            CoreError::UnknownDevice { device } => Self::UnknownDevice {
                device,
                available: String::new(),
            },
            other => {
                let message = other.to_string();
                match other.kind() {
                    FailureKind::Auth => Self::AuthFailed { message },
                    FailureKind::Config => Self::Validation {
                        field: "configuration".into(),
                        reason: message,
                    },
                    FailureKind::Transient => Self::ConnectionFailed { message },
                    FailureKind::Malformed => Self::Malformed { message },
                    FailureKind::Offline | FailureKind::Permanent => Self::Request { message },
                }
            }
        }
    }
}
