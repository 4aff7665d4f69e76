// ── Runtime configuration ──
//
// These types describe *what* to poll and *how* to authenticate.
// They carry credential data but never touch disk: the binary builds
// them from `bindery-config` and hands them to the `Engine`.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use url::Url;

use bindery_api::{RefreshPolicy, RequestSpec, TransportConfig};

use crate::error::CoreError;
use crate::model::{BridgeId, DeviceIdentity};

/// How a bridge authenticates.
#[derive(Debug, Clone)]
pub enum BridgeAuth {
    /// OAuth password grant with refresh tokens (cloud accounts).
    OAuth {
        token_url: Url,
        client_id: String,
        client_secret: Option<SecretString>,
        username: String,
        password: SecretString,
        scope: Option<String>,
    },
    /// HTTP Basic (LAN devices).
    Basic {
        username: String,
        password: SecretString,
    },
    /// Long-lived bearer token.
    Bearer { token: SecretString },
}

/// One vendor account or LAN host.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub id: BridgeId,
    pub base_url: Url,
    pub auth: BridgeAuth,
    pub transport: TransportConfig,
    pub refresh: RefreshPolicy,
}

impl BridgeConfig {
    pub fn new(id: impl Into<BridgeId>, base_url: Url, auth: BridgeAuth) -> Self {
        Self {
            id: id.into(),
            base_url,
            auth,
            transport: TransportConfig::default(),
            refresh: RefreshPolicy::default(),
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        let fail = |message: &str| {
            Err(CoreError::Config {
                message: format!("bridge '{}': {message}", self.id),
            })
        };

        if self.id.as_str().trim().is_empty() {
            return fail("name must not be empty");
        }
        if self.base_url.cannot_be_a_base() || self.base_url.host_str().is_none_or(str::is_empty) {
            return fail("base URL must be an absolute http(s) URL");
        }
        match &self.auth {
            BridgeAuth::OAuth {
                client_id,
                username,
                password,
                ..
            } => {
                if client_id.trim().is_empty() {
                    return fail("client_id must not be empty");
                }
                if username.trim().is_empty() || password.expose_secret().is_empty() {
                    return fail("username and password must not be empty");
                }
            }
            BridgeAuth::Basic { username, password } => {
                if username.trim().is_empty() || password.expose_secret().is_empty() {
                    return fail("username and password must not be empty");
                }
            }
            BridgeAuth::Bearer { token } => {
                if token.expose_secret().is_empty() {
                    return fail("token must not be empty");
                }
            }
        }
        Ok(())
    }
}

/// One polled device.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub identity: DeviceIdentity,
    /// Seconds between the end of one cycle and the start of the next.
    /// `0` fetches once at initialization; negative is a configuration
    /// error.
    pub interval_secs: i64,
    pub request: RequestSpec,
}

impl DeviceConfig {
    pub fn new(identity: DeviceIdentity, interval_secs: i64, request: RequestSpec) -> Self {
        Self {
            identity,
            interval_secs,
            request,
        }
    }

    /// Check the config and return the poll interval.
    pub fn validate(&self) -> Result<Duration, CoreError> {
        let device = &self.identity.device;
        let fail = |message: String| {
            Err(CoreError::Config {
                message: format!("device '{device}': {message}"),
            })
        };

        if !device.is_valid() {
            return fail("id must be non-empty and at least 1 when numeric".into());
        }
        if self.request.path.trim().is_empty() {
            return fail("request path must not be empty".into());
        }
        match u64::try_from(self.interval_secs) {
            Ok(secs) => Ok(Duration::from_secs(secs)),
            Err(_) => fail(format!(
                "interval must not be negative (got {})",
                self.interval_secs
            )),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn device(id: &str, interval: i64) -> DeviceConfig {
        DeviceConfig::new(
            DeviceIdentity::new("lg", id, "washer"),
            interval,
            RequestSpec::get("devices/{device}"),
        )
    }

    #[test]
    fn interval_validation() {
        assert_eq!(device("w1", 30).validate().unwrap(), Duration::from_secs(30));
        assert_eq!(device("w1", 0).validate().unwrap(), Duration::ZERO);
        let err = device("w1", -5).validate().unwrap_err();
        assert!(err.to_string().contains("negative"));
    }

    #[test]
    fn numeric_ids_start_at_one() {
        assert!(device("0", 10).validate().is_err());
        assert!(device("", 10).validate().is_err());
        assert!(device("1", 10).validate().is_ok());
    }

    #[test]
    fn bridge_credentials_required() {
        let base = Url::parse("http://192.168.1.108/").unwrap();
        let ok = BridgeConfig::new(
            "dvr",
            base.clone(),
            BridgeAuth::Basic {
                username: "admin".into(),
                password: SecretString::from("pw"),
            },
        );
        assert!(ok.validate().is_ok());

        let empty = BridgeConfig::new(
            "dvr",
            base,
            BridgeAuth::Basic {
                username: "admin".into(),
                password: SecretString::from(""),
            },
        );
        assert!(matches!(empty.validate(), Err(CoreError::Config { .. })));
    }
}
