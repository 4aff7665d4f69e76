//! Configuration for the bindery engine.
//!
//! TOML file plus `BINDERY_` environment overrides (figment), credential
//! resolution (env var, then plaintext), validation, and translation to
//! `bindery_core::{BridgeConfig, DeviceConfig}`.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use bindery_api::{
    HttpMethod, PayloadFormat, RefreshPolicy, RequestSpec, ResultEnvelope, TlsMode,
    TransportConfig,
};
use bindery_core::{
    BridgeAuth, BridgeConfig, DeviceConfig, DeviceIdentity, DeviceType, Schema, SchemaRegistry,
};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no credentials for bridge '{bridge}': {reason}")]
    NoCredentials { bridge: String, reason: String },

    #[error("config file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Vendor accounts and LAN hosts, by name.
    #[serde(default)]
    pub bridges: BTreeMap<String, BridgeSection>,

    /// Polled devices.
    #[serde(default)]
    pub devices: Vec<DeviceSection>,

    /// Custom normalization schemas, by device type.
    #[serde(default)]
    pub device_types: BTreeMap<String, Schema>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    /// HTTP timeout, seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Refresh credentials this many seconds before they expire.
    #[serde(default = "default_refresh_margin")]
    pub refresh_margin: u64,

    #[serde(default = "default_refresh_attempts")]
    pub refresh_attempts: u32,

    /// Seconds between refresh attempts.
    #[serde(default = "default_refresh_retry_delay")]
    pub refresh_retry_delay: u64,

    /// Poll interval for devices that don't set one, seconds.
    #[serde(default = "default_interval")]
    pub interval: i64,

    #[serde(default)]
    pub insecure: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            refresh_margin: default_refresh_margin(),
            refresh_attempts: default_refresh_attempts(),
            refresh_retry_delay: default_refresh_retry_delay(),
            interval: default_interval(),
            insecure: false,
        }
    }
}

fn default_timeout() -> u64 {
    30
}
fn default_refresh_margin() -> u64 {
    60
}
fn default_refresh_attempts() -> u32 {
    2
}
fn default_refresh_retry_delay() -> u64 {
    2
}
fn default_interval() -> i64 {
    60
}

/// How a bridge authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    OAuth,
    Basic,
    Bearer,
}

/// A named bridge.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BridgeSection {
    /// Vendor API base URL (e.g., "http://192.168.1.108/").
    pub base_url: String,

    pub auth: AuthMode,

    /// OAuth token endpoint.
    pub token_url: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub client_secret_env: Option<String>,
    pub scope: Option<String>,

    pub username: Option<String>,

    /// Password (plaintext; prefer `password_env`).
    pub password: Option<String>,

    /// Environment variable name containing the password.
    pub password_env: Option<String>,

    /// Bearer token (plaintext; prefer `token_env`).
    pub token: Option<String>,
    pub token_env: Option<String>,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Override insecure TLS setting.
    pub insecure: Option<bool>,

    /// Override timeout.
    pub timeout: Option<u64>,
}

/// A polled device.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceSection {
    pub id: String,
    pub bridge: String,
    #[serde(rename = "type")]
    pub device_type: String,

    /// Seconds; `0` fetches once. Falls back to `defaults.interval`.
    pub interval: Option<i64>,

    /// Request path relative to the bridge URL; `{device}` is replaced.
    pub path: String,

    #[serde(default)]
    pub method: HttpMethod,

    /// JSON body for POST requests.
    pub body: Option<serde_json::Value>,

    #[serde(default)]
    pub format: PayloadFormat,

    /// Result-code envelope: a built-in name (e.g., "lg") or an inline
    /// table.
    pub envelope: Option<EnvelopeSection>,
}

/// `envelope = "lg"` or `envelope = { field = "...", ok_codes = [...] }`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum EnvelopeSection {
    Builtin(String),
    Inline(ResultEnvelope),
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("org", "bindery", "bindery").map_or_else(
        || PathBuf::from(".").join("bindery.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Load a TOML file merged with `BINDERY_` environment overrides.
/// The file must exist.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }

    // double underscore so `refresh_margin` survives the split
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("BINDERY_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Credential resolution ───────────────────────────────────────────

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// `*_env` variable first, then plaintext.
fn resolve_secret(
    bridge: &str,
    field: &str,
    env_name: Option<&str>,
    plaintext: Option<&str>,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<Option<SecretString>, ConfigError> {
    if let Some(value) = env_name.and_then(lookup) {
        return Ok(Some(SecretString::from(value)));
    }
    if let Some(value) = plaintext {
        return Ok(Some(SecretString::from(value)));
    }
    match env_name {
        Some(name) => Err(ConfigError::NoCredentials {
            bridge: bridge.into(),
            reason: format!("{field}: environment variable {name} is not set"),
        }),
        None => Ok(None),
    }
}

fn require_secret(
    bridge: &str,
    field: &str,
    env_name: Option<&str>,
    plaintext: Option<&str>,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<SecretString, ConfigError> {
    resolve_secret(bridge, field, env_name, plaintext, lookup)?.ok_or_else(|| {
        ConfigError::NoCredentials {
            bridge: bridge.into(),
            reason: format!("{field} or {field}_env is required"),
        }
    })
}

fn require<'a>(bridge: &str, field: &str, value: Option<&'a str>) -> Result<&'a str, ConfigError> {
    value.ok_or_else(|| invalid(format!("bridges.{bridge}.{field}"), "required for this auth mode"))
}

// ── Translation ─────────────────────────────────────────────────────

impl Config {
    /// Built-in schemas plus `device_types`; custom entries shadow
    /// built-ins of the same name.
    pub fn schema_registry(&self) -> SchemaRegistry {
        let mut registry = SchemaRegistry::with_builtins();
        for (name, schema) in &self.device_types {
            registry.register(name.as_str(), schema.clone());
        }
        registry
    }

    pub fn find_device(&self, id: &str) -> Option<&DeviceSection> {
        self.devices.iter().find(|d| d.id == id)
    }

    /// Runtime config for one bridge, with credentials resolved.
    pub fn bridge_config(&self, name: &str) -> Result<BridgeConfig, ConfigError> {
        let section = self
            .bridges
            .get(name)
            .ok_or_else(|| invalid("bridge", format!("unknown bridge '{name}'")))?;
        self.translate_bridge(name, section, &env_lookup)
    }

    pub fn bridge_configs(&self) -> Result<Vec<BridgeConfig>, ConfigError> {
        self.bridges
            .iter()
            .map(|(name, section)| self.translate_bridge(name, section, &env_lookup))
            .collect()
    }

    pub fn device_config(&self, section: &DeviceSection) -> Result<DeviceConfig, ConfigError> {
        let envelope = match &section.envelope {
            Some(EnvelopeSection::Builtin(name)) => {
                Some(ResultEnvelope::builtin(name).ok_or_else(|| {
                    invalid(
                        format!("devices.{}.envelope", section.id),
                        format!("unknown envelope '{name}'"),
                    )
                })?)
            }
            Some(EnvelopeSection::Inline(envelope)) => {
                if envelope.field.is_empty() || envelope.ok_codes.is_empty() {
                    return Err(invalid(
                        format!("devices.{}.envelope", section.id),
                        "inline envelope needs a field and at least one ok code",
                    ));
                }
                Some(envelope.clone())
            }
            None => None,
        };

        let request = RequestSpec {
            method: section.method,
            path: section.path.clone(),
            body: section.body.clone(),
            format: section.format,
            envelope,
        };

        Ok(DeviceConfig::new(
            DeviceIdentity::new(
                section.bridge.as_str(),
                section.id.as_str(),
                section.device_type.as_str(),
            ),
            section.interval.unwrap_or(self.defaults.interval),
            request,
        ))
    }

    pub fn device_configs(&self) -> Result<Vec<DeviceConfig>, ConfigError> {
        self.devices.iter().map(|d| self.device_config(d)).collect()
    }

    /// Check everything the engine would reject, plus cross references.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, section) in &self.bridges {
            self.translate_bridge(name, section, &env_lookup)?
                .validate()
                .map_err(|e| invalid(format!("bridges.{name}"), e.to_string()))?;
        }

        for (name, schema) in &self.device_types {
            if schema.fields.is_empty() {
                return Err(invalid(
                    format!("device_types.{name}"),
                    "at least one field is required",
                ));
            }
        }

        let registry = self.schema_registry();
        let mut seen = HashSet::new();
        for section in &self.devices {
            let field = format!("devices.{}", section.id);
            if !seen.insert(section.id.as_str()) {
                return Err(invalid(field, "duplicate device id"));
            }
            if !self.bridges.contains_key(&section.bridge) {
                return Err(invalid(
                    field,
                    format!("unknown bridge '{}'", section.bridge),
                ));
            }
            if !registry.contains(&DeviceType::from(section.device_type.as_str())) {
                return Err(invalid(
                    field,
                    format!("unknown device type '{}'", section.device_type),
                ));
            }
            self.device_config(section)?
                .validate()
                .map_err(|e| invalid(field, e.to_string()))?;
        }
        Ok(())
    }

    fn translate_bridge(
        &self,
        name: &str,
        section: &BridgeSection,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<BridgeConfig, ConfigError> {
        let base_url = Url::parse(&section.base_url).map_err(|e| {
            invalid(
                format!("bridges.{name}.base_url"),
                format!("invalid URL '{}': {e}", section.base_url),
            )
        })?;

        let auth = match section.auth {
            AuthMode::OAuth => {
                let token_url = require(name, "token_url", section.token_url.as_deref())?;
                let token_url = Url::parse(token_url).map_err(|e| {
                    invalid(
                        format!("bridges.{name}.token_url"),
                        format!("invalid URL '{token_url}': {e}"),
                    )
                })?;
                BridgeAuth::OAuth {
                    token_url,
                    client_id: require(name, "client_id", section.client_id.as_deref())?.into(),
                    client_secret: resolve_secret(
                        name,
                        "client_secret",
                        section.client_secret_env.as_deref(),
                        section.client_secret.as_deref(),
                        lookup,
                    )?,
                    username: require(name, "username", section.username.as_deref())?.into(),
                    password: require_secret(
                        name,
                        "password",
                        section.password_env.as_deref(),
                        section.password.as_deref(),
                        lookup,
                    )?,
                    scope: section.scope.clone(),
                }
            }
            AuthMode::Basic => BridgeAuth::Basic {
                username: require(name, "username", section.username.as_deref())?.into(),
                password: require_secret(
                    name,
                    "password",
                    section.password_env.as_deref(),
                    section.password.as_deref(),
                    lookup,
                )?,
            },
            AuthMode::Bearer => BridgeAuth::Bearer {
                token: require_secret(
                    name,
                    "token",
                    section.token_env.as_deref(),
                    section.token.as_deref(),
                    lookup,
                )?,
            },
        };

        let tls = if section.insecure.unwrap_or(self.defaults.insecure) {
            TlsMode::DangerAcceptInvalid
        } else if let Some(ref ca_path) = section.ca_cert {
            TlsMode::CustomCa(ca_path.clone())
        } else {
            TlsMode::System
        };
        let timeout = Duration::from_secs(section.timeout.unwrap_or(self.defaults.timeout));

        let mut bridge = BridgeConfig::new(name, base_url, auth);
        bridge.transport = TransportConfig::default()
            .with_timeout(timeout)
            .with_tls(tls);
        bridge.refresh = RefreshPolicy {
            margin: Duration::from_secs(self.defaults.refresh_margin),
            attempts: self.defaults.refresh_attempts,
            retry_delay: Duration::from_secs(self.defaults.refresh_retry_delay),
        };
        Ok(bridge)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Write;

    use bindery_api::StateMatch;
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    use super::*;

    const SAMPLE: &str = r#"
[defaults]
interval = 45

[bridges.lg]
base_url = "https://aic-service.lgthinq.com:46030/v1/service/"
auth = "oauth"
token_url = "https://kr.lgeapi.com/oauth/token"
client_id = "bindery"
username = "me@example.com"
password_env = "LG_PASSWORD"
password = "fallback"

[bridges.dvr]
base_url = "http://192.168.1.108/"
auth = "basic"
username = "admin"
password = "secret"
insecure = true
timeout = 5

[[devices]]
id = "a1b2"
bridge = "lg"
type = "air_conditioner"
interval = 30
path = "devices/{device}"
envelope = "lg"

[[devices]]
id = "1"
bridge = "dvr"
type = "dvr_channel"
path = "cgi-bin/snapshot.cgi?channel={device}"
format = "binary"

[[devices]]
id = "s1"
bridge = "dvr"
type = "my_sensor"
path = "sensors/{device}"
format = "key_value"

[device_types.my_sensor]
root = "data"
fields = [{ channel = "temperature", path = "temp", kind = "decimal", required = true }]
"#;

    fn write(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn sample() -> Config {
        let file = write(SAMPLE);
        load_config_from(file.path()).unwrap()
    }

    #[test]
    fn parses_and_translates() {
        let config = sample();
        config.validate().unwrap();

        let devices = config.device_configs().unwrap();
        assert_eq!(devices.len(), 3);
        assert_eq!(devices[0].interval_secs, 30);
        assert_eq!(devices[1].interval_secs, 45, "falls back to defaults");
        assert_eq!(devices[1].request.format, PayloadFormat::Binary);
        assert_eq!(devices[0].request.envelope, Some(ResultEnvelope::lg_thinq()));

        let dvr = config.bridge_config("dvr").unwrap();
        assert_eq!(dvr.transport.timeout, Duration::from_secs(5));
        assert!(matches!(dvr.transport.tls, TlsMode::DangerAcceptInvalid));
        assert_eq!(dvr.refresh.attempts, 2);
    }

    #[test]
    fn env_variable_wins_over_plaintext() {
        let config = sample();
        let section = &config.bridges["lg"];

        let from_env = config
            .translate_bridge("lg", section, &|name: &str| {
                (name == "LG_PASSWORD").then(|| "from-env".to_owned())
            })
            .unwrap();
        let BridgeAuth::OAuth { password, .. } = from_env.auth else {
            panic!("expected oauth");
        };
        assert_eq!(password.expose_secret(), "from-env");

        let fallback = config.translate_bridge("lg", section, &|_: &str| None).unwrap();
        let BridgeAuth::OAuth { password, .. } = fallback.auth else {
            panic!("expected oauth");
        };
        assert_eq!(password.expose_secret(), "fallback");
    }

    #[test]
    fn missing_env_without_plaintext_is_an_error() {
        let mut config = sample();
        config.bridges.get_mut("lg").unwrap().password = None;
        let section = config.bridges["lg"].clone();
        let err = config
            .translate_bridge("lg", &section, &|_: &str| None)
            .unwrap_err();
        assert!(matches!(err, ConfigError::NoCredentials { .. }));
        assert!(err.to_string().contains("LG_PASSWORD"));
    }

    #[test]
    fn custom_types_join_builtins() {
        let registry = sample().schema_registry();
        assert!(registry.contains(&"my_sensor".into()));
        assert!(registry.contains(&"washer".into()));
        let schema = registry.get(&"my_sensor".into()).unwrap();
        assert_eq!(schema.root.as_deref(), Some("data"));
        assert_eq!(schema.fields[0].paths, vec!["temp".to_owned()]);
    }

    #[test]
    fn explicit_missing_file_is_reported() {
        let err = load_config_from(Path::new("/nonexistent/bindery.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn unknown_auth_mode_fails_to_load() {
        let file = write(
            r#"
[bridges.x]
base_url = "http://example.com/"
auth = "digest"
"#,
        );
        assert!(matches!(
            load_config_from(file.path()),
            Err(ConfigError::Figment(_))
        ));
    }

    #[test]
    fn validation_catches_cross_references() {
        let mut config = sample();
        config.devices[0].bridge = "nope".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("unknown bridge 'nope'"));

        let mut config = sample();
        config.devices[0].interval = Some(-1);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("negative"));

        let mut config = sample();
        let duplicate = config.devices[0].clone();
        config.devices.push(duplicate);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate"));

        let mut config = sample();
        config.devices[0].envelope = Some(EnvelopeSection::Builtin("acme".into()));
        assert!(matches!(
            config.device_configs(),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn inline_and_v1_envelopes() {
        let extra = r#"
[[devices]]
id = "old-ac"
bridge = "lg"
type = "air_conditioner"
path = "rti/rtiMon"
method = "POST"
envelope = "lg_thinq_v1"

[[devices]]
id = "fridge"
bridge = "lg"
type = "fridge"
path = "devices/{device}"

[devices.envelope]
field = "meta.code"
ok_codes = ["OK"]
offline_codes = ["GONE"]
offline_state = { field = "meta.state", value = "D" }
"#;
        let file = write(&format!("{SAMPLE}{extra}"));
        let config = load_config_from(file.path()).unwrap();
        config.validate().unwrap();

        let old_ac = config.find_device("old-ac").unwrap();
        let request = config.device_config(old_ac).unwrap().request;
        assert_eq!(request.envelope, Some(ResultEnvelope::lg_thinq_v1()));

        let fridge = config.find_device("fridge").unwrap();
        let envelope = config.device_config(fridge).unwrap().request.envelope.unwrap();
        assert_eq!(envelope.field, "meta.code");
        assert_eq!(envelope.ok_codes, vec!["OK".to_owned()]);
        assert!(envelope.auth_codes.is_empty());
        assert_eq!(
            envelope.offline_state,
            Some(StateMatch {
                field: "meta.state".into(),
                value: "D".into(),
            })
        );
    }

    #[test]
    fn inline_envelope_without_ok_codes_rejected() {
        let mut config = sample();
        config.devices[0].envelope = Some(EnvelopeSection::Inline(ResultEnvelope {
            field: "rc".into(),
            ok_codes: vec![],
            auth_codes: vec![],
            offline_codes: vec![],
            message_field: None,
            offline_state: None,
        }));
        assert!(matches!(
            config.device_configs(),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn oauth_requires_token_url() {
        let mut config = sample();
        config.bridges.get_mut("lg").unwrap().token_url = None;
        let err = config.bridge_config("lg").unwrap_err();
        assert!(err.to_string().contains("token_url"));
    }
}
