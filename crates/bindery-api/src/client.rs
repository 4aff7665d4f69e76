// Device API client
//
// Issues authenticated requests against a bridge's vendor endpoint and
// turns the response into a `RawPayload`. Both the HTTP status and an
// optional embedded result code are checked; an auth rejection triggers
// exactly one invalidate-refresh-retry round.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::auth::Credential;
use crate::error::Error;
use crate::session::TokenRefresher;
use crate::transport::TransportConfig;

const DEVICE_PLACEHOLDER: &str = "{device}";

// ── Payloads ────────────────────────────────────────────────────────

/// Undecoded-but-parsed response body.
#[derive(Debug, Clone, PartialEq)]
pub enum RawPayload {
    Json(Value),
    /// `key=value` lines, as returned by DVR CGI endpoints.
    KeyValue(BTreeMap<String, String>),
    Binary { media_type: String, data: Bytes },
}

/// How to decode the response body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadFormat {
    #[default]
    Json,
    KeyValue,
    Binary,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

/// Result-code envelope embedded in a successful HTTP response.
///
/// Vendors like LG ThinQ answer HTTP 200 and put the real outcome in a
/// body field. Codes not listed anywhere are vendor errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    /// Key holding the result code (exact key, then dotted path).
    pub field: String,
    pub ok_codes: Vec<String>,
    #[serde(default)]
    pub auth_codes: Vec<String>,
    #[serde(default)]
    pub offline_codes: Vec<String>,
    /// Optional key with a human-readable message.
    #[serde(default)]
    pub message_field: Option<String>,
    /// Body field whose value marks the device offline when the result
    /// code is not ok.
    #[serde(default)]
    pub offline_state: Option<StateMatch>,
}

/// `field == value` test against the response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMatch {
    pub field: String,
    pub value: String,
}

impl StateMatch {
    fn matches(&self, payload: &RawPayload) -> bool {
        lookup_code(payload, &self.field).is_some_and(|v| v == self.value)
    }
}

impl ResultEnvelope {
    /// LG ThinQ `resultCode` conventions.
    pub fn lg_thinq() -> Self {
        Self {
            field: "resultCode".into(),
            ok_codes: vec!["0000".into(), "0001".into()],
            auth_codes: vec!["0102".into(), "0110".into()],
            offline_codes: vec!["0106".into()],
            message_field: Some("returnMsg".into()),
            offline_state: None,
        }
    }

    /// LG ThinQ V1 (`lgedmRoot` wrapper, `deviceState = "D"` when
    /// disconnected).
    pub fn lg_thinq_v1() -> Self {
        Self {
            field: "lgedmRoot.returnCd".into(),
            ok_codes: vec!["0000".into()],
            auth_codes: vec!["0102".into(), "0110".into()],
            offline_codes: vec!["0106".into()],
            message_field: Some("lgedmRoot.returnMsg".into()),
            offline_state: Some(StateMatch {
                field: "lgedmRoot.deviceState".into(),
                value: "D".into(),
            }),
        }
    }

    /// Look up a built-in envelope by name.
    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "lg" | "lg_thinq" => Some(Self::lg_thinq()),
            "lg_v1" | "lg_thinq_v1" => Some(Self::lg_thinq_v1()),
            _ => None,
        }
    }

    fn check(&self, device: &str, payload: &RawPayload) -> Result<(), Error> {
        if matches!(payload, RawPayload::Binary { .. }) {
            return Ok(());
        }
        let Some(code) = lookup_code(payload, &self.field) else {
            return Err(Error::Deserialization {
                message: format!("result code field '{}' missing", self.field),
                body: String::new(),
            });
        };

        if self.ok_codes.contains(&code) {
            Ok(())
        } else if self.auth_codes.contains(&code) {
            debug!(device, %code, "auth result code");
            Err(Error::SessionExpired)
        } else if self.offline_codes.contains(&code)
            || self.offline_state.as_ref().is_some_and(|s| s.matches(payload))
        {
            Err(Error::DeviceOffline {
                device: device.to_owned(),
                code,
            })
        } else {
            let message = self
                .message_field
                .as_deref()
                .and_then(|f| lookup_code(payload, f))
                .unwrap_or_default();
            Err(Error::Vendor { code, message })
        }
    }
}

fn lookup_code(payload: &RawPayload, key: &str) -> Option<String> {
    match payload {
        RawPayload::Json(value) => lookup_json(value, key).and_then(code_text),
        RawPayload::KeyValue(map) => map.get(key).cloned(),
        RawPayload::Binary { .. } => None,
    }
}

fn lookup_json<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    if let Some(found) = value.get(key) {
        return Some(found);
    }
    key.split('.').try_fold(value, |v, part| v.get(part))
}

fn code_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse `key=value` lines. Blank lines are skipped; any other line
/// without `=` makes the body malformed.
pub fn parse_key_value(body: &str) -> Result<BTreeMap<String, String>, Error> {
    let mut map = BTreeMap::new();
    for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let Some((key, value)) = line.split_once('=') else {
            return Err(Error::Deserialization {
                message: format!("expected key=value, got '{line}'"),
                body: body.to_owned(),
            });
        };
        map.insert(key.trim().to_owned(), value.trim().to_owned());
    }
    if map.is_empty() {
        return Err(Error::Deserialization {
            message: "empty key=value body".into(),
            body: body.to_owned(),
        });
    }
    Ok(map)
}

// ── RequestSpec ─────────────────────────────────────────────────────

/// Description of one device state request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RequestSpec {
    pub method: HttpMethod,
    /// Relative to the bridge base URL; `{device}` is replaced by the
    /// device id. A leading `/` replaces the base URL's path.
    pub path: String,
    pub body: Option<Value>,
    pub format: PayloadFormat,
    pub envelope: Option<ResultEnvelope>,
}

impl RequestSpec {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            path: path.into(),
            body: Some(body),
            ..Self::default()
        }
    }

    pub fn with_format(mut self, format: PayloadFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_envelope(mut self, envelope: ResultEnvelope) -> Self {
        self.envelope = Some(envelope);
        self
    }

    pub fn render_path(&self, device_id: &str) -> String {
        self.path.replace(DEVICE_PLACEHOLDER, device_id)
    }
}

// ── DeviceApi ───────────────────────────────────────────────────────

/// Capability the poll engine consumes to fetch device state.
#[async_trait]
pub trait DeviceApi: Send + Sync {
    async fn fetch(&self, device_id: &str, request: &RequestSpec) -> Result<RawPayload, Error>;
}

/// reqwest-backed [`DeviceApi`] bound to one bridge.
pub struct HttpDeviceClient {
    http: reqwest::Client,
    transport: TransportConfig,
    base_url: Url,
    bridge: String,
    refresher: Arc<TokenRefresher>,
}

impl HttpDeviceClient {
    pub fn new(
        bridge: impl Into<String>,
        base_url: Url,
        refresher: Arc<TokenRefresher>,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
            transport: transport.clone(),
            base_url,
            bridge: bridge.into(),
            refresher,
        })
    }

    pub fn bridge(&self) -> &str {
        &self.bridge
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn attempt(
        &self,
        device_id: &str,
        request: &RequestSpec,
        credential: &Credential,
    ) -> Result<RawPayload, Error> {
        let url = self.base_url.join(&request.render_path(device_id))?;

        debug!(bridge = %self.bridge, device = device_id, %url, "fetching device state");

        let builder = match request.method {
            HttpMethod::Get => self.http.get(url),
            HttpMethod::Post => self.http.post(url),
        };
        let builder = builder.header(AUTHORIZATION, credential.authorization());
        let builder = match &request.body {
            Some(body) => builder.json(body),
            None => builder,
        };

        let resp = builder
            .send()
            .await
            .map_err(|e| self.transport.map_send_error(e))?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(Error::SessionExpired);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Http {
                status: status.as_u16(),
                body,
            });
        }

        let payload = self.decode(resp, request.format).await?;
        if let Some(envelope) = &request.envelope {
            envelope.check(device_id, &payload)?;
        }
        Ok(payload)
    }

    async fn decode(
        &self,
        resp: reqwest::Response,
        format: PayloadFormat,
    ) -> Result<RawPayload, Error> {
        match format {
            PayloadFormat::Json => {
                let body = resp
                    .text()
                    .await
                    .map_err(|e| self.transport.map_send_error(e))?;
                serde_json::from_str(&body)
                    .map(RawPayload::Json)
                    .map_err(|e| Error::Deserialization {
                        message: e.to_string(),
                        body,
                    })
            }
            PayloadFormat::KeyValue => {
                let body = resp
                    .text()
                    .await
                    .map_err(|e| self.transport.map_send_error(e))?;
                parse_key_value(&body).map(RawPayload::KeyValue)
            }
            PayloadFormat::Binary => {
                let media_type = resp
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("application/octet-stream")
                    .to_owned();
                let data = resp
                    .bytes()
                    .await
                    .map_err(|e| self.transport.map_send_error(e))?;
                Ok(RawPayload::Binary { media_type, data })
            }
        }
    }
}

#[async_trait]
impl DeviceApi for HttpDeviceClient {
    async fn fetch(&self, device_id: &str, request: &RequestSpec) -> Result<RawPayload, Error> {
        let credential = self.refresher.get_valid_token(&self.bridge).await?;
        match self.attempt(device_id, request, &credential).await {
            Err(e) if e.is_auth_rejection() => {
                debug!(bridge = %self.bridge, device = device_id, "auth rejected, refreshing once");
                self.refresher.invalidate_if(&self.bridge, &credential);
                let credential = self.refresher.get_valid_token(&self.bridge).await?;
                match self.attempt(device_id, request, &credential).await {
                    Err(e) if e.is_auth_rejection() => Err(Error::Authentication {
                        message: "credentials rejected after refresh".into(),
                    }),
                    other => other,
                }
            }
            other => other,
        }
    }
}
