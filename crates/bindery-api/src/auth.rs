// Credential types and token sources
//
// A `TokenSource` knows how to obtain a fresh credential for one bridge.
// It never caches: the `TokenRefresher` in `session` owns the cached
// credential and decides when a source is called.

use std::fmt;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, TimeDelta, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

// ── Credential ──────────────────────────────────────────────────────

/// An access credential for one bridge.
#[derive(Clone)]
pub struct Credential {
    pub access_token: SecretString,
    /// Authorization scheme, e.g. `Bearer` or `Basic`.
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
    pub refresh_token: Option<SecretString>,
}

impl Credential {
    /// A credential that never expires (HTTP Basic, static API keys).
    pub fn non_expiring(token_type: impl Into<String>, access_token: SecretString) -> Self {
        Self {
            access_token,
            token_type: token_type.into(),
            expires_at: DateTime::<Utc>::MAX_UTC,
            refresh_token: None,
        }
    }

    /// Value for the `Authorization` header.
    pub fn authorization(&self) -> String {
        format!("{} {}", self.token_type, self.access_token.expose_secret())
    }

    /// Whether this credential expires within `margin` of `now`.
    pub fn expires_within(&self, margin: TimeDelta, now: DateTime<Utc>) -> bool {
        expires_within(self.expires_at, margin, now)
    }

    /// Whether both credentials carry the same access token.
    pub fn same_token(&self, other: &Credential) -> bool {
        self.token_type == other.token_type
            && self.access_token.expose_secret() == other.access_token.expose_secret()
    }
}

pub(crate) fn expires_within(
    expires_at: DateTime<Utc>,
    margin: TimeDelta,
    now: DateTime<Utc>,
) -> bool {
    match now.checked_add_signed(margin) {
        Some(deadline) => expires_at <= deadline,
        None => false,
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .finish_non_exhaustive()
    }
}

/// OAuth token endpoint response.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Lifetime in seconds.
    pub expires_in: i64,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".into()
}

impl TokenResponse {
    /// Convert to a credential, anchoring the lifetime at `received_at`.
    pub fn into_credential(self, received_at: DateTime<Utc>) -> Credential {
        let lifetime = TimeDelta::try_seconds(self.expires_in.max(0)).unwrap_or(TimeDelta::MAX);
        Credential {
            access_token: SecretString::from(self.access_token),
            token_type: self.token_type,
            expires_at: received_at
                .checked_add_signed(lifetime)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            refresh_token: self.refresh_token.map(SecretString::from),
        }
    }
}

// ── TokenSource ─────────────────────────────────────────────────────

/// Something that can mint a credential for a bridge.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Obtain a credential. `refresh_token` is the one held from the
    /// previous credential, if any.
    ///
    /// Rejections must surface as [`Error::Authentication`]; anything
    /// retryable should classify as transient.
    async fn fetch_token(&self, refresh_token: Option<&SecretString>) -> Result<Credential, Error>;
}

// ── OAuth ───────────────────────────────────────────────────────────

/// Username/password OAuth flow with refresh-token grant.
pub struct OAuthTokenSource {
    http: reqwest::Client,
    transport: TransportConfig,
    token_url: Url,
    client_id: String,
    client_secret: Option<SecretString>,
    username: String,
    password: SecretString,
    scope: Option<String>,
}

impl OAuthTokenSource {
    pub fn new(
        token_url: Url,
        client_id: impl Into<String>,
        username: impl Into<String>,
        password: SecretString,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
            transport: transport.clone(),
            token_url,
            client_id: client_id.into(),
            client_secret: None,
            username: username.into(),
            password,
            scope: None,
        })
    }

    pub fn with_client_secret(mut self, secret: SecretString) -> Self {
        self.client_secret = Some(secret);
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    async fn request(&self, grant: Grant<'_>) -> Result<Credential, Error> {
        let mut form: Vec<(&str, &str)> = vec![("client_id", self.client_id.as_str())];
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.expose_secret()));
        }
        if let Some(scope) = &self.scope {
            form.push(("scope", scope.as_str()));
        }
        match grant {
            Grant::Password => {
                form.push(("grant_type", "password"));
                form.push(("username", self.username.as_str()));
                form.push(("password", self.password.expose_secret()));
            }
            Grant::Refresh(token) => {
                form.push(("grant_type", "refresh_token"));
                form.push(("refresh_token", token.expose_secret()));
            }
        }

        debug!(url = %self.token_url, grant = grant.name(), "requesting token");

        let resp = self
            .http
            .post(self.token_url.clone())
            .form(&form)
            .send()
            .await
            .map_err(|e| self.transport.map_send_error(e))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| self.transport.map_send_error(e))?;

        if !status.is_success() {
            let code = status.as_u16();
            return Err(match code {
                408 | 429 | 500..=599 => Error::Http { status: code, body },
                _ => Error::Authentication {
                    message: format!("token request rejected (HTTP {status}): {body}"),
                },
            });
        }

        let token: TokenResponse =
            serde_json::from_str(&body).map_err(|e| Error::Deserialization {
                message: format!("token response: {e}"),
                body: body.clone(),
            })?;

        let mut credential = token.into_credential(Utc::now());
        // Some endpoints omit the refresh token on a refresh grant; keep
        // using the one we already have.
        if credential.refresh_token.is_none() {
            if let Grant::Refresh(token) = grant {
                credential.refresh_token = Some(token.clone());
            }
        }
        Ok(credential)
    }
}

#[derive(Clone, Copy)]
enum Grant<'a> {
    Password,
    Refresh(&'a SecretString),
}

impl Grant<'_> {
    fn name(self) -> &'static str {
        match self {
            Self::Password => "password",
            Self::Refresh(_) => "refresh_token",
        }
    }
}

#[async_trait]
impl TokenSource for OAuthTokenSource {
    async fn fetch_token(&self, refresh_token: Option<&SecretString>) -> Result<Credential, Error> {
        let Some(token) = refresh_token else {
            return self.request(Grant::Password).await;
        };
        match self.request(Grant::Refresh(token)).await {
            Err(Error::Authentication { message }) => {
                debug!(%message, "refresh grant rejected, falling back to password grant");
                self.request(Grant::Password).await
            }
            other => other,
        }
    }
}

// ── Static (HTTP Basic) ─────────────────────────────────────────────

/// Fixed credential for LAN devices using HTTP Basic auth.
pub struct StaticTokenSource {
    credential: Credential,
}

impl StaticTokenSource {
    /// HTTP Basic credential from username and password.
    pub fn basic(username: &str, password: &SecretString) -> Self {
        let encoded = BASE64.encode(format!("{username}:{}", password.expose_secret()));
        Self {
            credential: Credential::non_expiring("Basic", SecretString::from(encoded)),
        }
    }

    /// Pre-issued bearer token (long-lived API keys).
    pub fn bearer(token: SecretString) -> Self {
        Self {
            credential: Credential::non_expiring("Bearer", token),
        }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn fetch_token(&self, _refresh_token: Option<&SecretString>) -> Result<Credential, Error> {
        Ok(self.credential.clone())
    }
}
