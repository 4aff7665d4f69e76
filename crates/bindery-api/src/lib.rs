// bindery-api: authenticated HTTP access to home-automation vendor APIs
//
// Token lifecycle (sources, store, single-flight refresher) and the
// device client the poll engine consumes.

pub mod auth;
pub mod client;
pub mod error;
pub mod session;
pub mod transport;

pub use auth::{Credential, OAuthTokenSource, StaticTokenSource, TokenResponse, TokenSource};
pub use client::{
    DeviceApi, HttpDeviceClient, HttpMethod, PayloadFormat, RawPayload, RequestSpec,
    ResultEnvelope, StateMatch,
};
pub use error::{Error, FailureKind};
pub use session::{CredentialStore, RefreshPolicy, TokenRefresher};
pub use transport::{TlsMode, TransportConfig};
