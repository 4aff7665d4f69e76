#![allow(clippy::unwrap_used)]
// Integration tests for `HttpDeviceClient` and the token refresher using wiremock.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use url::Url;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use bindery_api::{
    DeviceApi, Error, FailureKind, HttpDeviceClient, OAuthTokenSource, PayloadFormat, RawPayload,
    RefreshPolicy, RequestSpec, ResultEnvelope, StaticTokenSource, TokenRefresher,
    TransportConfig,
};

// ── Helpers ─────────────────────────────────────────────────────────

fn transport() -> TransportConfig {
    TransportConfig::default().with_timeout(Duration::from_secs(5))
}

fn policy() -> RefreshPolicy {
    RefreshPolicy {
        retry_delay: Duration::from_millis(10),
        ..RefreshPolicy::default()
    }
}

fn token_body(access: &str) -> serde_json::Value {
    json!({
        "access_token": access,
        "token_type": "Bearer",
        "expires_in": 3600,
        "refresh_token": "refresh-1"
    })
}

async fn oauth_client(server: &MockServer) -> HttpDeviceClient {
    let token_url = Url::parse(&format!("{}/oauth/token", server.uri())).unwrap();
    let source = OAuthTokenSource::new(
        token_url,
        "bindery-test",
        "user@example.com",
        "pw".to_string().into(),
        &transport(),
    )
    .unwrap();

    let refresher = Arc::new(TokenRefresher::default());
    refresher.register("lg", Arc::new(source), policy());

    let base = Url::parse(&format!("{}/v1/", server.uri())).unwrap();
    HttpDeviceClient::new("lg", base, refresher, &transport()).unwrap()
}

async fn mount_password_grant(server: &MockServer, access: &str, times: u64) {
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=password"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body(access)))
        .expect(times)
        .mount(server)
        .await;
}

fn device_spec() -> RequestSpec {
    RequestSpec::get("devices/{device}")
}

// ── Token lifecycle ─────────────────────────────────────────────────

#[tokio::test]
async fn test_fetch_attaches_bearer_token() {
    let server = MockServer::start().await;
    mount_password_grant(&server, "tok-a", 1).await;

    Mock::given(method("GET"))
        .and(path("/v1/devices/ac1"))
        .and(header("authorization", "Bearer tok-a"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"temp": 21})))
        .expect(2)
        .mount(&server)
        .await;

    let client = oauth_client(&server).await;
    let first = client.fetch("ac1", &device_spec()).await.unwrap();
    client.fetch("ac1", &device_spec()).await.unwrap();

    assert_eq!(first, RawPayload::Json(json!({"temp": 21})));
}

#[tokio::test]
async fn test_concurrent_fetches_issue_single_token_request() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_body("tok-a"))
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(2)
        .mount(&server)
        .await;

    let client = oauth_client(&server).await;
    let spec = device_spec();
    let (a, b) = tokio::join!(client.fetch("ac1", &spec), client.fetch("ac2", &spec));
    a.unwrap();
    b.unwrap();
}

#[tokio::test]
async fn test_401_refreshes_and_retries_once() {
    let server = MockServer::start().await;
    mount_password_grant(&server, "tok-a", 1).await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=refresh-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("tok-b")))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/devices/ac1"))
        .and(header("authorization", "Bearer tok-a"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/devices/ac1"))
        .and(header("authorization", "Bearer tok-b"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let client = oauth_client(&server).await;
    let payload = client.fetch("ac1", &device_spec()).await.unwrap();
    assert_eq!(payload, RawPayload::Json(json!({"ok": true})));
}

#[tokio::test]
async fn test_late_401_keeps_newer_credential() {
    let server = MockServer::start().await;
    mount_password_grant(&server, "tok-1", 1).await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("tok-2")))
        .expect(1)
        .mount(&server)
        .await;

    // ac1 rejects tok-1 at once; ac2 rejects it after ac1 has refreshed
    Mock::given(method("GET"))
        .and(path("/v1/devices/ac1"))
        .and(header("authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/devices/ac2"))
        .and(header("authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(401).set_delay(Duration::from_millis(400)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(header("authorization", "Bearer tok-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(2)
        .mount(&server)
        .await;

    let client = oauth_client(&server).await;
    let spec = device_spec();
    let (a, b) = tokio::join!(client.fetch("ac1", &spec), client.fetch("ac2", &spec));
    a.unwrap();
    b.unwrap();

    let token_requests = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/oauth/token")
        .count();
    assert_eq!(token_requests, 2);
}

#[tokio::test]
async fn test_persistent_401_surfaces_as_auth() {
    let server = MockServer::start().await;
    mount_password_grant(&server, "tok-a", 1).await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("tok-b")))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/devices/ac1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    let client = oauth_client(&server).await;
    let err = client.fetch("ac1", &device_spec()).await.unwrap_err();
    assert!(
        matches!(err, Error::Authentication { .. }),
        "expected Authentication error, got: {err:?}"
    );
    assert_eq!(err.kind(), FailureKind::Auth);
}

#[tokio::test]
async fn test_rejected_credentials_never_reach_device() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid_grant"))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = oauth_client(&server).await;
    let err = client.fetch("ac1", &device_spec()).await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::Auth);
}

#[tokio::test]
async fn test_token_endpoint_5xx_is_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    mount_password_grant(&server, "tok-a", 1).await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let client = oauth_client(&server).await;
    client.fetch("ac1", &device_spec()).await.unwrap();
}

// ── Result-code envelope ────────────────────────────────────────────

#[tokio::test]
async fn test_embedded_auth_code_behaves_like_401() {
    let server = MockServer::start().await;
    mount_password_grant(&server, "tok-a", 1).await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("tok-b")))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(header("authorization", "Bearer tok-a"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"resultCode": "0102"})))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(header("authorization", "Bearer tok-b"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resultCode": "0000",
            "result": {"airState.operation": 1}
        })))
        .mount(&server)
        .await;

    let client = oauth_client(&server).await;
    let spec = device_spec().with_envelope(ResultEnvelope::lg_thinq());
    client.fetch("ac1", &spec).await.unwrap();
}

#[tokio::test]
async fn test_device_not_responding_code() {
    let server = MockServer::start().await;
    mount_password_grant(&server, "tok-a", 1).await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"resultCode": "0106"})))
        .mount(&server)
        .await;

    let client = oauth_client(&server).await;
    let spec = device_spec().with_envelope(ResultEnvelope::lg_thinq());
    let err = client.fetch("ac1", &spec).await.unwrap_err();
    assert!(matches!(err, Error::DeviceOffline { .. }));
    assert_eq!(err.kind(), FailureKind::Offline);
}

// ── Failure classification ──────────────────────────────────────────

#[tokio::test]
async fn test_status_classification() {
    let server = MockServer::start().await;
    mount_password_grant(&server, "tok-a", 1).await;

    Mock::given(method("GET"))
        .and(path("/v1/devices/busy"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/devices/gone"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such device"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/devices/garbled"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
        .mount(&server)
        .await;

    let client = oauth_client(&server).await;
    let spec = device_spec();

    let busy = client.fetch("busy", &spec).await.unwrap_err();
    assert_eq!(busy.kind(), FailureKind::Transient);

    let gone = client.fetch("gone", &spec).await.unwrap_err();
    assert_eq!(gone.kind(), FailureKind::Permanent);
    assert_eq!(gone.status(), Some(404));

    let garbled = client.fetch("garbled", &spec).await.unwrap_err();
    assert_eq!(garbled.kind(), FailureKind::Malformed);
}

#[tokio::test]
async fn test_unreachable_host_is_transient() {
    // nothing listens on the discard port
    let base = Url::parse("http://127.0.0.1:9/").unwrap();

    let refresher = Arc::new(TokenRefresher::default());
    refresher.register(
        "dvr",
        Arc::new(StaticTokenSource::basic("admin", &"pw".to_string().into())),
        policy(),
    );
    let client = HttpDeviceClient::new("dvr", base, refresher, &transport()).unwrap();

    let err = client.fetch("1", &device_spec()).await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::Transient);
}

// ── Local devices (HTTP Basic) ──────────────────────────────────────

async fn basic_client(server: &MockServer) -> HttpDeviceClient {
    let refresher = Arc::new(TokenRefresher::default());
    refresher.register(
        "dvr",
        Arc::new(StaticTokenSource::basic("admin", &"secret".to_string().into())),
        policy(),
    );
    let base = Url::parse(&format!("{}/", server.uri())).unwrap();
    HttpDeviceClient::new("dvr", base, refresher, &transport()).unwrap()
}

#[tokio::test]
async fn test_basic_auth_key_value_body() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/cgi-bin/configManager.cgi"))
        .and(header("authorization", "Basic YWRtaW46c2VjcmV0"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("table.Channel[2].Name=Garage\ntable.Channel[2].Enable=true\n"),
        )
        .mount(&server)
        .await;

    let client = basic_client(&server).await;
    let spec = RequestSpec::get("cgi-bin/configManager.cgi?action=getConfig&channel={device}")
        .with_format(PayloadFormat::KeyValue);

    let RawPayload::KeyValue(map) = client.fetch("2", &spec).await.unwrap() else {
        panic!("expected key=value payload");
    };
    assert_eq!(map["table.Channel[2].Name"], "Garage");
}

#[tokio::test]
async fn test_binary_snapshot() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/cgi-bin/snapshot.cgi"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(vec![0xFF, 0xD8, 0xFF], "image/jpeg"))
        .mount(&server)
        .await;

    let client = basic_client(&server).await;
    let spec = RequestSpec::get("cgi-bin/snapshot.cgi?channel={device}")
        .with_format(PayloadFormat::Binary);

    match client.fetch("1", &spec).await.unwrap() {
        RawPayload::Binary { media_type, data } => {
            assert_eq!(media_type, "image/jpeg");
            assert_eq!(&data[..], &[0xFF_u8, 0xD8, 0xFF]);
        }
        other => panic!("expected binary payload, got {other:?}"),
    }
}
