//! Integration tests for the RFC 8628 device grant against a live mock
//! server: polling cadence, terminal outcomes, and cancellation.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::oneshot;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use authflow::{
    ClientConfig, DeviceFlow, Error, FlowEngine, HttpPerformer, RequestParams, Result, TokenJson,
};

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("authflow=debug"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
}

fn device_config(server: &MockServer) -> ClientConfig {
    init_tracing();
    let mut config = ClientConfig::new(
        format!("{}/authorize", server.uri()),
        format!("{}/token", server.uri()),
    );
    config.client_id = Some("device-client".to_string());
    config.device_authorize_url = Some(format!("{}/device", server.uri()));
    config
}

fn completion_channel(engine: &FlowEngine) -> oneshot::Receiver<Result<TokenJson>> {
    let (tx, rx) = oneshot::channel();
    let tx = parking_lot::Mutex::new(Some(tx));
    engine.set_completion_handler(Box::new(move |json, error| {
        if let Some(tx) = tx.lock().take() {
            let outcome = match (json, error) {
                (Some(json), _) => Ok(json.clone()),
                (_, Some(error)) => Err(error.clone()),
                (None, None) => Err(Error::NoDataInResponse),
            };
            let _ = tx.send(outcome);
        }
    }));
    rx
}

async fn mount_device_authorization(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/device"))
        .and(body_string_contains("client_id=device-client"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "device_code": "dev-code",
            "user_code": "WDJB-MJHT",
            "verification_uri": format!("{}/activate", server.uri()),
            "verification_uri_complete": format!("{}/activate?user_code=WDJB-MJHT", server.uri()),
            "expires_in": 300,
            "interval": 1
        })))
        .expect(1)
        .mount(server)
        .await;
}

/// Validates `DeviceFlow` behavior for the live pending-then-approved
/// scenario.
///
/// Assertions:
/// - Ensures the user code and verification URIs are surfaced to the caller.
/// - Ensures exactly two pending polls precede the successful one.
/// - Ensures the completion handler delivers the token response.
#[tokio::test]
async fn test_device_flow_over_http() {
    let server = MockServer::start().await;
    mount_device_authorization(&server).await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("device_code=dev-code"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "authorization_pending"
        })))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Adevice_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "device-access",
            "refresh_token": "device-refresh",
            "token_type": "bearer",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;

    let engine = Arc::new(FlowEngine::new(device_config(&server), Arc::new(HttpPerformer::new())));
    let completed = completion_channel(&engine);
    let flow = DeviceFlow::new(engine.clone());

    let auth = flow.start(&RequestParams::new()).await.expect("device authorization");
    assert_eq!(auth.user_code, "WDJB-MJHT");
    assert!(auth.verification_uri_complete.as_deref().is_some_and(|u| u.contains("WDJB-MJHT")));

    let json = tokio::time::timeout(Duration::from_secs(30), completed)
        .await
        .expect("polling must finish")
        .expect("handler fired")
        .expect("approved");
    assert_eq!(json.get("access_token").and_then(|v| v.as_str()), Some("device-access"));

    let config = engine.config().await;
    assert_eq!(config.access_token.as_deref(), Some("device-access"));
    assert_eq!(config.refresh_token.as_deref(), Some("device-refresh"));
    assert!(!engine.is_authorizing());
}

/// Validates `DeviceFlow` behavior for the live denial scenario.
///
/// Assertions:
/// - Ensures `access_denied` stops polling and reaches the completion
///   handler as `AccessDenied`.
#[tokio::test]
async fn test_device_denial_over_http() {
    let server = MockServer::start().await;
    mount_device_authorization(&server).await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "access_denied",
            "error_description": "user declined"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let engine = Arc::new(FlowEngine::new(device_config(&server), Arc::new(HttpPerformer::new())));
    let completed = completion_channel(&engine);
    let flow = DeviceFlow::new(engine.clone());

    flow.start(&RequestParams::new()).await.expect("device authorization");
    let outcome = tokio::time::timeout(Duration::from_secs(30), completed)
        .await
        .expect("polling must finish")
        .expect("handler fired");
    assert!(matches!(outcome, Err(Error::AccessDenied(Some(_)))));
    assert!(!engine.is_authorizing());
    assert!(engine.config().await.access_token.is_none());
}

/// Validates `DeviceFlow::cancel_polling` behavior for the live scenario.
///
/// Assertions:
/// - Ensures cancellation stops the poller and reports `RequestCancelled`.
/// - Ensures a new attempt can start afterwards.
#[tokio::test]
async fn test_device_cancel_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/device"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "device_code": "dev-code",
            "user_code": "WDJB-MJHT",
            "verification_uri": format!("{}/activate", server.uri()),
            "expires_in": 300,
            "interval": 5
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "authorization_pending"
        })))
        .mount(&server)
        .await;

    let engine = Arc::new(FlowEngine::new(device_config(&server), Arc::new(HttpPerformer::new())));
    let completed = completion_channel(&engine);
    let flow = DeviceFlow::new(engine.clone());

    flow.start(&RequestParams::new()).await.expect("device authorization");
    flow.cancel_polling();

    let outcome = completed.await.expect("handler fired");
    assert!(matches!(outcome, Err(Error::RequestCancelled)));
    assert!(!engine.is_authorizing());

    flow.start(&RequestParams::new()).await.expect("second attempt starts");
    flow.cancel_polling();
}
