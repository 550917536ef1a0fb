//! Integration tests for the flow engine: refresh, token exchange,
//! persistence, and cancellation against a live mock server.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use authflow::testing::{MemoryTokenStore, MockPerformer};
use authflow::{
    ClientConfig, Error, FlowEngine, HttpPerformer, RequestParams, TokenState, TokenStore,
};

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("authflow=debug"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
}

fn config_for(server: &MockServer) -> ClientConfig {
    init_tracing();
    let mut config = ClientConfig::new(
        format!("{}/authorize", server.uri()),
        format!("{}/token", server.uri()),
    );
    config.client_id = Some("integration-client".to_string());
    config
}

fn http_engine(config: ClientConfig) -> FlowEngine {
    FlowEngine::new(config, Arc::new(HttpPerformer::new()))
}

/// Validates `FlowEngine::do_refresh_token` behavior for the live HTTP
/// scenario.
///
/// Assertions:
/// - Ensures the refresh token and grant type travel in the form body.
/// - Ensures the rotated pair replaces the held one.
#[tokio::test]
async fn test_refresh_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=old-refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "new-access",
            "refresh_token": "new-refresh",
            "token_type": "bearer",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = config_for(&server);
    config.refresh_token = Some("old-refresh".to_string());
    let engine = http_engine(config);

    engine.do_refresh_token(&RequestParams::new()).await.expect("refresh should succeed");

    let config = engine.config().await;
    assert_eq!(config.access_token.as_deref(), Some("new-access"));
    assert_eq!(config.refresh_token.as_deref(), Some("new-refresh"));
    assert!(config.has_unexpired_access_token());
}

/// Validates `FlowEngine::do_refresh_token` behavior for the live rejection
/// scenario.
///
/// Assertions:
/// - Ensures a 400 `invalid_grant` clears the held refresh token.
/// - Ensures the subsequent refresh short-circuits with `NoRefreshToken`.
#[tokio::test]
async fn test_refresh_rejection_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "refresh token revoked"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = config_for(&server);
    config.refresh_token = Some("revoked".to_string());
    let engine = http_engine(config);

    let err = engine.do_refresh_token(&RequestParams::new()).await.expect_err("must fail");
    assert_eq!(err.to_string(), "refresh token revoked");
    assert!(engine.config().await.refresh_token.is_none());

    assert!(matches!(
        engine.do_refresh_token(&RequestParams::new()).await,
        Err(Error::NoRefreshToken)
    ));
}

/// Validates refresh-token rotation mutual exclusion for the concurrent
/// exchange scenario.
///
/// Assertions:
/// - Ensures three concurrent exchanges each observe the refresh token the
///   previous one rotated in, proving the operations never interleaved.
#[tokio::test]
async fn test_concurrent_exchanges_serialize() {
    let performer = Arc::new(MockPerformer::new());
    for i in 2..=4 {
        performer.push_json(
            200,
            &json!({ "access_token": format!("exchanged-{i}"), "refresh_token": format!("r{i}") }),
        );
    }

    let mut config = ClientConfig::new("https://a.example/auth", "https://a.example/token");
    config.client_id = Some("client".to_string());
    config.refresh_token = Some("r1".to_string());
    let engine = Arc::new(FlowEngine::new(config, performer.clone()));

    let mut handles = Vec::new();
    for _ in 0..3 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.do_exchange_refresh_token("audience", None, &RequestParams::new()).await
        }));
    }
    for handle in handles {
        handle.await.expect("task").expect("exchange should succeed");
    }

    let subjects: Vec<_> = performer
        .requests()
        .iter()
        .map(|r| r.params().get("subject_token").unwrap_or_default().to_string())
        .collect();
    assert_eq!(subjects, vec!["r1", "r2", "r3"]);
    assert_eq!(engine.config().await.refresh_token.as_deref(), Some("r4"));
}

/// Validates `FlowEngine::initialize` and persistence behavior for the
/// store-backed scenario.
///
/// Assertions:
/// - Ensures persisted tokens are restored at startup.
/// - Ensures a successful refresh writes the rotated pair to the store.
/// - Ensures `forget_tokens` clears both config and store.
#[tokio::test]
async fn test_store_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fresh",
            "refresh_token": "rotated",
            "token_type": "bearer",
            "expires_in": 60
        })))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryTokenStore::new());
    store
        .store_tokens(&TokenState {
            access_token: None,
            refresh_token: Some("persisted".to_string()),
            id_token: None,
            access_token_expiry: None,
        })
        .await
        .expect("seed store");

    let engine = FlowEngine::new(config_for(&server), Arc::new(HttpPerformer::new()))
        .with_store(store.clone());

    assert!(engine.initialize().await.expect("initialize"));
    assert_eq!(engine.config().await.refresh_token.as_deref(), Some("persisted"));

    engine.do_refresh_token(&RequestParams::new()).await.expect("refresh");
    let stored = store.stored().expect("store written");
    assert_eq!(stored.refresh_token.as_deref(), Some("rotated"));
    assert_eq!(stored.access_token.as_deref(), Some("fresh"));

    engine.forget_tokens().await;
    assert!(store.stored().is_none());
    assert!(engine.config().await.access_token.is_none());
}

/// Validates `FlowEngine::abort_authorization` behavior for the in-flight
/// request scenario.
///
/// Assertions:
/// - Ensures a slow request is cut short with `RequestCancelled` instead of
///   running to completion.
#[tokio::test]
async fn test_abort_in_flight_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(30))
                .set_body_json(json!({ "access_token": "late", "token_type": "bearer" })),
        )
        .mount(&server)
        .await;

    let mut config = config_for(&server);
    config.refresh_token = Some("r".to_string());
    let engine = Arc::new(http_engine(config));

    let refreshing = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.do_refresh_token(&RequestParams::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    engine.abort_authorization();

    let outcome = refreshing.await.expect("task");
    assert!(matches!(outcome, Err(Error::RequestCancelled)));
}

/// Validates token exchange behavior for the live resource-scoped scenario.
///
/// Assertions:
/// - Ensures the RFC 8693 subject/requested token types and the configured
///   resource indicators travel in the form body.
#[tokio::test]
async fn test_resource_exchange_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Atoken-exchange"))
        .and(body_string_contains("subject_token_type=urn%3Aietf%3Aparams%3Aoauth%3Atoken-type%3Aaccess_token"))
        .and(body_string_contains("resource=https%3A%2F%2Fapi.one.example"))
        .and(body_string_contains("resource=https%3A%2F%2Fapi.two.example"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "scoped",
            "issued_token_type": "urn:ietf:params:oauth:token-type:access_token",
            "token_type": "bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = config_for(&server);
    config.access_token = Some("broad".to_string());
    config.resource_uris =
        vec!["https://api.one.example".to_string(), "https://api.two.example".to_string()];
    let engine = http_engine(config);

    let scoped = engine
        .do_exchange_access_token_for_resource(&RequestParams::new())
        .await
        .expect("exchange should succeed");
    assert_eq!(scoped, "scoped");
    // The engine's own token is untouched by a resource-scoped exchange.
    assert_eq!(engine.config().await.access_token.as_deref(), Some("broad"));
}
