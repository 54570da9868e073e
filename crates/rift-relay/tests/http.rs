#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;

use rift_proto::{NotificationKind, Platform};
use rift_relay::auth::TokenKind;
use rift_relay::notifications::{NotificationError, PushGateway, PushMessage};
use rift_relay::storage::RelayDatabase;
use rift_relay::{build_router, AppState, RelayConfig};

/// Gateway double that hands every message to the test.
struct ChannelGateway(mpsc::UnboundedSender<PushMessage>);

#[async_trait]
impl PushGateway for ChannelGateway {
    async fn send(&self, message: &PushMessage) -> Result<(), NotificationError> {
        let _ = self.0.send(message.clone());
        Ok(())
    }
}

struct TestApp {
    app: axum::Router,
    state: AppState,
    pushes: mpsc::UnboundedReceiver<PushMessage>,
}

async fn app() -> TestApp {
    let db = RelayDatabase::open_in_memory().await.unwrap();
    let (tx, pushes) = mpsc::unbounded_channel();
    let state = AppState::with_gateway(
        db,
        &RelayConfig::new("test-secret"),
        Arc::new(ChannelGateway(tx)),
    );
    TestApp {
        app: build_router(state.clone()),
        state,
        pushes,
    }
}

async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(request).await.unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, value)
}

async fn get(app: &axum::Router, uri: &str) -> (StatusCode, Value) {
    send(app, Request::get(uri).body(Body::empty()).unwrap()).await
}

async fn post_json(app: &axum::Router, uri: &str, body: &Value) -> (StatusCode, Value) {
    let request = Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

async fn register(app: &axum::Router, key: &str) -> String {
    let (status, body) = post_json(app, "/register", &json!({ "pubkey": key })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    body["token"].as_str().unwrap().to_string()
}

// === Registration ===

#[tokio::test]
async fn register_is_idempotent_per_key() {
    let t = app().await;

    let first = register(&t.app, "pub-A").await;
    let second = register(&t.app, "pub-A").await;

    let a = t.state.tokens.verify(TokenKind::Connection, &first).unwrap();
    let b = t.state.tokens.verify(TokenKind::Connection, &second).unwrap();
    assert_eq!(a.code, b.code);
    assert!(rift_proto::is_valid_code(&a.code));
}

#[tokio::test]
async fn register_rejects_bad_input() {
    let t = app().await;

    let (status, body) = post_json(&t.app, "/register", &json!({ "pubkey": "" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["ok"], false);

    let (status, _) = post_json(&t.app, "/register", &json!({ "key": "pub-A" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let request = Request::post("/register")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, _) = send(&t.app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn verify_reports_token_validity() {
    let t = app().await;
    let token = register(&t.app, "pub-A").await;

    let (status, body) = get(&t.app, &format!("/verify?token={token}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!(true));

    let (_, body) = get(&t.app, "/verify?token=garbage").await;
    assert_eq!(body, json!(false));

    let (_, body) = get(&t.app, "/verify").await;
    assert_eq!(body, json!(false));
}

#[tokio::test]
async fn verify_is_false_for_unregistered_code() {
    let t = app().await;
    let token = t.state.tokens.issue_connection("123456").unwrap();

    let (_, body) = get(&t.app, &format!("/verify?token={token}")).await;
    assert_eq!(body, json!(false));
}

#[tokio::test]
async fn status_without_host_is_false() {
    let t = app().await;
    let (status, body) = get(&t.app, "/status/123456").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!(false));
}

#[tokio::test]
async fn health_reports_host_count() {
    let t = app().await;
    let (status, body) = get(&t.app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok", "hosts": 0 }));
}

#[tokio::test]
async fn cors_preflight_is_allowed() {
    let t = app().await;
    let request = Request::options("/register")
        .header("origin", "https://example.com")
        .header("access-control-request-method", "POST")
        .body(Body::empty())
        .unwrap();

    let resp = t.app.clone().oneshot(request).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().contains_key("access-control-allow-origin"));
}

// === Notifications ===

async fn subscription_token(t: &TestApp, connection: &str, uuid: Option<&str>) -> String {
    let (status, body) = post_json(
        &t.app,
        "/notifications/token",
        &json!({ "token": connection, "uuid": uuid }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["token"].as_str().unwrap().to_string()
}

async fn register_device(t: &TestApp, uuid: &str, platform: &str, token: Option<&str>) {
    let (status, body) = post_json(
        &t.app,
        "/notifications/register",
        &json!({ "uuid": uuid, "platform": platform, "token": token }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn subscribe_then_send_reaches_gateway() {
    let mut t = app().await;
    let connection = register(&t.app, "pub-A").await;
    let push = subscription_token(&t, &connection, Some("D1")).await;
    register_device(&t, "D1", "ios", Some("apns-1")).await;

    let (status, body) = post_json(
        &t.app,
        "/notifications/subscribe",
        &json!({ "uuid": "D1", "token": push, "type": "READY_CHECK" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);

    let (status, _) = post_json(
        &t.app,
        "/notifications/send",
        &json!({ "token": connection, "type": "READY_CHECK" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let message = tokio::time::timeout(Duration::from_secs(5), t.pushes.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.platform, Platform::Ios);
    assert_eq!(message.tokens, vec!["apns-1"]);
    assert_eq!(message.data["type"], "READY_CHECK");
    assert!(message.data.contains_key("respondToken"));
}

#[tokio::test]
async fn subscribe_rejects_token_bound_to_other_device() {
    let t = app().await;
    let connection = register(&t.app, "pub-A").await;
    let push = subscription_token(&t, &connection, Some("D1")).await;
    register_device(&t, "D2", "android", Some("fcm-2")).await;

    let (status, _) = post_json(
        &t.app,
        "/notifications/subscribe",
        &json!({ "uuid": "D2", "token": push, "type": "GAME_STARTED" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn subscribe_rejects_wrong_token_kind() {
    let t = app().await;
    let connection = register(&t.app, "pub-A").await;

    let (status, _) = post_json(
        &t.app,
        "/notifications/subscribe",
        &json!({ "uuid": "D1", "token": connection, "type": "GAME_STARTED" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn subscribe_unregistered_device_is_not_ok() {
    let t = app().await;
    let connection = register(&t.app, "pub-A").await;
    let push = subscription_token(&t, &connection, None).await;

    let (status, body) = post_json(
        &t.app,
        "/notifications/subscribe",
        &json!({ "uuid": "ghost", "token": push, "type": "GAME_STARTED" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], false);
}

#[tokio::test]
async fn subscribe_to_clear_is_bad_request() {
    let t = app().await;
    let connection = register(&t.app, "pub-A").await;
    let push = subscription_token(&t, &connection, None).await;

    let (status, _) = post_json(
        &t.app,
        "/notifications/subscribe",
        &json!({ "uuid": "D1", "token": push, "type": "CLEAR" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unsubscribe_removes_subscription() {
    let t = app().await;
    let connection = register(&t.app, "pub-A").await;
    let code = t
        .state
        .tokens
        .verify(TokenKind::Connection, &connection)
        .unwrap()
        .code;
    let push = subscription_token(&t, &connection, None).await;
    register_device(&t, "D1", "android", Some("fcm-1")).await;
    post_json(
        &t.app,
        "/notifications/subscribe",
        &json!({ "uuid": "D1", "token": push, "type": "GAME_STARTED" }),
    )
    .await;
    assert_eq!(
        t.state.db.subscriptions_for_device("D1").await.unwrap().len(),
        1
    );

    let (status, body) = post_json(
        &t.app,
        &format!("/notifications/unsubscribe/{code}"),
        &json!({ "uuid": "D1", "type": "GAME_STARTED" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert!(t
        .state
        .db
        .subscriptions_for_device("D1")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn register_null_token_forgets_device() {
    let t = app().await;
    register_device(&t, "D1", "ios", Some("apns-1")).await;
    assert!(t.state.db.device("D1").await.unwrap().is_some());

    register_device(&t, "D1", "ios", None).await;
    assert!(t.state.db.device("D1").await.unwrap().is_none());
}

#[tokio::test]
async fn register_rejects_unknown_platform() {
    let t = app().await;
    let (status, _) = post_json(
        &t.app,
        "/notifications/register",
        &json!({ "uuid": "D1", "platform": "blackberry", "token": "x" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn send_requires_connection_token() {
    let t = app().await;
    let (status, _) = post_json(
        &t.app,
        "/notifications/send",
        &json!({ "token": "garbage", "type": "GAME_STARTED" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn respond_checks_instant_response_token() {
    let t = app().await;
    let connection = register(&t.app, "pub-A").await;
    let code = t
        .state
        .tokens
        .verify(TokenKind::Connection, &connection)
        .unwrap()
        .code;

    let (status, _) = send(
        &t.app,
        Request::post(format!("/notifications/respond?token={connection}&response=accept"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // No live Host: accepted and dropped.
    let instant = t
        .state
        .tokens
        .issue_instant_response(&code, NotificationKind::ReadyCheck)
        .unwrap();
    let (status, _) = send(
        &t.app,
        Request::post(format!("/notifications/respond?token={instant}&response=accept"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}
