//! HTTP façade handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use rift_proto::{Frame, NotificationKind, Platform};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::auth::TokenKind;
use crate::notifications::SubscribeOutcome;
use crate::state::AppState;

use super::ApiError;

/// Unwrap a JSON body, turning any rejection into a 400.
fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

impl OkResponse {
    const fn json(ok: bool) -> Json<Self> {
        Json(Self { ok })
    }
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub ok: bool,
    pub token: String,
}

// =============================================================================
// Registration
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub pubkey: String,
}

/// `POST /register`: register (or re-register) a Conduit's key.
#[instrument(skip_all)]
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>, ApiError> {
    let request = body(payload)?;
    if request.pubkey.trim().is_empty() {
        return Err(ApiError::BadRequest("pubkey must not be empty".into()));
    }

    let code = state.db.generate_code(&request.pubkey).await?;
    let token = state.tokens.issue_connection(&code)?;
    info!(code = %code, "Conduit registered");

    Ok(Json(TokenResponse { ok: true, token }))
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

/// `GET /verify?token=`: whether a connection token still maps to a code.
#[instrument(skip_all)]
pub async fn verify(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<bool>, ApiError> {
    let Some(claims) = query
        .token
        .as_deref()
        .and_then(|token| state.tokens.verify(TokenKind::Connection, token))
    else {
        return Ok(Json(false));
    };

    Ok(Json(state.db.lookup_code(&claims.code).await?.is_some()))
}

/// `GET /status/{code}`: whether a Host is live for `code`.
pub async fn status(State(state): State<AppState>, Path(code): Path<String>) -> Json<bool> {
    Json(state.registry.is_live(&code).await)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub hosts: usize,
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        hosts: state.registry.host_count().await,
    })
}

// =============================================================================
// Notifications
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct SubscriptionTokenRequest {
    pub token: String,
    pub uuid: Option<String>,
}

/// `POST /notifications/token`: mint a push-subscription token for the
/// code behind a connection token.
#[instrument(skip_all)]
pub async fn subscription_token(
    State(state): State<AppState>,
    payload: Result<Json<SubscriptionTokenRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>, ApiError> {
    let request = body(payload)?;
    let claims = state
        .tokens
        .verify(TokenKind::Connection, &request.token)
        .ok_or(ApiError::Unauthorized)?;

    let token = state
        .tokens
        .issue_push_subscription(&claims.code, request.uuid.as_deref())?;
    Ok(Json(TokenResponse { ok: true, token }))
}

#[derive(Debug, Deserialize)]
pub struct RegisterDeviceRequest {
    pub uuid: String,
    pub platform: Platform,
    pub token: Option<String>,
}

/// `POST /notifications/register`: record (or, with a null token, forget)
/// a device's push token.
#[instrument(skip_all)]
pub async fn register_device(
    State(state): State<AppState>,
    payload: Result<Json<RegisterDeviceRequest>, JsonRejection>,
) -> Result<Json<OkResponse>, ApiError> {
    let request = body(payload)?;
    if request.uuid.is_empty() {
        return Err(ApiError::BadRequest("uuid must not be empty".into()));
    }

    state
        .db
        .register_device(&request.uuid, request.platform, request.token.as_deref())
        .await?;
    debug!(
        device_id = %request.uuid,
        platform = %request.platform,
        removed = request.token.is_none(),
        "Device push token updated"
    );

    Ok(OkResponse::json(true))
}

#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    pub uuid: String,
    pub token: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
}

/// `POST /notifications/subscribe`
#[instrument(skip_all)]
pub async fn subscribe(
    State(state): State<AppState>,
    payload: Result<Json<SubscribeRequest>, JsonRejection>,
) -> Result<Json<OkResponse>, ApiError> {
    let request = body(payload)?;
    if request.kind == NotificationKind::Clear {
        return Err(ApiError::BadRequest("CLEAR cannot be subscribed to".into()));
    }

    let claims = state
        .tokens
        .verify(TokenKind::PushSubscription, &request.token)
        .ok_or(ApiError::Unauthorized)?;
    if claims
        .device
        .as_deref()
        .is_some_and(|device| device != request.uuid)
    {
        return Err(ApiError::Unauthorized);
    }

    let outcome = state
        .notifications
        .subscribe(&claims.code, &request.uuid, None, &[request.kind])
        .await?;

    Ok(OkResponse::json(outcome == SubscribeOutcome::Subscribed))
}

#[derive(Debug, Deserialize)]
pub struct UnsubscribeRequest {
    pub uuid: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
}

/// `POST /notifications/unsubscribe/{code}`
#[instrument(skip_all, fields(code = %code))]
pub async fn unsubscribe(
    State(state): State<AppState>,
    Path(code): Path<String>,
    payload: Result<Json<UnsubscribeRequest>, JsonRejection>,
) -> Result<Json<OkResponse>, ApiError> {
    let request = body(payload)?;
    let removed = state
        .db
        .remove_subscription(&code, &request.uuid, request.kind)
        .await?;
    debug!(device_id = %request.uuid, kind = %request.kind, removed, "Unsubscribed");

    Ok(OkResponse::json(true))
}

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub token: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
}

/// `POST /notifications/send`: fire a notification for the caller's code.
#[instrument(skip_all)]
pub async fn send(
    State(state): State<AppState>,
    payload: Result<Json<SendRequest>, JsonRejection>,
) -> Result<Json<OkResponse>, ApiError> {
    let request = body(payload)?;
    let claims = state
        .tokens
        .verify(TokenKind::Connection, &request.token)
        .ok_or(ApiError::Unauthorized)?;

    state.notifications.send(&claims.code, request.kind, None);
    Ok(OkResponse::json(true))
}

#[derive(Debug, Deserialize)]
pub struct RespondQuery {
    pub token: Option<String>,
    pub response: Option<String>,
}

/// `POST /notifications/respond?token=&response=`: relay a device's answer
/// to a notification to the live Host, if any.
#[instrument(skip_all)]
pub async fn respond(
    State(state): State<AppState>,
    Query(query): Query<RespondQuery>,
) -> Result<StatusCode, ApiError> {
    let claims = query
        .token
        .as_deref()
        .and_then(|token| state.tokens.verify(TokenKind::InstantResponse, token))
        .ok_or(ApiError::Unauthorized)?;
    let kind = claims.notification_type.ok_or(ApiError::Unauthorized)?;
    let response = query
        .response
        .ok_or_else(|| ApiError::BadRequest("response is required".into()))?;

    let delivered = state
        .registry
        .notify_host(&claims.code, Frame::PnRespond { kind, response })
        .await;
    debug!(code = %claims.code, kind = %kind, delivered, "Instant response");

    Ok(StatusCode::OK)
}
