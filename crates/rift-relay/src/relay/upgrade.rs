//! WebSocket upgrade endpoints for Hosts (`/conduit`) and Peers (`/mobile`).

use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::auth::TokenKind;
use crate::server::ApiError;
use crate::state::AppState;

use super::socket::{run_host, run_peer};

/// Legacy header carrying the connection token.
pub const TOKEN_HEADER: &str = "token";
/// Legacy header carrying the Conduit's public key.
pub const PUBLIC_KEY_HEADER: &str = "public-key";

/// Host credentials passed on the upgrade URL.
#[derive(Debug, Default, Deserialize)]
pub struct HostQuery {
    pub token: Option<String>,
    #[serde(rename = "publicKey")]
    pub public_key: Option<String>,
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Check a Host's credentials and record its current public key.
///
/// Query parameters take precedence over the legacy headers. Returns the
/// code the Host is registered under.
pub async fn authenticate_host(
    state: &AppState,
    headers: &HeaderMap,
    query: &HostQuery,
) -> Result<String, ApiError> {
    let token = query
        .token
        .clone()
        .or_else(|| header(headers, TOKEN_HEADER))
        .ok_or(ApiError::Unauthorized)?;
    let public_key = query
        .public_key
        .clone()
        .or_else(|| header(headers, PUBLIC_KEY_HEADER))
        .filter(|key| !key.is_empty())
        .ok_or(ApiError::Unauthorized)?;

    let claims = state
        .tokens
        .verify(TokenKind::Connection, &token)
        .ok_or(ApiError::Unauthorized)?;

    if !state.db.try_update_key(&claims.code, &public_key).await? {
        debug!(code = %claims.code, "Host key rejected");
        return Err(ApiError::Unauthorized);
    }

    Ok(claims.code)
}

/// `GET /conduit`: authenticate, then run the Host socket.
#[instrument(skip_all)]
pub async fn host_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HostQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let code = match authenticate_host(&state, &headers, &query).await {
        Ok(code) => code,
        Err(e) => return e.into_response(),
    };

    ws.on_upgrade(move |socket| run_host(socket, state, code))
}

/// `GET /mobile`: run a Peer socket. Peers authenticate end-to-end with the
/// Host, not with the relay.
pub async fn peer_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_peer(socket, state))
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;
    use crate::config::RelayConfig;
    use crate::storage::RelayDatabase;

    async fn state() -> AppState {
        let db = RelayDatabase::open_in_memory().await.unwrap();
        AppState::new(db, &RelayConfig::new("test-secret")).unwrap()
    }

    async fn registered(state: &AppState, key: &str) -> (String, String) {
        let code = state.db.generate_code(key).await.unwrap();
        let token = state.tokens.issue_connection(&code).unwrap();
        (code, token)
    }

    fn query(token: &str, key: &str) -> HostQuery {
        HostQuery {
            token: Some(token.into()),
            public_key: Some(key.into()),
        }
    }

    #[tokio::test]
    async fn valid_query_credentials_authenticate() {
        let state = state().await;
        let (code, token) = registered(&state, "pub-A").await;

        let authenticated = authenticate_host(&state, &HeaderMap::new(), &query(&token, "pub-A"))
            .await
            .unwrap();
        assert_eq!(authenticated, code);
    }

    #[tokio::test]
    async fn legacy_headers_authenticate() {
        let state = state().await;
        let (code, token) = registered(&state, "pub-A").await;
        let mut headers = HeaderMap::new();
        headers.insert(TOKEN_HEADER, HeaderValue::from_str(&token).unwrap());
        headers.insert(PUBLIC_KEY_HEADER, HeaderValue::from_static("pub-A"));

        let authenticated = authenticate_host(&state, &headers, &HostQuery::default())
            .await
            .unwrap();
        assert_eq!(authenticated, code);
    }

    #[tokio::test]
    async fn query_wins_over_headers() {
        let state = state().await;
        let (_code, token) = registered(&state, "pub-A").await;
        let mut headers = HeaderMap::new();
        headers.insert(TOKEN_HEADER, HeaderValue::from_static("garbage"));

        assert!(
            authenticate_host(&state, &headers, &query(&token, "pub-A"))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn rotated_key_is_stored() {
        let state = state().await;
        let (code, token) = registered(&state, "pub-A").await;

        authenticate_host(&state, &HeaderMap::new(), &query(&token, "pub-A2"))
            .await
            .unwrap();

        let registration = state.db.lookup_code(&code).await.unwrap().unwrap();
        assert_eq!(registration.public_key, "pub-A2");
    }

    #[tokio::test]
    async fn bad_credentials_are_unauthorized() {
        let state = state().await;
        let (code, token) = registered(&state, "pub-A").await;
        let push_token = state.tokens.issue_push_subscription(&code, None).unwrap();

        for (q, label) in [
            (HostQuery::default(), "missing"),
            (query("not-a-token", "pub-A"), "garbage token"),
            (query(&push_token, "pub-A"), "wrong kind"),
            (query(&token, ""), "empty key"),
        ] {
            let result = authenticate_host(&state, &HeaderMap::new(), &q).await;
            assert!(
                matches!(result, Err(ApiError::Unauthorized)),
                "{label} should be unauthorized"
            );
        }
    }

    #[tokio::test]
    async fn key_owned_by_another_code_is_unauthorized() {
        let state = state().await;
        let (_a, token_a) = registered(&state, "pub-A").await;
        registered(&state, "pub-B").await;

        let result = authenticate_host(&state, &HeaderMap::new(), &query(&token_a, "pub-B")).await;
        assert!(matches!(result, Err(ApiError::Unauthorized)));
    }

    #[tokio::test]
    async fn token_for_unknown_code_is_unauthorized() {
        let state = state().await;
        let code = state.db.generate_code("pub-A").await.unwrap();
        let unknown = if code == "000000" { "000001" } else { "000000" };
        let token = state.tokens.issue_connection(unknown).unwrap();

        let result = authenticate_host(&state, &HeaderMap::new(), &query(&token, "pub-Z")).await;
        assert!(matches!(result, Err(ApiError::Unauthorized)));
    }
}
