//! HTTP façade: registration, status and notification endpoints, plus the
//! two WebSocket upgrade routes.

mod error;
pub mod routes;

pub use error::ApiError;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::relay::{host_upgrade, peer_upgrade};
use crate::state::AppState;

/// Build the complete relay router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/conduit", get(host_upgrade))
        .route("/mobile", get(peer_upgrade))
        .route("/register", post(routes::register))
        .route("/verify", get(routes::verify))
        .route("/status/{code}", get(routes::status))
        .route("/health", get(routes::health))
        .route("/notifications/token", post(routes::subscription_token))
        .route("/notifications/register", post(routes::register_device))
        .route("/notifications/subscribe", post(routes::subscribe))
        .route(
            "/notifications/unsubscribe/{code}",
            post(routes::unsubscribe),
        )
        .route("/notifications/send", post(routes::send))
        .route("/notifications/respond", post(routes::respond))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
