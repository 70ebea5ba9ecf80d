//! API routes

pub mod health;
pub mod messages;
pub mod users;

use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::{
    broker::ws_handler,
    error::{ApiError, ApiResult},
    state::AppState,
};

/// Resolve a session token through the authentication collaborator,
/// failing the request when the token is unknown or the collaborator is
/// unreachable
pub(crate) async fn authenticate_token(state: &AppState, token: &str) -> ApiResult<Uuid> {
    state
        .authenticator
        .authenticate(token)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Authentication collaborator unreachable");
            ApiError::ServiceUnavailable
        })?
        .ok_or(ApiError::Unauthorized)
}

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // API routes (token auth handled in handlers) - under /api/v1
    let api_v1_routes = Router::new()
        .route("/rooms/:room/messages", get(messages::room_history))
        .route("/users", get(users::list_users));

    // WebSocket routes (auth handled in handler via query parameter)
    let websocket_routes = Router::new().route("/ws/rooms/:room", get(ws_handler));

    Router::new()
        .merge(health_routes)
        .merge(websocket_routes)
        .nest("/api/v1", api_v1_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
