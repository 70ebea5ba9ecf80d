//! Message history routes

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use roomcast_shared::{is_valid_room_name, StoredMessage};

use crate::{
    error::{ApiError, ApiResult},
    routes::authenticate_token,
    state::AppState,
};

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub token: String,
    /// Return messages with id strictly below this; absent means latest page
    pub before_id: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub room: String,
    /// Newest-first; reverse for chronological rendering
    pub messages: Vec<StoredMessage>,
}

// =============================================================================
// Handlers
// =============================================================================

/// Paginated message history for a room, newest-first
pub async fn room_history(
    State(state): State<AppState>,
    Path(room): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<HistoryResponse>> {
    if !is_valid_room_name(&room) {
        return Err(ApiError::BadRequest("invalid room name".to_string()));
    }
    authenticate_token(&state, &query.token).await?;

    let limit = query
        .limit
        .unwrap_or(state.config.history_default_limit)
        .clamp(1, state.config.history_max_limit);

    let messages = state
        .store
        .history(&room, query.before_id, limit)
        .await
        .map_err(|e| {
            tracing::error!(room = %room, error = %e, "History lookup failed");
            ApiError::ServiceUnavailable
        })?;

    Ok(Json(HistoryResponse { room, messages }))
}
