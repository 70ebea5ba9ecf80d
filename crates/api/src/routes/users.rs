//! User directory routes
//!
//! Read-only listing that feeds the "registered users" side panel; the
//! broker core is not involved.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use roomcast_shared::UserSummary;

use crate::{error::ApiResult, routes::authenticate_token, state::AppState};

#[derive(Debug, Deserialize)]
pub struct ListUsersQuery {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct UserListResponse {
    pub users: Vec<UserSummary>,
    pub total: i64,
}

/// List registered users, excluding the requester
pub async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<ListUsersQuery>,
) -> ApiResult<Json<UserListResponse>> {
    let user_id = authenticate_token(&state, &query.token).await?;

    let users: Vec<UserSummary> = sqlx::query_as(
        r#"
        SELECT id, display_name
        FROM users
        WHERE id <> $1
        ORDER BY display_name ASC
        "#,
    )
    .bind(user_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(UserListResponse {
        total: users.len() as i64,
        users,
    }))
}
