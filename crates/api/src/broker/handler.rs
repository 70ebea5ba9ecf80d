//! WebSocket handler for Axum
//!
//! Upgrades `/ws/rooms/:room` connections, authenticates via a query
//! parameter token, and drives the delivery coordinator from the socket.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{stream::StreamExt, SinkExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use roomcast_shared::is_valid_room_name;

use crate::error::ApiError;
use crate::state::AppState;

use super::coordinator::ConnectError;
use super::events::ServerFrame;

#[derive(Debug, Deserialize)]
pub struct WebSocketQuery {
    token: String,
}

/// WebSocket handler - upgrades HTTP connection to WebSocket
/// Authenticates via query parameter token before the upgrade
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(room): Path<String>,
    Query(params): Query<WebSocketQuery>,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    if !is_valid_room_name(&room) {
        return Err(ApiError::BadRequest("invalid room name".to_string()));
    }

    let user_id = match state.broker.authenticate(&params.token).await {
        Ok(user_id) => user_id,
        Err(ConnectError::Unauthorized) => {
            tracing::warn!(room = %room, "WebSocket auth failed: invalid token");
            return Err(ApiError::Unauthorized);
        }
        Err(e) => {
            tracing::error!(error = %e, "WebSocket auth failed");
            return Err(ApiError::ServiceUnavailable);
        }
    };

    tracing::info!(user_id = %user_id, room = %room, "WebSocket connection upgrade requested");

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, user_id, room, state)))
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, user_id: Uuid, room: String, state: AppState) {
    let (mut sink, mut stream) = socket.split();

    // Channel feeding this connection's writer task
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerFrame>();

    let mut session = match state.broker.open(user_id, &room, tx).await {
        Ok(session) => session,
        Err(e) => {
            tracing::error!(user_id = %user_id, room = %room, error = %e, "Failed to open session");
            let _ = sink.close().await;
            return;
        }
    };
    let connection_id = session.connection().connection_id;

    // Spawn task to write frames to the client
    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            match serde_json::to_string(&frame) {
                Ok(json) => {
                    if sink.send(Message::Text(json)).await.is_err() {
                        break; // Connection closed
                    }
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Failed to serialize server frame");
                }
            }
        }
    });

    // Handle incoming messages; each frame is fully processed before the
    // next is read, so the last message's append/publish completes before
    // cleanup runs
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                state.broker.handle_frame(&session, &text).await;
            }
            Ok(Message::Close(_)) => {
                tracing::info!(connection_id = %connection_id, "WebSocket close frame received");
                break;
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => {
                // Axum handles ping/pong automatically
            }
            Ok(_) => {} // Ignore binary messages
            Err(e) => {
                tracing::warn!(connection_id = %connection_id, error = %e, "WebSocket transport error");
                break;
            }
        }
    }

    // Cleanup on disconnect
    tracing::info!(connection_id = %connection_id, user_id = %user_id, room = %room, "WebSocket connection closing");
    state.broker.disconnect(&mut session).await;
    send_task.abort();
}
