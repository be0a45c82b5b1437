use crate::error::AppError;
use crate::features::auth::models::{AuthUser, Principal};
use crate::features::realtime::models::{ClientMessage, PresenceUser};
use crate::features::realtime::Hub;
use crate::response::{self, ApiData};
use crate::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use axum::{Extension, Json};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const WRITE_DEADLINE: Duration = Duration::from_secs(10);
const IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// The upgrade request has already been through the full middleware chain;
/// anonymous callers never reach the hub.
pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Extension(principal): Extension<Principal>,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    let user = principal.user().cloned().ok_or(AppError::Unauthenticated)?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state.hub.clone(), user)))
}

async fn handle_socket(socket: WebSocket, hub: Arc<Hub>, user: AuthUser) {
    let (mut sender, mut receiver) = socket.split();
    let (connection_id, mut rx) = hub.register(user.id, user.username.clone()).await;

    let write_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            match tokio::time::timeout(WRITE_DEADLINE, sender.send(Message::Text(frame))).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::debug!(error = %e, "websocket send failed");
                    break;
                }
                Err(_) => {
                    tracing::warn!(%connection_id, "websocket write deadline exceeded");
                    break;
                }
            }
        }
    });

    loop {
        match tokio::time::timeout(IDLE_TIMEOUT, receiver.next()).await {
            Err(_) => {
                tracing::debug!(%connection_id, "websocket idle timeout");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                tracing::debug!(error = %e, "websocket receive error");
                break;
            }
            Ok(Some(Ok(Message::Text(text)))) => {
                handle_client_frame(&hub, connection_id, &text).await;
            }
            Ok(Some(Ok(Message::Close(_)))) => break,
            Ok(Some(Ok(_))) => {}
        }
    }

    hub.unregister(connection_id).await;
    write_task.abort();
    tracing::debug!(%connection_id, user = %user.username, "websocket connection closed");
}

async fn handle_client_frame(hub: &Arc<Hub>, connection_id: Uuid, text: &str) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::PresenceAnnounce {
            resource_type,
            resource_id,
            mode,
        }) => {
            let mode = match mode.as_str() {
                "editing" => "editing",
                _ => "viewing",
            };
            hub.announce_presence(connection_id, &resource_type, &resource_id, mode)
                .await;
        }
        Ok(ClientMessage::PresenceRetract {
            resource_type,
            resource_id,
        }) => {
            hub.retract_presence(connection_id, &resource_type, &resource_id)
                .await;
        }
        Ok(ClientMessage::Ping) => {
            hub.send_to(connection_id, r#"{"type":"pong"}"#.to_string())
                .await;
        }
        Err(e) => {
            tracing::debug!(error = %e, "ignoring malformed websocket frame");
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PresenceQuery {
    pub resource_type: String,
    pub resource_id: String,
}

/// Hydration endpoint used before the socket is established.
pub async fn presence(
    State(state): State<AppState>,
    Query(query): Query<PresenceQuery>,
) -> Json<ApiData<Vec<PresenceUser>>> {
    let users = state
        .hub
        .presence_for(&query.resource_type, &query.resource_id)
        .await;
    response::data(users)
}
