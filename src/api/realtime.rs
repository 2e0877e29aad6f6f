//! Realtime change feed over WebSocket.
//!
//! Clients connect to `/api/realtime?token=<session token>` and receive one
//! JSON message per data change they are allowed to see. When a client falls
//! behind the broadcast buffer it gets a `resync` message and should refetch.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{interval, Duration};

use super::auth::{authenticate, AuthUser};
use super::error::ApiError;
use crate::AppState;

const HEARTBEAT_SECONDS: u64 = 30;

#[derive(Deserialize)]
pub struct RealtimeQuery {
    token: Option<String>,
}

/// WebSocket endpoint; the token comes in the query since browsers cannot
/// set headers on the upgrade request
pub async fn realtime_ws(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<RealtimeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let token = query
        .token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::unauthorized("Missing token"))?;
    let user = authenticate(&state, &token).await?;

    Ok(ws.on_upgrade(move |socket| handle_feed(socket, state, user)))
}

async fn handle_feed(socket: WebSocket, state: Arc<AppState>, user: AuthUser) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.events.subscribe();
    let mut heartbeat = interval(Duration::from_secs(HEARTBEAT_SECONDS));

    tracing::debug!(user_id = %user.id, "Realtime client connected");
    if sender
        .send(Message::Text(r#"{"type":"ready"}"#.into()))
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        if !event.is_visible_to(&user.id, user.is_admin()) {
                            continue;
                        }
                        let payload = serde_json::json!({ "type": "change", "event": event });
                        if sender.send(Message::Text(payload.to_string())).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(user_id = %user.id, missed, "Realtime client lagged");
                        let payload = serde_json::json!({ "type": "resync", "missed": missed });
                        if sender.send(Message::Text(payload.to_string())).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            _ = heartbeat.tick() => {
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }

    tracing::debug!(user_id = %user.id, "Realtime client disconnected");
}
