//! WebSocket endpoints for the sensor and chat channels.
//!
//! Each connection is split into a reader loop and a writer task. The writer
//! drains the connection's registry outbox, so everything sent to a
//! connection leaves in the order it was queued.

use std::borrow::Cow;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use skysense_shared::constants::CLOSE_POLICY_VIOLATION;
use skysense_shared::protocol::ServerEvent;
use skysense_shared::types::AuthUser;

use crate::api::AppState;
use crate::registry::SessionRegistry;

pub async fn sensor_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| sensor_session(socket, state.sensor_sessions))
}

async fn sensor_session(socket: WebSocket, sessions: SessionRegistry) {
    let (handle, outbox) = sessions.register_anonymous().await;
    let (sink, mut stream) = socket.split();
    let writer = tokio::spawn(pump(outbox, sink));

    // Viewers have nothing to say; read only to notice the close.
    while let Some(Ok(msg)) = stream.next().await {
        if matches!(msg, Message::Close(_)) {
            break;
        }
    }

    sessions.unregister(&handle).await;
    writer.abort();
}

#[derive(Debug, Deserialize)]
pub struct ChatQuery {
    token: Option<String>,
}

pub async fn chat_ws(
    ws: WebSocketUpgrade,
    Query(query): Query<ChatQuery>,
    State(state): State<AppState>,
) -> Response {
    let identity = match query.token.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        None => Err("Token required"),
        Some(token) => state.auth.verify(token).map_err(|e| {
            debug!(error = %e, "Chat handshake rejected");
            "Invalid token"
        }),
    };

    ws.on_upgrade(move |socket| async move {
        match identity {
            Ok(user) => chat_session(socket, user, state).await,
            Err(reason) => reject(socket, reason).await,
        }
    })
}

/// Close an unauthenticated socket without ever registering it.
async fn reject(mut socket: WebSocket, reason: &'static str) {
    let frame = CloseFrame {
        code: CLOSE_POLICY_VIOLATION,
        reason: Cow::Borrowed(reason),
    };
    if let Err(e) = socket.send(Message::Close(Some(frame))).await {
        debug!(error = %e, "Failed to send close frame");
    }
}

async fn chat_session(socket: WebSocket, user: AuthUser, state: AppState) {
    let sessions = state.chat_sessions.clone();
    let (handle, outbox) = sessions.register_user(user).await;
    let (sink, mut stream) = socket.split();
    let writer = tokio::spawn(pump(outbox, sink));

    info!(user = %user.id, role = %user.role, connection = %handle.id, "Chat connected");

    let hello = ServerEvent::Hello {
        user_id: user.id,
        role: user.role,
    };
    if let Ok(json) = hello.to_json() {
        sessions.send_to(&handle, &json).await;
    }

    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(connection = %handle.id, error = %e, "Chat socket error");
                break;
            }
        };

        // Errors are already answered on this connection.
        let _ = state.chat.handle_frame(&user, &handle, &text).await;
    }

    sessions.unregister(&handle).await;
    writer.abort();
    info!(user = %user.id, connection = %handle.id, "Chat disconnected");
}

async fn pump(mut outbox: mpsc::Receiver<String>, mut sink: SplitSink<WebSocket, Message>) {
    while let Some(payload) = outbox.recv().await {
        if sink.send(Message::Text(payload)).await.is_err() {
            break;
        }
    }
}
