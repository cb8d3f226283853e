//! Routing of inbound chat frames.
//!
//! A frame is parsed, validated, persisted and only then delivered to every
//! live connection of both parties. Anything that goes wrong before delivery
//! is answered with an `error` event on the originating connection alone.

use thiserror::Error;
use tracing::{debug, warn};

use skysense_shared::protocol::{ClientFrame, ServerEvent};
use skysense_shared::types::{AuthUser, ThreadId, UserId};
use skysense_store::{ChatMessage, NewMessage};

use crate::error::ServerError;
use crate::gateway::Gateway;
use crate::registry::{SessionHandle, SessionRegistry};

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Bad JSON")]
    BadJson,

    #[error("Invalid payload")]
    InvalidPayload,

    #[error("Unknown message type")]
    UnknownType,

    #[error("Not a participant of this thread")]
    NotParticipant,

    #[error("Failed to send message")]
    Persistence(#[source] ServerError),
}

#[derive(Clone)]
pub struct ChatRouter {
    gateway: Gateway,
    sessions: SessionRegistry,
}

impl ChatRouter {
    pub fn new(gateway: Gateway, sessions: SessionRegistry) -> Self {
        Self { gateway, sessions }
    }

    /// Handle one raw text frame from `origin`, sent by `sender`.
    pub async fn handle_frame(
        &self,
        sender: &AuthUser,
        origin: &SessionHandle,
        raw: &str,
    ) -> Result<ChatMessage, ChatError> {
        let result = self.route(sender, raw).await;

        if let Err(e) = &result {
            match e {
                ChatError::Persistence(cause) => {
                    warn!(user = %sender.id, error = %cause, "Chat message not stored");
                }
                other => debug!(user = %sender.id, error = %other, "Rejected chat frame"),
            }
            self.reply(origin, &ServerEvent::error(e.to_string())).await;
        }

        result
    }

    async fn route(&self, sender: &AuthUser, raw: &str) -> Result<ChatMessage, ChatError> {
        let frame = parse_frame(raw)?;

        let ClientFrame::SendMessage {
            thread_id,
            message,
            receiver_id,
        } = frame;

        let body = message.trim();
        if thread_id <= 0 || receiver_id <= 0 || body.is_empty() {
            return Err(ChatError::InvalidPayload);
        }

        let thread = self
            .gateway
            .get_thread(ThreadId(thread_id))
            .await
            .map_err(ChatError::Persistence)?;
        if thread.counterpart(sender.id) != Some(UserId(receiver_id)) {
            return Err(ChatError::NotParticipant);
        }

        let saved = self
            .gateway
            .insert_message(NewMessage {
                thread_id: thread.id,
                sender_id: sender.id,
                sender_role: sender.role,
                message: body.to_string(),
            })
            .await
            .map_err(ChatError::Persistence)?;

        self.fan_out(&saved, sender.id, UserId(receiver_id)).await;
        Ok(saved)
    }

    /// Deliver a stored message to both parties. A party that is offline
    /// simply misses the live event.
    async fn fan_out(&self, saved: &ChatMessage, sender: UserId, receiver: UserId) {
        let event = ServerEvent::NewMessage {
            thread_id: saved.thread_id,
            message: saved.clone().into(),
        };
        let payload = match event.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to encode new_message event");
                return;
            }
        };

        let mut reached = self.sessions.deliver(sender, &payload).await;
        if receiver != sender {
            reached += self.sessions.deliver(receiver, &payload).await;
        }

        debug!(
            thread = %saved.thread_id,
            message = %saved.id,
            sender = %sender,
            receiver = %receiver,
            reached,
            "Chat message delivered"
        );
    }

    async fn reply(&self, origin: &SessionHandle, event: &ServerEvent) {
        match event.to_json() {
            Ok(json) => {
                self.sessions.send_to(origin, &json).await;
            }
            Err(e) => warn!(error = %e, "Failed to encode chat reply"),
        }
    }
}

/// Decode a frame, telling malformed JSON apart from a well-formed object
/// that is not a valid frame.
fn parse_frame(raw: &str) -> Result<ClientFrame, ChatError> {
    let value: serde_json::Value = serde_json::from_str(raw).map_err(|_| ChatError::BadJson)?;

    match value.get("type").and_then(|t| t.as_str()) {
        Some("send_message") => {}
        Some(_) => return Err(ChatError::UnknownType),
        None => return Err(ChatError::InvalidPayload),
    }

    serde_json::from_value(value).map_err(|_| ChatError::InvalidPayload)
}
