//! Chat event types and wire-format messages.
//!
//! Every frame in either direction is a JSON object discriminated by `type`.
//! Outbound frames are wrapped in an [`Envelope`] that adds `roomId` and an
//! epoch-millisecond `timestamp`.

use axum::extract::ws::Utf8Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::user::Role;

// ---------------------------------------------------------------------------
// Client → Server
// ---------------------------------------------------------------------------

/// Events a client may send. Required fields are `Option`s so the handler can
/// answer with a precise `error` instead of a generic parse failure.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    Heartbeat,
    HeartbeatAck,
    Message {
        #[serde(default)]
        content: Option<Value>,
        #[serde(default)]
        is_internal: bool,
        /// Client-side id echoed back in `message_sent`.
        #[serde(default)]
        temp_id: Option<Value>,
    },
    Typing,
    MessageRead {
        #[serde(default)]
        message_id: Option<i64>,
    },
    AgentFirstMessage,
    WithdrawMessage {
        #[serde(default)]
        message_id: Option<i64>,
    },
}

impl ClientEvent {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// The wire name, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEvent::Heartbeat => "heartbeat",
            ClientEvent::HeartbeatAck => "heartbeat_ack",
            ClientEvent::Message { .. } => "message",
            ClientEvent::Typing => "typing",
            ClientEvent::MessageRead { .. } => "message_read",
            ClientEvent::AgentFirstMessage => "agent_first_message",
            ClientEvent::WithdrawMessage { .. } => "withdraw_message",
        }
    }
}

// ---------------------------------------------------------------------------
// Server → Client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    Heartbeat,
    HeartbeatAck,
    JoinSuccess {
        user_id: i64,
        client_id: String,
    },
    UserJoined {
        user_id: i64,
        role: Role,
    },
    UserLeft {
        user_id: i64,
    },
    UserTyping {
        user_id: i64,
    },
    NewMessage {
        message_id: i64,
        user_id: i64,
        content: Value,
        is_internal: bool,
    },
    MessageSent {
        #[serde(skip_serializing_if = "Option::is_none")]
        temp_id: Option<Value>,
        message_id: i64,
    },
    MessageReadUpdate {
        message_id: i64,
        user_id: i64,
        read_at: DateTime<Utc>,
    },
    MessageWithdrawn {
        message_id: i64,
        user_id: i64,
        is_internal: bool,
    },
    Error {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
    },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            error: message.into(),
            details: None,
        }
    }
}

/// An outbound event bound to a room and a point in time.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(flatten)]
    pub event: ServerEvent,
    pub room_id: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

impl Envelope {
    pub fn new(room_id: &str, event: ServerEvent) -> Self {
        Self {
            event,
            room_id: room_id.to_string(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Stamp the envelope with a persisted time instead of "now".
    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.timestamp = at.timestamp_millis();
        self
    }

    /// Serialize once into a frame that can be cloned cheaply per recipient.
    pub fn to_frame(&self) -> Option<Utf8Bytes> {
        match serde_json::to_string(self) {
            Ok(json) => Some(Utf8Bytes::from(json)),
            Err(e) => {
                tracing::error!(?e, "failed to serialize gateway event");
                None
            }
        }
    }
}
