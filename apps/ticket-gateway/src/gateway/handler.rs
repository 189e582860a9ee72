//! Dispatch of inbound chat events for an open connection.
//!
//! Handlers return `Err(ApiError)` for anything the sender should hear about;
//! [`handle_text`] turns that into an `error` event on the same connection.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::error::ApiError;
use crate::models::content::{extract_text, is_document};
use crate::AppState;

use super::events::{ClientEvent, Envelope, ServerEvent};
use super::registry::Visibility;
use super::session::Connection;

/// Parse and handle one text frame.
pub async fn handle_text(state: &AppState, conn: &Arc<Connection>, text: &str) {
    let event = match ClientEvent::parse(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::debug!(client_id = %conn.client_id, error = %e, "malformed client frame");
            conn.send(ServerEvent::Error {
                error: "Invalid message format".to_string(),
                details: Some(Value::String(e.to_string())),
            });
            return;
        }
    };

    let kind = event.kind();
    if let Err(e) = dispatch(state, conn, event).await {
        tracing::debug!(client_id = %conn.client_id, event = kind, error = %e, "event rejected");
        conn.send(ServerEvent::Error {
            error: e.message,
            details: e.details.map(|d| json!(d)),
        });
    }
}

pub async fn dispatch(
    state: &AppState,
    conn: &Arc<Connection>,
    event: ClientEvent,
) -> Result<(), ApiError> {
    match event {
        ClientEvent::Heartbeat => {
            conn.send(ServerEvent::HeartbeatAck);
            Ok(())
        }
        ClientEvent::HeartbeatAck => {
            state.liveness.acknowledge(&conn.client_id);
            Ok(())
        }
        ClientEvent::Message { content, is_internal, temp_id } => {
            handle_message(state, conn, content, is_internal, temp_id).await
        }
        ClientEvent::Typing => {
            handle_typing(state, conn);
            Ok(())
        }
        ClientEvent::MessageRead { message_id } => handle_read(state, conn, message_id).await,
        ClientEvent::AgentFirstMessage => handle_first_reply(state, conn).await,
        ClientEvent::WithdrawMessage { message_id } => {
            handle_withdraw(state, conn, message_id).await
        }
    }
}

fn ensure_alive(state: &AppState, conn: &Connection) -> Result<(), ApiError> {
    if state.liveness.is_alive(&conn.client_id) {
        Ok(())
    } else {
        Err(ApiError::bad_request("Connection is not alive"))
    }
}

async fn handle_message(
    state: &AppState,
    conn: &Arc<Connection>,
    content: Option<Value>,
    is_internal: bool,
    temp_id: Option<Value>,
) -> Result<(), ApiError> {
    ensure_alive(state, conn)?;
    let content = content
        .filter(|c| !c.is_null())
        .ok_or_else(|| ApiError::bad_request("Message content is required"))?;
    if !is_document(&content) {
        return Err(ApiError::bad_request("Message content must be a rich-text document"));
    }
    // Customers cannot write internal notes.
    let is_internal = is_internal && !conn.is_customer();

    let saved = state
        .store
        .save_message(&conn.room_id, conn.user_id, &content, is_internal)
        .await?
        .ok_or_else(|| ApiError::upstream("Failed to save message"))?;

    if conn.is_customer() {
        state
            .assistant
            .maybe_reply(Arc::clone(conn), extract_text(&content))
            .await;
    }

    let visibility = if is_internal {
        Visibility::StaffOnly
    } else {
        Visibility::Everyone
    };
    let envelope = Envelope::new(
        &conn.room_id,
        ServerEvent::NewMessage {
            message_id: saved.id,
            user_id: conn.user_id,
            content,
            is_internal,
        },
    )
    .at(saved.created_at);
    state
        .broadcast
        .send_envelope(&envelope, &[&conn.client_id], visibility);

    conn.send_envelope(
        &Envelope::new(
            &conn.room_id,
            ServerEvent::MessageSent {
                temp_id,
                message_id: saved.id,
            },
        )
        .at(saved.created_at),
    );
    Ok(())
}

/// Typing is best-effort: dropped silently for dead connections.
fn handle_typing(state: &AppState, conn: &Connection) {
    if !state.liveness.is_alive(&conn.client_id) || !state.rooms.contains_room(&conn.room_id) {
        return;
    }
    state.broadcast.send(
        &conn.room_id,
        ServerEvent::UserTyping { user_id: conn.user_id },
        &[&conn.client_id],
    );
}

async fn handle_read(
    state: &AppState,
    conn: &Connection,
    message_id: Option<i64>,
) -> Result<(), ApiError> {
    ensure_alive(state, conn)?;
    let message_id =
        message_id.ok_or_else(|| ApiError::bad_request("Message ID is required for read status"))?;

    let receipt = state
        .store
        .save_read_status(message_id, conn.user_id)
        .await?
        .ok_or_else(|| ApiError::upstream("Failed to save read status"))?;

    state.broadcast.send(
        &conn.room_id,
        ServerEvent::MessageReadUpdate {
            message_id,
            user_id: conn.user_id,
            read_at: receipt.read_at,
        },
        &[],
    );
    Ok(())
}

async fn handle_first_reply(state: &AppState, conn: &Connection) -> Result<(), ApiError> {
    ensure_alive(state, conn)?;
    if !conn.role.is_staff() {
        return Err(ApiError::forbidden("Only staff can take over a ticket"));
    }
    state
        .store
        .mark_first_reply(&conn.room_id, conn.user_id)
        .await?;
    tracing::info!(ticket_id = %conn.room_id, operator_id = conn.user_id, "ticket picked up");
    Ok(())
}

async fn handle_withdraw(
    state: &AppState,
    conn: &Connection,
    message_id: Option<i64>,
) -> Result<(), ApiError> {
    ensure_alive(state, conn)?;
    let message_id =
        message_id.ok_or_else(|| ApiError::bad_request("Message ID is required for withdrawal"))?;

    let withdrawn = state
        .store
        .withdraw_message(message_id, conn.user_id)
        .await?
        .ok_or_else(|| ApiError::upstream("Failed to withdraw message"))?;

    let visibility = if withdrawn.is_internal {
        Visibility::StaffOnly
    } else {
        Visibility::Everyone
    };
    state.broadcast.send_envelope(
        &Envelope::new(
            &conn.room_id,
            ServerEvent::MessageWithdrawn {
                message_id: withdrawn.id,
                user_id: conn.user_id,
                is_internal: withdrawn.is_internal,
            },
        ),
        &[&conn.client_id],
        visibility,
    );
    Ok(())
}
