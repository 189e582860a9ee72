//! WebSocket upgrade handler and per-connection event loop.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc::Receiver;

use crate::error::ApiError;
use crate::models::ticket::validate_ticket_id;
use crate::models::user::Role;
use crate::AppState;

use super::events::ServerEvent;
use super::handler::handle_text;
use super::session::{outbound_channel, Connection, Frame};

/// How long a forced close waits for the writer to flush its close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatQuery {
    pub token: Option<String>,
    pub ticket_id: Option<String>,
}

/// A handshake that passed every check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub user_id: i64,
    pub role: Role,
    pub ticket_id: String,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/ws/chat", get(ws_upgrade))
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<ChatQuery>,
) -> Result<Response, ApiError> {
    let admission = admit(&state, &query).await?;
    Ok(ws.on_upgrade(move |socket| handle_connection(socket, state, admission)))
}

/// Validate a handshake before the protocol switch.
pub async fn admit(state: &AppState, query: &ChatQuery) -> Result<Admission, ApiError> {
    let ticket_id = query
        .ticket_id
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::bad_request("Ticket ID is required"))?;
    validate_ticket_id(ticket_id)?;

    let token = query.token.as_deref().unwrap_or_default();
    let identity = state
        .tokens
        .validate(token)
        .ok_or_else(|| ApiError::unauthorized("Invalid or expired WebSocket token"))?;

    if identity.role == Role::Customer && state.config.enforce_ticket_membership {
        let members = state.store.get_ticket_members(ticket_id).await?;
        if !members.iter().any(|m| m.id == identity.user_id) {
            tracing::info!(user_id = identity.user_id, %ticket_id, "customer is not a ticket member");
            return Err(ApiError::forbidden("You are not a member of this ticket"));
        }
    }

    Ok(Admission {
        user_id: identity.user_id,
        role: identity.role,
        ticket_id: ticket_id.to_string(),
    })
}

async fn handle_connection(socket: WebSocket, state: AppState, admission: Admission) {
    let (ws_tx, mut ws_rx) = socket.split();
    let (tx, rx) = outbound_channel();
    let conn = Arc::new(Connection::new(
        admission.user_id,
        admission.role,
        &admission.ticket_id,
        tx,
    ));
    let mut writer = tokio::spawn(write_frames(ws_tx, rx));

    open_session(&state, &conn).await;

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => handle_text(&state, &conn, text.as_str()).await,
                    Some(Ok(Message::Binary(_))) => {
                        conn.send_error("Binary frames are not supported");
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(?e, client_id = %conn.client_id, "ws read error");
                        break;
                    }
                }
            }

            // The writer stops after sending a close frame or once the socket is gone.
            _ = &mut writer => break,

            _ = conn.closed() => {
                if tokio::time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
                    tracing::info!(client_id = %conn.client_id, "writer stalled, dropping socket");
                }
                break;
            }
        }
    }

    close_session(&state, &conn);
    writer.abort();
}

/// Drain queued frames onto the socket.
async fn write_frames(mut ws_tx: SplitSink<WebSocket, Message>, mut rx: Receiver<Frame>) {
    while let Some(frame) = rx.recv().await {
        match frame {
            Frame::Text(text) => {
                if ws_tx.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            Frame::Close { code, reason } => {
                let _ = send_close(&mut ws_tx, code, reason).await;
                break;
            }
        }
    }
}

async fn open_session(state: &AppState, conn: &Arc<Connection>) {
    state.rooms.join(Arc::clone(conn));
    state.liveness.start(Arc::clone(conn));

    state.broadcast.send(
        &conn.room_id,
        ServerEvent::UserJoined {
            user_id: conn.user_id,
            role: conn.role,
        },
        &[&conn.client_id],
    );
    conn.send(ServerEvent::JoinSuccess {
        user_id: conn.user_id,
        client_id: conn.client_id.clone(),
    });

    tracing::info!(
        client_id = %conn.client_id,
        user_id = conn.user_id,
        role = %conn.role,
        ticket_id = %conn.room_id,
        "chat connection opened"
    );

    if conn.is_customer() {
        state.assistant.greet(Arc::clone(conn)).await;
    }
}

fn close_session(state: &AppState, conn: &Connection) {
    state.liveness.stop(&conn.client_id);
    state.broadcast.send(
        &conn.room_id,
        ServerEvent::UserLeft { user_id: conn.user_id },
        &[&conn.client_id],
    );
    state.rooms.leave(&conn.client_id, &conn.room_id);

    tracing::info!(
        client_id = %conn.client_id,
        user_id = conn.user_id,
        ticket_id = %conn.room_id,
        "chat connection closed"
    );
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    code: u16,
    reason: &str,
) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    ws_tx.send(close_msg).await
}
