//! Per-connection gateway state.

use axum::extract::ws::Utf8Bytes;
use desk_common::id::{prefixed_ulid, prefix};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::models::user::Role;

use super::events::{Envelope, ServerEvent};

/// Frames queued per connection before new ones are dropped.
pub const OUTBOUND_CAPACITY: usize = 1024;

/// What the writer task should push onto the socket next.
#[derive(Debug, Clone)]
pub enum Frame {
    Text(Utf8Bytes),
    Close { code: u16, reason: &'static str },
}

/// One accepted WebSocket, bound to a single ticket room for its lifetime.
///
/// Rooms and the liveness monitor hold `Arc<Connection>`s; only the session
/// loop that accepted the socket owns the socket itself.
#[derive(Debug)]
pub struct Connection {
    /// Unique connection identifier (`conn_` prefixed ULID).
    pub client_id: String,
    pub user_id: i64,
    pub role: Role,
    /// The ticket this connection chats on.
    pub room_id: String,
    sender: mpsc::Sender<Frame>,
    shutdown: CancellationToken,
}

/// The bounded queue between a connection and its writer task.
pub fn outbound_channel() -> (mpsc::Sender<Frame>, mpsc::Receiver<Frame>) {
    mpsc::channel(OUTBOUND_CAPACITY)
}

impl Connection {
    pub fn new(user_id: i64, role: Role, room_id: &str, sender: mpsc::Sender<Frame>) -> Self {
        Self {
            client_id: prefixed_ulid(prefix::CONNECTION),
            user_id,
            role,
            room_id: room_id.to_string(),
            sender,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn is_customer(&self) -> bool {
        self.role == Role::Customer
    }

    /// Queue an already-serialized frame. Returns `false` if the frame was
    /// dropped, either because the writer is gone or the queue is full.
    pub fn send_frame(&self, frame: Utf8Bytes) -> bool {
        match self.sender.try_send(Frame::Text(frame)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!(client_id = %self.client_id, "outbound queue full, dropping frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// `true` once the writer task has gone away.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Wrap `event` for this connection's room and queue it.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.send_envelope(&Envelope::new(&self.room_id, event))
    }

    pub fn send_envelope(&self, envelope: &Envelope) -> bool {
        match envelope.to_frame() {
            Some(frame) => self.send_frame(frame),
            None => false,
        }
    }

    pub fn send_error(&self, message: impl Into<String>) -> bool {
        self.send(ServerEvent::error(message))
    }

    /// Force the connection down. The close frame is queued best-effort; the
    /// session loop is signalled directly so a peer that stopped reading
    /// cannot hold the socket open.
    pub fn close(&self, code: u16, reason: &'static str) {
        let _ = self.sender.try_send(Frame::Close { code, reason });
        self.shutdown.cancel();
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn closed(&self) {
        self.shutdown.cancelled().await
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
