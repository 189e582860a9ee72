//! Room-scoped fan-out of outbound events.
//!
//! Each event is serialized once and the resulting frame is queued on every
//! recipient's writer. Delivery is best-effort: a recipient whose writer has
//! already gone away is skipped without affecting the others.

use std::sync::Arc;

use super::events::{Envelope, ServerEvent};
use super::registry::{RoomRegistry, Visibility};

/// Handle for sending into ticket rooms. Cloneable; store in AppState.
#[derive(Clone)]
pub struct Broadcaster {
    rooms: Arc<RoomRegistry>,
}

impl Broadcaster {
    pub fn new(rooms: Arc<RoomRegistry>) -> Self {
        Self { rooms }
    }

    /// Send `event` to everyone in `room_id` except `exclude`.
    pub fn send(&self, room_id: &str, event: ServerEvent, exclude: &[&str]) -> usize {
        self.send_envelope(&Envelope::new(room_id, event), exclude, Visibility::Everyone)
    }

    /// Send a prepared envelope to its room. Returns how many connections
    /// accepted the frame.
    pub fn send_envelope(
        &self,
        envelope: &Envelope,
        exclude: &[&str],
        visibility: Visibility,
    ) -> usize {
        let recipients = self.rooms.recipients(&envelope.room_id, exclude, visibility);
        if recipients.is_empty() {
            return 0;
        }
        let Some(frame) = envelope.to_frame() else {
            return 0;
        };

        let delivered = recipients
            .iter()
            .filter(|conn| conn.send_frame(frame.clone()))
            .count();
        if delivered < recipients.len() {
            tracing::debug!(
                room_id = %envelope.room_id,
                dropped = recipients.len() - delivered,
                "skipped closed connections during broadcast"
            );
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::session::{outbound_channel, Connection, Frame};
    use crate::models::user::Role;
    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    const ROOM: &str = "tkt0000000001";

    fn join(
        rooms: &RoomRegistry,
        user_id: i64,
        role: Role,
    ) -> (Arc<Connection>, mpsc::Receiver<Frame>) {
        let (tx, rx) = outbound_channel();
        let conn = Arc::new(Connection::new(user_id, role, ROOM, tx));
        rooms.join(Arc::clone(&conn));
        (conn, rx)
    }

    fn received(rx: &mut mpsc::Receiver<Frame>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let Frame::Text(text) = frame {
                out.push(serde_json::from_str(text.as_str()).unwrap());
            }
        }
        out
    }

    #[test]
    fn excluded_sender_does_not_receive() {
        let rooms = Arc::new(RoomRegistry::new());
        let broadcast = Broadcaster::new(Arc::clone(&rooms));
        let (a, mut rx_a) = join(&rooms, 1, Role::Agent);
        let (_b, mut rx_b) = join(&rooms, 2, Role::Agent);

        let delivered = broadcast.send(ROOM, ServerEvent::UserTyping { user_id: 1 }, &[&a.client_id]);
        assert_eq!(delivered, 1);
        assert!(received(&mut rx_a).is_empty());
        let got = received(&mut rx_b);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0]["type"], "user_typing");
        assert_eq!(got[0]["roomId"], ROOM);
    }

    #[test]
    fn internal_message_skips_customer() {
        let rooms = Arc::new(RoomRegistry::new());
        let broadcast = Broadcaster::new(Arc::clone(&rooms));
        let (_customer, mut rx_customer) = join(&rooms, 10, Role::Customer);
        let (agent, mut rx_agent) = join(&rooms, 20, Role::Agent);
        let (_tech, mut rx_tech) = join(&rooms, 30, Role::Technician);

        let envelope = Envelope::new(
            ROOM,
            ServerEvent::NewMessage {
                message_id: 1,
                user_id: 20,
                content: json!({ "type": "doc" }),
                is_internal: true,
            },
        );
        broadcast.send_envelope(&envelope, &[&agent.client_id], Visibility::StaffOnly);

        assert!(received(&mut rx_customer).is_empty());
        assert!(received(&mut rx_agent).is_empty());
        assert_eq!(received(&mut rx_tech).len(), 1);
    }

    #[test]
    fn closed_recipient_does_not_block_others() {
        let rooms = Arc::new(RoomRegistry::new());
        let broadcast = Broadcaster::new(Arc::clone(&rooms));
        let (_a, rx_a) = join(&rooms, 1, Role::Agent);
        let (_b, mut rx_b) = join(&rooms, 2, Role::Agent);
        drop(rx_a);

        assert_eq!(broadcast.send(ROOM, ServerEvent::UserLeft { user_id: 9 }, &[]), 1);
        assert_eq!(received(&mut rx_b).len(), 1);
    }

    #[test]
    fn missing_room_is_noop() {
        let broadcast = Broadcaster::new(Arc::new(RoomRegistry::new()));
        assert_eq!(broadcast.send("nobody-here00", ServerEvent::Heartbeat, &[]), 0);
    }
}
