//! Ticket rooms: which live connections are chatting on which ticket.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;

use super::session::Connection;

/// Who a room-wide send should skip on top of the explicit exclusions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Everyone,
    /// Internal traffic: never delivered to the ticket's customer.
    StaffOnly,
}

#[derive(Default)]
struct Room {
    members: HashMap<String, Arc<Connection>>,
    /// The customer's connection, if one is in the room.
    customer: Option<String>,
}

impl Room {
    fn is_customer(&self, conn: &Connection) -> bool {
        conn.is_customer() || self.customer.as_deref() == Some(conn.client_id.as_str())
    }
}

/// Shared registry of all ticket rooms.
///
/// Uses `DashMap` for shard-level concurrency: every mutation and every
/// recipient snapshot of a room runs under that room's shard lock, so a
/// broadcast never observes a half-applied join or leave.
pub struct RoomRegistry {
    rooms: DashMap<String, Room>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
        }
    }

    /// Add a connection to its ticket room, creating the room if needed.
    /// Re-joining with the same `client_id` replaces the previous entry.
    pub fn join(&self, conn: Arc<Connection>) {
        let mut room = self.rooms.entry(conn.room_id.clone()).or_default();
        if conn.is_customer() {
            room.customer = Some(conn.client_id.clone());
        }
        room.members.insert(conn.client_id.clone(), Arc::clone(&conn));

        tracing::debug!(
            room_id = %conn.room_id,
            client_id = %conn.client_id,
            room_size = room.members.len(),
            "connection joined ticket room"
        );
    }

    /// Remove a connection. The room itself is dropped once empty.
    pub fn leave(&self, client_id: &str, room_id: &str) -> Option<Arc<Connection>> {
        let removed = {
            let mut room = self.rooms.get_mut(room_id)?;
            let removed = room.members.remove(client_id);
            if room.customer.as_deref() == Some(client_id) {
                // Fall back to another customer tab if one is still open.
                room.customer = room
                    .members
                    .values()
                    .find(|c| c.is_customer())
                    .map(|c| c.client_id.clone());
            }
            removed
        };

        if self
            .rooms
            .remove_if(room_id, |_, room| room.members.is_empty())
            .is_some()
        {
            tracing::debug!(%room_id, "removed empty ticket room");
        } else {
            tracing::debug!(%room_id, %client_id, "connection left ticket room");
        }

        removed
    }

    /// Snapshot of the client ids currently in a room.
    pub fn members_of(&self, room_id: &str) -> HashSet<String> {
        self.rooms
            .get(room_id)
            .map(|room| room.members.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Connections that should receive a room-wide send.
    pub fn recipients(
        &self,
        room_id: &str,
        exclude: &[&str],
        visibility: Visibility,
    ) -> Vec<Arc<Connection>> {
        let Some(room) = self.rooms.get(room_id) else {
            return Vec::new();
        };
        room.members
            .values()
            .filter(|c| !exclude.contains(&c.client_id.as_str()))
            .filter(|c| visibility == Visibility::Everyone || !room.is_customer(c))
            .cloned()
            .collect()
    }

    #[cfg(test)]
    fn customer_of(&self, room_id: &str) -> Option<String> {
        self.rooms.get(room_id).and_then(|room| room.customer.clone())
    }

    pub fn contains_room(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    pub fn room_size(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map(|r| r.members.len()).unwrap_or(0)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Every active room with its member ids, for presence introspection.
    pub fn snapshot(&self) -> Vec<(String, Vec<String>)> {
        self.rooms
            .iter()
            .map(|entry| {
                let mut clients: Vec<String> = entry.members.keys().cloned().collect();
                clients.sort();
                (entry.key().clone(), clients)
            })
            .collect()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::Role;
    use crate::gateway::session::outbound_channel;

    const ROOM: &str = "tkt0000000001";

    fn connect(user_id: i64, role: Role, room: &str) -> Arc<Connection> {
        let (tx, _rx) = outbound_channel();
        Arc::new(Connection::new(user_id, role, room, tx))
    }

    #[test]
    fn room_exists_only_while_occupied() {
        let registry = RoomRegistry::new();
        let a = connect(1, Role::Agent, ROOM);
        let b = connect(2, Role::Agent, ROOM);

        assert!(!registry.contains_room(ROOM));
        registry.join(Arc::clone(&a));
        registry.join(Arc::clone(&b));
        assert_eq!(registry.room_size(ROOM), 2);

        registry.leave(&a.client_id, ROOM);
        assert!(registry.contains_room(ROOM));
        assert_eq!(registry.members_of(ROOM), HashSet::from([b.client_id.clone()]));

        registry.leave(&b.client_id, ROOM);
        assert!(!registry.contains_room(ROOM));
        assert_eq!(registry.room_count(), 0);
    }

    #[test]
    fn rejoin_replaces_entry() {
        let registry = RoomRegistry::new();
        let a = connect(1, Role::Agent, ROOM);
        registry.join(Arc::clone(&a));
        registry.join(Arc::clone(&a));
        assert_eq!(registry.room_size(ROOM), 1);
    }

    #[test]
    fn leave_unknown_room_is_noop() {
        let registry = RoomRegistry::new();
        assert!(registry.leave("conn_x", ROOM).is_none());
    }

    #[test]
    fn recipients_respect_exclusions_and_rooms() {
        let registry = RoomRegistry::new();
        let a = connect(1, Role::Agent, ROOM);
        let b = connect(2, Role::Agent, ROOM);
        let other = connect(3, Role::Agent, "tkt0000000002");
        for c in [&a, &b, &other] {
            registry.join(Arc::clone(c));
        }

        let ids: Vec<String> = registry
            .recipients(ROOM, &[a.client_id.as_str()], Visibility::Everyone)
            .iter()
            .map(|c| c.client_id.clone())
            .collect();
        assert_eq!(ids, vec![b.client_id.clone()]);
    }

    #[test]
    fn staff_only_skips_customer_anchor() {
        let registry = RoomRegistry::new();
        let customer = connect(10, Role::Customer, ROOM);
        let agent = connect(20, Role::Agent, ROOM);
        registry.join(Arc::clone(&customer));
        registry.join(Arc::clone(&agent));

        assert_eq!(registry.customer_of(ROOM), Some(customer.client_id.clone()));
        let staff = registry.recipients(ROOM, &[], Visibility::StaffOnly);
        assert_eq!(staff.len(), 1);
        assert_eq!(staff[0].client_id, agent.client_id);
    }

    #[test]
    fn customer_anchor_cleared_when_customer_leaves() {
        let registry = RoomRegistry::new();
        let customer = connect(10, Role::Customer, ROOM);
        let agent = connect(20, Role::Agent, ROOM);
        registry.join(Arc::clone(&customer));
        registry.join(Arc::clone(&agent));

        registry.leave(&customer.client_id, ROOM);
        assert_eq!(registry.customer_of(ROOM), None);
        assert_eq!(registry.recipients(ROOM, &[], Visibility::StaffOnly).len(), 1);
    }

    #[test]
    fn customer_anchor_moves_to_remaining_tab() {
        let registry = RoomRegistry::new();
        let first_tab = connect(10, Role::Customer, ROOM);
        let second_tab = connect(10, Role::Customer, ROOM);
        registry.join(Arc::clone(&first_tab));
        registry.join(Arc::clone(&second_tab));
        assert_eq!(registry.customer_of(ROOM), Some(second_tab.client_id.clone()));

        // Both tabs are hidden from internal traffic.
        assert!(registry.recipients(ROOM, &[], Visibility::StaffOnly).is_empty());

        registry.leave(&second_tab.client_id, ROOM);
        assert_eq!(registry.customer_of(ROOM), Some(first_tab.client_id.clone()));
    }

    #[test]
    fn snapshot_lists_rooms_and_members() {
        let registry = RoomRegistry::new();
        let a = connect(1, Role::Agent, ROOM);
        registry.join(Arc::clone(&a));
        assert_eq!(registry.snapshot(), vec![(ROOM.to_string(), vec![a.client_id.clone()])]);
    }
}
