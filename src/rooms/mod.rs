//! Room membership and broadcast
//!
//! Membership is kept in two indexes (room -> members and member -> rooms)
//! behind a single lock, so they are always updated together. Broadcast
//! snapshots the member set under the read lock and sends outside it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::connection::ConnectionRegistry;
use crate::stats::StatsTracker;
use crate::types::{ConnectionId, HubError, HubResult, Message, ReadyState};

/// Longest room name accepted, in bytes
pub const MAX_ROOM_NAME: usize = 256;

/// Room name and member count, for listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomSummary {
    pub name: String,
    pub members: usize,
}

#[derive(Debug, Default)]
struct RoomTable {
    rooms: HashMap<String, HashSet<ConnectionId>>,
    memberships: HashMap<ConnectionId, HashSet<String>>,
}

impl RoomTable {
    fn insert(&mut self, id: ConnectionId, room: &str) -> bool {
        let added = self.rooms.entry(room.to_string()).or_default().insert(id);
        if added {
            self.memberships
                .entry(id)
                .or_default()
                .insert(room.to_string());
        }
        added
    }

    fn remove(&mut self, id: ConnectionId, room: &str, delete_empty: bool) -> bool {
        let Some(members) = self.rooms.get_mut(room) else {
            return false;
        };
        if !members.remove(&id) {
            return false;
        }
        if delete_empty && members.is_empty() {
            self.rooms.remove(room);
        }
        if let Some(joined) = self.memberships.get_mut(&id) {
            joined.remove(room);
            if joined.is_empty() {
                self.memberships.remove(&id);
            }
        }
        true
    }

    fn remove_all(&mut self, id: ConnectionId, delete_empty: bool) -> Vec<String> {
        let mut left: Vec<String> = self
            .memberships
            .remove(&id)
            .map(|joined| joined.into_iter().collect())
            .unwrap_or_default();
        for room in &left {
            if let Some(members) = self.rooms.get_mut(room) {
                members.remove(&id);
                if delete_empty && members.is_empty() {
                    self.rooms.remove(room);
                }
            }
        }
        left.sort();
        left
    }
}

/// Named groups of connections.
pub struct RoomManager {
    table: RwLock<RoomTable>,
    registry: Arc<ConnectionRegistry>,
    stats: Arc<StatsTracker>,
    delete_empty_rooms: bool,
}

impl RoomManager {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        stats: Arc<StatsTracker>,
        delete_empty_rooms: bool,
    ) -> Self {
        Self {
            table: RwLock::new(RoomTable::default()),
            registry,
            stats,
            delete_empty_rooms,
        }
    }

    /// Add an OPEN connection to `room`, creating the room if needed.
    ///
    /// Returns `false` when the connection was already a member.
    pub fn join(&self, id: ConnectionId, room: &str) -> HubResult<bool> {
        validate_room_name(room)?;
        match self.registry.get(id) {
            Some(conn) if conn.ready_state() == ReadyState::Open => {}
            Some(_) => return Err(HubError::NotOpen(id)),
            None => return Err(HubError::UnknownConnection(id)),
        }
        let added = self.table.write().insert(id, room);
        if added {
            tracing::debug!(connection_id = %id, room, "joined room");
        }
        Ok(added)
    }

    /// Remove `id` from `room`; `false` if it was not a member.
    pub fn leave(&self, id: ConnectionId, room: &str) -> bool {
        let removed = self.table.write().remove(id, room, self.delete_empty_rooms);
        if removed {
            tracing::debug!(connection_id = %id, room, "left room");
        }
        removed
    }

    /// Remove `id` from every room, returning the rooms it left (sorted).
    pub fn leave_all(&self, id: ConnectionId) -> Vec<String> {
        self.table.write().remove_all(id, self.delete_empty_rooms)
    }

    /// Members of `room`, sorted by id
    pub fn members(&self, room: &str) -> Vec<ConnectionId> {
        let mut members: Vec<ConnectionId> = self
            .table
            .read()
            .rooms
            .get(room)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    /// Rooms `id` belongs to, sorted
    pub fn rooms_of(&self, id: ConnectionId) -> Vec<String> {
        let mut rooms: Vec<String> = self
            .table
            .read()
            .memberships
            .get(&id)
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default();
        rooms.sort();
        rooms
    }

    pub fn contains(&self, room: &str) -> bool {
        self.table.read().rooms.contains_key(room)
    }

    pub fn room_count(&self) -> usize {
        self.table.read().rooms.len()
    }

    /// Every room with its member count, sorted by name
    pub fn summaries(&self) -> Vec<RoomSummary> {
        let mut rooms: Vec<RoomSummary> = self
            .table
            .read()
            .rooms
            .iter()
            .map(|(name, members)| RoomSummary {
                name: name.clone(),
                members: members.len(),
            })
            .collect();
        rooms.sort_by(|a, b| a.name.cmp(&b.name));
        rooms
    }

    /// Send `message` to every open member of `room` except `except`.
    ///
    /// Returns the number of connections the message was queued for.
    /// Members whose connection is gone or CLOSED are pruned; a member with a
    /// full send queue is skipped for this message only.
    pub fn broadcast(&self, room: &str, message: &Message, except: Option<ConnectionId>) -> usize {
        let members = self.members(room);
        self.stats.broadcast();

        let mut delivered = 0;
        let mut stale = Vec::new();
        for id in members {
            if Some(id) == except {
                continue;
            }
            let Some(conn) = self.registry.get(id) else {
                stale.push(id);
                continue;
            };
            match conn.ready_state() {
                ReadyState::Open => match conn.send(message.clone()) {
                    Ok(()) => delivered += 1,
                    Err(e) => {
                        tracing::debug!(connection_id = %id, room, error = %e, "broadcast skipped member")
                    }
                },
                ReadyState::Closed => stale.push(id),
                _ => {}
            }
        }

        for id in stale {
            self.leave_all(id);
            tracing::debug!(connection_id = %id, "pruned closed connection from rooms");
        }
        delivered
    }
}

impl std::fmt::Debug for RoomManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomManager")
            .field("rooms", &self.room_count())
            .field("delete_empty_rooms", &self.delete_empty_rooms)
            .finish()
    }
}

fn validate_room_name(room: &str) -> HubResult<()> {
    if room.is_empty() || room.len() > MAX_ROOM_NAME || room.chars().any(char::is_control) {
        return Err(HubError::InvalidRoom(room.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    use crate::connection::{Command, Connection, ConnectionInfo};

    struct Fixture {
        registry: Arc<ConnectionRegistry>,
        rooms: Arc<RoomManager>,
        stats: Arc<StatsTracker>,
    }

    impl Fixture {
        fn new(delete_empty: bool) -> Self {
            let registry = Arc::new(ConnectionRegistry::new(16));
            let stats = Arc::new(StatsTracker::new());
            let rooms = Arc::new(RoomManager::new(registry.clone(), stats.clone(), delete_empty));
            Self {
                registry,
                rooms,
                stats,
            }
        }

        fn open(&self, queue: usize) -> (Connection, mpsc::Receiver<Command>) {
            let (tx, rx) = mpsc::channel(queue);
            let conn = Connection::new(
                self.registry.next_id(),
                ConnectionInfo::default(),
                tx,
                self.rooms.clone(),
            );
            conn.set_ready_state(ReadyState::Open);
            self.registry.insert(conn.clone()).unwrap();
            (conn, rx)
        }
    }

    fn received(rx: &mut mpsc::Receiver<Command>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(Command::Send(Message::Text(text))) = rx.try_recv() {
            out.push(text);
        }
        out
    }

    #[test]
    fn test_join_and_leave_keep_indexes_in_sync() {
        let fx = Fixture::new(true);
        let (a, _ra) = fx.open(4);

        assert!(fx.rooms.join(a.id(), "lobby").unwrap());
        assert!(!fx.rooms.join(a.id(), "lobby").unwrap());
        fx.rooms.join(a.id(), "games").unwrap();
        assert_eq!(fx.rooms.rooms_of(a.id()), vec!["games", "lobby"]);
        assert_eq!(fx.rooms.members("lobby"), vec![a.id()]);

        assert!(fx.rooms.leave(a.id(), "lobby"));
        assert!(!fx.rooms.leave(a.id(), "lobby"));
        assert_eq!(fx.rooms.rooms_of(a.id()), vec!["games"]);
        assert!(!fx.rooms.contains("lobby"));
    }

    #[test]
    fn test_empty_rooms_kept_when_configured() {
        let fx = Fixture::new(false);
        let (a, _ra) = fx.open(4);
        fx.rooms.join(a.id(), "lobby").unwrap();
        fx.rooms.leave(a.id(), "lobby");
        assert!(fx.rooms.contains("lobby"));
        assert!(fx.rooms.members("lobby").is_empty());
    }

    #[test]
    fn test_join_rejects_bad_input() {
        let fx = Fixture::new(true);
        let (a, _ra) = fx.open(4);
        assert!(matches!(fx.rooms.join(a.id(), ""), Err(HubError::InvalidRoom(_))));
        assert!(matches!(
            fx.rooms.join(a.id(), "bad\nname"),
            Err(HubError::InvalidRoom(_))
        ));
        assert!(matches!(
            fx.rooms.join(ConnectionId(999), "lobby"),
            Err(HubError::UnknownConnection(_))
        ));

        a.set_ready_state(ReadyState::Closing);
        assert!(matches!(fx.rooms.join(a.id(), "lobby"), Err(HubError::NotOpen(_))));
    }

    #[test]
    fn test_leave_all() {
        let fx = Fixture::new(true);
        let (a, _ra) = fx.open(4);
        let (b, _rb) = fx.open(4);
        fx.rooms.join(a.id(), "x").unwrap();
        fx.rooms.join(a.id(), "y").unwrap();
        fx.rooms.join(b.id(), "y").unwrap();

        assert_eq!(fx.rooms.leave_all(a.id()), vec!["x", "y"]);
        assert!(fx.rooms.rooms_of(a.id()).is_empty());
        assert!(!fx.rooms.contains("x"));
        assert_eq!(fx.rooms.members("y"), vec![b.id()]);
        assert!(fx.rooms.leave_all(a.id()).is_empty());
    }

    #[test]
    fn test_broadcast_reaches_members_only() {
        let fx = Fixture::new(true);
        let (a, mut ra) = fx.open(4);
        let (b, mut rb) = fx.open(4);
        let (_c, mut rc) = fx.open(4);
        fx.rooms.join(a.id(), "room").unwrap();
        fx.rooms.join(b.id(), "room").unwrap();

        let sent = fx.rooms.broadcast("room", &Message::from("hello"), None);
        assert_eq!(sent, 2);
        assert_eq!(received(&mut ra), vec!["hello"]);
        assert_eq!(received(&mut rb), vec!["hello"]);
        assert!(received(&mut rc).is_empty());
        assert_eq!(fx.stats.snapshot().broadcasts, 1);
    }

    #[test]
    fn test_broadcast_except_sender() {
        let fx = Fixture::new(true);
        let (a, mut ra) = fx.open(4);
        let (b, mut rb) = fx.open(4);
        fx.rooms.join(a.id(), "room").unwrap();
        fx.rooms.join(b.id(), "room").unwrap();

        assert_eq!(a.broadcast("room", "from a"), 1);
        assert!(received(&mut ra).is_empty());
        assert_eq!(received(&mut rb), vec!["from a"]);
    }

    #[test]
    fn test_broadcast_to_unknown_room() {
        let fx = Fixture::new(true);
        assert_eq!(fx.rooms.broadcast("nowhere", &Message::from("x"), None), 0);
    }

    #[test]
    fn test_broadcast_prunes_closed_members() {
        let fx = Fixture::new(true);
        let (a, _ra) = fx.open(4);
        let (b, _rb) = fx.open(4);
        fx.rooms.join(a.id(), "room").unwrap();
        fx.rooms.join(b.id(), "room").unwrap();

        b.set_ready_state(ReadyState::Closed);
        fx.registry.remove(a.id());
        assert_eq!(fx.rooms.broadcast("room", &Message::from("x"), None), 0);
        assert!(fx.rooms.rooms_of(a.id()).is_empty());
        assert!(fx.rooms.rooms_of(b.id()).is_empty());
        assert!(!fx.rooms.contains("room"));
    }

    #[test]
    fn test_broadcast_skips_full_queue_without_pruning() {
        let fx = Fixture::new(true);
        let (a, mut ra) = fx.open(1);
        fx.rooms.join(a.id(), "room").unwrap();

        assert_eq!(fx.rooms.broadcast("room", &Message::from("1"), None), 1);
        assert_eq!(fx.rooms.broadcast("room", &Message::from("2"), None), 0);
        assert_eq!(fx.rooms.members("room"), vec![a.id()]);
        assert_eq!(received(&mut ra), vec!["1"]);
    }

    #[test]
    fn test_summaries_sorted() {
        let fx = Fixture::new(true);
        let (a, _ra) = fx.open(4);
        let (b, _rb) = fx.open(4);
        fx.rooms.join(a.id(), "zeta").unwrap();
        fx.rooms.join(a.id(), "alpha").unwrap();
        fx.rooms.join(b.id(), "alpha").unwrap();

        assert_eq!(
            fx.rooms.summaries(),
            vec![
                RoomSummary { name: "alpha".into(), members: 2 },
                RoomSummary { name: "zeta".into(), members: 1 },
            ]
        );
        assert_eq!(fx.rooms.room_count(), 2);
    }
}
