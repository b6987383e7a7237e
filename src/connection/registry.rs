//! Live connection table

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use super::Connection;
use crate::types::{ConnectionId, HubError, HubResult};

/// Every connection between a successful upgrade and CLOSED, keyed by id.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Connection>>,
    next_id: AtomicU64,
    max_connections: usize,
}

impl ConnectionRegistry {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            max_connections,
        }
    }

    /// Allocate an id; ids are never reused
    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a connection, refusing it once the cap is reached.
    pub fn insert(&self, conn: Connection) -> HubResult<()> {
        let mut connections = self.connections.write();
        if connections.len() >= self.max_connections {
            return Err(HubError::CapacityExceeded(self.max_connections));
        }
        connections.insert(conn.id(), conn);
        Ok(())
    }

    pub fn remove(&self, id: ConnectionId) -> Option<Connection> {
        self.connections.write().remove(&id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<Connection> {
        self.connections.read().get(&id).cloned()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.read().contains_key(&id)
    }

    pub fn count(&self) -> usize {
        self.connections.read().len()
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Snapshot of every registered connection, ordered by id
    pub fn connections(&self) -> Vec<Connection> {
        let mut all: Vec<Connection> = self.connections.read().values().cloned().collect();
        all.sort_by_key(Connection::id);
        all
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("count", &self.count())
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use crate::connection::ConnectionInfo;
    use crate::rooms::RoomManager;
    use crate::stats::StatsTracker;

    fn setup(max: usize) -> (Arc<ConnectionRegistry>, Arc<RoomManager>) {
        let registry = Arc::new(ConnectionRegistry::new(max));
        let rooms = Arc::new(RoomManager::new(
            registry.clone(),
            Arc::new(StatsTracker::new()),
            true,
        ));
        (registry, rooms)
    }

    fn make(registry: &ConnectionRegistry, rooms: &Arc<RoomManager>) -> Connection {
        let (tx, _rx) = mpsc::channel(1);
        Connection::new(registry.next_id(), ConnectionInfo::default(), tx, rooms.clone())
    }

    #[test]
    fn test_ids_are_unique() {
        let (registry, _) = setup(4);
        let a = registry.next_id();
        let b = registry.next_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_insert_get_remove() {
        let (registry, rooms) = setup(4);
        let conn = make(&registry, &rooms);
        let id = conn.id();
        registry.insert(conn).unwrap();

        assert!(registry.contains(id));
        assert_eq!(registry.get(id).map(|c| c.id()), Some(id));
        assert_eq!(registry.count(), 1);
        assert!(registry.remove(id).is_some());
        assert!(registry.get(id).is_none());
    }

    #[test]
    fn test_capacity_enforced() {
        let (registry, rooms) = setup(2);
        registry.insert(make(&registry, &rooms)).unwrap();
        registry.insert(make(&registry, &rooms)).unwrap();
        assert!(matches!(
            registry.insert(make(&registry, &rooms)),
            Err(HubError::CapacityExceeded(2))
        ));
    }

    #[test]
    fn test_connections_sorted_by_id() {
        let (registry, rooms) = setup(4);
        let first = make(&registry, &rooms);
        let second = make(&registry, &rooms);
        registry.insert(second.clone()).unwrap();
        registry.insert(first.clone()).unwrap();
        let ids: Vec<_> = registry.connections().iter().map(Connection::id).collect();
        assert_eq!(ids, vec![first.id(), second.id()]);
    }
}
