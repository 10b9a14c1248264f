//! In-memory map from open socket handle to its metadata.
//!
//! The registry is the room's view of who is connected. It is rebuilt from
//! host attachments after hibernation and mutated only while the room's
//! lock is held.

use std::collections::hash_map::{self, HashMap};
use std::collections::{BTreeMap, BTreeSet};

use roomcast_core::{ConnectionId, ConnectionMeta};

/// Socket handle to metadata, one entry per live socket.
#[derive(Clone, Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<ConnectionId, ConnectionMeta>,
}

impl SessionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `conn`. Returns the replaced metadata.
    pub fn register(&mut self, conn: ConnectionId, meta: ConnectionMeta) -> Option<ConnectionMeta> {
        self.sessions.insert(conn, meta)
    }

    /// Remove the entry for `conn`. Removing an absent handle is a no-op.
    pub fn remove(&mut self, conn: &ConnectionId) -> Option<ConnectionMeta> {
        self.sessions.remove(conn)
    }

    /// Metadata for a handle.
    pub fn get(&self, conn: &ConnectionId) -> Option<&ConnectionMeta> {
        self.sessions.get(conn)
    }

    /// Mutable metadata for a handle.
    pub fn get_mut(&mut self, conn: &ConnectionId) -> Option<&mut ConnectionMeta> {
        self.sessions.get_mut(conn)
    }

    /// Whether a handle is registered.
    pub fn contains(&self, conn: &ConnectionId) -> bool {
        self.sessions.contains_key(conn)
    }

    /// Number of registered sockets.
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no sockets are registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Distinct user ids across all sessions, sorted.
    pub fn list_user_ids(&self) -> BTreeSet<String> {
        self.sessions.values().map(|m| m.user_id.clone()).collect()
    }

    /// Handles of every socket belonging to `user_id`, sorted.
    pub fn sessions_for_user(&self, user_id: &str) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self
            .sessions
            .iter()
            .filter(|(_, m)| m.user_id == user_id)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Handles of every socket in `channel`, sorted.
    pub fn sessions_in_channel(&self, channel: &str) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self
            .sessions
            .iter()
            .filter(|(_, m)| m.in_channel(channel))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Iterate over all entries in arbitrary order.
    pub fn iter(&self) -> hash_map::Iter<'_, ConnectionId, ConnectionMeta> {
        self.sessions.iter()
    }

    /// Sorted copy of every entry.
    pub fn snapshot(&self) -> BTreeMap<ConnectionId, ConnectionMeta> {
        self.sessions
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.sessions.clear();
    }
}
