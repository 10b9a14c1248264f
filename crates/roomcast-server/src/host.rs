//! The connection host: the process-level owner of accepted sockets.
//!
//! A [`Room`](crate::room::Room) never owns sockets. It asks the host which
//! sockets are open, reads and writes the small attachment blob kept beside
//! each socket, and pushes text frames through it. Because the host outlives
//! any one room instance, a room can be dropped and restarted (hibernation)
//! and rebuild its registry from what the host still holds.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use roomcast_core::ConnectionId;
use thiserror::Error;
use tracing::debug;

use crate::websocket::connection::ClientConnection;

/// Why a frame did not reach a socket.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SendError {
    /// The socket is closed or closing.
    #[error("connection {0} is closed")]
    Closed(ConnectionId),
    /// The host has no socket with this handle.
    #[error("connection {0} is not known to the host")]
    Unknown(ConnectionId),
    /// The socket's write buffer is full; the frame was dropped.
    #[error("send buffer for connection {0} is full")]
    Full(ConnectionId),
}

/// Operations a room needs from whatever owns its sockets.
#[cfg_attr(test, mockall::automock)]
pub trait Host: Send + Sync {
    /// Handles of every socket the host still considers open.
    fn open_connections(&self) -> Vec<ConnectionId>;

    /// The attachment stored beside a socket, if any.
    fn read_attachment(&self, conn: &ConnectionId) -> Option<Vec<u8>>;

    /// Replace the attachment stored beside a socket.
    fn write_attachment(&self, conn: &ConnectionId, bytes: Vec<u8>);

    /// Queue a text frame on a socket.
    fn send(&self, conn: &ConnectionId, text: Arc<str>) -> Result<(), SendError>;

    /// Whether the socket can still receive frames.
    fn is_open(&self, conn: &ConnectionId) -> bool;

    /// Close a socket with a WebSocket close code.
    fn close(&self, conn: &ConnectionId, code: u16, reason: &str);
}

/// In-process host backed by the gateway's socket write queues.
#[derive(Default)]
pub struct LocalHost {
    sockets: RwLock<HashMap<ConnectionId, Arc<ClientConnection>>>,
    attachments: RwLock<HashMap<ConnectionId, Vec<u8>>>,
}

impl LocalHost {
    /// Empty host.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking an accepted socket.
    pub fn attach(&self, connection: Arc<ClientConnection>) {
        let id = connection.id.clone();
        let _ = self.sockets.write().insert(id.clone(), connection);
        debug!(conn_id = %id, "socket attached to host");
    }

    /// Forget a socket and its attachment.
    pub fn detach(&self, conn: &ConnectionId) {
        if let Some(connection) = self.sockets.write().remove(conn) {
            connection.mark_closed();
        }
        let _ = self.attachments.write().remove(conn);
        debug!(conn_id = %conn, "socket detached from host");
    }

    /// The socket behind a handle.
    pub fn connection(&self, conn: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.sockets.read().get(conn).cloned()
    }

    /// Number of tracked sockets, open or closing.
    pub fn socket_count(&self) -> usize {
        self.sockets.read().len()
    }
}

impl Host for LocalHost {
    fn open_connections(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self
            .sockets
            .read()
            .values()
            .filter(|c| c.is_open())
            .map(|c| c.id.clone())
            .collect();
        ids.sort();
        ids
    }

    fn read_attachment(&self, conn: &ConnectionId) -> Option<Vec<u8>> {
        self.attachments.read().get(conn).cloned()
    }

    fn write_attachment(&self, conn: &ConnectionId, bytes: Vec<u8>) {
        let _ = self.attachments.write().insert(conn.clone(), bytes);
    }

    fn send(&self, conn: &ConnectionId, text: Arc<str>) -> Result<(), SendError> {
        let connection = self
            .connection(conn)
            .ok_or_else(|| SendError::Unknown(conn.clone()))?;
        connection.send(text)
    }

    fn is_open(&self, conn: &ConnectionId) -> bool {
        self.sockets.read().get(conn).is_some_and(|c| c.is_open())
    }

    fn close(&self, conn: &ConnectionId, code: u16, reason: &str) {
        if let Some(connection) = self.connection(conn) {
            connection.request_close(code, reason);
        }
    }
}
