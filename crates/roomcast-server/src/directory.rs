//! Named rooms served by one gateway.
//!
//! Each name maps to a [`RoomSlot`]: a socket host and a storage backend that
//! live as long as the gateway, plus the currently running [`Room`]. The
//! running instance can be dropped and rebuilt ([`RoomSlot::restart`]) while
//! sockets stay attached to the host, which is how hibernation is modelled.
//!
//! Socket traffic goes through the slot ([`RoomSlot::accept`],
//! [`RoomSlot::handle_text`], [`RoomSlot::disconnect`]) under a shared gate
//! that a restart holds exclusively, so a socket admitted by the old instance
//! always has its attachment written before the new instance reconciles.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use parking_lot::RwLock;
use roomcast_core::{ConnectionId, ConnectionMeta};
use tokio::sync::{Mutex, RwLock as AsyncRwLock};
use tracing::info;

use crate::handshake::{ConnectRequest, HandshakeError};
use crate::host::LocalHost;
use crate::metrics::ROOMS_STARTED_TOTAL;
use crate::room::{Room, RoomDefinition};
use crate::storage::{MemoryStorage, Storage};

/// Long-lived state for one room name.
pub struct RoomSlot {
    name: String,
    host: Arc<LocalHost>,
    storage: Arc<dyn Storage>,
    room: RwLock<Arc<Room>>,
    gate: AsyncRwLock<()>,
}

impl RoomSlot {
    async fn start(name: &str, definition: Arc<RoomDefinition>) -> Self {
        let host = Arc::new(LocalHost::new());
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let room = Room::start(name, definition, host.clone(), Arc::clone(&storage)).await;
        counter!(ROOMS_STARTED_TOTAL).increment(1);
        Self {
            name: name.to_owned(),
            host,
            storage,
            room: RwLock::new(Arc::new(room)),
            gate: AsyncRwLock::new(()),
        }
    }

    /// Room name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The running instance.
    pub fn room(&self) -> Arc<Room> {
        self.room.read().clone()
    }

    /// Socket host shared by every instance of this room.
    pub fn host(&self) -> &Arc<LocalHost> {
        &self.host
    }

    /// Storage shared by every instance of this room.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Admit a socket on the running instance.
    pub async fn accept(
        &self,
        conn: &ConnectionId,
        request: &ConnectRequest,
    ) -> Result<ConnectionMeta, HandshakeError> {
        let _gate = self.gate.read().await;
        self.room().accept(conn, request).await
    }

    /// Hand one inbound text frame to the running instance.
    pub async fn handle_text(&self, conn: &ConnectionId, text: &str) {
        let _gate = self.gate.read().await;
        self.room().handle_text(conn, text).await;
    }

    /// Report a closed socket to the running instance.
    pub async fn disconnect(&self, conn: &ConnectionId) {
        let _gate = self.gate.read().await;
        self.room().disconnect(conn).await;
    }

    /// Drop the in-memory instance and start a fresh one against the same
    /// sockets and storage. Waits for in-flight socket work on the old
    /// instance and holds new work until the swap. Returns the new instance.
    pub async fn restart(&self, definition: Arc<RoomDefinition>) -> Arc<Room> {
        let _gate = self.gate.write().await;
        let room = Arc::new(
            Room::start(
                &self.name,
                definition,
                self.host.clone(),
                Arc::clone(&self.storage),
            )
            .await,
        );
        counter!(ROOMS_STARTED_TOTAL).increment(1);
        *self.room.write() = Arc::clone(&room);
        info!(
            room = %self.name,
            restored = room.restored().restored,
            skipped = room.restored().skipped.len(),
            "room woke from hibernation"
        );
        room
    }
}

/// Rooms keyed by name, started lazily on first connect.
pub struct RoomDirectory {
    definition: Arc<RoomDefinition>,
    rooms: Mutex<HashMap<String, Arc<RoomSlot>>>,
}

impl RoomDirectory {
    /// Empty directory; every room shares `definition`.
    pub fn new(definition: Arc<RoomDefinition>) -> Self {
        Self {
            definition,
            rooms: Mutex::new(HashMap::new()),
        }
    }

    /// Shared room definition.
    pub fn definition(&self) -> &Arc<RoomDefinition> {
        &self.definition
    }

    /// The slot for `name`, starting the room if it is not running.
    pub async fn get_or_start(&self, name: &str) -> Arc<RoomSlot> {
        let mut rooms = self.rooms.lock().await;
        if let Some(slot) = rooms.get(name) {
            return Arc::clone(slot);
        }
        let slot = Arc::new(RoomSlot::start(name, Arc::clone(&self.definition)).await);
        let _ = rooms.insert(name.to_owned(), Arc::clone(&slot));
        slot
    }

    /// The slot for `name` if the room has been started.
    pub async fn get(&self, name: &str) -> Option<Arc<RoomSlot>> {
        self.rooms.lock().await.get(name).cloned()
    }

    /// Simulate eviction of a room's memory. Returns `false` for unknown rooms.
    pub async fn hibernate(&self, name: &str) -> bool {
        let Some(slot) = self.get(name).await else {
            return false;
        };
        let _ = slot.restart(Arc::clone(&self.definition)).await;
        true
    }

    /// Rooms started so far.
    pub async fn room_count(&self) -> usize {
        self.rooms.lock().await.len()
    }

    /// Open sockets across every room.
    pub async fn connection_count(&self) -> usize {
        self.rooms
            .lock()
            .await
            .values()
            .map(|slot| slot.host.socket_count())
            .sum()
    }
}
