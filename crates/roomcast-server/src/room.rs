//! One room instance and the context its handlers run in.
//!
//! A [`RoomDefinition`] (event table plus hooks) is declared once and
//! shared. A [`Room`] is one running instance of it: it owns a session
//! registry behind its own async mutex, so events for one room are handled
//! one at a time while different rooms proceed in parallel. Dropping a room
//! and calling [`Room::start`] again on the same host is a hibernation
//! cycle; the new instance rebuilds its registry from socket attachments.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use roomcast_core::frame::{self, ERROR_FRAME, PING_FRAME, PONG_FRAME};
use roomcast_core::{ConnectionId, ConnectionMeta, Frame};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::address::{self, Target};
use crate::attachment;
use crate::dispatch::{DispatchOutcome, EventTable, HandlerError};
use crate::handshake::{ConnectRequest, HandshakeError, extract_query_meta};
use crate::host::Host;
use crate::metrics::{
    CONNECTIONS_ACCEPTED_TOTAL, CONNECTIONS_REJECTED_TOTAL, FRAMES_MALFORMED_TOTAL,
    FRAMES_RECEIVED_TOTAL, SESSIONS_RESTORED_TOTAL, SESSIONS_SKIPPED_TOTAL,
};
use crate::reconcile::{ReconcileReport, reconcile};
use crate::registry::SessionRegistry;
use crate::router::{self, BroadcastFilter, Delivery};
use crate::storage::Storage;

/// Default cap on sockets per room.
pub const DEFAULT_MAX_CONNECTIONS: usize = 1000;

/// Application callbacks invoked by a room. Every method has a default.
#[async_trait]
pub trait RoomHooks: Send + Sync {
    /// Turn a connection request into metadata, or refuse it.
    async fn extract_meta(&self, request: &ConnectRequest) -> Result<ConnectionMeta, HandshakeError> {
        extract_query_meta(request)
    }

    /// A socket was accepted and registered.
    async fn on_connect(&self, _ctx: &mut RoomContext<'_>) -> Result<(), HandlerError> {
        Ok(())
    }

    /// A socket left the registry. `meta` is its last metadata.
    async fn on_disconnect(
        &self,
        _ctx: &mut RoomContext<'_>,
        _meta: &ConnectionMeta,
    ) -> Result<(), HandlerError> {
        Ok(())
    }

    /// A frame arrived that no event handler matched.
    async fn on_message(&self, _ctx: &mut RoomContext<'_>, frame: &Frame) -> Result<(), HandlerError> {
        debug!(event = frame.event_name(), "no handler for event");
        Ok(())
    }

    /// A handler or hook failed. Called after the failure is logged.
    async fn on_error(&self, _conn: Option<&ConnectionId>, _error: &HandlerError) {}

    /// The registry was rebuilt after a restart.
    async fn on_hibernation_restore(&self, _ctx: &mut RoomContext<'_>) -> Result<(), HandlerError> {
        Ok(())
    }
}

/// Hooks that keep every default.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultHooks;

impl RoomHooks for DefaultHooks {}

/// Everything that survives a room restart: handlers, hooks, limits.
pub struct RoomDefinition {
    events: EventTable,
    hooks: Arc<dyn RoomHooks>,
    max_connections: usize,
}

impl RoomDefinition {
    /// Definition from an event table and hooks.
    pub fn new(events: EventTable, hooks: impl RoomHooks + 'static) -> Self {
        Self {
            events,
            hooks: Arc::new(hooks),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }

    /// Cap sockets per room instance.
    #[must_use]
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// The event table.
    pub fn events(&self) -> &EventTable {
        &self.events
    }

    /// The hooks.
    pub fn hooks(&self) -> &dyn RoomHooks {
        &*self.hooks
    }

    /// Socket cap.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

/// What a handler or hook can see and do while the room lock is held.
pub struct RoomContext<'a> {
    room: &'a str,
    connection: Option<&'a ConnectionId>,
    channel: Option<String>,
    event: Option<String>,
    registry: &'a mut SessionRegistry,
    host: &'a dyn Host,
    storage: &'a dyn Storage,
    pruned: Vec<(ConnectionId, ConnectionMeta)>,
}

impl<'a> RoomContext<'a> {
    /// Context for `connection` (or none, for room-level hooks).
    pub fn new(
        room: &'a str,
        connection: Option<&'a ConnectionId>,
        channel: Option<String>,
        registry: &'a mut SessionRegistry,
        host: &'a dyn Host,
        storage: &'a dyn Storage,
    ) -> Self {
        Self {
            room,
            connection,
            channel,
            event: None,
            registry,
            host,
            storage,
            pruned: Vec::new(),
        }
    }

    /// Room name.
    pub fn room(&self) -> &str {
        self.room
    }

    /// Socket the current event came from.
    pub fn connection_id(&self) -> Option<&ConnectionId> {
        self.connection
    }

    /// Metadata of the current socket, if still registered.
    pub fn meta(&self) -> Option<&ConnectionMeta> {
        self.registry.get(self.connection?)
    }

    /// User id of the current socket.
    pub fn user_id(&self) -> Option<&str> {
        self.meta().map(|m| m.user_id.as_str())
    }

    /// `channel` field of the inbound frame.
    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    /// Effective name of the event being handled, routed wrapper unwrapped.
    /// `None` inside connect, disconnect and restore hooks.
    pub fn event(&self) -> Option<&str> {
        self.event.as_deref()
    }

    pub(crate) fn set_event(&mut self, event: &str) {
        self.event = Some(event.to_owned());
    }

    /// The live registry.
    pub fn registry(&self) -> &SessionRegistry {
        &*self.registry
    }

    /// Durable storage.
    pub fn storage(&self) -> &dyn Storage {
        self.storage
    }

    /// Send a plain `{type, data}` frame back to the current socket.
    pub fn reply(&mut self, event: &str, data: Option<Value>) -> bool {
        let Some(conn) = self.connection else {
            return false;
        };
        let mut frame = Frame::new(event);
        frame.data = data;
        self.send_frame(conn, &frame)
    }

    /// Send a frame to one registered socket.
    pub fn send_frame(&mut self, conn: &ConnectionId, frame: &Frame) -> bool {
        let Some(text) = encode_shared(frame) else {
            return false;
        };
        let delivery = router::route_one(self.registry, self.host, conn, &text);
        self.absorb(delivery) == 1
    }

    /// Broadcast an event to a channel. Returns the number of sockets reached.
    pub fn broadcast(
        &mut self,
        channel: &str,
        event: &str,
        payload: Option<Value>,
        filter: &BroadcastFilter,
    ) -> usize {
        let Some(text) = encode_shared(&Frame::routed(event, Some(channel), payload)) else {
            return 0;
        };
        let delivery = router::route_channel(self.registry, self.host, channel, &text, filter);
        self.absorb(delivery)
    }

    /// Send an event to every socket of a user, optionally only those in
    /// `channel`.
    pub fn send_to_user(
        &mut self,
        user_id: &str,
        channel: Option<&str>,
        event: &str,
        payload: Option<Value>,
    ) -> usize {
        let Some(text) = encode_shared(&Frame::routed(event, channel, payload)) else {
            return 0;
        };
        let delivery = router::route_user(
            self.registry,
            self.host,
            user_id,
            channel,
            &text,
            &BroadcastFilter::none(),
        );
        self.absorb(delivery)
    }

    /// Emit to a channel the current socket belongs to, or else to a user.
    pub fn emit_to(&mut self, target: &str, event: &str, payload: Option<Value>) -> usize {
        match address::resolve(target, self.meta()) {
            Target::Channel(channel) => {
                self.broadcast(&channel, event, payload, &BroadcastFilter::none())
            }
            Target::User(user_id) => self.send_to_user(&user_id, None, event, payload),
        }
    }

    /// Add the current socket to a channel and re-persist its attachment.
    pub fn join_channel(&mut self, channel: &str) -> bool {
        match self.connection.cloned() {
            Some(conn) => self.join_channel_for(&conn, channel),
            None => false,
        }
    }

    /// Remove the current socket from a channel and re-persist its attachment.
    pub fn leave_channel(&mut self, channel: &str) -> bool {
        match self.connection.cloned() {
            Some(conn) => self.leave_channel_for(&conn, channel),
            None => false,
        }
    }

    /// Add any registered socket to a channel.
    pub fn join_channel_for(&mut self, conn: &ConnectionId, channel: &str) -> bool {
        self.update_channels(conn, |meta| meta.join(channel))
    }

    /// Remove any registered socket from a channel.
    pub fn leave_channel_for(&mut self, conn: &ConnectionId, channel: &str) -> bool {
        self.update_channels(conn, |meta| meta.leave(channel))
    }

    /// Close a socket. It leaves the registry when the host reports the
    /// disconnect.
    pub fn close(&self, conn: &ConnectionId, code: u16, reason: &str) {
        self.host.close(conn, code, reason);
    }

    fn update_channels(
        &mut self,
        conn: &ConnectionId,
        change: impl FnOnce(&mut ConnectionMeta) -> bool,
    ) -> bool {
        let Some(meta) = self.registry.get_mut(conn) else {
            return false;
        };
        if !change(meta) {
            return false;
        }
        if let Err(error) = attachment::persist(self.host, conn, meta) {
            warn!(room = self.room, conn_id = %conn, %error, "failed to re-persist attachment");
        }
        debug!(room = self.room, conn_id = %conn, channels = ?meta.channels, "channels updated");
        true
    }

    fn absorb(&mut self, delivery: Delivery) -> usize {
        self.pruned.extend(delivery.pruned);
        delivery.sent
    }

    fn into_pruned(self) -> Vec<(ConnectionId, ConnectionMeta)> {
        self.pruned
    }
}

fn encode_shared(frame: &Frame) -> Option<Arc<str>> {
    match frame::encode(frame) {
        Ok(text) => Some(Arc::from(text)),
        Err(error) => {
            warn!(event = frame.event_name(), %error, "failed to encode frame");
            None
        }
    }
}

/// One running instance of a room.
pub struct Room {
    name: String,
    definition: Arc<RoomDefinition>,
    host: Arc<dyn Host>,
    storage: Arc<dyn Storage>,
    registry: Mutex<SessionRegistry>,
    restored: ReconcileReport,
}

impl Room {
    /// Start an instance: rebuild the registry from the host, then run the
    /// restore hook. Hook failures are reported and do not stop the room.
    pub async fn start(
        name: impl Into<String>,
        definition: Arc<RoomDefinition>,
        host: Arc<dyn Host>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        let name = name.into();
        let mut registry = SessionRegistry::new();
        let report = reconcile(&*host, &mut registry);
        counter!(SESSIONS_RESTORED_TOTAL).increment(report.restored as u64);
        counter!(SESSIONS_SKIPPED_TOTAL).increment(report.skipped.len() as u64);

        let room = Self {
            name,
            definition,
            host,
            storage,
            registry: Mutex::new(registry),
            restored: report,
        };
        {
            let mut registry = room.registry.lock().await;
            let mut ctx = room.context(&mut registry, None, None);
            let result = room.definition.hooks.on_hibernation_restore(&mut ctx).await;
            let pruned = ctx.into_pruned();
            if let Err(err) = result {
                room.report(None, "hibernation_restore", err).await;
            }
            room.finish(&mut registry, pruned).await;
        }
        info!(room = %room.name, restored = room.restored.restored, "room started");
        room
    }

    /// Room name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reconciliation result from [`Room::start`].
    pub fn restored(&self) -> &ReconcileReport {
        &self.restored
    }

    /// Shared definition.
    pub fn definition(&self) -> &Arc<RoomDefinition> {
        &self.definition
    }

    /// Admit a socket: extract metadata, persist the attachment, register,
    /// then run `on_connect`. A refused socket is closed with the error's
    /// close code and never registered.
    pub async fn accept(
        &self,
        conn: &ConnectionId,
        request: &ConnectRequest,
    ) -> Result<ConnectionMeta, HandshakeError> {
        let mut registry = self.registry.lock().await;
        let admitted = match self.definition.hooks.extract_meta(request).await {
            Ok(_) if registry.count() >= self.definition.max_connections => {
                Err(HandshakeError::RoomFull(self.definition.max_connections))
            }
            Ok(meta) => attachment::persist(&*self.host, conn, &meta)
                .map(|()| meta)
                .map_err(HandshakeError::from),
            Err(err) => Err(err),
        };
        let meta = match admitted {
            Ok(meta) => meta,
            Err(err) => {
                warn!(room = %self.name, conn_id = %conn, error = %err, "connection rejected");
                counter!(CONNECTIONS_REJECTED_TOTAL).increment(1);
                self.host.close(conn, err.close_code(), err.close_reason());
                return Err(err);
            }
        };

        let _ = registry.register(conn.clone(), meta.clone());
        counter!(CONNECTIONS_ACCEPTED_TOTAL).increment(1);
        info!(
            room = %self.name,
            conn_id = %conn,
            user_id = %meta.user_id,
            channels = ?meta.channels,
            "connection accepted"
        );

        let mut ctx = self.context(&mut registry, Some(conn), None);
        let result = self.definition.hooks.on_connect(&mut ctx).await;
        let pruned = ctx.into_pruned();
        if let Err(err) = result {
            self.report(Some(conn), "connect", err).await;
        }
        self.finish(&mut registry, pruned).await;
        Ok(meta)
    }

    /// Decode and handle one inbound text frame. Malformed input is logged
    /// and dropped; the socket stays open.
    pub async fn handle_text(&self, conn: &ConnectionId, text: &str) {
        counter!(FRAMES_RECEIVED_TOTAL).increment(1);
        match frame::decode(text) {
            Ok(frame) => self.handle_frame(conn, frame).await,
            Err(error) => {
                counter!(FRAMES_MALFORMED_TOTAL).increment(1);
                warn!(room = %self.name, conn_id = %conn, %error, "dropping malformed frame");
            }
        }
    }

    /// Handle one decoded frame from a registered socket.
    pub async fn handle_frame(&self, conn: &ConnectionId, frame: Frame) {
        let mut registry = self.registry.lock().await;
        if !registry.contains(conn) {
            debug!(room = %self.name, conn_id = %conn, "frame from unregistered socket");
            return;
        }

        if frame.kind == PING_FRAME {
            let mut ctx = self.context(&mut registry, Some(conn), None);
            let _ = ctx.send_frame(conn, &Frame::new(PONG_FRAME));
            let pruned = ctx.into_pruned();
            self.finish(&mut registry, pruned).await;
            return;
        }

        let event = frame.event_name().to_owned();
        let data = frame.event_data();
        let mut ctx = self.context(&mut registry, Some(conn), frame.channel.clone());
        let errors = match self.definition.events.dispatch(&event, &mut ctx, data).await {
            DispatchOutcome::Handled { errors, .. } => errors,
            DispatchOutcome::Unhandled => {
                match self.definition.hooks.on_message(&mut ctx, &frame).await {
                    Ok(()) => Vec::new(),
                    Err(err) => vec![err],
                }
            }
        };
        let pruned = ctx.into_pruned();
        for err in errors {
            self.report(Some(conn), &event, err).await;
        }
        self.finish(&mut registry, pruned).await;
    }

    /// The host reported that a socket closed. Unknown sockets are ignored.
    pub async fn disconnect(&self, conn: &ConnectionId) {
        let mut registry = self.registry.lock().await;
        let Some(meta) = registry.remove(conn) else {
            debug!(room = %self.name, conn_id = %conn, "disconnect for unregistered socket");
            return;
        };
        info!(room = %self.name, conn_id = %conn, user_id = %meta.user_id, "connection closed");
        self.finish(&mut registry, vec![(conn.clone(), meta)]).await;
    }

    /// Run `f` against a room-level context (no current socket).
    pub async fn with_context<R>(&self, f: impl FnOnce(&mut RoomContext<'_>) -> R) -> R {
        let mut registry = self.registry.lock().await;
        let mut ctx = self.context(&mut registry, None, None);
        let out = f(&mut ctx);
        let pruned = ctx.into_pruned();
        self.finish(&mut registry, pruned).await;
        out
    }

    /// Broadcast an event to a channel from outside any handler.
    pub async fn broadcast(
        &self,
        channel: &str,
        event: &str,
        payload: Option<Value>,
        filter: &BroadcastFilter,
    ) -> usize {
        self.with_context(|ctx| ctx.broadcast(channel, event, payload, filter))
            .await
    }

    /// Send an event to a user's sockets from outside any handler.
    pub async fn send_to_user(
        &self,
        user_id: &str,
        channel: Option<&str>,
        event: &str,
        payload: Option<Value>,
    ) -> usize {
        self.with_context(|ctx| ctx.send_to_user(user_id, channel, event, payload))
            .await
    }

    /// Emit on behalf of `from`, resolving `target` against its channels.
    pub async fn emit_to(
        &self,
        from: &ConnectionId,
        target: &str,
        event: &str,
        payload: Option<Value>,
    ) -> usize {
        let mut registry = self.registry.lock().await;
        let mut ctx = self.context(&mut registry, Some(from), None);
        let sent = ctx.emit_to(target, event, payload);
        let pruned = ctx.into_pruned();
        self.finish(&mut registry, pruned).await;
        sent
    }

    /// Add a socket to a channel and re-persist its attachment.
    pub async fn join_channel(&self, conn: &ConnectionId, channel: &str) -> bool {
        self.with_context(|ctx| ctx.join_channel_for(conn, channel)).await
    }

    /// Remove a socket from a channel and re-persist its attachment.
    pub async fn leave_channel(&self, conn: &ConnectionId, channel: &str) -> bool {
        self.with_context(|ctx| ctx.leave_channel_for(conn, channel)).await
    }

    /// Number of registered sockets.
    pub async fn session_count(&self) -> usize {
        self.registry.lock().await.count()
    }

    /// Distinct connected user ids.
    pub async fn user_ids(&self) -> Vec<String> {
        self.registry.lock().await.list_user_ids().into_iter().collect()
    }

    /// Metadata of one socket.
    pub async fn meta(&self, conn: &ConnectionId) -> Option<ConnectionMeta> {
        self.registry.lock().await.get(conn).cloned()
    }

    /// Sorted copy of the registry.
    pub async fn snapshot(&self) -> BTreeMap<ConnectionId, ConnectionMeta> {
        self.registry.lock().await.snapshot()
    }

    fn context<'a>(
        &'a self,
        registry: &'a mut SessionRegistry,
        conn: Option<&'a ConnectionId>,
        channel: Option<String>,
    ) -> RoomContext<'a> {
        RoomContext::new(&self.name, conn, channel, registry, &*self.host, &*self.storage)
    }

    /// Run `on_disconnect` for sockets that left the registry, including
    /// any pruned while those hooks broadcast.
    async fn finish(
        &self,
        registry: &mut SessionRegistry,
        mut gone: Vec<(ConnectionId, ConnectionMeta)>,
    ) {
        while let Some((conn, meta)) = gone.pop() {
            let mut ctx = self.context(registry, Some(&conn), None);
            let result = self.definition.hooks.on_disconnect(&mut ctx, &meta).await;
            gone.extend(ctx.into_pruned());
            if let Err(err) = result {
                self.report(None, "disconnect", err).await;
            }
        }
    }

    /// Log a handler failure, pass it to `on_error`, and send the peer a
    /// generic error frame.
    async fn report(&self, conn: Option<&ConnectionId>, event: &str, err: HandlerError) {
        error!(
            room = %self.name,
            conn_id = conn.map(ConnectionId::as_str),
            event,
            error = %err,
            "handler failed"
        );
        self.definition.hooks.on_error(conn, &err).await;
        if let Some(conn) = conn {
            let frame = Frame::new(ERROR_FRAME).with_data(json!({ "message": "internal error" }));
            if let Some(text) = encode_shared(&frame) {
                let _ = self.host.send(conn, text);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::handler_fn;
    use crate::host::LocalHost;
    use crate::storage::MemoryStorage;
    use crate::websocket::connection::{ClientConnection, Outbound};
    use assert_matches::assert_matches;
    use parking_lot::Mutex as SyncMutex;
    use roomcast_core::logging::capture_logs;
    use tokio::sync::mpsc;
    use tracing::Level;

    struct Harness {
        host: Arc<LocalHost>,
        storage: Arc<MemoryStorage>,
        definition: Arc<RoomDefinition>,
    }

    impl Harness {
        fn new(definition: RoomDefinition) -> Self {
            Self {
                host: Arc::new(LocalHost::new()),
                storage: Arc::new(MemoryStorage::new()),
                definition: Arc::new(definition),
            }
        }

        async fn start(&self) -> Room {
            Room::start(
                "lobby",
                Arc::clone(&self.definition),
                self.host.clone(),
                self.storage.clone(),
            )
            .await
        }

        fn socket(&self, id: &str) -> mpsc::Receiver<Outbound> {
            let (tx, rx) = mpsc::channel(32);
            self.host
                .attach(Arc::new(ClientConnection::new(id.into(), tx)));
            rx
        }

        async fn join(&self, room: &Room, id: &str, user: &str, channels: &str) -> mpsc::Receiver<Outbound> {
            let rx = self.socket(id);
            let req = ConnectRequest::new("lobby", [("userId", user), ("channels", channels)]);
            let _ = room.accept(&id.into(), &req).await.unwrap();
            rx
        }
    }

    fn texts(rx: &mut mpsc::Receiver<Outbound>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(item) = rx.try_recv() {
            if let Outbound::Text(text) = item {
                out.push(serde_json::from_str(&text).unwrap());
            }
        }
        out
    }

    fn echo_table() -> EventTable {
        let mut events = EventTable::new();
        let _ = events.on(
            "chat",
            handler_fn(|ctx, data| {
                let channel = ctx.channel().unwrap_or("default").to_owned();
                let _ = ctx.broadcast(&channel, "chat", data, &BroadcastFilter::none());
                Ok(())
            }),
        );
        events
    }

    #[tokio::test]
    async fn accept_registers_and_persists() {
        let h = Harness::new(RoomDefinition::new(EventTable::new(), DefaultHooks));
        let room = h.start().await;
        let _rx = h.join(&room, "k1", "alice", "lobby,vip").await;
        assert_eq!(room.session_count().await, 1);
        let stored = attachment::restore(&*h.host, &"k1".into()).unwrap();
        assert_eq!(stored.channels, vec!["lobby", "vip"]);
    }

    #[tokio::test]
    async fn rejected_handshake_closes_and_never_registers() {
        let h = Harness::new(RoomDefinition::new(EventTable::new(), DefaultHooks));
        let room = h.start().await;
        let mut rx = h.socket("k1");
        let err = room
            .accept(&"k1".into(), &ConnectRequest::new("lobby", [("channels", "x")]))
            .await
            .unwrap_err();
        assert_matches!(err, HandshakeError::MissingParam("userId"));
        assert_eq!(room.session_count().await, 0);
        assert_matches!(rx.try_recv(), Ok(Outbound::Close { code: 1008, .. }));
    }

    #[tokio::test]
    async fn room_full_is_rejected() {
        let h = Harness::new(RoomDefinition::new(EventTable::new(), DefaultHooks).with_max_connections(1));
        let room = h.start().await;
        let _rx = h.join(&room, "k1", "alice", "").await;
        let _rx2 = h.socket("k2");
        let err = room
            .accept(&"k2".into(), &ConnectRequest::new("lobby", [("userId", "bob")]))
            .await
            .unwrap_err();
        assert_matches!(err, HandshakeError::RoomFull(1));
        assert!(attachment::restore(&*h.host, &"k2".into()).is_err());
    }

    #[tokio::test]
    async fn channel_broadcast_reaches_members_only() {
        let h = Harness::new(RoomDefinition::new(echo_table(), DefaultHooks));
        let room = h.start().await;
        let mut a = h.join(&room, "a", "alice", "default,vip").await;
        let mut b = h.join(&room, "b", "bob", "default").await;

        let sent = room.broadcast("vip", "promo", Some(json!({"x": 1})), &BroadcastFilter::none()).await;
        assert_eq!(sent, 1);
        assert_eq!(
            texts(&mut a),
            vec![json!({"type": "event", "channel": "vip", "data": {"type": "promo", "x": 1}})]
        );
        assert!(texts(&mut b).is_empty());
    }

    #[tokio::test]
    async fn send_to_user_reaches_every_session() {
        let h = Harness::new(RoomDefinition::new(EventTable::new(), DefaultHooks));
        let room = h.start().await;
        let mut a1 = h.join(&room, "a1", "alice", "default").await;
        let mut a2 = h.join(&room, "a2", "alice", "default").await;
        let _b = h.join(&room, "b", "bob", "default").await;
        assert_eq!(room.send_to_user("alice", Some("default"), "dm", None).await, 2);
        assert_eq!(texts(&mut a1).len(), 1);
        assert_eq!(texts(&mut a2).len(), 1);
        assert_eq!(room.send_to_user("alice", Some("vip"), "dm", None).await, 0);
    }

    #[tokio::test]
    async fn inbound_event_is_dispatched_with_channel() {
        let h = Harness::new(RoomDefinition::new(echo_table(), DefaultHooks));
        let room = h.start().await;
        let mut a = h.join(&room, "a", "alice", "lobby").await;
        let mut b = h.join(&room, "b", "bob", "lobby").await;
        room.handle_text(&"a".into(), r#"{"type":"chat","channel":"lobby","data":{"text":"hi"}}"#)
            .await;
        let expected = json!({"type": "event", "channel": "lobby", "data": {"type": "chat", "text": "hi"}});
        assert_eq!(texts(&mut a), vec![expected.clone()]);
        assert_eq!(texts(&mut b), vec![expected]);
    }

    #[tokio::test]
    async fn ping_gets_pong() {
        let h = Harness::new(RoomDefinition::new(EventTable::new(), DefaultHooks));
        let room = h.start().await;
        let mut a = h.join(&room, "a", "alice", "").await;
        room.handle_text(&"a".into(), r#"{"type":"ping"}"#).await;
        assert_eq!(texts(&mut a), vec![json!({"type": "pong"})]);
    }

    #[tokio::test]
    async fn malformed_frame_is_logged_and_dropped() {
        let h = Harness::new(RoomDefinition::new(echo_table(), DefaultHooks));
        let room = h.start().await;
        let mut a = h.join(&room, "a", "alice", "").await;
        let (logs, _guard) = capture_logs();
        room.handle_text(&"a".into(), "{not json").await;
        room.handle_text(&"a".into(), r#"{"type":42}"#).await;
        assert_eq!(logs.count_at_level(Level::WARN), 2);
        assert!(logs.has_message("dropping malformed frame"));
        assert!(texts(&mut a).is_empty());
        assert_eq!(room.session_count().await, 1);
    }

    #[derive(Default)]
    struct Recorder {
        calls: SyncMutex<Vec<String>>,
    }

    #[async_trait]
    impl RoomHooks for Arc<Recorder> {
        async fn on_connect(&self, ctx: &mut RoomContext<'_>) -> Result<(), HandlerError> {
            self.calls.lock().push(format!("connect:{}", ctx.user_id().unwrap_or("?")));
            Ok(())
        }

        async fn on_disconnect(&self, _ctx: &mut RoomContext<'_>, meta: &ConnectionMeta) -> Result<(), HandlerError> {
            self.calls.lock().push(format!("disconnect:{}", meta.user_id));
            Ok(())
        }

        async fn on_message(&self, _ctx: &mut RoomContext<'_>, frame: &Frame) -> Result<(), HandlerError> {
            self.calls.lock().push(format!("message:{}", frame.event_name()));
            Err(HandlerError::Failed("secret detail".into()))
        }

        async fn on_error(&self, _conn: Option<&ConnectionId>, error: &HandlerError) {
            self.calls.lock().push(format!("error:{error}"));
        }

        async fn on_hibernation_restore(&self, ctx: &mut RoomContext<'_>) -> Result<(), HandlerError> {
            self.calls.lock().push(format!("restore:{}", ctx.registry().count()));
            Err(HandlerError::Failed("restore failed".into()))
        }
    }

    #[tokio::test]
    async fn unhandled_frame_goes_to_on_message_and_errors_are_generic() {
        let recorder = Arc::new(Recorder::default());
        let h = Harness::new(RoomDefinition::new(EventTable::new(), Arc::clone(&recorder)));
        let room = h.start().await;
        let mut a = h.join(&room, "a", "alice", "").await;
        room.handle_text(&"a".into(), r#"{"type":"mystery"}"#).await;

        let calls = recorder.calls.lock().clone();
        assert_eq!(
            calls,
            vec![
                "restore:0",
                "error:restore failed",
                "connect:alice",
                "message:mystery",
                "error:secret detail"
            ]
        );
        let frames = texts(&mut a);
        assert_eq!(frames, vec![json!({"type": "error", "data": {"message": "internal error"}})]);
    }

    #[tokio::test]
    async fn disconnect_runs_hook_once() {
        let recorder = Arc::new(Recorder::default());
        let h = Harness::new(RoomDefinition::new(EventTable::new(), Arc::clone(&recorder)));
        let room = h.start().await;
        let _a = h.join(&room, "a", "alice", "").await;
        room.disconnect(&"a".into()).await;
        room.disconnect(&"a".into()).await;
        let disconnects = recorder
            .calls
            .lock()
            .iter()
            .filter(|c| c.starts_with("disconnect"))
            .count();
        assert_eq!(disconnects, 1);
        assert_eq!(room.session_count().await, 0);
    }

    #[tokio::test]
    async fn pruned_socket_triggers_disconnect_hook() {
        let recorder = Arc::new(Recorder::default());
        let h = Harness::new(RoomDefinition::new(EventTable::new(), Arc::clone(&recorder)));
        let room = h.start().await;
        let _a = h.join(&room, "a", "alice", "").await;
        let b = h.join(&room, "b", "bob", "").await;
        drop(b);
        assert_eq!(room.broadcast("default", "x", None, &BroadcastFilter::none()).await, 1);
        assert_eq!(room.session_count().await, 1);
        assert!(recorder.calls.lock().contains(&"disconnect:bob".to_owned()));
    }

    #[tokio::test]
    async fn restart_rebuilds_registry_and_keeps_handlers() {
        let h = Harness::new(RoomDefinition::new(echo_table(), DefaultHooks));
        let room = h.start().await;
        let mut a = h.join(&room, "a", "alice", "lobby").await;
        let _b = h.join(&room, "b", "bob", "lobby").await;
        assert!(room.join_channel(&"a".into(), "vip").await);
        drop(room);

        // Corrupt one attachment to check partial restoration.
        h.host.write_attachment(&"b".into(), b"oops".to_vec());
        let room = h.start().await;
        assert_eq!(room.restored().restored, 1);
        assert_eq!(room.restored().skipped, vec![ConnectionId::from("b")]);
        assert!(room.meta(&"a".into()).await.unwrap().in_channel("vip"));

        room.handle_text(&"a".into(), r#"{"type":"chat","channel":"vip","data":{"n":1}}"#)
            .await;
        assert_eq!(texts(&mut a).len(), 1);
    }

    #[tokio::test]
    async fn corrupt_attachment_is_skipped_and_restore_hook_sees_the_rest() {
        let recorder = Arc::new(Recorder::default());
        let h = Harness::new(RoomDefinition::new(EventTable::new(), Arc::clone(&recorder)));
        let room = h.start().await;
        let _a = h.join(&room, "a", "alice", "").await;
        let _b = h.join(&room, "b", "bob", "").await;
        let _c = h.join(&room, "c", "carol", "").await;
        drop(room);
        recorder.calls.lock().clear();

        h.host.write_attachment(&"c".into(), b"{\"userId\":".to_vec());
        let room = h.start().await;
        assert_eq!(room.restored().restored, 2);
        assert_eq!(room.restored().skipped, vec![ConnectionId::from("c")]);
        assert_eq!(room.user_ids().await, vec!["alice".to_owned(), "bob".to_owned()]);
        assert_eq!(recorder.calls.lock()[0], "restore:2");
    }

    #[tokio::test]
    async fn handler_sees_effective_event_name() {
        let mut events = EventTable::new();
        let _ = events.on(
            "*",
            handler_fn(|ctx, _data| {
                let event = ctx.event().map(str::to_owned);
                let _ = ctx.reply("seen", Some(json!({ "event": event })));
                Ok(())
            }),
        );
        let h = Harness::new(RoomDefinition::new(events, DefaultHooks));
        let room = h.start().await;
        let mut a = h.join(&room, "a", "alice", "").await;
        room.handle_text(&"a".into(), r#"{"type":"typing"}"#).await;
        room.handle_text(&"a".into(), r#"{"type":"event","data":{"type":"chat"}}"#).await;
        let seen: Vec<Value> = texts(&mut a).into_iter().map(|f| f["data"]["event"].clone()).collect();
        assert_eq!(seen, vec![json!("typing"), json!("chat")]);
    }

    #[tokio::test]
    async fn emit_to_uses_membership_heuristic() {
        let h = Harness::new(RoomDefinition::new(EventTable::new(), DefaultHooks));
        let room = h.start().await;
        let _a = h.join(&room, "a", "alice", "default,bob").await;
        let mut b = h.join(&room, "b", "bob", "default").await;
        // "bob" is one of alice's channels, so it resolves to the channel,
        // which only alice is in.
        assert_eq!(room.emit_to(&"a".into(), "bob", "hi", None).await, 1);
        assert!(texts(&mut b).is_empty());
        // "carol" is not a channel of alice's: user addressing, nobody home.
        assert_eq!(room.emit_to(&"a".into(), "carol", "hi", None).await, 0);
        assert_eq!(room.emit_to(&"a".into(), "default", "hi", None).await, 2);
    }

    #[tokio::test]
    async fn leave_channel_is_persisted() {
        let h = Harness::new(RoomDefinition::new(EventTable::new(), DefaultHooks));
        let room = h.start().await;
        let _a = h.join(&room, "a", "alice", "x,y").await;
        assert!(room.leave_channel(&"a".into(), "x").await);
        assert!(!room.leave_channel(&"a".into(), "x").await);
        let stored = attachment::restore(&*h.host, &"a".into()).unwrap();
        assert_eq!(stored.channels, vec!["y"]);
    }
}
