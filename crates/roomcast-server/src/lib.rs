//! # roomcast-server
//!
//! Room runtime and WebSocket gateway.
//!
//! - Session registry keyed by connection id, rebuilt from socket
//!   attachments when a room wakes from hibernation
//! - Channel and user addressing with per-socket delivery and pruning of
//!   dead sockets
//! - Named event handlers with a wildcard fallback, isolated per handler
//! - Axum gateway with heartbeats, Prometheus metrics and graceful shutdown

#![deny(unsafe_code)]

pub mod address;
pub mod attachment;
pub mod config;
pub mod directory;
pub mod dispatch;
pub mod handshake;
pub mod health;
pub mod host;
pub mod metrics;
pub mod presence;
pub mod reconcile;
pub mod registry;
pub mod room;
pub mod router;
pub mod server;
pub mod shutdown;
pub mod storage;
pub mod websocket;

pub use address::Target;
pub use config::ServerConfig;
pub use dispatch::{EventHandler, EventTable, HandlerError, handler_fn};
pub use handshake::{ConnectRequest, HandshakeError};
pub use host::{Host, LocalHost, SendError};
pub use presence::PresenceHooks;
pub use registry::SessionRegistry;
pub use room::{DefaultHooks, Room, RoomContext, RoomDefinition, RoomHooks};
pub use router::BroadcastFilter;
pub use server::RoomcastServer;
pub use storage::{MemoryStorage, Storage};
