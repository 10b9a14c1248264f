//! # roomcast-client
//!
//! Client side of a roomcast room.
//!
//! - [`RealtimeClient`]: connect, emit, subscribe, and wait for a connection
//! - Reconnect with capped exponential backoff and an attempt limit
//! - Bounded queue of frames emitted while disconnected, flushed in order
//! - Liveness probes that pause while the application is in the background
//! - [`Connector`] seam with a `tokio-tungstenite` implementation

#![deny(unsafe_code)]

pub mod backoff;
pub mod client;
pub mod config;
pub mod queue;
pub mod state;
pub mod transport;

pub use client::{ClientError, InboundEvent, RealtimeClient};
pub use config::ClientConfig;
pub use state::{ConnectionState, Visibility};
pub use transport::{Connector, TransportError, TransportLink, WsConnector};
