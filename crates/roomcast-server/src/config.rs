//! Gateway configuration.

use std::time::Duration;

use roomcast_settings::ServerSettings;
use serde::{Deserialize, Serialize};

/// Runtime configuration for [`RoomcastServer`](crate::server::RoomcastServer).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` picks a free port).
    pub port: u16,
    /// Socket cap per room.
    pub max_connections: usize,
    /// Seconds between server WebSocket pings.
    pub heartbeat_interval_secs: u64,
    /// Seconds without a pong before a socket is closed.
    pub heartbeat_timeout_secs: u64,
    /// Largest inbound WebSocket message in bytes.
    pub max_message_size: usize,
    /// Outbound frames buffered per socket before sends fail.
    pub send_buffer: usize,
}

impl ServerConfig {
    /// Heartbeat interval as a `Duration`.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    /// Heartbeat timeout as a `Duration`.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs.max(1))
    }

    /// `host:port`.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from(&ServerSettings::default())
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(s: &ServerSettings) -> Self {
        Self {
            host: s.host.clone(),
            port: s.port,
            max_connections: s.max_connections,
            heartbeat_interval_secs: s.heartbeat_interval_secs,
            heartbeat_timeout_secs: s.heartbeat_timeout_secs,
            max_message_size: s.max_message_size,
            send_buffer: s.send_buffer.max(1),
        }
    }
}
