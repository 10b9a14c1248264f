//! Settings type definitions.
//!
//! All types use camelCase JSON names and `#[serde(default)]`, so a settings
//! file only needs the keys it overrides.

use serde::{Deserialize, Serialize};

/// Root settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoomcastSettings {
    /// Gateway settings.
    pub server: ServerSettings,
    /// Client connection defaults.
    pub client: ClientSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

/// Gateway network and liveness settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` picks a free port).
    pub port: u16,
    /// Maximum sockets per room.
    pub max_connections: usize,
    /// Interval between server WebSocket pings, in seconds.
    pub heartbeat_interval_secs: u64,
    /// Close a socket after this long without a pong, in seconds.
    pub heartbeat_timeout_secs: u64,
    /// Largest accepted inbound message, in bytes.
    pub max_message_size: usize,
    /// Per-socket outbound buffer depth.
    pub send_buffer: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
            max_connections: 1000,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            max_message_size: 1024 * 1024,
            send_buffer: 256,
        }
    }
}

/// Client reconnection, queueing, and liveness defaults.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Reconnect automatically after an unexpected close.
    pub reconnect: bool,
    /// First reconnect delay, in milliseconds.
    pub initial_delay_ms: u64,
    /// Reconnect delay ceiling, in milliseconds.
    pub max_delay_ms: u64,
    /// Growth factor between consecutive reconnect delays.
    pub backoff_multiplier: f64,
    /// Give up after this many reconnect attempts (`0` = never).
    pub max_attempts: u32,
    /// Pending messages kept while disconnected.
    pub max_queue_size: usize,
    /// Liveness probe interval, in milliseconds.
    pub ping_interval_ms: u64,
    /// Probe acknowledgement deadline, in milliseconds.
    pub ping_timeout_ms: u64,
    /// Transport open deadline, in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            reconnect: true,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            max_attempts: 0,
            max_queue_size: 100,
            ping_interval_ms: 25_000,
            ping_timeout_ms: 5_000,
            connect_timeout_ms: 10_000,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
