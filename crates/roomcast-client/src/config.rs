//! Client configuration.

use std::time::Duration;

use roomcast_settings::ClientSettings;
use serde::{Deserialize, Serialize};

/// Everything the connection state machine needs to know.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// WebSocket URL, including any query parameters.
    pub url: String,
    /// Reconnect automatically after an unexpected close.
    pub reconnect: bool,
    /// First reconnect delay.
    pub initial_delay: Duration,
    /// Reconnect delay ceiling.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub backoff_multiplier: f64,
    /// Retries before giving up; `0` retries forever.
    pub max_attempts: u32,
    /// Messages kept while not connected.
    pub max_queue_size: usize,
    /// Interval between liveness probes.
    pub ping_interval: Duration,
    /// How long to wait for a probe's `pong`.
    pub ping_timeout: Duration,
    /// Deadline for opening the transport.
    pub connect_timeout: Duration,
}

impl ClientConfig {
    /// Defaults for `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self::from_settings(url, &ClientSettings::default())
    }

    /// Configuration for `url` taken from loaded settings.
    pub fn from_settings(url: impl Into<String>, s: &ClientSettings) -> Self {
        Self {
            url: url.into(),
            reconnect: s.reconnect,
            initial_delay: Duration::from_millis(s.initial_delay_ms),
            max_delay: Duration::from_millis(s.max_delay_ms),
            backoff_multiplier: s.backoff_multiplier,
            max_attempts: s.max_attempts,
            max_queue_size: s.max_queue_size,
            ping_interval: Duration::from_millis(s.ping_interval_ms.max(1)),
            ping_timeout: Duration::from_millis(s.ping_timeout_ms.max(1)),
            connect_timeout: Duration::from_millis(s.connect_timeout_ms.max(1)),
        }
    }
}
