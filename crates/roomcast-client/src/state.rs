//! Observable client states.

use std::fmt;

/// Where the client is in its connection lifecycle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// A transport open is in flight.
    #[default]
    Connecting,
    /// The transport is open and the liveness probe is running.
    Connected,
    /// Waiting out a backoff delay before the next attempt.
    Reconnecting {
        /// Retry number, starting at 1.
        attempt: u32,
        /// Backoff delay before the retry, in milliseconds.
        delay_ms: u64,
    },
    /// Stopped by the caller, or reconnection is disabled.
    Disconnected,
    /// Gave up permanently.
    Error(String),
}

impl ConnectionState {
    /// Whether frames can be sent right now.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Reconnecting { attempt, delay_ms } => {
                write!(f, "reconnecting (attempt {attempt}, in {delay_ms}ms)")
            }
            Self::Disconnected => f.write_str("disconnected"),
            Self::Error(reason) => write!(f, "error: {reason}"),
        }
    }
}

/// Foreground/background state reported by the embedding application.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Visibility {
    /// The application is active.
    #[default]
    Foreground,
    /// The application is suspended or hidden; probes are paused.
    Background,
}
