//! Gateway-side state of one accepted WebSocket.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use roomcast_core::ConnectionId;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::host::SendError;

/// Item queued for the socket's write task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    /// A text frame.
    Text(Arc<str>),
    /// Close the socket with a code and reason.
    Close {
        /// WebSocket close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// One accepted socket, as seen by the host.
pub struct ClientConnection {
    /// Host-assigned handle.
    pub id: ConnectionId,
    tx: mpsc::Sender<Outbound>,
    /// When the socket was accepted.
    pub connected_at: Instant,
    /// Whether the peer answered since the last heartbeat check.
    pub is_alive: AtomicBool,
    closed: AtomicBool,
    last_pong: Mutex<Instant>,
    /// Frames dropped because the write buffer was full or gone.
    pub dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Wrap the sender half of a socket's write queue.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Outbound>) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Queue a text frame without waiting.
    pub fn send(&self, text: Arc<str>) -> Result<(), SendError> {
        if !self.is_open() {
            return Err(SendError::Closed(self.id.clone()));
        }
        match self.tx.try_send(Outbound::Text(text)) {
            Ok(()) => Ok(()),
            Err(err) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                match err {
                    TrySendError::Full(_) => Err(SendError::Full(self.id.clone())),
                    TrySendError::Closed(_) => {
                        self.mark_closed();
                        Err(SendError::Closed(self.id.clone()))
                    }
                }
            }
        }
    }

    /// Ask the write task to close the socket. Later sends fail.
    pub fn request_close(&self, code: u16, reason: &str) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.tx.try_send(Outbound::Close {
            code,
            reason: reason.to_owned(),
        });
    }

    /// Mark the socket closed without sending a close frame.
    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Whether frames can still be queued.
    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    /// Total frames dropped for this socket.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record that the peer answered a ping.
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Time since the last pong (or since accept).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Read and reset the alive flag.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Socket age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
