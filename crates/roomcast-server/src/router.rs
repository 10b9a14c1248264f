//! Fan-out of encoded frames to registered sockets.
//!
//! The router picks recipients from the registry (channel membership or
//! user id), applies a [`BroadcastFilter`], and pushes the already-encoded
//! text through the host. A socket that fails a send and is no longer open
//! is pruned from the registry in the same pass; the caller receives the
//! pruned entries so it can run disconnect hooks for them.

use std::collections::HashSet;
use std::sync::Arc;

use metrics::counter;
use roomcast_core::{ClientId, ConnectionId, ConnectionMeta};
use tracing::{debug, warn};

use crate::host::{Host, SendError};
use crate::metrics::{FRAMES_DELIVERED_TOTAL, FRAMES_DROPPED_TOTAL, SESSIONS_PRUNED_TOTAL};
use crate::registry::SessionRegistry;

/// Optional recipient restrictions applied after channel/user selection.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BroadcastFilter {
    /// Skip this socket.
    pub except: Option<ConnectionId>,
    /// Only these user ids.
    pub user_ids: Option<HashSet<String>>,
    /// Only these client ids.
    pub client_ids: Option<HashSet<ClientId>>,
}

impl BroadcastFilter {
    /// No restrictions.
    pub fn none() -> Self {
        Self::default()
    }

    /// Everyone except `conn`.
    pub fn except(conn: ConnectionId) -> Self {
        Self {
            except: Some(conn),
            ..Self::default()
        }
    }

    /// Restrict to these user ids.
    #[must_use]
    pub fn with_user_ids(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.user_ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    /// Restrict to these client ids.
    #[must_use]
    pub fn with_client_ids(mut self, ids: impl IntoIterator<Item = ClientId>) -> Self {
        self.client_ids = Some(ids.into_iter().collect());
        self
    }

    /// Whether a socket passes every restriction.
    pub fn admits(&self, conn: &ConnectionId, meta: &ConnectionMeta) -> bool {
        if self.except.as_ref() == Some(conn) {
            return false;
        }
        if let Some(users) = &self.user_ids {
            if !users.contains(&meta.user_id) {
                return false;
            }
        }
        if let Some(clients) = &self.client_ids {
            if !clients.contains(&meta.client_id) {
                return false;
            }
        }
        true
    }
}

/// Outcome of one fan-out.
#[derive(Debug, Default)]
pub struct Delivery {
    /// Sockets the frame was queued on.
    pub sent: usize,
    /// Sockets the frame did not reach.
    pub failed: usize,
    /// Entries removed from the registry because their socket was gone.
    pub pruned: Vec<(ConnectionId, ConnectionMeta)>,
}

/// Send `text` to every socket in `channel` that passes `filter`.
pub fn route_channel(
    registry: &mut SessionRegistry,
    host: &dyn Host,
    channel: &str,
    text: &Arc<str>,
    filter: &BroadcastFilter,
) -> Delivery {
    let recipients: Vec<ConnectionId> = registry
        .iter()
        .filter(|(conn, meta)| meta.in_channel(channel) && filter.admits(conn, meta))
        .map(|(conn, _)| conn.clone())
        .collect();
    debug!(channel, recipients = recipients.len(), "broadcast to channel");
    deliver(registry, host, recipients, text)
}

/// Send `text` to every socket of `user_id`, optionally only those in `channel`.
pub fn route_user(
    registry: &mut SessionRegistry,
    host: &dyn Host,
    user_id: &str,
    channel: Option<&str>,
    text: &Arc<str>,
    filter: &BroadcastFilter,
) -> Delivery {
    let recipients: Vec<ConnectionId> = registry
        .iter()
        .filter(|(conn, meta)| {
            meta.user_id == user_id
                && channel.is_none_or(|c| meta.in_channel(c))
                && filter.admits(conn, meta)
        })
        .map(|(conn, _)| conn.clone())
        .collect();
    debug!(user_id, channel, recipients = recipients.len(), "send to user");
    deliver(registry, host, recipients, text)
}

/// Send `text` to one registered socket.
pub fn route_one(
    registry: &mut SessionRegistry,
    host: &dyn Host,
    conn: &ConnectionId,
    text: &Arc<str>,
) -> Delivery {
    let recipients = if registry.contains(conn) {
        vec![conn.clone()]
    } else {
        Vec::new()
    };
    deliver(registry, host, recipients, text)
}

fn deliver(
    registry: &mut SessionRegistry,
    host: &dyn Host,
    recipients: Vec<ConnectionId>,
    text: &Arc<str>,
) -> Delivery {
    let mut delivery = Delivery::default();
    for conn in recipients {
        match host.send(&conn, Arc::clone(text)) {
            Ok(()) => delivery.sent += 1,
            Err(error) => {
                delivery.failed += 1;
                let gone = match &error {
                    SendError::Full(_) => !host.is_open(&conn),
                    SendError::Closed(_) | SendError::Unknown(_) => true,
                };
                if gone {
                    if let Some(meta) = registry.remove(&conn) {
                        debug!(conn_id = %conn, user_id = %meta.user_id, "pruned closed socket");
                        delivery.pruned.push((conn, meta));
                    }
                } else {
                    warn!(conn_id = %conn, %error, "dropped frame for slow socket");
                }
            }
        }
    }
    counter!(FRAMES_DELIVERED_TOTAL).increment(delivery.sent as u64);
    counter!(FRAMES_DROPPED_TOTAL).increment(delivery.failed as u64);
    counter!(SESSIONS_PRUNED_TOTAL).increment(delivery.pruned.len() as u64);
    delivery
}
