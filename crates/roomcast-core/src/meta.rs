//! Per-connection metadata.

use serde::{Deserialize, Serialize};

use crate::ids::ClientId;

/// Channel every connection joins when no channel is requested.
pub const DEFAULT_CHANNEL: &str = "default";

/// Who is on the other end of a socket, and which channels it listens to.
///
/// `user_id` names a logical actor that may hold several sockets at once;
/// `client_id` is unique per socket. `channels` keeps insertion order and
/// decides broadcast eligibility.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionMeta {
    /// Logical actor identity.
    pub user_id: String,
    /// Per-connection identity.
    pub client_id: ClientId,
    /// Channel memberships, in join order.
    pub channels: Vec<String>,
}

impl ConnectionMeta {
    /// Build metadata, falling back to [`DEFAULT_CHANNEL`] when `channels`
    /// is empty.
    pub fn new(
        user_id: impl Into<String>,
        client_id: impl Into<ClientId>,
        channels: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let mut meta = Self {
            user_id: user_id.into(),
            client_id: client_id.into(),
            channels: Vec::new(),
        };
        for channel in channels {
            let _ = meta.join(channel);
        }
        if meta.channels.is_empty() {
            meta.channels.push(DEFAULT_CHANNEL.to_owned());
        }
        meta
    }

    /// Whether this connection is a member of `channel`.
    pub fn in_channel(&self, channel: &str) -> bool {
        self.channels.iter().any(|c| c == channel)
    }

    /// Add a channel membership. Returns `false` if already a member.
    pub fn join(&mut self, channel: impl Into<String>) -> bool {
        let channel = channel.into();
        if self.in_channel(&channel) {
            return false;
        }
        self.channels.push(channel);
        true
    }

    /// Drop a channel membership. Returns `false` if not a member.
    pub fn leave(&mut self, channel: &str) -> bool {
        let before = self.channels.len();
        self.channels.retain(|c| c != channel);
        self.channels.len() != before
    }
}
