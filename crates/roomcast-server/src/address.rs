//! Resolve an ambiguous emit target to a channel or a user.
//!
//! `emit_to("lobby", ..)` and `emit_to("alice", ..)` share one string
//! namespace. A target names a channel only if the sender is currently a
//! member of that channel; every other string is treated as a user id.
//! A user whose id equals one of the sender's channel names cannot be
//! addressed by id from that sender.

use std::fmt;

use roomcast_core::ConnectionMeta;

/// Where an emit goes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Target {
    /// Every socket in a channel.
    Channel(String),
    /// Every socket of a user.
    User(String),
}

impl Target {
    /// The channel name or user id.
    pub fn name(&self) -> &str {
        match self {
            Self::Channel(name) | Self::User(name) => name,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Channel(name) => write!(f, "channel:{name}"),
            Self::User(name) => write!(f, "user:{name}"),
        }
    }
}

/// Classify `target` using the sender's channel memberships.
pub fn resolve(target: &str, sender: Option<&ConnectionMeta>) -> Target {
    match sender {
        Some(meta) if meta.in_channel(target) => Target::Channel(target.to_owned()),
        _ => Target::User(target.to_owned()),
    }
}
