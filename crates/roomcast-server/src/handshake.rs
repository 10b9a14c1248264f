//! Connection request data and the default metadata extractor.

use std::collections::HashMap;

use roomcast_core::{ClientId, ConnectionMeta};
use thiserror::Error;

use crate::attachment::AttachmentError;

/// Close code for rejected handshakes (policy violation).
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// Close code when the room cannot take more sockets.
pub const CLOSE_TRY_AGAIN_LATER: u16 = 1013;
/// Close code for server-side failures.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// Why a connection attempt was refused.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// A required query parameter is missing or empty.
    #[error("missing required parameter {0}")]
    MissingParam(&'static str),
    /// The caller-supplied authorizer refused the request.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// The room is at its connection limit.
    #[error("room is full ({0} connections)")]
    RoomFull(usize),
    /// Metadata could not be stored beside the socket.
    #[error(transparent)]
    Attachment(#[from] AttachmentError),
}

impl HandshakeError {
    /// WebSocket close code sent to the peer.
    pub fn close_code(&self) -> u16 {
        match self {
            Self::MissingParam(_) | Self::Unauthorized(_) => CLOSE_POLICY_VIOLATION,
            Self::RoomFull(_) => CLOSE_TRY_AGAIN_LATER,
            Self::Attachment(_) => CLOSE_INTERNAL_ERROR,
        }
    }

    /// Close reason safe to send to the peer.
    pub fn close_reason(&self) -> &'static str {
        match self {
            Self::MissingParam(_) => "missing parameter",
            Self::Unauthorized(_) => "unauthorized",
            Self::RoomFull(_) => "room full",
            Self::Attachment(_) => "internal error",
        }
    }
}

/// What the gateway knows about an incoming socket before it is accepted.
#[derive(Clone, Debug, Default)]
pub struct ConnectRequest {
    /// Room name from the URL path.
    pub room: String,
    /// URL query parameters.
    pub query: HashMap<String, String>,
}

impl ConnectRequest {
    /// Request for `room` with the given query parameters.
    pub fn new<K, V>(room: impl Into<String>, query: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            room: room.into(),
            query: query.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    /// A non-empty query parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str).filter(|v| !v.is_empty())
    }

    /// The `channels` parameter split on commas, trimmed, empties dropped.
    pub fn channels(&self) -> Vec<String> {
        self.param("channels")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Build metadata from `userId` and `channels` query parameters.
///
/// A fresh [`ClientId`] is generated per connection. Channels default to
/// `["default"]`.
pub fn extract_query_meta(request: &ConnectRequest) -> Result<ConnectionMeta, HandshakeError> {
    extract_query_meta_with(request, |_, _| Ok(()))
}

/// Like [`extract_query_meta`], but first passes the user id and the
/// `token` parameter to `authorize`.
pub fn extract_query_meta_with<F>(
    request: &ConnectRequest,
    authorize: F,
) -> Result<ConnectionMeta, HandshakeError>
where
    F: FnOnce(&str, Option<&str>) -> Result<(), String>,
{
    let user_id = request
        .param("userId")
        .ok_or(HandshakeError::MissingParam("userId"))?;
    authorize(user_id, request.param("token")).map_err(HandshakeError::Unauthorized)?;
    Ok(ConnectionMeta::new(
        user_id,
        ClientId::generate(),
        request.channels(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use roomcast_core::DEFAULT_CHANNEL;

    #[test]
    fn extracts_user_and_channels() {
        let req = ConnectRequest::new("r", [("userId", "alice"), ("channels", "lobby, vip,,lobby")]);
        let meta = extract_query_meta(&req).unwrap();
        assert_eq!(meta.user_id, "alice");
        assert_eq!(meta.channels, vec!["lobby", "vip"]);
        assert!(!meta.client_id.is_empty());
    }

    #[test]
    fn channels_default() {
        let req = ConnectRequest::new("r", [("userId", "alice")]);
        assert_eq!(extract_query_meta(&req).unwrap().channels, vec![DEFAULT_CHANNEL]);
    }

    #[test]
    fn client_ids_are_unique() {
        let req = ConnectRequest::new("r", [("userId", "alice")]);
        let a = extract_query_meta(&req).unwrap();
        let b = extract_query_meta(&req).unwrap();
        assert_ne!(a.client_id, b.client_id);
    }

    #[test]
    fn missing_user_is_policy_violation() {
        let req = ConnectRequest::new("r", [("userId", "")]);
        let err = extract_query_meta(&req).unwrap_err();
        assert_matches!(err, HandshakeError::MissingParam("userId"));
        assert_eq!(err.close_code(), CLOSE_POLICY_VIOLATION);
    }

    #[test]
    fn authorizer_sees_token() {
        let req = ConnectRequest::new("r", [("userId", "alice"), ("token", "secret")]);
        let ok = extract_query_meta_with(&req, |user, token| {
            if user == "alice" && token == Some("secret") {
                Ok(())
            } else {
                Err("bad token".into())
            }
        });
        assert!(ok.is_ok());

        let req = ConnectRequest::new("r", [("userId", "alice")]);
        let err = extract_query_meta_with(&req, |_, token| token.map(|_| ()).ok_or_else(|| "no token".into()))
            .unwrap_err();
        assert_matches!(err, HandshakeError::Unauthorized(ref m) if m == "no token");
        assert_eq!(err.close_reason(), "unauthorized");
    }

    #[test]
    fn room_full_close_code() {
        assert_eq!(HandshakeError::RoomFull(3).close_code(), CLOSE_TRY_AGAIN_LATER);
    }
}
