//! Per-socket metadata persisted beside the socket on the host.
//!
//! The attachment is the JSON form of [`ConnectionMeta`]. It is written once
//! at accept and again whenever the connection's channel set changes, so a
//! restarted room sees what the socket last had.

use roomcast_core::{ConnectionId, ConnectionMeta};
use thiserror::Error;

use crate::host::Host;

/// Attachment read/write failures.
#[derive(Debug, Error)]
pub enum AttachmentError {
    /// The host has no attachment for the socket.
    #[error("no attachment for connection {0}")]
    Missing(ConnectionId),
    /// The stored bytes are not valid metadata.
    #[error("corrupt attachment for connection {conn}: {source}")]
    Corrupt {
        /// Socket handle.
        conn: ConnectionId,
        /// Decode error.
        #[source]
        source: serde_json::Error,
    },
    /// The stored metadata has no user id.
    #[error("attachment for connection {0} has an empty userId")]
    EmptyUser(ConnectionId),
    /// The metadata could not be serialized.
    #[error("failed to encode attachment: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Serialize metadata to attachment bytes.
pub fn encode(meta: &ConnectionMeta) -> Result<Vec<u8>, AttachmentError> {
    serde_json::to_vec(meta).map_err(AttachmentError::Encode)
}

/// Parse attachment bytes.
pub fn decode(conn: &ConnectionId, bytes: &[u8]) -> Result<ConnectionMeta, AttachmentError> {
    let meta: ConnectionMeta =
        serde_json::from_slice(bytes).map_err(|source| AttachmentError::Corrupt {
            conn: conn.clone(),
            source,
        })?;
    if meta.user_id.is_empty() {
        return Err(AttachmentError::EmptyUser(conn.clone()));
    }
    Ok(meta)
}

/// Store `meta` beside the socket.
pub fn persist(
    host: &dyn Host,
    conn: &ConnectionId,
    meta: &ConnectionMeta,
) -> Result<(), AttachmentError> {
    host.write_attachment(conn, encode(meta)?);
    Ok(())
}

/// Read back the metadata stored beside the socket.
pub fn restore(host: &dyn Host, conn: &ConnectionId) -> Result<ConnectionMeta, AttachmentError> {
    let bytes = host
        .read_attachment(conn)
        .ok_or_else(|| AttachmentError::Missing(conn.clone()))?;
    decode(conn, &bytes)
}
