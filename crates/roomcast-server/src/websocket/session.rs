//! One WebSocket from upgrade to close.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use roomcast_core::ConnectionId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::{ClientConnection, Outbound};
use super::heartbeat::{HeartbeatResult, run_heartbeat};
use crate::directory::RoomSlot;
use crate::handshake::ConnectRequest;
use crate::metrics::{
    WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL,
    WS_HEARTBEAT_TIMEOUTS_TOTAL,
};

/// Close code sent when the server goes away or the peer stops answering.
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// How long the write task may take to flush after the session ends.
const WRITER_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Per-socket timing and buffering.
#[derive(Clone, Copy, Debug)]
pub struct SessionSettings {
    /// Interval between server pings.
    pub ping_interval: Duration,
    /// Silence tolerated before the socket is closed.
    pub heartbeat_timeout: Duration,
    /// Outbound queue depth.
    pub send_buffer: usize,
}

/// Serve one upgraded socket against `slot`.
///
/// The socket is attached to the room's host before the room sees it, so a
/// rejected handshake can still deliver its close frame. Every inbound text
/// (or UTF-8 binary) message goes to whichever room instance is current at
/// that moment, which keeps sockets working across hibernation.
#[instrument(skip_all, fields(room = %slot.name(), conn_id = tracing::field::Empty))]
pub async fn run_ws_session(
    ws: WebSocket,
    slot: Arc<RoomSlot>,
    request: ConnectRequest,
    settings: SessionSettings,
    shutdown: CancellationToken,
) {
    let conn_id = ConnectionId::generate();
    let _ = tracing::Span::current().record("conn_id", tracing::field::display(&conn_id));
    let (mut ws_tx, mut ws_rx) = ws.split();

    let (send_tx, mut send_rx) = mpsc::channel::<Outbound>(settings.send_buffer.max(1));
    let connection = Arc::new(ClientConnection::new(conn_id.clone(), send_tx));
    slot.host().attach(Arc::clone(&connection));

    let started = Instant::now();
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let ping_interval = settings.ping_interval;
    let mut writer = tokio::spawn(async move {
        let mut pings = tokio::time::interval_at(
            tokio::time::Instant::now() + ping_interval,
            ping_interval,
        );
        loop {
            tokio::select! {
                item = send_rx.recv() => match item {
                    Some(Outbound::Text(text)) => {
                        if ws_tx.send(Message::Text((&*text).into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Outbound::Close { code, reason }) => {
                        let frame = CloseFrame { code, reason: reason.into() };
                        let _ = ws_tx.send(Message::Close(Some(frame))).await;
                        break;
                    }
                    None => break,
                },
                _ = pings.tick() => {
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let accepted = slot.accept(&conn_id, &request).await;
    if accepted.is_err() {
        // The room already queued the close frame; let it flush.
        drop(connection);
        slot.host().detach(&conn_id);
        if tokio::time::timeout(WRITER_FLUSH_TIMEOUT, &mut writer).await.is_err() {
            writer.abort();
        }
        gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
        return;
    }

    let session = shutdown.child_token();
    let heartbeat = {
        let connection = Arc::clone(&connection);
        let session = session.clone();
        tokio::spawn(async move {
            let result = run_heartbeat(
                Arc::clone(&connection),
                settings.ping_interval,
                settings.heartbeat_timeout,
                session.clone(),
            )
            .await;
            if result == HeartbeatResult::TimedOut {
                warn!(conn_id = %connection.id, "heartbeat timeout, closing socket");
                counter!(WS_HEARTBEAT_TIMEOUTS_TOTAL).increment(1);
                connection.request_close(CLOSE_GOING_AWAY, "heartbeat timeout");
                session.cancel();
            }
        })
    };

    loop {
        let message = tokio::select! {
            message = ws_rx.next() => message,
            () = session.cancelled() => {
                if shutdown.is_cancelled() {
                    connection.request_close(CLOSE_GOING_AWAY, "server shutting down");
                }
                break;
            }
        };
        let text = match message {
            Some(Ok(Message::Text(text))) => text.to_string(),
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    debug!(len = bytes.len(), "ignoring non-UTF-8 binary frame");
                    connection.mark_alive();
                    continue;
                }
            },
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                connection.mark_alive();
                continue;
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(error)) => {
                debug!(%error, "websocket read failed");
                break;
            }
        };
        connection.mark_alive();
        slot.handle_text(&conn_id, &text).await;
    }

    session.cancel();
    connection.mark_closed();
    slot.disconnect(&conn_id).await;
    slot.host().detach(&conn_id);
    let _ = heartbeat.await;
    let dropped = connection.drop_count();
    drop(connection);
    if tokio::time::timeout(WRITER_FLUSH_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }

    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    info!(
        duration_secs = started.elapsed().as_secs(),
        dropped_messages = dropped,
        "socket closed"
    );
}
