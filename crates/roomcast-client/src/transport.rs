//! Transport seam between the state machine and the network.
//!
//! A [`Connector`] opens one link per attempt. The link is a pair of text
//! channels: dropping the outbound sender closes the link from the client
//! side, and the inbound receiver yielding `None` means the peer went away.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// Why a transport could not be opened.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer could not be reached or refused the upgrade.
    #[error("connect failed: {0}")]
    Connect(String),
    /// The open did not finish within the configured deadline.
    #[error("connect timed out")]
    Timeout,
}

/// One open transport.
#[derive(Debug)]
pub struct TransportLink {
    /// Text frames to the peer.
    pub outbound: mpsc::UnboundedSender<String>,
    /// Text frames from the peer; `None` once the link is closed.
    pub inbound: mpsc::UnboundedReceiver<String>,
}

/// Opens transports.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a link to `url`.
    async fn connect(&self, url: &str) -> Result<TransportLink, TransportError>;
}

/// [`Connector`] over `tokio-tungstenite`.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<TransportLink, TransportError> {
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();

        let _writer = tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(error) = sink.send(Message::Text(text.into())).await {
                    debug!(%error, "websocket write failed");
                    return;
                }
            }
            let _ = sink.send(Message::Close(None)).await;
        });

        let _reader = tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let text = match message {
                    Ok(Message::Text(text)) => text.to_string(),
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => text,
                        Err(_) => {
                            warn!(len = bytes.len(), "ignoring non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "peer closed websocket");
                        break;
                    }
                    Ok(_) => continue,
                    Err(error) => {
                        debug!(%error, "websocket read failed");
                        break;
                    }
                };
                if in_tx.send(text).is_err() {
                    break;
                }
            }
        });

        Ok(TransportLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
