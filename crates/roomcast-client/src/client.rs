//! Reconnecting client: a cheap handle plus a driver task that owns the
//! transport.
//!
//! The driver is the only place connection state changes. Every transport
//! open carries an attempt id; a result whose id is not the current one
//! belongs to a superseded attempt and is discarded, so a slow open can
//! never resurrect a connection the caller already replaced or stopped.

use std::sync::Arc;
use std::time::Duration;

use roomcast_core::frame::{self, PONG_FRAME};
use roomcast_core::{Frame, FrameError};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

use crate::backoff::reconnect_delay;
use crate::config::ClientConfig;
use crate::queue::PendingQueue;
use crate::state::{ConnectionState, Visibility};
use crate::transport::{Connector, TransportError, TransportLink, WsConnector};

/// Liveness probe frame.
const PROBE: &str = r#"{"type":"ping"}"#;

/// Inbound events buffered per subscriber before the oldest are lost.
const EVENT_CAPACITY: usize = 256;

/// Errors returned by [`RealtimeClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// The driver has stopped.
    #[error("client is closed")]
    Closed,
    /// No connection within the configured deadline.
    #[error("not connected after {0:?}")]
    Timeout(Duration),
    /// The client gave up reconnecting.
    #[error("connection failed: {0}")]
    Failed(String),
    /// The outgoing frame could not be encoded.
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// A frame received from the server, with any routed wrapper removed.
#[derive(Clone, Debug, PartialEq)]
pub struct InboundEvent {
    /// Effective event name.
    pub event: String,
    /// Channel the event was addressed to, if any.
    pub channel: Option<String>,
    /// Payload.
    pub data: Option<Value>,
}

impl From<Frame> for InboundEvent {
    fn from(frame: Frame) -> Self {
        Self {
            event: frame.event_name().to_owned(),
            data: frame.event_data(),
            channel: frame.channel,
        }
    }
}

enum Command {
    Emit(String),
    Disconnect,
    Reconnect,
    Visibility(Visibility),
}

/// Handle to a reconnecting connection.
///
/// Construction starts the first attempt immediately. Dropping the handle
/// stops the driver and closes the transport.
pub struct RealtimeClient {
    config: Arc<ClientConfig>,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    events: broadcast::Sender<InboundEvent>,
    driver: JoinHandle<()>,
}

impl RealtimeClient {
    /// Connect over WebSocket.
    pub fn connect(config: ClientConfig) -> Self {
        Self::with_connector(config, Arc::new(WsConnector))
    }

    /// Connect through a custom transport.
    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        let config = Arc::new(config);
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Connecting);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let driver = Driver::new(Arc::clone(&config), connector, state_tx, events.clone());
        let driver = tokio::spawn(driver.run(command_rx));
        Self {
            config,
            commands,
            state,
            events,
            driver,
        }
    }

    /// Send `{type: event, data}`. Queued while not connected.
    pub fn emit(&self, event: &str, data: Option<Value>) -> Result<(), ClientError> {
        let mut frame = Frame::new(event);
        frame.data = data;
        self.send_frame(&frame)
    }

    /// Send `{type: event, channel, data}`. Queued while not connected.
    pub fn emit_in(&self, channel: &str, event: &str, data: Option<Value>) -> Result<(), ClientError> {
        let mut frame = Frame::new(event).with_channel(channel);
        frame.data = data;
        self.send_frame(&frame)
    }

    fn send_frame(&self, frame: &Frame) -> Result<(), ClientError> {
        let text = frame::encode(frame)?;
        self.command(Command::Emit(text))
    }

    /// Close the transport and stop reconnecting until [`reconnect`](Self::reconnect).
    pub fn disconnect(&self) -> Result<(), ClientError> {
        self.command(Command::Disconnect)
    }

    /// Drop any current transport and try again now with a fresh backoff.
    pub fn reconnect(&self) -> Result<(), ClientError> {
        self.command(Command::Reconnect)
    }

    /// Report a foreground/background transition. Probes pause in the
    /// background and restart with an immediate probe in the foreground.
    pub fn set_visibility(&self, visibility: Visibility) -> Result<(), ClientError> {
        self.command(Command::Visibility(visibility))
    }

    fn command(&self, command: Command) -> Result<(), ClientError> {
        self.commands.send(command).map_err(|_| ClientError::Closed)
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Receive inbound events.
    pub fn subscribe(&self) -> broadcast::Receiver<InboundEvent> {
        self.events.subscribe()
    }

    /// Wait until connected, for at most the configured connect timeout.
    /// Fails early if the client gives up.
    pub async fn wait_for_connection(&self) -> Result<(), ClientError> {
        let limit = self.config.connect_timeout;
        let mut state = self.state.clone();
        let reached = time::timeout(
            limit,
            state.wait_for(|s| matches!(s, ConnectionState::Connected | ConnectionState::Error(_))),
        )
        .await;
        match reached {
            Err(_) => Err(ClientError::Timeout(limit)),
            Ok(Err(_)) => Err(ClientError::Closed),
            Ok(Ok(state)) => match &*state {
                ConnectionState::Error(reason) => Err(ClientError::Failed(reason.clone())),
                _ => Ok(()),
            },
        }
    }

    /// Stop the driver and wait for it to release the transport.
    pub async fn close(self) {
        let Self { commands, driver, .. } = self;
        drop(commands);
        let _ = driver.await;
    }
}

type DialResult = (u64, Result<TransportLink, TransportError>);

enum Wake {
    Command(Option<Command>),
    Opened(DialResult),
    Inbound(Option<String>),
    Retry,
    Probe,
    ProbeTimeout,
}

struct Driver {
    config: Arc<ClientConfig>,
    connector: Arc<dyn Connector>,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<InboundEvent>,
    queue: PendingQueue,
    attempt_id: u64,
    retries: u32,
    stopped: bool,
    dial: Option<JoinHandle<()>>,
    opened_tx: mpsc::UnboundedSender<DialResult>,
    opened_rx: mpsc::UnboundedReceiver<DialResult>,
    link: Option<TransportLink>,
    retry_at: Option<Instant>,
    next_probe: Option<Instant>,
    probe_deadline: Option<Instant>,
    visibility: Visibility,
}

impl Driver {
    fn new(
        config: Arc<ClientConfig>,
        connector: Arc<dyn Connector>,
        state: watch::Sender<ConnectionState>,
        events: broadcast::Sender<InboundEvent>,
    ) -> Self {
        let (opened_tx, opened_rx) = mpsc::unbounded_channel();
        Self {
            queue: PendingQueue::new(config.max_queue_size),
            config,
            connector,
            state,
            events,
            attempt_id: 0,
            retries: 0,
            stopped: false,
            dial: None,
            opened_tx,
            opened_rx,
            link: None,
            retry_at: None,
            next_probe: None,
            probe_deadline: None,
            visibility: Visibility::Foreground,
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        self.start_attempt();
        loop {
            match self.next_wake(&mut commands).await {
                Wake::Command(None) => break,
                Wake::Command(Some(command)) => self.on_command(command),
                Wake::Opened((id, result)) => self.on_opened(id, result),
                Wake::Inbound(Some(text)) => self.on_inbound(&text),
                Wake::Inbound(None) => self.on_lost("transport closed"),
                Wake::Retry => {
                    self.retry_at = None;
                    self.start_attempt();
                }
                Wake::Probe => self.send_probe(),
                Wake::ProbeTimeout => self.on_lost("liveness probe timed out"),
            }
        }
        self.teardown();
        debug!(url = %self.config.url, "client driver stopped");
    }

    async fn next_wake(&mut self, commands: &mut mpsc::UnboundedReceiver<Command>) -> Wake {
        let Self {
            opened_rx,
            link,
            retry_at,
            next_probe,
            probe_deadline,
            ..
        } = self;
        tokio::select! {
            biased;
            command = commands.recv() => Wake::Command(command),
            Some(opened) = opened_rx.recv() => Wake::Opened(opened),
            text = recv_link(link) => Wake::Inbound(text),
            () = sleep_until(*probe_deadline) => Wake::ProbeTimeout,
            () = sleep_until(*next_probe) => Wake::Probe,
            () = sleep_until(*retry_at) => Wake::Retry,
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next.clone();
                true
            }
        });
        if changed {
            debug!(state = %next, "connection state changed");
        }
    }

    fn start_attempt(&mut self) {
        self.cancel_dial();
        self.attempt_id += 1;
        let id = self.attempt_id;
        let connector = Arc::clone(&self.connector);
        let url = self.config.url.clone();
        let limit = self.config.connect_timeout;
        let opened = self.opened_tx.clone();
        self.set_state(ConnectionState::Connecting);
        debug!(attempt_id = id, url = %url, "opening transport");
        self.dial = Some(tokio::spawn(async move {
            let result = match time::timeout(limit, connector.connect(&url)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout),
            };
            let _ = opened.send((id, result));
        }));
    }

    fn cancel_dial(&mut self) {
        if let Some(dial) = self.dial.take() {
            dial.abort();
        }
    }

    fn on_opened(&mut self, id: u64, result: Result<TransportLink, TransportError>) {
        if id != self.attempt_id {
            debug!(attempt_id = id, current = self.attempt_id, "discarding stale transport result");
            return;
        }
        self.dial = None;
        match result {
            Ok(link) => {
                self.retries = 0;
                self.link = Some(link);
                self.flush();
                self.set_state(ConnectionState::Connected);
                self.arm_probe();
                info!(url = %self.config.url, "connected");
            }
            Err(error) => {
                warn!(attempt_id = id, %error, "connect attempt failed");
                if self.config.reconnect {
                    self.schedule_retry(&error.to_string());
                } else {
                    self.set_state(ConnectionState::Error(error.to_string()));
                }
            }
        }
    }

    /// Send queued frames in order. Frames that could not be handed to the
    /// link go back to the head of the queue.
    fn flush(&mut self) {
        let Some(link) = &self.link else {
            return;
        };
        let pending: Vec<String> = self.queue.drain().collect();
        let count = pending.len();
        let mut rest = pending.into_iter();
        while let Some(text) = rest.next() {
            if let Err(failed) = link.outbound.send(text) {
                let unsent: Vec<String> = std::iter::once(failed.0).chain(rest).collect();
                for text in unsent.into_iter().rev() {
                    self.queue.push_front(text);
                }
                return;
            }
        }
        if count > 0 {
            debug!(count, "flushed pending frames");
        }
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Emit(text) => self.emit(text),
            Command::Disconnect => {
                info!(url = %self.config.url, "disconnect requested");
                self.stopped = true;
                self.teardown();
                self.set_state(ConnectionState::Disconnected);
            }
            Command::Reconnect => {
                info!(url = %self.config.url, "reconnect requested");
                self.stopped = false;
                self.retries = 0;
                self.teardown();
                self.start_attempt();
            }
            Command::Visibility(visibility) => self.on_visibility(visibility),
        }
    }

    fn emit(&mut self, text: String) {
        let text = match &self.link {
            Some(link) => match link.outbound.send(text) {
                Ok(()) => return,
                Err(failed) => failed.0,
            },
            None => text,
        };
        if self.queue.push(text).is_some() {
            warn!(
                max = self.config.max_queue_size,
                dropped = self.queue.dropped(),
                "pending queue full, dropped oldest frame"
            );
        }
    }

    fn on_visibility(&mut self, visibility: Visibility) {
        if visibility == self.visibility {
            return;
        }
        self.visibility = visibility;
        match visibility {
            Visibility::Background => {
                self.next_probe = None;
                self.probe_deadline = None;
                debug!("liveness probes paused");
            }
            Visibility::Foreground => {
                if self.link.is_some() {
                    self.next_probe = Some(Instant::now());
                    self.probe_deadline = None;
                    debug!("liveness probes resumed");
                }
            }
        }
    }

    fn arm_probe(&mut self) {
        self.probe_deadline = None;
        self.next_probe = match self.visibility {
            Visibility::Foreground => Some(Instant::now() + self.config.ping_interval),
            Visibility::Background => None,
        };
    }

    fn send_probe(&mut self) {
        let now = Instant::now();
        self.next_probe = Some(now + self.config.ping_interval);
        let Some(link) = &self.link else {
            return;
        };
        if link.outbound.send(PROBE.to_owned()).is_err() {
            return;
        }
        if self.probe_deadline.is_none() {
            self.probe_deadline = Some(now + self.config.ping_timeout);
        }
    }

    fn on_inbound(&mut self, text: &str) {
        match frame::decode(text) {
            Ok(frame) if frame.kind == PONG_FRAME => self.probe_deadline = None,
            Ok(frame) => {
                let _ = self.events.send(InboundEvent::from(frame));
            }
            Err(error) => warn!(%error, "dropping malformed frame"),
        }
    }

    fn on_lost(&mut self, reason: &str) {
        warn!(url = %self.config.url, reason, "connection lost");
        self.drop_link();
        if self.config.reconnect {
            self.schedule_retry(reason);
        } else {
            self.set_state(ConnectionState::Disconnected);
        }
    }

    fn schedule_retry(&mut self, reason: &str) {
        if self.stopped {
            self.set_state(ConnectionState::Disconnected);
            return;
        }
        let max = self.config.max_attempts;
        if max > 0 && self.retries >= max {
            error!(attempts = self.retries, reason, "giving up on reconnect");
            self.set_state(ConnectionState::Error(format!(
                "gave up after {} attempts: {reason}",
                self.retries
            )));
            return;
        }
        let delay = reconnect_delay(&self.config, self.retries);
        self.retries += 1;
        self.retry_at = Some(Instant::now() + delay);
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        info!(attempt = self.retries, delay_ms, "scheduling reconnect");
        self.set_state(ConnectionState::Reconnecting {
            attempt: self.retries,
            delay_ms,
        });
    }

    fn drop_link(&mut self) {
        self.link = None;
        self.next_probe = None;
        self.probe_deadline = None;
    }

    /// Cancel everything in flight. Any dial result already queued is
    /// invalidated by bumping the attempt id.
    fn teardown(&mut self) {
        self.cancel_dial();
        self.attempt_id += 1;
        self.retry_at = None;
        self.drop_link();
    }
}

async fn recv_link(link: &mut Option<TransportLink>) -> Option<String> {
    match link {
        Some(link) => link.inbound.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::oneshot;

    struct Dial {
        reply: oneshot::Sender<Result<TransportLink, TransportError>>,
    }

    struct Peer {
        from_client: mpsc::UnboundedReceiver<String>,
        to_client: mpsc::UnboundedSender<String>,
    }

    impl Dial {
        fn accept(self) -> Peer {
            let (outbound, from_client) = mpsc::unbounded_channel();
            let (to_client, inbound) = mpsc::unbounded_channel();
            let _ = self.reply.send(Ok(TransportLink { outbound, inbound }));
            Peer {
                from_client,
                to_client,
            }
        }

        fn refuse(self) {
            let _ = self.reply.send(Err(TransportError::Connect("refused".into())));
        }
    }

    impl Peer {
        async fn next_text(&mut self) -> String {
            self.from_client.recv().await.expect("link closed")
        }

        fn send(&self, text: &str) {
            self.to_client.send(text.to_owned()).unwrap();
        }
    }

    struct MemoryConnector {
        dials: mpsc::UnboundedSender<Dial>,
    }

    #[async_trait]
    impl Connector for MemoryConnector {
        async fn connect(&self, _url: &str) -> Result<TransportLink, TransportError> {
            let (reply, answer) = oneshot::channel();
            self.dials
                .send(Dial { reply })
                .map_err(|_| TransportError::Connect("no listener".into()))?;
            answer
                .await
                .map_err(|_| TransportError::Connect("dial dropped".into()))?
        }
    }

    fn config() -> ClientConfig {
        ClientConfig {
            initial_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(8),
            ..ClientConfig::new("mem://lobby")
        }
    }

    fn start(config: ClientConfig) -> (RealtimeClient, mpsc::UnboundedReceiver<Dial>) {
        let (dials, dial_rx) = mpsc::unbounded_channel();
        let client = RealtimeClient::with_connector(config, Arc::new(MemoryConnector { dials }));
        (client, dial_rx)
    }

    async fn wait_state(
        rx: &mut watch::Receiver<ConnectionState>,
        pred: impl FnMut(&ConnectionState) -> bool,
    ) -> ConnectionState {
        time::timeout(Duration::from_secs(600), rx.wait_for(pred))
            .await
            .expect("state not reached")
            .expect("driver stopped")
            .clone()
    }

    async fn connected(client: &RealtimeClient, dials: &mut mpsc::UnboundedReceiver<Dial>) -> Peer {
        let peer = dials.recv().await.unwrap().accept();
        client.wait_for_connection().await.unwrap();
        peer
    }

    #[tokio::test(start_paused = true)]
    async fn queued_frames_flush_in_order_on_open() {
        let (client, mut dials) = start(ClientConfig {
            max_queue_size: 2,
            ..config()
        });
        client.emit("a", None).unwrap();
        client.emit("b", None).unwrap();
        client.emit("c", None).unwrap();

        let mut peer = connected(&client, &mut dials).await;
        assert_eq!(peer.next_text().await, r#"{"type":"b"}"#);
        assert_eq!(peer.next_text().await, r#"{"type":"c"}"#);

        client.emit("d", Some(json!(1))).unwrap();
        client.emit_in("vip", "e", None).unwrap();
        assert_eq!(peer.next_text().await, r#"{"type":"d","data":1}"#);
        assert_eq!(peer.next_text().await, r#"{"type":"e","channel":"vip"}"#);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_grows_and_caps() {
        let (client, mut dials) = start(config());
        let mut state = client.watch_state();
        let mut seen = Vec::new();
        for _ in 0..5 {
            dials.recv().await.unwrap().refuse();
            let s = wait_state(&mut state, |s| matches!(s, ConnectionState::Reconnecting { .. })).await;
            if let ConnectionState::Reconnecting { attempt, delay_ms } = s {
                seen.push((attempt, delay_ms));
            }
        }
        assert_eq!(
            seen,
            vec![(1, 1000), (2, 2000), (3, 4000), (4, 8000), (5, 8000)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retry_waits_for_backoff() {
        let (_client, mut dials) = start(config());
        dials.recv().await.unwrap().refuse();
        let refused_at = Instant::now();
        dials.recv().await.unwrap().refuse();
        assert!(refused_at.elapsed() >= Duration::from_secs(1));
        let second = Instant::now();
        let _dial = dials.recv().await.unwrap();
        assert!(second.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let (client, mut dials) = start(ClientConfig {
            max_attempts: 2,
            ..config()
        });
        for _ in 0..3 {
            dials.recv().await.unwrap().refuse();
        }
        assert_matches!(
            client.wait_for_connection().await,
            Err(ClientError::Failed(reason)) if reason.contains("gave up after 2 attempts")
        );
        time::sleep(Duration::from_secs(120)).await;
        assert!(dials.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn lost_connection_reconnects_with_reset_backoff() {
        let (client, mut dials) = start(config());
        let mut state = client.watch_state();

        let peer = connected(&client, &mut dials).await;
        drop(peer);
        let s = wait_state(&mut state, |s| matches!(s, ConnectionState::Reconnecting { .. })).await;
        assert_eq!(s, ConnectionState::Reconnecting { attempt: 1, delay_ms: 1000 });

        let peer = connected(&client, &mut dials).await;
        drop(peer);
        let s = wait_state(&mut state, |s| matches!(s, ConnectionState::Reconnecting { .. })).await;
        assert_eq!(s, ConnectionState::Reconnecting { attempt: 1, delay_ms: 1000 });
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_disabled_goes_disconnected() {
        let (client, mut dials) = start(ClientConfig {
            reconnect: false,
            ..config()
        });
        let mut state = client.watch_state();
        let peer = connected(&client, &mut dials).await;
        drop(peer);
        let _ = wait_state(&mut state, |s| *s == ConnectionState::Disconnected).await;
        time::sleep(Duration::from_secs(120)).await;
        assert!(dials.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_open_without_reconnect_is_an_error() {
        let (client, mut dials) = start(ClientConfig {
            reconnect: false,
            ..config()
        });
        dials.recv().await.unwrap().refuse();
        assert_matches!(client.wait_for_connection().await, Err(ClientError::Failed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn manual_disconnect_suppresses_reconnect() {
        let (client, mut dials) = start(config());
        let mut state = client.watch_state();
        let mut peer = connected(&client, &mut dials).await;

        client.disconnect().unwrap();
        let _ = wait_state(&mut state, |s| *s == ConnectionState::Disconnected).await;
        assert!(peer.from_client.recv().await.is_none());
        time::sleep(Duration::from_secs(120)).await;
        assert!(dials.try_recv().is_err());

        client.emit("queued", None).unwrap();
        client.reconnect().unwrap();
        let mut peer = connected(&client, &mut dials).await;
        assert_eq!(peer.next_text().await, r#"{"type":"queued"}"#);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_reconnect_skips_backoff_and_resets_attempts() {
        let (client, mut dials) = start(config());
        let mut state = client.watch_state();
        dials.recv().await.unwrap().refuse();
        dials.recv().await.unwrap().refuse();
        let s = wait_state(&mut state, |s| matches!(s, ConnectionState::Reconnecting { .. })).await;
        assert_eq!(s, ConnectionState::Reconnecting { attempt: 2, delay_ms: 2000 });

        let asked = Instant::now();
        client.reconnect().unwrap();
        let dial = dials.recv().await.unwrap();
        assert!(asked.elapsed() < Duration::from_secs(1));
        dial.refuse();
        let s = wait_state(&mut state, |s| matches!(s, ConnectionState::Reconnecting { .. })).await;
        assert_eq!(s, ConnectionState::Reconnecting { attempt: 1, delay_ms: 1000 });
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_attempt_is_ignored() {
        let (client, mut dials) = start(config());
        let first = dials.recv().await.unwrap();
        client.reconnect().unwrap();
        let second = dials.recv().await.unwrap();

        let mut stale = first.accept();
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(client.state(), ConnectionState::Connecting);
        assert!(stale.from_client.recv().await.is_none());

        let mut peer = second.accept();
        client.wait_for_connection().await.unwrap();
        client.emit("x", None).unwrap();
        assert_eq!(peer.next_text().await, r#"{"type":"x"}"#);
    }

    #[tokio::test(start_paused = true)]
    async fn missed_pong_triggers_reconnect() {
        let (client, mut dials) = start(config());
        let mut state = client.watch_state();
        let mut peer = connected(&client, &mut dials).await;
        let opened = Instant::now();

        assert_eq!(peer.next_text().await, PROBE);
        assert!(opened.elapsed() >= Duration::from_secs(25));
        let _ = wait_state(&mut state, |s| matches!(s, ConnectionState::Reconnecting { .. })).await;
        assert!(opened.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn answered_probes_keep_connection() {
        let (client, mut dials) = start(config());
        let Peer {
            mut from_client,
            to_client,
        } = connected(&client, &mut dials).await;
        let state = client.watch_state();
        let _responder = tokio::spawn(async move {
            while let Some(text) = from_client.recv().await {
                if text == PROBE {
                    let _ = to_client.send(r#"{"type":"pong"}"#.to_owned());
                }
            }
        });
        time::sleep(Duration::from_secs(200)).await;
        assert_eq!(client.state(), ConnectionState::Connected);
        assert!(!state.has_changed().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn background_pauses_probes_and_foreground_probes_immediately() {
        let (client, mut dials) = start(config());
        let mut peer = connected(&client, &mut dials).await;

        client.set_visibility(Visibility::Background).unwrap();
        time::sleep(Duration::from_secs(120)).await;
        assert!(peer.from_client.try_recv().is_err());
        assert_eq!(client.state(), ConnectionState::Connected);

        let resumed = Instant::now();
        client.set_visibility(Visibility::Foreground).unwrap();
        assert_eq!(peer.next_text().await, PROBE);
        assert!(resumed.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_connection_times_out() {
        let (client, mut dials) = start(config());
        let _pending = dials.recv().await.unwrap();
        assert_matches!(
            client.wait_for_connection().await,
            Err(ClientError::Timeout(limit)) if limit == Duration::from_secs(10)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_events_are_unwrapped() {
        let (client, mut dials) = start(config());
        let mut events = client.subscribe();
        let peer = connected(&client, &mut dials).await;

        peer.send(r#"{"type":"event","channel":"vip","data":{"type":"chat","text":"hi"}}"#);
        peer.send(r#"{"type":"pong"}"#);
        peer.send("not json");
        peer.send(r#"{"type":"notice","data":[1,2]}"#);

        assert_eq!(
            events.recv().await.unwrap(),
            InboundEvent {
                event: "chat".into(),
                channel: Some("vip".into()),
                data: Some(json!({ "text": "hi" })),
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            InboundEvent {
                event: "notice".into(),
                channel: None,
                data: Some(json!([1, 2])),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn close_releases_transport() {
        let (client, mut dials) = start(config());
        let mut peer = connected(&client, &mut dials).await;
        client.close().await;
        assert!(peer.from_client.recv().await.is_none());
    }
}
