//! Event handler table and async dispatch.
//!
//! Handlers are registered per event name, or under [`WILDCARD`] to see
//! every event. Dispatch runs exact-name handlers first, then wildcard
//! handlers, each in registration order. A failing, panicking, or hung
//! handler is isolated: its error is collected and the remaining handlers
//! still run.
//!
//! The table is built once as part of a
//! [`RoomDefinition`](crate::room::RoomDefinition) and shared by every room
//! instance, so a restarted room sees the same handlers.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use metrics::{counter, histogram};
use serde_json::Value;
use thiserror::Error;
use tracing::{error, warn};

use crate::metrics::{EVENTS_DISPATCHED_TOTAL, EVENT_HANDLER_DURATION_SECONDS, HANDLER_ERRORS_TOTAL};
use crate::room::RoomContext;
use crate::storage::StorageError;

/// Event name that matches every event.
pub const WILDCARD: &str = "*";

/// Maximum time a single handler may run.
pub const HANDLER_TIMEOUT: Duration = Duration::from_secs(30);

/// Failure reported by an event handler or room hook.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The handler rejected the payload.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    /// Storage failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// The handler ran past [`HANDLER_TIMEOUT`].
    #[error("handler for {0} timed out")]
    Timeout(String),
    /// The handler panicked.
    #[error("handler for {0} panicked")]
    Panicked(String),
    /// Any other failure.
    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidPayload(_) => "invalid_payload",
            Self::Storage(_) => "storage",
            Self::Timeout(_) => "timeout",
            Self::Panicked(_) => "panic",
            Self::Failed(_) => "failed",
        }
    }
}

/// Implemented by every event handler.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one event from the context's connection.
    async fn handle(&self, ctx: &mut RoomContext<'_>, data: Option<Value>) -> Result<(), HandlerError>;
}

/// Adapter turning a synchronous closure into an [`EventHandler`].
pub struct FnHandler<F>(F);

/// Wrap a closure as a handler.
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(&mut RoomContext<'_>, Option<Value>) -> Result<(), HandlerError> + Send + Sync,
{
    FnHandler(f)
}

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&mut RoomContext<'_>, Option<Value>) -> Result<(), HandlerError> + Send + Sync,
{
    async fn handle(&self, ctx: &mut RoomContext<'_>, data: Option<Value>) -> Result<(), HandlerError> {
        (self.0)(ctx, data)
    }
}

/// Key a handler is registered under.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventKey {
    /// One event name.
    Named(String),
    /// Every event.
    Wildcard,
}

impl From<&str> for EventKey {
    fn from(name: &str) -> Self {
        if name == WILDCARD {
            Self::Wildcard
        } else {
            Self::Named(name.to_owned())
        }
    }
}

impl From<String> for EventKey {
    fn from(name: String) -> Self {
        if name == WILDCARD {
            Self::Wildcard
        } else {
            Self::Named(name)
        }
    }
}

/// Handle returned by [`EventTable::on`], used to remove one handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h{}", self.0)
    }
}

struct Registration {
    id: HandlerId,
    handler: Arc<dyn EventHandler>,
}

/// Result of dispatching one event.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// No exact or wildcard handler was registered.
    Unhandled,
    /// At least one handler ran.
    Handled {
        /// Number of handlers invoked.
        invoked: usize,
        /// Errors from handlers that failed.
        errors: Vec<HandlerError>,
    },
}

impl DispatchOutcome {
    /// Whether no handler ran.
    pub fn is_unhandled(&self) -> bool {
        matches!(self, Self::Unhandled)
    }
}

/// Map from event name to ordered handler lists.
#[derive(Default)]
pub struct EventTable {
    named: HashMap<String, Vec<Registration>>,
    wildcard: Vec<Registration>,
    next_id: u64,
}

impl EventTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. `"*"` registers a wildcard handler.
    pub fn on(&mut self, event: impl Into<EventKey>, handler: impl EventHandler + 'static) -> HandlerId {
        self.on_arc(event, Arc::new(handler))
    }

    /// Register a shared handler.
    pub fn on_arc(&mut self, event: impl Into<EventKey>, handler: Arc<dyn EventHandler>) -> HandlerId {
        self.next_id += 1;
        let id = HandlerId(self.next_id);
        let registration = Registration { id, handler };
        match event.into() {
            EventKey::Named(name) => self.named.entry(name).or_default().push(registration),
            EventKey::Wildcard => self.wildcard.push(registration),
        }
        id
    }

    /// Remove one handler, or every handler for the event when `handler`
    /// is `None`. Returns how many were removed.
    pub fn off(&mut self, event: impl Into<EventKey>, handler: Option<HandlerId>) -> usize {
        let list = match event.into() {
            EventKey::Named(name) => match self.named.get_mut(&name) {
                Some(list) => list,
                None => return 0,
            },
            EventKey::Wildcard => &mut self.wildcard,
        };
        let before = list.len();
        match handler {
            Some(id) => list.retain(|r| r.id != id),
            None => list.clear(),
        }
        let removed = before - list.len();
        self.named.retain(|_, list| !list.is_empty());
        removed
    }

    /// Whether an event would reach any handler, wildcard included.
    pub fn has_handlers(&self, event: &str) -> bool {
        !self.wildcard.is_empty() || self.named.contains_key(event)
    }

    /// Event names with at least one exact handler, sorted.
    pub fn events(&self) -> Vec<String> {
        let mut names: Vec<String> = self.named.keys().cloned().collect();
        names.sort();
        names
    }

    /// Run every matching handler for `event`. Handlers read the name back
    /// through [`RoomContext::event`].
    pub async fn dispatch(
        &self,
        event: &str,
        ctx: &mut RoomContext<'_>,
        data: Option<Value>,
    ) -> DispatchOutcome {
        ctx.set_event(event);
        let exact = self.named.get(event).map(Vec::as_slice).unwrap_or_default();
        if exact.is_empty() && self.wildcard.is_empty() {
            return DispatchOutcome::Unhandled;
        }
        counter!(EVENTS_DISPATCHED_TOTAL).increment(1);

        let mut errors = Vec::new();
        let mut invoked = 0;
        for registration in exact.iter().chain(&self.wildcard) {
            invoked += 1;
            if let Err(err) = run_handler(&*registration.handler, event, ctx, data.clone()).await {
                counter!(HANDLER_ERRORS_TOTAL, "kind" => err.kind()).increment(1);
                errors.push(err);
            }
        }
        DispatchOutcome::Handled { invoked, errors }
    }
}

async fn run_handler(
    handler: &dyn EventHandler,
    event: &str,
    ctx: &mut RoomContext<'_>,
    data: Option<Value>,
) -> Result<(), HandlerError> {
    let start = Instant::now();
    let call = std::panic::AssertUnwindSafe(handler.handle(ctx, data)).catch_unwind();
    let result = match tokio::time::timeout(HANDLER_TIMEOUT, call).await {
        Ok(Ok(result)) => result,
        Ok(Err(_panic)) => {
            error!(event, "event handler panicked");
            Err(HandlerError::Panicked(event.to_owned()))
        }
        Err(_elapsed) => {
            error!(event, "event handler timed out after {:?}", HANDLER_TIMEOUT);
            Err(HandlerError::Timeout(event.to_owned()))
        }
    };

    let duration = start.elapsed();
    histogram!(EVENT_HANDLER_DURATION_SECONDS).record(duration.as_secs_f64());
    if duration.as_secs() >= 5 {
        warn!(event, duration_secs = duration.as_secs_f64(), "slow event handler");
    }
    result
}
