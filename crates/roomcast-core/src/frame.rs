//! Wire frame envelope and codec.
//!
//! Every message in both directions is a flat JSON object:
//!
//! ```json
//! { "type": "chat", "channel": "lobby", "data": { "text": "hi" } }
//! ```
//!
//! `type` is required; `channel` and `data` are optional. Unknown fields are
//! ignored on decode, and a `null` channel is treated as absent. Decoding
//! never panics: malformed input comes back as a [`FrameError`] so callers can
//! drop the frame, log, and keep the socket open.
//!
//! Frames produced by channel/user addressing use the reserved type
//! [`EVENT_FRAME`] and carry the real event name in `data.type`; see
//! [`Frame::routed`] and [`Frame::event_name`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Frame type wrapping an addressed (channel/user) event.
pub const EVENT_FRAME: &str = "event";
/// Liveness probe sent by clients.
pub const PING_FRAME: &str = "ping";
/// Liveness acknowledgement sent by the server.
pub const PONG_FRAME: &str = "pong";
/// Generic failure notice sent to a peer.
pub const ERROR_FRAME: &str = "error";

/// Key holding a non-object payload inside a routed frame's `data`.
const ROUTED_VALUE_KEY: &str = "value";

/// Errors produced by the frame codec.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Input was not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(#[source] serde_json::Error),
    /// Input was JSON but not an object.
    #[error("frame is not a JSON object")]
    NotAnObject,
    /// The `type` field is missing.
    #[error("frame is missing the \"type\" field")]
    MissingType,
    /// The `type` field is present but not a string.
    #[error("frame \"type\" must be a string")]
    InvalidType,
    /// The `channel` field is present but not a string.
    #[error("frame \"channel\" must be a string")]
    InvalidChannel,
    /// The frame could not be serialized.
    #[error("failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),
}

/// The `{type, channel?, data?}` wire envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Event name used for handler dispatch.
    #[serde(rename = "type")]
    pub kind: String,
    /// Channel scope, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Arbitrary payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Frame {
    /// Frame with only a type.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            channel: None,
            data: None,
        }
    }

    /// Set the payload.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Set the channel scope.
    #[must_use]
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// Build the addressed-event wrapper:
    /// `{type: "event", channel?, data: {type: <event>, ...payload}}`.
    ///
    /// Object payloads are spread into `data`; any other payload is stored
    /// under `data.value`. The event name always wins over a `type` key in
    /// the payload.
    pub fn routed(event: &str, channel: Option<&str>, payload: Option<Value>) -> Self {
        let mut body = Map::new();
        match payload {
            Some(Value::Object(map)) => body.extend(map),
            Some(other) => {
                let _ = body.insert(ROUTED_VALUE_KEY.to_owned(), other);
            }
            None => {}
        }
        let _ = body.insert("type".to_owned(), Value::String(event.to_owned()));
        Self {
            kind: EVENT_FRAME.to_owned(),
            channel: channel.map(str::to_owned),
            data: Some(Value::Object(body)),
        }
    }

    /// Whether this is an addressed-event wrapper with an inner event name.
    pub fn is_routed(&self) -> bool {
        self.kind == EVENT_FRAME && self.routed_name().is_some()
    }

    fn routed_name(&self) -> Option<&str> {
        self.data.as_ref()?.get("type")?.as_str()
    }

    /// Effective event name: `data.type` for routed frames, `type` otherwise.
    pub fn event_name(&self) -> &str {
        if self.kind == EVENT_FRAME {
            if let Some(name) = self.routed_name() {
                return name;
            }
        }
        &self.kind
    }

    /// Effective payload: `data` without its `type` key for routed frames,
    /// `data` unchanged otherwise.
    pub fn event_data(&self) -> Option<Value> {
        if !self.is_routed() {
            return self.data.clone();
        }
        let Some(Value::Object(map)) = &self.data else {
            return None;
        };
        let mut body = map.clone();
        let _ = body.remove("type");
        if body.len() == 1 {
            if let Some(value) = body.remove(ROUTED_VALUE_KEY) {
                return Some(value);
            }
        }
        Some(Value::Object(body))
    }
}

/// Serialize a frame to its wire text.
pub fn encode(frame: &Frame) -> Result<String, FrameError> {
    serde_json::to_string(frame).map_err(FrameError::Encode)
}

/// Parse wire text into a frame.
pub fn decode(text: &str) -> Result<Frame, FrameError> {
    let value: Value = serde_json::from_str(text).map_err(FrameError::Json)?;
    from_value(value)
}

/// Parse raw wire bytes into a frame.
pub fn decode_slice(bytes: &[u8]) -> Result<Frame, FrameError> {
    let value: Value = serde_json::from_slice(bytes).map_err(FrameError::Json)?;
    from_value(value)
}

fn from_value(value: Value) -> Result<Frame, FrameError> {
    let Value::Object(mut map) = value else {
        return Err(FrameError::NotAnObject);
    };
    let kind = match map.remove("type") {
        Some(Value::String(kind)) => kind,
        Some(_) => return Err(FrameError::InvalidType),
        None => return Err(FrameError::MissingType),
    };
    let channel = match map.remove("channel") {
        Some(Value::String(channel)) => Some(channel),
        Some(Value::Null) | None => None,
        Some(_) => return Err(FrameError::InvalidChannel),
    };
    // `data: null` is kept as `Some(Null)` so decode(encode(f)) == f.
    let data = map.remove("data");
    Ok(Frame {
        kind,
        channel,
        data,
    })
}
