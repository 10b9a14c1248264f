//! Chat events served by the stock binary.
//!
//! | event     | data                  | effect                                   |
//! |-----------|-----------------------|------------------------------------------|
//! | `message` | `{text}`              | broadcast `message` to the frame channel |
//! | `whisper` | `{to, text}`          | send `whisper` to every device of `to`   |
//! | `emit`    | `{to, event, data?}`  | channel-or-user addressed emit           |
//! | `join`    | `{channel}`           | join a channel, reply `joined`           |
//! | `leave`   | `{channel}`           | leave a channel, reply `left`            |

use roomcast_core::DEFAULT_CHANNEL;
use roomcast_server::{BroadcastFilter, EventTable, HandlerError, RoomContext, handler_fn};
use serde_json::{Value, json};

fn str_field<'a>(data: Option<&'a Value>, key: &str) -> Result<&'a str, HandlerError> {
    data.and_then(|d| d.get(key))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerError::InvalidPayload(format!("missing {key}")))
}

fn sender(ctx: &RoomContext<'_>) -> Result<String, HandlerError> {
    ctx.user_id()
        .map(str::to_owned)
        .ok_or_else(|| HandlerError::Failed("socket left before its event ran".into()))
}

/// Event table for the chat room.
pub fn chat_events() -> EventTable {
    let mut events = EventTable::new();

    let _ = events.on(
        "message",
        handler_fn(|ctx, data| {
            let channel = ctx.channel().unwrap_or(DEFAULT_CHANNEL).to_owned();
            if !ctx.meta().is_some_and(|m| m.in_channel(&channel)) {
                return Err(HandlerError::InvalidPayload(format!(
                    "not a member of {channel}"
                )));
            }
            let text = str_field(data.as_ref(), "text")?;
            let payload = json!({ "from": sender(ctx)?, "text": text });
            let _ = ctx.broadcast(&channel, "message", Some(payload), &BroadcastFilter::none());
            Ok(())
        }),
    );

    let _ = events.on(
        "whisper",
        handler_fn(|ctx, data| {
            let to = str_field(data.as_ref(), "to")?.to_owned();
            let text = str_field(data.as_ref(), "text")?;
            let payload = json!({ "from": sender(ctx)?, "text": text });
            let reached = ctx.send_to_user(&to, None, "whisper", Some(payload));
            let _ = ctx.reply("delivered", Some(json!({ "to": to, "reached": reached })));
            Ok(())
        }),
    );

    let _ = events.on(
        "emit",
        handler_fn(|ctx, data| {
            let to = str_field(data.as_ref(), "to")?.to_owned();
            let event = str_field(data.as_ref(), "event")?.to_owned();
            let payload = data.as_ref().and_then(|d| d.get("data")).cloned();
            let reached = ctx.emit_to(&to, &event, payload);
            let _ = ctx.reply("delivered", Some(json!({ "to": to, "reached": reached })));
            Ok(())
        }),
    );

    let _ = events.on(
        "join",
        handler_fn(|ctx, data| {
            let channel = str_field(data.as_ref(), "channel")?.to_owned();
            let changed = ctx.join_channel(&channel);
            let _ = ctx.reply("joined", Some(json!({ "channel": channel, "changed": changed })));
            Ok(())
        }),
    );

    let _ = events.on(
        "leave",
        handler_fn(|ctx, data| {
            let channel = str_field(data.as_ref(), "channel")?.to_owned();
            let changed = ctx.leave_channel(&channel);
            let _ = ctx.reply("left", Some(json!({ "channel": channel, "changed": changed })));
            Ok(())
        }),
    );

    events
}
