//! Presence hooks: per-user online status kept in durable storage.
//!
//! Each user has a `presence:<userId>` record counting their live devices.
//! Connect and disconnect keep the count current. After a restart the
//! records may be stale (disconnects can be lost while the room was
//! hibernating), so the restore hook recomputes every record from the
//! rebuilt registry in one transaction.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use roomcast_core::{ConnectionMeta, DEFAULT_CHANNEL};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::dispatch::HandlerError;
use crate::registry::SessionRegistry;
use crate::room::{RoomContext, RoomHooks};
use crate::router::BroadcastFilter;
use crate::storage::{Storage, StorageOp};

/// Storage key prefix for presence records.
pub const PRESENCE_PREFIX: &str = "presence:";

/// Event broadcast to the default channel when a user's status changes.
pub const PRESENCE_EVENT: &str = "presence";

/// Online or offline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    /// At least one live device.
    Online,
    /// No live devices.
    Offline,
}

/// Durable presence of one user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    /// User id.
    pub user_id: String,
    /// Name shown to other users. Set by the application and carried
    /// across every update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Current status.
    pub status: PresenceStatus,
    /// Live sockets for this user.
    pub device_count: u32,
    /// Last time the record changed.
    pub last_seen: DateTime<Utc>,
}

impl PresenceRecord {
    /// Record for a user with `devices` live sockets.
    pub fn new(user_id: impl Into<String>, devices: u32, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: None,
            status: if devices > 0 {
                PresenceStatus::Online
            } else {
                PresenceStatus::Offline
            },
            device_count: devices,
            last_seen: now,
        }
    }

    /// Set the display name.
    #[must_use]
    pub fn with_display_name(mut self, name: Option<String>) -> Self {
        self.display_name = name;
        self
    }
}

/// A stored presence value as read, with its decoded record when readable.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredPresence {
    /// Decoded record, `None` if the stored value is unreadable.
    pub record: Option<PresenceRecord>,
    /// The value exactly as stored.
    pub raw: Value,
}

/// Storage key for a user's record.
pub fn presence_key(user_id: &str) -> String {
    format!("{PRESENCE_PREFIX}{user_id}")
}

/// Read a user's record.
pub fn load(storage: &dyn Storage, user_id: &str) -> Result<Option<PresenceRecord>, HandlerError> {
    storage
        .get(&presence_key(user_id))?
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| HandlerError::Failed(format!("corrupt presence record: {e}")))
}

/// Every stored value under [`PRESENCE_PREFIX`], keyed by user id.
pub fn load_all(storage: &dyn Storage) -> Result<BTreeMap<String, StoredPresence>, HandlerError> {
    let mut records = BTreeMap::new();
    for (key, raw) in storage.list(PRESENCE_PREFIX)? {
        let Some(user_id) = key.strip_prefix(PRESENCE_PREFIX) else {
            continue;
        };
        let record = match serde_json::from_value::<PresenceRecord>(raw.clone()) {
            Ok(record) => Some(record),
            Err(e) => {
                debug!(key, error = %e, "unreadable presence record");
                None
            }
        };
        let _ = records.insert(user_id.to_owned(), StoredPresence { record, raw });
    }
    Ok(records)
}

/// Writes that bring stored records in line with the live registry.
///
/// Users with live sockets get their device count; stored users with none
/// go offline. Records that already match are left alone, unreadable ones
/// are rewritten. Each write is guarded by the value exactly as it was read.
pub fn reconcile_ops(
    stored: &BTreeMap<String, StoredPresence>,
    registry: &SessionRegistry,
    now: DateTime<Utc>,
) -> Result<Vec<StorageOp>, HandlerError> {
    let mut live: BTreeMap<String, u32> = BTreeMap::new();
    for (_, meta) in registry.iter() {
        *live.entry(meta.user_id.clone()).or_default() += 1;
    }

    let mut ops = Vec::new();
    let users: std::collections::BTreeSet<&String> = stored.keys().chain(live.keys()).collect();
    for user in users {
        let devices = live.get(user).copied().unwrap_or(0);
        let entry = stored.get(user);
        let current = entry.and_then(|e| e.record.as_ref());
        if current.is_some_and(|r| r.device_count == devices && (devices > 0) == (r.status == PresenceStatus::Online)) {
            continue;
        }
        let record = PresenceRecord::new(user.as_str(), devices, now)
            .with_display_name(current.and_then(|r| r.display_name.clone()));
        ops.push(StorageOp::Expect {
            key: presence_key(user),
            value: entry.map(|e| e.raw.clone()),
        });
        ops.push(StorageOp::Put {
            key: presence_key(user),
            value: to_value(&record)?,
        });
    }
    Ok(ops)
}

fn to_value(record: &PresenceRecord) -> Result<Value, HandlerError> {
    serde_json::to_value(record).map_err(|e| HandlerError::Failed(format!("encode presence: {e}")))
}

/// Hooks that maintain presence records and announce status changes.
#[derive(Clone, Copy, Debug, Default)]
pub struct PresenceHooks;

impl PresenceHooks {
    fn update(ctx: &mut RoomContext<'_>, user_id: &str) -> Result<PresenceRecord, HandlerError> {
        let devices = u32::try_from(ctx.registry().sessions_for_user(user_id).len()).unwrap_or(u32::MAX);
        let previous = load(ctx.storage(), user_id)?;
        let record = PresenceRecord::new(user_id, devices, Utc::now())
            .with_display_name(previous.as_ref().and_then(|p| p.display_name.clone()));
        ctx.storage().put(&presence_key(user_id), to_value(&record)?)?;

        if previous.is_none_or(|p| p.status != record.status) {
            let filter = match ctx.connection_id() {
                Some(conn) => BroadcastFilter::except(conn.clone()),
                None => BroadcastFilter::none(),
            };
            let payload = serde_json::to_value(&record).ok();
            let _ = ctx.broadcast(DEFAULT_CHANNEL, PRESENCE_EVENT, payload, &filter);
        }
        Ok(record)
    }
}

#[async_trait]
impl RoomHooks for PresenceHooks {
    async fn on_connect(&self, ctx: &mut RoomContext<'_>) -> Result<(), HandlerError> {
        let Some(user_id) = ctx.user_id().map(str::to_owned) else {
            return Ok(());
        };
        let record = Self::update(ctx, &user_id)?;
        debug!(user_id, devices = record.device_count, "presence updated on connect");
        Ok(())
    }

    async fn on_disconnect(&self, ctx: &mut RoomContext<'_>, meta: &ConnectionMeta) -> Result<(), HandlerError> {
        let record = Self::update(ctx, &meta.user_id)?;
        debug!(user_id = %meta.user_id, devices = record.device_count, "presence updated on disconnect");
        Ok(())
    }

    async fn on_hibernation_restore(&self, ctx: &mut RoomContext<'_>) -> Result<(), HandlerError> {
        let stored = load_all(ctx.storage())?;
        let ops = reconcile_ops(&stored, ctx.registry(), Utc::now())?;
        let changed = ops.len() / 2;
        if !ops.is_empty() {
            ctx.storage().transaction(ops)?;
        }
        info!(room = ctx.room(), changed, "presence reconciled after restart");
        Ok(())
    }
}
