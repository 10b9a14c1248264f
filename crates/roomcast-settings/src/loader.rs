//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RoomcastSettings::default()`]
//! 2. If `~/.roomcast/settings.json` exists, deep-merge it over the defaults
//! 3. Apply `ROOMCAST_*` environment variable overrides (highest priority)
//! 4. Validate cross-field constraints
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::RoomcastSettings;

/// Resolve the path to the settings file (`~/.roomcast/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".roomcast").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RoomcastSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; a file with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<RoomcastSettings> {
    let mut settings = read_settings_file(path)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Defaults deep-merged with the file at `path`, without env overrides.
pub fn read_settings_file(path: &Path) -> Result<RoomcastSettings> {
    let defaults = serde_json::to_value(RoomcastSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Reject settings that would make the client backoff or gateway unusable.
pub fn validate(settings: &RoomcastSettings) -> Result<()> {
    let client = &settings.client;
    if !client.backoff_multiplier.is_finite() || client.backoff_multiplier < 1.0 {
        return Err(SettingsError::InvalidValue(format!(
            "client.backoffMultiplier must be >= 1, got {}",
            client.backoff_multiplier
        )));
    }
    if client.max_delay_ms < client.initial_delay_ms {
        return Err(SettingsError::InvalidValue(format!(
            "client.maxDelayMs ({}) is below client.initialDelayMs ({})",
            client.max_delay_ms, client.initial_delay_ms
        )));
    }
    if settings.server.heartbeat_timeout_secs < settings.server.heartbeat_interval_secs {
        return Err(SettingsError::InvalidValue(
            "server.heartbeatTimeoutSecs must be >= server.heartbeatIntervalSecs".to_string(),
        ));
    }
    Ok(())
}

/// Apply `ROOMCAST_*` environment variable overrides.
pub fn apply_env_overrides(settings: &mut RoomcastSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides using an arbitrary variable lookup.
///
/// Invalid values are ignored with a warning and the file/default value is
/// kept.
pub fn apply_overrides_from(
    settings: &mut RoomcastSettings,
    lookup: impl Fn(&str) -> Option<String>,
) {
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());
    let parsed = |name: &str, min: u64, max: u64| -> Option<u64> {
        let val = read(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid numeric env var, ignoring");
        }
        result
    };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read("ROOMCAST_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = parsed("ROOMCAST_PORT", 0, 65535) {
        settings.server.port = v as u16;
    }
    if let Some(v) = parsed("ROOMCAST_MAX_CONNECTIONS", 1, 1_000_000) {
        settings.server.max_connections = v as usize;
    }
    if let Some(v) = parsed("ROOMCAST_HEARTBEAT_INTERVAL_SECS", 1, 3600) {
        settings.server.heartbeat_interval_secs = v;
    }
    if let Some(v) = parsed("ROOMCAST_HEARTBEAT_TIMEOUT_SECS", 1, 3600) {
        settings.server.heartbeat_timeout_secs = v;
    }

    // ── Client ──────────────────────────────────────────────────────
    if let Some(val) = read("ROOMCAST_RECONNECT") {
        match parse_bool(&val) {
            Some(v) => settings.client.reconnect = v,
            None => warn!(key = "ROOMCAST_RECONNECT", value = %val, "invalid boolean env var, ignoring"),
        }
    }
    if let Some(v) = parsed("ROOMCAST_RECONNECT_INITIAL_DELAY_MS", 1, 3_600_000) {
        settings.client.initial_delay_ms = v;
    }
    if let Some(v) = parsed("ROOMCAST_RECONNECT_MAX_DELAY_MS", 1, 3_600_000) {
        settings.client.max_delay_ms = v;
    }
    if let Some(v) = parsed("ROOMCAST_RECONNECT_MAX_ATTEMPTS", 0, 1_000_000) {
        settings.client.max_attempts = v as u32;
    }
    if let Some(v) = parsed("ROOMCAST_MAX_QUEUE_SIZE", 0, 1_000_000) {
        settings.client.max_queue_size = v as usize;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read("ROOMCAST_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(val) = read("ROOMCAST_LOG_JSON") {
        if let Some(v) = parse_bool(&val) {
            settings.logging.json = v;
        }
    }
}

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn deep_merge_nested_objects() {
        let merged = deep_merge(
            json!({"server": {"host": "a", "port": 1}, "x": [1]}),
            json!({"server": {"port": 2}, "x": [9, 9], "y": null}),
        );
        assert_eq!(merged, json!({"server": {"host": "a", "port": 2}, "x": [9, 9]}));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let s = read_settings_file(&dir.path().join("nope.json")).unwrap();
        assert_eq!(s.server.port, 8787);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server":{"port":9100},"client":{"maxAttempts":4}}"#).unwrap();
        let s = read_settings_file(&path).unwrap();
        assert_eq!(s.server.port, 9100);
        assert_eq!(s.client.max_attempts, 4);
        assert_eq!(s.client.initial_delay_ms, 1000);
    }

    #[test]
    fn invalid_json_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            read_settings_file(&path),
            Err(SettingsError::Json(_))
        ));
    }

    #[test]
    fn env_overrides_apply() {
        let mut s = RoomcastSettings::default();
        apply_overrides_from(
            &mut s,
            env(&[
                ("ROOMCAST_HOST", "0.0.0.0"),
                ("ROOMCAST_PORT", "9001"),
                ("ROOMCAST_RECONNECT", "off"),
                ("ROOMCAST_RECONNECT_MAX_ATTEMPTS", "7"),
                ("ROOMCAST_MAX_QUEUE_SIZE", "12"),
                ("ROOMCAST_LOG_LEVEL", "debug"),
            ]),
        );
        assert_eq!(s.server.host, "0.0.0.0");
        assert_eq!(s.server.port, 9001);
        assert!(!s.client.reconnect);
        assert_eq!(s.client.max_attempts, 7);
        assert_eq!(s.client.max_queue_size, 12);
        assert_eq!(s.logging.level, "debug");
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut s = RoomcastSettings::default();
        apply_overrides_from(
            &mut s,
            env(&[
                ("ROOMCAST_PORT", "99999"),
                ("ROOMCAST_RECONNECT", "maybe"),
                ("ROOMCAST_HOST", ""),
            ]),
        );
        assert_eq!(s.server.port, 8787);
        assert!(s.client.reconnect);
        assert_eq!(s.server.host, "127.0.0.1");
    }

    #[test]
    fn validate_rejects_shrinking_backoff() {
        let mut s = RoomcastSettings::default();
        s.client.backoff_multiplier = 0.5;
        assert!(matches!(validate(&s), Err(SettingsError::InvalidValue(_))));
    }

    #[test]
    fn validate_rejects_inverted_delays() {
        let mut s = RoomcastSettings::default();
        s.client.initial_delay_ms = 10_000;
        s.client.max_delay_ms = 100;
        assert!(validate(&s).is_err());
    }

    #[test]
    fn validate_accepts_defaults() {
        assert!(validate(&RoomcastSettings::default()).is_ok());
    }

    #[test]
    fn parse_helpers() {
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("nah"), None);
        assert_eq!(parse_u64_range("5", 1, 10), Some(5));
        assert_eq!(parse_u64_range("11", 1, 10), None);
        assert_eq!(parse_u64_range("x", 1, 10), None);
    }
}
