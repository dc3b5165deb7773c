//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`GatewaySettings::default()`]
//! 2. If `~/.gateway/settings.json` exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::{GatewaySettings, MIN_RECONNECT_DELAY_MS};

/// Gateway endpoint URL.
pub const ENV_URL: &str = "GATEWAY_URL";
/// Bearer token.
pub const ENV_TOKEN: &str = "GATEWAY_TOKEN";
/// Shared password.
pub const ENV_PASSWORD: &str = "GATEWAY_PASSWORD";
/// Heartbeat interval override.
pub const ENV_HEARTBEAT_INTERVAL_MS: &str = "GATEWAY_HEARTBEAT_INTERVAL_MS";
/// Heartbeat timeout override.
pub const ENV_HEARTBEAT_TIMEOUT_MS: &str = "GATEWAY_HEARTBEAT_TIMEOUT_MS";
/// Handshake timeout override.
pub const ENV_HANDSHAKE_TIMEOUT_MS: &str = "GATEWAY_HANDSHAKE_TIMEOUT_MS";
/// Reconnect delay cap override.
pub const ENV_RECONNECT_MAX_DELAY_MS: &str = "GATEWAY_RECONNECT_MAX_DELAY_MS";

/// Resolve the path to the settings file (`~/.gateway/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".gateway").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<GatewaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults (plus overrides). If the
/// file contains invalid JSON, or the result fails validation, returns an
/// error.
pub fn load_settings_from_path(path: &Path) -> Result<GatewaySettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<GatewaySettings> {
    let defaults = serde_json::to_value(GatewaySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
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

/// Apply process environment overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut GatewaySettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary variable lookup.
///
/// - Empty strings are treated as unset
/// - Integers must parse and fall within range, otherwise they are ignored
///   with a warning (falling back to file/default)
pub fn apply_overrides(settings: &mut GatewaySettings, lookup: impl Fn(&str) -> Option<String>) {
    let string = |name: &str| lookup(name).filter(|v| !v.is_empty());
    let ms = |name: &str, min: u64, max: u64| {
        let val = lookup(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid millisecond env var, ignoring");
        }
        result
    };

    if let Some(v) = string(ENV_URL) {
        settings.url = v;
    }
    if let Some(v) = string(ENV_TOKEN) {
        settings.token = Some(v);
    }
    if let Some(v) = string(ENV_PASSWORD) {
        settings.password = Some(v);
    }
    if let Some(v) = ms(ENV_HEARTBEAT_INTERVAL_MS, 100, 3_600_000) {
        settings.heartbeat.interval_ms = v;
    }
    if let Some(v) = ms(ENV_HEARTBEAT_TIMEOUT_MS, 100, 600_000) {
        settings.heartbeat.timeout_ms = v;
    }
    if let Some(v) = ms(ENV_HANDSHAKE_TIMEOUT_MS, 100, 600_000) {
        settings.handshake_timeout_ms = v;
    }
    if let Some(v) = ms(ENV_RECONNECT_MAX_DELAY_MS, MIN_RECONNECT_DELAY_MS, 3_600_000) {
        settings.reconnect.max_delay_ms = v;
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}
