//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`FeedSettings::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply `LIVEFEED_*` environment overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{FeedSettings, ReconnectSettings};

/// Accepted `maxAttempts` values.
pub const MAX_ATTEMPTS_RANGE: RangeInclusive<u64> = 0..=1000;
/// Accepted `baseDelayMs` values.
pub const BASE_DELAY_MS_RANGE: RangeInclusive<u64> = 1..=600_000;
/// Accepted `minStableUptimeMs` values.
pub const MIN_STABLE_UPTIME_MS_RANGE: RangeInclusive<u64> = 0..=3_600_000;

/// Resolve the path to the settings file (`~/.livefeed/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".livefeed").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<FeedSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<FeedSettings> {
    let mut settings = load_file_layer(path)?;
    apply_overrides(&mut settings, |name| std::env::var(name).ok());
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<FeedSettings> {
    let defaults = serde_json::to_value(FeedSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: FeedSettings = serde_json::from_value(merged)?;
    check_reconnect_ranges(&mut settings.reconnect);
    Ok(settings)
}

/// Reset file-sourced reconnect values that fall outside the ranges the
/// env overrides accept.
fn check_reconnect_ranges(reconnect: &mut ReconnectSettings) {
    let defaults = ReconnectSettings::default();
    if !MAX_ATTEMPTS_RANGE.contains(&u64::from(reconnect.max_attempts)) {
        warn!(value = reconnect.max_attempts, "reconnect.maxAttempts out of range, using default");
        reconnect.max_attempts = defaults.max_attempts;
    }
    if !BASE_DELAY_MS_RANGE.contains(&reconnect.base_delay_ms) {
        warn!(value = reconnect.base_delay_ms, "reconnect.baseDelayMs out of range, using default");
        reconnect.base_delay_ms = defaults.base_delay_ms;
    }
    if let Some(uptime) = reconnect.min_stable_uptime_ms {
        if !MIN_STABLE_UPTIME_MS_RANGE.contains(&uptime) {
            warn!(value = uptime, "reconnect.minStableUptimeMs out of range, ignoring");
            reconnect.min_stable_uptime_ms = None;
        }
    }
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

/// Apply `LIVEFEED_*` overrides read through `lookup`.
///
/// Numbers must parse and fall within range; invalid values are logged and
/// ignored (the file/default value stays).
pub fn apply_overrides(settings: &mut FeedSettings, lookup: impl Fn(&str) -> Option<String>) {
    let string = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(v) = string("LIVEFEED_WS_URL") {
        settings.endpoint = Some(v);
    }
    if let Some(v) = string("LIVEFEED_ORIGIN") {
        settings.origin = Some(v);
    }
    if let Some(v) = string("LIVEFEED_WS_PATH") {
        settings.ws_path = v;
    }
    if let Some(v) = string("LIVEFEED_LOG_LEVEL") {
        settings.log_level = v;
    }

    if let Some(v) = read_u64(&lookup, "LIVEFEED_MAX_RECONNECT_ATTEMPTS", &MAX_ATTEMPTS_RANGE)
        .and_then(|v| u32::try_from(v).ok())
    {
        settings.reconnect.max_attempts = v;
    }
    if let Some(v) = read_u64(&lookup, "LIVEFEED_RECONNECT_DELAY_MS", &BASE_DELAY_MS_RANGE) {
        settings.reconnect.base_delay_ms = v;
    }
    if let Some(v) = read_u64(
        &lookup,
        "LIVEFEED_MIN_STABLE_UPTIME_MS",
        &MIN_STABLE_UPTIME_MS_RANGE,
    ) {
        settings.reconnect.min_stable_uptime_ms = Some(v);
    }
}

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn read_u64(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    range: &RangeInclusive<u64>,
) -> Option<u64> {
    let val = lookup(name)?;
    let result = parse_u64_range(&val, *range.start(), *range.end());
    if result.is_none() {
        warn!(key = name, value = %val, "invalid numeric env var, ignoring");
    }
    result
}
