//! Settings types.

use std::time::Duration;

use livefeed_core::ReconnectPolicy;
use livefeed_core::retry::{DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Path appended to an HTTP origin when deriving the channel endpoint.
pub const DEFAULT_WS_PATH: &str = "/api/ws";

/// Top-level feed settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeedSettings {
    /// Explicit channel endpoint (`ws://` or `wss://`). Wins over `origin`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// HTTP origin of the dashboard (`https://host`); the endpoint is
    /// derived from it when `endpoint` is unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    /// Path appended to `origin`.
    pub ws_path: String,
    /// Reconnect policy.
    pub reconnect: ReconnectSettings,
    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            origin: None,
            ws_path: DEFAULT_WS_PATH.to_string(),
            reconnect: ReconnectSettings::default(),
            log_level: "info".to_string(),
        }
    }
}

/// Reconnect policy settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectSettings {
    /// Maximum consecutive reconnect attempts.
    pub max_attempts: u32,
    /// Base delay in milliseconds; attempt `n` waits `n * baseDelayMs`.
    pub base_delay_ms: u64,
    /// Minimum time a channel must stay open before the attempt counter is
    /// reset. Unset: reset on every successful open.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_stable_uptime_ms: Option<u64>,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: u64::try_from(DEFAULT_BASE_DELAY.as_millis()).unwrap_or(u64::MAX),
            min_stable_uptime_ms: None,
        }
    }
}

impl ReconnectSettings {
    /// Convert to the policy the lifecycle controller runs on.
    pub fn to_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            min_stable_uptime: self.min_stable_uptime_ms.map(Duration::from_millis),
        }
    }
}

impl FeedSettings {
    /// Resolve the channel endpoint.
    ///
    /// Returns `None` when nothing usable is configured. That is a
    /// configuration error, not a connectivity failure.
    pub fn resolve_endpoint(&self) -> Option<String> {
        if let Some(endpoint) = non_empty(self.endpoint.as_deref()) {
            if is_ws_url(endpoint) {
                return Some(endpoint.to_string());
            }
            warn!(endpoint, "endpoint must use ws:// or wss://, ignoring");
            return None;
        }

        let origin = non_empty(self.origin.as_deref())?;
        let origin = origin.trim_end_matches('/');
        let path = if self.ws_path.starts_with('/') {
            self.ws_path.clone()
        } else {
            format!("/{}", self.ws_path)
        };

        if let Some(host) = origin.strip_prefix("https://") {
            Some(format!("wss://{host}{path}"))
        } else if let Some(host) = origin.strip_prefix("http://") {
            Some(format!("ws://{host}{path}"))
        } else if is_ws_url(origin) {
            Some(format!("{origin}{path}"))
        } else {
            warn!(origin, "origin must use http(s):// or ws(s)://, ignoring");
            None
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn is_ws_url(value: &str) -> bool {
    let host = value
        .strip_prefix("ws://")
        .or_else(|| value.strip_prefix("wss://"));
    host.is_some_and(|h| !h.is_empty())
}
