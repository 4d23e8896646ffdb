//! # livefeed-settings
//!
//! Layered configuration for the live feed.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`FeedSettings::default()`]
//! 2. **User file**: `~/.livefeed/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `LIVEFEED_*` overrides (highest priority)
//!
//! The channel endpoint is resolved from these settings once per connect
//! attempt via [`FeedSettings::resolve_endpoint`]. A missing or invalid
//! endpoint is a configuration error that the lifecycle controller never
//! retries.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::{FeedSettings, ReconnectSettings};
