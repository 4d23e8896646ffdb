//! Connection status as observed by consumers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle stage of the shared channel.
///
/// Exactly one value holds at any time. Only the lifecycle controller
/// changes it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// No channel and no pending attempt.
    #[default]
    Disconnected,
    /// A channel is being opened.
    Connecting,
    /// The channel is open and subscriptions have been replayed.
    Connected,
    /// Waiting out the backoff delay before the next attempt.
    Reconnecting,
}

impl ConnectionStatus {
    /// Wire/display name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }

    /// Whether outbound messages can be transmitted right now.
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
