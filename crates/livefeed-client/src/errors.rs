//! Client error types.

use thiserror::Error;

/// Errors returned by the [`LiveFeed`](crate::LiveFeed) facade.
///
/// Connectivity problems are never returned here: they show up as status
/// changes and notifications.
#[derive(Debug, Error)]
pub enum FeedError {
    /// The outbound message could not be serialized to JSON.
    #[error("failed to serialize outbound message: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Result type for facade operations.
pub type Result<T> = std::result::Result<T, FeedError>;
