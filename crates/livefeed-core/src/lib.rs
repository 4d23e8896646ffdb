//! # livefeed-core
//!
//! Foundation types shared by every livefeed crate:
//!
//! - **Status**: [`ConnectionStatus`], the single lifecycle value consumers observe
//! - **Topics**: [`Topic`] and the insertion-ordered [`TopicRegistry`]
//! - **Wire messages**: outbound [`ControlMessage`]s, parsed [`InboundMessage`]s
//! - **Reconnect policy**: [`ReconnectPolicy`] (constants) and [`ReconnectState`] (counter)
//! - **Notifications**: [`Notification`] events surfaced to consumers
//! - **Logging**: `tracing` subscriber setup and test capture helpers

#![deny(unsafe_code)]

pub mod errors;
pub mod logging;
pub mod messages;
pub mod retry;
pub mod status;
pub mod topic;

pub use errors::{CoreError, Result};
pub use messages::{ControlAction, ControlMessage, InboundMessage, Notification};
pub use retry::{ReconnectPolicy, ReconnectState, RetryDecision};
pub use status::ConnectionStatus;
pub use topic::{Topic, TopicRegistry};
