//! # livefeed-client
//!
//! Keeps one persistent channel to a live-feed server, multiplexes topic
//! subscriptions over it, and recovers from disconnects with bounded
//! linear backoff.
//!
//! - [`machine`]: the pure lifecycle state machine (events in, actions out)
//! - [`dispatcher`]: parses inbound payloads and routes them to topic handlers
//! - [`publisher`]: status and notification fan-out
//! - [`transport`]: the channel abstraction with WebSocket and in-memory impls
//! - [`LiveFeed`]: the handle consumers hold
//!
//! ```ignore
//! let feed = LiveFeed::connect(FeedConfig::new("wss://dash.example.com/api/ws"));
//! feed.subscribe("prices");
//! let _id = feed.on_topic("prices", |m: &InboundMessage| -> Result<(), HandlerError> {
//!     println!("{}", m.payload);
//!     Ok(())
//! });
//! ```

#![deny(unsafe_code)]

pub mod dispatcher;
pub mod errors;
pub mod feed;
pub mod machine;
pub mod publisher;
mod runtime;
pub mod transport;

pub use dispatcher::{HandlerError, HandlerId, LastMessage, TopicHandler};
pub use errors::{FeedError, Result};
pub use feed::{FeedConfig, LiveFeed};
pub use machine::{Action, ChannelId, ConnectionMachine, Event, TimerId};
pub use publisher::StatusPublisher;
pub use transport::{
    Channel, Connector, Frame, MemoryConnector, MemoryListener, MemoryPeer, TransportError,
    WsConnector,
};
