//! Full-duplex message channel abstraction.
//!
//! The lifecycle controller only needs to open a channel against an
//! endpoint, write frames, read frames and close it. Anything that can do
//! that is a transport:
//!
//! - [`ws::WsConnector`]: WebSocket via `tokio-tungstenite`
//! - [`memory::MemoryConnector`]: in-process pair for tests and embedding

pub mod memory;
pub mod ws;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::{MemoryConnector, MemoryListener, MemoryPeer};
pub use ws::WsConnector;

/// A data frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Binary(Vec<u8>),
}

impl Frame {
    /// Text payload, decoding binary frames as UTF-8.
    pub fn into_text(self) -> Result<String, TransportError> {
        match self {
            Self::Text(text) => Ok(text),
            Self::Binary(bytes) => {
                String::from_utf8(bytes).map_err(|e| TransportError::Decode(e.to_string()))
            }
        }
    }
}

/// Transport failures.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The channel could not be established.
    #[error("failed to connect to {endpoint}: {reason}")]
    Connect {
        /// Target endpoint.
        endpoint: String,
        /// Underlying cause.
        reason: String,
    },
    /// Writing a frame failed.
    #[error("send failed: {0}")]
    Send(String),
    /// Reading a frame failed.
    #[error("receive failed: {0}")]
    Receive(String),
    /// A frame could not be decoded as text.
    #[error("frame is not valid UTF-8: {0}")]
    Decode(String),
    /// The channel is already closed.
    #[error("channel closed")]
    Closed,
}

/// Opens channels.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish a new channel to `endpoint`.
    async fn open(&self, endpoint: &str) -> Result<Box<dyn Channel>, TransportError>;
}

/// One open channel.
///
/// `recv` yields `None` once the channel has closed; after an `Err` the
/// next call yields `None`, so a failure is reported exactly once.
#[async_trait]
pub trait Channel: Send {
    /// Write one frame.
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Read the next frame. Must be cancel-safe.
    async fn recv(&mut self) -> Option<Result<Frame, TransportError>>;

    /// Close the channel. Closing twice is not an error.
    async fn close(&mut self) -> Result<(), TransportError>;
}
