//! In-process transport.
//!
//! [`MemoryConnector::new`] returns a connector and a [`MemoryListener`].
//! Every successful `open` hands a [`MemoryPeer`] (the server end) to the
//! listener. The peer can push frames, inject a receive error, close the
//! channel, and read whatever the client wrote.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::{Channel, Connector, Frame, TransportError};

type Incoming = Result<Frame, TransportError>;

/// Connector whose channels terminate in this process.
#[derive(Clone)]
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
    refusing: Arc<AtomicBool>,
    attempts: Arc<Mutex<Vec<Instant>>>,
}

impl MemoryConnector {
    /// Create a connector and the listener that receives its peers.
    pub fn new() -> (Self, MemoryListener) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let connector = Self {
            accept_tx,
            refusing: Arc::new(AtomicBool::new(false)),
            attempts: Arc::new(Mutex::new(Vec::new())),
        };
        (connector, MemoryListener { accept_rx })
    }

    /// Make subsequent opens fail (`true`) or succeed (`false`).
    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Number of `open` calls so far.
    pub fn attempts(&self) -> usize {
        self.attempts.lock().len()
    }

    /// When each `open` call happened.
    pub fn attempt_times(&self) -> Vec<Instant> {
        self.attempts.lock().clone()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self, endpoint: &str) -> Result<Box<dyn Channel>, TransportError> {
        self.attempts.lock().push(Instant::now());

        let refuse = |reason: &str| TransportError::Connect {
            endpoint: endpoint.to_string(),
            reason: reason.to_string(),
        };
        if self.refusing.load(Ordering::SeqCst) {
            return Err(refuse("connection refused"));
        }

        let (to_client, incoming) = mpsc::unbounded_channel();
        let (outgoing, from_client) = mpsc::unbounded_channel();
        let peer = MemoryPeer {
            endpoint: endpoint.to_string(),
            to_client: Some(to_client),
            from_client,
        };
        self.accept_tx
            .send(peer)
            .map_err(|_| refuse("listener dropped"))?;

        Ok(Box::new(MemoryChannel {
            incoming,
            outgoing: Some(outgoing),
            done: false,
        }))
    }
}

/// Receives the server end of every channel opened through the connector.
pub struct MemoryListener {
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryListener {
    /// Wait for the next opened channel.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.recv().await
    }

    /// Take an already opened channel without waiting.
    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.try_recv().ok()
    }
}

/// Server end of a memory channel.
pub struct MemoryPeer {
    endpoint: String,
    to_client: Option<mpsc::UnboundedSender<Incoming>>,
    from_client: mpsc::UnboundedReceiver<Frame>,
}

impl MemoryPeer {
    /// Endpoint the client asked for.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Push a text frame to the client. `false` if the client is gone.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.push(Ok(Frame::Text(text.into())))
    }

    /// Push a binary frame to the client.
    pub fn send_binary(&self, bytes: impl Into<Vec<u8>>) -> bool {
        self.push(Ok(Frame::Binary(bytes.into())))
    }

    /// Make the client's next read fail. The channel is unusable afterwards.
    pub fn fail(&mut self, reason: &str) {
        let _ = self.push(Err(TransportError::Receive(reason.to_string())));
        self.to_client = None;
    }

    /// Close from the server side.
    pub fn close(&mut self) {
        self.to_client = None;
    }

    /// Next frame written by the client; `None` once the client closed.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.from_client.recv().await
    }

    /// Next text frame written by the client.
    pub async fn recv_text(&mut self) -> Option<String> {
        match self.recv().await? {
            Frame::Text(text) => Some(text),
            Frame::Binary(bytes) => String::from_utf8(bytes).ok(),
        }
    }

    /// A frame the client already wrote, without waiting.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.from_client.try_recv().ok()
    }

    fn push(&self, item: Incoming) -> bool {
        self.to_client
            .as_ref()
            .is_some_and(|tx| tx.send(item).is_ok())
    }
}

struct MemoryChannel {
    incoming: mpsc::UnboundedReceiver<Incoming>,
    outgoing: Option<mpsc::UnboundedSender<Frame>>,
    done: bool,
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let tx = self.outgoing.as_ref().ok_or(TransportError::Closed)?;
        tx.send(frame).map_err(|_| TransportError::Closed)
    }

    async fn recv(&mut self) -> Option<Result<Frame, TransportError>> {
        if self.done {
            return None;
        }
        let item = self.incoming.recv().await;
        if !matches!(item, Some(Ok(_))) {
            self.done = true;
        }
        item
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.done = true;
        self.outgoing = None;
        self.incoming.close();
        Ok(())
    }
}
