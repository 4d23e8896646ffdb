//! Inbound message dispatch.
//!
//! Every payload is parsed once. Parsed messages always replace the
//! last-message slot, then go to the handlers registered for their routing
//! key (the `channel` field, else `topic`). A failing or panicking handler
//! is logged and skipped; it never affects other handlers or the channel.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use livefeed_core::{InboundMessage, Topic};
use tokio::sync::watch;
use tracing::{error, trace, warn};

/// Error type handlers may return.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Identifies a registered handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandlerId(pub(crate) u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler-{}", self.0)
    }
}

/// Receives messages routed to one topic.
///
/// Runs on the feed's event loop: keep it short and hand heavy work off to
/// another task.
pub trait TopicHandler: Send {
    /// Handle one message.
    fn handle(&self, message: &InboundMessage) -> Result<(), HandlerError>;
}

impl<F> TopicHandler for F
where
    F: Fn(&InboundMessage) -> Result<(), HandlerError> + Send,
{
    fn handle(&self, message: &InboundMessage) -> Result<(), HandlerError> {
        self(message)
    }
}

/// Shared slot holding the most recent parsed message.
pub type LastMessage = Option<Arc<InboundMessage>>;

/// Routes parsed payloads to topic handlers and the last-message slot.
pub struct Dispatcher {
    handlers: HashMap<Topic, Vec<(HandlerId, Box<dyn TopicHandler>)>>,
    last_message: watch::Sender<LastMessage>,
}

impl Dispatcher {
    /// Create a dispatcher publishing into `last_message`.
    pub fn new(last_message: watch::Sender<LastMessage>) -> Self {
        Self {
            handlers: HashMap::new(),
            last_message,
        }
    }

    /// Register a handler for a topic. Handlers for the same topic run in
    /// registration order.
    pub fn add_handler(&mut self, id: HandlerId, topic: Topic, handler: Box<dyn TopicHandler>) {
        trace!(%id, %topic, "handler registered");
        self.handlers.entry(topic).or_default().push((id, handler));
    }

    /// Remove a handler. Returns `false` if it was not registered.
    pub fn remove_handler(&mut self, id: HandlerId) -> bool {
        let mut found = false;
        self.handlers.retain(|_, handlers| {
            let before = handlers.len();
            handlers.retain(|(h, _)| *h != id);
            found |= handlers.len() < before;
            !handlers.is_empty()
        });
        found
    }

    /// Number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.values().map(Vec::len).sum()
    }

    /// Parse and route one payload.
    ///
    /// Returns the parsed message, or `None` if the payload was malformed
    /// and dropped.
    pub fn dispatch(&self, payload: &str) -> Option<Arc<InboundMessage>> {
        let message = match InboundMessage::parse(payload) {
            Ok(message) => Arc::new(message),
            Err(e) => {
                warn!(error = %e, bytes = payload.len(), "dropping malformed payload");
                return None;
            }
        };

        let _ = self.last_message.send_replace(Some(Arc::clone(&message)));

        let Some(route) = message.route() else {
            trace!("message has no routing key");
            return Some(message);
        };
        let Some(handlers) = self.handlers.get(route) else {
            trace!(topic = route, "no handlers for topic");
            return Some(message);
        };

        for (id, handler) in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler.handle(&message))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(%id, topic = route, error = %e, "topic handler failed"),
                Err(_) => error!(%id, topic = route, "topic handler panicked"),
            }
        }
        Some(message)
    }
}
