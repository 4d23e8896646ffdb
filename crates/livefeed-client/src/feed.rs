//! The consumer-facing handle.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use livefeed_core::{ConnectionStatus, Notification, ReconnectPolicy, Topic};
use livefeed_settings::FeedSettings;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::dispatcher::{Dispatcher, HandlerId, LastMessage, TopicHandler};
use crate::errors::Result;
use crate::machine::ConnectionMachine;
use crate::publisher::StatusPublisher;
use crate::runtime::{Command, Runtime};
use crate::transport::{Connector, WsConnector};

/// What a feed connects to and how it retries.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FeedConfig {
    /// Resolved endpoint. `None` means configuration produced nothing
    /// usable; the feed then stays disconnected.
    pub endpoint: Option<String>,
    /// Reconnect policy.
    pub policy: ReconnectPolicy,
}

impl FeedConfig {
    /// Connect to `endpoint` with the default policy.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            policy: ReconnectPolicy::default(),
        }
    }

    /// Resolve endpoint and policy from loaded settings.
    pub fn from_settings(settings: &FeedSettings) -> Self {
        Self {
            endpoint: settings.resolve_endpoint(),
            policy: settings.reconnect.to_policy(),
        }
    }

    /// Replace the reconnect policy.
    #[must_use]
    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// Handle to a running feed.
///
/// Every method is non-blocking: requests are queued for the feed's event
/// loop. Dropping the handle tears the feed down.
pub struct LiveFeed {
    commands: mpsc::UnboundedSender<Command>,
    publisher: StatusPublisher,
    last_message: watch::Receiver<LastMessage>,
    next_handler: AtomicU64,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LiveFeed {
    /// Start a feed over WebSocket and begin connecting.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(config: FeedConfig) -> Self {
        Self::start(config, Arc::new(WsConnector))
    }

    /// Start a feed over any transport and begin connecting.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: FeedConfig, connector: Arc<dyn Connector>) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (last_tx, last_message) = watch::channel(None);
        let publisher = StatusPublisher::new();
        let cancel = CancellationToken::new();

        let runtime = Runtime::new(
            ConnectionMachine::new(config.endpoint, config.policy),
            Dispatcher::new(last_tx),
            publisher.clone(),
            connector,
            command_rx,
            cancel.clone(),
        );
        let task = tokio::spawn(runtime.run());

        let feed = Self {
            commands,
            publisher,
            last_message,
            next_handler: AtomicU64::new(1),
            cancel,
            task: Mutex::new(Some(task)),
        };
        feed.command(Command::Connect);
        feed
    }

    /// Serialize `message` to JSON and transmit it if connected.
    ///
    /// While not connected the message is dropped with a warning; it is
    /// never queued. Only serialization failures are errors.
    pub fn send<T: Serialize + ?Sized>(&self, message: &T) -> Result<()> {
        let text = serde_json::to_string(message)?;
        self.command(Command::Send(text));
        Ok(())
    }

    /// Add a topic. Idempotent; replayed on every reconnect.
    pub fn subscribe(&self, topic: impl Into<Topic>) {
        self.command(Command::Subscribe(topic.into()));
    }

    /// Remove a topic. Idempotent.
    pub fn unsubscribe(&self, topic: impl Into<Topic>) {
        self.command(Command::Unsubscribe(topic.into()));
    }

    /// Current connection status.
    pub fn status(&self) -> ConnectionStatus {
        self.publisher.current()
    }

    /// Observe status changes.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.publisher.watch()
    }

    /// The most recent parsed inbound message.
    pub fn last_message(&self) -> LastMessage {
        self.last_message.borrow().clone()
    }

    /// Observe the last-message slot.
    pub fn watch_last_message(&self) -> watch::Receiver<LastMessage> {
        self.last_message.clone()
    }

    /// Notifications sent from now on.
    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.publisher.notifications()
    }

    /// Route messages for `topic` to `handler`.
    ///
    /// Independent of [`subscribe`](Self::subscribe): a handler does not
    /// subscribe, and unsubscribing does not remove handlers.
    pub fn on_topic(
        &self,
        topic: impl Into<Topic>,
        handler: impl TopicHandler + 'static,
    ) -> HandlerId {
        let id = HandlerId(self.next_handler.fetch_add(1, Ordering::Relaxed));
        self.command(Command::AddHandler {
            id,
            topic: topic.into(),
            handler: Box::new(handler),
        });
        id
    }

    /// Unregister a handler.
    pub fn remove_handler(&self, id: HandlerId) {
        self.command(Command::RemoveHandler(id));
    }

    /// Reset the retry counter and connect now. Works after retries were
    /// exhausted; ignored after shutdown.
    pub fn reconnect(&self) {
        self.command(Command::Reconnect);
    }

    /// Stop the feed: cancel any pending reconnect, close the channel and
    /// wait for the event loop to exit. Idempotent.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "feed event loop ended abnormally");
            }
        }
    }

    /// Whether [`shutdown`](Self::shutdown) was requested.
    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("feed event loop has stopped, ignoring request");
        }
    }
}

impl Drop for LiveFeed {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for LiveFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveFeed")
            .field("status", &self.status())
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}
