//! The feed's event loop.
//!
//! One task owns the [`ConnectionMachine`], the [`Dispatcher`] and the live
//! channel. It waits on consumer commands, open results, inbound frames,
//! the reconnect timer and cancellation, turns each into an [`Event`], and
//! executes the actions the machine returns before waking again. Topic
//! replay therefore always reaches the wire before the first inbound frame
//! of a new channel is read.

use std::sync::Arc;
use std::time::Duration;

use livefeed_core::Topic;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::dispatcher::{Dispatcher, HandlerId, TopicHandler};
use crate::machine::{Action, ChannelId, ConnectionMachine, Event, TimerId};
use crate::publisher::StatusPublisher;
use crate::transport::{Channel, Connector, Frame, TransportError};

/// Requests from the facade.
pub(crate) enum Command {
    Connect,
    Reconnect,
    Subscribe(Topic),
    Unsubscribe(Topic),
    Send(String),
    AddHandler {
        id: HandlerId,
        topic: Topic,
        handler: Box<dyn TopicHandler>,
    },
    RemoveHandler(HandlerId),
}

struct OpenOutcome {
    channel: ChannelId,
    result: Result<Box<dyn Channel>, TransportError>,
}

struct LiveChannel {
    id: ChannelId,
    channel: Box<dyn Channel>,
}

pub(crate) struct Runtime {
    machine: ConnectionMachine,
    dispatcher: Dispatcher,
    publisher: StatusPublisher,
    connector: Arc<dyn Connector>,
    commands: mpsc::UnboundedReceiver<Command>,
    cancel: CancellationToken,
    open_tx: mpsc::UnboundedSender<OpenOutcome>,
    open_rx: mpsc::UnboundedReceiver<OpenOutcome>,
    opening: Option<(ChannelId, JoinHandle<()>)>,
    live: Option<LiveChannel>,
    reconnect_at: Option<(TimerId, Instant)>,
}

impl Runtime {
    pub(crate) fn new(
        machine: ConnectionMachine,
        dispatcher: Dispatcher,
        publisher: StatusPublisher,
        connector: Arc<dyn Connector>,
        commands: mpsc::UnboundedReceiver<Command>,
        cancel: CancellationToken,
    ) -> Self {
        let (open_tx, open_rx) = mpsc::unbounded_channel();
        Self {
            machine,
            dispatcher,
            publisher,
            connector,
            commands,
            cancel,
            open_tx,
            open_rx,
            opening: None,
            live: None,
            reconnect_at: None,
        }
    }

    /// Run until cancelled or every facade handle is gone.
    #[instrument(name = "livefeed", skip_all)]
    pub(crate) async fn run(mut self) {
        debug!("event loop started");
        loop {
            let event = tokio::select! {
                biased;
                () = self.cancel.cancelled() => Event::Shutdown,
                command = self.commands.recv() => match command {
                    Some(command) => match self.command_event(command) {
                        Some(event) => event,
                        None => continue,
                    },
                    None => Event::Shutdown,
                },
                Some(outcome) = self.open_rx.recv() => self.open_event(outcome).await,
                timer = reconnect_due(self.reconnect_at) => {
                    self.reconnect_at = None;
                    Event::ReconnectDue { timer }
                }
                (channel, frame) = next_frame(&mut self.live) => match self.frame_event(channel, frame) {
                    Some(event) => event,
                    None => continue,
                },
            };

            let stop = matches!(event, Event::Shutdown);
            self.apply(event).await;
            if stop {
                break;
            }
        }

        if let Some((_, task)) = self.opening.take() {
            task.abort();
        }
        debug!("event loop stopped");
    }

    fn command_event(&mut self, command: Command) -> Option<Event> {
        match command {
            Command::Connect => Some(Event::Connect),
            Command::Reconnect => Some(Event::Reconnect),
            Command::Subscribe(topic) => Some(Event::Subscribe(topic)),
            Command::Unsubscribe(topic) => Some(Event::Unsubscribe(topic)),
            Command::Send(text) => Some(Event::Send(text)),
            Command::AddHandler { id, topic, handler } => {
                self.dispatcher.add_handler(id, topic, handler);
                None
            }
            Command::RemoveHandler(id) => {
                if !self.dispatcher.remove_handler(id) {
                    debug!(%id, "handler already removed");
                }
                None
            }
        }
    }

    async fn open_event(&mut self, outcome: OpenOutcome) -> Event {
        let OpenOutcome { channel, result } = outcome;
        if self.opening.as_ref().is_some_and(|(id, _)| *id == channel) {
            self.opening = None;
        }
        match result {
            Ok(mut opened) => {
                if self.live.is_some() {
                    // Cannot happen while the machine holds one link at a time.
                    warn!(%channel, "a channel is already live, closing the new one");
                    if let Err(e) = opened.close().await {
                        debug!(%channel, error = %e, "close failed");
                    }
                } else {
                    self.live = Some(LiveChannel {
                        id: channel,
                        channel: opened,
                    });
                }
                Event::Opened {
                    channel,
                    at: Instant::now(),
                }
            }
            Err(e) => Event::OpenFailed {
                channel,
                error: e.to_string(),
            },
        }
    }

    fn frame_event(
        &mut self,
        channel: ChannelId,
        frame: Option<Result<Frame, TransportError>>,
    ) -> Option<Event> {
        let event = match frame {
            Some(Ok(frame)) => match frame.into_text() {
                Ok(payload) => Event::Inbound { channel, payload },
                Err(e) => {
                    warn!(%channel, error = %e, "dropping undecodable frame");
                    return None;
                }
            },
            Some(Err(e)) => Event::TransportError {
                channel,
                error: e.to_string(),
            },
            None => {
                self.live = None;
                Event::Closed {
                    channel,
                    at: Instant::now(),
                }
            }
        };
        Some(event)
    }

    async fn apply(&mut self, event: Event) {
        for action in self.machine.handle(event) {
            self.execute(action).await;
        }
    }

    async fn execute(&mut self, action: Action) {
        match action {
            Action::Open { channel, endpoint } => {
                let connector = Arc::clone(&self.connector);
                let tx = self.open_tx.clone();
                let task = tokio::spawn(async move {
                    let result = connector.open(&endpoint).await;
                    let _ = tx.send(OpenOutcome { channel, result });
                });
                if let Some((_, stale)) = self.opening.replace((channel, task)) {
                    stale.abort();
                }
            }
            Action::Transmit { channel, text } => match self.live.as_mut() {
                Some(live) if live.id == channel => {
                    if let Err(e) = live.channel.send(Frame::Text(text)).await {
                        warn!(%channel, error = %e, "failed to write frame");
                    }
                }
                _ => debug!(%channel, "dropping frame for inactive channel"),
            },
            Action::Close { channel } => {
                if self.live.as_ref().is_some_and(|live| live.id == channel) {
                    if let Some(mut live) = self.live.take() {
                        if let Err(e) = live.channel.close().await {
                            debug!(%channel, error = %e, "close failed");
                        }
                        info!(%channel, "channel closed");
                    }
                } else if self.opening.as_ref().is_some_and(|(id, _)| *id == channel) {
                    if let Some((_, task)) = self.opening.take() {
                        task.abort();
                        debug!(%channel, "abandoned channel open");
                    }
                }
            }
            Action::ScheduleReconnect { timer, delay, .. } => {
                self.reconnect_at = Some((timer, deadline_after(delay)));
            }
            Action::CancelReconnect => {
                self.reconnect_at = None;
            }
            Action::Dispatch(payload) => {
                if let Some(message) = self.dispatcher.dispatch(&payload) {
                    trace!(route = ?message.route(), "dispatched");
                }
            }
            Action::Status(status) => self.publisher.publish_status(status),
            Action::Notify(notification) => self.publisher.notify(notification),
        }
    }
}

/// Far enough ahead to never fire in practice.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + delay`, clamped to a far-future deadline instead of overflowing.
fn deadline_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay).unwrap_or_else(|| {
        warn!(?delay, "reconnect delay out of range, clamping");
        now.checked_add(FAR_FUTURE).unwrap_or(now)
    })
}

async fn reconnect_due(deadline: Option<(TimerId, Instant)>) -> TimerId {
    match deadline {
        Some((timer, at)) => {
            tokio::time::sleep_until(at).await;
            timer
        }
        None => std::future::pending().await,
    }
}

async fn next_frame(
    live: &mut Option<LiveChannel>,
) -> (ChannelId, Option<Result<Frame, TransportError>>) {
    match live {
        Some(live) => (live.id, live.channel.recv().await),
        None => std::future::pending().await,
    }
}
