//! Channel lifecycle state machine.
//!
//! [`ConnectionMachine`] is pure: it consumes [`Event`]s and returns the
//! [`Action`]s the runtime must perform. It never touches a socket or a
//! clock, so every transition is unit-testable.
//!
//! ```text
//! disconnected --connect--> connecting
//! connecting   --opened---> connected
//! connecting   --failed---> reconnecting | disconnected (cap reached)
//! connected    --closed---> reconnecting | disconnected (cap reached)
//! reconnecting --due------> connecting
//! any          --shutdown-> disconnected (terminal)
//! ```
//!
//! Every channel gets a fresh [`ChannelId`]; events carrying any other id
//! are stale and ignored. Reconnect timers carry a [`TimerId`] for the same
//! reason.

use std::fmt;
use std::time::Duration;

use livefeed_core::{
    ConnectionStatus, ControlMessage, Notification, ReconnectPolicy, ReconnectState,
    RetryDecision, Topic, TopicRegistry,
};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Identity of one channel instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

/// Identity of one scheduled reconnect.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// Inputs to the state machine.
#[derive(Clone, Debug)]
pub enum Event {
    /// Open a channel unless one is already open or opening.
    Connect,
    /// Reset the attempt counter, cancel any pending retry, then connect.
    Reconnect,
    /// The channel finished its handshake.
    Opened {
        /// Which channel.
        channel: ChannelId,
        /// When it opened.
        at: Instant,
    },
    /// The channel could not be opened.
    OpenFailed {
        /// Which channel.
        channel: ChannelId,
        /// Transport diagnostic.
        error: String,
    },
    /// A text payload arrived.
    Inbound {
        /// Which channel.
        channel: ChannelId,
        /// Raw payload.
        payload: String,
    },
    /// The transport reported an error. The close that follows drives
    /// recovery.
    TransportError {
        /// Which channel.
        channel: ChannelId,
        /// Transport diagnostic.
        error: String,
    },
    /// The channel closed (cleanly or not).
    Closed {
        /// Which channel.
        channel: ChannelId,
        /// When it closed.
        at: Instant,
    },
    /// A scheduled reconnect delay elapsed.
    ReconnectDue {
        /// Which timer fired.
        timer: TimerId,
    },
    /// Add a topic to the registry.
    Subscribe(Topic),
    /// Remove a topic from the registry.
    Unsubscribe(Topic),
    /// Transmit serialized application data.
    Send(String),
    /// Stop everything. Idempotent.
    Shutdown,
}

/// Side effects requested by the state machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    /// Start opening a new channel.
    Open {
        /// Id to report back in `Opened` / `OpenFailed`.
        channel: ChannelId,
        /// Resolved endpoint.
        endpoint: String,
    },
    /// Write a text frame on the channel.
    Transmit {
        /// Target channel.
        channel: ChannelId,
        /// Frame body.
        text: String,
    },
    /// Close (or abandon, if still opening) a channel.
    Close {
        /// Target channel.
        channel: ChannelId,
    },
    /// Arm the reconnect timer.
    ScheduleReconnect {
        /// Id to report back in `ReconnectDue`.
        timer: TimerId,
        /// How long to wait.
        delay: Duration,
        /// 1-based attempt number.
        attempt: u32,
    },
    /// Disarm the reconnect timer.
    CancelReconnect,
    /// Hand a payload to the dispatcher.
    Dispatch(String),
    /// Publish a status change.
    Status(ConnectionStatus),
    /// Publish a notification.
    Notify(Notification),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Link {
    Idle,
    Opening(ChannelId),
    Open { channel: ChannelId, since: Instant },
}

/// The channel lifecycle controller.
#[derive(Debug)]
pub struct ConnectionMachine {
    endpoint: Option<String>,
    policy: ReconnectPolicy,
    retry: ReconnectState,
    registry: TopicRegistry,
    status: ConnectionStatus,
    link: Link,
    timer: Option<TimerId>,
    next_channel: u64,
    next_timer: u64,
    torn_down: bool,
}

impl ConnectionMachine {
    /// Create a machine in `disconnected`. `endpoint` is `None` when
    /// configuration could not produce one.
    pub fn new(endpoint: Option<String>, policy: ReconnectPolicy) -> Self {
        Self {
            endpoint,
            policy,
            retry: ReconnectState::default(),
            registry: TopicRegistry::new(),
            status: ConnectionStatus::Disconnected,
            link: Link::Idle,
            timer: None,
            next_channel: 0,
            next_timer: 0,
            torn_down: false,
        }
    }

    /// Current status.
    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Consecutive reconnect attempts in the current outage.
    pub fn attempt_count(&self) -> u32 {
        self.retry.attempt_count()
    }

    /// Topics to replay on every open.
    pub fn registry(&self) -> &TopicRegistry {
        &self.registry
    }

    /// The channel that is open or opening, if any.
    pub fn active_channel(&self) -> Option<ChannelId> {
        match self.link {
            Link::Idle => None,
            Link::Opening(channel) | Link::Open { channel, .. } => Some(channel),
        }
    }

    /// The armed reconnect timer, if any.
    pub fn pending_timer(&self) -> Option<TimerId> {
        self.timer
    }

    /// Whether `Shutdown` has been handled.
    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Feed one event and collect the resulting actions.
    pub fn handle(&mut self, event: Event) -> Vec<Action> {
        let mut actions = Vec::new();
        match event {
            Event::Connect => self.on_connect(&mut actions),
            Event::Reconnect => self.on_reconnect(&mut actions),
            Event::Opened { channel, at } => self.on_opened(channel, at, &mut actions),
            Event::OpenFailed { channel, error } => {
                if self.link == Link::Opening(channel) {
                    warn!(%channel, error = %error, "channel open failed");
                    self.link = Link::Idle;
                    self.after_close(&mut actions);
                } else {
                    debug!(%channel, "ignoring open failure of stale channel");
                }
            }
            Event::Inbound { channel, payload } => {
                if self.is_open(channel) {
                    actions.push(Action::Dispatch(payload));
                } else {
                    debug!(%channel, "ignoring payload from stale channel");
                }
            }
            Event::TransportError { channel, error } => {
                if self.active_channel() == Some(channel) {
                    warn!(%channel, error = %error, "transport error");
                }
            }
            Event::Closed { channel, at } => self.on_closed(channel, at, &mut actions),
            Event::ReconnectDue { timer } => {
                if self.torn_down || self.timer != Some(timer) {
                    debug!(?timer, "ignoring stale reconnect timer");
                } else {
                    self.timer = None;
                    self.open(&mut actions);
                }
            }
            Event::Subscribe(topic) => self.on_subscribe(topic, &mut actions),
            Event::Unsubscribe(topic) => self.on_unsubscribe(&topic, &mut actions),
            Event::Send(text) => match self.link {
                Link::Open { channel, .. } => actions.push(Action::Transmit { channel, text }),
                _ => warn!(status = %self.status, "not connected, dropping outbound message"),
            },
            Event::Shutdown => self.on_shutdown(&mut actions),
        }
        actions
    }

    fn on_connect(&mut self, actions: &mut Vec<Action>) {
        if self.torn_down {
            debug!("connect after shutdown ignored");
            return;
        }
        if self.link != Link::Idle {
            debug!(status = %self.status, "channel already active");
            return;
        }
        self.cancel_timer(actions);
        self.open(actions);
    }

    fn on_reconnect(&mut self, actions: &mut Vec<Action>) {
        if self.torn_down {
            debug!("reconnect after shutdown ignored");
            return;
        }
        if self.link != Link::Idle {
            debug!(status = %self.status, "channel already active, keeping attempt count");
            return;
        }
        info!(previous_attempts = self.retry.attempt_count(), "explicit reconnect");
        self.retry.reset();
        self.on_connect(actions);
    }

    fn on_opened(&mut self, channel: ChannelId, at: Instant, actions: &mut Vec<Action>) {
        if self.link != Link::Opening(channel) {
            debug!(%channel, "closing unexpected channel");
            actions.push(Action::Close { channel });
            return;
        }

        self.link = Link::Open { channel, since: at };
        self.set_status(ConnectionStatus::Connected, actions);
        if self.policy.min_stable_uptime.is_none() {
            self.retry.reset();
        }
        info!(%channel, topics = self.registry.len(), "channel open");

        for topic in self.registry.iter() {
            if let Some(text) = control_text(&ControlMessage::subscribe(topic.clone())) {
                actions.push(Action::Transmit { channel, text });
            }
        }
        actions.push(Action::Notify(Notification::ConnectionEstablished));
    }

    fn on_closed(&mut self, channel: ChannelId, at: Instant, actions: &mut Vec<Action>) {
        match self.link {
            Link::Open { channel: open, since } if open == channel => {
                let uptime = at.saturating_duration_since(since);
                if let Some(threshold) = self.policy.min_stable_uptime {
                    if uptime >= threshold {
                        self.retry.reset();
                    }
                }
                info!(%channel, uptime_ms = duration_ms(uptime), "channel closed");
            }
            Link::Opening(opening) if opening == channel => {
                warn!(%channel, "channel closed before opening");
            }
            _ => {
                debug!(%channel, "ignoring close of stale channel");
                return;
            }
        }
        self.link = Link::Idle;
        self.after_close(actions);
    }

    fn on_subscribe(&mut self, topic: Topic, actions: &mut Vec<Action>) {
        if !self.registry.insert(topic.clone()) {
            debug!(%topic, "already subscribed");
            return;
        }
        debug!(%topic, "subscribed");
        if let Link::Open { channel, .. } = self.link {
            if let Some(text) = control_text(&ControlMessage::subscribe(topic)) {
                actions.push(Action::Transmit { channel, text });
            }
        }
    }

    fn on_unsubscribe(&mut self, topic: &Topic, actions: &mut Vec<Action>) {
        if !self.registry.remove(topic.as_str()) {
            debug!(%topic, "not subscribed");
            return;
        }
        debug!(%topic, "unsubscribed");
        if let Link::Open { channel, .. } = self.link {
            if let Some(text) = control_text(&ControlMessage::unsubscribe(topic.clone())) {
                actions.push(Action::Transmit { channel, text });
            }
        }
    }

    fn on_shutdown(&mut self, actions: &mut Vec<Action>) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.cancel_timer(actions);
        if let Some(channel) = self.active_channel() {
            actions.push(Action::Close { channel });
        }
        self.link = Link::Idle;
        self.set_status(ConnectionStatus::Disconnected, actions);
        info!("feed shut down");
    }

    fn open(&mut self, actions: &mut Vec<Action>) {
        let Some(endpoint) = self.endpoint.clone() else {
            error!("no usable endpoint configured, not connecting");
            self.set_status(ConnectionStatus::Disconnected, actions);
            return;
        };
        self.next_channel += 1;
        let channel = ChannelId(self.next_channel);
        self.link = Link::Opening(channel);
        self.set_status(ConnectionStatus::Connecting, actions);
        debug!(%channel, endpoint = %endpoint, "opening channel");
        actions.push(Action::Open { channel, endpoint });
    }

    /// Decide what follows a lost or failed channel.
    ///
    /// Status moves straight to `reconnecting` when a retry is scheduled.
    /// There is no intermediate `disconnected`; it is only published once
    /// retries are exhausted.
    fn after_close(&mut self, actions: &mut Vec<Action>) {
        match self.retry.next_retry(&self.policy) {
            RetryDecision::Retry { attempt, delay } => {
                self.next_timer += 1;
                let timer = TimerId(self.next_timer);
                self.timer = Some(timer);
                self.set_status(ConnectionStatus::Reconnecting, actions);
                info!(
                    attempt,
                    max_attempts = self.policy.max_attempts,
                    delay_ms = duration_ms(delay),
                    "scheduling reconnect"
                );
                actions.push(Action::ScheduleReconnect {
                    timer,
                    delay,
                    attempt,
                });
            }
            RetryDecision::Exhausted { attempts } => {
                self.set_status(ConnectionStatus::Disconnected, actions);
                error!(attempts, "reconnect attempts exhausted, giving up");
                actions.push(Action::Notify(Notification::ConnectionLost { attempts }));
            }
        }
    }

    fn cancel_timer(&mut self, actions: &mut Vec<Action>) {
        if self.timer.take().is_some() {
            actions.push(Action::CancelReconnect);
        }
    }

    fn set_status(&mut self, status: ConnectionStatus, actions: &mut Vec<Action>) {
        if self.status != status {
            debug!(from = %self.status, to = %status, "status change");
            self.status = status;
            actions.push(Action::Status(status));
        }
    }

    fn is_open(&self, channel: ChannelId) -> bool {
        matches!(self.link, Link::Open { channel: open, .. } if open == channel)
    }
}

fn control_text(message: &ControlMessage) -> Option<String> {
    match message.to_json() {
        Ok(text) => Some(text),
        Err(e) => {
            error!(error = %e, "failed to serialize control message");
            None
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
