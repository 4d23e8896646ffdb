//! Status and notification fan-out.
//!
//! Status is a `watch` value: readers always see the latest state and can
//! await changes. Notifications are a `broadcast`: each subscriber gets
//! every event sent after it subscribed.

use livefeed_core::{ConnectionStatus, Notification};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

const NOTIFICATION_CAPACITY: usize = 64;

/// Publishes status transitions and notifications to consumers.
#[derive(Clone, Debug)]
pub struct StatusPublisher {
    status: watch::Sender<ConnectionStatus>,
    notifications: broadcast::Sender<Notification>,
}

impl Default for StatusPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusPublisher {
    /// Start in `disconnected` with no subscribers.
    pub fn new() -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            status,
            notifications,
        }
    }

    /// Current status.
    pub fn current(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// A receiver that observes every status change.
    pub fn watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// A receiver for notifications sent from now on.
    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Publish a status value. Repeats of the current value are not
    /// re-announced.
    pub fn publish_status(&self, status: ConnectionStatus) {
        let changed = self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        if changed {
            info!(%status, "connection status");
        }
    }

    /// Publish a notification to current subscribers.
    pub fn notify(&self, notification: Notification) {
        debug!(?notification, "notification");
        // No subscribers is fine.
        let _ = self.notifications.send(notification);
    }
}
