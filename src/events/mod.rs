//! Typed notifications flowing into and out of the state machine
//!
//! Inbound: collaborator and app-lifecycle notifications, delivered through a
//! [`NotificationSink`] from whatever thread the collaborator calls back on.
//! Outbound: a single [`HostEvent::HostStateChanged`] broadcast to observers,
//! who re-query the derived state they care about.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Events emitted by the state machine to its observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostEvent {
    /// Connection, transport or run state may have changed
    HostStateChanged,
}

impl fmt::Display for HostEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostEvent::HostStateChanged => write!(f, "HOST_STATE_CHANGED"),
        }
    }
}

/// Notifications delivered to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Notification {
    /// The host link's connection property changed
    ConnectionChanged,
    /// The host's transport state property changed
    TransportChanged,
    /// Audiobus connections or session membership changed
    AudiobusConnectionsChanged,
    /// The app is about to enter the foreground
    Foreground,
    /// The app entered the background
    Background,
    /// Platform media services were reset; everything must be rebuilt
    MediaServicesReset,
    /// The process is about to exit
    Terminating,
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::ConnectionChanged => write!(f, "CONNECTION_CHANGED"),
            Notification::TransportChanged => write!(f, "TRANSPORT_CHANGED"),
            Notification::AudiobusConnectionsChanged => write!(f, "AUDIOBUS_CONNECTIONS_CHANGED"),
            Notification::Foreground => write!(f, "FOREGROUND"),
            Notification::Background => write!(f, "BACKGROUND"),
            Notification::MediaServicesReset => write!(f, "MEDIA_SERVICES_RESET"),
            Notification::Terminating => write!(f, "TERMINATING"),
        }
    }
}

type DeliverFn = Arc<dyn Fn(Notification) + Send + Sync>;

/// Thread-safe entry point for notifications
///
/// Delivering never blocks and never touches state machine fields; it only
/// enqueues the notification for the serialized context.
#[derive(Clone)]
pub struct NotificationSink {
    deliver: DeliverFn,
}

impl NotificationSink {
    pub fn new(deliver: impl Fn(Notification) + Send + Sync + 'static) -> Self {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    pub fn notify(&self, notification: Notification) {
        (self.deliver)(notification);
    }
}

impl fmt::Debug for NotificationSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationSink").finish_non_exhaustive()
    }
}
