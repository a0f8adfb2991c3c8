//! Host-side collaborator interfaces
//!
//! The state machine only ever talks to the outside world through these
//! traits: the remote host link, the audio graph, the audio session and the
//! optional Audiobus link. Implementations may be called from the state
//! machine's task only, but must be `Send + Sync` so they can be shared with
//! whatever delivers their notifications.

mod callbacks;
mod error;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::{ComponentDescription, SessionConfig};
use crate::events::NotificationSink;

pub use callbacks::{CallbackCache, HostCallbacks, TransportSource};
pub use error::HostError;

/// Whether a remote host is attached through the inter-app link
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
}

impl ConnectionState {
    pub fn from_flag(connected: bool) -> Self {
        if connected {
            Self::Connected
        } else {
            Self::Disconnected
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connected => write!(f, "Connected"),
        }
    }
}

/// Host transport state as last read through the callback handle
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TransportSnapshot {
    pub playing: bool,
    pub recording: bool,
    /// Current position in the host timeline, in samples
    pub sample_time: f64,
}

/// Remote-control events the effect can send to its host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteCommand {
    Rewind,
    TogglePlayPause,
    ToggleRecord,
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteCommand::Rewind => write!(f, "rewind"),
            RemoteCommand::TogglePlayPause => write!(f, "toggle_play_pause"),
            RemoteCommand::ToggleRecord => write!(f, "toggle_record"),
        }
    }
}

/// Icon image published by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostIcon {
    /// Edge length in pixels
    pub size: u32,
    /// Encoded image bytes
    pub data: Arc<[u8]>,
}

/// Property channel to the app hosting the effect
pub trait RemoteHostLink: Send + Sync {
    /// Make the effect discoverable by hosts
    fn publish(&self, description: &ComponentDescription, name: &str) -> Result<(), HostError>;

    /// Deliver `ConnectionChanged` / `TransportChanged` notifications to `sink`
    fn subscribe(&self, sink: NotificationSink);

    /// Read the inter-app connection flag
    fn is_connected(&self) -> Result<bool, HostError>;

    /// Fetch the host's transport callback handle
    fn host_callbacks(&self) -> Result<HostCallbacks, HostError>;

    /// Send a remote-control event; does not wait for the host to act on it
    fn send_remote_event(&self, command: RemoteCommand) -> Result<(), HostError>;

    /// Fetch the host's icon at the requested size
    fn host_icon(&self, size: u32) -> Option<HostIcon>;

    /// URL that brings the host app to the front
    fn peer_url(&self) -> Result<Option<String>, HostError>;
}

/// The signal path; a passive actuator driven by the state machine
pub trait AudioGraph: Send + Sync {
    fn start(&self) -> Result<(), HostError>;
    fn stop(&self);
    fn is_running(&self) -> bool;
}

/// Platform audio session
pub trait AudioSession: Send + Sync {
    /// Apply the session configuration and activate
    fn activate(&self, config: &SessionConfig) -> Result<(), HostError>;
    fn deactivate(&self) -> Result<(), HostError>;
}

/// Audiobus connection state
pub trait AudiobusLink: Send + Sync {
    fn is_connected(&self) -> bool;
    fn is_session_active(&self) -> bool;

    /// Deliver `AudiobusConnectionsChanged` notifications to `sink`
    fn subscribe(&self, sink: NotificationSink);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_from_flag() {
        assert_eq!(ConnectionState::from_flag(true), ConnectionState::Connected);
        assert_eq!(ConnectionState::from_flag(false), ConnectionState::Disconnected);
        assert!(!ConnectionState::default().is_connected());
    }

    #[test]
    fn test_remote_command_serialization() {
        let json = serde_json::to_string(&RemoteCommand::TogglePlayPause).unwrap();
        assert_eq!(json, r#""toggle_play_pause""#);
    }
}
