//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.
//! Subscribed clients additionally receive [`HostEvent`] messages pushed
//! between responses.

use serde::{Deserialize, Serialize};

use crate::events::{HostEvent, Notification};
use crate::host::RemoteCommand;
use crate::params::StateDictionary;
use crate::state::HostStatus;

/// Largest accepted message body
pub const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// App lifecycle phases reported by the UI process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    Foreground,
    Background,
}

impl From<LifecyclePhase> for Notification {
    fn from(phase: LifecyclePhase) -> Self {
        match phase {
            LifecyclePhase::Foreground => Notification::Foreground,
            LifecyclePhase::Background => Notification::Background,
        }
    }
}

/// Requests from UI to daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Request current host status
    GetStatus,

    /// Ping to check connectivity
    Ping,

    /// Subscribe to host state change notifications
    Subscribe,

    /// Transport button pressed
    RemoteCommand { command: RemoteCommand },

    /// App moved between foreground and background
    Lifecycle { phase: LifecyclePhase },

    /// Audiobus asks for the effect state
    ExportState,

    /// Audiobus restores a saved effect state
    ImportState { values: StateDictionary },

    /// Host icon tapped
    GoToHost,

    /// Drive the simulated host link
    SimulateHost {
        #[serde(default)]
        connected: Option<bool>,
        #[serde(default)]
        playing: Option<bool>,
        #[serde(default)]
        recording: Option<bool>,
    },

    /// Drive the simulated Audiobus link
    SimulateAudiobus { connected: bool, session_active: bool },
}

/// Responses from daemon to UI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Current daemon status
    Status(DaemonStatus),

    /// Pong response to ping
    Pong,

    /// Subscription confirmed
    Subscribed,

    /// Request accepted; effects follow asynchronously
    Ack,

    /// Effect state for Audiobus
    State { values: StateDictionary },

    /// Number of parameters restored
    Imported { applied: usize },

    /// Where to send the user to reach the host
    PeerUrl { url: Option<String> },

    /// Error response
    Error { code: String, message: String },
}

impl Response {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Response::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Messages written to a client: responses or pushed events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Outgoing {
    Response(Response),
    Event(HostEvent),
}

/// Full daemon status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Uptime in seconds
    pub uptime_secs: u64,

    #[serde(flatten)]
    pub host: HostStatus,
}

impl DaemonStatus {
    pub fn new(host: HostStatus, uptime_secs: u64) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs,
            host,
        }
    }
}
