//! Errors reported by host-side collaborators
//!
//! None of these are fatal. The state machine logs them and retries on the
//! next qualifying event.

use super::RemoteCommand;

/// Errors that can occur while talking to the host, the graph or the session
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HostError {
    #[error("host property unavailable: {0}")]
    PropertyRead(String),

    #[error("audio graph failed to start: {0}")]
    GraphStart(String),

    #[error("failed to send {command} to host: {reason}")]
    RemoteCommand {
        command: RemoteCommand,
        reason: String,
    },

    #[error("audio session error: {0}")]
    Session(String),

    #[error("failed to publish component: {0}")]
    Publish(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_command_message() {
        let err = HostError::RemoteCommand {
            command: RemoteCommand::ToggleRecord,
            reason: "host gone".to_string(),
        };
        assert_eq!(err.to_string(), "failed to send toggle_record to host: host gone");
    }
}
