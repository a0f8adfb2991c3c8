//! Graph run-state transition rule
//!
//! The graph starts as soon as any audio path is viable (host link or
//! Audiobus) but only stops when no path is viable, the app is in the
//! background and it is not part of an active Audiobus session.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::host::ConnectionState;

/// Whether the audio graph is running
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphRunState {
    #[default]
    Stopped,
    Running,
}

impl GraphRunState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for GraphRunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphRunState::Stopped => write!(f, "Stopped"),
            GraphRunState::Running => write!(f, "Running"),
        }
    }
}

/// Ambient flags that gate the graph independently of the host link
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    pub is_foreground: bool,
    pub is_audiobus_connected: bool,
    pub is_audiobus_session_active: bool,
}

/// Compute the next run state from the current inputs
///
/// Audiobus connection is not re-checked on the stop path: membership of an
/// active Audiobus session alone keeps the graph alive in the background.
pub fn next_run_state(
    current: GraphRunState,
    connection: ConnectionState,
    context: &SessionContext,
) -> GraphRunState {
    if connection.is_connected() || context.is_audiobus_connected {
        GraphRunState::Running
    } else if !context.is_foreground && !context.is_audiobus_session_active {
        GraphRunState::Stopped
    } else {
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATES: [GraphRunState; 2] = [GraphRunState::Stopped, GraphRunState::Running];
    const CONNECTIONS: [ConnectionState; 2] =
        [ConnectionState::Disconnected, ConnectionState::Connected];

    fn contexts() -> Vec<SessionContext> {
        let mut all = Vec::new();
        for bits in 0..8u8 {
            all.push(SessionContext {
                is_foreground: bits & 1 != 0,
                is_audiobus_connected: bits & 2 != 0,
                is_audiobus_session_active: bits & 4 != 0,
            });
        }
        all
    }

    #[test]
    fn test_any_viable_path_runs() {
        for current in STATES {
            for context in contexts() {
                assert_eq!(
                    next_run_state(current, ConnectionState::Connected, &context),
                    GraphRunState::Running
                );
                if context.is_audiobus_connected {
                    assert_eq!(
                        next_run_state(current, ConnectionState::Disconnected, &context),
                        GraphRunState::Running
                    );
                }
            }
        }
    }

    #[test]
    fn test_stops_only_when_backgrounded_without_session() {
        for current in STATES {
            for context in contexts().into_iter().filter(|c| !c.is_audiobus_connected) {
                let next = next_run_state(current, ConnectionState::Disconnected, &context);
                if !context.is_foreground && !context.is_audiobus_session_active {
                    assert_eq!(next, GraphRunState::Stopped);
                } else {
                    assert_eq!(next, current, "{context:?} must hold {current}");
                }
            }
        }
    }

    #[test]
    fn test_foreground_disconnect_keeps_running() {
        let context = SessionContext {
            is_foreground: true,
            ..Default::default()
        };
        assert_eq!(
            next_run_state(GraphRunState::Running, ConnectionState::Disconnected, &context),
            GraphRunState::Running
        );
    }

    #[test]
    fn test_is_a_fixed_point() {
        for current in STATES {
            for connection in CONNECTIONS {
                for context in contexts() {
                    let once = next_run_state(current, connection, &context);
                    assert_eq!(next_run_state(once, connection, &context), once);
                }
            }
        }
    }
}
