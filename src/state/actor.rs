//! Serialized execution context for the state machine
//!
//! The actor owns the [`HostStateMachine`] and processes commands one at a
//! time from an unbounded channel. Collaborator callbacks, lifecycle signals,
//! IPC requests and UI gestures all arrive here as messages, so graph
//! start/stop and session changes never run concurrently.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::events::Notification;
use crate::host::RemoteCommand;
use crate::params::ParameterSnapshot;

use super::handle::HostHandle;
use super::machine::{HostStateMachine, HostStatus};

/// Messages accepted by the actor
#[derive(Debug)]
pub enum Command {
    /// Collaborator or lifecycle notification
    Notify(Notification),

    /// Fire-and-forget remote control event
    SendRemoteCommand(RemoteCommand),

    GetStatus {
        response: oneshot::Sender<HostStatus>,
    },

    ExportParameters {
        response: oneshot::Sender<ParameterSnapshot>,
    },

    ImportParameters {
        snapshot: ParameterSnapshot,
        /// Number of parameters written
        response: oneshot::Sender<usize>,
    },

    PeerUrl {
        response: oneshot::Sender<Option<String>>,
    },
}

pub struct HostActor {
    machine: HostStateMachine,
    command_rx: mpsc::UnboundedReceiver<Command>,
}

impl HostActor {
    /// Subscribe the machine's collaborators and spawn the run loop
    ///
    /// The machine is initialized (published and synced with any attached
    /// host) as the first step of the run loop.
    pub fn spawn(machine: HostStateMachine) -> (HostHandle, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let handle = HostHandle::new(cmd_tx);

        let collaborators = machine.collaborators();
        collaborators.host.subscribe(handle.sink());
        if let Some(audiobus) = &collaborators.audiobus {
            audiobus.subscribe(handle.sink());
        }

        let actor = HostActor {
            machine,
            command_rx: cmd_rx,
        };
        let join = tokio::spawn(actor.run());

        info!("host actor spawned");
        (handle, join)
    }

    async fn run(mut self) {
        self.machine.initialize();
        debug!(status = ?self.machine.status(), "host actor run loop started");

        while let Some(cmd) = self.command_rx.recv().await {
            trace!(?cmd, "processing command");
            self.process(cmd);

            if self.machine.is_terminated() {
                break;
            }
        }

        info!("host actor stopped");
    }

    fn process(&mut self, cmd: Command) {
        match cmd {
            Command::Notify(notification) => self.machine.handle(notification),
            Command::SendRemoteCommand(command) => self.machine.send_remote_command(command),
            Command::GetStatus { response } => {
                let _ = response.send(self.machine.status());
            }
            Command::ExportParameters { response } => {
                let _ = response.send(self.machine.export_parameter_snapshot());
            }
            Command::ImportParameters { snapshot, response } => {
                let applied = self.machine.import_parameter_snapshot(&snapshot);
                let _ = response.send(applied);
            }
            Command::PeerUrl { response } => {
                let _ = response.send(self.machine.peer_url());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::broadcast;
    use tokio_test::assert_ok;

    use crate::config::Config;
    use crate::events::HostEvent;
    use crate::host::{AudioGraph, ConnectionState};
    use crate::params::{ChorusParameter, ChorusParameters};
    use crate::sim::{SimulatedAudiobus, SimulatedGraph, SimulatedHost, SimulatedSession};
    use crate::state::{Collaborators, GraphRunState, HostSettings};

    struct Harness {
        host: Arc<SimulatedHost>,
        graph: Arc<SimulatedGraph>,
        audiobus: Arc<SimulatedAudiobus>,
        events: broadcast::Receiver<HostEvent>,
        handle: HostHandle,
        join: JoinHandle<()>,
    }

    fn spawn_actor() -> Harness {
        let host = SimulatedHost::new();
        let graph = SimulatedGraph::new();
        let audiobus = SimulatedAudiobus::new();
        let collaborators = Collaborators {
            host: host.clone(),
            graph: graph.clone(),
            session: SimulatedSession::new(),
            audiobus: Some(audiobus.clone()),
            parameters: Arc::new(ChorusParameters::new()),
        };

        let config = Config::with_home(Path::new("/tmp/chorus-test")).unwrap();
        let (tx, events) = broadcast::channel(64);
        let machine = HostStateMachine::new(collaborators, HostSettings::from(&config), tx, true);
        let (handle, join) = HostActor::spawn(machine);

        Harness {
            host,
            graph,
            audiobus,
            events,
            handle,
            join,
        }
    }

    async fn next_event(events: &mut broadcast::Receiver<HostEvent>) -> HostEvent {
        assert_ok!(tokio::time::timeout(Duration::from_secs(2), events.recv()).await).unwrap()
    }

    #[tokio::test]
    async fn test_initializes_on_spawn() {
        let mut h = spawn_actor();
        assert_eq!(next_event(&mut h.events).await, HostEvent::HostStateChanged);
        assert_eq!(h.host.publish_count(), 1);
    }

    #[tokio::test]
    async fn test_host_callback_from_other_thread() {
        let mut h = spawn_actor();
        next_event(&mut h.events).await;

        let host = Arc::clone(&h.host);
        std::thread::spawn(move || host.set_connected(true))
            .join()
            .unwrap();

        next_event(&mut h.events).await;
        let status = h.handle.status().await.unwrap();
        assert_eq!(status.connection, ConnectionState::Connected);
        assert_eq!(status.run_state, GraphRunState::Running);
        assert!(h.graph.is_running());
    }

    #[tokio::test]
    async fn test_remote_command_round_trip() {
        let mut h = spawn_actor();
        h.host.set_connected(true);
        next_event(&mut h.events).await;
        next_event(&mut h.events).await;

        h.handle.send_remote_command(RemoteCommand::TogglePlayPause);

        // Optimistic notification, then the host's transport notification
        next_event(&mut h.events).await;
        next_event(&mut h.events).await;
        let status = h.handle.status().await.unwrap();
        assert!(status.playing);
    }

    #[tokio::test]
    async fn test_audiobus_notification_is_routed() {
        let mut h = spawn_actor();
        next_event(&mut h.events).await;

        h.audiobus.set(true, true);
        next_event(&mut h.events).await;

        let status = h.handle.status().await.unwrap();
        assert!(status.audiobus_connected);
        assert_eq!(status.run_state, GraphRunState::Running);
    }

    #[tokio::test]
    async fn test_parameter_snapshot_through_handle() {
        let h = spawn_actor();

        let mut snapshot = ParameterSnapshot::new();
        snapshot.insert(ChorusParameter::Depth.id(), 0.75);
        assert_eq!(h.handle.import_parameters(snapshot).await, Some(1));

        let exported = h.handle.export_parameters().await.unwrap();
        assert_eq!(exported.get(&ChorusParameter::Depth.id()), Some(&0.75));
        assert_eq!(exported.len(), 5);
    }

    #[tokio::test]
    async fn test_terminate_stops_actor() {
        let h = spawn_actor();
        h.host.set_connected(true);
        h.handle.notify(Notification::Terminating);

        assert_ok!(tokio::time::timeout(Duration::from_secs(2), h.join).await).unwrap();
        assert!(!h.graph.is_running());
        assert!(h.handle.status().await.is_none());
    }
}
