//! Host connection and transport state machine
//!
//! Tracks whether a remote host is attached, mirrors its transport state and
//! decides when the audio graph runs. Every method here must be called from
//! a single serialized context (see [`super::actor`]).

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::{ComponentDescription, Config, SessionConfig};
use crate::events::{HostEvent, Notification};
use crate::host::{
    AudioGraph, AudioSession, AudiobusLink, CallbackCache, ConnectionState, HostIcon,
    RemoteCommand, RemoteHostLink, TransportSnapshot,
};
use crate::params::{ParameterSnapshot, ParameterSurface};

use super::transition::{next_run_state, GraphRunState, SessionContext};

/// Everything the state machine drives or reads from
#[derive(Clone)]
pub struct Collaborators {
    pub host: Arc<dyn RemoteHostLink>,
    pub graph: Arc<dyn AudioGraph>,
    pub session: Arc<dyn AudioSession>,
    pub audiobus: Option<Arc<dyn AudiobusLink>>,
    pub parameters: Arc<dyn ParameterSurface>,
}

/// The parts of [`Config`] the state machine needs
#[derive(Debug, Clone)]
pub struct HostSettings {
    pub session: SessionConfig,
    pub component: ComponentDescription,
    pub component_name: String,
    pub icon_size: u32,
}

impl From<&Config> for HostSettings {
    fn from(config: &Config) -> Self {
        Self {
            session: config.session.clone(),
            component: config.component,
            component_name: config.component_name.clone(),
            icon_size: config.icon_size,
        }
    }
}

/// Derived state as seen by observers
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HostStatus {
    pub connection: ConnectionState,
    /// Host link connected and not superseded by Audiobus
    pub host_connected: bool,
    pub playing: bool,
    pub recording: bool,
    pub sample_time: f64,
    pub run_state: GraphRunState,
    pub foreground: bool,
    pub audiobus_connected: bool,
    pub audiobus_session_active: bool,
    pub has_icon: bool,
    pub can_play: bool,
    pub can_rewind: bool,
    pub can_record: bool,
    pub terminated: bool,
}

/// Which way the connection flag moved on the last read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionEdge {
    Unchanged,
    Connected,
    Disconnected,
}

pub struct HostStateMachine {
    collaborators: Collaborators,
    settings: HostSettings,
    connection: ConnectionState,
    context: SessionContext,
    run_state: GraphRunState,
    /// Time when the current run state was entered
    run_state_since: Instant,
    transport: Option<TransportSnapshot>,
    callbacks: CallbackCache,
    icon: Option<HostIcon>,
    terminated: bool,
    event_tx: broadcast::Sender<HostEvent>,
}

impl HostStateMachine {
    /// Create a state machine at rest: disconnected, stopped, no snapshot
    pub fn new(
        collaborators: Collaborators,
        settings: HostSettings,
        event_tx: broadcast::Sender<HostEvent>,
        is_foreground: bool,
    ) -> Self {
        Self {
            collaborators,
            settings,
            connection: ConnectionState::Disconnected,
            context: SessionContext {
                is_foreground,
                ..Default::default()
            },
            run_state: GraphRunState::Stopped,
            run_state_since: Instant::now(),
            transport: None,
            callbacks: CallbackCache::new(),
            icon: None,
            terminated: false,
            event_tx,
        }
    }

    /// Publish the effect to hosts and sync with whatever is already attached
    pub fn initialize(&mut self) {
        if self.terminated {
            return;
        }

        let host = Arc::clone(&self.collaborators.host);
        match host.publish(&self.settings.component, &self.settings.component_name) {
            Ok(()) => info!(
                component = %self.settings.component,
                name = %self.settings.component_name,
                "component published"
            ),
            Err(e) => warn!(?e, "failed to publish component"),
        }

        self.revalidate_connection();
        self.refresh_audiobus_flags();
        self.check_run_state_transition();
        self.emit_state_changed();
    }

    /// Dispatch a notification to its handler
    pub fn handle(&mut self, notification: Notification) {
        if self.terminated {
            debug!(%notification, "ignoring notification after termination");
            return;
        }

        debug!(%notification, "handling notification");
        match notification {
            Notification::ConnectionChanged => self.on_connection_property_changed(),
            Notification::TransportChanged => self.on_transport_property_changed(),
            Notification::AudiobusConnectionsChanged => self.on_audiobus_connections_changed(),
            Notification::Foreground => self.on_app_foreground(),
            Notification::Background => self.on_app_background(),
            Notification::MediaServicesReset => self.on_media_services_reset(),
            Notification::Terminating => self.on_process_terminating(),
        }
    }

    /// Host link connection flag changed; re-read it and apply any edge
    pub fn on_connection_property_changed(&mut self) {
        if self.terminated {
            return;
        }
        self.revalidate_connection();
        self.check_run_state_transition();
        self.emit_state_changed();
    }

    /// Host transport changed; re-read it if the snapshot can be trusted
    pub fn on_transport_property_changed(&mut self) {
        if self.terminated || !self.connection.is_connected() {
            return;
        }

        if self.context.is_foreground {
            self.refresh_transport_snapshot();
        } else {
            // Not trusted while backgrounded; re-read on foreground entry
            self.transport = None;
        }
        self.emit_state_changed();
    }

    /// Re-read host transport through the cached callback handle
    ///
    /// Only runs while connected and in the foreground. A failed read keeps
    /// the previous snapshot and leaves the handle cache empty for a retry.
    pub fn refresh_transport_snapshot(&mut self) -> bool {
        if !self.connection.is_connected() || !self.context.is_foreground {
            return false;
        }

        match self.callbacks.read_transport(self.collaborators.host.as_ref()) {
            Ok(snapshot) => {
                if self.transport != Some(snapshot) {
                    debug!(?snapshot, "host transport updated");
                }
                self.transport = Some(snapshot);
                true
            }
            Err(e) => {
                warn!(?e, "failed to read host transport");
                false
            }
        }
    }

    /// Send a remote-control event to the host
    ///
    /// Observers are notified immediately; the real transport state follows
    /// with the host's next transport notification.
    pub fn send_remote_command(&mut self, command: RemoteCommand) {
        if self.terminated {
            return;
        }

        match self.collaborators.host.send_remote_event(command) {
            Ok(()) => debug!(%command, "remote command sent"),
            Err(e) => warn!(?e, %command, "failed to send remote command"),
        }
        self.emit_state_changed();
    }

    /// Apply the run-state rule to the current inputs
    ///
    /// Returns true if the run state changed.
    pub fn check_run_state_transition(&mut self) -> bool {
        if self.terminated {
            return false;
        }

        let next = next_run_state(self.run_state, self.connection, &self.context);
        match (self.run_state, next) {
            (GraphRunState::Stopped, GraphRunState::Running) => self.start_graph(),
            (GraphRunState::Running, GraphRunState::Stopped) => {
                self.stop_graph();
                true
            }
            _ => false,
        }
    }

    /// App entered the foreground; resync with a host that may have changed while suspended
    pub fn on_app_foreground(&mut self) {
        if self.terminated {
            return;
        }
        self.context.is_foreground = true;

        // Nothing guarantees a notification fired while suspended
        let edge = self.revalidate_connection();
        if self.connection.is_connected() && edge != ConnectionEdge::Connected {
            if let Err(e) = self.callbacks.refetch(self.collaborators.host.as_ref()) {
                warn!(?e, "failed to refetch host callbacks");
            }
        }
        self.refresh_transport_snapshot();

        self.check_run_state_transition();
        self.emit_state_changed();
    }

    /// App entered the background; the graph stops unless something still needs it
    pub fn on_app_background(&mut self) {
        if self.terminated {
            return;
        }
        self.context.is_foreground = false;

        if self.check_run_state_transition() {
            self.emit_state_changed();
        }
    }

    /// Audiobus connections or session state changed
    pub fn on_audiobus_connections_changed(&mut self) {
        if self.terminated {
            return;
        }
        self.refresh_audiobus_flags();
        self.check_run_state_transition();
        self.emit_state_changed();
    }

    /// Tear everything down and rebuild as at startup
    pub fn on_media_services_reset(&mut self) {
        if self.terminated {
            return;
        }
        warn!("media services reset, rebuilding");

        self.teardown();
        self.connection = ConnectionState::Disconnected;
        self.transport = None;
        self.icon = None;
        self.initialize();
    }

    /// Stop unconditionally; no further events are processed
    pub fn on_process_terminating(&mut self) {
        if self.terminated {
            return;
        }

        self.teardown();
        self.terminated = true;
        info!("state machine terminated");
    }

    /// Current values of every effect parameter
    pub fn export_parameter_snapshot(&self) -> ParameterSnapshot {
        self.collaborators.parameters.export_snapshot()
    }

    /// Returns the number of parameters written
    pub fn import_parameter_snapshot(&mut self, snapshot: &ParameterSnapshot) -> usize {
        if self.terminated {
            return 0;
        }
        let applied = self.collaborators.parameters.import_snapshot(snapshot);
        debug!(applied, total = snapshot.len(), "parameter snapshot imported");
        applied
    }

    /// URL that brings the host app to the front
    pub fn peer_url(&self) -> Option<String> {
        if !self.connection.is_connected() {
            return None;
        }
        match self.collaborators.host.peer_url() {
            Ok(url) => url,
            Err(e) => {
                warn!(?e, "failed to read host peer URL");
                None
            }
        }
    }

    /// Collaborators driven by this machine
    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    /// Raw host link connection state
    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    /// Current graph run state
    pub fn run_state(&self) -> GraphRunState {
        self.run_state
    }

    /// Foreground and Audiobus flags as last seen
    pub fn context(&self) -> SessionContext {
        self.context
    }

    /// Whether termination has been processed
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Cached transport, if it can be trusted
    pub fn transport(&self) -> Option<TransportSnapshot> {
        if self.connection.is_connected() && self.context.is_foreground {
            self.transport
        } else {
            None
        }
    }

    /// Whether the host link should be presented as connected
    ///
    /// Audiobus brings its own transport controls, so the host link is
    /// reported as disconnected while Audiobus is connected.
    pub fn is_host_connected(&self) -> bool {
        self.connection.is_connected() && !self.context.is_audiobus_connected
    }

    /// Host is playing, per the trusted transport snapshot
    pub fn is_host_playing(&self) -> bool {
        self.transport().is_some_and(|t| t.playing)
    }

    /// Host is recording, per the trusted transport snapshot
    pub fn is_host_recording(&self) -> bool {
        self.transport().is_some_and(|t| t.recording)
    }

    /// Icon fetched from the host on connect
    pub fn host_icon(&self) -> Option<&HostIcon> {
        self.icon.as_ref()
    }

    /// Play/pause requires an attached host
    pub fn can_play(&self) -> bool {
        self.connection.is_connected()
    }

    /// Rewind requires an attached host
    pub fn can_rewind(&self) -> bool {
        self.connection.is_connected()
    }

    /// Recording can only be toggled while the host is not playing
    pub fn can_record(&self) -> bool {
        !self.is_host_playing()
    }

    /// Snapshot of derived state for observers
    pub fn status(&self) -> HostStatus {
        let transport = self.transport().unwrap_or_default();
        HostStatus {
            connection: self.connection,
            host_connected: self.is_host_connected(),
            playing: transport.playing,
            recording: transport.recording,
            sample_time: transport.sample_time,
            run_state: self.run_state,
            foreground: self.context.is_foreground,
            audiobus_connected: self.context.is_audiobus_connected,
            audiobus_session_active: self.context.is_audiobus_session_active,
            has_icon: self.icon.is_some(),
            can_play: self.can_play(),
            can_rewind: self.can_rewind(),
            can_record: self.can_record(),
            terminated: self.terminated,
        }
    }

    /// Read the connection flag and apply any edge
    fn revalidate_connection(&mut self) -> ConnectionEdge {
        let connected = match self.collaborators.host.is_connected() {
            Ok(connected) => connected,
            Err(e) => {
                warn!(?e, "failed to read host connection, assuming no change");
                return ConnectionEdge::Unchanged;
            }
        };

        let next = ConnectionState::from_flag(connected);
        if next == self.connection {
            return ConnectionEdge::Unchanged;
        }

        info!(from = %self.connection, to = %next, "host connection changed");
        self.connection = next;

        if next.is_connected() {
            self.callbacks.release();
            if let Err(e) = self.callbacks.acquire(self.collaborators.host.as_ref()) {
                warn!(?e, "failed to fetch host callbacks");
            }
            self.refresh_transport_snapshot();
            self.fetch_host_icon();
            ConnectionEdge::Connected
        } else {
            self.callbacks.release();
            self.transport = None;
            self.icon = None;
            ConnectionEdge::Disconnected
        }
    }

    fn refresh_audiobus_flags(&mut self) {
        if let Some(audiobus) = &self.collaborators.audiobus {
            let connected = audiobus.is_connected();
            let session_active = audiobus.is_session_active();
            if connected != self.context.is_audiobus_connected
                || session_active != self.context.is_audiobus_session_active
            {
                info!(connected, session_active, "audiobus state changed");
            }
            self.context.is_audiobus_connected = connected;
            self.context.is_audiobus_session_active = session_active;
        }
    }

    fn fetch_host_icon(&mut self) {
        self.icon = self.collaborators.host.host_icon(self.settings.icon_size);
        if self.icon.is_none() {
            debug!("host provided no icon");
        }
    }

    /// Activate the session and start the graph; stays Stopped on failure
    fn start_graph(&mut self) -> bool {
        if let Err(e) = self.collaborators.session.activate(&self.settings.session) {
            warn!(?e, "failed to activate audio session");
        }

        match self.collaborators.graph.start() {
            Ok(()) => {
                self.transition_to(GraphRunState::Running);
                true
            }
            Err(e) => {
                warn!(?e, "failed to start audio graph, will retry on next event");
                if let Err(e) = self.collaborators.session.deactivate() {
                    warn!(?e, "failed to deactivate audio session");
                }
                false
            }
        }
    }

    fn stop_graph(&mut self) {
        self.collaborators.graph.stop();
        if let Err(e) = self.collaborators.session.deactivate() {
            warn!(?e, "failed to deactivate audio session");
        }
        self.transition_to(GraphRunState::Stopped);
    }

    /// Unconditional stop used by termination and media-services reset
    fn teardown(&mut self) {
        self.collaborators.graph.stop();
        if let Err(e) = self.collaborators.session.deactivate() {
            warn!(?e, "failed to deactivate audio session");
        }
        self.callbacks.release();
        if self.run_state != GraphRunState::Stopped {
            self.transition_to(GraphRunState::Stopped);
        }
    }

    fn transition_to(&mut self, new_state: GraphRunState) {
        let duration_ms = self.run_state_since.elapsed().as_millis() as u64;

        info!(
            from = %self.run_state,
            to = %new_state,
            duration_ms = duration_ms,
            "graph run state transition"
        );

        self.run_state = new_state;
        self.run_state_since = Instant::now();
    }

    fn emit_state_changed(&self) {
        let event = HostEvent::HostStateChanged;
        debug!(%event, "emitting event");
        let _ = self.event_tx.send(event);
    }
}
