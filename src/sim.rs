//! In-process collaborators for running without a real platform host
//!
//! The daemon uses these when no platform bindings are linked in, and the
//! test suites use them to script host behaviour. Each one keeps the
//! authoritative state the real collaborator would own and records the calls
//! made against it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::config::{ComponentDescription, SessionConfig};
use crate::events::{Notification, NotificationSink};
use crate::host::{
    AudioGraph, AudioSession, AudiobusLink, HostCallbacks, HostError, HostIcon, RemoteCommand,
    RemoteHostLink, TransportSnapshot, TransportSource,
};

/// Most recent remote commands kept by [`SimulatedHost`]
pub const SENT_LOG_LIMIT: usize = 64;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct TransportState {
    snapshot: TransportSnapshot,
    fail_reads: bool,
}

/// Callback table handed out for one host connection
struct CallbackTable {
    transport: Arc<Mutex<TransportState>>,
    alive: AtomicBool,
}

impl TransportSource for CallbackTable {
    fn transport_state(&self) -> Result<TransportSnapshot, HostError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(HostError::PropertyRead("stale host callbacks".to_string()));
        }
        let state = lock(&self.transport);
        if state.fail_reads {
            return Err(HostError::PropertyRead("transport state unavailable".to_string()));
        }
        Ok(state.snapshot)
    }
}

#[derive(Default)]
struct HostState {
    connected: bool,
    table: Option<Arc<CallbackTable>>,
    fail_connection_reads: bool,
    fail_sends: bool,
    callback_fetches: usize,
    sent: VecDeque<RemoteCommand>,
    icon: Option<Vec<u8>>,
    peer_url: Option<String>,
    published: Option<(ComponentDescription, String)>,
    publish_count: usize,
    sink: Option<NotificationSink>,
}

/// Scriptable stand-in for a host app
///
/// Remote commands are applied to the host's own transport and announced
/// with a `TransportChanged` notification, like a real host would.
#[derive(Default)]
pub struct SimulatedHost {
    state: Mutex<HostState>,
    transport: Arc<Mutex<TransportState>>,
}

impl SimulatedHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach or detach the host; a new attachment gets a new callback table
    pub fn set_connected(&self, connected: bool) {
        let sink = {
            let mut state = lock(&self.state);
            if state.connected == connected {
                return;
            }
            state.connected = connected;

            if let Some(old) = state.table.take() {
                old.alive.store(false, Ordering::SeqCst);
            }
            if connected {
                state.table = Some(Arc::new(CallbackTable {
                    transport: Arc::clone(&self.transport),
                    alive: AtomicBool::new(true),
                }));
            }
            state.sink.clone()
        };

        info!(connected, "simulated host connection changed");
        if let Some(sink) = sink {
            sink.notify(Notification::ConnectionChanged);
        }
    }

    pub fn set_transport(&self, playing: bool, recording: bool, sample_time: f64) {
        lock(&self.transport).snapshot = TransportSnapshot {
            playing,
            recording,
            sample_time,
        };
        self.notify_transport();
    }

    pub fn transport(&self) -> TransportSnapshot {
        lock(&self.transport).snapshot
    }

    pub fn set_icon(&self, data: Vec<u8>) {
        lock(&self.state).icon = Some(data);
    }

    pub fn set_peer_url(&self, url: &str) {
        lock(&self.state).peer_url = Some(url.to_string());
    }

    pub fn fail_connection_reads(&self, fail: bool) {
        lock(&self.state).fail_connection_reads = fail;
    }

    pub fn fail_transport_reads(&self, fail: bool) {
        lock(&self.transport).fail_reads = fail;
    }

    pub fn fail_sends(&self, fail: bool) {
        lock(&self.state).fail_sends = fail;
    }

    pub fn callback_fetches(&self) -> usize {
        lock(&self.state).callback_fetches
    }

    /// Remote commands received, oldest first, up to [`SENT_LOG_LIMIT`]
    pub fn sent_commands(&self) -> Vec<RemoteCommand> {
        lock(&self.state).sent.iter().copied().collect()
    }

    pub fn published(&self) -> Option<(ComponentDescription, String)> {
        lock(&self.state).published.clone()
    }

    pub fn publish_count(&self) -> usize {
        lock(&self.state).publish_count
    }

    fn notify_transport(&self) {
        let sink = {
            let state = lock(&self.state);
            if !state.connected {
                return;
            }
            state.sink.clone()
        };
        if let Some(sink) = sink {
            sink.notify(Notification::TransportChanged);
        }
    }

    fn apply(&self, command: RemoteCommand) {
        let mut transport = lock(&self.transport);
        match command {
            RemoteCommand::Rewind => transport.snapshot.sample_time = 0.0,
            RemoteCommand::TogglePlayPause => transport.snapshot.playing = !transport.snapshot.playing,
            RemoteCommand::ToggleRecord => transport.snapshot.recording = !transport.snapshot.recording,
        }
    }
}

impl RemoteHostLink for SimulatedHost {
    fn publish(&self, description: &ComponentDescription, name: &str) -> Result<(), HostError> {
        let mut state = lock(&self.state);
        state.published = Some((*description, name.to_string()));
        state.publish_count += 1;
        Ok(())
    }

    fn subscribe(&self, sink: NotificationSink) {
        lock(&self.state).sink = Some(sink);
    }

    fn is_connected(&self) -> Result<bool, HostError> {
        let state = lock(&self.state);
        if state.fail_connection_reads {
            return Err(HostError::PropertyRead("connection flag unavailable".to_string()));
        }
        Ok(state.connected)
    }

    fn host_callbacks(&self) -> Result<HostCallbacks, HostError> {
        let mut state = lock(&self.state);
        state.callback_fetches += 1;
        let table = state
            .table
            .clone()
            .ok_or_else(|| HostError::PropertyRead("no host attached".to_string()))?;
        Ok(HostCallbacks::new(table))
    }

    fn send_remote_event(&self, command: RemoteCommand) -> Result<(), HostError> {
        {
            let mut state = lock(&self.state);
            if state.fail_sends || !state.connected {
                return Err(HostError::RemoteCommand {
                    command,
                    reason: "host not reachable".to_string(),
                });
            }
            if state.sent.len() == SENT_LOG_LIMIT {
                state.sent.pop_front();
            }
            state.sent.push_back(command);
        }

        debug!(%command, "simulated host applying remote command");
        self.apply(command);
        self.notify_transport();
        Ok(())
    }

    fn host_icon(&self, size: u32) -> Option<HostIcon> {
        let state = lock(&self.state);
        if !state.connected {
            return None;
        }
        state.icon.as_ref().map(|data| HostIcon {
            size,
            data: Arc::from(data.as_slice()),
        })
    }

    fn peer_url(&self) -> Result<Option<String>, HostError> {
        Ok(lock(&self.state).peer_url.clone())
    }
}

/// Audio graph that only records start/stop calls
#[derive(Default)]
pub struct SimulatedGraph {
    running: AtomicBool,
    fail_starts: AtomicBool,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl SimulatedGraph {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_starts(&self, fail: bool) {
        self.fail_starts.store(fail, Ordering::SeqCst);
    }

    /// Number of successful starts
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl AudioGraph for SimulatedGraph {
    fn start(&self) -> Result<(), HostError> {
        if self.fail_starts.load(Ordering::SeqCst) {
            return Err(HostError::GraphStart("simulated start failure".to_string()));
        }
        self.running.store(true, Ordering::SeqCst);
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Audio session that records its activation state
#[derive(Default)]
pub struct SimulatedSession {
    active: AtomicBool,
    activations: AtomicUsize,
    last_config: Mutex<Option<SessionConfig>>,
}

impl SimulatedSession {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn activations(&self) -> usize {
        self.activations.load(Ordering::SeqCst)
    }

    /// Settings passed to the most recent activation
    pub fn last_config(&self) -> Option<SessionConfig> {
        lock(&self.last_config).clone()
    }
}

impl AudioSession for SimulatedSession {
    fn activate(&self, config: &SessionConfig) -> Result<(), HostError> {
        debug!(
            sample_rate = config.preferred_sample_rate,
            frames = config.max_frames_per_slice,
            mix_with_others = config.mix_with_others,
            "simulated session activated"
        );
        *lock(&self.last_config) = Some(config.clone());
        self.active.store(true, Ordering::SeqCst);
        self.activations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn deactivate(&self) -> Result<(), HostError> {
        self.active.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Audiobus link with externally set connection flags
#[derive(Default)]
pub struct SimulatedAudiobus {
    connected: AtomicBool,
    session_active: AtomicBool,
    sink: Mutex<Option<NotificationSink>>,
}

impl SimulatedAudiobus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Update both flags and announce the change
    pub fn set(&self, connected: bool, session_active: bool) {
        self.connected.store(connected, Ordering::SeqCst);
        self.session_active.store(session_active, Ordering::SeqCst);

        let sink = lock(&self.sink).clone();
        if let Some(sink) = sink {
            sink.notify(Notification::AudiobusConnectionsChanged);
        }
    }
}

impl AudiobusLink for SimulatedAudiobus {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_session_active(&self) -> bool {
        self.session_active.load(Ordering::SeqCst)
    }

    fn subscribe(&self, sink: NotificationSink) {
        *lock(&self.sink) = Some(sink);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_reconnect_invalidates_old_callbacks() {
        let host = SimulatedHost::new();
        host.set_connected(true);
        let first = host.host_callbacks().unwrap();
        assert!(first.transport_state().is_ok());

        host.set_connected(false);
        host.set_connected(true);
        let second = host.host_callbacks().unwrap();

        assert!(first.transport_state().is_err());
        assert!(second.transport_state().is_ok());
        assert_ne!(first.identity(), second.identity());
    }

    #[test]
    fn test_host_applies_remote_commands() {
        let host = SimulatedHost::new();
        host.set_connected(true);
        host.set_transport(false, false, 2048.0);

        host.send_remote_event(RemoteCommand::TogglePlayPause).unwrap();
        host.send_remote_event(RemoteCommand::Rewind).unwrap();

        let transport = host.transport();
        assert!(transport.playing);
        assert_eq!(transport.sample_time, 0.0);
    }

    #[test]
    fn test_host_command_log_is_bounded() {
        let host = SimulatedHost::new();
        host.set_connected(true);

        for _ in 0..SENT_LOG_LIMIT * 2 {
            host.send_remote_event(RemoteCommand::TogglePlayPause).unwrap();
        }
        host.send_remote_event(RemoteCommand::Rewind).unwrap();

        let sent = host.sent_commands();
        assert_eq!(sent.len(), SENT_LOG_LIMIT);
        assert_eq!(sent.last(), Some(&RemoteCommand::Rewind));
    }

    #[test]
    fn test_host_rejects_commands_when_detached() {
        let host = SimulatedHost::new();
        assert!(host.send_remote_event(RemoteCommand::ToggleRecord).is_err());
    }

    #[test]
    fn test_host_notifies_subscriber() {
        let host = SimulatedHost::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let received = Arc::clone(&received);
            NotificationSink::new(move |n| received.lock().unwrap().push(n))
        };
        host.subscribe(sink);

        host.set_connected(true);
        host.set_transport(true, false, 0.0);
        host.set_connected(true);

        assert_eq!(
            *received.lock().unwrap(),
            vec![Notification::ConnectionChanged, Notification::TransportChanged]
        );
    }

    #[test]
    fn test_graph_counts_only_real_stops() {
        let graph = SimulatedGraph::new();
        graph.stop();
        assert_eq!(graph.stops(), 0);

        graph.start().unwrap();
        graph.stop();
        graph.stop();
        assert_eq!(graph.stops(), 1);
    }
}
