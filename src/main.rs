//! chorus-host-link: host connection daemon for the Chorus effect
//!
//! Runs the host connection and transport state machine on a single actor
//! task and exposes it to the UI process over a Unix socket:
//! - Graph start/stop driven by host link, Audiobus and app lifecycle
//! - Transport mirroring and remote-control commands
//! - Audiobus state save/restore of the effect parameters
//!
//! Without platform bindings the daemon runs against simulated
//! collaborators that IPC clients can drive.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use chorus_host_link::config::Config;
use chorus_host_link::events::{HostEvent, Notification};
use chorus_host_link::ipc::{Server, Simulation};
use chorus_host_link::lifecycle::ShutdownSignal;
use chorus_host_link::params::ChorusParameters;
use chorus_host_link::sim::{SimulatedAudiobus, SimulatedGraph, SimulatedHost, SimulatedSession};
use chorus_host_link::state::{Collaborators, HostActor, HostSettings, HostStateMachine};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "chorus-host-link starting"
    );

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(?config.socket_path, component = %config.component, "configuration loaded");

    // Create shutdown signal handler
    let mut shutdown = ShutdownSignal::new().context("failed to register signal handlers")?;

    // State machine -> IPC clients and logging
    let (event_tx, _event_rx) = broadcast::channel::<HostEvent>(64);

    let host = SimulatedHost::new();
    let audiobus = SimulatedAudiobus::new();
    let collaborators = Collaborators {
        host: host.clone(),
        graph: SimulatedGraph::new(),
        session: SimulatedSession::new(),
        audiobus: Some(audiobus.clone()),
        parameters: Arc::new(ChorusParameters::new()),
    };

    let machine = HostStateMachine::new(
        collaborators,
        HostSettings::from(&config),
        event_tx.clone(),
        config.start_in_foreground,
    );
    let (handle, actor) = HostActor::spawn(machine);

    let server = Server::new(
        &config.socket_path,
        handle.clone(),
        event_tx.clone(),
        Some(Simulation { host, audiobus }),
    )?;

    let mut log_event_rx = event_tx.subscribe();
    let log_handle = handle.clone();

    info!("daemon initialized, entering main loop");

    // Main event loop
    tokio::select! {
        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Log derived state on every change
        _ = async {
            loop {
                match log_event_rx.recv().await {
                    Ok(event) => {
                        let Some(status) = log_handle.status().await else {
                            break;
                        };
                        info!(
                            %event,
                            connection = ?status.connection,
                            run_state = ?status.run_state,
                            playing = status.playing,
                            recording = status.recording,
                            "host state"
                        );
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "state event receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        } => {
            info!("state event handler exited");
        }

        // Wait for shutdown signal
        signal = shutdown.wait() => {
            info!(signal, "shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    handle.notify(Notification::Terminating);
    if let Err(e) = actor.await {
        error!(?e, "host actor failed");
    }
    server.shutdown().await;

    info!("chorus-host-link stopped");

    Ok(())
}
