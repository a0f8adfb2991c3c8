//! Unix domain socket server for IPC
//!
//! Provides request-response communication and pushes host state change
//! events to subscribed clients.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::events::HostEvent;
use crate::params::{from_state_dictionary, to_state_dictionary};
use crate::sim::{SimulatedAudiobus, SimulatedHost};
use crate::state::HostHandle;

use super::protocol::{DaemonStatus, Outgoing, Request, Response, MAX_MESSAGE_LEN};

/// Simulated collaborators the IPC clients may drive
#[derive(Clone)]
pub struct Simulation {
    pub host: Arc<SimulatedHost>,
    pub audiobus: Arc<SimulatedAudiobus>,
}

/// State shared by all client handlers
struct ClientContext {
    handle: HostHandle,
    events: broadcast::Sender<HostEvent>,
    simulation: Option<Simulation>,
    start_time: Instant,
}

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    context: Arc<ClientContext>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Create a new IPC server bound to `socket_path`
    pub fn new(
        socket_path: &Path,
        handle: HostHandle,
        events: broadcast::Sender<HostEvent>,
        simulation: Option<Simulation>,
    ) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            context: Arc::new(ClientContext {
                handle,
                events,
                simulation,
                start_time: Instant::now(),
            }),
            shutdown_tx,
        })
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("server not initialized")?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let context = Arc::clone(&self.context);
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, context) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    ///
    /// Requests are read on a separate task so that pushed events can be
    /// interleaved without cancelling a partially read frame.
    async fn handle_client(stream: UnixStream, context: Arc<ClientContext>) -> Result<()> {
        let (reader, mut writer) = stream.into_split();
        let (request_tx, mut request_rx) = mpsc::channel(16);
        let reader_task = tokio::spawn(Self::read_requests(reader, request_tx));

        let mut event_rx: Option<broadcast::Receiver<HostEvent>> = None;

        let result = loop {
            tokio::select! {
                request = request_rx.recv() => {
                    let Some(request) = request else {
                        break Ok(());
                    };

                    let response = match request {
                        Ok(request) => {
                            debug!(?request, "received request");
                            Self::process_request(request, &context).await
                        }
                        Err(message) => Response::error("invalid_request", message),
                    };

                    if matches!(response, Response::Subscribed) && event_rx.is_none() {
                        event_rx = Some(context.events.subscribe());
                        debug!("client subscribed to notifications");
                    }

                    if let Err(e) = Self::send_message(&mut writer, &Outgoing::Response(response)).await {
                        break Err(e);
                    }
                }
                event = next_event(&mut event_rx) => {
                    match event {
                        Ok(event) => {
                            if let Err(e) = Self::send_message(&mut writer, &Outgoing::Event(event)).await {
                                break Err(e);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "client event receiver lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            event_rx = None;
                        }
                    }
                }
            }
        };

        reader_task.abort();
        result
    }

    /// Read length-prefixed requests until the client disconnects
    async fn read_requests(
        mut reader: OwnedReadHalf,
        request_tx: mpsc::Sender<Result<Request, String>>,
    ) -> Result<()> {
        let mut len_buf = [0u8; 4];

        loop {
            // Read message length (4-byte little-endian)
            match reader.read_exact(&mut len_buf).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    debug!("client disconnected");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }

            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_MESSAGE_LEN {
                warn!(len, "message too large, disconnecting");
                return Ok(());
            }

            // Read message body
            let mut msg_buf = vec![0u8; len];
            reader.read_exact(&mut msg_buf).await?;

            let request = serde_json::from_slice::<Request>(&msg_buf).map_err(|e| e.to_string());
            if request_tx.send(request).await.is_err() {
                return Ok(());
            }
        }
    }

    /// Send a length-prefixed JSON message
    async fn send_message<T: serde::Serialize>(writer: &mut OwnedWriteHalf, msg: &T) -> Result<()> {
        let msg_bytes = serde_json::to_vec(msg)?;
        let msg_len = (msg_bytes.len() as u32).to_le_bytes();

        writer.write_all(&msg_len).await?;
        writer.write_all(&msg_bytes).await?;

        Ok(())
    }

    /// Process a request and return a response
    async fn process_request(request: Request, context: &ClientContext) -> Response {
        let handle = &context.handle;

        match request {
            Request::Ping => Response::Pong,

            Request::GetStatus => match handle.status().await {
                Some(host) => Response::Status(DaemonStatus::new(
                    host,
                    context.start_time.elapsed().as_secs(),
                )),
                None => Response::error("unavailable", "host state machine has stopped"),
            },

            Request::Subscribe => Response::Subscribed,

            Request::RemoteCommand { command } => {
                handle.send_remote_command(command);
                Response::Ack
            }

            Request::Lifecycle { phase } => {
                info!(?phase, "lifecycle change via IPC");
                handle.notify(phase.into());
                Response::Ack
            }

            Request::ExportState => match handle.export_parameters().await {
                Some(snapshot) => Response::State {
                    values: to_state_dictionary(&snapshot),
                },
                None => Response::error("unavailable", "host state machine has stopped"),
            },

            Request::ImportState { values } => {
                match handle.import_parameters(from_state_dictionary(&values)).await {
                    Some(applied) => Response::Imported { applied },
                    None => Response::error("unavailable", "host state machine has stopped"),
                }
            }

            Request::GoToHost => Response::PeerUrl {
                url: handle.peer_url().await,
            },

            Request::SimulateHost {
                connected,
                playing,
                recording,
            } => {
                let Some(simulation) = &context.simulation else {
                    return Response::error("unsupported", "no simulated host");
                };
                let host = &simulation.host;
                if let Some(connected) = connected {
                    host.set_connected(connected);
                }
                if playing.is_some() || recording.is_some() {
                    let current = host.transport();
                    host.set_transport(
                        playing.unwrap_or(current.playing),
                        recording.unwrap_or(current.recording),
                        current.sample_time,
                    );
                }
                Response::Ack
            }

            Request::SimulateAudiobus {
                connected,
                session_active,
            } => {
                let Some(simulation) = &context.simulation else {
                    return Response::error("unsupported", "no simulated audiobus");
                };
                simulation.audiobus.set(connected, session_active);
                Response::Ack
            }
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

/// Wait for the next event, or forever if not subscribed
async fn next_event(
    event_rx: &mut Option<broadcast::Receiver<HostEvent>>,
) -> Result<HostEvent, broadcast::error::RecvError> {
    match event_rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio_test::assert_ok;

    use crate::config::Config;
    use crate::params::{ChorusParameters, StateDictionary};
    use crate::sim::{SimulatedGraph, SimulatedSession};
    use crate::state::{Collaborators, HostActor, HostSettings, HostStateMachine};

    struct Running {
        server: Arc<Server>,
        host: Arc<SimulatedHost>,
        socket_path: PathBuf,
    }

    fn socket_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("chorus-host-{}-{}.sock", name, std::process::id()))
    }

    fn start_server(name: &str) -> Running {
        let host = SimulatedHost::new();
        let audiobus = SimulatedAudiobus::new();
        let collaborators = Collaborators {
            host: host.clone(),
            graph: SimulatedGraph::new(),
            session: SimulatedSession::new(),
            audiobus: Some(audiobus.clone()),
            parameters: Arc::new(ChorusParameters::new()),
        };

        let config = Config::with_home(Path::new("/tmp/chorus-test")).unwrap();
        let (event_tx, _) = broadcast::channel(64);
        let machine =
            HostStateMachine::new(collaborators, HostSettings::from(&config), event_tx.clone(), true);
        let (handle, _join) = HostActor::spawn(machine);

        let socket_path = socket_path(name);
        let simulation = Simulation {
            host: host.clone(),
            audiobus,
        };
        let server = Arc::new(Server::new(&socket_path, handle, event_tx, Some(simulation)).unwrap());

        let running = Arc::clone(&server);
        tokio::spawn(async move { running.run().await });

        Running {
            server,
            host,
            socket_path,
        }
    }

    async fn send(stream: &mut UnixStream, request: &Request) {
        let bytes = serde_json::to_vec(request).unwrap();
        stream.write_all(&(bytes.len() as u32).to_le_bytes()).await.unwrap();
        stream.write_all(&bytes).await.unwrap();
    }

    async fn receive(stream: &mut UnixStream) -> Outgoing {
        let read = async {
            let mut len_buf = [0u8; 4];
            stream.read_exact(&mut len_buf).await.unwrap();
            let mut body = vec![0u8; u32::from_le_bytes(len_buf) as usize];
            stream.read_exact(&mut body).await.unwrap();
            serde_json::from_slice::<Outgoing>(&body).unwrap()
        };
        assert_ok!(tokio::time::timeout(Duration::from_secs(2), read).await)
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let running = start_server("ping");
        let mut stream = UnixStream::connect(&running.socket_path).await.unwrap();

        send(&mut stream, &Request::Ping).await;
        assert!(matches!(receive(&mut stream).await, Outgoing::Response(Response::Pong)));

        running.server.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_request_gets_error() {
        let running = start_server("invalid");
        let mut stream = UnixStream::connect(&running.socket_path).await.unwrap();

        let bytes = br#"{"type":"launch_rockets"}"#;
        stream.write_all(&(bytes.len() as u32).to_le_bytes()).await.unwrap();
        stream.write_all(bytes).await.unwrap();

        match receive(&mut stream).await {
            Outgoing::Response(Response::Error { code, .. }) => assert_eq!(code, "invalid_request"),
            other => panic!("expected error, got {other:?}"),
        }

        running.server.shutdown().await;
    }

    #[tokio::test]
    async fn test_subscriber_receives_pushed_events() {
        let running = start_server("subscribe");
        let mut stream = UnixStream::connect(&running.socket_path).await.unwrap();

        send(&mut stream, &Request::Subscribe).await;
        assert!(matches!(receive(&mut stream).await, Outgoing::Response(Response::Subscribed)));

        running.host.set_connected(true);
        assert!(matches!(
            receive(&mut stream).await,
            Outgoing::Event(HostEvent::HostStateChanged)
        ));

        send(&mut stream, &Request::GetStatus).await;
        loop {
            match receive(&mut stream).await {
                // More pushes may race ahead of the response
                Outgoing::Event(_) => continue,
                Outgoing::Response(Response::Status(status)) => {
                    assert!(status.host.host_connected);
                    break;
                }
                other => panic!("expected status, got {other:?}"),
            }
        }

        running.server.shutdown().await;
    }

    #[tokio::test]
    async fn test_state_export_import() {
        let running = start_server("state");
        let mut stream = UnixStream::connect(&running.socket_path).await.unwrap();

        let mut values = StateDictionary::new();
        values.insert("1".to_string(), 0.625);
        values.insert("name".to_string(), 1.0);
        send(&mut stream, &Request::ImportState { values }).await;
        assert!(matches!(
            receive(&mut stream).await,
            Outgoing::Response(Response::Imported { applied: 1 })
        ));

        send(&mut stream, &Request::ExportState).await;
        match receive(&mut stream).await {
            Outgoing::Response(Response::State { values }) => {
                assert_eq!(values.len(), 5);
                assert_eq!(values.get("1"), Some(&0.625));
            }
            other => panic!("expected state, got {other:?}"),
        }

        running.server.shutdown().await;
    }
}
