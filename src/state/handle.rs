//! Cloneable handle to the host actor
//!
//! Fire-and-forget methods for notifications and remote commands; async
//! methods with oneshot replies for queries. Every method returns
//! immediately or `None` once the actor has stopped.

use tokio::sync::{mpsc, oneshot};

use crate::events::{Notification, NotificationSink};
use crate::host::RemoteCommand;
use crate::params::ParameterSnapshot;

use super::actor::Command;
use super::machine::HostStatus;

#[derive(Clone)]
pub struct HostHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl HostHandle {
    pub fn new(cmd_tx: mpsc::UnboundedSender<Command>) -> Self {
        Self { cmd_tx }
    }

    /// Sink that forwards collaborator notifications to the actor
    ///
    /// Safe to call from any thread, including audio and system callbacks.
    pub fn sink(&self) -> NotificationSink {
        let cmd_tx = self.cmd_tx.clone();
        NotificationSink::new(move |notification| {
            let _ = cmd_tx.send(Command::Notify(notification));
        })
    }

    pub fn notify(&self, notification: Notification) {
        let _ = self.cmd_tx.send(Command::Notify(notification));
    }

    pub fn send_remote_command(&self, command: RemoteCommand) {
        let _ = self.cmd_tx.send(Command::SendRemoteCommand(command));
    }

    pub fn is_closed(&self) -> bool {
        self.cmd_tx.is_closed()
    }

    pub async fn status(&self) -> Option<HostStatus> {
        self.request(|response| Command::GetStatus { response }).await
    }

    pub async fn export_parameters(&self) -> Option<ParameterSnapshot> {
        self.request(|response| Command::ExportParameters { response })
            .await
    }

    /// Returns the number of parameters written
    pub async fn import_parameters(&self, snapshot: ParameterSnapshot) -> Option<usize> {
        self.request(|response| Command::ImportParameters { snapshot, response })
            .await
    }

    pub async fn peer_url(&self) -> Option<String> {
        self.request(|response| Command::PeerUrl { response })
            .await
            .flatten()
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Option<T> {
        let (response_tx, response_rx) = oneshot::channel();
        if self.cmd_tx.send(build(response_tx)).is_err() {
            return None;
        }
        response_rx.await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queries_fail_after_actor_gone() {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = HostHandle::new(tx);
        drop(rx);

        assert!(handle.is_closed());
        assert!(handle.status().await.is_none());
        assert!(handle.peer_url().await.is_none());
    }

    #[tokio::test]
    async fn test_sink_enqueues_notifications() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = HostHandle::new(tx);

        handle.sink().notify(Notification::TransportChanged);
        handle.send_remote_command(RemoteCommand::Rewind);

        assert!(matches!(
            rx.recv().await,
            Some(Command::Notify(Notification::TransportChanged))
        ));
        assert!(matches!(
            rx.recv().await,
            Some(Command::SendRemoteCommand(RemoteCommand::Rewind))
        ));
    }
}
