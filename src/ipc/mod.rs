//! IPC module for daemon-UI communication

mod protocol;
mod server;

pub use protocol::{DaemonStatus, LifecyclePhase, Outgoing, Request, Response, MAX_MESSAGE_LEN};
pub use server::{Server, Simulation};
