//! Signal handling for graceful shutdown
//!
//! SIGTERM and SIGINT are the daemon's process-termination notification; the
//! caller turns them into a terminal `Terminating` event for the state
//! machine.

use std::io;

use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::debug;

/// Handles shutdown signals (SIGTERM, SIGINT)
pub struct ShutdownSignal {
    sigterm: Signal,
    sigint: Signal,
}

impl ShutdownSignal {
    /// Register the signal handlers; must be called inside a runtime
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            sigterm: signal(SignalKind::terminate())?,
            sigint: signal(SignalKind::interrupt())?,
        })
    }

    /// Wait for a shutdown signal and return its name
    pub async fn wait(&mut self) -> &'static str {
        tokio::select! {
            _ = self.sigterm.recv() => {
                debug!("received SIGTERM");
                "SIGTERM"
            }
            _ = self.sigint.recv() => {
                debug!("received SIGINT");
                "SIGINT"
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_registers_handlers() {
        assert_ok!(ShutdownSignal::new());
    }
}
