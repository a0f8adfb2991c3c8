//! Cached host-callback handle
//!
//! The host hands out a callback handle that is the only way to read its
//! transport state. The handle goes stale when the host reconnects, so the
//! state machine keeps exactly one cached copy here and drops it whenever it
//! can no longer be trusted.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::{HostError, RemoteHostLink, TransportSnapshot};

/// Source of host transport state behind a callback handle
pub trait TransportSource: Send + Sync {
    /// Read the host's current play/record/position state
    fn transport_state(&self) -> Result<TransportSnapshot, HostError>;
}

/// Handle to the host's transport callbacks
#[derive(Clone)]
pub struct HostCallbacks {
    source: Arc<dyn TransportSource>,
}

impl HostCallbacks {
    pub fn new(source: Arc<dyn TransportSource>) -> Self {
        Self { source }
    }

    /// Address of the underlying callback table, used to detect a replaced handle
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.source).cast::<()>() as usize
    }

    pub fn transport_state(&self) -> Result<TransportSnapshot, HostError> {
        self.source.transport_state()
    }
}

impl fmt::Debug for HostCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostCallbacks")
            .field("identity", &format_args!("{:#x}", self.identity()))
            .finish()
    }
}

/// Exclusive owner of the cached host-callback handle
///
/// The old handle is always released before a replacement is requested, and
/// every failed fetch or read leaves the cache empty so the next trigger
/// retries.
#[derive(Debug, Default)]
pub struct CallbackCache {
    handle: Option<HostCallbacks>,
    last_identity: Option<usize>,
    generation: u64,
}

impl CallbackCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a handle is currently held
    pub fn is_cached(&self) -> bool {
        self.handle.is_some()
    }

    /// Number of distinct handles installed so far
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Drop the cached handle, if any
    pub fn release(&mut self) {
        if self.handle.take().is_some() {
            debug!(generation = self.generation, "host callbacks released");
        }
    }

    /// Return the cached handle, fetching one from the host if none is held
    pub fn acquire(&mut self, link: &dyn RemoteHostLink) -> Result<&HostCallbacks, HostError> {
        if self.handle.is_none() {
            let fresh = link.host_callbacks()?;
            self.install(fresh);
        }

        self.handle
            .as_ref()
            .ok_or_else(|| HostError::PropertyRead("host callbacks unavailable".to_string()))
    }

    /// Release the current handle and fetch a new one
    pub fn refetch(&mut self, link: &dyn RemoteHostLink) -> Result<&HostCallbacks, HostError> {
        self.release();
        self.acquire(link)
    }

    /// Read the host transport through the cached handle
    ///
    /// A failed read drops the handle. If the host has meanwhile handed out a
    /// different callback table, the read is retried once through it;
    /// otherwise the cache stays empty and the next call fetches again.
    pub fn read_transport(&mut self, link: &dyn RemoteHostLink) -> Result<TransportSnapshot, HostError> {
        let error = match self.acquire(link).and_then(|callbacks| callbacks.transport_state()) {
            Ok(snapshot) => return Ok(snapshot),
            Err(e) => e,
        };

        let stale = self.last_identity;
        self.release();

        let fresh = match link.host_callbacks() {
            Ok(fresh) if Some(fresh.identity()) != stale => fresh,
            _ => return Err(error),
        };

        debug!(?error, "host callbacks went stale, retrying read");
        let result = fresh.transport_state();
        if result.is_ok() {
            self.install(fresh);
        }
        result
    }

    fn install(&mut self, fresh: HostCallbacks) {
        let identity = fresh.identity();
        if self.last_identity != Some(identity) {
            self.generation += 1;
            debug!(generation = self.generation, ?fresh, "host callbacks changed");
        }
        self.last_identity = Some(identity);
        self.handle = Some(fresh);
    }
}
