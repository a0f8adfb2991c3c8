//! Process lifecycle signals

mod shutdown;

pub use shutdown::ShutdownSignal;
