//! chorus-host-link: host connection and transport synchronization for the
//! Chorus effect
//!
//! Decides when the effect's audio graph runs based on the inter-app host
//! link, Audiobus and app lifecycle, mirrors the host's transport for the
//! UI, and forwards transport remote-control events back to the host.

pub mod config;
pub mod events;
pub mod host;
pub mod ipc;
pub mod lifecycle;
pub mod params;
pub mod sim;
pub mod state;
