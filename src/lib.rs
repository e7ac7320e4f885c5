//! timing_ioc: NTP, GPS and host clock telemetry for control-system clients
//!
//! Pollers query the local NTP daemon (mode 6 control messages), gpsd and
//! the host clock, and publish fixed-size variables into a shared registry.
//! Clients read those variables over a Unix socket with a small binary
//! request/response protocol. The peer poller also watches for leap second
//! events and restarts the NTP daemon when it fails to recover.

pub mod bridge;
pub mod core;
pub mod network;
pub mod poll;
pub mod protocol;
pub mod registry;
pub mod time;
pub mod util;

pub use crate::core::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
