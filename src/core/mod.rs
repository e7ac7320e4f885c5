//! Core types shared by every component of the bridge
//!
//! This module contains the error type, configuration, the process-wide
//! fault flag and the shared state handed to pollers and the server.

pub mod error;
pub mod fault;
pub mod serde;
pub mod types;

pub use self::error::{Error, Result};
pub use self::fault::FaultFlag;
pub use self::types::{
    ClockConfig,
    Config,
    GpsConfig,
    MissingFieldPolicy,
    NtpConfig,
    RecoveryConfig,
    ServerConfig,
    ServerMode,
};

use crate::registry::Registry;

/// Default Unix socket path for control-system clients
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/ntp.socket";

/// Protocol version reported to clients (major, minor, revision)
pub const PROTOCOL_VERSION: [u8; 3] = [2, 0, 0];

/// Slot size of every string variable (refid, dstadr, daemon version)
pub const MAX_STRING_LEN: usize = 16;

/// State owned by the orchestrator and shared with every task
#[derive(Debug, Default)]
pub struct SharedState {
    /// Published variables
    pub registry: Registry,
    /// Monotonic process-wide error flag
    pub fault: FaultFlag,
}

impl SharedState {
    /// Creates an empty registry with a cleared fault flag
    pub fn new() -> Self {
        Self::default()
    }
}
