use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{Error, Result};

/// What a poller does when a field it publishes is absent from a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingFieldPolicy {
    /// Keep the slot's previous value and publish the other fields
    #[default]
    Skip,
    /// Publish nothing for this cycle
    AbortCycle,
    /// Treat the response as fatal and raise the process-wide fault
    Fail,
}

/// How the protocol server handles client connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerMode {
    /// One connection is served to completion before the next is accepted
    #[default]
    Sequential,
    /// One task per connection, bounded by `max_connections`
    Concurrent,
}

/// Protocol server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Unix socket path clients connect to
    pub socket_path: PathBuf,
    /// Connection handling mode
    pub mode: ServerMode,
    /// Connection limit in concurrent mode
    pub max_connections: usize,
    /// Idle limit between request frames, none by default
    #[serde(serialize_with = "super::serde::serialize_opt_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_opt_duration")]
    pub read_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            socket_path: PathBuf::from(super::DEFAULT_SOCKET_PATH),
            mode: ServerMode::Sequential,
            max_connections: 8,
            read_timeout: None,
        }
    }
}

/// Leap second recovery settings for the peer poller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Polling cycles granted to the daemon after a leap event
    pub max_steps: i32,
    /// Offset (ms) above which the daemon is considered unrecovered
    pub offset_threshold: f64,
    /// Leave recovery mode as soon as the offset is back under the threshold
    pub clear_on_recovery: bool,
    /// systemd unit restarted as corrective action
    pub service: String,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        RecoveryConfig {
            max_steps: 30,
            offset_threshold: 10.0,
            clear_on_recovery: false,
            service: "ntpd".to_string(),
        }
    }
}

/// NTP daemon settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NtpConfig {
    /// Control (mode 6) address of the daemon
    pub address: String,
    /// Peer variable poll interval
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub peer_interval: Duration,
    /// System variable poll interval
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub system_interval: Duration,
    /// Time to wait for a control response
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub request_timeout: Duration,
    /// Missing field handling for peer and system variables
    pub missing_field: MissingFieldPolicy,
    /// Leap second watchdog
    pub recovery: RecoveryConfig,
}

impl Default for NtpConfig {
    fn default() -> Self {
        NtpConfig {
            address: "127.0.0.1:123".to_string(),
            peer_interval: Duration::from_secs(1),
            system_interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(2),
            missing_field: MissingFieldPolicy::Skip,
            recovery: RecoveryConfig::default(),
        }
    }
}

/// Host clock settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Timestamp refresh interval
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub interval: Duration,
}

impl Default for ClockConfig {
    fn default() -> Self {
        ClockConfig {
            interval: Duration::from_millis(100),
        }
    }
}

/// GPS daemon settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GpsConfig {
    /// Poll gpsd at all; the slots stay registered either way
    pub enabled: bool,
    /// gpsd TCP address
    pub address: String,
    /// Poll interval
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub interval: Duration,
    /// Time to wait for a POLL report
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub request_timeout: Duration,
    /// Missing field handling for fix values
    pub missing_field: MissingFieldPolicy,
}

impl Default for GpsConfig {
    fn default() -> Self {
        GpsConfig {
            enabled: true,
            address: "127.0.0.1:2947".to_string(),
            interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(2),
            missing_field: MissingFieldPolicy::Skip,
        }
    }
}

/// Configuration for the bridge
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Client-facing protocol server
    pub server: ServerConfig,
    /// NTP daemon polling
    pub ntp: NtpConfig,
    /// Host clock polling
    pub clock: ClockConfig,
    /// GPS daemon polling
    pub gps: GpsConfig,
}

impl Config {
    /// Loads a JSON configuration file; absent keys take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&text)
            .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the configuration is usable
    pub fn validate(&self) -> Result<()> {
        let intervals = [
            ("ntp.peer_interval", self.ntp.peer_interval),
            ("ntp.system_interval", self.ntp.system_interval),
            ("clock.interval", self.clock.interval),
            ("gps.interval", self.gps.interval),
        ];
        for (name, interval) in intervals {
            if interval < Duration::from_millis(10) {
                return Err(Error::config(format!("{} too small", name)));
            }
        }

        if self.ntp.request_timeout.is_zero() || self.gps.request_timeout.is_zero() {
            return Err(Error::config("request timeouts must be positive"));
        }
        if self.ntp.recovery.max_steps < 0 {
            return Err(Error::config("ntp.recovery.max_steps must not be negative"));
        }
        if !self.ntp.recovery.offset_threshold.is_finite() {
            return Err(Error::config("ntp.recovery.offset_threshold must be finite"));
        }
        if self.ntp.recovery.service.trim().is_empty() {
            return Err(Error::config("ntp.recovery.service is empty"));
        }
        if self.server.socket_path.as_os_str().is_empty() {
            return Err(Error::config("server.socket_path is empty"));
        }
        if self.server.mode == ServerMode::Concurrent && self.server.max_connections == 0 {
            return Err(Error::config("server.max_connections must be positive"));
        }

        Ok(())
    }
}
