//! Time source pollers
//!
//! Each poller publishes a fixed group of variables:
//!
//! - [`PeerPoller`] queries every NTP association, picks the current sync
//!   source and supervises leap second recovery
//! - [`SystemPoller`] reads the daemon's system variables
//! - [`ClockPoller`] samples the host clock
//! - [`GpsPoller`] reads the current fix from gpsd
//!
//! The field tables below fix the order in which slots are registered for
//! each group, which is the order clients see in the variable list.

pub mod clock;
pub mod control;
pub mod gps;
pub mod ntp;
pub mod ntpq;
pub mod watchdog;

#[cfg(test)]
mod testing;

pub use self::clock::ClockPoller;
pub use self::control::{DaemonControl, Systemctl};
pub use self::gps::{GpsPoller, GpsQuery, GpsdClient};
pub use self::ntp::{select_association, Association, PeerPoller, SystemPoller};
pub use self::ntpq::{AssociationStatus, NtpQuery, NtpqClient, VarResponse};
pub use self::watchdog::LeapWatchdog;

use crate::core::MAX_STRING_LEN;
use crate::poll::{FieldKind, FieldSpec};

/// Variables of the selected sync source
pub const PEER_FIELDS: [FieldSpec; 7] = [
    FieldSpec::new("leap", FieldKind::U8),
    FieldSpec::new("stratum", FieldKind::U8),
    FieldSpec::new("refid", FieldKind::Str(MAX_STRING_LEN)),
    FieldSpec::new("offset", FieldKind::F32),
    FieldSpec::new("jitter", FieldKind::F32),
    FieldSpec::new("precision", FieldKind::Pow2F32),
    FieldSpec::new("dstadr", FieldKind::Str(MAX_STRING_LEN)),
];

/// Daemon-wide variables
pub const SYSTEM_FIELDS: [FieldSpec; 5] = [
    FieldSpec::new("version", FieldKind::Version(MAX_STRING_LEN)),
    FieldSpec::new("frequency", FieldKind::F32),
    FieldSpec::new("sys_jitter", FieldKind::F32),
    FieldSpec::new("clk_wander", FieldKind::F32),
    FieldSpec::new("clk_jitter", FieldKind::F32),
];

/// Host clock, seconds since the epoch
pub const CLOCK_FIELD: FieldSpec = FieldSpec::new("timestamp", FieldKind::U64);

/// Current GPS fix
pub const GPS_FIELDS: [FieldSpec; 6] = [
    FieldSpec::new("mode", FieldKind::U8),
    FieldSpec::new("time", FieldKind::U64),
    FieldSpec::new("latitude", FieldKind::F32),
    FieldSpec::new("longitude", FieldKind::F32),
    FieldSpec::new("altitude", FieldKind::F32),
    FieldSpec::new("satellites_used", FieldKind::U8),
];
