use tracing::{debug, warn};

use crate::core::RecoveryConfig;

/// Leap second recovery watchdog.
///
/// ntpd running on a PPS source does not always slew back after a leap
/// second. Once a leap indicator of 1 or 2 is seen the daemon is granted
/// `max_steps` polling cycles; when the budget is spent and the offset is
/// still above the threshold the daemon must be restarted.
#[derive(Debug, Clone)]
pub struct LeapWatchdog {
    config: RecoveryConfig,
    steps: i32,
    active: bool,
}

impl LeapWatchdog {
    pub fn new(config: RecoveryConfig) -> Self {
        LeapWatchdog {
            steps: config.max_steps,
            active: false,
            config,
        }
    }

    /// Whether recovery mode is on
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Remaining cycles before a restart may be issued
    pub fn remaining(&self) -> i32 {
        self.steps
    }

    /// Records the leap indicator of the current cycle
    pub fn observe_leap(&mut self, leap: u8) {
        if leap == 1 || leap == 2 {
            if !self.active {
                warn!(leap, budget = self.config.max_steps, "Leap event, entering recovery mode");
            }
            self.steps = self.config.max_steps;
            self.active = true;
        }
    }

    /// Records the offset of the current cycle.
    ///
    /// Returns `true` when a corrective restart is due. The caller reports
    /// the completed action through [`LeapWatchdog::restart_issued`].
    pub fn observe_offset(&mut self, offset: f64) -> bool {
        if !self.active {
            return false;
        }

        self.steps -= 1;
        let high = offset > self.config.offset_threshold;
        if high && self.steps < 0 {
            return true;
        }

        if !high && self.config.clear_on_recovery {
            debug!(offset, "Offset recovered, leaving recovery mode");
            self.reset();
        }
        false
    }

    /// Resets the budget and leaves recovery mode after a corrective restart
    pub fn restart_issued(&mut self) {
        self.reset();
    }

    fn reset(&mut self) {
        self.steps = self.config.max_steps;
        self.active = false;
    }
}
