use std::time::Duration;

use chrono::Utc;

use crate::core::{Error, Result, SharedState};
use crate::poll::Poller;
use crate::registry::VarId;

/// Publishes the host's wall clock as seconds since the Unix epoch
pub struct ClockPoller {
    id: VarId,
    interval: Duration,
}

impl ClockPoller {
    pub fn new(id: VarId, interval: Duration) -> Self {
        ClockPoller { id, interval }
    }
}

impl Poller for ClockPoller {
    fn name(&self) -> &'static str {
        "host-clock"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn init(&mut self) -> Result<()> {
        Ok(())
    }

    async fn poll(&mut self, shared: &SharedState) -> Result<()> {
        let now = Utc::now().timestamp();
        let secs = u64::try_from(now)
            .map_err(|_| Error::parse(format!("host clock before epoch ({})", now)))?;
        shared.registry.write(self.id, &secs.to_le_bytes()).await
    }
}
