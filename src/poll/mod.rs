//! Generic polling loop
//!
//! Every data source is driven through the same state machine:
//!
//! 1. `init` connects to the source. Failure raises the shared fault and the
//!    task ends without polling.
//! 2. `poll` runs once per interval until the fault flag is raised. Fatal
//!    errors raise the flag; any other error costs only the current cycle.
//!
//! There is no pause state and failed pollers are never restarted.

pub mod fields;

pub use self::fields::{collect_writes, FieldKind, FieldSpec, Fields, Writes};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::core::{Result, SharedState};

/// A periodic data source publishing into the registry
pub trait Poller: Send + 'static {
    /// Name used in logs and fault reasons
    fn name(&self) -> &'static str;

    /// Minimum time between two cycles
    fn interval(&self) -> Duration;

    /// Connects to the source and builds per-source descriptors
    fn init(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Runs one query/parse/publish cycle
    fn poll(&mut self, shared: &SharedState) -> impl Future<Output = Result<()>> + Send;
}

/// Drives `poller` until the shared fault flag is raised
pub async fn run<P: Poller>(mut poller: P, shared: Arc<SharedState>) {
    let name = poller.name();

    if let Err(e) = poller.init().await {
        error!(poller = name, error = %e, "Initialization failed");
        shared.fault.raise(format!("{}: {}", name, e));
        return;
    }
    info!(poller = name, interval = ?poller.interval(), "Polling started");

    let mut ticker = tokio::time::interval(poller.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shared.fault.raised() => break,
        }
        if shared.fault.is_raised() {
            break;
        }

        match poller.poll(&shared).await {
            Ok(()) => debug!(poller = name, "Cycle complete"),
            Err(e) if e.is_fatal() => {
                error!(poller = name, error = %e, "Fatal polling error");
                shared.fault.raise(format!("{}: {}", name, e));
                break;
            }
            Err(e) => warn!(poller = name, error = %e, "Polling cycle skipped"),
        }
    }

    info!(poller = name, "Polling stopped");
}

/// Publishes one cycle's writes under a single registry lock
pub async fn publish(shared: &SharedState, writes: Option<Writes>) -> Result<()> {
    match writes {
        Some(writes) if !writes.is_empty() => shared.registry.write_many(&writes).await,
        _ => Ok(()),
    }
}
