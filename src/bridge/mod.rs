//! Orchestration
//!
//! Startup order: register every variable, seal the registry, then spawn one
//! task per poller plus the protocol server. All tasks share one
//! [`SharedState`]. The bridge returns once every task has stopped, which
//! only happens after the fault flag is raised.

pub mod catalogue;

pub use self::catalogue::Catalogue;

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::core::{Config, Error, Result, SharedState};
use crate::network;
use crate::poll;
use crate::time::{
    ClockPoller, DaemonControl, GpsPoller, GpsQuery, GpsdClient, NtpQuery, NtpqClient, PeerPoller,
    Systemctl, SystemPoller,
};

/// External daemons the pollers talk to
pub struct Sources<Q, G, C> {
    /// NTP client used by the peer poller
    pub peer: Q,
    /// NTP client used by the system poller
    pub system: Q,
    pub gps: G,
    pub control: C,
}

impl Sources<NtpqClient, GpsdClient, Systemctl> {
    /// Network clients for the configured daemon addresses
    pub fn from_config(config: &Config) -> Self {
        Sources {
            peer: NtpqClient::new(config.ntp.address.clone(), config.ntp.request_timeout),
            system: NtpqClient::new(config.ntp.address.clone(), config.ntp.request_timeout),
            gps: GpsdClient::new(config.gps.address.clone(), config.gps.request_timeout),
            control: Systemctl,
        }
    }
}

/// Owns the configuration and the state shared by all tasks
pub struct Bridge {
    config: Config,
    shared: Arc<SharedState>,
}

impl Bridge {
    pub fn new(config: Config) -> Self {
        Bridge {
            config,
            shared: Arc::new(SharedState::new()),
        }
    }

    /// State shared with the tasks, usable to stop the bridge from outside
    pub fn shared(&self) -> Arc<SharedState> {
        self.shared.clone()
    }

    /// Runs until the fault flag is raised, returning the recorded reason
    pub async fn run<Q, G, C>(self, sources: Sources<Q, G, C>) -> Result<()>
    where
        Q: NtpQuery,
        G: GpsQuery,
        C: DaemonControl,
    {
        let Bridge { config, shared } = self;

        let catalogue = Catalogue::register(&shared.registry).await?;
        shared.registry.seal().await;
        for (id, name) in catalogue.names() {
            debug!(id = id.raw(), name, "Variable registered");
        }
        info!(variables = catalogue.len(), "Variable table sealed");

        let mut tasks = JoinSet::new();
        tasks.spawn(poll::run(
            PeerPoller::new(sources.peer, sources.control, catalogue.peer.clone(), &config.ntp),
            shared.clone(),
        ));
        tasks.spawn(poll::run(
            SystemPoller::new(sources.system, catalogue.system.clone(), &config.ntp),
            shared.clone(),
        ));
        tasks.spawn(poll::run(
            ClockPoller::new(catalogue.clock, config.clock.interval),
            shared.clone(),
        ));
        if config.gps.enabled {
            tasks.spawn(poll::run(
                GpsPoller::new(sources.gps, catalogue.gps.clone(), &config.gps),
                shared.clone(),
            ));
        } else {
            info!("GPS polling disabled, its variables stay zero");
        }
        tasks.spawn(network::run(config.server.clone(), shared.clone()));

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Task aborted");
                shared.fault.raise(format!("task aborted: {}", e));
            }
        }

        match shared.fault.reason() {
            Some(reason) => Err(Error::fatal(reason)),
            None => Ok(()),
        }
    }
}
