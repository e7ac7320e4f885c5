use std::time::Duration;

use tracing::{debug, info, warn};

use crate::core::{Error, MissingFieldPolicy, NtpConfig, Result, SharedState};
use crate::poll::{collect_writes, publish, Fields, Poller};
use crate::registry::VarId;

use super::control::DaemonControl;
use super::ntpq::{selection_code, AssociationStatus, NtpQuery, SYSTEM_ASSOCIATION};
use super::watchdog::LeapWatchdog;
use super::{PEER_FIELDS, SYSTEM_FIELDS};

/// A candidate synchronization source tracked by the daemon
#[derive(Debug, Clone, PartialEq)]
pub struct Association {
    /// Association id assigned by the daemon
    pub id: u16,
    /// Peer selection code from the last query
    pub status: u8,
    /// Variables from the last query
    pub fields: Fields,
    /// Whether the last query succeeded
    pub fresh: bool,
}

impl From<AssociationStatus> for Association {
    fn from(entry: AssociationStatus) -> Self {
        Association {
            id: entry.id,
            status: selection_code(entry.status),
            fields: Fields::new(),
            fresh: false,
        }
    }
}

/// Picks the fresh association with the highest status.
///
/// On ties the association seen first wins.
pub fn select_association(associations: &[Association]) -> Option<usize> {
    let mut best: Option<(usize, u8)> = None;
    for (i, association) in associations.iter().enumerate() {
        if !association.fresh {
            continue;
        }
        if best.map_or(true, |(_, status)| association.status > status) {
            best = Some((i, association.status));
        }
    }
    best.map(|(i, _)| i)
}

/// Publishes the variables of the daemon's current sync source and
/// supervises leap second recovery
pub struct PeerPoller<Q, C> {
    client: Q,
    control: C,
    ids: Vec<VarId>,
    names: Vec<&'static str>,
    associations: Vec<Association>,
    watchdog: LeapWatchdog,
    service: String,
    policy: MissingFieldPolicy,
    interval: Duration,
}

impl<Q: NtpQuery, C: DaemonControl> PeerPoller<Q, C> {
    /// `ids` are the slots registered for [`PEER_FIELDS`], in order
    pub fn new(client: Q, control: C, ids: Vec<VarId>, config: &NtpConfig) -> Self {
        PeerPoller {
            client,
            control,
            ids,
            names: PEER_FIELDS.iter().map(|f| f.name).collect(),
            associations: Vec::new(),
            watchdog: LeapWatchdog::new(config.recovery.clone()),
            service: config.recovery.service.clone(),
            policy: config.missing_field,
            interval: config.peer_interval,
        }
    }

    /// Associations known to the poller
    pub fn associations(&self) -> &[Association] {
        &self.associations
    }

    /// Leap second watchdog state
    pub fn watchdog(&self) -> &LeapWatchdog {
        &self.watchdog
    }

    async fn load_associations(&mut self) -> Result<()> {
        let list = self.client.associations().await?;
        if list.is_empty() {
            return Err(Error::daemon("daemon reports no associations"));
        }
        info!(count = list.len(), "Associations loaded");
        self.associations = list.into_iter().map(Association::from).collect();
        Ok(())
    }

    async fn refresh(&mut self) {
        for association in &mut self.associations {
            match self.client.read_vars(association.id, &self.names).await {
                Ok(response) => {
                    association.status = selection_code(response.status);
                    association.fields = Fields::parse(&response.text);
                    association.fresh = true;
                }
                Err(e) => {
                    warn!(association = association.id, error = %e, "Peer query failed");
                    association.fresh = false;
                }
            }
        }
    }

    async fn supervise(&mut self, leap: Option<u8>, offset: Option<f64>) -> Result<()> {
        if let Some(leap) = leap {
            self.watchdog.observe_leap(leap);
        }
        let Some(offset) = offset else {
            return Ok(());
        };
        if !self.watchdog.observe_offset(offset) {
            return Ok(());
        }

        warn!(offset, service = %self.service, "Daemon did not recover from leap event");
        self.client.close();
        if let Err(e) = self.control.restart(&self.service).await {
            warn!(error = %e, "Corrective restart failed");
        }
        self.watchdog.restart_issued();

        self.client
            .connect()
            .await
            .map_err(|e| Error::fatal(format!("cannot reconnect after restart: {}", e)))?;

        // A restarted daemon numbers its associations afresh
        if let Err(e) = self.load_associations().await {
            warn!(error = %e, "Keeping previous association list");
        }
        Ok(())
    }
}

impl<Q: NtpQuery, C: DaemonControl> Poller for PeerPoller<Q, C> {
    fn name(&self) -> &'static str {
        "ntp-peer"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn init(&mut self) -> Result<()> {
        self.client.connect().await?;
        self.load_associations().await
    }

    async fn poll(&mut self, shared: &SharedState) -> Result<()> {
        self.refresh().await;

        let best = select_association(&self.associations)
            .ok_or_else(|| Error::daemon("no association answered"))?;
        let source = &self.associations[best];
        debug!(association = source.id, status = source.status, "Sync source selected");

        let writes = collect_writes("peer", &PEER_FIELDS, &self.ids, &source.fields, self.policy)?;
        let leap = source.fields.get("leap").and_then(|v| v.parse::<u8>().ok());
        let offset = source.fields.get("offset").and_then(|v| v.parse::<f64>().ok());

        publish(shared, writes).await?;
        self.supervise(leap, offset).await
    }
}

/// Publishes the daemon's system variables
pub struct SystemPoller<Q> {
    client: Q,
    ids: Vec<VarId>,
    names: Vec<&'static str>,
    policy: MissingFieldPolicy,
    interval: Duration,
}

impl<Q: NtpQuery> SystemPoller<Q> {
    /// `ids` are the slots registered for [`SYSTEM_FIELDS`], in order
    pub fn new(client: Q, ids: Vec<VarId>, config: &NtpConfig) -> Self {
        SystemPoller {
            client,
            ids,
            names: SYSTEM_FIELDS.iter().map(|f| f.name).collect(),
            policy: config.missing_field,
            interval: config.system_interval,
        }
    }
}

impl<Q: NtpQuery> Poller for SystemPoller<Q> {
    fn name(&self) -> &'static str {
        "ntp-system"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn init(&mut self) -> Result<()> {
        self.client.connect().await
    }

    async fn poll(&mut self, shared: &SharedState) -> Result<()> {
        let response = self.client.read_vars(SYSTEM_ASSOCIATION, &self.names).await?;
        let fields = Fields::parse(&response.text);
        let writes = collect_writes("system", &SYSTEM_FIELDS, &self.ids, &fields, self.policy)?;
        publish(shared, writes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RecoveryConfig;
    use crate::time::testing::{FakeControl, FakeNtp};
    use crate::util::{decode_f32, decode_fixed_str};
    use std::sync::Arc;

    fn assoc(id: u16, status: u8) -> Association {
        Association {
            id,
            status,
            fields: Fields::new(),
            fresh: true,
        }
    }

    fn peer_text(leap: u8, offset: f64, refid: &str) -> String {
        format!(
            "leap={}, stratum=1, refid={}, offset={}, jitter=0.002,\r\nprecision=-20, dstadr=10.0.0.5",
            leap, refid, offset
        )
    }

    async fn registry_with(count: usize, shared: &SharedState) -> Vec<VarId> {
        let mut ids = Vec::new();
        for spec in PEER_FIELDS.iter().chain(SYSTEM_FIELDS.iter()).take(count) {
            ids.push(shared.registry.register(spec.kind.size(), false).await.unwrap());
        }
        ids
    }

    #[test]
    fn test_select_first_of_tied_maximum() {
        let associations = vec![assoc(1, 2), assoc(2, 5), assoc(3, 5)];
        assert_eq!(select_association(&associations), Some(1));
    }

    #[test]
    fn test_select_skips_stale_associations() {
        let mut associations = vec![assoc(1, 6), assoc(2, 4)];
        associations[0].fresh = false;
        assert_eq!(select_association(&associations), Some(1));

        associations[1].fresh = false;
        assert_eq!(select_association(&associations), None);
    }

    #[tokio::test]
    async fn test_peer_poll_publishes_selected_source() {
        let shared = Arc::new(SharedState::new());
        let ids = registry_with(PEER_FIELDS.len(), &shared).await;

        let ntp = FakeNtp::new(&[(11, 0x9314), (12, 0x961a), (13, 0x961a)]);
        ntp.set_peer(11, 0x9314, &peer_text(0, 5.0, "GPS"));
        ntp.set_peer(12, 0x961a, &peer_text(0, 0.25, "PPS"));
        ntp.set_peer(13, 0x961a, &peer_text(0, 7.0, "NMEA"));

        let mut poller = PeerPoller::new(ntp.clone(), FakeControl::default(), ids.clone(), &NtpConfig::default());
        poller.init().await.unwrap();
        poller.poll(&shared).await.unwrap();

        let registry = &shared.registry;
        assert_eq!(registry.read(ids[0]).await.unwrap(), vec![0]);
        assert_eq!(registry.read(ids[1]).await.unwrap(), vec![1]);
        assert_eq!(decode_fixed_str(&registry.read(ids[2]).await.unwrap()), "PPS");
        assert_eq!(decode_f32(&registry.read(ids[3]).await.unwrap()), Some(0.25));
        let precision = decode_f32(&registry.read(ids[5]).await.unwrap()).unwrap();
        assert!((precision - 2f32.powi(-20)).abs() < 1e-12);
        assert_eq!(decode_fixed_str(&registry.read(ids[6]).await.unwrap()), "10.0.0.5");
    }

    #[tokio::test]
    async fn test_init_fails_without_associations() {
        let ntp = FakeNtp::new(&[]);
        let mut poller = PeerPoller::new(ntp, FakeControl::default(), Vec::new(), &NtpConfig::default());
        assert!(poller.init().await.is_err());
    }

    #[tokio::test]
    async fn test_leap_event_triggers_single_restart() {
        let shared = Arc::new(SharedState::new());
        let ids = registry_with(PEER_FIELDS.len(), &shared).await;

        let ntp = FakeNtp::new(&[(21, 0x961a)]);
        let control = FakeControl::default();
        let config = NtpConfig {
            recovery: RecoveryConfig {
                max_steps: 2,
                ..RecoveryConfig::default()
            },
            ..NtpConfig::default()
        };
        let mut poller = PeerPoller::new(ntp.clone(), control.clone(), ids, &config);
        poller.init().await.unwrap();

        ntp.set_peer(21, 0x961a, &peer_text(1, 40.0, "PPS"));
        poller.poll(&shared).await.unwrap();
        assert!(poller.watchdog().is_active());

        ntp.set_peer(21, 0x961a, &peer_text(0, 40.0, "PPS"));
        for _ in 0..6 {
            poller.poll(&shared).await.unwrap();
        }

        assert_eq!(control.restarts(), vec!["ntpd".to_string()]);
        assert_eq!(ntp.connects(), 2);
        assert!(!poller.watchdog().is_active());
    }

    #[tokio::test]
    async fn test_recovered_offset_avoids_restart() {
        let shared = Arc::new(SharedState::new());
        let ids = registry_with(PEER_FIELDS.len(), &shared).await;

        let ntp = FakeNtp::new(&[(21, 0x961a)]);
        let control = FakeControl::default();
        let config = NtpConfig {
            recovery: RecoveryConfig {
                max_steps: 2,
                ..RecoveryConfig::default()
            },
            ..NtpConfig::default()
        };
        let mut poller = PeerPoller::new(ntp.clone(), control.clone(), ids, &config);
        poller.init().await.unwrap();

        ntp.set_peer(21, 0x961a, &peer_text(1, 40.0, "PPS"));
        poller.poll(&shared).await.unwrap();
        ntp.set_peer(21, 0x961a, &peer_text(0, 3.0, "PPS"));
        for _ in 0..6 {
            poller.poll(&shared).await.unwrap();
        }

        assert!(control.restarts().is_empty());
        assert_eq!(ntp.connects(), 1);
    }

    #[tokio::test]
    async fn test_failed_reconnect_is_fatal() {
        let shared = Arc::new(SharedState::new());
        let ids = registry_with(PEER_FIELDS.len(), &shared).await;

        let ntp = FakeNtp::new(&[(21, 0x961a)]);
        let config = NtpConfig {
            recovery: RecoveryConfig {
                max_steps: 0,
                ..RecoveryConfig::default()
            },
            ..NtpConfig::default()
        };
        let mut poller = PeerPoller::new(ntp.clone(), FakeControl::default(), ids, &config);
        poller.init().await.unwrap();

        ntp.set_peer(21, 0x961a, &peer_text(2, 40.0, "PPS"));
        ntp.fail_connects(true);
        let err = poller.poll(&shared).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_system_poll_publishes_variables() {
        let shared = Arc::new(SharedState::new());
        let ids = registry_with(PEER_FIELDS.len() + SYSTEM_FIELDS.len(), &shared).await;
        let system_ids = ids[PEER_FIELDS.len()..].to_vec();

        let ntp = FakeNtp::new(&[]);
        ntp.set_system(
            "version=\"ntpd 4.2.8p15@1.3728-o Wed Sep 23 11:46:38 UTC 2020 (1)\", frequency=-12.345,\r\nsys_jitter=0.001, clk_wander=0.003, clk_jitter=0.004",
        );

        let mut poller = SystemPoller::new(ntp, system_ids.clone(), &NtpConfig::default());
        poller.init().await.unwrap();
        poller.poll(&shared).await.unwrap();

        let registry = &shared.registry;
        assert_eq!(decode_fixed_str(&registry.read(system_ids[0]).await.unwrap()), "4.2.8p15");
        assert_eq!(decode_f32(&registry.read(system_ids[1]).await.unwrap()), Some(-12.345));
        assert_eq!(decode_f32(&registry.read(system_ids[4]).await.unwrap()), Some(0.004));
    }
}
