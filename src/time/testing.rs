//! In-memory daemons for poller tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::core::{Error, Result};
use crate::poll::Fields;

use super::control::DaemonControl;
use super::gps::GpsQuery;
use super::ntpq::{AssociationStatus, NtpQuery, VarResponse};

#[derive(Default)]
struct NtpState {
    associations: Vec<AssociationStatus>,
    peers: HashMap<u16, VarResponse>,
    system: String,
}

/// Scriptable NTP daemon; clones share state
#[derive(Clone, Default)]
pub struct FakeNtp {
    state: Arc<Mutex<NtpState>>,
    connects: Arc<AtomicUsize>,
    fail_connects: Arc<AtomicBool>,
}

impl FakeNtp {
    pub fn new(associations: &[(u16, u16)]) -> Self {
        let fake = FakeNtp::default();
        fake.state.lock().unwrap().associations = associations
            .iter()
            .map(|&(id, status)| AssociationStatus { id, status })
            .collect();
        fake
    }

    pub fn set_peer(&self, id: u16, status: u16, text: &str) {
        self.state.lock().unwrap().peers.insert(
            id,
            VarResponse {
                status,
                text: text.to_string(),
            },
        );
    }

    pub fn set_system(&self, text: &str) {
        self.state.lock().unwrap().system = text.to_string();
    }

    pub fn fail_connects(&self, fail: bool) {
        self.fail_connects.store(fail, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl NtpQuery for FakeNtp {
    async fn connect(&mut self) -> Result<()> {
        if self.fail_connects.load(Ordering::SeqCst) {
            return Err(Error::daemon("connection refused"));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) {}

    async fn associations(&mut self) -> Result<Vec<AssociationStatus>> {
        Ok(self.state.lock().unwrap().associations.clone())
    }

    async fn read_vars(&mut self, association: u16, _names: &[&'static str]) -> Result<VarResponse> {
        let state = self.state.lock().unwrap();
        if association == 0 {
            return Ok(VarResponse {
                status: 0,
                text: state.system.clone(),
            });
        }
        state
            .peers
            .get(&association)
            .cloned()
            .ok_or_else(|| Error::daemon(format!("unknown association {}", association)))
    }
}

/// Records restart requests
#[derive(Clone, Default)]
pub struct FakeControl {
    restarts: Arc<Mutex<Vec<String>>>,
}

impl FakeControl {
    pub fn restarts(&self) -> Vec<String> {
        self.restarts.lock().unwrap().clone()
    }
}

impl DaemonControl for FakeControl {
    async fn restart(&mut self, service: &str) -> Result<()> {
        self.restarts.lock().unwrap().push(service.to_string());
        Ok(())
    }
}

/// Scriptable gpsd; clones share state
#[derive(Clone, Default)]
pub struct FakeGps {
    report: Arc<Mutex<Option<Fields>>>,
}

impl FakeGps {
    pub fn set_report(&self, fields: Option<Fields>) {
        *self.report.lock().unwrap() = fields;
    }
}

impl GpsQuery for FakeGps {
    async fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    async fn poll(&mut self) -> Result<Fields> {
        self.report
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::daemon("no fix report"))
    }
}
