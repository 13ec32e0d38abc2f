//! # Cluster State Store
//!
//! The authoritative in-memory view of every backend server, its devices and
//! their profiles. The fleet poller is the only writer of health and device
//! fields; directory-change hooks create, replace and drop records. Readers
//! never touch the live map: they take a [`ClusterSnapshot`].
//!
//! ## Record lifecycle
//!
//! ```text
//!  directory add / reset        health: tag changed            bootstrap ok
//! ─────────────────────► placeholder ─────────────► stale ─────────────────► current
//!                        (responding=false,         (responding=true,        (initial_response
//!                         tag unknown)               initial_response         _received=true)
//!                                                    _received=false)             │
//!                                  ▲                                              │
//!                                  └──────────── health: tag changed ─────────────┘
//! ```
//!
//! Only *current* and responding servers are scorable. A failed health request
//! flips `responding` off but leaves the device map in place.

use log::{debug, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::backend::Endpoint;
use super::payload::{
    BootstrapReport, DeviceCurrentState, DeviceInitialState, HealthReport, UsageMode,
};
use crate::common::config::ServerEntry;
use crate::common::directory::ServerId;

/// Read-only facts about one tuning configuration of a device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProfileSnapshot {
    pub center_frequency: f64,
    pub sample_rate: f64,
}

impl ProfileSnapshot {
    /// Instantaneous band `[center - rate/2, center + rate/2]`.
    pub fn band(&self) -> (f64, f64) {
        let half = self.sample_rate / 2.0;
        (self.center_frequency - half, self.center_frequency + half)
    }

    /// True when `[low, high]` lies entirely inside this profile's band.
    pub fn covers(&self, low: f64, high: f64) -> bool {
        let (band_low, band_high) = self.band();
        band_low <= low && band_high >= high
    }
}

#[derive(Debug, Clone)]
pub struct DeviceRecord {
    pub name: String,
    pub kind: Option<String>,
    pub priority: f64,
    pub usage: UsageMode,
    pub enabled: bool,
    pub failed: bool,
    pub has_active_listeners: bool,
    pub active_connection_count: u32,
    /// Only meaningful while `has_active_listeners` is set
    pub current_profile_id: Option<String>,
    /// Shared with every snapshot; replaced, never mutated
    pub profiles: Arc<BTreeMap<String, ProfileSnapshot>>,
}

impl DeviceRecord {
    fn from_initial(state: &DeviceInitialState) -> Self {
        let profiles = state
            .profiles
            .iter()
            .map(|(id, p)| {
                (
                    id.clone(),
                    ProfileSnapshot {
                        center_frequency: p.center_freq,
                        sample_rate: p.samp_rate,
                    },
                )
            })
            .collect();

        Self {
            name: state.name.clone(),
            kind: state.kind.clone(),
            priority: state.priority,
            usage: state.usage,
            enabled: state.enabled,
            failed: false,
            has_active_listeners: false,
            active_connection_count: 0,
            current_profile_id: None,
            profiles: Arc::new(profiles),
        }
    }

    fn apply_current(&mut self, state: &DeviceCurrentState) {
        self.failed = state.failed;
        self.has_active_listeners = state.has_users;
        self.active_connection_count = state.number_of_connections;
        self.current_profile_id = if state.has_users {
            Some(state.current_profile.profile_id.clone())
        } else {
            None
        };
    }

    /// Enabled and not failed.
    pub fn available(&self) -> bool {
        self.enabled && !self.failed
    }
}

#[derive(Debug, Clone)]
pub struct ServerRecord {
    pub id: ServerId,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub priority: u32,
    /// Identity of this record; bumps whenever the server is (re)created
    pub revision: u64,
    pub responding: bool,
    pub cpu_load: Option<f64>,
    /// `None` until a bootstrap has been captured ("unknown")
    pub bootstrap_tag: Option<String>,
    pub initial_response_received: bool,
    pub devices: BTreeMap<String, DeviceRecord>,
}

impl ServerRecord {
    fn placeholder(id: &str, entry: &ServerEntry, revision: u64) -> Self {
        Self {
            id: id.to_string(),
            name: entry.name.clone(),
            address: entry.address.clone(),
            port: entry.port,
            priority: entry.priority,
            revision,
            responding: false,
            cpu_load: None,
            bootstrap_tag: None,
            initial_response_received: false,
            devices: BTreeMap::new(),
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            address: self.address.clone(),
            port: self.port,
        }
    }

    /// Device fields may be used for dispatch decisions.
    pub fn scorable(&self) -> bool {
        self.responding && self.initial_response_received
    }
}

/// One server the poller has to query in the current cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollTarget {
    pub server_id: ServerId,
    pub revision: u64,
    pub endpoint: Endpoint,
}

/// Row of the server overview.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerSummary {
    pub id: ServerId,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub priority: u32,
    pub responding: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_devices: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connections: Option<u32>,
}

/// Row of the device overview.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSummary {
    pub id: String,
    pub server_id: ServerId,
    pub server: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub priority: f64,
    pub profiles: usize,
    pub available: bool,
    pub connections: u32,
}

/// Point-in-time copy of the cluster.
#[derive(Debug, Clone, Default)]
pub struct ClusterSnapshot {
    pub servers: BTreeMap<ServerId, ServerRecord>,
}

impl ClusterSnapshot {
    pub fn server(&self, id: &str) -> Option<&ServerRecord> {
        self.servers.get(id)
    }

    pub fn server_summaries(&self) -> Vec<ServerSummary> {
        self.servers
            .values()
            .map(|server| {
                let mut summary = ServerSummary {
                    id: server.id.clone(),
                    name: server.name.clone(),
                    address: server.address.clone(),
                    port: server.port,
                    priority: server.priority,
                    responding: server.responding,
                    cpu: None,
                    active_devices: None,
                    connections: None,
                };

                if server.responding {
                    let active: Vec<&DeviceRecord> =
                        server.devices.values().filter(|d| d.available()).collect();
                    summary.cpu = server.cpu_load;
                    summary.active_devices = Some(active.len());
                    summary.connections =
                        Some(active.iter().map(|d| d.active_connection_count).sum());
                }

                summary
            })
            .collect()
    }

    pub fn device_summaries(&self) -> Vec<DeviceSummary> {
        self.servers
            .values()
            .filter(|server| server.responding)
            .flat_map(|server| {
                server.devices.iter().map(move |(id, device)| DeviceSummary {
                    id: id.clone(),
                    server_id: server.id.clone(),
                    server: server.name.clone(),
                    name: device.name.clone(),
                    kind: device.kind.clone(),
                    priority: device.priority,
                    profiles: device.profiles.len(),
                    available: device.available(),
                    connections: device.active_connection_count,
                })
            })
            .collect()
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    servers: BTreeMap<ServerId, ServerRecord>,
    next_revision: u64,
}

impl StoreInner {
    fn seed(&mut self, id: &str, entry: &ServerEntry) {
        self.next_revision += 1;
        let record = ServerRecord::placeholder(id, entry, self.next_revision);
        self.servers.insert(id.to_string(), record);
    }

    /// Record matching the revision a report was issued for.
    fn current_record(&mut self, id: &str, revision: u64) -> Option<&mut ServerRecord> {
        match self.servers.get_mut(id) {
            Some(record) if record.revision == revision => Some(record),
            _ => {
                debug!(
                    "Dropping result for server {} (revision {}): record removed or replaced",
                    id, revision
                );
                None
            }
        }
    }
}

/// Lock-protected cluster map. Every operation holds the single lock for its
/// whole duration; [`snapshot`](Self::snapshot) only for the copy.
#[derive(Debug, Default)]
pub struct ClusterStateStore {
    inner: Mutex<StoreInner>,
}

impl ClusterStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard everything and seed one unresponding placeholder per server.
    pub async fn reset_from_directory(&self, servers: &BTreeMap<ServerId, ServerEntry>) {
        let mut inner = self.inner.lock().await;
        inner.servers.clear();
        for (id, entry) in servers {
            inner.seed(id, entry);
        }
        debug!("Created initial state for {} server(s)", servers.len());
    }

    /// Apply the result of one `/initstate.json` request.
    pub async fn apply_bootstrap(&self, report: BootstrapReport) {
        let mut inner = self.inner.lock().await;
        let Some(record) = inner.current_record(&report.server_id, report.revision) else {
            return;
        };

        match report.state {
            Some(state) => {
                record.devices = state
                    .devices
                    .iter()
                    .map(|(id, device)| (id.clone(), DeviceRecord::from_initial(device)))
                    .collect();
                info!(
                    "📥 Server '{}' bootstrapped: {} device(s), tag {}",
                    record.name,
                    record.devices.len(),
                    state.init_state_tag
                );
                record.bootstrap_tag = Some(state.init_state_tag);
                record.initial_response_received = true;
            }
            None => {
                warn!(
                    "⚠️  Server '{}' did not deliver its initial state, keeping it out of dispatch",
                    record.name
                );
                record.responding = false;
                record.initial_response_received = false;
            }
        }
    }

    /// Apply one round of `/curstate.json` results.
    ///
    /// Returns the ids of servers whose bootstrap tag differs from the stored
    /// one; their devices stay untouched until a bootstrap is applied.
    pub async fn apply_health_update(&self, reports: Vec<HealthReport>) -> Vec<ServerId> {
        let mut inner = self.inner.lock().await;
        let mut needs_bootstrap = Vec::new();

        for report in reports {
            let Some(record) = inner.current_record(&report.server_id, report.revision) else {
                continue;
            };

            let Some(state) = report.state else {
                if record.responding {
                    info!("🔌 Server '{}' stopped responding", record.name);
                }
                record.responding = false;
                continue;
            };

            record.responding = true;
            record.cpu_load = Some(state.latest_avg_cpu_usage);

            if record.bootstrap_tag.as_deref() != Some(state.init_state_tag.as_str()) {
                debug!(
                    "Change in server '{}' init state ({:?} -> {})",
                    record.name, record.bootstrap_tag, state.init_state_tag
                );
                record.initial_response_received = false;
                needs_bootstrap.push(record.id.clone());
                continue;
            }

            for (device_id, device_state) in &state.devices {
                match record.devices.get_mut(device_id) {
                    Some(device) => device.apply_current(device_state),
                    None => warn!(
                        "⚠️  Server '{}' reported unknown device '{}' under an unchanged tag",
                        record.name, device_id
                    ),
                }
            }
        }

        if needs_bootstrap.is_empty() {
            debug!("Updated current state");
        }
        needs_bootstrap
    }

    pub async fn snapshot(&self) -> ClusterSnapshot {
        let inner = self.inner.lock().await;
        ClusterSnapshot {
            servers: inner.servers.clone(),
        }
    }

    /// Servers to query this cycle, with the revision each result must match.
    pub async fn poll_targets(&self) -> Vec<PollTarget> {
        let inner = self.inner.lock().await;
        inner
            .servers
            .values()
            .map(|record| PollTarget {
                server_id: record.id.clone(),
                revision: record.revision,
                endpoint: record.endpoint(),
            })
            .collect()
    }

    pub async fn add_server(&self, id: &str, entry: &ServerEntry) {
        self.inner.lock().await.seed(id, entry);
    }

    pub async fn remove_server(&self, id: &str) -> bool {
        self.inner.lock().await.servers.remove(id).is_some()
    }

    /// Remove + add: the server restarts as a placeholder and gets
    /// bootstrapped on the next cycle.
    pub async fn replace_server(&self, id: &str, entry: &ServerEntry) {
        let mut inner = self.inner.lock().await;
        inner.servers.remove(id);
        inner.seed(id, entry);
    }
}
