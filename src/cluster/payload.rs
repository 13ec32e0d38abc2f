//! # Backend Payloads
//!
//! Wire formats of the two state endpoints every backend server exposes.
//!
//! Both documents are flat JSON objects: a couple of well-known top-level keys
//! plus one key per device id. The device entries are collected through
//! `#[serde(flatten)]`, so a device id can never shadow the top-level keys.
//!
//! ```text
//! GET /curstate.json   (cheap, polled every cycle)
//! {
//!   "latest_avg_cpu_usage": 0.31,
//!   "init_state_tag": "6f0c...",
//!   "rtlsdr": { "failed": false, "has_users": true, "number_of_connections": 2,
//!               "current_profile": { "profile_id": "2m", ... } }
//! }
//!
//! GET /initstate.json  (expensive, fetched when the tag changes)
//! {
//!   "init_state_tag": "6f0c...",
//!   "rtlsdr": { "name": "RTL-SDR", "type": "rtl_sdr", "priority": 100,
//!               "profiles": { "2m": { "center_freq": 145000000, "samp_rate": 2400000 } } }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::common::directory::ServerId;

/// Lightweight per-cycle state of one backend (`/curstate.json`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CurrentState {
    /// Rolling CPU usage average reported by the backend (0.0 - 1.0)
    pub latest_avg_cpu_usage: f64,
    /// Generation of the backend's device/profile enumeration
    pub init_state_tag: String,
    #[serde(flatten)]
    pub devices: BTreeMap<String, DeviceCurrentState>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeviceCurrentState {
    pub failed: bool,
    pub has_users: bool,
    pub number_of_connections: u32,
    pub current_profile: CurrentProfile,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CurrentProfile {
    pub profile_id: String,
}

/// Full device/profile enumeration of one backend (`/initstate.json`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InitialState {
    pub init_state_tag: String,
    #[serde(flatten)]
    pub devices: BTreeMap<String, DeviceInitialState>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeviceInitialState {
    pub name: String,
    /// Device driver type; backends omit it when it is not configured
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Any JSON number; fractional priorities are valid
    #[serde(default = "default_device_priority")]
    pub priority: f64,
    #[serde(default)]
    pub usage: UsageMode,
    pub profiles: BTreeMap<String, ProfileState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ProfileState {
    pub center_freq: f64,
    pub samp_rate: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageMode {
    #[default]
    Exclusive,
    #[serde(other)]
    Shared,
}

/// Result of one health request, tagged with the record revision it was
/// issued for so results for a replaced or removed server can be dropped.
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub server_id: ServerId,
    pub revision: u64,
    /// `None` when the request failed (timeout, refused, bad JSON)
    pub state: Option<CurrentState>,
}

impl HealthReport {
    pub fn responding(&self) -> bool {
        self.state.is_some()
    }
}

/// Result of one bootstrap request.
#[derive(Debug, Clone)]
pub struct BootstrapReport {
    pub server_id: ServerId,
    pub revision: u64,
    /// `None` when no initial response was received
    pub state: Option<InitialState>,
}

impl BootstrapReport {
    pub fn initial_response_received(&self) -> bool {
        self.state.is_some()
    }
}

fn default_enabled() -> bool {
    true
}

fn default_device_priority() -> f64 {
    100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_current_state() {
        let body = r#"{
            "latest_avg_cpu_usage": 0.42,
            "init_state_tag": "tag-1",
            "rtl": {
                "sdr_name": "RTL",
                "failed": false,
                "has_users": true,
                "number_of_connections": 3,
                "current_profile": {"profile_id": "2m", "center_freq": 145000000}
            },
            "airspy": {
                "failed": true,
                "has_users": false,
                "number_of_connections": 0,
                "current_profile": {"profile_id": "70cm"}
            }
        }"#;

        let state: CurrentState = serde_json::from_str(body).unwrap();

        assert_eq!(state.latest_avg_cpu_usage, 0.42);
        assert_eq!(state.init_state_tag, "tag-1");
        assert_eq!(state.devices.len(), 2);
        assert!(state.devices["rtl"].has_users);
        assert_eq!(state.devices["rtl"].number_of_connections, 3);
        assert_eq!(state.devices["rtl"].current_profile.profile_id, "2m");
        assert!(state.devices["airspy"].failed);
    }

    #[test]
    fn test_decode_initial_state_defaults() {
        let body = r#"{
            "init_state_tag": "tag-9",
            "rtl": {
                "name": "RTL",
                "profiles": {
                    "2m": {"center_freq": 145000000, "samp_rate": 2400000, "name": "2m band"}
                }
            },
            "hackrf": {
                "name": "HackRF",
                "type": "hackrf",
                "enabled": false,
                "priority": 40,
                "usage": "shared",
                "profiles": {}
            }
        }"#;

        let state: InitialState = serde_json::from_str(body).unwrap();

        let rtl = &state.devices["rtl"];
        assert_eq!(rtl.kind, None);
        assert!(rtl.enabled);
        assert_eq!(rtl.priority, 100.0);
        assert_eq!(rtl.usage, UsageMode::Exclusive);
        assert_eq!(rtl.profiles["2m"].samp_rate, 2_400_000.0);

        let hackrf = &state.devices["hackrf"];
        assert_eq!(hackrf.kind.as_deref(), Some("hackrf"));
        assert!(!hackrf.enabled);
        assert_eq!(hackrf.priority, 40.0);
        assert_eq!(hackrf.usage, UsageMode::Shared);
    }

    #[test]
    fn test_fractional_device_priority() {
        let body = r#"{
            "init_state_tag": "t",
            "rtl": {"name": "RTL", "priority": 50.5, "profiles": {}}
        }"#;

        let state: InitialState = serde_json::from_str(body).unwrap();
        assert_eq!(state.devices["rtl"].priority, 50.5);
    }

    #[test]
    fn test_missing_required_field_is_rejected() {
        // device entry without `number_of_connections`
        let body = r#"{
            "latest_avg_cpu_usage": 0.1,
            "init_state_tag": "t",
            "rtl": {"failed": false, "has_users": false, "current_profile": {"profile_id": "a"}}
        }"#;
        assert!(serde_json::from_str::<CurrentState>(body).is_err());

        let body = r#"{"rtl": {"name": "RTL", "profiles": {}}}"#;
        assert!(serde_json::from_str::<InitialState>(body).is_err());
    }
}
