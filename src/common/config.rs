//! # Configuration Utilities
//!
//! Configuration structures and parsing for the balancer: where to listen,
//! how the fleet poller is paced, and the seed list of backend servers and
//! listener profiles.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::time::Duration;

/// Load a TOML configuration file and deserialize it into the specified type.
///
/// # Arguments
/// - `path`: Path to the TOML configuration file
///
/// # Returns
/// - `Ok(T)`: Successfully loaded and parsed configuration
/// - `Err`: File I/O or parsing error
///
/// # Example
/// ```ignore
/// let config: BalancerConfig = load_config("config/balancer.toml")?;
/// ```
pub fn load_config<T>(path: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let content = fs::read_to_string(path)?;
    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Complete balancer configuration loaded from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BalancerConfig {
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    /// Backend servers keyed by their directory id
    #[serde(default)]
    pub servers: BTreeMap<String, ServerEntry>,
    /// Listener profiles keyed by their directory id
    #[serde(default)]
    pub profiles: BTreeMap<String, ListenerProfile>,
}

impl BalancerConfig {
    /// Load the balancer configuration from a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        load_config(path)
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    /// Socket address the JSON API binds to (e.g., "0.0.0.0:8080")
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// Fleet poller timing.
///
/// Controls how often backends are polled and how long each request may take.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Idle time between two scheduled cycles (seconds)
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Timeout of one `/curstate.json` request (milliseconds)
    #[serde(default = "default_health_timeout_ms")]
    pub health_timeout_ms: u64,
    /// Timeout of one `/initstate.json` request (milliseconds)
    #[serde(default = "default_bootstrap_timeout_ms")]
    pub bootstrap_timeout_ms: u64,
    /// How many bootstrap + recheck rounds a single cycle may run
    #[serde(default = "default_max_bootstrap_rounds")]
    pub max_bootstrap_rounds: u32,
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }

    pub fn bootstrap_timeout(&self) -> Duration {
        Duration::from_millis(self.bootstrap_timeout_ms)
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            health_timeout_ms: default_health_timeout_ms(),
            bootstrap_timeout_ms: default_bootstrap_timeout_ms(),
            max_bootstrap_rounds: default_max_bootstrap_rounds(),
        }
    }
}

/// Directory entry of one backend SDR receiver server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerEntry {
    /// Human readable server name
    pub name: String,
    /// Host name or IP address of the backend
    pub address: String,
    /// HTTP port of the backend
    pub port: u16,
    /// Load balancing priority (0 disables the server, default 100)
    #[serde(default = "default_priority")]
    pub priority: u32,
}

/// A named frequency range a listener wishes to receive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenerProfile {
    pub name: String,
    /// Lower edge of the requested range (Hz)
    pub start_freq: f64,
    /// Upper edge of the requested range (Hz)
    pub end_freq: f64,
}

impl ListenerProfile {
    /// `start_freq < end_freq`; anything else never matches a device.
    pub fn is_valid(&self) -> bool {
        self.start_freq < self.end_freq
    }
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_interval_secs() -> u64 {
    30
}

fn default_health_timeout_ms() -> u64 {
    1000
}

fn default_bootstrap_timeout_ms() -> u64 {
    2000
}

fn default_max_bootstrap_rounds() -> u32 {
    3
}

fn default_priority() -> u32 {
    100
}
