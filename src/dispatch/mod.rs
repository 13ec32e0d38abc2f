//! # Dispatch Decision Engine
//!
//! Picks the backend device a new listener should be sent to.
//!
//! [`decide`] is a pure function over a [`ClusterSnapshot`]; it never touches
//! the live store, so a decision can never observe a half-applied update.
//!
//! ## Scoring
//!
//! ```text
//! server_score = server.priority
//!              - 20            if 0.5 < cpu <= 0.8
//!              (excluded)      if cpu > 0.8
//!
//! score        = server_score + device.priority
//!              + 10            if the device is busy and reused on its
//!                              current profile
//! ```
//!
//! A busy device is only ever offered on the profile it is currently tuned
//! to; idle devices offer every profile whose band covers the request.

use log::{debug, log_enabled, Level};
use std::cmp::Ordering;

use crate::cluster::state::{ClusterSnapshot, DeviceRecord, ServerRecord};
use crate::common::config::ListenerProfile;

/// CPU load above which a server loses [`CPU_PENALTY`] points.
pub const CPU_PENALTY_THRESHOLD: f64 = 0.5;
/// CPU load above which a server takes no new listeners at all.
pub const CPU_EXCLUSION_THRESHOLD: f64 = 0.8;
pub const CPU_PENALTY: f64 = 20.0;
/// Bonus for sharing an already running device instead of waking another one.
pub const BUSY_REUSE_BONUS: f64 = 10.0;

/// One `(server, device, profile)` combination able to serve the request.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub server_id: String,
    pub server_name: String,
    pub device_id: String,
    pub device_name: String,
    pub profile_id: String,
    pub center_frequency: f64,
    pub sample_rate: f64,
    pub score: f64,
}

impl Candidate {
    /// The comparator used both for ranking and for selection.
    ///
    /// `Greater` means `self` is the better choice:
    /// 1. higher score
    /// 2. lower sample rate (narrower profile)
    /// 3. lower server id, device id, profile id
    pub fn preference(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.sample_rate.total_cmp(&self.sample_rate))
            .then_with(|| other.server_id.cmp(&self.server_id))
            .then_with(|| other.device_id.cmp(&self.device_id))
            .then_with(|| other.profile_id.cmp(&self.profile_id))
    }
}

/// Where a listener should be sent.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub server_id: String,
    pub device_id: String,
    pub profile_id: String,
    pub score: f64,
    pub address: String,
    pub port: u16,
}

impl Decision {
    /// `address:port` of the chosen backend.
    pub fn target(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// Server score after the load penalty, or `None` if the server may not take
/// new listeners right now.
pub fn server_score(server: &ServerRecord) -> Option<f64> {
    if server.priority == 0 || !server.scorable() {
        return None;
    }

    let cpu = server.cpu_load.unwrap_or(0.0);
    if cpu > CPU_EXCLUSION_THRESHOLD {
        return None;
    }

    let mut score = f64::from(server.priority);
    if cpu > CPU_PENALTY_THRESHOLD {
        score -= CPU_PENALTY;
    }
    Some(score)
}

/// Every candidate of one device for the requested `[low, high]` band.
fn device_candidates(
    server: &ServerRecord,
    server_score: f64,
    device_id: &str,
    device: &DeviceRecord,
    low: f64,
    high: f64,
) -> Vec<Candidate> {
    let candidate = |profile_id: &str, center: f64, rate: f64, score: f64| Candidate {
        server_id: server.id.clone(),
        server_name: server.name.clone(),
        device_id: device_id.to_string(),
        device_name: device.name.clone(),
        profile_id: profile_id.to_string(),
        center_frequency: center,
        sample_rate: rate,
        score,
    };

    let base = server_score + device.priority;

    if device.has_active_listeners {
        // busy devices are never retuned
        let Some(profile_id) = device.current_profile_id.as_deref() else {
            return Vec::new();
        };
        return match device.profiles.get(profile_id) {
            Some(profile) if profile.covers(low, high) => vec![candidate(
                profile_id,
                profile.center_frequency,
                profile.sample_rate,
                base + BUSY_REUSE_BONUS,
            )],
            _ => Vec::new(),
        };
    }

    device
        .profiles
        .iter()
        .filter(|(_, profile)| profile.covers(low, high))
        .map(|(id, profile)| {
            candidate(id.as_str(), profile.center_frequency, profile.sample_rate, base)
        })
        .collect()
}

/// Collect every candidate able to serve `profile`, skipping `excluded` device ids.
pub fn candidates(
    snapshot: &ClusterSnapshot,
    profile: &ListenerProfile,
    excluded: &[String],
) -> Vec<Candidate> {
    let (low, high) = (profile.start_freq, profile.end_freq);
    let mut found = Vec::new();

    for server in snapshot.servers.values() {
        let Some(server_score) = server_score(server) else {
            continue;
        };

        for (device_id, device) in &server.devices {
            if !device.available() || excluded.iter().any(|id| id == device_id) {
                continue;
            }
            found.extend(device_candidates(
                server,
                server_score,
                device_id,
                device,
                low,
                high,
            ));
        }
    }

    found
}

/// Candidates best first, for display.
pub fn rank(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.preference(a));
    candidates
}

/// Pick the best device for `profile`, or `None` if nothing can serve it.
///
/// An unknown (`None`) or inverted profile never matches.
pub fn decide(
    snapshot: &ClusterSnapshot,
    profile: Option<&ListenerProfile>,
    excluded: &[String],
) -> Option<Decision> {
    let Some(profile) = profile.filter(|p| p.is_valid()) else {
        debug!("No decision: unknown or invalid listener profile");
        return None;
    };

    let found = candidates(snapshot, profile, excluded);

    if log_enabled!(Level::Debug) {
        for c in rank(found.clone()) {
            debug!(
                "  {} / {} @ {:.0} Hz: score {:.1}, sample rate {:.0}",
                c.server_name, c.device_name, c.center_frequency, c.score, c.sample_rate
            );
        }
    }

    let Some(best) = found.into_iter().max_by(|a, b| a.preference(b)) else {
        debug!("No decision for profile '{}'", profile.name);
        return None;
    };

    let server = snapshot.server(&best.server_id)?;
    Some(Decision {
        address: server.address.clone(),
        port: server.port,
        server_id: best.server_id,
        device_id: best.device_id,
        profile_id: best.profile_id,
        score: best.score,
    })
}
