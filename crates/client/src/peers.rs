//! Peer position history and report compilation.

use fieldlink_cot::UNKNOWN_HAE;
use std::collections::HashMap;
use std::sync::Mutex;

/// Uids the infrastructure itself emits presence-shaped events under.
/// These never describe a real peer and are excluded from reports.
const SYSTEM_UID_PREFIX: &str = "GeoChat.";
const SYSTEM_UIDS: &[&str] = &["takPong"];

pub fn is_system_uid(uid: &str) -> bool {
    uid.starts_with(SYSTEM_UID_PREFIX) || SYSTEM_UIDS.contains(&uid)
}

/// One observed position sample for a peer.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerSample {
    pub callsign: Option<String>,
    /// Event time as carried on the wire.
    pub time: String,
    pub lat: f64,
    pub lon: f64,
    pub hae: f64,
}

impl PeerSample {
    /// True when the sample carries no usable fix. Unfixed samples are
    /// still recorded; filtering happens at report time so a later good
    /// fix is never blocked by an earlier bad one.
    pub fn is_sentinel(&self) -> bool {
        (self.lat == 0.0 && self.lon == 0.0) || self.hae == 0.0 || self.hae == UNKNOWN_HAE
    }
}

/// Append-only history of peer positions, keyed by unit uid.
#[derive(Debug, Default)]
pub struct PeerTable {
    inner: Mutex<HashMap<String, Vec<PeerSample>>>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one sample for `uid`. An `expired` event (stale time
    /// already in the past) is ignored for a peer we already track, but
    /// still establishes a previously unseen peer.
    ///
    /// Returns whether the sample was recorded.
    pub fn record(&self, uid: &str, sample: PeerSample, expired: bool) -> bool {
        if is_system_uid(uid) {
            return false;
        }
        let mut inner = self.inner.lock().unwrap();
        let known = inner.contains_key(uid);
        if expired && known {
            return false;
        }
        inner.entry(uid.to_string()).or_default().push(sample);
        true
    }

    /// Number of peers with at least one recorded sample.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Human-readable summary of the latest usable position per peer.
    /// Peers whose newest sample is a sentinel are omitted entirely.
    pub fn compile_report(&self) -> String {
        let inner = self.inner.lock().unwrap();
        let mut lines: Vec<String> = Vec::new();
        for (uid, samples) in inner.iter() {
            let Some(latest) = samples.last() else {
                continue;
            };
            if latest.is_sentinel() {
                continue;
            }
            let name = latest.callsign.as_deref().unwrap_or(uid);
            lines.push(format!(
                "{} @ {}: lat={:.6}, lon={:.6}, hae={}",
                name, latest.time, latest.lat, latest.lon, latest.hae
            ));
        }
        if lines.is_empty() {
            return "[POSITION] no positions recorded yet.".to_string();
        }
        // Map order is arbitrary; sort for a stable report.
        lines.sort();
        lines.join("\n")
    }
}
