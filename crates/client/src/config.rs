//! Configuration for a FieldLink unit.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub identity: IdentityConfig,
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub multicast: Option<MulticastConfig>,
    #[serde(default)]
    pub presence: PresenceConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Who this unit is on the network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Stable unit identifier, e.g. `FIELDLINK-0007`.
    pub uid: String,
    /// Human-facing callsign shown to operators.
    pub callsign: String,
    pub team: String,
    pub role: String,
    /// Group chatroom this unit broadcasts into.
    #[serde(default = "default_chatroom")]
    pub chatroom: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Candidate endpoints, tried in order (see [`ConnectionConfig::ordered_profiles`]).
    pub profiles: Vec<TransportProfile>,
    /// Bound on a single connect attempt.
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
    /// Bound on one whole connect cycle across all attempts.
    #[serde(default = "default_overall_deadline_secs")]
    pub overall_deadline_secs: u64,
    /// Base delay between failed attempts; grows with the attempt count.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: f64,
    #[serde(default = "default_max_retry_delay_secs")]
    pub max_retry_delay_secs: f64,
    /// How often the health monitor checks for a lost transport.
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,
}

/// One server endpoint a unit may connect to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportProfile {
    pub name: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

/// Mutual-TLS material for one profile. Interpreted by the connector;
/// the session layer never opens these paths itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    pub client_cert: PathBuf,
    pub client_key: PathBuf,
    pub ca_bundle: PathBuf,
    #[serde(default = "default_true")]
    pub verify_peer: bool,
}

/// Local-segment datagram channel for the same event traffic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MulticastConfig {
    pub group: Ipv4Addr,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// Period of the steady presence beacon.
    #[serde(default = "default_presence_period_secs")]
    pub period_secs: u64,
    /// Minimum spacing between on-demand presence sends.
    #[serde(default = "default_min_direct_interval_ms")]
    pub min_direct_interval_ms: u64,
    /// How long a published presence event stays fresh for consumers.
    #[serde(default = "default_presence_stale_secs")]
    pub stale_secs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Capacity of the bounded outbound queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TelemetryConfig {
    /// CSV snapshot file written by the platform side. When unset the
    /// unit reports without a position fix.
    #[serde(default)]
    pub csv_path: Option<PathBuf>,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn default_config() -> Self {
        Self {
            identity: IdentityConfig {
                uid: "FIELDLINK-0001".to_string(),
                callsign: "VEHICLE-1".to_string(),
                team: "Blue".to_string(),
                role: "Team Member".to_string(),
                chatroom: default_chatroom(),
            },
            connection: ConnectionConfig {
                profiles: vec![TransportProfile {
                    name: "primary".to_string(),
                    host: "127.0.0.1".to_string(),
                    port: 8089,
                    tls: None,
                }],
                attempt_timeout_secs: default_attempt_timeout_secs(),
                overall_deadline_secs: default_overall_deadline_secs(),
                retry_delay_secs: default_retry_delay_secs(),
                max_retry_delay_secs: default_max_retry_delay_secs(),
                monitor_interval_secs: default_monitor_interval_secs(),
            },
            multicast: None,
            presence: PresenceConfig::default(),
            dispatch: DispatchConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl ConnectionConfig {
    /// Profiles in the order this unit should try them. The order is
    /// rotated by a digest of the unit id so a fleet sharing one config
    /// file spreads its initial load across endpoints.
    pub fn ordered_profiles(&self, uid: &str) -> Vec<TransportProfile> {
        let mut profiles = self.profiles.clone();
        let n = profiles.len();
        if n > 1 {
            let digest: usize = uid.bytes().map(usize::from).sum();
            profiles.rotate_left(digest % n);
        }
        profiles
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    pub fn overall_deadline(&self) -> Duration {
        Duration::from_secs(self.overall_deadline_secs)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }

    /// Delay before the next attempt. Grows slowly with the number of
    /// attempts already made and is capped at the configured maximum.
    pub fn retry_delay(&self, attempts: u32) -> Duration {
        let scaled = self.retry_delay_secs * (1.0 + f64::from(attempts) / 10.0);
        Duration::from_secs_f64(scaled.min(self.max_retry_delay_secs))
    }
}

impl PresenceConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }

    pub fn min_direct_interval(&self) -> Duration {
        Duration::from_millis(self.min_direct_interval_ms)
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            period_secs: default_presence_period_secs(),
            min_direct_interval_ms: default_min_direct_interval_ms(),
            stale_secs: default_presence_stale_secs(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_chatroom() -> String {
    "All Chat Rooms".to_string()
}

fn default_attempt_timeout_secs() -> u64 {
    20
}

fn default_overall_deadline_secs() -> u64 {
    300
}

fn default_retry_delay_secs() -> f64 {
    3.0
}

fn default_max_retry_delay_secs() -> f64 {
    10.0
}

fn default_monitor_interval_secs() -> u64 {
    15
}

fn default_presence_period_secs() -> u64 {
    5
}

fn default_min_direct_interval_ms() -> u64 {
    500
}

fn default_presence_stale_secs() -> i64 {
    75
}

fn default_queue_capacity() -> usize {
    64
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
            [identity]
            uid = "FIELDLINK-0042"
            callsign = "RAVEN-2"
            team = "Cyan"
            role = "Team Lead"

            [connection]
            profiles = [
                { name = "primary", host = "tak.example.net", port = 8089 },
                { name = "fallback", host = "10.0.0.5", port = 8087 },
            ]
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.identity.chatroom, "All Chat Rooms");
        assert_eq!(config.connection.profiles.len(), 2);
        assert_eq!(config.connection.overall_deadline_secs, 300);
        assert_eq!(config.presence.period_secs, 5);
        assert_eq!(config.dispatch.queue_capacity, 64);
        assert!(config.multicast.is_none());
    }

    #[test]
    fn test_ordered_profiles_rotates_per_unit() {
        let mut cfg = Config::default_config().connection;
        cfg.profiles = vec![
            TransportProfile {
                name: "a".into(),
                host: "a".into(),
                port: 1,
                tls: None,
            },
            TransportProfile {
                name: "b".into(),
                host: "b".into(),
                port: 2,
                tls: None,
            },
        ];
        let even = cfg.ordered_profiles("AA"); // digest 130, even
        let odd = cfg.ordered_profiles("AB"); // digest 131, odd
        assert_eq!(even[0].name, "a");
        assert_eq!(odd[0].name, "b");
        // Every profile survives the permutation.
        assert_eq!(odd.len(), 2);
    }

    #[test]
    fn test_retry_delay_grows_and_caps() {
        let cfg = Config::default_config().connection;
        assert_eq!(cfg.retry_delay(0), Duration::from_secs_f64(3.0));
        assert_eq!(cfg.retry_delay(10), Duration::from_secs_f64(6.0));
        assert_eq!(cfg.retry_delay(100), Duration::from_secs_f64(10.0));
    }
}
