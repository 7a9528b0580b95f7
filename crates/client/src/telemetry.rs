//! Platform telemetry sources feeding the presence publisher.

use std::path::PathBuf;
use tracing::warn;

/// One platform status sample. Zeroed fields mean "unknown"; consumers
/// apply the wire sentinel rules when encoding.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StatusSnapshot {
    pub lat: f64,
    pub lon: f64,
    /// Height above ellipsoid, metres.
    pub hae: f64,
    /// Remaining battery, percent.
    pub battery: u32,
    /// Course over ground, degrees true.
    pub course: f64,
    /// Ground speed, metres per second.
    pub speed: f64,
}

impl StatusSnapshot {
    pub fn has_fix(&self) -> bool {
        self.lat != 0.0 || self.lon != 0.0
    }
}

/// Something that can report the platform's current status on demand.
pub trait TelemetrySource: Send + Sync {
    fn read_status(&self) -> StatusSnapshot;
}

/// Fixed snapshot, for units without a live feed and for tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticSource(pub StatusSnapshot);

impl TelemetrySource for StaticSource {
    fn read_status(&self) -> StatusSnapshot {
        self.0
    }
}

/// Reads the newest row of a CSV snapshot file maintained by the
/// platform side. Expected header columns: `lat`, `lon`, `hae`,
/// `battery`, `course`, `speed` (extra columns are ignored, order is
/// free). Any read or parse problem yields an empty snapshot so the
/// publisher keeps beaconing without a fix.
#[derive(Debug, Clone)]
pub struct CsvSnapshotSource {
    path: PathBuf,
}

impl CsvSnapshotSource {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn parse(content: &str) -> Option<StatusSnapshot> {
        let mut lines = content.lines().filter(|l| !l.trim().is_empty());
        let header: Vec<&str> = lines.next()?.split(',').map(str::trim).collect();
        let row: Vec<&str> = lines.last()?.split(',').map(str::trim).collect();

        let field = |name: &str| -> Option<&str> {
            header
                .iter()
                .position(|h| h.eq_ignore_ascii_case(name))
                .and_then(|i| row.get(i).copied())
        };
        let num = |name: &str| field(name).and_then(|v| v.parse::<f64>().ok());

        Some(StatusSnapshot {
            lat: num("lat")?,
            lon: num("lon")?,
            hae: num("hae").unwrap_or(0.0),
            battery: num("battery").unwrap_or(0.0).clamp(0.0, 100.0) as u32,
            course: num("course").unwrap_or(0.0),
            speed: num("speed").unwrap_or(0.0),
        })
    }
}

impl TelemetrySource for CsvSnapshotSource {
    fn read_status(&self) -> StatusSnapshot {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "telemetry snapshot unreadable");
                return StatusSnapshot::default();
            }
        };
        match Self::parse(&content) {
            Some(snap) => snap,
            None => {
                warn!(path = %self.path.display(), "telemetry snapshot malformed");
                StatusSnapshot::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_takes_last_row_by_named_column() {
        let csv = "time,lon,lat,hae,battery,course,speed\n\
                   1,30.1,50.1,120.0,90,10.0,2.5\n\
                   2,30.2,50.2,121.0,89,12.0,3.0\n";
        let snap = CsvSnapshotSource::parse(csv).unwrap();
        assert_eq!(snap.lat, 50.2);
        assert_eq!(snap.lon, 30.2);
        assert_eq!(snap.hae, 121.0);
        assert_eq!(snap.battery, 89);
        assert_eq!(snap.speed, 3.0);
    }

    #[test]
    fn test_parse_missing_required_column_is_none() {
        let csv = "time,lon\n1,30.1\n";
        assert!(CsvSnapshotSource::parse(csv).is_none());
    }

    #[test]
    fn test_header_only_is_none() {
        assert!(CsvSnapshotSource::parse("lat,lon,hae\n").is_none());
    }

    #[test]
    fn test_static_source_round_trips() {
        let snap = StatusSnapshot {
            lat: 1.0,
            lon: 2.0,
            ..Default::default()
        };
        assert_eq!(StaticSource(snap).read_status(), snap);
        assert!(snap.has_fix());
        assert!(!StatusSnapshot::default().has_fix());
    }
}
