//! Presence publisher.
//!
//! Beacons this unit's identity and position on a steady period and
//! serves on-demand publishes, rate limited so bursty triggers cannot
//! flood the outbound queue.

use crate::config::{IdentityConfig, PresenceConfig};
use crate::dispatch::{DispatchHandle, SendRoute};
use crate::error::DispatchError;
use crate::telemetry::{StatusSnapshot, TelemetrySource};
use fieldlink_cot::{CotEvent, GroupAffiliation, Point, Track};
use std::sync::{Arc, Mutex};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Result of an on-demand publish request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// An event was built and enqueued.
    Sent,
    /// The request arrived inside the minimum direct interval and was
    /// deliberately dropped. This is a success: the suppressed event
    /// would have carried the same position as the one just sent.
    Skipped,
}

pub struct PresencePublisher {
    identity: IdentityConfig,
    cfg: PresenceConfig,
    telemetry: Arc<dyn TelemetrySource>,
    position: Mutex<StatusSnapshot>,
    last_direct: Mutex<Option<Instant>>,
    dispatch: DispatchHandle,
}

impl PresencePublisher {
    pub fn new(
        identity: IdentityConfig,
        cfg: PresenceConfig,
        telemetry: Arc<dyn TelemetrySource>,
        dispatch: DispatchHandle,
    ) -> Self {
        Self {
            identity,
            cfg,
            telemetry,
            position: Mutex::new(StatusSnapshot::default()),
            last_direct: Mutex::new(None),
            dispatch,
        }
    }

    /// Overwrite the current own-position snapshot from an external feed.
    /// The next beacon or direct publish reports it.
    pub fn update_position(&self, snap: StatusSnapshot) {
        *self.position.lock().unwrap() = snap;
    }

    /// Latest own-position snapshot.
    pub fn position(&self) -> StatusSnapshot {
        *self.position.lock().unwrap()
    }

    /// Publish one presence event now, subject to the minimum direct
    /// interval. Never blocks.
    pub fn publish_direct(&self) -> Result<PublishOutcome, DispatchError> {
        {
            let mut last = self.last_direct.lock().unwrap();
            if let Some(at) = *last {
                if at.elapsed() < self.cfg.min_direct_interval() {
                    debug!("direct presence suppressed by rate limit");
                    return Ok(PublishOutcome::Skipped);
                }
            }
            *last = Some(Instant::now());
        }
        let event = self.build_event(self.position());
        self.dispatch.enqueue(&event, SendRoute::Stream)?;
        Ok(PublishOutcome::Sent)
    }

    /// Steady beacon loop. Each tick refreshes the own-position snapshot
    /// from the telemetry source, then enqueues one presence event.
    /// Enqueue failures are logged and the beacon keeps its cadence.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = interval(self.cfg.period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let snap = self.telemetry.read_status();
            self.update_position(snap);
            let event = self.build_event(snap);
            if let Err(e) = self.dispatch.enqueue(&event, SendRoute::Stream) {
                warn!(error = %e, "presence beacon not enqueued");
            }
        }
    }

    fn build_event(&self, snap: StatusSnapshot) -> CotEvent {
        let point = if snap.has_fix() {
            Point::fix(snap.lat, snap.lon, snap.hae)
        } else {
            Point::no_fix()
        };
        CotEvent::presence(
            &self.identity.uid,
            &self.identity.callsign,
            GroupAffiliation {
                name: self.identity.team.clone(),
                role: self.identity.role.clone(),
            },
            point,
            snap.battery,
            Track {
                speed: snap.speed,
                course: snap.course,
            },
            self.cfg.stale_secs,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::dispatch;
    use crate::telemetry::StaticSource;
    use std::time::Duration;

    fn publisher(capacity: usize) -> (Arc<PresencePublisher>, tokio::sync::mpsc::Receiver<dispatch::OutboundEvent>) {
        let config = Config::default_config();
        let (handle, rx) = dispatch::channel(capacity);
        let publisher = PresencePublisher::new(
            config.identity,
            config.presence,
            Arc::new(StaticSource(StatusSnapshot {
                lat: 50.45,
                lon: 30.52,
                hae: 120.0,
                battery: 88,
                course: 90.0,
                speed: 4.2,
            })),
            handle,
        );
        (Arc::new(publisher), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_direct_publish_rate_limited() {
        let (publisher, mut rx) = publisher(8);
        publisher.update_position(StatusSnapshot {
            lat: 1.0,
            lon: 2.0,
            hae: 3.0,
            ..Default::default()
        });

        assert_eq!(publisher.publish_direct().unwrap(), PublishOutcome::Sent);
        assert_eq!(publisher.publish_direct().unwrap(), PublishOutcome::Skipped);
        tokio::time::advance(Duration::from_millis(501)).await;
        assert_eq!(publisher.publish_direct().unwrap(), PublishOutcome::Sent);

        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_beacon_reports_telemetry_position() {
        let (publisher, mut rx) = publisher(8);
        let task = tokio::spawn(publisher.clone().run());

        let event = rx.recv().await.unwrap();
        let xml = String::from_utf8(event.frame).unwrap();
        assert!(xml.contains("lat=\"50.45\""));
        assert!(xml.contains("battery=\"88\""));

        // Snapshot is refreshed into the shared position each tick.
        assert_eq!(publisher.position().battery, 88);
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_beacon_keeps_cadence_when_queue_full() {
        let (publisher, mut rx) = publisher(1);
        let task = tokio::spawn(publisher.clone().run());

        // First tick fills the queue; later ticks drop but do not panic
        // or stall the loop.
        let first = rx.recv().await.unwrap();
        assert!(!first.frame.is_empty());
        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(rx.recv().await.is_some());
        task.abort();
    }
}
