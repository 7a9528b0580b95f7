//! End-to-end session tests against a scripted in-memory server.

use fieldlink_client::config::{Config, TransportProfile};
use fieldlink_client::transport::{Channel, Connector};
use fieldlink_client::{SessionEvent, SessionManager, SessionState, StaticSource};
use fieldlink_cot::{CotEvent, GroupAffiliation, Point, Track};
use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

#[derive(Default)]
struct ScriptedConnector {
    script: Mutex<VecDeque<bool>>,
    servers: Arc<Mutex<Vec<DuplexStream>>>,
}

impl ScriptedConnector {
    fn with_script(outcomes: &[bool]) -> Self {
        Self {
            script: Mutex::new(outcomes.iter().copied().collect()),
            servers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn servers(&self) -> Arc<Mutex<Vec<DuplexStream>>> {
        self.servers.clone()
    }
}

impl Connector for ScriptedConnector {
    fn connect(
        &self,
        _profile: &TransportProfile,
    ) -> impl Future<Output = io::Result<Channel>> + Send {
        let ok = self.script.lock().unwrap().pop_front().unwrap_or(false);
        let result = if ok {
            let (client, server) = tokio::io::duplex(256 * 1024);
            self.servers.lock().unwrap().push(server);
            let (reader, writer) = tokio::io::split(client);
            Ok(Channel {
                reader: Box::new(reader),
                writer: Box::new(writer),
            })
        } else {
            Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            ))
        };
        async move { result }
    }
}

fn config() -> Config {
    let mut config = Config::default_config();
    config.identity.uid = "FIELDLINK-0042".to_string();
    config.identity.callsign = "RAVEN-2".to_string();
    // Keep wall-clock waits short.
    config.connection.monitor_interval_secs = 1;
    config.connection.retry_delay_secs = 0.2;
    config
}

fn peer_presence(uid: &str, callsign: &str, lat: f64) -> CotEvent {
    CotEvent::presence(
        uid,
        callsign,
        GroupAffiliation::default(),
        Point::fix(lat, 30.5, 110.0),
        70,
        Track::default(),
        75,
    )
}

/// Read from the server half until `needle` shows up in the stream, or
/// panic after a bounded wait.
async fn read_until(server: &mut DuplexStream, needle: &str) -> String {
    let mut seen = String::new();
    let mut buf = vec![0u8; 64 * 1024];
    let deadline = Duration::from_secs(10);
    let result = tokio::time::timeout(deadline, async {
        while !seen.contains(needle) {
            let n = server.read(&mut buf).await.unwrap();
            assert!(n > 0, "server stream closed while waiting for {needle}");
            seen.push_str(&String::from_utf8_lossy(&buf[..n]));
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {needle:?}, saw: {seen}");
    seen
}

#[tokio::test]
async fn test_chat_and_position_report_round_trip() {
    let connector = ScriptedConnector::with_script(&[true]);
    let servers = connector.servers();
    let manager = SessionManager::new(config(), connector, Arc::new(StaticSource::default()));
    let mut handle = manager.start().await.unwrap();
    let mut inbox = handle.take_inbox().unwrap();
    assert_eq!(handle.state(), SessionState::Connected);

    let mut server = servers.lock().unwrap().remove(0);

    // The unit advertises itself on connect (first beacon tick).
    read_until(&mut server, "RAVEN-2").await;

    // A peer appears, then asks everyone for positions.
    let presence = peer_presence("U-7", "HAWK-1", 48.2);
    server.write_all(presence.to_xml().as_bytes()).await.unwrap();
    let request = CotEvent::broadcast_chat("U-7", "HAWK-1", "All Chat Rooms", "position");
    server.write_all(request.to_xml().as_bytes()).await.unwrap();

    let reply = read_until(&mut server, "lat=48.200000").await;
    assert!(reply.contains("HAWK-1 @ "));

    // Ordinary chat lands in the operator inbox, commands do not.
    let chat = CotEvent::broadcast_chat("U-7", "HAWK-1", "All Chat Rooms", "moving north");
    server.write_all(chat.to_xml().as_bytes()).await.unwrap();
    let msg = inbox.recv().await.unwrap();
    assert_eq!(msg.sender_callsign, "HAWK-1");
    assert_eq!(msg.text, "moving north");
    assert!(!msg.directed);

    // Operator replies to the room.
    handle.send_chat("copy, holding").unwrap();
    let out = read_until(&mut server, "copy, holding").await;
    assert!(out.contains("RAVEN-2"));

    handle.stop().await;
    assert_eq!(handle.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn test_directed_position_request_answered_directly() {
    let connector = ScriptedConnector::with_script(&[true]);
    let servers = connector.servers();
    let manager = SessionManager::new(config(), connector, Arc::new(StaticSource::default()));
    let mut handle = manager.start().await.unwrap();
    let mut server = servers.lock().unwrap().remove(0);

    let request = CotEvent::directed_chat(
        "U-7",
        "HAWK-1",
        "ChatThread.U-7.FIELDLINK-0042",
        "FIELDLINK-0042",
        "RAVEN-2",
        "position",
    );
    server.write_all(request.to_xml().as_bytes()).await.unwrap();

    let reply = read_until(&mut server, "no positions recorded yet").await;
    // Routed back at the requester, on the same thread.
    assert!(reply.contains("uid1=\"U-7\""));
    assert!(reply.contains("ChatThread.U-7.FIELDLINK-0042"));

    handle.stop().await;
}

#[tokio::test]
async fn test_lifecycle_events_observed_in_order() {
    let connector = ScriptedConnector::with_script(&[true, true]);
    let servers = connector.servers();
    let manager = SessionManager::new(config(), connector, Arc::new(StaticSource::default()));
    let mut handle = manager.start().await.unwrap();
    let mut events = handle.take_events().unwrap();

    assert_eq!(
        events.recv().await.unwrap(),
        SessionEvent::Connected { attempts: 1 }
    );

    // Drop the live server; the session notices and reconnects.
    servers.lock().unwrap().clear();
    assert_eq!(events.recv().await.unwrap(), SessionEvent::ConnectionLost);
    assert_eq!(
        events.recv().await.unwrap(),
        SessionEvent::Connected { attempts: 1 }
    );

    handle.stop().await;
    assert_eq!(events.recv().await.unwrap(), SessionEvent::Stopped);
}
