//! Session lifecycle management.
//!
//! One [`SessionManager`] owns the whole client: it runs the connect
//! cycle, wires the multiplexer, dispatcher and presence publisher to a
//! live connection, watches connection health, and drives every
//! reconnect through the same canonical path the initial connect used.

use crate::config::{Config, ConnectionConfig};
use crate::dispatch::{self, OutboundDispatcher, OutboundEvent};
use crate::error::{ClientError, DispatchError};
use crate::mux::{EventMultiplexer, Inbound};
use crate::peers::PeerTable;
use crate::publisher::{PresencePublisher, PublishOutcome};
use crate::router::{ChatMessage, ChatRouter};
use crate::telemetry::{StatusSnapshot, TelemetrySource};
use crate::transport::{self, Channel, Connector};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Externally observable connection state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    /// A connect cycle is running; `attempt` counts attempts made so far
    /// within the current cycle.
    Connecting { attempt: u32 },
    Connected,
    /// The last connect cycle exhausted its deadline. A new cycle starts
    /// in the background unless the session was stopped.
    Failed { reason: String },
}

/// Lifecycle notifications for interested observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A connect cycle succeeded after this many attempts.
    Connected { attempts: u32 },
    ConnectionLost,
    Stopped,
}

/// Builder/owner of one client session.
pub struct SessionManager<C: Connector> {
    config: Config,
    connector: Arc<C>,
    telemetry: Arc<dyn TelemetrySource>,
}

impl<C: Connector> SessionManager<C> {
    pub fn new(config: Config, connector: C, telemetry: Arc<dyn TelemetrySource>) -> Self {
        Self {
            config,
            connector: Arc::new(connector),
            telemetry,
        }
    }

    /// Run the initial connect cycle and, on success, spawn the session
    /// supervisor with all its child tasks. An exhausted initial cycle
    /// is fatal and returns [`ClientError::ConnectDeadline`].
    pub async fn start(self) -> Result<SessionHandle, ClientError> {
        let identity = self.config.identity.clone();
        let connection = self.config.connection.clone();

        let (dispatch, out_rx) = dispatch::channel(self.config.dispatch.queue_capacity);
        let peers = Arc::new(PeerTable::new());
        let (router, inbox_rx) = ChatRouter::new(identity.clone(), peers, dispatch.clone());
        let router = Arc::new(router);
        let publisher = Arc::new(PresencePublisher::new(
            identity.clone(),
            self.config.presence.clone(),
            self.telemetry,
            dispatch.clone(),
        ));
        let datagram = match &self.config.multicast {
            Some(m) => Some(transport::open_multicast(m).await?),
            None => None,
        };

        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);
        let (events_tx, events_rx) = broadcast::channel(32);
        let (stop_tx, stop_rx) = watch::channel(false);

        let (channel, attempts) =
            connect_cycle(self.connector.as_ref(), &connection, &identity.uid, &state_tx).await?;
        // Callers observe Connected as soon as start() returns, without
        // waiting for the supervisor task to be scheduled.
        state_tx.send_replace(SessionState::Connected);

        let supervisor = Supervisor {
            connector: self.connector,
            connection,
            uid: identity.uid,
            state: state_tx,
            events: events_tx.clone(),
            router: router.clone(),
            publisher: publisher.clone(),
            datagram,
            stop: stop_rx,
        };
        let task = tokio::spawn(supervisor.run(channel, out_rx, attempts));

        Ok(SessionHandle {
            state: state_rx,
            events: events_tx,
            events_rx: Some(events_rx),
            inbox: Some(inbox_rx),
            stop: stop_tx,
            task: Some(task),
            router,
            publisher,
        })
    }
}

/// Live session control surface.
pub struct SessionHandle {
    state: watch::Receiver<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    events_rx: Option<broadcast::Receiver<SessionEvent>>,
    inbox: Option<mpsc::UnboundedReceiver<ChatMessage>>,
    stop: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
    router: Arc<ChatRouter>,
    publisher: Arc<PresencePublisher>,
}

impl SessionHandle {
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Receiver pre-subscribed before the supervisor started, so it sees
    /// the initial `Connected` event. Only available once.
    pub fn take_events(&mut self) -> Option<broadcast::Receiver<SessionEvent>> {
        self.events_rx.take()
    }

    /// Late subscription; misses events sent before the call.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Operator chat inbox. Only available once.
    pub fn take_inbox(&mut self) -> Option<mpsc::UnboundedReceiver<ChatMessage>> {
        self.inbox.take()
    }

    /// Broadcast free text to the shared chatroom.
    pub fn send_chat(&self, text: &str) -> Result<(), DispatchError> {
        self.router.send_broadcast(text)
    }

    /// Publish one presence event now, subject to the rate limit.
    pub fn publish_now(&self) -> Result<PublishOutcome, DispatchError> {
        self.publisher.publish_direct()
    }

    /// Push a fresh own-position sample from an external feed.
    pub fn update_position(&self, snap: StatusSnapshot) {
        self.publisher.update_position(snap)
    }

    /// Compiled position report over everything heard so far.
    pub fn compile_report(&self) -> String {
        self.router.compile_report()
    }

    /// Tear the session down: cancels all child tasks and closes the
    /// transport. Safe to call from any state, and again after it
    /// returns.
    pub async fn stop(&mut self) {
        let _ = self.stop.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// Per-session supervisor owning reconnects and child task lifetimes.
struct Supervisor<C: Connector> {
    connector: Arc<C>,
    connection: ConnectionConfig,
    uid: String,
    state: watch::Sender<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    router: Arc<ChatRouter>,
    publisher: Arc<PresencePublisher>,
    datagram: Option<(Arc<UdpSocket>, SocketAddr)>,
    stop: watch::Receiver<bool>,
}

impl<C: Connector> Supervisor<C> {
    async fn run(
        mut self,
        mut channel: Channel,
        mut out_rx: mpsc::Receiver<OutboundEvent>,
        mut attempts: u32,
    ) {
        // The beacon survives reconnects: it only touches the outbound
        // queue, never the transport.
        let presence = tokio::spawn(self.publisher.clone().run());

        'session: loop {
            self.state.send_replace(SessionState::Connected);
            let _ = self.events.send(SessionEvent::Connected { attempts });

            let Channel { reader, writer } = channel;
            let (lost, lost_watch) = watch::channel(false);

            let reader_task = {
                let router = self.router.clone();
                let sock = self.datagram.as_ref().map(|(s, _)| s.clone());
                let lost = lost.clone();
                tokio::spawn(async move {
                    let mut mux = EventMultiplexer::new(reader, sock);
                    loop {
                        match mux.next().await {
                            Inbound::Events(events) => {
                                for event in &events {
                                    router.handle_event(event);
                                }
                            }
                            Inbound::StreamClosed => {
                                warn!("reliable stream closed");
                                lost.send_replace(true);
                                break;
                            }
                        }
                    }
                })
            };
            let writer_task = tokio::spawn(
                OutboundDispatcher::new(out_rx, writer, self.datagram.clone(), lost.clone()).run(),
            );

            // Health monitor: polls the lost flag on a fixed period so
            // every failure funnels through this single decision point.
            let mut ticker = interval(self.connection.monitor_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut stopping = false;
            loop {
                tokio::select! {
                    res = self.stop.changed() => {
                        if res.is_err() || *self.stop.borrow() {
                            stopping = true;
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if *lost_watch.borrow() {
                            break;
                        }
                    }
                }
            }

            // Canonical teardown for both stop and reconnect. The old
            // transport halves are dropped with their tasks, so no two
            // live transports ever coexist.
            lost.send_replace(true);
            reader_task.abort();
            let _ = reader_task.await;
            out_rx = match writer_task.await {
                Ok(rx) => rx,
                Err(e) => {
                    error!(error = %e, "dispatcher task failed");
                    self.shutdown(presence).await;
                    return;
                }
            };

            if stopping {
                info!("session stopped");
                self.state.send_replace(SessionState::Disconnected);
                let _ = self.events.send(SessionEvent::Stopped);
                self.shutdown(presence).await;
                return;
            }

            let _ = self.events.send(SessionEvent::ConnectionLost);

            // Reconnect until a cycle succeeds or the session is stopped.
            // Each exhausted cycle parks in Failed, then a fresh cycle
            // begins.
            loop {
                tokio::select! {
                    res = connect_cycle(
                        self.connector.as_ref(),
                        &self.connection,
                        &self.uid,
                        &self.state,
                    ) => match res {
                        Ok((fresh, n)) => {
                            channel = fresh;
                            attempts = n;
                            continue 'session;
                        }
                        Err(e) => {
                            error!(error = %e, "connect cycle exhausted");
                            self.state.send_replace(SessionState::Failed {
                                reason: e.to_string(),
                            });
                        }
                    },
                    _ = stop_requested(&mut self.stop) => {
                        info!("session stopped while reconnecting");
                        self.state.send_replace(SessionState::Disconnected);
                        let _ = self.events.send(SessionEvent::Stopped);
                        self.shutdown(presence).await;
                        return;
                    }
                }
            }
        }
    }

    async fn shutdown(&self, presence: JoinHandle<()>) {
        presence.abort();
        let _ = presence.await;
    }
}

/// Resolves once a stop has been requested. A dropped handle counts as
/// a stop so the supervisor never outlives its owner.
async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    while !*stop.borrow() {
        if stop.changed().await.is_err() {
            return;
        }
    }
}

/// One bounded connect cycle: walk the profile order, one attempt at a
/// time, backing off between failures, until a connection opens or the
/// overall deadline passes. When the per-attempt timeout fires the
/// in-flight connect future is dropped, releasing anything it had
/// half-opened.
async fn connect_cycle<C: Connector>(
    connector: &C,
    cfg: &ConnectionConfig,
    uid: &str,
    state: &watch::Sender<SessionState>,
) -> Result<(Channel, u32), ClientError> {
    let profiles = cfg.ordered_profiles(uid);
    if profiles.is_empty() {
        return Err(ClientError::Config(
            "no transport profiles configured".to_string(),
        ));
    }

    let started = Instant::now();
    let deadline = cfg.overall_deadline();
    let mut attempts = 0u32;
    loop {
        for profile in &profiles {
            if started.elapsed() >= deadline {
                return Err(ClientError::ConnectDeadline {
                    attempts,
                    elapsed: started.elapsed(),
                });
            }
            attempts += 1;
            state.send_replace(SessionState::Connecting { attempt: attempts });
            debug!(profile = %profile.name, attempt = attempts, "connect attempt");
            match timeout(cfg.attempt_timeout(), connector.connect(profile)).await {
                Ok(Ok(channel)) => {
                    info!(profile = %profile.name, attempts, "connected");
                    return Ok((channel, attempts));
                }
                Ok(Err(e)) => {
                    warn!(profile = %profile.name, error = %e, "connect attempt failed")
                }
                Err(_) => warn!(profile = %profile.name, "connect attempt timed out"),
            }
            sleep(cfg.retry_delay(attempts)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportProfile;
    use crate::telemetry::StaticSource;
    use std::collections::VecDeque;
    use std::future::Future;
    use std::io;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::io::DuplexStream;

    /// Connector driven by a script of per-attempt outcomes. Once the
    /// script runs out every further attempt fails. Successful attempts
    /// park the server half in a shared list so a test can keep the
    /// connection open, or drop it to simulate a transport failure.
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
                let (client, server) = tokio::io::duplex(64 * 1024);
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

    fn test_config() -> Config {
        let mut config = Config::default_config();
        config.connection.overall_deadline_secs = 300;
        config
    }

    fn manager(connector: ScriptedConnector) -> SessionManager<ScriptedConnector> {
        SessionManager::new(
            test_config(),
            connector,
            Arc::new(StaticSource::default()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_cycle_counts_attempts() {
        let connector = ScriptedConnector::with_script(&[false, false, true]);
        let cfg = test_config().connection;
        let (state, _keep) = watch::channel(SessionState::Disconnected);
        let (_channel, attempts) = connect_cycle(&connector, &cfg, "U-1", &state)
            .await
            .unwrap();
        assert_eq!(attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_cycle_deadline_exhaustion() {
        let connector = ScriptedConnector::with_script(&[]);
        let mut cfg = test_config().connection;
        cfg.overall_deadline_secs = 5;
        let (state, _keep) = watch::channel(SessionState::Disconnected);
        let started = Instant::now();
        // Retries after 3.3s and 3.6s put the second check past the 5s
        // deadline; no attempts happen after it.
        match connect_cycle(&connector, &cfg, "U-1", &state).await {
            Ok(_) => panic!("cycle succeeded with no reachable endpoint"),
            Err(ClientError::ConnectDeadline { attempts, elapsed }) => {
                assert_eq!(attempts, 2);
                assert!(elapsed >= Duration::from_secs(5));
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_fails_when_initial_cycle_exhausted() {
        let connector = ScriptedConnector::with_script(&[]);
        let mut config = test_config();
        config.connection.overall_deadline_secs = 5;
        let manager = SessionManager::new(config, connector, Arc::new(StaticSource::default()));
        match manager.start().await {
            Ok(_) => panic!("start succeeded with no reachable endpoint"),
            Err(e) => assert!(matches!(e, ClientError::ConnectDeadline { .. })),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_reconnects_after_stream_close() {
        let connector = ScriptedConnector::with_script(&[true, false, true]);
        let servers = connector.servers();
        let mut handle = manager(connector).start().await.unwrap();
        let mut events = handle.take_events().unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::Connected { attempts: 1 }
        );
        assert_eq!(handle.state(), SessionState::Connected);

        // Kill the server side; the reader notices, the monitor reacts,
        // and the supervisor reconnects (one refused attempt first).
        servers.lock().unwrap().clear();

        assert_eq!(events.recv().await.unwrap(), SessionEvent::ConnectionLost);
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::Connected { attempts: 2 }
        );
        assert_eq!(handle.state(), SessionState::Connected);

        handle.stop().await;
        assert_eq!(handle.state(), SessionState::Disconnected);
        assert_eq!(events.recv().await.unwrap(), SessionEvent::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let connector = ScriptedConnector::with_script(&[true]);
        let mut handle = manager(connector).start().await.unwrap();
        handle.stop().await;
        assert_eq!(handle.state(), SessionState::Disconnected);
        handle.stop().await;
        assert_eq!(handle.state(), SessionState::Disconnected);
    }
}
