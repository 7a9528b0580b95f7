//! Outbound event dispatch.
//!
//! All producers (presence publisher, chat router, operator input) hand
//! events to one bounded queue; a single consumer owns the write half of
//! the reliable stream plus the optional datagram socket and serializes
//! every send. Producers never block: a full queue surfaces as
//! [`DispatchError::Overloaded`].

use crate::error::DispatchError;
use fieldlink_cot::CotEvent;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// Which channels one outbound event goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendRoute {
    /// Reliable stream only.
    Stream,
    /// Reliable stream plus the datagram channel when configured.
    Both,
}

#[derive(Debug)]
pub struct OutboundEvent {
    pub frame: Vec<u8>,
    pub route: SendRoute,
}

/// Cheap clonable producer handle onto the outbound queue.
#[derive(Debug, Clone)]
pub struct DispatchHandle {
    tx: mpsc::Sender<OutboundEvent>,
}

impl DispatchHandle {
    /// Serialize `event` and enqueue it without blocking.
    pub fn enqueue(&self, event: &CotEvent, route: SendRoute) -> Result<(), DispatchError> {
        let frame = event.to_xml().into_bytes();
        self.tx
            .try_send(OutboundEvent { frame, route })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => DispatchError::Overloaded,
                mpsc::error::TrySendError::Closed(_) => DispatchError::Closed,
            })
    }
}

/// Create the outbound queue. The receiver is threaded through one
/// [`OutboundDispatcher`] per connection; the handle lives for the whole
/// session.
pub fn channel(capacity: usize) -> (DispatchHandle, mpsc::Receiver<OutboundEvent>) {
    let (tx, rx) = mpsc::channel(capacity);
    (DispatchHandle { tx }, rx)
}

/// Single consumer bound to one live connection.
pub struct OutboundDispatcher {
    rx: mpsc::Receiver<OutboundEvent>,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    datagram: Option<(Arc<UdpSocket>, SocketAddr)>,
    lost: watch::Sender<bool>,
    lost_rx: watch::Receiver<bool>,
}

impl OutboundDispatcher {
    pub fn new(
        rx: mpsc::Receiver<OutboundEvent>,
        writer: Box<dyn AsyncWrite + Send + Unpin>,
        datagram: Option<(Arc<UdpSocket>, SocketAddr)>,
        lost: watch::Sender<bool>,
    ) -> Self {
        let lost_rx = lost.subscribe();
        Self {
            rx,
            writer,
            datagram,
            lost,
            lost_rx,
        }
    }

    /// Drain the queue onto the transport until the connection is marked
    /// lost or the queue closes. Returns the receiver so the next
    /// connection's dispatcher can pick up queued events.
    pub async fn run(mut self) -> mpsc::Receiver<OutboundEvent> {
        loop {
            if *self.lost_rx.borrow() {
                break;
            }
            tokio::select! {
                res = self.lost_rx.changed() => {
                    if res.is_err() || *self.lost_rx.borrow() {
                        break;
                    }
                }
                item = self.rx.recv() => {
                    let Some(event) = item else { break };
                    if !self.send(event).await {
                        break;
                    }
                }
            }
        }
        self.rx
    }

    async fn send(&mut self, event: OutboundEvent) -> bool {
        // The write is raced against the lost flag: a peer that stops
        // draining its socket must not be able to wedge teardown behind
        // a write that never completes.
        let writer = &mut self.writer;
        let frame = &event.frame;
        let write = async move {
            writer.write_all(frame).await?;
            writer.flush().await
        };
        tokio::select! {
            res = write => {
                if let Err(e) = res {
                    warn!(error = %e, "stream write failed, marking connection lost");
                    self.lost.send_replace(true);
                    return false;
                }
            }
            _ = self.lost_rx.changed() => {
                // Torn down mid-write; the frame goes with the connection.
                return false;
            }
        }
        if event.route == SendRoute::Both {
            if let Some((sock, addr)) = &self.datagram {
                // Datagram loss is expected; it never fails the connection.
                if let Err(e) = sock.send_to(&event.frame, *addr).await {
                    debug!(error = %e, "datagram send failed");
                }
            }
        }
        true
    }
}
