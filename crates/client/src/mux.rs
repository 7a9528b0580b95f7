//! Inbound event multiplexer.
//!
//! Races reads from the reliable stream and the optional datagram socket,
//! runs each channel through its own frame buffer, and yields decoded
//! events in per-channel arrival order. The two channels carry the same
//! event language, so downstream consumers never care which one an event
//! came in on.

use fieldlink_cot::{CotEvent, FrameBuffer};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::UdpSocket;
use tracing::{debug, trace};

const READ_BUF_LEN: usize = 8 * 1024;
const DATAGRAM_BUF_LEN: usize = 64 * 1024;

/// What the multiplexer saw next.
#[derive(Debug)]
pub enum Inbound {
    /// Decoded events from one read, in arrival order.
    Events(Vec<CotEvent>),
    /// The reliable stream closed or failed. The datagram channel alone
    /// is not a live connection, so this ends the read loop.
    StreamClosed,
}

pub struct EventMultiplexer {
    stream: Box<dyn AsyncRead + Send + Unpin>,
    stream_frames: FrameBuffer,
    stream_buf: Vec<u8>,
    datagram: Option<Arc<UdpSocket>>,
    datagram_frames: FrameBuffer,
    datagram_buf: Vec<u8>,
}

impl EventMultiplexer {
    pub fn new(stream: Box<dyn AsyncRead + Send + Unpin>, datagram: Option<Arc<UdpSocket>>) -> Self {
        Self {
            stream,
            stream_frames: FrameBuffer::new(),
            stream_buf: vec![0u8; READ_BUF_LEN],
            datagram,
            datagram_frames: FrameBuffer::new(),
            datagram_buf: vec![0u8; DATAGRAM_BUF_LEN],
        }
    }

    /// Wait for the next batch of events on either channel.
    pub async fn next(&mut self) -> Inbound {
        loop {
            tokio::select! {
                res = self.stream.read(&mut self.stream_buf) => match res {
                    Ok(0) | Err(_) => return Inbound::StreamClosed,
                    Ok(n) => {
                        let frames = self.stream_frames.push(&self.stream_buf[..n]);
                        let events = decode_frames(&frames);
                        if !events.is_empty() {
                            return Inbound::Events(events);
                        }
                    }
                },
                res = recv_datagram(self.datagram.as_deref(), &mut self.datagram_buf) => {
                    if let Ok(n) = res {
                        let frames = self.datagram_frames.push(&self.datagram_buf[..n]);
                        let events = decode_frames(&frames);
                        if !events.is_empty() {
                            return Inbound::Events(events);
                        }
                    }
                    // Datagram errors are transient; keep racing.
                },
            }
        }
    }
}

async fn recv_datagram(sock: Option<&UdpSocket>, buf: &mut [u8]) -> std::io::Result<usize> {
    match sock {
        Some(sock) => {
            let (n, _from) = sock.recv_from(buf).await?;
            Ok(n)
        }
        // No datagram channel configured; never resolves.
        None => std::future::pending().await,
    }
}

/// Decode frames, dropping the ones that do not parse. A garbled frame
/// from one sender must not poison the rest of the batch.
fn decode_frames(frames: &[Vec<u8>]) -> Vec<CotEvent> {
    let mut events = Vec::with_capacity(frames.len());
    for frame in frames {
        match CotEvent::parse(frame) {
            Ok(event) => {
                trace!(uid = %event.uid, event_type = %event.event_type, "event received");
                events.push(event);
            }
            Err(e) => debug!(error = %e, "dropping undecodable frame"),
        }
    }
    events
}
