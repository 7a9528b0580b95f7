//! Inbound event routing.
//!
//! Presence events feed the peer table; chat events are classified as
//! broadcast or directed, checked for the position-request command, and
//! otherwise delivered to the operator inbox. Replies go back out with
//! the same shape they came in: directed requests get directed replies,
//! broadcast requests get broadcast replies.

use crate::config::IdentityConfig;
use crate::dispatch::{DispatchHandle, SendRoute};
use crate::error::DispatchError;
use crate::peers::{PeerSample, PeerTable};
use chrono::Utc;
use fieldlink_cot::{parse_cot_time, CotEvent, EventKind};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Text command that asks this unit for its compiled position report.
const POSITION_COMMAND: &str = "position";

/// One chat message delivered to the operator.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub sender_callsign: String,
    pub chatroom: String,
    pub text: String,
    /// Whether the message was addressed to this unit specifically
    /// rather than to the shared chatroom.
    pub directed: bool,
}

pub struct ChatRouter {
    identity: IdentityConfig,
    peers: Arc<PeerTable>,
    dispatch: DispatchHandle,
    inbox: mpsc::UnboundedSender<ChatMessage>,
}

impl ChatRouter {
    pub fn new(
        identity: IdentityConfig,
        peers: Arc<PeerTable>,
        dispatch: DispatchHandle,
    ) -> (Self, mpsc::UnboundedReceiver<ChatMessage>) {
        let (inbox, inbox_rx) = mpsc::unbounded_channel();
        (
            Self {
                identity,
                peers,
                dispatch,
                inbox,
            },
            inbox_rx,
        )
    }

    /// Route one decoded inbound event.
    pub fn handle_event(&self, event: &CotEvent) {
        match event.kind {
            EventKind::Presence => self.ingest_presence(event),
            EventKind::Chat => self.handle_chat(event),
            EventKind::Other => {
                trace!(uid = %event.uid, event_type = %event.event_type, "unhandled event type");
            }
        }
    }

    /// Send free text from the operator to the shared chatroom.
    pub fn send_broadcast(&self, text: &str) -> Result<(), DispatchError> {
        let event = CotEvent::broadcast_chat(
            &self.identity.uid,
            &self.identity.callsign,
            &self.identity.chatroom,
            text,
        );
        self.dispatch.enqueue(&event, SendRoute::Both)
    }

    /// Compiled position report over everything heard so far.
    pub fn compile_report(&self) -> String {
        self.peers.compile_report()
    }

    fn ingest_presence(&self, event: &CotEvent) {
        if event.uid == self.identity.uid {
            return;
        }
        let Some(point) = event.point else {
            return;
        };
        let expired = parse_cot_time(&event.stale)
            .map(|stale| stale < Utc::now())
            .unwrap_or(false);
        let sample = PeerSample {
            callsign: event.detail.contact_callsign.clone(),
            time: event.time.clone(),
            lat: point.lat,
            lon: point.lon,
            hae: point.hae,
        };
        if self.peers.record(&event.uid, sample, expired) {
            trace!(uid = %event.uid, "peer position recorded");
        }
    }

    fn handle_chat(&self, event: &CotEvent) {
        let Some(remarks) = event.detail.remarks.as_ref() else {
            debug!(uid = %event.uid, "chat event without remarks dropped");
            return;
        };
        if self.is_own_message(event) {
            return;
        }

        let directed = event.counterpart_uid(&self.identity.uid).is_some();
        let sender_callsign = event
            .detail
            .chat
            .as_ref()
            .map(|c| c.sender_callsign.clone())
            .unwrap_or_else(|| remarks.source.clone());
        let text = remarks.text.trim();

        if text.eq_ignore_ascii_case(POSITION_COMMAND) {
            self.answer_position_request(event, &sender_callsign, directed);
            return;
        }

        let chatroom = event
            .detail
            .chat
            .as_ref()
            .map(|c| c.chatroom.clone())
            .unwrap_or_default();
        let delivered = self.inbox.send(ChatMessage {
            sender_callsign: sender_callsign.clone(),
            chatroom,
            text: text.to_string(),
            directed,
        });
        if delivered.is_err() {
            debug!("operator inbox closed, chat message dropped");
        } else {
            info!(from = %sender_callsign, directed, "chat message received");
        }
    }

    fn answer_position_request(&self, event: &CotEvent, sender: &str, directed: bool) {
        let report = self.peers.compile_report();
        info!(from = %sender, directed, "position request answered");
        let result = if directed {
            match CotEvent::directed_reply(event, &self.identity.uid, &self.identity.callsign, &report)
            {
                Some(reply) => self.dispatch.enqueue(&reply, SendRoute::Stream),
                None => {
                    // Both uids were present for classification, so the
                    // reply can always be built; kept for safety.
                    debug!(uid = %event.uid, "directed request missing routing fields");
                    return;
                }
            }
        } else {
            let reply = CotEvent::broadcast_chat(
                &self.identity.uid,
                &self.identity.callsign,
                &self.identity.chatroom,
                &report,
            );
            self.dispatch.enqueue(&reply, SendRoute::Both)
        };
        if let Err(e) = result {
            warn!(error = %e, "position report not enqueued");
        }
    }

    /// Loopback suppression: servers echo multicast and chatroom traffic
    /// back to the sender.
    fn is_own_message(&self, event: &CotEvent) -> bool {
        if event.detail.link_uid.as_deref() == Some(self.identity.uid.as_str()) {
            return true;
        }
        if let Some(remarks) = event.detail.remarks.as_ref() {
            if remarks.source == self.identity.uid || remarks.source == self.identity.callsign {
                return true;
            }
        }
        false
    }
}
