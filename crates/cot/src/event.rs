//! Typed model of one Cursor-on-Target event.
//!
//! Events are immutable once constructed: replying to a message builds a new
//! event rather than mutating the original. The open-ended `<detail>` bag of
//! the wire format is classified once into [`Detail`] at parse time instead of
//! being re-inspected by every consumer.

use crate::time::cot_time;
use serde::{Deserialize, Serialize};

/// CoT type string for GeoChat free-text messages.
pub const CHAT_EVENT_TYPE: &str = "b-t-f";

/// CoT type string for this unit's own presence reports.
pub const PRESENCE_EVENT_TYPE: &str = "a-f-G-U-C";

/// Reserved "precision unknown / not applicable" value for `ce`, `le` and
/// `hae`. A report carrying this value must never be treated as disproving a
/// real fix.
pub const UNKNOWN_ERROR_RADIUS: f64 = 9_999_999.0;

/// Reserved "unknown altitude" sentinel.
pub const UNKNOWN_HAE: f64 = 9_999_999.0;

/// Error radius advertised for real fixes, matching the field clients this
/// unit interoperates with.
pub const DEFAULT_ERROR_RADIUS: f64 = 10.0;

/// Coarse classification of an event, derived once from its raw type string.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EventKind {
    /// A unit position/telemetry report (`a-*` atom types).
    Presence,
    /// A GeoChat text message (`b-t-f`).
    Chat,
    /// Anything else; preserved opaquely but not acted upon.
    Other,
}

impl EventKind {
    /// Classify a raw CoT type string.
    pub fn classify(event_type: &str) -> Self {
        if event_type == CHAT_EVENT_TYPE {
            EventKind::Chat
        } else if event_type.starts_with("a-") {
            EventKind::Presence
        } else {
            EventKind::Other
        }
    }
}

/// Geographic point block.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Point {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
    /// Height above ellipsoid in meters.
    pub hae: f64,
    /// Circular error in meters, or [`UNKNOWN_ERROR_RADIUS`].
    pub ce: f64,
    /// Linear error in meters, or [`UNKNOWN_ERROR_RADIUS`].
    pub le: f64,
}

impl Point {
    /// A real fix with the default error radius.
    pub fn fix(lat: f64, lon: f64, hae: f64) -> Self {
        Self {
            lat,
            lon,
            hae,
            ce: DEFAULT_ERROR_RADIUS,
            le: DEFAULT_ERROR_RADIUS,
        }
    }

    /// The "no position" point carried by chat events.
    pub fn no_fix() -> Self {
        Self {
            lat: 0.0,
            lon: 0.0,
            hae: 0.0,
            ce: UNKNOWN_ERROR_RADIUS,
            le: UNKNOWN_ERROR_RADIUS,
        }
    }

    /// True if this point is a sentinel rather than a real measurement:
    /// the 0,0 position or a zero/unknown altitude.
    pub fn is_sentinel(&self) -> bool {
        (self.lat == 0.0 && self.lon == 0.0) || self.hae == 0.0 || self.hae == UNKNOWN_HAE
    }
}

/// Group/team affiliation (`__group`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct GroupAffiliation {
    /// Team name (color).
    pub name: String,
    /// Role within the team.
    pub role: String,
}

/// Track telemetry (`track`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Track {
    /// Ground speed in m/s.
    pub speed: f64,
    /// Course over ground in degrees.
    pub course: f64,
}

/// GeoChat routing metadata (`__chat`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ChatBlock {
    /// Conversation/thread identifier. Equal to the shared chatroom name for
    /// group chat, or a per-pair thread id for directed chat.
    pub id: String,
    /// Human-readable room name shown by receiving clients.
    pub chatroom: String,
    /// Callsign of the sender.
    pub sender_callsign: String,
    /// Whether the sender owns the chat group.
    pub group_owner: bool,
    /// Per-message identifier, when the sending client provides one.
    pub message_id: Option<String>,
}

/// Chat participant block (`chatgrp`). Directed chat carries both `uid0` and
/// `uid1`; broadcast chat carries only the sender in `uid0`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ChatGroup {
    /// Thread identifier, mirroring [`ChatBlock::id`].
    pub id: String,
    /// First participant uid (the sender).
    pub uid0: Option<String>,
    /// Second participant uid (the counterpart, directed chat only).
    pub uid1: Option<String>,
}

/// Free-text body and its addressing (`remarks`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Remarks {
    /// Sending callsign or source identifier.
    pub source: String,
    /// Destination callsign or chatroom name.
    pub to: String,
    /// Send time as a CoT timestamp.
    pub time: String,
    /// Message text.
    pub text: String,
}

/// Client version advertisement (`takv`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TakVersion {
    /// Device name.
    pub device: String,
    /// Client platform.
    pub platform: String,
    /// Operating system.
    pub os: String,
    /// Client version string.
    pub version: String,
}

impl Default for TakVersion {
    fn default() -> Self {
        Self {
            device: "FieldLink".to_string(),
            platform: "Rust".to_string(),
            os: std::env::consts::OS.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Typed view of the event's `<detail>` bag. Elements this client does not
/// act on are dropped at parse time; the raw type string on the event itself
/// preserves the kind opaquely.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Detail {
    /// Contact callsign (`contact callsign=`).
    pub contact_callsign: Option<String>,
    /// Contact endpoint advertisement (`contact endpoint=`).
    pub contact_endpoint: Option<String>,
    /// Team affiliation.
    pub group: Option<GroupAffiliation>,
    /// Battery percentage (`status battery=`).
    pub status_battery: Option<u32>,
    /// Speed/course telemetry.
    pub track: Option<Track>,
    /// Client version info.
    pub takv: Option<TakVersion>,
    /// Chat routing metadata.
    pub chat: Option<ChatBlock>,
    /// Chat participants.
    pub chat_group: Option<ChatGroup>,
    /// Sender uid from the `link` element.
    pub link_uid: Option<String>,
    /// Message body and addressing.
    pub remarks: Option<Remarks>,
    /// Explicit destination callsigns (`marti/dest`).
    pub marti_dest: Vec<String>,
}

/// One situational event exchanged over the protocol.
///
/// Timestamps are kept in their wire form; [`crate::time::parse_cot_time`]
/// interprets them where ordering matters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CotEvent {
    /// Globally distinguishing identifier. Chat events additionally encode a
    /// message instance (unit id + timestamp + random suffix) so duplicates
    /// compare unequal.
    pub uid: String,
    /// Raw CoT type string, preserved even when unrecognized.
    pub event_type: String,
    /// Classification derived from `event_type`, computed once.
    pub kind: EventKind,
    /// How the event was produced (`m-g`, `h-e`, `h-g-i-g-o`, ...).
    pub how: String,
    /// Event time.
    pub time: String,
    /// Validity window start.
    pub start: String,
    /// Expiry: after this instant the payload must not displace fresher data.
    pub stale: String,
    /// Optional position block.
    pub point: Option<Point>,
    /// Typed detail bag.
    pub detail: Detail,
}

impl CotEvent {
    /// Build a presence event reporting this unit's own status.
    ///
    /// # Arguments
    /// * `uid` - this unit's identifier
    /// * `callsign` - this unit's callsign
    /// * `group` - team affiliation
    /// * `point` - current fix (callers pass sentinel values when no fix yet)
    /// * `battery_pct` - battery percentage
    /// * `track` - speed/course telemetry
    /// * `stale_secs` - validity window length in seconds
    pub fn presence(
        uid: &str,
        callsign: &str,
        group: GroupAffiliation,
        point: Point,
        battery_pct: u32,
        track: Track,
        stale_secs: i64,
    ) -> Self {
        let now = cot_time(0);
        Self {
            uid: uid.to_string(),
            event_type: PRESENCE_EVENT_TYPE.to_string(),
            kind: EventKind::Presence,
            how: "h-e".to_string(),
            time: now.clone(),
            start: now,
            stale: cot_time(stale_secs),
            point: Some(point),
            detail: Detail {
                contact_callsign: Some(callsign.to_string()),
                contact_endpoint: Some("*:-1:stcp".to_string()),
                group: Some(group),
                status_battery: Some(battery_pct),
                track: Some(track),
                takv: Some(TakVersion::default()),
                // Empty chat block advertises the GeoChat connector so other
                // clients offer "start chat" on this unit.
                chat: Some(ChatBlock::default()),
                ..Detail::default()
            },
        }
    }

    /// Build a broadcast chat message addressed to a shared chatroom.
    pub fn broadcast_chat(unit_uid: &str, callsign: &str, chatroom: &str, text: &str) -> Self {
        let now = cot_time(0);
        let uid = message_uid(unit_uid, &now);
        Self::chat_inner(
            uid,
            now,
            ChatBlock {
                id: chatroom.to_string(),
                chatroom: chatroom.to_string(),
                sender_callsign: callsign.to_string(),
                group_owner: false,
                message_id: None,
            },
            ChatGroup {
                id: chatroom.to_string(),
                uid0: Some(unit_uid.to_string()),
                uid1: None,
            },
            unit_uid,
            Remarks {
                source: callsign.to_string(),
                to: chatroom.to_string(),
                time: cot_time(0),
                text: text.to_string(),
            },
            Vec::new(),
        )
    }

    /// Build a directed chat message that the relay addresses to exactly one
    /// counterpart, never the broadcast room.
    pub fn directed_chat(
        unit_uid: &str,
        callsign: &str,
        thread_id: &str,
        peer_uid: &str,
        peer_callsign: &str,
        text: &str,
    ) -> Self {
        let now = cot_time(0);
        let uid = message_uid(unit_uid, &now);
        Self::chat_inner(
            uid,
            now,
            ChatBlock {
                id: thread_id.to_string(),
                chatroom: thread_id.to_string(),
                sender_callsign: callsign.to_string(),
                group_owner: false,
                message_id: None,
            },
            ChatGroup {
                id: thread_id.to_string(),
                uid0: Some(unit_uid.to_string()),
                uid1: Some(peer_uid.to_string()),
            },
            unit_uid,
            Remarks {
                source: callsign.to_string(),
                to: peer_callsign.to_string(),
                time: cot_time(0),
                text: text.to_string(),
            },
            vec![peer_callsign.to_string()],
        )
    }

    /// Build a reply to a directed chat, copying the original's routing block
    /// so it reaches only the original sender.
    ///
    /// Returns `None` when the original lacks the routing fields required for
    /// directed classification (thread id plus both participant uids).
    pub fn directed_reply(original: &CotEvent, my_uid: &str, my_callsign: &str, text: &str) -> Option<Self> {
        let chat = original.detail.chat.as_ref()?;
        let peer_uid = original.counterpart_uid(my_uid)?;
        let peer_callsign = chat.sender_callsign.clone();
        Some(Self::directed_chat(
            my_uid,
            my_callsign,
            &chat.id,
            peer_uid,
            &peer_callsign,
            text,
        ))
    }

    /// For a chat event carrying both participant uids, return the uid that
    /// is not `my_uid`. `None` for broadcast chat or events not involving us.
    pub fn counterpart_uid(&self, my_uid: &str) -> Option<&str> {
        let grp = self.detail.chat_group.as_ref()?;
        let uid0 = grp.uid0.as_deref()?;
        let uid1 = grp.uid1.as_deref()?;
        if uid0 == my_uid {
            Some(uid1)
        } else if uid1 == my_uid {
            Some(uid0)
        } else {
            None
        }
    }

    fn chat_inner(
        uid: String,
        now: String,
        chat: ChatBlock,
        chat_group: ChatGroup,
        link_uid: &str,
        remarks: Remarks,
        marti_dest: Vec<String>,
    ) -> Self {
        Self {
            uid,
            event_type: CHAT_EVENT_TYPE.to_string(),
            kind: EventKind::Chat,
            how: "h-g-i-g-o".to_string(),
            time: now.clone(),
            start: now,
            stale: cot_time(3600),
            point: Some(Point::no_fix()),
            detail: Detail {
                chat: Some(chat),
                chat_group: Some(chat_group),
                link_uid: Some(link_uid.to_string()),
                remarks: Some(remarks),
                marti_dest,
                ..Detail::default()
            },
        }
    }
}

/// Unique uid for one chat message instance: unit id + timestamp + random
/// suffix, so accidental duplicates compare unequal.
fn message_uid(unit_uid: &str, now: &str) -> String {
    format!("{}-{}-{:08x}", unit_uid, now, rand::random::<u32>())
}
