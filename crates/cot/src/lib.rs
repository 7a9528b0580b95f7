//! Cursor-on-Target event model, wire codec and stream framing for FieldLink.
//!
//! This crate is the leaf protocol layer: it knows how to represent one
//! situational event, turn it into its framed wire form, split a byte stream
//! back into frames, and parse a frame into the typed model. It has no
//! knowledge of transports or sessions.

pub mod codec;
pub mod event;
pub mod framing;
pub mod time;

pub use codec::CodecError;
pub use event::{
    ChatBlock, ChatGroup, CotEvent, Detail, EventKind, GroupAffiliation, Point, Remarks,
    TakVersion, Track, CHAT_EVENT_TYPE, DEFAULT_ERROR_RADIUS, PRESENCE_EVENT_TYPE,
    UNKNOWN_ERROR_RADIUS, UNKNOWN_HAE,
};
pub use framing::{FrameBuffer, FRAME_DELIMITER};
pub use time::{cot_time, format_cot_time, parse_cot_time};
