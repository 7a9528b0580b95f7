//! Wire codec for one event frame.
//!
//! The wire form is a framed XML text block terminated by `</event>`. The
//! parser is a tolerant one-pass scanner: it classifies the elements this
//! client acts on and skips everything else, so vendor extensions never
//! break ingestion. Entity escaping is handled in both directions.

use crate::event::{
    ChatBlock, ChatGroup, CotEvent, Detail, EventKind, GroupAffiliation, Point, Remarks,
    TakVersion, Track, UNKNOWN_ERROR_RADIUS,
};
use thiserror::Error;

/// Codec errors. Malformed frames are dropped by callers; the error carries
/// enough context for a debug log.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Frame bytes are not valid UTF-8.
    #[error("frame is not valid UTF-8")]
    NotUtf8,

    /// No `<event>` element found in the frame.
    #[error("no <event> element in frame")]
    MissingEvent,

    /// Structurally broken XML.
    #[error("malformed frame: {0}")]
    Malformed(String),
}

impl CotEvent {
    /// Serialize this event to its framed wire representation.
    pub fn to_xml(&self) -> String {
        let mut out = String::with_capacity(512);
        out.push_str("<event version=\"2.0\"");
        push_attr(&mut out, "uid", &self.uid);
        push_attr(&mut out, "type", &self.event_type);
        push_attr(&mut out, "how", &self.how);
        push_attr(&mut out, "time", &self.time);
        push_attr(&mut out, "start", &self.start);
        push_attr(&mut out, "stale", &self.stale);
        out.push('>');

        if let Some(p) = &self.point {
            out.push_str(&format!(
                "<point lat=\"{}\" lon=\"{}\" hae=\"{}\" ce=\"{}\" le=\"{}\"/>",
                p.lat, p.lon, p.hae, p.ce, p.le
            ));
        }

        out.push_str("<detail>");
        let d = &self.detail;
        if d.contact_callsign.is_some() || d.contact_endpoint.is_some() {
            out.push_str("<contact");
            if let Some(cs) = &d.contact_callsign {
                push_attr(&mut out, "callsign", cs);
            }
            if let Some(ep) = &d.contact_endpoint {
                push_attr(&mut out, "endpoint", ep);
            }
            out.push_str("/>");
        }
        if let Some(g) = &d.group {
            out.push_str("<__group");
            push_attr(&mut out, "name", &g.name);
            push_attr(&mut out, "role", &g.role);
            out.push_str("/>");
        }
        if let Some(b) = d.status_battery {
            out.push_str(&format!("<status battery=\"{}\"/>", b));
        }
        if let Some(t) = &d.takv {
            out.push_str("<takv");
            push_attr(&mut out, "device", &t.device);
            push_attr(&mut out, "platform", &t.platform);
            push_attr(&mut out, "os", &t.os);
            push_attr(&mut out, "version", &t.version);
            out.push_str("/>");
        }
        if let Some(t) = &d.track {
            out.push_str(&format!(
                "<track speed=\"{}\" course=\"{}\"/>",
                t.speed, t.course
            ));
        }
        if let Some(c) = &d.chat {
            if c.id.is_empty() {
                // Bare stub advertising the GeoChat connector.
                out.push_str("<__chat/>");
            } else {
                out.push_str("<__chat");
                push_attr(&mut out, "id", &c.id);
                push_attr(&mut out, "chatroom", &c.chatroom);
                push_attr(&mut out, "senderCallsign", &c.sender_callsign);
                push_attr(&mut out, "groupOwner", if c.group_owner { "true" } else { "false" });
                if let Some(mid) = &c.message_id {
                    push_attr(&mut out, "messageId", mid);
                }
                out.push_str("/>");
            }
        }
        if let Some(g) = &d.chat_group {
            out.push_str("<chatgrp");
            push_attr(&mut out, "id", &g.id);
            if let Some(u0) = &g.uid0 {
                push_attr(&mut out, "uid0", u0);
            }
            if let Some(u1) = &g.uid1 {
                push_attr(&mut out, "uid1", u1);
            }
            out.push_str("/>");
        }
        if let Some(link) = &d.link_uid {
            out.push_str("<link");
            push_attr(&mut out, "uid", link);
            push_attr(&mut out, "type", &self.event_type);
            push_attr(&mut out, "relation", "p-p");
            out.push_str("/>");
        }
        if let Some(r) = &d.remarks {
            out.push_str("<remarks");
            push_attr(&mut out, "source", &r.source);
            push_attr(&mut out, "to", &r.to);
            push_attr(&mut out, "time", &r.time);
            out.push('>');
            out.push_str(&escape_text(&r.text));
            out.push_str("</remarks>");
        }
        if !d.marti_dest.is_empty() {
            out.push_str("<marti>");
            for dest in &d.marti_dest {
                out.push_str("<dest");
                push_attr(&mut out, "callsign", dest);
                out.push_str("/>");
            }
            out.push_str("</marti>");
        }
        out.push_str("</detail></event>");
        out
    }

    /// Parse one framed event. Elements this client does not act on are
    /// skipped without error.
    pub fn parse(bytes: &[u8]) -> Result<Self, CodecError> {
        let text = std::str::from_utf8(bytes).map_err(|_| CodecError::NotUtf8)?;
        let mut scanner = Scanner::new(text);

        let mut event: Option<CotEvent> = None;
        while let Some(tag) = scanner.next_tag()? {
            if tag.closing {
                continue;
            }
            match tag.name {
                "event" => {
                    let uid = tag
                        .attr("uid")
                        .ok_or_else(|| CodecError::Malformed("event without uid".into()))?;
                    let event_type = tag.attr("type").unwrap_or_default();
                    let kind = EventKind::classify(&event_type);
                    event = Some(CotEvent {
                        uid,
                        kind,
                        event_type,
                        how: tag.attr("how").unwrap_or_default(),
                        time: tag.attr("time").unwrap_or_default(),
                        start: tag.attr("start").unwrap_or_default(),
                        stale: tag.attr("stale").unwrap_or_default(),
                        point: None,
                        detail: Detail::default(),
                    });
                }
                _ => {
                    let ev = event.as_mut().ok_or(CodecError::MissingEvent)?;
                    fill_element(ev, &tag, &mut scanner)?;
                }
            }
        }

        event.ok_or(CodecError::MissingEvent)
    }
}

fn fill_element(ev: &mut CotEvent, tag: &Tag<'_>, scanner: &mut Scanner<'_>) -> Result<(), CodecError> {
    let d = &mut ev.detail;
    match tag.name {
        "point" => {
            ev.point = Some(Point {
                lat: tag.num("lat", 0.0),
                lon: tag.num("lon", 0.0),
                hae: tag.num("hae", 0.0),
                ce: tag.num("ce", UNKNOWN_ERROR_RADIUS),
                le: tag.num("le", UNKNOWN_ERROR_RADIUS),
            });
        }
        "contact" => {
            d.contact_callsign = tag.attr("callsign");
            d.contact_endpoint = tag.attr("endpoint");
        }
        "__group" => {
            d.group = Some(GroupAffiliation {
                name: tag.attr("name").unwrap_or_default(),
                role: tag.attr("role").unwrap_or_default(),
            });
        }
        "status" => {
            d.status_battery = tag.attr("battery").and_then(|b| b.parse::<f64>().ok()).map(|b| b as u32);
        }
        "track" => {
            d.track = Some(Track {
                speed: tag.num("speed", 0.0),
                course: tag.num("course", 0.0),
            });
        }
        "takv" => {
            d.takv = Some(TakVersion {
                device: tag.attr("device").unwrap_or_default(),
                platform: tag.attr("platform").unwrap_or_default(),
                os: tag.attr("os").unwrap_or_default(),
                version: tag.attr("version").unwrap_or_default(),
            });
        }
        "__chat" | "chat" => {
            d.chat = Some(ChatBlock {
                id: tag.attr("id").unwrap_or_default(),
                chatroom: tag.attr("chatroom").unwrap_or_default(),
                sender_callsign: tag.attr("senderCallsign").unwrap_or_default(),
                group_owner: tag.attr("groupOwner").as_deref() == Some("true"),
                message_id: tag.attr("messageId"),
            });
        }
        "chatgrp" => {
            d.chat_group = Some(ChatGroup {
                id: tag.attr("id").unwrap_or_default(),
                uid0: tag.attr("uid0"),
                uid1: tag.attr("uid1"),
            });
        }
        "link" => {
            if d.link_uid.is_none() {
                d.link_uid = tag.attr("uid");
            }
        }
        "remarks" => {
            let text = if tag.self_closing {
                String::new()
            } else {
                scanner.read_text()?
            };
            d.remarks = Some(Remarks {
                source: tag.attr("source").unwrap_or_default(),
                to: tag.attr("to").unwrap_or_default(),
                time: tag.attr("time").unwrap_or_default(),
                text,
            });
        }
        "dest" => {
            if let Some(cs) = tag.attr("callsign") {
                d.marti_dest.push(cs);
            }
        }
        // detail, marti, hierarchy, usericon, connectors, precisionlocation,
        // and any vendor extension: structurally skipped.
        _ => {}
    }
    Ok(())
}

struct Tag<'a> {
    name: &'a str,
    attrs: Vec<(&'a str, String)>,
    self_closing: bool,
    closing: bool,
}

impl Tag<'_> {
    fn attr(&self, name: &str) -> Option<String> {
        self.attrs
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.clone())
    }

    fn num(&self, name: &str, default: f64) -> f64 {
        self.attr(name)
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(default)
    }
}

/// One-pass tag scanner. Not a general XML parser: it understands exactly
/// the subset the protocol emits (tags, attributes, element text) and
/// reports anything structurally broken as [`CodecError::Malformed`].
struct Scanner<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn next_tag(&mut self) -> Result<Option<Tag<'a>>, CodecError> {
        let open = match self.rest().find('<') {
            Some(i) => self.pos + i,
            None => return Ok(None),
        };
        self.pos = open + 1;

        if self.rest().starts_with('/') {
            // Closing tag: skip to '>'.
            let end = self
                .rest()
                .find('>')
                .ok_or_else(|| CodecError::Malformed("unterminated closing tag".into()))?;
            let name = self.rest()[1..end].trim();
            let tag = Tag {
                name,
                attrs: Vec::new(),
                self_closing: false,
                closing: true,
            };
            self.pos += end + 1;
            return Ok(Some(tag));
        }

        // Skip processing instructions and comments.
        if self.rest().starts_with('?') || self.rest().starts_with('!') {
            let end = self
                .rest()
                .find('>')
                .ok_or_else(|| CodecError::Malformed("unterminated declaration".into()))?;
            self.pos += end + 1;
            return self.next_tag();
        }

        let name_len = self
            .rest()
            .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
            .ok_or_else(|| CodecError::Malformed("unterminated tag".into()))?;
        if name_len == 0 {
            return Err(CodecError::Malformed("empty tag name".into()));
        }
        let name = &self.rest()[..name_len];
        self.pos += name_len;

        let mut attrs = Vec::new();
        loop {
            let rest = self.rest().trim_start();
            self.pos = self.text.len() - rest.len();
            if rest.starts_with("/>") {
                self.pos += 2;
                return Ok(Some(Tag {
                    name,
                    attrs,
                    self_closing: true,
                    closing: false,
                }));
            }
            if rest.starts_with('>') {
                self.pos += 1;
                return Ok(Some(Tag {
                    name,
                    attrs,
                    self_closing: false,
                    closing: false,
                }));
            }
            if rest.is_empty() {
                return Err(CodecError::Malformed(format!("unterminated <{}>", name)));
            }
            let (attr, consumed) = parse_attr(rest)?;
            attrs.push(attr);
            self.pos += consumed;
        }
    }

    /// Text content between the tag just opened and the next '<'.
    fn read_text(&mut self) -> Result<String, CodecError> {
        let end = self.rest().find('<').unwrap_or(self.rest().len());
        let raw = &self.rest()[..end];
        self.pos += end;
        Ok(unescape(raw))
    }
}

fn parse_attr(rest: &str) -> Result<((&str, String), usize), CodecError> {
    let eq = rest
        .find('=')
        .ok_or_else(|| CodecError::Malformed("attribute without '='".into()))?;
    let name = rest[..eq].trim();
    let after = &rest[eq + 1..];
    let quote = after
        .chars()
        .next()
        .filter(|c| *c == '"' || *c == '\'')
        .ok_or_else(|| CodecError::Malformed("unquoted attribute value".into()))?;
    let value_end = after[1..]
        .find(quote)
        .ok_or_else(|| CodecError::Malformed("unterminated attribute value".into()))?;
    let value = unescape(&after[1..1 + value_end]);
    let consumed = eq + 1 + 1 + value_end + 1;
    Ok(((name, value), consumed))
}

fn push_attr(out: &mut String, name: &str, value: &str) {
    out.push(' ');
    out.push_str(name);
    out.push_str("=\"");
    out.push_str(&escape_attr(value));
    out.push('"');
}

fn escape_attr(s: &str) -> String {
    escape(s, true)
}

fn escape_text(s: &str) -> String {
    escape(s, false)
}

fn escape(s: &str, quotes: bool) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if quotes => out.push_str("&quot;"),
            '\'' if quotes => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

fn unescape(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(i) = rest.find('&') {
        out.push_str(&rest[..i]);
        rest = &rest[i..];
        match rest.find(';') {
            Some(end) => {
                match &rest[..=end] {
                    "&amp;" => out.push('&'),
                    "&lt;" => out.push('<'),
                    "&gt;" => out.push('>'),
                    "&quot;" => out.push('"'),
                    "&apos;" => out.push('\''),
                    other => out.push_str(other),
                }
                rest = &rest[end + 1..];
            }
            None => {
                out.push_str(rest);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventKind, GroupAffiliation, Point, Track};

    #[test]
    fn test_presence_round_trip() {
        let ev = CotEvent::presence(
            "vector6",
            "Vector6",
            GroupAffiliation {
                name: "Cyan".into(),
                role: "Team Member".into(),
            },
            Point::fix(27.95, -81.62, 10.0),
            45,
            Track {
                speed: 20.0,
                course: 102.0,
            },
            75,
        );
        let xml = ev.to_xml();
        assert!(xml.ends_with("</event>"));

        let parsed = CotEvent::parse(xml.as_bytes()).unwrap();
        assert_eq!(parsed.uid, "vector6");
        assert_eq!(parsed.kind, EventKind::Presence);
        assert_eq!(parsed.point, Some(Point::fix(27.95, -81.62, 10.0)));
        assert_eq!(parsed.detail.contact_callsign.as_deref(), Some("Vector6"));
        assert_eq!(parsed.detail.status_battery, Some(45));
        assert_eq!(
            parsed.detail.track,
            Some(Track {
                speed: 20.0,
                course: 102.0
            })
        );
        assert_eq!(parsed.detail.group.as_ref().unwrap().name, "Cyan");
    }

    #[test]
    fn test_chat_round_trip_with_escaping() {
        let ev = CotEvent::broadcast_chat("u1", "CS<1>", "All & Sundry", "a < b && c > \"d\"");
        let parsed = CotEvent::parse(ev.to_xml().as_bytes()).unwrap();
        assert_eq!(parsed.kind, EventKind::Chat);
        let chat = parsed.detail.chat.unwrap();
        assert_eq!(chat.sender_callsign, "CS<1>");
        assert_eq!(chat.id, "All & Sundry");
        assert_eq!(parsed.detail.remarks.unwrap().text, "a < b && c > \"d\"");
    }

    #[test]
    fn test_directed_chat_round_trip() {
        let ev = CotEvent::directed_chat("me", "ME", "ChatThread.me.peer", "peer", "PEER", "hi");
        let parsed = CotEvent::parse(ev.to_xml().as_bytes()).unwrap();
        let grp = parsed.detail.chat_group.unwrap();
        assert_eq!(grp.uid0.as_deref(), Some("me"));
        assert_eq!(grp.uid1.as_deref(), Some("peer"));
        assert_eq!(parsed.detail.marti_dest, vec!["PEER".to_string()]);
        assert_eq!(parsed.detail.link_uid.as_deref(), Some("me"));
    }

    #[test]
    fn test_parses_foreign_client_frame() {
        // Frame shape produced by other field clients, including elements we
        // do not model (hierarchy, usericon, connectors, nested chatgrp).
        let xml = r#"<event version="2.0" type="b-t-f" uid="GeoChat.PEER-1.room.abc"
            how="h-g-i-g-o" time="2025-06-01T12:00:00.000Z"
            start="2025-06-01T12:00:00.000Z" stale="2025-06-01T13:00:00.000Z">
            <point lat="0.0" lon="0.0" hae="9999999.0" ce="9999999.0" le="9999999.0"/>
            <detail>
              <__chat chatroom="TestChat2" groupOwner="false" id="TestChat2" senderCallsign="BOT-1">
                <chatgrp uid0="PEER-1" uid1="TestChat2" id="TestChat2"/>
              </__chat>
              <hierarchy><group uid="Team-Blue" name="Blue"/></hierarchy>
              <usericon iconsetpath="COT_MAPPING_2525B/a-f/a-f-G"/>
              <link uid="PEER-1" type="a-f-G" relation="p-p"/>
              <remarks source="BOT-1" to="TestChat2" time="2025-06-01T12:00:00.000Z">position</remarks>
            </detail></event>"#;
        let ev = CotEvent::parse(xml.as_bytes()).unwrap();
        assert_eq!(ev.kind, EventKind::Chat);
        assert_eq!(ev.detail.chat.as_ref().unwrap().sender_callsign, "BOT-1");
        assert_eq!(
            ev.detail.chat_group.as_ref().unwrap().uid0.as_deref(),
            Some("PEER-1")
        );
        assert_eq!(ev.detail.remarks.as_ref().unwrap().text, "position");
        assert!(ev.point.unwrap().is_sentinel());
    }

    #[test]
    fn test_unrecognized_type_is_preserved_opaquely() {
        let xml = r#"<event version="2.0" type="t-x-c-t" uid="takPong"
            time="t" start="t" stale="t"><point lat="1" lon="2" hae="3" ce="10" le="10"/></event>"#;
        let ev = CotEvent::parse(xml.as_bytes()).unwrap();
        assert_eq!(ev.kind, EventKind::Other);
        assert_eq!(ev.event_type, "t-x-c-t");
    }

    #[test]
    fn test_malformed_frames_are_errors() {
        assert!(matches!(
            CotEvent::parse(b"<point lat=\"1\"/>"),
            Err(CodecError::MissingEvent)
        ));
        assert!(matches!(
            CotEvent::parse(b"<event uid=broken>"),
            Err(CodecError::Malformed(_))
        ));
        assert!(matches!(
            CotEvent::parse(b"\xff\xfe<event/>"),
            Err(CodecError::NotUtf8)
        ));
        assert!(matches!(
            CotEvent::parse(b"plain text, no tags"),
            Err(CodecError::MissingEvent)
        ));
    }

    #[test]
    fn test_event_without_uid_is_malformed() {
        assert!(matches!(
            CotEvent::parse(b"<event type=\"b-t-f\"></event>"),
            Err(CodecError::Malformed(_))
        ));
    }
}
