//! CoT timestamp helpers.

use chrono::{DateTime, Duration, SecondsFormat, Utc};

/// Format a timestamp in the CoT wire format (UTC, millisecond precision,
/// trailing `Z`).
pub fn format_cot_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current time plus `offset_secs`, formatted for the wire.
///
/// `cot_time(0)` is used for `time`/`start`; a positive offset produces the
/// `stale` attribute.
pub fn cot_time(offset_secs: i64) -> String {
    format_cot_time(Utc::now() + Duration::seconds(offset_secs))
}

/// Parse a CoT timestamp attribute. Returns `None` for anything that is not
/// a valid RFC 3339 instant; callers treat unparseable stales as "not stale".
pub fn parse_cot_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
