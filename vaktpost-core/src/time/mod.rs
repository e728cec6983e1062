//! ## vaktpost-core::time
//! **Wire timestamps**
//!
//! Capture stamps records as `<datetime> <+hhmm> <zone>`, e.g.
//! `2024-05-01 10:00:00.123456789 +0000 UTC`. The verdict service strips the
//! offset and zone with a regex, parses the remainder with the configured
//! layout and applies the offset to obtain UTC. A parser built with
//! [`TimestampParser::wall_clock`] instead drops the offset and reads the
//! datetime as UTC, which keeps log entries on the capture host's local clock.

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;

use crate::error::CoreError;

/// Default layout (chrono syntax) for the datetime part of a wire timestamp.
pub const DEFAULT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

lazy_static! {
    static ref WIRE_TIME: Regex =
        Regex::new(r"^(.+?)\s+([+-]\d{4})\s+(\w+)\s*").expect("wire time pattern is valid");
}

/// Formats `time` the way capture puts it on the wire.
pub fn format_wire(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%d %H:%M:%S%.9f +0000 UTC").to_string()
}

/// Parses wire timestamps with a fixed, configured layout.
#[derive(Debug, Clone)]
pub struct TimestampParser {
    layout: String,
    apply_offset: bool,
}

impl Default for TimestampParser {
    fn default() -> Self {
        Self::new(DEFAULT_TIME_FORMAT)
    }
}

impl TimestampParser {
    pub fn new(layout: impl Into<String>) -> Self {
        Self {
            layout: layout.into(),
            apply_offset: true,
        }
    }

    /// Ignore the wire offset and keep the datetime as written.
    pub fn wall_clock(mut self) -> Self {
        self.apply_offset = false;
        self
    }

    pub fn layout(&self) -> &str {
        &self.layout
    }

    pub fn parse(&self, raw: &str) -> Result<DateTime<Utc>, CoreError> {
        let fail = |reason: String| CoreError::Timestamp {
            value: raw.to_string(),
            reason,
        };

        let caps = WIRE_TIME
            .captures(raw)
            .ok_or_else(|| fail("missing '<+hhmm> <zone>' suffix".into()))?;

        let naive = NaiveDateTime::parse_from_str(&caps[1], &self.layout)
            .map_err(|e| fail(format!("does not match layout '{}': {e}", self.layout)))?;

        let offset = parse_offset(&caps[2]).ok_or_else(|| fail("offset out of range".into()))?;
        if !self.apply_offset {
            return Ok(naive.and_utc());
        }

        offset
            .from_local_datetime(&naive)
            .single()
            .map(|t| t.with_timezone(&Utc))
            .ok_or_else(|| fail("ambiguous local time".into()))
    }
}

/// `+hhmm` / `-hhmm` to a fixed offset.
fn parse_offset(raw: &str) -> Option<FixedOffset> {
    let (sign, digits) = match raw.split_at(1) {
        ("+", d) => (1, d),
        ("-", d) => (-1, d),
        _ => return None,
    };
    let hours: i32 = digits.get(0..2)?.parse().ok()?;
    let minutes: i32 = digits.get(2..4)?.parse().ok()?;
    if minutes >= 60 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn parses_wire_time_with_nanoseconds() {
        let parser = TimestampParser::default();
        let t = parser
            .parse("2024-05-01 10:11:12.123456789 +0000 UTC m=+0.001")
            .unwrap();
        assert_eq!(t.to_rfc3339(), "2024-05-01T10:11:12.123456789+00:00");
    }

    #[test]
    fn applies_offset() {
        let parser = TimestampParser::default();
        let t = parser.parse("2024-05-01 12:00:00 +0200 CEST").unwrap();
        assert_eq!(t.hour(), 10);
    }

    #[test]
    fn wall_clock_keeps_the_written_time() {
        let parser = TimestampParser::default().wall_clock();
        let t = parser.parse("2024-05-01 12:00:00 +0200 CEST").unwrap();
        assert_eq!(t.to_rfc3339(), "2024-05-01T12:00:00+00:00");
        assert!(parser.parse("2024-05-01 12:00:00 +9900 XX").is_err());
    }

    #[test]
    fn round_trips_format_wire() {
        let now = Utc::now();
        let parsed = TimestampParser::default().parse(&format_wire(now)).unwrap();
        assert_eq!(parsed, now);
    }

    #[test]
    fn rejects_missing_suffix() {
        let err = TimestampParser::default()
            .parse("2024-05-01 10:11:12")
            .unwrap_err();
        assert!(matches!(err, CoreError::Timestamp { .. }));
    }

    #[test]
    fn rejects_layout_mismatch() {
        let parser = TimestampParser::new("%d/%m/%Y %H:%M");
        assert!(parser.parse("2024-05-01 10:11:12 +0000 UTC").is_err());
        assert!(parser.parse("01/05/2024 10:11 +0000 UTC").is_ok());
    }
}
