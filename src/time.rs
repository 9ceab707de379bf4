//! Millisecond wall-clock helpers shared by the proxy and the processor.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::types::DateTimeMillis;

/// Current wall clock, floored to millisecond precision.
pub fn now_millis() -> DateTimeMillis {
    Utc::now().timestamp_millis()
}

/// Render a timestamp as ISO-8601 UTC with exactly three fractional digits,
/// e.g. `2025-01-02T03:04:05.123Z`, the format the upstream processors
/// expect in `requestedAt`.
pub fn format_rfc3339_millis(millis: DateTimeMillis) -> String {
    match DateTime::<Utc>::from_timestamp_millis(millis) {
        Some(datetime) => datetime.to_rfc3339_opts(SecondsFormat::Millis, true),
        None => String::new(),
    }
}

/// Parse an ISO-8601 instant into epoch milliseconds. `None` on anything
/// unparseable; the caller turns that into a 400.
pub fn parse_rfc3339_millis(value: &str) -> Option<DateTimeMillis> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|datetime| datetime.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_has_three_fractional_digits() {
        assert_eq!(format_rfc3339_millis(0), "1970-01-01T00:00:00.000Z");
        assert_eq!(format_rfc3339_millis(1735787045123), "2025-01-02T03:04:05.123Z");
    }

    #[test]
    fn parse_round_trips_format() {
        let millis = 1735787045123;
        assert_eq!(
            parse_rfc3339_millis(&format_rfc3339_millis(millis)),
            Some(millis)
        );
    }

    #[test]
    fn parse_accepts_offsets_and_rejects_garbage() {
        assert_eq!(
            parse_rfc3339_millis("1970-01-01T01:00:00+01:00"),
            Some(0)
        );
        assert_eq!(parse_rfc3339_millis("not-a-date"), None);
        assert_eq!(parse_rfc3339_millis(""), None);
    }
}
