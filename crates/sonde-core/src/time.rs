//! Time helpers shared across the hub.

use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::HubError;

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// Returns 0 if the system clock is before the epoch, which should never
/// happen on a modern host but is handled gracefully rather than panicking.
pub fn current_timestamp_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// Current time formatted as RFC3339/ISO-8601 with millisecond precision,
/// the storage format spec.md §4.A mandates for all time columns.
pub fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored ISO-8601 timestamp back into a `DateTime<Utc>`.
pub fn parse_iso8601(value: &str) -> Result<DateTime<Utc>, HubError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| HubError::Internal(format!("invalid timestamp '{value}': {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso8601_round_trips() {
        let formatted = now_iso8601();
        let parsed = parse_iso8601(&formatted).expect("parses");
        assert!(parsed.timestamp_millis() > 0);
    }

    #[test]
    fn rejects_malformed_timestamp() {
        assert!(parse_iso8601("not-a-time").is_err());
    }

    #[test]
    fn millis_are_after_2020() {
        assert!(current_timestamp_millis() > 1_577_836_800_000);
    }
}
