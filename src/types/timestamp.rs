//! ISO-8601 timestamp handling

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

use crate::{Result, SyncError};

/// Parse an ISO-8601 timestamp as emitted by the backend.
///
/// Accepts RFC 3339 with an offset (`2025-09-11T12:34:56.123Z`) and the naive
/// form without one (`2025-09-11T12:34:56.123456`), which is taken as UTC.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    let trimmed = value.trim();

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| SyncError::ClockParse { value: value.to_string(), details: e.to_string() })
}

/// Format a timestamp the way the backend does: UTC, milliseconds, `Z` suffix.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
