//! Timestamp normalization and attendance-day bucketing
//!
//! This module is the only place in the crate that performs offset
//! arithmetic. Every component that needs a "local" notion of time goes
//! through [`day_key`] / [`local_hour`]; nothing else may shift instants.
//!
//! An attendance day is defined by the fixed organizational offset, not by
//! the host timezone: the canonical day key for an instant is local midnight
//! of that instant's local calendar date, expressed back as a UTC instant.

use crate::config::NaivePolicy;
use crate::{Error, Result};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

/// Accepted offset-less encodings seen in historical device payloads
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse a heterogeneous timestamp string into an absolute UTC instant.
///
/// Accepted encodings:
/// - RFC 3339 with explicit offset (`2025-01-14T08:02:11+07:00`) or `Z`
/// - The same with a space separator instead of `T`
/// - Offset-less ("naive") date-times, interpreted per `policy`
///
/// # Errors
///
/// [`Error::InvalidTimestamp`] when the string is not a valid date/time at
/// all; [`Error::NaiveTimestampRejected`] when the string is naive and
/// `policy` is [`NaivePolicy::Reject`].
pub fn parse_timestamp(raw: &str, policy: NaivePolicy) -> Result<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidTimestamp(raw.to_string()));
    }

    // Explicit offset (including Z / +00:00): already an absolute instant
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Ok(parsed.with_timezone(&Utc));
    }

    // No offset marker: interpretation is a configured policy, never a guess
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return match policy {
                NaivePolicy::TreatAsUtc => Ok(Utc.from_utc_datetime(&naive)),
                NaivePolicy::Reject => Err(Error::NaiveTimestampRejected(raw.to_string())),
            };
        }
    }

    Err(Error::InvalidTimestamp(raw.to_string()))
}

/// Map an absolute instant to its canonical attendance-day key.
///
/// The key is the UTC instant of 00:00:00 local time on the instant's
/// calendar date under `offset`. Pure and host-timezone independent: the
/// same instant always yields the same key.
pub fn day_key(instant: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    let local_date = instant.with_timezone(&offset).date_naive();
    day_key_for_date(local_date, offset)
}

/// Canonical day key for a local calendar date: local midnight as UTC
pub fn day_key_for_date(local_date: NaiveDate, offset: FixedOffset) -> DateTime<Utc> {
    let local_midnight = local_date.and_time(NaiveTime::MIN);
    let utc_naive = local_midnight - Duration::seconds(offset.local_minus_utc() as i64);
    Utc.from_utc_datetime(&utc_naive)
}

/// Format a day key back into its `YYYY-MM-DD` calendar string
pub fn day_key_to_date(day: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    day.with_timezone(&offset).date_naive()
}

/// Translate a caller-supplied `YYYY-MM-DD` string into a day key
pub fn date_to_day_key(date: &str, offset: FixedOffset) -> Result<DateTime<Utc>> {
    let parsed = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .map_err(|_| Error::InvalidDate(date.to_string()))?;
    Ok(day_key_for_date(parsed, offset))
}

/// Hour of day (0-23) of an instant in the organizational timezone
pub fn local_hour(instant: DateTime<Utc>, offset: FixedOffset) -> u32 {
    use chrono::Timelike;
    instant.with_timezone(&offset).hour()
}

/// Instant to Unix milliseconds (storage representation)
pub fn to_millis(instant: DateTime<Utc>) -> i64 {
    instant.timestamp_millis()
}

/// Unix milliseconds back to an instant.
///
/// Saturates at the chrono range limits; values outside them can only come
/// from a hand-edited database.
pub fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plus_seven() -> FixedOffset {
        FixedOffset::east_opt(7 * 3600).unwrap()
    }

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_parse_explicit_org_offset() {
        let parsed = parse_timestamp("2025-01-14T08:02:11+07:00", NaivePolicy::TreatAsUtc).unwrap();
        assert_eq!(parsed, utc("2025-01-14T01:02:11Z"));
    }

    #[test]
    fn test_parse_zulu() {
        let parsed = parse_timestamp("2025-01-14T08:02:11Z", NaivePolicy::TreatAsUtc).unwrap();
        assert_eq!(parsed, utc("2025-01-14T08:02:11Z"));
    }

    #[test]
    fn test_parse_zero_offset() {
        let parsed = parse_timestamp("2025-01-14T08:02:11+00:00", NaivePolicy::TreatAsUtc).unwrap();
        assert_eq!(parsed, utc("2025-01-14T08:02:11Z"));
    }

    #[test]
    fn test_parse_foreign_offset_shifts() {
        let parsed = parse_timestamp("2025-01-14T08:02:11-05:00", NaivePolicy::TreatAsUtc).unwrap();
        assert_eq!(parsed, utc("2025-01-14T13:02:11Z"));
    }

    #[test]
    fn test_parse_naive_as_utc() {
        let parsed = parse_timestamp("2025-01-14T08:02:11", NaivePolicy::TreatAsUtc).unwrap();
        assert_eq!(parsed, utc("2025-01-14T08:02:11Z"));
    }

    #[test]
    fn test_parse_naive_space_separator() {
        let parsed = parse_timestamp("2025-01-14 08:02:11.250", NaivePolicy::TreatAsUtc).unwrap();
        assert_eq!(parsed, utc("2025-01-14T08:02:11.250Z"));
    }

    #[test]
    fn test_parse_naive_rejected_by_policy() {
        let result = parse_timestamp("2025-01-14T08:02:11", NaivePolicy::Reject);
        assert!(matches!(result, Err(Error::NaiveTimestampRejected(_))));
    }

    #[test]
    fn test_reject_policy_still_accepts_explicit_offsets() {
        let parsed = parse_timestamp("2025-01-14T08:02:11+07:00", NaivePolicy::Reject).unwrap();
        assert_eq!(parsed, utc("2025-01-14T01:02:11Z"));
    }

    #[test]
    fn test_parse_garbage_fails() {
        for bad in ["", "   ", "not-a-time", "2025-13-40T99:99:99Z", "1736844131"] {
            let result = parse_timestamp(bad, NaivePolicy::TreatAsUtc);
            assert!(result.is_err(), "should reject {bad:?}");
        }
    }

    #[test]
    fn test_day_key_evening_and_morning_share_a_day() {
        // 17:00Z on Jan 14 is 00:00+07 on Jan 15; 01:00Z on Jan 15 is 08:00+07
        let evening = day_key(utc("2025-01-14T17:00:00Z"), plus_seven());
        let morning = day_key(utc("2025-01-15T01:00:00Z"), plus_seven());
        assert_eq!(evening, morning);
        assert_eq!(evening, utc("2025-01-14T17:00:00Z"));
    }

    #[test]
    fn test_day_key_just_before_local_midnight() {
        let late = day_key(utc("2025-01-14T16:59:59Z"), plus_seven());
        assert_eq!(late, utc("2025-01-13T17:00:00Z"));
        assert_eq!(day_key_to_date(late, plus_seven()).to_string(), "2025-01-14");
    }

    #[test]
    fn test_day_key_is_idempotent() {
        let key = day_key(utc("2025-01-15T01:00:00Z"), plus_seven());
        assert_eq!(day_key(key, plus_seven()), key);
    }

    #[test]
    fn test_date_string_round_trip() {
        let key = date_to_day_key("2025-01-15", plus_seven()).unwrap();
        assert_eq!(key, utc("2025-01-14T17:00:00Z"));
        assert_eq!(day_key_to_date(key, plus_seven()).to_string(), "2025-01-15");
    }

    #[test]
    fn test_date_string_invalid() {
        assert!(matches!(
            date_to_day_key("15/01/2025", plus_seven()),
            Err(Error::InvalidDate(_))
        ));
        assert!(date_to_day_key("2025-02-30", plus_seven()).is_err());
    }

    #[test]
    fn test_local_hour() {
        assert_eq!(local_hour(utc("2025-01-15T01:00:00Z"), plus_seven()), 8);
        assert_eq!(local_hour(utc("2025-01-14T17:00:00Z"), plus_seven()), 0);
    }

    #[test]
    fn test_millis_round_trip() {
        let instant = utc("2025-01-14T08:02:11.123Z");
        assert_eq!(from_millis(to_millis(instant)), instant);
    }
}
