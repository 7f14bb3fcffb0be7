//! Near-duplicate suppression for device retries
//!
//! Devices retry webhook delivery and fire multiple pings for one badge
//! swipe. Two pings from the same device closer together than the dedup
//! window are one attendance event. Pings from different devices are always
//! independent, however close: an employee badging the door reader and the
//! turnstile one second apart is two real events.
//!
//! The window is an open boundary: exactly `window` apart is NOT a
//! duplicate. Pinned by tests; changing this silently would reclassify
//! historical data.

use crate::model::RawEvent;
use chrono::Duration;

/// True if `candidate` duplicates any event already in `existing`
pub fn is_duplicate(existing: &[RawEvent], candidate: &RawEvent, window: Duration) -> bool {
    existing.iter().any(|event| {
        event.device_id == candidate.device_id
            && (candidate.instant - event.instant).abs() < window
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn event(instant: &str, device: Option<&str>) -> RawEvent {
        RawEvent {
            instant: DateTime::parse_from_rfc3339(instant)
                .unwrap()
                .with_timezone(&Utc),
            device_id: device.map(String::from),
            ingested_at: Utc::now(),
        }
    }

    fn window() -> Duration {
        Duration::seconds(30)
    }

    #[test]
    fn test_same_device_29_9s_apart_is_duplicate() {
        let existing = vec![event("2025-01-15T08:00:00.000Z", Some("dev-a"))];
        let candidate = event("2025-01-15T08:00:29.900Z", Some("dev-a"));
        assert!(is_duplicate(&existing, &candidate, window()));
    }

    #[test]
    fn test_exactly_30s_apart_is_not_duplicate() {
        // Open boundary: |delta| < 30s, not <=
        let existing = vec![event("2025-01-15T08:00:00.000Z", Some("dev-a"))];
        let candidate = event("2025-01-15T08:00:30.000Z", Some("dev-a"));
        assert!(!is_duplicate(&existing, &candidate, window()));
    }

    #[test]
    fn test_same_device_30_1s_apart_is_not_duplicate() {
        let existing = vec![event("2025-01-15T08:00:00.000Z", Some("dev-a"))];
        let candidate = event("2025-01-15T08:00:30.100Z", Some("dev-a"));
        assert!(!is_duplicate(&existing, &candidate, window()));
    }

    #[test]
    fn test_different_devices_1s_apart_both_accepted() {
        let existing = vec![event("2025-01-15T08:00:00Z", Some("dev-a"))];
        let candidate = event("2025-01-15T08:00:01Z", Some("dev-b"));
        assert!(!is_duplicate(&existing, &candidate, window()));
    }

    #[test]
    fn test_candidate_earlier_than_existing_still_matches() {
        let existing = vec![event("2025-01-15T08:00:29Z", Some("dev-a"))];
        let candidate = event("2025-01-15T08:00:00Z", Some("dev-a"));
        assert!(is_duplicate(&existing, &candidate, window()));
    }

    #[test]
    fn test_unknown_device_matches_unknown_device() {
        // Payloads without a device id are treated as the same source
        let existing = vec![event("2025-01-15T08:00:00Z", None)];
        let candidate = event("2025-01-15T08:00:05Z", None);
        assert!(is_duplicate(&existing, &candidate, window()));
    }

    #[test]
    fn test_duplicate_against_any_existing_event() {
        let existing = vec![
            event("2025-01-15T08:00:00Z", Some("dev-a")),
            event("2025-01-15T17:45:00Z", Some("dev-a")),
        ];
        let candidate = event("2025-01-15T17:45:10Z", Some("dev-a"));
        assert!(is_duplicate(&existing, &candidate, window()));
    }
}
