//! Check-in/check-out boundary classification
//!
//! Two policies exist. [`MinMax`] is the canonical one: the day's check-in
//! is the earliest accepted ping and the check-out the latest. It is
//! idempotent and commutative, which is what makes the repair path safe to
//! re-run. [`HourHeuristic`] reproduces the legacy hour-of-day behavior and
//! is order-dependent; it exists so historical data can be regenerated in
//! tests and then converged through repair. New writes never use it.

use crate::model::RawEvent;
use crate::time;
use chrono::{DateTime, FixedOffset, Utc};

/// Derived day boundaries, both nullable until the first event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Boundaries {
    pub check_in: Option<DateTime<Utc>>,
    pub check_out: Option<DateTime<Utc>>,
}

impl Boundaries {
    /// Swap the boundaries if classification left them inverted
    fn normalized(self) -> Self {
        match (self.check_in, self.check_out) {
            (Some(check_in), Some(check_out)) if check_in > check_out => Self {
                check_in: Some(check_out),
                check_out: Some(check_in),
            },
            _ => self,
        }
    }
}

/// Strategy seam between the canonical and the legacy classification
pub trait BoundaryPolicy {
    /// Fold one event into the current boundaries
    fn apply(&self, current: Boundaries, event: &RawEvent) -> Boundaries;

    /// Derive boundaries from a full event set
    fn recompute(&self, events: &[RawEvent]) -> Boundaries {
        events
            .iter()
            .fold(Boundaries::default(), |acc, event| self.apply(acc, event))
    }
}

/// Canonical policy: check-in = min instant, check-out = max instant
pub struct MinMax;

impl BoundaryPolicy for MinMax {
    fn apply(&self, current: Boundaries, event: &RawEvent) -> Boundaries {
        let check_in = match current.check_in {
            Some(existing) => Some(existing.min(event.instant)),
            None => Some(event.instant),
        };
        let check_out = match current.check_out {
            Some(existing) => Some(existing.max(event.instant)),
            None => Some(event.instant),
        };
        Boundaries {
            check_in,
            check_out,
        }
    }
}

/// Legacy policy: classify by local hour of day, then nudge boundaries.
///
/// Morning pings (local hour 6-12) only ever move the check-in earlier,
/// evening pings (15-22) only move the check-out later; anything else
/// overwrites whichever boundary it is numerically closer to. Reapplying
/// this to the same events in a different order can produce different
/// results, which is exactly why it was retired.
pub struct HourHeuristic {
    offset: FixedOffset,
}

impl HourHeuristic {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }
}

impl BoundaryPolicy for HourHeuristic {
    fn apply(&self, current: Boundaries, event: &RawEvent) -> Boundaries {
        let hour = time::local_hour(event.instant, self.offset);
        let instant = event.instant;

        let mut next = current;
        if (6..=12).contains(&hour)
            && current.check_in.map_or(true, |check_in| instant < check_in)
        {
            next.check_in = Some(instant);
        } else if (15..=22).contains(&hour)
            && current
                .check_out
                .map_or(true, |check_out| instant > check_out)
        {
            next.check_out = Some(instant);
        } else {
            // Assign to the nearer boundary; unset boundaries attract first
            match (current.check_in, current.check_out) {
                (None, _) => next.check_in = Some(instant),
                (_, None) => next.check_out = Some(instant),
                (Some(check_in), Some(check_out)) => {
                    let to_in = (instant - check_in).abs();
                    let to_out = (instant - check_out).abs();
                    if to_in <= to_out {
                        next.check_in = Some(instant);
                    } else {
                        next.check_out = Some(instant);
                    }
                }
            }
        }
        next.normalized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(instant: &str) -> RawEvent {
        RawEvent {
            instant: DateTime::parse_from_rfc3339(instant)
                .unwrap()
                .with_timezone(&Utc),
            device_id: Some("dev-a".to_string()),
            ingested_at: Utc::now(),
        }
    }

    fn plus_seven() -> FixedOffset {
        FixedOffset::east_opt(7 * 3600).unwrap()
    }

    #[test]
    fn test_minmax_single_event_sets_both_boundaries() {
        let bounds = MinMax.recompute(&[event("2025-01-15T01:02:11Z")]);
        assert_eq!(bounds.check_in, bounds.check_out);
        assert!(bounds.check_in.is_some());
    }

    #[test]
    fn test_minmax_order_independent() {
        let events = vec![
            event("2025-01-15T10:45:00Z"),
            event("2025-01-15T01:02:11Z"),
            event("2025-01-15T05:30:00Z"),
        ];

        let expected = MinMax.recompute(&events);
        assert_eq!(expected.check_in, Some(events[1].instant));
        assert_eq!(expected.check_out, Some(events[0].instant));

        // Every permutation of a three-event set
        let permutations: [[usize; 3]; 6] = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        for perm in permutations {
            let shuffled: Vec<RawEvent> = perm.iter().map(|&i| events[i].clone()).collect();
            assert_eq!(MinMax.recompute(&shuffled), expected);
        }
    }

    #[test]
    fn test_minmax_idempotent_reapply() {
        let events = vec![event("2025-01-15T01:02:11Z"), event("2025-01-15T10:45:00Z")];
        let once = MinMax.recompute(&events);
        let twice = events.iter().fold(once, |acc, e| MinMax.apply(acc, e));
        assert_eq!(once, twice);
    }

    #[test]
    fn test_minmax_empty_set_leaves_boundaries_null() {
        assert_eq!(MinMax.recompute(&[]), Boundaries::default());
    }

    #[test]
    fn test_heuristic_morning_ping_sets_check_in() {
        // 08:02 local (+07) = 01:02Z
        let policy = HourHeuristic::new(plus_seven());
        let bounds = policy.apply(Boundaries::default(), &event("2025-01-15T01:02:11Z"));
        assert_eq!(bounds.check_in, Some(event("2025-01-15T01:02:11Z").instant));
        assert_eq!(bounds.check_out, None);
    }

    #[test]
    fn test_heuristic_evening_ping_sets_check_out() {
        // 17:45 local = 10:45Z
        let policy = HourHeuristic::new(plus_seven());
        let bounds = policy.apply(Boundaries::default(), &event("2025-01-15T10:45:00Z"));
        assert_eq!(bounds.check_in, None);
        assert_eq!(bounds.check_out, Some(event("2025-01-15T10:45:00Z").instant));
    }

    #[test]
    fn test_heuristic_never_leaves_inverted_boundaries() {
        // Both pings fall outside the hour bands (14:00 and 13:30 local).
        // The first lands on check_in, the second on check_out, leaving the
        // pair inverted until the normalization swap runs.
        let policy = HourHeuristic::new(plus_seven());
        let bounds = policy.recompute(&[
            event("2025-01-15T07:00:00Z"),
            event("2025-01-15T06:30:00Z"),
        ]);
        assert_eq!(bounds.check_in, Some(event("2025-01-15T06:30:00Z").instant));
        assert_eq!(bounds.check_out, Some(event("2025-01-15T07:00:00Z").instant));
    }

    #[test]
    fn test_heuristic_is_order_dependent() {
        // The documented defect that motivated retiring this policy: two
        // morning-band pings (08:00 and 09:00 local). In arrival order the
        // later one falls through to the check_out slot; reversed, it is
        // displaced by the earlier ping and check_out stays unset.
        let policy = HourHeuristic::new(plus_seven());
        let forward = policy.recompute(&[
            event("2025-01-15T01:00:00Z"),
            event("2025-01-15T02:00:00Z"),
        ]);
        let backward = policy.recompute(&[
            event("2025-01-15T02:00:00Z"),
            event("2025-01-15T01:00:00Z"),
        ]);
        assert_eq!(forward.check_out, Some(event("2025-01-15T02:00:00Z").instant));
        assert_eq!(backward.check_out, None);
        assert_ne!(forward, backward);
    }
}
