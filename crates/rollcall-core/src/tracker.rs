use crate::types::MatchResult;
use std::collections::HashSet;

/// A first-time attendance mark, handed to the persistence sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceMark {
    pub person_id: String,
    pub label: String,
}

/// Per-session attendance state.
///
/// Each person moves from not-seen to seen on their first known match and
/// stays seen until the session ends; repeat matches are no-ops. Keyed by
/// the stable person id, so two people sharing a display label are still
/// recorded separately.
#[derive(Debug, Default)]
pub struct SessionTracker {
    seen: HashSet<String>,
    entries: Vec<String>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a match result. Returns a mark only on the first sighting
    /// of a known person; unknown results and repeats change nothing.
    pub fn record(&mut self, result: &MatchResult) -> Option<AttendanceMark> {
        let MatchResult::Match {
            person_id, label, ..
        } = result
        else {
            return None;
        };

        if !self.seen.insert(person_id.clone()) {
            return None;
        }

        self.entries
            .push(format!("Attendance added successfully for {label}"));

        Some(AttendanceMark {
            person_id: person_id.clone(),
            label: label.clone(),
        })
    }

    pub fn is_seen(&self, person_id: &str) -> bool {
        self.seen.contains(person_id)
    }

    pub fn seen(&self) -> &HashSet<String> {
        &self.seen
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    /// Append-only, human-readable log entries, one per first sighting.
    pub fn entries(&self) -> &[String] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known(person_id: &str, label: &str) -> MatchResult {
        MatchResult::Match {
            person_id: person_id.into(),
            label: label.into(),
            distance: 0.1,
        }
    }

    #[test]
    fn test_first_sighting_produces_one_mark_and_entry() {
        let mut tracker = SessionTracker::new();
        let mark = tracker.record(&known("p1", "Ana")).unwrap();

        assert_eq!(mark.person_id, "p1");
        assert_eq!(mark.label, "Ana");
        assert_eq!(
            tracker.entries(),
            ["Attendance added successfully for Ana"]
        );
        assert!(tracker.is_seen("p1"));
    }

    #[test]
    fn test_recording_is_idempotent() {
        let mut tracker = SessionTracker::new();
        assert!(tracker.record(&known("p1", "Ana")).is_some());
        assert!(tracker.record(&known("p1", "Ana")).is_none());

        assert_eq!(tracker.entries().len(), 1);
        assert_eq!(tracker.seen_count(), 1);
    }

    #[test]
    fn test_unknown_is_never_recorded() {
        let mut tracker = SessionTracker::new();
        let unknown = MatchResult::Unknown {
            distance: Some(0.9),
        };

        assert!(tracker.record(&unknown).is_none());
        assert!(tracker.entries().is_empty());
        assert_eq!(tracker.seen_count(), 0);
    }

    #[test]
    fn test_rapid_repeats_still_record_once() {
        // Multiple ticks per second, multiple faces per tick.
        let mut tracker = SessionTracker::new();
        for _ in 0..50 {
            tracker.record(&known("p1", "Ana"));
            tracker.record(&known("p2", "Bea"));
        }

        assert_eq!(tracker.seen_count(), 2);
        assert_eq!(tracker.entries().len(), 2);
    }

    #[test]
    fn test_shared_label_distinct_ids_both_recorded() {
        let mut tracker = SessionTracker::new();
        assert!(tracker.record(&known("p1", "Ana")).is_some());
        assert!(tracker.record(&known("p2", "Ana")).is_some());

        assert_eq!(tracker.seen_count(), 2);
        assert_eq!(tracker.entries().len(), 2);
    }

    #[test]
    fn test_entries_preserve_sighting_order() {
        let mut tracker = SessionTracker::new();
        tracker.record(&known("p2", "Bea"));
        tracker.record(&known("p1", "Ana"));

        assert_eq!(
            tracker.entries(),
            [
                "Attendance added successfully for Bea",
                "Attendance added successfully for Ana",
            ]
        );
    }
}
