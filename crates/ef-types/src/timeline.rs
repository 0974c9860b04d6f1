use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::title::TitleId;

/// A single chronologically-placed entry in an Event Family's timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    /// When the described development happened.
    pub timestamp: DateTime<Utc>,
    /// Prose description of the development.
    pub description: String,
    /// Titles this entry is sourced from. Must be a subset of the owning
    /// Event Family's `title_id_set` (spec §4.3 step 4).
    pub source_title_ids: Vec<TitleId>,
}

impl TimelineEntry {
    /// Construct a new timeline entry.
    pub fn new(
        timestamp: DateTime<Utc>,
        description: impl Into<String>,
        source_title_ids: Vec<TitleId>,
    ) -> Self {
        Self {
            timestamp,
            description: description.into(),
            source_title_ids,
        }
    }
}

/// Sort a timeline ascending by timestamp, stably (spec §3 I7, §4.3 step 4).
pub fn sort_ascending(entries: &mut [TimelineEntry]) {
    entries.sort_by_key(|e| e.timestamp);
}

/// Whether a timeline's timestamps are non-decreasing (spec §3 invariant I7).
pub fn is_monotonic(entries: &[TimelineEntry]) -> bool {
    entries.windows(2).all(|w| w[0].timestamp <= w[1].timestamp)
}

/// Stable-merge two already-sorted timelines by timestamp, deduplicating
/// entries whose `(timestamp, description)` pair is identical (spec §4.5
/// merge operation, `timeline` field).
pub fn merge_sorted(a: Vec<TimelineEntry>, b: Vec<TimelineEntry>) -> Vec<TimelineEntry> {
    let mut merged = Vec::with_capacity(a.len() + b.len());
    let mut ai = a.into_iter().peekable();
    let mut bi = b.into_iter().peekable();

    loop {
        match (ai.peek(), bi.peek()) {
            (Some(x), Some(y)) => {
                if x.timestamp <= y.timestamp {
                    merged.push(ai.next().unwrap());
                } else {
                    merged.push(bi.next().unwrap());
                }
            }
            (Some(_), None) => merged.push(ai.next().unwrap()),
            (None, Some(_)) => merged.push(bi.next().unwrap()),
            (None, None) => break,
        }
    }

    dedup_by_timestamp_and_description(merged)
}

fn dedup_by_timestamp_and_description(entries: Vec<TimelineEntry>) -> Vec<TimelineEntry> {
    let mut seen = std::collections::HashSet::with_capacity(entries.len());
    let mut out: Vec<TimelineEntry> = Vec::with_capacity(entries.len());
    for entry in entries {
        let key = (entry.timestamp, entry.description.clone());
        if seen.insert(key) {
            out.push(entry);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(h: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + h * 3600, 0).unwrap()
    }

    fn entry(h: i64, desc: &str) -> TimelineEntry {
        TimelineEntry::new(ts(h), desc, vec!["t1".into()])
    }

    #[test]
    fn sort_ascending_orders_by_timestamp() {
        let mut entries = vec![entry(3, "c"), entry(1, "a"), entry(2, "b")];
        sort_ascending(&mut entries);
        assert!(is_monotonic(&entries));
        assert_eq!(entries[0].description, "a");
        assert_eq!(entries[2].description, "c");
    }

    #[test]
    fn empty_and_singleton_timelines_are_monotonic() {
        assert!(is_monotonic(&[]));
        assert!(is_monotonic(&[entry(1, "a")]));
    }

    #[test]
    fn merge_sorted_interleaves_two_ordered_timelines() {
        let a = vec![entry(1, "a"), entry(3, "c")];
        let b = vec![entry(2, "b"), entry(4, "d")];
        let merged = merge_sorted(a, b);
        let descs: Vec<_> = merged.iter().map(|e| e.description.as_str()).collect();
        assert_eq!(descs, vec!["a", "b", "c", "d"]);
        assert!(is_monotonic(&merged));
    }

    #[test]
    fn merge_sorted_deduplicates_identical_entries() {
        let a = vec![entry(1, "same")];
        let b = vec![entry(1, "same"), entry(2, "other")];
        let merged = merge_sorted(a, b);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn merge_sorted_keeps_same_timestamp_different_description() {
        let a = vec![entry(1, "alpha")];
        let b = vec![entry(1, "beta")];
        let merged = merge_sorted(a, b);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn merge_sorted_dedups_even_when_not_adjacent() {
        let a = vec![entry(1, "same")];
        let b = vec![entry(1, "x"), entry(1, "same")];
        let merged = merge_sorted(a, b);
        let count = merged.iter().filter(|e| e.description == "same").count();
        assert_eq!(count, 1);
    }
}
