use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::ef_key::EfKey;
use crate::timeline::TimelineEntry;
use crate::title::TitleId;
use crate::EfId;

/// Lifecycle status of an Event Family (spec §3).
///
/// `merged_into` pointers form a forest (invariant I5): following them
/// terminates at an `Active` EF. Nothing in this core deletes an EF; it is
/// only ever retired by being merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EventFamilyStatus {
    /// The EF is live and may absorb further merges.
    Active,
    /// The EF was folded into another EF, identified by `ef_id`.
    MergedInto {
        /// The surviving EF's id.
        ef_id: EfId,
    },
}

impl EventFamilyStatus {
    /// Whether this status is `Active`.
    pub fn is_active(&self) -> bool {
        matches!(self, EventFamilyStatus::Active)
    }
}

/// One entry in an Event Family's `lineage`: a record that another EF (or
/// run-local candidate) was folded into this one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeRecord {
    /// The id of the EF that was merged in, if it had already been persisted.
    /// `None` for a same-run candidate that never existed as a standalone EF.
    pub absorbed_ef_id: Option<EfId>,
    /// How many titles the absorbed side contributed.
    pub absorbed_title_count: usize,
    /// When the merge was recorded.
    pub merged_at: DateTime<Utc>,
}

/// The durable narrative unit produced by this core (spec §3).
///
/// Titles are assigned to exactly one `Active` EF at a time (invariants I1,
/// I2); `ef_key` is the merge equivalence class (I3) and is unique among
/// `Active` EFs within a single committed batch's output (I4).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFamily {
    /// Opaque id, assigned at first persist. Empty for a not-yet-persisted
    /// candidate produced by Reduce/Orphan-Absorb/Merge.
    pub ef_id: EfId,
    /// The merge equivalence class.
    pub ef_key: EfKey,
    /// Every title currently assigned to this EF.
    pub title_id_set: BTreeSet<TitleId>,
    /// `title_id_set.len()`, kept as a persisted field per spec §3.
    pub title_count: usize,
    /// Short headline.
    pub headline: String,
    /// Prose summary.
    pub summary: String,
    /// Free-form tags, insertion-ordered and deduplicated.
    pub tags: Vec<String>,
    /// Normalized actor tokens, insertion-ordered and deduplicated.
    pub actors: Vec<String>,
    /// Chronologically ordered timeline entries (invariant I7).
    pub timeline: Vec<TimelineEntry>,
    /// Model confidence in `[0, 1]`.
    pub confidence: f64,
    /// Lifecycle status.
    pub status: EventFamilyStatus,
    /// Reserved for future split lineage; consulted by the merge engine's
    /// sibling-split guard (spec §4.5 edge cases).
    pub parent_ef_id: Option<EfId>,
    /// When this EF was first created.
    pub first_seen_at: DateTime<Utc>,
    /// When this EF was last mutated.
    pub last_updated_at: DateTime<Utc>,
    /// Ordered history of merges folded into this EF, oldest first.
    pub lineage: Vec<MergeRecord>,
}

impl EventFamily {
    /// Construct a fresh, empty Active EF shell with no titles yet assigned.
    /// Callers (Reduce assembly, Orphan Absorber) fill in the remaining
    /// fields before the first `title_id_set` insertion; this exists mainly
    /// to give tests and the store a minimal valid starting point.
    pub fn new(ef_id: impl Into<EfId>, ef_key: EfKey, now: DateTime<Utc>) -> Self {
        Self {
            ef_id: ef_id.into(),
            ef_key,
            title_id_set: BTreeSet::new(),
            title_count: 0,
            headline: String::new(),
            summary: String::new(),
            tags: Vec::new(),
            actors: Vec::new(),
            timeline: Vec::new(),
            confidence: 0.0,
            status: EventFamilyStatus::Active,
            parent_ef_id: None,
            first_seen_at: now,
            last_updated_at: now,
            lineage: Vec::new(),
        }
    }

    /// Recompute `title_count` from `title_id_set`. Invariant I6 requires
    /// this never reach zero; callers must not call this on an EF with no
    /// titles.
    pub fn recompute_title_count(&mut self) {
        self.title_count = self.title_id_set.len();
        debug_assert!(self.title_count >= 1, "an EF must retain at least one title");
    }

    /// Whether this EF is currently `Active`.
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

/// Push a value onto an ordered-unique list, preserving first-seen order
/// (spec §4.5 merge operation: `actors`/`tags` are `ordered-unique(...)`).
pub fn push_ordered_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}

/// Extend an ordered-unique list with another, preserving first-seen order.
pub fn extend_ordered_unique(list: &mut Vec<String>, extra: impl IntoIterator<Item = String>) {
    for value in extra {
        push_ordered_unique(list, value);
    }
}
