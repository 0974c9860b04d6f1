use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::EfId;

/// Opaque unique identifier for a `Title`.
pub type TitleId = String;

/// A news headline with metadata, strategically gated upstream.
///
/// Immutable for this core, with one exception: `event_family_id` is written
/// by the merge/persistence stages as titles are assigned to an Event Family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Title {
    /// Opaque unique id.
    pub title_id: TitleId,
    /// Headline text.
    pub text: String,
    /// Publisher name.
    pub publisher: String,
    /// UTC instant the title was published.
    pub published_at: DateTime<Utc>,
    /// Source language (BCP-47 or similar tag).
    pub language: String,
    /// True by precondition: the strategic gate has already approved this title.
    pub gate_keep: bool,
    /// Normalized actor tokens extracted upstream by the gate.
    pub entities: BTreeSet<String>,
    /// The Event Family this title has been assigned to, if any.
    pub event_family_id: Option<EfId>,
}

impl Title {
    /// Construct a fresh, unassigned gate-approved title.
    pub fn new(
        title_id: impl Into<TitleId>,
        text: impl Into<String>,
        publisher: impl Into<String>,
        published_at: DateTime<Utc>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            title_id: title_id.into(),
            text: text.into(),
            publisher: publisher.into(),
            published_at,
            language: language.into(),
            gate_keep: true,
            entities: BTreeSet::new(),
            event_family_id: None,
        }
    }

    /// Whether this title is eligible for selection: gate-approved and unassigned.
    pub fn is_unassigned_strategic(&self) -> bool {
        self.gate_keep && self.event_family_id.is_none()
    }
}
