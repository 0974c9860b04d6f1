use serde::{Deserialize, Serialize};

use crate::IncidentId;
use crate::title::TitleId;

/// A run-scoped hypothesis clustering a set of titles around one strategic
/// event (spec §3). Ephemeral: it is never persisted on its own, and survives
/// only until the Reduce stage turns it into a candidate Event Family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    /// Run-local identifier.
    pub incident_id: IncidentId,
    /// The titles this incident clusters. Always non-empty.
    pub title_ids: Vec<TitleId>,
    /// Free-text rationale from the Map stage's LLM call.
    pub rationale: String,
    /// Model confidence in this clustering, in `[0, 1]`.
    pub confidence: f64,
}

impl Incident {
    /// Construct a new incident. Panics in debug builds if `title_ids` is
    /// empty — callers (the Map stage's validation step) must never produce
    /// an incident with zero titles (spec §4.2 guarantee (c)).
    pub fn new(
        incident_id: impl Into<IncidentId>,
        title_ids: Vec<TitleId>,
        rationale: impl Into<String>,
        confidence: f64,
    ) -> Self {
        debug_assert!(
            !title_ids.is_empty(),
            "an incident must have at least one title"
        );
        Self {
            incident_id: incident_id.into(),
            title_ids,
            rationale: rationale.into(),
            confidence,
        }
    }

    /// A degenerate single-title incident, used by the Orphan Absorber
    /// (spec §4.4) to route orphans through the same Reduce path.
    pub fn singleton(incident_id: impl Into<IncidentId>, title_id: TitleId) -> Self {
        Self::new(incident_id, vec![title_id], "orphan singleton", 1.0)
    }
}
