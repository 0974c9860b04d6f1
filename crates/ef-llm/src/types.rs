use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A title as presented to the LLM: just enough to cluster/classify on
/// (spec §4.2 step 2, §4.3 step 1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TitleForPrompt {
    /// The title's id, echoed back by the model to identify groupings.
    pub title_id: String,
    /// Headline text.
    pub text: String,
    /// Publisher name.
    pub publisher: String,
    /// Publication instant.
    pub published_at: DateTime<Utc>,
}

/// One Map-stage shard request: a bounded slice of titles, in order
/// (spec §4.2 step 1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapShardRequest {
    /// Run-local shard identifier.
    pub shard_id: String,
    /// Titles in this shard, order-preserved.
    pub titles: Vec<TitleForPrompt>,
}

/// One incident cluster as proposed by the model, before validation
/// (spec §4.2 step 2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawIncident {
    /// Title ids the model grouped together.
    pub title_ids: Vec<String>,
    /// Free-text rationale.
    pub rationale: String,
    /// Model confidence in `[0, 1]`.
    pub confidence: f64,
}

/// The Map stage's raw per-shard response, before the caller's validation
/// pass (spec §4.2 step 4: reject unknown ids, drop cross-incident
/// duplicates, drop empty incidents).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MapShardResponse {
    /// Proposed incident clusters.
    #[serde(default)]
    pub incidents: Vec<RawIncident>,
}

/// One Reduce-stage request: an incident's (or singleton's) titles
/// (spec §4.3 step 1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReduceRequest {
    /// Run-local incident identifier this request classifies.
    pub incident_id: String,
    /// Titles in the incident, in the order Reduce received them.
    pub titles: Vec<TitleForPrompt>,
}

/// One raw timeline entry as proposed by the model, before the caller
/// validates `source_title_ids ⊆ title_id_set` and sorts (spec §4.3 step 4).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTimelineEntry {
    /// When the described development happened.
    pub timestamp: DateTime<Utc>,
    /// Prose description.
    pub description: String,
    /// Titles this entry is sourced from.
    #[serde(default)]
    pub source_title_ids: Vec<String>,
}

/// The Reduce stage's raw response, before vocabulary clamping and
/// `ef_key` computation (spec §4.3 steps 2–4).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReduceResponse {
    /// Proposed theater, as a wire-format vocabulary string (may be unknown).
    pub theater: String,
    /// Proposed event type, as a wire-format vocabulary string (may be unknown).
    pub event_type: String,
    /// Short headline.
    pub headline: String,
    /// Prose summary.
    pub summary: String,
    /// Normalized actor tokens.
    #[serde(default)]
    pub actors: Vec<String>,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Proposed timeline entries, unsorted.
    #[serde(default)]
    pub timeline: Vec<RawTimelineEntry>,
    /// Model confidence in `[0, 1]`.
    pub confidence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_shard_response_defaults_to_empty_incidents() {
        let response: MapShardResponse = serde_json::from_str("{}").unwrap();
        assert!(response.incidents.is_empty());
    }

    #[test]
    fn reduce_response_roundtrips_through_json() {
        let response = ReduceResponse {
            theater: "EUROPE".into(),
            event_type: "DIPLOMACY".into(),
            headline: "h".into(),
            summary: "s".into(),
            actors: vec!["NATO".into()],
            tags: vec!["summit".into()],
            timeline: vec![RawTimelineEntry {
                timestamp: Utc::now(),
                description: "d".into(),
                source_title_ids: vec!["t1".into()],
            }],
            confidence: 0.7,
        };
        let json = serde_json::to_string(&response).unwrap();
        let back: ReduceResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(response, back);
    }
}
