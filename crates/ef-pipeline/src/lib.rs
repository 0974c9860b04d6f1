#![deny(missing_docs)]
//! Map → Reduce → Orphan-Absorb → Merge pipeline stages (spec §4.2–§4.5).
//!
//! Orchestration — phase deadlines, retries across phases, persistence
//! sequencing — lives one layer up; this crate is the pure stage logic that
//! layer calls, each stage independently testable against a stub
//! [`ef_llm::LlmClient`] and an in-memory [`ef_store::EventFamilyStore`].

mod map;
mod merge;
mod orphan;
mod reduce;

pub use map::{run_map_stage, MapOutcome};
pub use merge::{cross_batch_merge, intra_run_merge, EfCommit};
pub use orphan::absorb;
pub use reduce::{run_reduce_stage, CandidateEf, ReduceFailure, ReduceOutcome};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ef_config::EfConfig;
use ef_errors::RunError;
use ef_llm::LlmClient;
use ef_store::EventFamilyStore;
use ef_types::{Incident, Title, TitleId};
use tokio::time::Instant;

/// Result of Map, Orphan-Absorb, and Reduce over one batch of selected
/// titles: every candidate that made it through, plus every title whose
/// incident (and singleton retry) never reduced successfully (spec §4.3
/// failure model — these are dropped, not fatal to the run).
#[derive(Debug, Clone, Default)]
pub struct ClusterOutcome {
    /// Candidate EFs assembled from incidents that reduced successfully,
    /// across both the first pass and the singleton retry pass.
    pub candidates: Vec<CandidateEf>,
    /// One entry per incident (or singleton) that never produced a candidate.
    pub exhausted: Vec<RunError>,
}

/// Index a batch of titles by id, the shape Reduce and Merge both need to
/// look up a candidate's source titles.
pub fn index_titles_by_id(titles: &[Title]) -> HashMap<TitleId, Title> {
    titles.iter().map(|t| (t.title_id.clone(), t.clone())).collect()
}

/// Run Reduce over a batch of incidents, then retry any failures once as
/// singletons (spec §4.3 failure model). An incident that fails is split
/// into its constituent titles and retried individually; a singleton that
/// still fails becomes a `ReduceExhausted` entry and its title is left
/// unassigned for a future run. Split out from [`run_cluster_stages`] so the
/// Orchestrator can bound it with its own `reduce` phase deadline,
/// independent of the `map` phase.
pub async fn run_reduce_with_retry<LLM: LlmClient + 'static>(
    incidents: Vec<Incident>,
    titles_by_id: &HashMap<TitleId, Title>,
    llm: Arc<LLM>,
    config: &EfConfig,
    deadline: Instant,
) -> ClusterOutcome {
    let first_pass = run_reduce_stage(incidents, titles_by_id, Arc::clone(&llm), config, deadline).await;

    let mut candidates = first_pass.candidates;
    let mut exhausted = Vec::new();
    let mut retry_incidents = Vec::new();

    for failure in first_pass.failures {
        if failure.incident.title_ids.len() == 1 {
            exhausted.push(RunError::ReduceExhausted {
                incident_id: failure.incident.incident_id,
                detail: "singleton reduce failed, no further retry".into(),
            });
        } else {
            retry_incidents.extend(failure.incident.title_ids.into_iter().map(|title_id| {
                let incident_id = format!("retry-{title_id}");
                Incident::singleton(incident_id, title_id)
            }));
        }
    }

    if !retry_incidents.is_empty() {
        let retry_pass = run_reduce_stage(retry_incidents, titles_by_id, llm, config, deadline).await;
        candidates.extend(retry_pass.candidates);
        exhausted.extend(retry_pass.failures.into_iter().map(|failure| {
            RunError::ReduceExhausted {
                incident_id: failure.incident.incident_id,
                detail: "reduce failed again after singleton retry".into(),
            }
        }));
    }

    ClusterOutcome { candidates, exhausted }
}

/// Run Map, Orphan-Absorb, and Reduce (including the singleton retry pass)
/// over one batch of selected titles. A convenience wrapper for callers that
/// don't need per-phase deadlines; the Orchestrator instead calls
/// [`run_map_stage`] and [`run_reduce_with_retry`] directly so each can carry
/// its own phase timeout.
pub async fn run_cluster_stages<LLM: LlmClient + 'static>(
    titles: Vec<Title>,
    llm: Arc<LLM>,
    config: &EfConfig,
    deadline: Instant,
) -> ClusterOutcome {
    let titles_by_id = index_titles_by_id(&titles);
    let map_outcome = run_map_stage(titles, Arc::clone(&llm), config, deadline).await;

    let mut incidents = map_outcome.incidents;
    incidents.extend(absorb(map_outcome.orphan_title_ids));

    run_reduce_with_retry(incidents, &titles_by_id, llm, config, deadline).await
}

/// Fold a batch's candidates against each other and against the persisted
/// store, producing the commits the Persistence Adapter must write (spec
/// §4.5 steps 1–3). Performs no I/O beyond the store reads `find_active_by_key`
/// needs; writing the returned commits back is the caller's job.
pub async fn run_merge_stage(
    candidates: Vec<CandidateEf>,
    titles_by_id: &HashMap<TitleId, Title>,
    store: &dyn EventFamilyStore,
    now: DateTime<Utc>,
    deadline: Instant,
) -> Result<Vec<EfCommit>, RunError> {
    let deduped = intra_run_merge(candidates, titles_by_id, now);
    cross_batch_merge(deduped, store, now, deadline).await
}
