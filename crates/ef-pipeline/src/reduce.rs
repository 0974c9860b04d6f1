//! Reduce Stage: incident-to-candidate-EF assembly (spec §4.3).

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use ef_config::EfConfig;
use ef_llm::{retry_with_backoff, BackoffPolicy, LlmClient, ReduceRequest, TitleForPrompt};
use ef_types::{sort_ascending, EfKey, EventFamily, EventType, Incident, Theater, Title, TimelineEntry};
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinSet};
use tokio::time::{sleep_until, Instant};

/// A not-yet-persisted Event Family, produced by one Reduce call. `ef_id` is
/// empty until the Merge/Persist stages assign one (spec §4.3 contract).
pub type CandidateEf = EventFamily;

/// One incident (or orphan singleton) that Reduce could not turn into a
/// candidate after exhausting retries (spec §4.3 failure model).
#[derive(Debug, Clone)]
pub struct ReduceFailure {
    /// The incident that failed.
    pub incident: Incident,
}

/// Outcome of one Reduce pass: successful candidates plus incidents whose
/// LLM call never succeeded.
#[derive(Debug, Clone, Default)]
pub struct ReduceOutcome {
    /// Candidate EFs assembled from incidents that succeeded.
    pub candidates: Vec<CandidateEf>,
    /// Incidents that failed even after retries.
    pub failures: Vec<ReduceFailure>,
}

fn to_prompt_title(title: &Title) -> TitleForPrompt {
    TitleForPrompt {
        title_id: title.title_id.clone(),
        text: title.text.clone(),
        publisher: title.publisher.clone(),
        published_at: title.published_at,
    }
}

/// Build a candidate EF from a validated LLM response, clamping unknown
/// vocabulary to the fallback values and applying the confidence penalty
/// (spec §4.3 steps 2–4).
fn assemble_candidate(
    title_id_set: BTreeSet<String>,
    response: ef_llm::ReduceResponse,
    penalty: f64,
) -> CandidateEf {
    let theater = Theater::parse_vocab(&response.theater);
    let event_type = EventType::parse_vocab(&response.event_type);
    let unknown = theater.is_none() || event_type.is_none();

    let theater = theater.unwrap_or(Theater::FALLBACK);
    let event_type = event_type.unwrap_or(EventType::FALLBACK);
    let ef_key = EfKey::compute(theater, event_type);

    let mut timeline: Vec<TimelineEntry> = response
        .timeline
        .into_iter()
        .filter(|entry| {
            entry
                .source_title_ids
                .iter()
                .all(|id| title_id_set.contains(id))
        })
        .map(|entry| TimelineEntry::new(entry.timestamp, entry.description, entry.source_title_ids))
        .collect();
    sort_ascending(&mut timeline);

    let confidence = if unknown {
        (response.confidence - penalty).max(0.0)
    } else {
        response.confidence
    };

    let now = Utc::now();
    CandidateEf {
        ef_id: String::new(),
        ef_key,
        title_count: title_id_set.len(),
        title_id_set,
        headline: response.headline,
        summary: response.summary,
        tags: response.tags,
        actors: response.actors,
        timeline,
        confidence,
        status: ef_types::EventFamilyStatus::Active,
        parent_ef_id: None,
        first_seen_at: now,
        last_updated_at: now,
        lineage: Vec::new(),
    }
}

async fn reduce_one<LLM: LlmClient + 'static>(
    incident: Incident,
    titles_by_id: &std::collections::HashMap<String, Title>,
    llm: Arc<LLM>,
    policy: BackoffPolicy,
    penalty: f64,
) -> Result<CandidateEf, ReduceFailure> {
    let titles: Vec<&Title> = incident
        .title_ids
        .iter()
        .filter_map(|id| titles_by_id.get(id))
        .collect();
    let title_id_set: BTreeSet<String> = incident.title_ids.iter().cloned().collect();

    let request = ReduceRequest {
        incident_id: incident.incident_id.clone(),
        titles: titles.iter().map(|t| to_prompt_title(t)).collect(),
    };

    let result = retry_with_backoff(policy, || {
        let llm = Arc::clone(&llm);
        let request = request.clone();
        async move { llm.reduce_incident(request).await }
    })
    .await;

    match result {
        Ok(response) => Ok(assemble_candidate(title_id_set, response, penalty)),
        Err(error) => {
            tracing::warn!(incident_id = %incident.incident_id, %error, "reduce failed after retries");
            Err(ReduceFailure { incident })
        }
    }
}

/// Run the Reduce stage over a set of incidents, with at most
/// `config.reduce_concurrency` LLM calls in flight (spec §4.3 step 5).
///
/// `deadline` bounds the whole stage (spec §4.7): incidents still in flight
/// when it elapses are aborted and counted as failures, so their titles are
/// left unassigned and roll to the next run rather than discarding whatever
/// already reduced successfully.
pub async fn run_reduce_stage<LLM: LlmClient + 'static>(
    incidents: Vec<Incident>,
    titles_by_id: &std::collections::HashMap<String, Title>,
    llm: Arc<LLM>,
    config: &EfConfig,
    deadline: Instant,
) -> ReduceOutcome {
    let semaphore = Arc::new(Semaphore::new(config.reduce_concurrency.max(1)));
    let policy = BackoffPolicy::with_max_retries(config.llm_max_retries);
    let penalty = config.confidence_unknown_penalty;

    let mut joinset: JoinSet<Result<CandidateEf, ReduceFailure>> = JoinSet::new();
    let mut in_flight: HashMap<Id, Incident> = HashMap::new();
    for incident in incidents {
        let semaphore = Arc::clone(&semaphore);
        let llm = Arc::clone(&llm);
        let titles_by_id = titles_by_id.clone();
        let tracked = incident.clone();
        let handle = joinset.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("reduce concurrency semaphore never closes");
            reduce_one(incident, &titles_by_id, llm, policy, penalty).await
        });
        in_flight.insert(handle.id(), tracked);
    }

    let mut outcome = ReduceOutcome::default();
    let sleep = sleep_until(deadline);
    tokio::pin!(sleep);

    while !joinset.is_empty() {
        tokio::select! {
            result = joinset.join_next_with_id() => {
                match result {
                    Some(Ok((id, Ok(candidate)))) => {
                        in_flight.remove(&id);
                        outcome.candidates.push(candidate);
                    }
                    Some(Ok((id, Err(failure)))) => {
                        in_flight.remove(&id);
                        outcome.failures.push(failure);
                    }
                    Some(Err(join_error)) => {
                        if let Some(incident) = in_flight.remove(&join_error.id()) {
                            tracing::error!(%join_error, "reduce task panicked");
                            outcome.failures.push(ReduceFailure { incident });
                        }
                    }
                    None => break,
                }
            }
            _ = &mut sleep => {
                tracing::warn!(
                    remaining_incidents = in_flight.len(),
                    "reduce phase deadline reached, in-flight incidents roll to the next run",
                );
                joinset.abort_all();
                while joinset.join_next().await.is_some() {}
                for (_, incident) in in_flight.drain() {
                    outcome.failures.push(ReduceFailure { incident });
                }
                break;
            }
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ef_llm::{LlmError, MapShardRequest, MapShardResponse, RawTimelineEntry, ReduceResponse};
    use std::collections::HashMap;
    use std::time::Duration;

    fn title(id: &str) -> Title {
        Title::new(id, "h", "AP", Utc::now(), "en")
    }

    fn generous_deadline() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    struct StubLlm {
        response: ReduceResponse,
    }

    impl LlmClient for StubLlm {
        async fn map_shard(&self, _: MapShardRequest) -> Result<MapShardResponse, LlmError> {
            unreachable!()
        }

        async fn reduce_incident(&self, _: ReduceRequest) -> Result<ReduceResponse, LlmError> {
            Ok(self.response.clone())
        }
    }

    fn good_response() -> ReduceResponse {
        ReduceResponse {
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
            confidence: 0.9,
        }
    }

    #[tokio::test]
    async fn known_vocab_keeps_confidence_unpenalized() {
        let incident = Incident::new("inc-1", vec!["t1".into()], "r", 0.9);
        let mut titles = HashMap::new();
        titles.insert("t1".to_string(), title("t1"));
        let llm = Arc::new(StubLlm {
            response: good_response(),
        });
        let config = EfConfig::default();

        let outcome = run_reduce_stage(vec![incident], &titles, llm, &config, generous_deadline()).await;
        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(outcome.candidates[0].confidence, 0.9);
        assert_eq!(outcome.candidates[0].ef_key.theater, Theater::Europe);
    }

    #[tokio::test]
    async fn unknown_vocab_clamps_to_fallback_and_applies_penalty() {
        let incident = Incident::new("inc-1", vec!["t1".into()], "r", 0.9);
        let mut titles = HashMap::new();
        titles.insert("t1".to_string(), title("t1"));
        let mut response = good_response();
        response.theater = "MARS".into();
        response.confidence = 0.9;
        let llm = Arc::new(StubLlm { response });
        let mut config = EfConfig::default();
        config.confidence_unknown_penalty = 0.15;

        let outcome = run_reduce_stage(vec![incident], &titles, llm, &config, generous_deadline()).await;
        let candidate = &outcome.candidates[0];
        assert_eq!(candidate.ef_key.theater, Theater::Global);
        assert!((candidate.confidence - 0.75).abs() < 1e-9);
    }

    #[tokio::test]
    async fn timeline_entries_referencing_titles_outside_the_incident_are_dropped() {
        let incident = Incident::new("inc-1", vec!["t1".into()], "r", 0.9);
        let mut titles = HashMap::new();
        titles.insert("t1".to_string(), title("t1"));
        let mut response = good_response();
        response.timeline.push(RawTimelineEntry {
            timestamp: Utc::now(),
            description: "rogue".into(),
            source_title_ids: vec!["t-not-in-incident".into()],
        });
        let llm = Arc::new(StubLlm { response });
        let config = EfConfig::default();

        let outcome = run_reduce_stage(vec![incident], &titles, llm, &config, generous_deadline()).await;
        assert_eq!(outcome.candidates[0].timeline.len(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_produce_a_failure_not_a_candidate() {
        struct FailingLlm;
        impl LlmClient for FailingLlm {
            async fn map_shard(&self, _: MapShardRequest) -> Result<MapShardResponse, LlmError> {
                unreachable!()
            }
            async fn reduce_incident(&self, _: ReduceRequest) -> Result<ReduceResponse, LlmError> {
                Err(LlmError::ServerError("down".into()))
            }
        }

        let incident = Incident::new("inc-1", vec!["t1".into()], "r", 0.9);
        let mut titles = HashMap::new();
        titles.insert("t1".to_string(), title("t1"));
        let llm = Arc::new(FailingLlm);
        let mut config = EfConfig::default();
        config.llm_max_retries = 0;

        let outcome = run_reduce_stage(vec![incident], &titles, llm, &config, generous_deadline()).await;
        assert!(outcome.candidates.is_empty());
        assert_eq!(outcome.failures.len(), 1);
    }

    #[tokio::test]
    async fn deadline_elapsing_keeps_completed_candidates_and_fails_the_rest() {
        struct StuckOnOne;
        impl LlmClient for StuckOnOne {
            async fn map_shard(&self, _: MapShardRequest) -> Result<MapShardResponse, LlmError> {
                unreachable!()
            }
            async fn reduce_incident(&self, request: ReduceRequest) -> Result<ReduceResponse, LlmError> {
                if request.incident_id == "inc-stuck" {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                }
                Ok(good_response())
            }
        }

        let incidents = vec![
            Incident::new("inc-ok", vec!["t1".into()], "r", 0.9),
            Incident::new("inc-stuck", vec!["t2".into()], "r", 0.9),
        ];
        let mut titles = HashMap::new();
        titles.insert("t1".to_string(), title("t1"));
        titles.insert("t2".to_string(), title("t2"));
        let llm = Arc::new(StuckOnOne);
        let mut config = EfConfig::default();
        config.reduce_concurrency = 2;
        config.llm_max_retries = 0;

        let deadline = Instant::now() + Duration::from_millis(30);
        let outcome = run_reduce_stage(incidents, &titles, llm, &config, deadline).await;

        assert_eq!(outcome.candidates.len(), 1, "inc-ok's completed work is kept, not discarded");
        assert_eq!(outcome.failures.len(), 1, "inc-stuck rolls over as a failure, leaving its title unassigned");
        assert_eq!(outcome.failures[0].incident.incident_id, "inc-stuck");
    }
}
