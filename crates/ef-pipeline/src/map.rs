//! Map Stage: semantic incident clustering (spec §4.2).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use ef_config::EfConfig;
use ef_llm::{retry_with_backoff, BackoffPolicy, LlmClient, MapShardRequest, TitleForPrompt};
use ef_types::{Incident, Title, TitleId};
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinSet};
use tokio::time::{sleep_until, Instant};

/// Output of the Map stage: proposed incidents plus everything that didn't
/// land in one (spec §4.2 contract: incidents ∪ orphans covers exactly the
/// input, each title in at most one incident).
#[derive(Debug, Clone, Default)]
pub struct MapOutcome {
    /// Proposed incident clusters, validated against their shard's input.
    pub incidents: Vec<Incident>,
    /// Titles a completed shard did not place into any incident. Absorbed
    /// as singletons and run through Reduce this same run (spec §4.4).
    pub orphan_title_ids: Vec<TitleId>,
    /// Titles whose shard never finished before the phase deadline elapsed
    /// (spec §4.7). Left untouched — no incident, not absorbed — so they
    /// stay unassigned and are simply reselected by the next run.
    pub unfinished_title_ids: Vec<TitleId>,
}

fn chunk_titles<'a>(titles: &'a [Title], shard_size: usize) -> Vec<&'a [Title]> {
    if shard_size == 0 {
        return vec![titles];
    }
    titles.chunks(shard_size).collect()
}

fn to_prompt_title(title: &Title) -> TitleForPrompt {
    TitleForPrompt {
        title_id: title.title_id.clone(),
        text: title.text.clone(),
        publisher: title.publisher.clone(),
        published_at: title.published_at,
    }
}

/// Validate one shard's raw LLM response against spec §4.2 step 4: reject
/// ids outside the shard, drop cross-incident duplicates (first-seen wins),
/// drop incidents left with zero valid titles. Anything never placed is
/// returned as this shard's contribution to `orphan_title_ids`.
fn validate_shard_response(
    shard_id: &str,
    shard_titles: &[Title],
    raw_incidents: Vec<ef_llm::RawIncident>,
) -> (Vec<Incident>, Vec<TitleId>) {
    let valid_ids: HashSet<&str> = shard_titles.iter().map(|t| t.title_id.as_str()).collect();
    let mut placed: HashSet<TitleId> = HashSet::new();
    let mut incidents = Vec::new();

    for (idx, raw) in raw_incidents.into_iter().enumerate() {
        let mut title_ids = Vec::new();
        for title_id in raw.title_ids {
            if !valid_ids.contains(title_id.as_str()) {
                continue;
            }
            if placed.contains(&title_id) {
                continue;
            }
            placed.insert(title_id.clone());
            title_ids.push(title_id);
        }
        if title_ids.is_empty() {
            continue;
        }
        incidents.push(Incident::new(
            format!("{shard_id}-incident-{idx}"),
            title_ids,
            raw.rationale,
            raw.confidence,
        ));
    }

    let orphans: Vec<TitleId> = shard_titles
        .iter()
        .map(|t| t.title_id.clone())
        .filter(|id| !placed.contains(id))
        .collect();

    (incidents, orphans)
}

async fn run_shard<LLM: LlmClient + 'static>(
    shard_index: usize,
    shard_titles: Vec<Title>,
    llm: Arc<LLM>,
    policy: BackoffPolicy,
) -> (Vec<Incident>, Vec<TitleId>) {
    let shard_id = format!("shard-{shard_index}");
    let request = MapShardRequest {
        shard_id: shard_id.clone(),
        titles: shard_titles.iter().map(to_prompt_title).collect(),
    };

    let result = retry_with_backoff(policy, || {
        let llm = Arc::clone(&llm);
        let request = request.clone();
        async move { llm.map_shard(request).await }
    })
    .await;

    match result {
        Ok(response) => validate_shard_response(&shard_id, &shard_titles, response.incidents),
        Err(error) => {
            tracing::warn!(shard = %shard_id, %error, "map shard failed after retries, titles become orphans");
            let orphans = shard_titles.into_iter().map(|t| t.title_id).collect();
            (Vec::new(), orphans)
        }
    }
}

/// Run the Map stage over a selected batch of titles, with at most
/// `config.map_concurrency` shard calls in flight (spec §4.2 step 3).
///
/// `deadline` bounds the whole stage (spec §4.7): shards still in flight when
/// it elapses are aborted and their titles fall into `unfinished_title_ids`
/// rather than dropping whatever already completed. The stage always
/// returns, never errors — the orchestrator finishes the run in `Done` with
/// the partial result (spec §4.7 "the run always ends with a valid
/// post-merge commit or an empty commit").
pub async fn run_map_stage<LLM: LlmClient + 'static>(
    titles: Vec<Title>,
    llm: Arc<LLM>,
    config: &EfConfig,
    deadline: Instant,
) -> MapOutcome {
    let shards: Vec<Vec<Title>> = chunk_titles(&titles, config.map_batch_size)
        .into_iter()
        .map(|s| s.to_vec())
        .collect();

    let semaphore = Arc::new(Semaphore::new(config.map_concurrency.max(1)));
    let policy = BackoffPolicy::with_max_retries(config.llm_max_retries);
    let mut joinset: JoinSet<(Vec<Incident>, Vec<TitleId>)> = JoinSet::new();
    let mut in_flight: HashMap<Id, Vec<TitleId>> = HashMap::new();

    for (index, shard) in shards.into_iter().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        let llm = Arc::clone(&llm);
        let shard_title_ids: Vec<TitleId> = shard.iter().map(|t| t.title_id.clone()).collect();
        let handle = joinset.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("map concurrency semaphore never closes");
            run_shard(index, shard, llm, policy).await
        });
        in_flight.insert(handle.id(), shard_title_ids);
    }

    let mut outcome = MapOutcome::default();
    let sleep = sleep_until(deadline);
    tokio::pin!(sleep);

    while !joinset.is_empty() {
        tokio::select! {
            result = joinset.join_next_with_id() => {
                match result {
                    Some(Ok((id, (incidents, orphans)))) => {
                        in_flight.remove(&id);
                        outcome.incidents.extend(incidents);
                        outcome.orphan_title_ids.extend(orphans);
                    }
                    Some(Err(join_error)) => {
                        if let Some(ids) = in_flight.remove(&join_error.id()) {
                            tracing::error!(%join_error, "map shard task panicked, its titles are left unassigned");
                            outcome.unfinished_title_ids.extend(ids);
                        }
                    }
                    None => break,
                }
            }
            _ = &mut sleep => {
                tracing::warn!(
                    remaining_shards = in_flight.len(),
                    "map phase deadline reached, in-flight shards' titles are left unassigned for the next run",
                );
                joinset.abort_all();
                while joinset.join_next().await.is_some() {}
                for (_, ids) in in_flight.drain() {
                    outcome.unfinished_title_ids.extend(ids);
                }
                break;
            }
        }
    }

    outcome
}
