#![deny(missing_docs)]
//! Run state machine: Select → Map → Reduce → Merge → Persist, each phase
//! bounded by its own deadline (spec §4.7, §6 `phase_timeouts`).
//!
//! Mirrors the shape of `neuron_orch_kit::OrchestratedRunner`: a small
//! driver holding the collaborators it dispatches to, producing a trace
//! (here [`RunReport`]) of one pass through the pipeline. `Orchestrator<LLM>`
//! is generic over the LLM client the same way `NeuronTurn<P: Provider>` is
//! generic over its provider — `ef_llm::LlmClient` is RPITIT and not
//! object-safe, so this is the layer that resolves the concrete type.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use ef_config::EfConfig;
use ef_errors::RunError;
use ef_llm::LlmClient;
use ef_pipeline::{cross_batch_merge, index_titles_by_id, run_map_stage, run_merge_stage, run_reduce_with_retry, EfCommit};
use ef_store::EventFamilyStore;
use tokio::time::{timeout, Instant};

/// The phase a run is in, or the phase it ended at (spec §4.7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunPhase {
    /// Title Selector phase.
    Selecting,
    /// Map Stage.
    Mapping,
    /// Reduce Stage, including the singleton retry pass.
    Reducing,
    /// EF Key & Merge Engine.
    Merging,
    /// Persistence Adapter.
    Persisting,
    /// Every phase completed.
    Done,
    /// The run was aborted before completing every phase; carries the
    /// phase it was in and why.
    Aborted {
        /// The phase the run was in when it aborted.
        phase: Box<RunPhase>,
        /// Human-readable reason.
        reason: String,
        /// Error category per spec §6's CLI contract: `store`, `llm`,
        /// `config`, or `invariant`.
        category: &'static str,
    },
}

/// Summary of one run, successful or aborted.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Run-local identifier, for correlating logs.
    pub run_id: String,
    /// The phase the run ended at.
    pub final_phase: RunPhase,
    /// Titles selected as this run's input, after the `max_titles` cap.
    pub titles_selected: usize,
    /// Candidate EFs produced by Reduce (across both passes).
    pub candidates_produced: usize,
    /// Incidents/singletons that never reduced successfully (spec §4.3;
    /// non-fatal, their titles are left for a future run).
    pub exhausted: Vec<RunError>,
    /// EF commits written to the store this run.
    pub commits_persisted: usize,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run ended (success or abort).
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    fn aborted(
        run_id: String,
        started_at: DateTime<Utc>,
        phase: RunPhase,
        reason: String,
        category: &'static str,
    ) -> Self {
        tracing::error!(run_id = %run_id, phase = ?phase, %reason, category, "run aborted");
        Self {
            run_id,
            final_phase: RunPhase::Aborted {
                phase: Box::new(phase),
                reason,
                category,
            },
            titles_selected: 0,
            candidates_produced: 0,
            exhausted: Vec::new(),
            commits_persisted: 0,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Drives one run of the full pipeline against a store and LLM client,
/// enforcing each phase's deadline from `EfConfig::phase_timeouts`.
///
/// Only the Selecting phase aborts the run on a timeout — it is a single
/// store call with nothing partial to salvage. Map, Reduce, and Merge race
/// their internal work against their own deadline and return whatever
/// completed (spec §4.7): unfinished shards/incidents/candidates roll into
/// the orphan pool, `exhausted`, or simply aren't persisted this run, and
/// the run still finishes in `RunPhase::Done`. Only a fatal [`RunError`]
/// (spec §7: `StoreUnavailable`, `InvariantViolation`) aborts the run.
pub struct Orchestrator<LLM: LlmClient + 'static> {
    llm: Arc<LLM>,
    store: Arc<dyn EventFamilyStore>,
    config: EfConfig,
}

impl<LLM: LlmClient + 'static> Orchestrator<LLM> {
    /// Build a new orchestrator over a concrete LLM client and store.
    pub fn new(llm: Arc<LLM>, store: Arc<dyn EventFamilyStore>, config: EfConfig) -> Self {
        Self { llm, store, config }
    }

    /// Run one full pass: Select → Map → Reduce → Merge → Persist.
    pub async fn run_once(&self) -> RunReport {
        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let timeouts = self.config.phase_timeouts;

        let titles = match timeout(timeouts.select, self.store.select_titles_for_run()).await {
            Ok(Ok(titles)) => titles,
            Ok(Err(err)) => {
                let category = err.category();
                return RunReport::aborted(run_id, started_at, RunPhase::Selecting, err.to_string(), category);
            }
            Err(_) => {
                return RunReport::aborted(
                    run_id,
                    started_at,
                    RunPhase::Selecting,
                    "select phase exceeded its deadline".into(),
                    "store",
                )
            }
        };
        let titles: Vec<_> = titles.into_iter().take(self.config.max_titles).collect();
        let titles_selected = titles.len();
        if titles.is_empty() {
            return RunReport {
                run_id,
                final_phase: RunPhase::Done,
                titles_selected: 0,
                candidates_produced: 0,
                exhausted: Vec::new(),
                commits_persisted: 0,
                started_at,
                finished_at: Utc::now(),
            };
        }
        let titles_by_id = index_titles_by_id(&titles);

        let map_deadline = Instant::now() + timeouts.map;
        let map_outcome = run_map_stage(titles, Arc::clone(&self.llm), &self.config, map_deadline).await;

        let mut incidents = map_outcome.incidents;
        incidents.extend(ef_pipeline::absorb(map_outcome.orphan_title_ids));

        let reduce_deadline = Instant::now() + timeouts.reduce;
        let cluster_outcome = run_reduce_with_retry(
            incidents,
            &titles_by_id,
            Arc::clone(&self.llm),
            &self.config,
            reduce_deadline,
        )
        .await;
        let candidates_produced = cluster_outcome.candidates.len();

        let now = Utc::now();
        let merge_deadline = Instant::now() + timeouts.merge;
        let commits = match run_merge_stage(
            cluster_outcome.candidates,
            &titles_by_id,
            self.store.as_ref(),
            now,
            merge_deadline,
        )
        .await
        {
            Ok(commits) => commits,
            Err(err) => {
                let category = err.category();
                return RunReport::aborted(run_id, started_at, RunPhase::Merging, err.to_string(), category);
            }
        };

        let persist_deadline = Instant::now() + timeouts.persist;
        let commits_persisted = match self.persist(commits, now, persist_deadline).await {
            Ok(count) => count,
            Err(err) => {
                let category = err.category();
                return RunReport::aborted(run_id, started_at, RunPhase::Persisting, err.to_string(), category);
            }
        };

        RunReport {
            run_id,
            final_phase: RunPhase::Done,
            titles_selected,
            candidates_produced,
            exhausted: cluster_outcome.exhausted,
            commits_persisted,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Write each commit, bounded by `deadline` (spec §4.7): commits not
    /// reached before it elapses are simply left for the next run, rather
    /// than aborting the ones already written. Returns how many were
    /// actually persisted.
    async fn persist(
        &self,
        commits: Vec<EfCommit>,
        now: DateTime<Utc>,
        deadline: Instant,
    ) -> Result<usize, RunError> {
        let mut persisted = 0;
        for commit in commits {
            if Instant::now() >= deadline {
                tracing::warn!("persist phase deadline reached, remaining commits roll to the next run");
                break;
            }
            self.persist_one(commit, now, deadline).await?;
            persisted += 1;
        }
        Ok(persisted)
    }

    /// Persist one commit, recovering from a `ConflictingAssignment` instead
    /// of letting it abort the run (spec §4.6/§7): a title already claimed
    /// by a different EF that this very run just wrote means the survivor
    /// must be re-merged against that EF rather than overwrite it. Escalates
    /// to `InvariantViolation` only if the conflict recurs after the re-merge.
    async fn persist_one(&self, commit: EfCommit, now: DateTime<Utc>, deadline: Instant) -> Result<(), RunError> {
        match self.store.assign_titles(&commit.title_ids, &commit.survivor.ef_id).await {
            Ok(()) => self.store.put_ef(commit.survivor).await,
            Err(RunError::ConflictingAssignment { title_id, existing_ef_id, target_ef_id }) => {
                tracing::warn!(
                    %title_id,
                    %existing_ef_id,
                    %target_ef_id,
                    "conflicting assignment on persist, re-merging against the updated store",
                );

                let existing = self.store.get_ef(&existing_ef_id).await?.ok_or_else(|| {
                    RunError::InvariantViolation(format!(
                        "conflicting assignment referenced unknown ef_id {existing_ef_id}"
                    ))
                })?;

                let mut candidate = commit.survivor;
                candidate.ef_key = existing.ef_key;
                let remerged = cross_batch_merge(vec![candidate], self.store.as_ref(), now, deadline).await?;

                for retry_commit in remerged {
                    match self
                        .store
                        .assign_titles(&retry_commit.title_ids, &retry_commit.survivor.ef_id)
                        .await
                    {
                        Ok(()) => self.store.put_ef(retry_commit.survivor).await?,
                        Err(RunError::ConflictingAssignment {
                            title_id,
                            existing_ef_id,
                            target_ef_id,
                        }) => {
                            return Err(RunError::InvariantViolation(format!(
                                "conflicting assignment recurred for title {title_id} (existing_ef_id={existing_ef_id}, target_ef_id={target_ef_id}) after re-merge"
                            )));
                        }
                        Err(other) => return Err(other),
                    }
                }
                Ok(())
            }
            Err(other) => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ef_llm::{LlmError, MapShardRequest, MapShardResponse, RawIncident, ReduceRequest, ReduceResponse};
    use ef_store::MemoryEventFamilyStore;
    use ef_types::{EfKey, EventFamily, EventType, Theater, Title};
    use std::collections::BTreeSet;
    use std::time::Duration;

    struct StubLlm;

    impl LlmClient for StubLlm {
        async fn map_shard(&self, request: MapShardRequest) -> Result<MapShardResponse, LlmError> {
            Ok(MapShardResponse {
                incidents: vec![RawIncident {
                    title_ids: request.titles.iter().map(|t| t.title_id.clone()).collect(),
                    rationale: "same story".into(),
                    confidence: 0.9,
                }],
            })
        }

        async fn reduce_incident(&self, _: ReduceRequest) -> Result<ReduceResponse, LlmError> {
            Ok(ReduceResponse {
                theater: "EUROPE".into(),
                event_type: "DIPLOMACY".into(),
                headline: "h".into(),
                summary: "s".into(),
                actors: vec![],
                tags: vec![],
                timeline: vec![],
                confidence: 0.9,
            })
        }
    }

    /// Hangs on the shard holding `"t-stuck"`, otherwise behaves like `StubLlm`.
    /// Used to prove a phase deadline preserves already-completed work.
    struct PartialLlm;

    impl LlmClient for PartialLlm {
        async fn map_shard(&self, request: MapShardRequest) -> Result<MapShardResponse, LlmError> {
            if request.titles.iter().any(|t| t.title_id == "t-stuck") {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(MapShardResponse {
                incidents: vec![RawIncident {
                    title_ids: request.titles.iter().map(|t| t.title_id.clone()).collect(),
                    rationale: "same story".into(),
                    confidence: 0.9,
                }],
            })
        }

        async fn reduce_incident(&self, _: ReduceRequest) -> Result<ReduceResponse, LlmError> {
            Ok(ReduceResponse {
                theater: "EUROPE".into(),
                event_type: "DIPLOMACY".into(),
                headline: "h".into(),
                summary: "s".into(),
                actors: vec![],
                tags: vec![],
                timeline: vec![],
                confidence: 0.9,
            })
        }
    }

    async fn seeded_store(ids: &[&str]) -> Arc<dyn EventFamilyStore> {
        let store = MemoryEventFamilyStore::new();
        for id in ids {
            store
                .put_title(Title::new(*id, "h", "AP", Utc::now(), "en"))
                .await
                .unwrap();
        }
        Arc::new(store)
    }

    #[tokio::test]
    async fn empty_selection_completes_as_done_with_no_work() {
        let store = seeded_store(&[]).await;
        let orch = Orchestrator::new(Arc::new(StubLlm), store, EfConfig::default());
        let report = orch.run_once().await;
        assert_eq!(report.final_phase, RunPhase::Done);
        assert_eq!(report.titles_selected, 0);
    }

    #[tokio::test]
    async fn full_run_clusters_reduces_merges_and_persists() {
        let store = seeded_store(&["t1", "t2"]).await;
        let orch = Orchestrator::new(Arc::new(StubLlm), Arc::clone(&store), EfConfig::default());
        let report = orch.run_once().await;

        assert_eq!(report.final_phase, RunPhase::Done);
        assert_eq!(report.titles_selected, 2);
        assert_eq!(report.commits_persisted, 1, "both titles share a theater/event_type pair");

        let active = store.list_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].title_count, 2);
    }

    #[tokio::test]
    async fn run_once_caps_selected_titles_at_max_titles() {
        let store = seeded_store(&["t1", "t2", "t3", "t4", "t5"]).await;
        let mut config = EfConfig::default();
        config.max_titles = 3;
        let orch = Orchestrator::new(Arc::new(StubLlm), store, config);

        let report = orch.run_once().await;
        assert_eq!(report.final_phase, RunPhase::Done);
        assert_eq!(report.titles_selected, 3, "selection is capped at max_titles");
    }

    #[tokio::test]
    async fn map_phase_timeout_carries_partial_work_through_to_done() {
        let store = seeded_store(&["t-ok", "t-stuck"]).await;
        let mut config = EfConfig::default();
        config.phase_timeouts.map = Duration::from_millis(30);
        config.map_batch_size = 1;
        config.map_concurrency = 2;
        let orch = Orchestrator::new(Arc::new(PartialLlm), Arc::clone(&store), config);

        let report = orch.run_once().await;

        assert_eq!(report.final_phase, RunPhase::Done, "a map-phase timeout still finishes the run");
        assert_eq!(report.titles_selected, 2);
        assert_eq!(report.commits_persisted, 1, "t-ok's shard completed and was persisted");

        let active = store.list_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].title_count, 1);

        let t_ok = store.get_title("t-ok").await.unwrap().unwrap();
        let t_stuck = store.get_title("t-stuck").await.unwrap().unwrap();
        assert!(t_ok.event_family_id.is_some());
        assert!(t_stuck.event_family_id.is_none(), "t-stuck's shard never finished, so it rolls to the next run");
    }

    #[tokio::test]
    async fn conflicting_assignment_on_persist_recovers_via_remerge_not_abort() {
        let store = seeded_store(&["t1"]).await;
        let orch = Orchestrator::new(Arc::new(StubLlm), Arc::clone(&store), EfConfig::default());

        let key_a = EfKey::compute(Theater::Europe, EventType::Diplomacy);
        let mut survivor_a = EventFamily::new("ef-a", key_a, Utc::now());
        survivor_a.title_id_set = BTreeSet::from(["t1".to_string()]);
        survivor_a.title_count = 1;
        let commit_a = EfCommit {
            survivor: survivor_a,
            title_ids: vec!["t1".to_string()],
        };

        let key_b = EfKey::compute(Theater::Asia, EventType::Military);
        let mut survivor_b = EventFamily::new("ef-b", key_b, Utc::now());
        survivor_b.title_id_set = BTreeSet::from(["t1".to_string()]);
        survivor_b.title_count = 1;
        let commit_b = EfCommit {
            survivor: survivor_b,
            title_ids: vec!["t1".to_string()],
        };

        let deadline = Instant::now() + Duration::from_secs(5);
        let persisted = orch.persist(vec![commit_a, commit_b], Utc::now(), deadline).await.unwrap();

        assert_eq!(persisted, 2, "the conflict recovers via re-merge instead of aborting");
        let t1 = store.get_title("t1").await.unwrap().unwrap();
        assert_eq!(t1.event_family_id.as_deref(), Some("ef-a"), "first writer wins; the second folds into it");
    }
}
