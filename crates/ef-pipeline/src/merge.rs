//! EF Key & Merge Engine (spec §4.5): folds candidate EFs against each other
//! and against the persisted store, enforcing invariant I4.

use std::cmp::Reverse;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use ef_errors::RunError;
use ef_store::EventFamilyStore;
use ef_types::{extend_ordered_unique, merge_sorted, EfKey, EventFamily, Title, TitleId};
use sha2::{Digest, Sha256};
use tokio::time::Instant;

/// One EF ready for the Persistence Adapter: its final state (with `ef_id`
/// assigned if new) and the full set of titles that must have
/// `event_family_id` pointed at it.
#[derive(Debug, Clone)]
pub struct EfCommit {
    /// The survivor's final state, post-merge.
    pub survivor: EventFamily,
    /// Every title that must end up pointing at `survivor.ef_id`.
    pub title_ids: Vec<TitleId>,
}

/// Merge operation (spec §4.5 step 3): fold `candidate` into `survivor` in
/// place. Returns `false` (no-op) if `candidate`'s titles are already a
/// subset of `survivor`'s — this covers both the "self-merge" edge case and
/// idempotent re-runs (spec §8 P5, scenario 6) without inflating lineage.
fn apply_merge(
    survivor: &mut EventFamily,
    candidate: EventFamily,
    absorbed_ef_id: Option<String>,
    now: DateTime<Utc>,
) -> bool {
    if candidate.title_id_set.is_subset(&survivor.title_id_set) {
        return false;
    }

    let survivor_count_before = survivor.title_count;
    let candidate_count = candidate.title_count;
    let survivor_was_singleton = survivor_count_before == 1;
    let candidate_is_singleton = candidate_count == 1;

    survivor.title_id_set.extend(candidate.title_id_set);
    extend_ordered_unique(&mut survivor.actors, candidate.actors);
    extend_ordered_unique(&mut survivor.tags, candidate.tags);
    survivor.timeline = merge_sorted(std::mem::take(&mut survivor.timeline), candidate.timeline);

    if survivor_was_singleton && !candidate_is_singleton {
        survivor.headline = candidate.headline;
        survivor.summary = candidate.summary;
    }

    let total = (survivor_count_before + candidate_count) as f64;
    survivor.confidence = (survivor.confidence * survivor_count_before as f64
        + candidate.confidence * candidate_count as f64)
        / total;

    survivor.recompute_title_count();
    survivor.last_updated_at = now;
    survivor.lineage.push(ef_types::MergeRecord {
        absorbed_ef_id,
        absorbed_title_count: candidate_count,
        merged_at: now,
    });

    true
}

/// Lexicographic hash of a candidate's sorted title ids, the final
/// tie-break key in spec §4.5 step 1.
fn title_ids_hash(candidate: &EventFamily) -> String {
    let joined = candidate
        .title_id_set
        .iter()
        .cloned()
        .collect::<Vec<_>>()
        .join("\0");
    hex::encode(Sha256::digest(joined.as_bytes()))
}

fn min_published_at(candidate: &EventFamily, titles_by_id: &HashMap<TitleId, Title>) -> DateTime<Utc> {
    candidate
        .title_id_set
        .iter()
        .filter_map(|id| titles_by_id.get(id))
        .map(|t| t.published_at)
        .min()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Sort key implementing spec §4.5 step 1's deterministic tie-break:
/// largest `title_count` first, then earliest min `published_at`, then
/// lexicographic hash of sorted title ids.
fn tie_break_key(
    candidate: &EventFamily,
    titles_by_id: &HashMap<TitleId, Title>,
) -> (Reverse<usize>, DateTime<Utc>, String) {
    (
        Reverse(candidate.title_count),
        min_published_at(candidate, titles_by_id),
        title_ids_hash(candidate),
    )
}

/// Intra-run merge (spec §4.5 step 1): group candidates by `ef_key`, and
/// within each group of size > 1, fold them in deterministic order so the
/// result depends only on the candidate set, never on arrival order.
pub fn intra_run_merge(
    candidates: Vec<EventFamily>,
    titles_by_id: &HashMap<TitleId, Title>,
    now: DateTime<Utc>,
) -> Vec<EventFamily> {
    let mut groups: HashMap<EfKey, Vec<EventFamily>> = HashMap::new();
    for candidate in candidates {
        groups.entry(candidate.ef_key).or_default().push(candidate);
    }

    let mut out = Vec::with_capacity(groups.len());
    for (_, mut group) in groups {
        group.sort_by_cached_key(|c| tie_break_key(c, titles_by_id));
        let mut iter = group.into_iter();
        let mut survivor = iter.next().expect("group is never empty");
        for candidate in iter {
            apply_merge(&mut survivor, candidate, None, now);
        }
        out.push(survivor);
    }
    out
}

/// Cross-batch merge (spec §4.5 step 2): for each run-deduplicated
/// candidate, fold it into the matching persisted `active` EF, or mint a
/// fresh one if none exists.
///
/// `deadline` bounds the whole stage (spec §4.7): once it elapses, candidates
/// not yet processed are left out of the returned commits rather than erring,
/// so their titles roll forward to the next run instead of aborting the one
/// in progress.
pub async fn cross_batch_merge(
    candidates: Vec<EventFamily>,
    store: &dyn EventFamilyStore,
    now: DateTime<Utc>,
    deadline: Instant,
) -> Result<Vec<EfCommit>, RunError> {
    let mut commits = Vec::new();

    for candidate in candidates {
        if Instant::now() >= deadline {
            tracing::warn!("merge phase deadline reached, remaining candidates roll to the next run");
            break;
        }

        let holders = store.find_active_by_key(&candidate.ef_key).await?;

        let survivor = match holders.len() {
            0 => {
                let mut new_ef = candidate;
                new_ef.ef_id = uuid::Uuid::new_v4().to_string();
                Some(new_ef)
            }
            1 => {
                let mut survivor = holders.into_iter().next().expect("len checked above");
                let changed = apply_merge(&mut survivor, candidate, None, now);
                changed.then_some(survivor)
            }
            _ => {
                let parent = holders[0].parent_ef_id.clone();
                let all_siblings =
                    parent.is_some() && holders.iter().all(|h| h.parent_ef_id == parent);
                if !all_siblings {
                    return Err(RunError::InvariantViolation(format!(
                        "ef_key_not_unique: {} active EFs share key {:?} without a common parent",
                        holders.len(),
                        candidate.ef_key
                    )));
                }

                let mut holders = holders;
                holders.sort_by(|a, b| {
                    b.title_count
                        .cmp(&a.title_count)
                        .then(a.first_seen_at.cmp(&b.first_seen_at))
                        .then(a.ef_id.cmp(&b.ef_id))
                });
                let mut survivor = holders.remove(0);
                let changed = apply_merge(&mut survivor, candidate, None, now);
                changed.then_some(survivor)
            }
        };

        if let Some(survivor) = survivor {
            commits.push(EfCommit {
                title_ids: survivor.title_id_set.iter().cloned().collect(),
                survivor,
            });
        }
    }

    Ok(commits)
}
