use std::collections::HashMap;

use async_trait::async_trait;
use ef_errors::RunError;
use ef_types::{EfKey, EventFamily, Title, TitleId};
use tokio::sync::RwLock;

use crate::EventFamilyStore;

/// In-memory [`EventFamilyStore`] backed by `HashMap`s behind a single
/// `RwLock`, mirroring `neuron_state_memory::MemoryStore`. Suitable for
/// tests and single-process runs; a durable backend would replace the
/// `RwLock<Inner>` with a real transactional connection but keep the same
/// invariant checks in `put_ef`/`assign_titles`.
pub struct MemoryEventFamilyStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    titles: HashMap<TitleId, Title>,
    event_families: HashMap<String, EventFamily>,
    /// Index from `ef_key` to the active EF(s) holding it. Usually one
    /// entry (I4); may briefly hold more for a parent-linked sibling set
    /// (spec §4.5 "Sibling-split preservation").
    active_by_key: HashMap<EfKey, Vec<String>>,
}

impl MemoryEventFamilyStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }
}

impl Default for MemoryEventFamilyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventFamilyStore for MemoryEventFamilyStore {
    async fn select_titles_for_run(&self) -> Result<Vec<Title>, RunError> {
        let inner = self.inner.read().await;
        let mut selected: Vec<Title> = inner
            .titles
            .values()
            .filter(|t| t.is_unassigned_strategic())
            .cloned()
            .collect();
        selected.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        Ok(selected)
    }

    async fn get_title(&self, title_id: &str) -> Result<Option<Title>, RunError> {
        let inner = self.inner.read().await;
        Ok(inner.titles.get(title_id).cloned())
    }

    async fn put_title(&self, title: Title) -> Result<(), RunError> {
        let mut inner = self.inner.write().await;
        inner.titles.insert(title.title_id.clone(), title);
        Ok(())
    }

    async fn assign_titles(&self, title_ids: &[TitleId], ef_id: &str) -> Result<(), RunError> {
        let mut inner = self.inner.write().await;

        for title_id in title_ids {
            if let Some(existing) = inner.titles.get(title_id) {
                if let Some(existing_ef) = &existing.event_family_id {
                    if existing_ef != ef_id {
                        return Err(RunError::ConflictingAssignment {
                            title_id: title_id.clone(),
                            existing_ef_id: existing_ef.clone(),
                            target_ef_id: ef_id.to_string(),
                        });
                    }
                }
            } else {
                return Err(RunError::InvariantViolation(format!(
                    "assign_titles referenced unknown title_id {title_id}"
                )));
            }
        }

        for title_id in title_ids {
            if let Some(title) = inner.titles.get_mut(title_id) {
                title.event_family_id = Some(ef_id.to_string());
            }
        }
        Ok(())
    }

    async fn find_active_by_key(&self, ef_key: &EfKey) -> Result<Vec<EventFamily>, RunError> {
        let inner = self.inner.read().await;
        let ids = match inner.active_by_key.get(ef_key) {
            Some(ids) => ids,
            None => return Ok(Vec::new()),
        };
        let mut holders: Vec<EventFamily> = ids
            .iter()
            .filter_map(|id| inner.event_families.get(id).cloned())
            .collect();
        holders.sort_by(|a, b| a.ef_id.cmp(&b.ef_id));
        Ok(holders)
    }

    async fn get_ef(&self, ef_id: &str) -> Result<Option<EventFamily>, RunError> {
        let inner = self.inner.read().await;
        Ok(inner.event_families.get(ef_id).cloned())
    }

    async fn put_ef(&self, ef: EventFamily) -> Result<(), RunError> {
        let mut inner = self.inner.write().await;

        if ef.is_active() {
            let other_holders: Vec<String> = inner
                .active_by_key
                .get(&ef.ef_key)
                .map(|ids| ids.iter().filter(|id| *id != &ef.ef_id).cloned().collect())
                .unwrap_or_default();

            if !other_holders.is_empty() {
                let siblings = other_holders.iter().all(|id| {
                    inner
                        .event_families
                        .get(id)
                        .map(|holder| {
                            ef.parent_ef_id.is_some() && holder.parent_ef_id == ef.parent_ef_id
                        })
                        .unwrap_or(false)
                });
                if !siblings {
                    return Err(RunError::InvariantViolation(format!(
                        "ef_key {:?} already held by active EF(s) {other_holders:?}, cannot also assign to {}",
                        ef.ef_key, ef.ef_id
                    )));
                }
            }
        }

        if let Some(previous) = inner.event_families.get(&ef.ef_id) {
            if previous.is_active() && previous.ef_key != ef.ef_key {
                if let Some(ids) = inner.active_by_key.get_mut(&previous.ef_key) {
                    ids.retain(|id| id != &ef.ef_id);
                }
            }
        }

        if ef.is_active() {
            let ids = inner.active_by_key.entry(ef.ef_key.clone()).or_default();
            if !ids.contains(&ef.ef_id) {
                ids.push(ef.ef_id.clone());
            }
        } else {
            for ids in inner.active_by_key.values_mut() {
                ids.retain(|id| id != &ef.ef_id);
            }
        }

        inner.event_families.insert(ef.ef_id.clone(), ef);
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<EventFamily>, RunError> {
        let inner = self.inner.read().await;
        Ok(inner
            .event_families
            .values()
            .filter(|ef| ef.is_active())
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ef_types::{EventType, Theater};

    fn sample_title(id: &str) -> Title {
        Title::new(id, "headline", "AP", Utc::now(), "en")
    }

    fn sample_ef(id: &str, key: EfKey) -> EventFamily {
        EventFamily::new(id, key, Utc::now())
    }

    #[tokio::test]
    async fn select_titles_for_run_filters_and_orders_descending() {
        let store = MemoryEventFamilyStore::new();
        let older = {
            let mut t = sample_title("t1");
            t.published_at = Utc::now() - chrono::Duration::hours(2);
            t
        };
        let newer = sample_title("t2");
        let assigned = {
            let mut t = sample_title("t3");
            t.event_family_id = Some("ef-1".into());
            t
        };
        let ungated = {
            let mut t = sample_title("t4");
            t.gate_keep = false;
            t
        };

        store.put_title(older).await.unwrap();
        store.put_title(newer).await.unwrap();
        store.put_title(assigned).await.unwrap();
        store.put_title(ungated).await.unwrap();

        let selected = store.select_titles_for_run().await.unwrap();
        let ids: Vec<&str> = selected.iter().map(|t| t.title_id.as_str()).collect();
        assert_eq!(ids, vec!["t2", "t1"]);
    }

    #[tokio::test]
    async fn assign_titles_rejects_conflicting_assignment() {
        let store = MemoryEventFamilyStore::new();
        let mut title = sample_title("t1");
        title.event_family_id = Some("ef-old".into());
        store.put_title(title).await.unwrap();

        let err = store
            .assign_titles(&["t1".to_string()], "ef-new")
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::ConflictingAssignment { .. }));
    }

    #[tokio::test]
    async fn put_ef_rejects_duplicate_active_key() {
        let store = MemoryEventFamilyStore::new();
        let key = EfKey::compute(Theater::Europe, EventType::Diplomacy);
        store.put_ef(sample_ef("ef-1", key.clone())).await.unwrap();

        let err = store.put_ef(sample_ef("ef-2", key)).await.unwrap_err();
        assert!(matches!(err, RunError::InvariantViolation(_)));
    }

    #[tokio::test]
    async fn find_active_by_key_returns_none_after_merge() {
        let store = MemoryEventFamilyStore::new();
        let key = EfKey::compute(Theater::Mideast, EventType::Cyber);
        let mut ef = sample_ef("ef-1", key.clone());
        store.put_ef(ef.clone()).await.unwrap();

        ef.status = ef_types::EventFamilyStatus::MergedInto {
            ef_id: "ef-survivor".into(),
        };
        store.put_ef(ef).await.unwrap();

        assert!(store.find_active_by_key(&key).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn find_active_by_key_allows_sibling_pair_sharing_parent() {
        let store = MemoryEventFamilyStore::new();
        let key = EfKey::compute(Theater::Africa, EventType::Energy);
        let mut a = sample_ef("ef-a", key.clone());
        a.parent_ef_id = Some("ef-parent".into());
        let mut b = sample_ef("ef-b", key.clone());
        b.parent_ef_id = Some("ef-parent".into());

        store.put_ef(a).await.unwrap();
        store.put_ef(b).await.unwrap();

        let holders = store.find_active_by_key(&key).await.unwrap();
        assert_eq!(holders.len(), 2);
    }

    #[tokio::test]
    async fn put_ef_rejects_non_sibling_duplicate_even_with_parent_set() {
        let store = MemoryEventFamilyStore::new();
        let key = EfKey::compute(Theater::Europe, EventType::Cyber);
        let mut a = sample_ef("ef-a", key.clone());
        a.parent_ef_id = Some("ef-parent-1".into());
        let mut b = sample_ef("ef-b", key.clone());
        b.parent_ef_id = Some("ef-parent-2".into());

        store.put_ef(a).await.unwrap();
        let err = store.put_ef(b).await.unwrap_err();
        assert!(matches!(err, RunError::InvariantViolation(_)));
    }

    #[tokio::test]
    async fn put_ef_allows_replacing_same_ef_with_same_key() {
        let store = MemoryEventFamilyStore::new();
        let key = EfKey::compute(Theater::Americas, EventType::Energy);
        let mut ef = sample_ef("ef-1", key.clone());
        store.put_ef(ef.clone()).await.unwrap();

        ef.title_count = 3;
        store.put_ef(ef).await.unwrap();

        let holders = store.find_active_by_key(&key).await.unwrap();
        assert_eq!(holders.len(), 1);
        assert_eq!(holders[0].title_count, 3);
    }
}
