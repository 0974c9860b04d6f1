//! Orphan Absorber: routes uncaptured titles through Reduce as degenerate
//! singleton incidents (spec §4.4).

use ef_types::{Incident, TitleId};

/// Turn each orphan title id into its own singleton incident, so it runs
/// through the same Reduce path (and can merge by `ef_key` with multi-title
/// EFs) as clustered incidents.
pub fn absorb(orphan_title_ids: Vec<TitleId>) -> Vec<Incident> {
    orphan_title_ids
        .into_iter()
        .map(|title_id| {
            let incident_id = format!("orphan-{}", uuid::Uuid::new_v4());
            Incident::singleton(incident_id, title_id)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_orphan_becomes_its_own_singleton_incident() {
        let incidents = absorb(vec!["t1".to_string(), "t2".to_string()]);
        assert_eq!(incidents.len(), 2);
        assert!(incidents.iter().all(|i| i.title_ids.len() == 1));
    }

    #[test]
    fn empty_orphan_list_yields_no_incidents() {
        assert!(absorb(Vec::new()).is_empty());
    }
}
