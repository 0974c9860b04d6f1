#![deny(missing_docs)]
//! Persistence Adapter for titles and Event Families (spec §4.1, §4.6).
//!
//! [`EventFamilyStore`] is the boundary the Orchestrator and the Merge Engine
//! write through. It is deliberately narrow — selection, per-EF upsert,
//! merge bookkeeping — mirroring how `layer0::state::StateStore` keeps CRUD
//! separate from higher-level coordination.

mod memory;

pub use memory::MemoryEventFamilyStore;

use async_trait::async_trait;
use ef_errors::RunError;
use ef_types::{EfKey, EventFamily, Title, TitleId};

/// Persistence boundary for titles and Event Families.
///
/// Implementations: [`MemoryEventFamilyStore`] (the only backend this crate
/// ships; a SQL adapter enforcing the same invariants via a real transaction
/// and a partial unique index on `(ef_key) WHERE status = 'active'` would
/// plug in here without changing callers).
#[async_trait]
pub trait EventFamilyStore: Send + Sync {
    /// Select the run's input: titles with `gate_keep = true` and no
    /// `event_family_id`, ordered by `published_at` descending (spec §4.1
    /// Title Selector).
    async fn select_titles_for_run(&self) -> Result<Vec<Title>, RunError>;

    /// Fetch a single title by id.
    async fn get_title(&self, title_id: &str) -> Result<Option<Title>, RunError>;

    /// Insert or replace a title record.
    async fn put_title(&self, title: Title) -> Result<(), RunError>;

    /// Stamp `title.event_family_id` for every listed title, enforcing
    /// I1/I2 (spec §3): a title assigned during this run must not already
    /// belong to a *different* active EF.
    async fn assign_titles(
        &self,
        title_ids: &[TitleId],
        ef_id: &str,
    ) -> Result<(), RunError>;

    /// Look up every active EF currently holding a given `ef_key` (spec
    /// §4.5 step 2: cross-batch merge target lookup).
    ///
    /// Normally returns 0 or 1 entries (I4). It may transiently return more
    /// than one across batches when a prior commit created sibling EFs that
    /// share a `parent_ef_id` (spec §4.5 "Sibling-split preservation",
    /// scenario 5) — the merge engine, not the store, decides whether that
    /// is legitimate or an `InvariantViolation`.
    async fn find_active_by_key(&self, ef_key: &EfKey) -> Result<Vec<EventFamily>, RunError>;

    /// Fetch a single Event Family by id, active or merged.
    async fn get_ef(&self, ef_id: &str) -> Result<Option<EventFamily>, RunError>;

    /// Insert or replace an Event Family as one transactional unit (spec
    /// §4.6: "each EF commit is atomic"), enforcing that no two *active*
    /// EFs share an `ef_key` (I4).
    async fn put_ef(&self, ef: EventFamily) -> Result<(), RunError>;

    /// List every currently active Event Family.
    async fn list_active(&self) -> Result<Vec<EventFamily>, RunError>;
}
