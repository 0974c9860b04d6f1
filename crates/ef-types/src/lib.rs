#![deny(missing_docs)]
//! Core data model for the Event Family generation core.
//!
//! These are plain, serde-first types shared by every stage of the pipeline
//! (map, reduce, merge, persistence). They carry no I/O and no policy — the
//! pipeline crate (`ef-pipeline`) is where behavior over these types lives.

mod ef_key;
mod event_family;
mod incident;
mod timeline;
mod title;
mod vocab;

pub use ef_key::EfKey;
pub use event_family::{
    extend_ordered_unique, push_ordered_unique, EventFamily, EventFamilyStatus, MergeRecord,
};
pub use incident::Incident;
pub use timeline::{is_monotonic, merge_sorted, sort_ascending, TimelineEntry};
pub use title::{Title, TitleId};
pub use vocab::{EventType, Theater};

/// An opaque identifier for an Event Family, assigned at first persist.
pub type EfId = String;

/// A run-local identifier for an ephemeral `Incident`.
pub type IncidentId = String;
