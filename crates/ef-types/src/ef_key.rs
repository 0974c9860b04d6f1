use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::vocab::{EventType, Theater};

/// The merge equivalence class: a stable deterministic function of
/// `(theater, event_type)` (spec §3, invariant I3).
///
/// Carries both the raw pair (for auditability / debugging) and its SHA-256
/// hex digest (what the store's partial unique index and the merge engine's
/// equality comparisons are keyed on) — see `SPEC_FULL.md` §11, Open Question 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EfKey {
    /// The theater half of the classification pair.
    pub theater: Theater,
    /// The event-type half of the classification pair.
    pub event_type: EventType,
    /// Canonical hex-encoded SHA-256 of `theater ∥ "\0" ∥ event_type`.
    pub hash: String,
}

impl EfKey {
    /// Compute the key for a `(theater, event_type)` pair.
    pub fn compute(theater: Theater, event_type: EventType) -> Self {
        let canonical = format!("{}\0{}", theater.as_str(), event_type.as_str());
        let digest = Sha256::digest(canonical.as_bytes());
        Self {
            theater,
            event_type,
            hash: hex::encode(digest),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn any_theater() -> impl Strategy<Value = Theater> {
        prop::sample::select(Theater::ALL.to_vec())
    }

    fn any_event_type() -> impl Strategy<Value = EventType> {
        prop::sample::select(EventType::ALL.to_vec())
    }

    proptest! {
        /// `compute` is a pure function of its pair: same input, same key,
        /// no matter how many times it's called (spec §3 I3).
        #[test]
        fn compute_is_deterministic(theater in any_theater(), event_type in any_event_type()) {
            let a = EfKey::compute(theater, event_type);
            let b = EfKey::compute(theater, event_type);
            prop_assert_eq!(a, b);
        }

        /// Distinct pairs never collide under the delimiter-joined digest.
        #[test]
        fn distinct_pairs_never_collide(
            a_theater in any_theater(), a_event in any_event_type(),
            b_theater in any_theater(), b_event in any_event_type(),
        ) {
            prop_assume!((a_theater, a_event) != (b_theater, b_event));
            let a = EfKey::compute(a_theater, a_event);
            let b = EfKey::compute(b_theater, b_event);
            prop_assert_ne!(a.hash, b.hash);
        }
    }

    #[test]
    fn same_pair_yields_same_key() {
        let a = EfKey::compute(Theater::Europe, EventType::Diplomacy);
        let b = EfKey::compute(Theater::Europe, EventType::Diplomacy);
        assert_eq!(a, b);
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn different_pairs_yield_different_hashes() {
        let a = EfKey::compute(Theater::Europe, EventType::Diplomacy);
        let b = EfKey::compute(Theater::Europe, EventType::MilitaryOp);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn key_is_not_order_confusable() {
        // theater/event_type are typed, not stringly concatenated ambiguously;
        // the delimiter prevents e.g. ("EUROPE_DIPLOMACY", "") collisions.
        let a = EfKey::compute(Theater::Europe, EventType::Diplomacy);
        let b = EfKey::compute(Theater::Global, EventType::Other);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn hash_is_hex_sha256_length() {
        let k = EfKey::compute(Theater::Africa, EventType::Cyber);
        assert_eq!(k.hash.len(), 64);
        assert!(k.hash.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
