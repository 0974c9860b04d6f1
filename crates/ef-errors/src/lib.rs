#![deny(missing_docs)]
//! Error taxonomy for the Event Family generation core (spec §7).
//!
//! One enum, `RunError`, covers the categories the orchestrator surfaces to
//! its caller. Sub-crates define their own narrower, `#[non_exhaustive]`
//! error enums (`ef_llm::LlmError`, `ef_store::StoreError`, ...) and convert
//! into the relevant `RunError` variant at the boundary, following
//! `layer0::error`'s one-enum-per-protocol convention.

use thiserror::Error;

/// Errors that can abort or degrade a single run (spec §7).
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum RunError {
    /// The backing title/EF store is inaccessible. Fatal to the run.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// An LLM call failed transiently (timeout, 5xx, rate limit). Recovered
    /// locally via retry; this variant surfaces only if recovery gave up in
    /// a context where it needed to be fatal (e.g. the orchestrator's
    /// phase-timeout cancellation).
    #[error("LLM transient failure: {0}")]
    LlmTransient(String),

    /// An LLM response failed schema validation and remained malformed after
    /// the retry cap.
    #[error("LLM response malformed: {0}")]
    LlmMalformed(String),

    /// An incident and all of its singleton retries failed Reduce. Logged,
    /// not fatal: the affected titles are left unassigned for the next run.
    #[error("reduce exhausted for incident {incident_id}: {detail}")]
    ReduceExhausted {
        /// The incident (or singleton) that could not be reduced.
        incident_id: String,
        /// Why it failed.
        detail: String,
    },

    /// A title was already bound to a different EF than the one about to
    /// claim it. The merge engine re-reads and retries; if it recurs after a
    /// fresh read, it is escalated to `InvariantViolation`.
    #[error("conflicting assignment: title {title_id} already belongs to {existing_ef_id}, wanted {target_ef_id}")]
    ConflictingAssignment {
        /// The title whose assignment conflicted.
        title_id: String,
        /// The EF it was actually assigned to.
        existing_ef_id: String,
        /// The EF the caller wanted to assign it to.
        target_ef_id: String,
    },

    /// A detected breach of invariants I1–I7. Fatal to the run; no partial
    /// commit is made; this is an operator-alert condition.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Catch-all for errors that don't fit the named categories.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl RunError {
    /// The categorized exit-code class named in spec §6's CLI contract:
    /// `store`, `llm`, `config`, `invariant`, or `other`.
    pub fn category(&self) -> &'static str {
        match self {
            RunError::StoreUnavailable(_) => "store",
            RunError::LlmTransient(_) | RunError::LlmMalformed(_) => "llm",
            RunError::ReduceExhausted { .. } | RunError::ConflictingAssignment { .. } => "llm",
            RunError::InvariantViolation(_) => "invariant",
            RunError::Other(_) => "other",
        }
    }

    /// Whether this error should abort the run outright (spec §7: store
    /// errors and invariant violations surface; everything else is locally
    /// recoverable and should not reach this point as a run-level error
    /// except via explicit escalation).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RunError::StoreUnavailable(_) | RunError::InvariantViolation(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_unavailable_is_fatal_and_categorized() {
        let err = RunError::StoreUnavailable("connection refused".into());
        assert!(err.is_fatal());
        assert_eq!(err.category(), "store");
    }

    #[test]
    fn invariant_violation_is_fatal() {
        let err = RunError::InvariantViolation("ef_key_not_unique".into());
        assert!(err.is_fatal());
        assert_eq!(err.category(), "invariant");
    }

    #[test]
    fn reduce_exhausted_is_not_fatal() {
        let err = RunError::ReduceExhausted {
            incident_id: "inc-1".into(),
            detail: "llm malformed after retries".into(),
        };
        assert!(!err.is_fatal());
        assert_eq!(err.category(), "llm");
    }

    #[test]
    fn conflicting_assignment_is_not_fatal_and_displays_all_ids() {
        let err = RunError::ConflictingAssignment {
            title_id: "t1".into(),
            existing_ef_id: "ef1".into(),
            target_ef_id: "ef2".into(),
        };
        assert!(!err.is_fatal());
        let msg = err.to_string();
        assert!(msg.contains("t1") && msg.contains("ef1") && msg.contains("ef2"));
    }
}
